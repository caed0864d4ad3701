use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One ramp segment: the rate moves linearly to `target_rate` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub duration: Duration,
    /// Requests per second reached at the end of the stage.
    pub target_rate: f64,
}

impl Stage {
    pub fn new(duration: Duration, target_rate: f64) -> Self {
        Self {
            duration,
            target_rate,
        }
    }
}

/// A single scheduled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireEvent {
    /// Position of the event within its scenario, starting at 0.
    pub seq: u64,
    /// Offset from the start of the run at which the event was emitted.
    pub scheduled: Duration,
}

/// Why a request did not count as a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Connect,
    Transport,
    /// A response check failed; holds the name of the first failing check.
    Check(Arc<str>),
    /// The worker pool was saturated and the event was never dispatched.
    Dropped,
    /// The run was stopped before the request could complete.
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Connect => f.write_str("connect"),
            ErrorKind::Transport => f.write_str("transport"),
            ErrorKind::Check(name) => write!(f, "check failed: {name}"),
            ErrorKind::Dropped => f.write_str("dropped_iteration"),
            ErrorKind::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// The classified result of one fire event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub latency: Duration,
    pub success: bool,
    /// Transport-level failure or a status code of 400 and above.
    pub http_failed: bool,
    pub error_kind: Option<ErrorKind>,
}

impl Outcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            latency,
            success: true,
            http_failed: false,
            error_kind: None,
        }
    }

    pub fn failure(latency: Duration, http_failed: bool, kind: ErrorKind) -> Self {
        Self {
            latency,
            success: false,
            http_failed,
            error_kind: Some(kind),
        }
    }

    pub fn timeout(latency: Duration) -> Self {
        Self::failure(latency, true, ErrorKind::Timeout)
    }

    pub fn dropped() -> Self {
        Self::failure(Duration::ZERO, false, ErrorKind::Dropped)
    }

    pub fn interrupted(latency: Duration) -> Self {
        Self::failure(latency, true, ErrorKind::Interrupted)
    }

    /// Dropped and interrupted outcomes carry no meaningful latency.
    pub fn has_latency(&self) -> bool {
        !matches!(
            self.error_kind,
            Some(ErrorKind::Dropped) | Some(ErrorKind::Interrupted)
        )
    }
}
