//! Compiles stage lists into piecewise-linear arrival-rate schedules.
use std::time::Duration;
use surge_core::{ScheduleError, Stage};

/// Immutable mapping from elapsed time to a target rate in requests per second.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSchedule {
    segments: Vec<Segment>,
    total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: f64,
    duration: f64,
    from: f64,
    to: f64,
    /// Requests due before this segment starts.
    preceding: f64,
}

impl Segment {
    fn end(&self) -> f64 {
        self.start + self.duration
    }

    fn rate_at(&self, t: f64) -> f64 {
        self.from + (self.to - self.from) * (t - self.start) / self.duration
    }

    /// Requests due between the segment start and `t`.
    fn area_until(&self, t: f64) -> f64 {
        let x = t - self.start;
        self.from * x + (self.to - self.from) * x * x / (2. * self.duration)
    }
}

impl RateSchedule {
    pub fn compile(start_rate: f64, stages: &[Stage]) -> Result<Self, ScheduleError> {
        if !start_rate.is_finite() || start_rate < 0. {
            return Err(ScheduleError::InvalidStartRate(start_rate));
        }
        if stages.is_empty() {
            return Err(ScheduleError::NoStages);
        }

        let mut segments = Vec::with_capacity(stages.len());
        let mut start = 0.;
        let mut from = start_rate;
        let mut preceding = 0.;
        for (index, stage) in stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(ScheduleError::ZeroDuration { index });
            }
            if !stage.target_rate.is_finite() || stage.target_rate < 0. {
                return Err(ScheduleError::InvalidRate {
                    index,
                    rate: stage.target_rate,
                });
            }

            let segment = Segment {
                start,
                duration: stage.duration.as_secs_f64(),
                from,
                to: stage.target_rate,
                preceding,
            };
            preceding += segment.area_until(segment.end());
            start = segment.end();
            from = stage.target_rate;
            segments.push(segment);
        }

        Ok(Self {
            segments,
            total: start,
        })
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total)
    }

    /// Target rate at `elapsed`; zero once the schedule is over.
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        self.segment_at(t).map(|s| s.rate_at(t)).unwrap_or(0.)
    }

    /// Requests due by `elapsed`: the integral of `rate_at` from zero.
    pub fn expected_count(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64().min(self.total);
        match self.segment_at(t) {
            Some(segment) => segment.preceding + segment.area_until(t),
            None => self.total_count(),
        }
    }

    pub fn total_count(&self) -> f64 {
        self.segments
            .last()
            .map(|s| s.preceding + s.area_until(s.end()))
            .unwrap_or(0.)
    }

    fn segment_at(&self, t: f64) -> Option<&Segment> {
        let idx = self.segments.partition_point(|s| s.end() <= t);
        self.segments.get(idx)
    }
}

/// A schedule placed at an offset on the run timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSchedule {
    pub offset: Duration,
    pub schedule: RateSchedule,
}

impl TimedSchedule {
    pub fn new(offset: Duration, schedule: RateSchedule) -> Self {
        Self { offset, schedule }
    }

    pub fn end(&self) -> Duration {
        self.offset + self.schedule.total_duration()
    }

    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        elapsed
            .checked_sub(self.offset)
            .map(|local| self.schedule.rate_at(local))
            .unwrap_or(0.)
    }

    pub fn expected_count(&self, elapsed: Duration) -> f64 {
        elapsed
            .checked_sub(self.offset)
            .map(|local| self.schedule.expected_count(local))
            .unwrap_or(0.)
    }

    fn overlaps(&self, other: &TimedSchedule) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Several timed schedules whose rates add up where their windows overlap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeSchedule {
    members: Vec<TimedSchedule>,
}

impl CompositeSchedule {
    pub fn new(members: Vec<TimedSchedule>) -> Self {
        Self { members }
    }

    pub fn single(member: TimedSchedule) -> Self {
        Self::new(vec![member])
    }

    pub fn push(&mut self, member: TimedSchedule) {
        self.members.push(member);
    }

    pub fn members(&self) -> &[TimedSchedule] {
        &self.members
    }

    /// Offset at which the last member finishes.
    pub fn end(&self) -> Duration {
        self.members
            .iter()
            .map(TimedSchedule::end)
            .max()
            .unwrap_or_default()
    }

    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        self.members.iter().map(|m| m.rate_at(elapsed)).sum()
    }

    pub fn expected_count(&self, elapsed: Duration) -> f64 {
        self.members.iter().map(|m| m.expected_count(elapsed)).sum()
    }

    pub fn total_count(&self) -> f64 {
        self.expected_count(self.end())
    }

    pub fn has_overlap(&self) -> bool {
        self.members.iter().enumerate().any(|(i, a)| {
            self.members[i + 1..].iter().any(|b| a.overlaps(b))
        })
    }
}
