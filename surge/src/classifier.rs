use crate::transport::{TransportError, TransportResponse};
use serde_json::Value;
use std::sync::Arc;
use surge_core::{CheckConfig, ErrorKind, Outcome};

/// Turns transport results into outcomes by running an ordered list of checks.
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    checks: Vec<Check>,
}

#[derive(Debug, Clone)]
struct Check {
    name: Arc<str>,
    kind: CheckKind,
}

#[derive(Debug, Clone)]
enum CheckKind {
    Status(u16),
    BodyField { pointer: String, equals: Value },
}

impl OutcomeClassifier {
    pub fn new(checks: &[CheckConfig]) -> Self {
        let checks = checks
            .iter()
            .map(|config| Check {
                name: config.name().into(),
                kind: match config {
                    CheckConfig::Status { equals } => CheckKind::Status(*equals),
                    CheckConfig::BodyField { field, equals } => CheckKind::BodyField {
                        pointer: json_pointer(field),
                        equals: equals.clone(),
                    },
                },
            })
            .collect();
        Self { checks }
    }

    pub fn classify(&self, res: &TransportResponse) -> Outcome {
        if let Some(err) = &res.error {
            let kind = match err {
                TransportError::Timeout => ErrorKind::Timeout,
                TransportError::Connect(_) => ErrorKind::Connect,
                TransportError::Other(_) => ErrorKind::Transport,
            };
            return Outcome::failure(res.elapsed, true, kind);
        }

        let http_failed = res.status.map_or(true, |status| status >= 400);

        // Parsed at most once, and only if a body check needs it.
        let mut body: Option<Option<Value>> = None;
        for check in &self.checks {
            let passed = match &check.kind {
                CheckKind::Status(expected) => res.status == Some(*expected),
                CheckKind::BodyField { pointer, equals } => body
                    .get_or_insert_with(|| serde_json::from_slice(&res.body).ok())
                    .as_ref()
                    .and_then(|v| v.pointer(pointer))
                    .is_some_and(|v| v == equals),
            };
            if !passed {
                let kind = ErrorKind::Check(check.name.clone());
                return Outcome::failure(res.elapsed, http_failed, kind);
            }
        }

        Outcome {
            http_failed,
            ..Outcome::success(res.elapsed)
        }
    }
}

/// `data.id` -> `/data/id`
fn json_pointer(field: &str) -> String {
    field
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("/{}", part.replace('~', "~0").replace('/', "~1")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    const LATENCY: Duration = Duration::from_millis(12);

    fn accepted_checks() -> Vec<CheckConfig> {
        vec![
            CheckConfig::Status { equals: 202 },
            CheckConfig::BodyField {
                field: "status".to_string(),
                equals: json!("accepted"),
            },
        ]
    }

    #[test]
    fn accepted_response_succeeds() {
        let classifier = OutcomeClassifier::new(&accepted_checks());
        let res = TransportResponse::status(202, LATENCY, &br#"{"status":"accepted"}"#[..]);

        assert_eq!(classifier.classify(&res), Outcome::success(LATENCY));
    }

    #[test]
    fn first_failing_check_names_the_error() {
        let classifier = OutcomeClassifier::new(&accepted_checks());
        let res = TransportResponse::status(500, LATENCY, &b"oops"[..]);

        let outcome = classifier.classify(&res);
        assert!(!outcome.success);
        assert!(outcome.http_failed);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Check("status is 202".into())));
        assert_eq!(outcome.latency, LATENCY);
    }

    #[test]
    fn malformed_body_fails_the_body_check() {
        let classifier = OutcomeClassifier::new(&accepted_checks());
        let res = TransportResponse::status(202, LATENCY, &b"not json"[..]);

        let outcome = classifier.classify(&res);
        assert!(!outcome.success);
        assert!(!outcome.http_failed);
        assert_eq!(
            outcome.error_kind.map(|k| k.to_string()),
            Some(r#"check failed: body.status is "accepted""#.to_string())
        );
    }

    #[test]
    fn nested_fields() {
        let classifier = OutcomeClassifier::new(&[CheckConfig::BodyField {
            field: "data.count".to_string(),
            equals: json!(3),
        }]);
        let ok = TransportResponse::status(200, LATENCY, &br#"{"data":{"count":3}}"#[..]);
        let missing = TransportResponse::status(200, LATENCY, &br#"{"data":{}}"#[..]);

        assert!(classifier.classify(&ok).success);
        assert!(!classifier.classify(&missing).success);
        assert_eq!(json_pointer("data.count"), "/data/count");
    }

    #[test]
    fn transport_errors_map_to_kinds() {
        let classifier = OutcomeClassifier::new(&[]);
        for (err, kind) in [
            (TransportError::Timeout, ErrorKind::Timeout),
            (TransportError::Connect("refused".into()), ErrorKind::Connect),
            (TransportError::Other("reset".into()), ErrorKind::Transport),
        ] {
            let outcome = classifier.classify(&TransportResponse::error(err, LATENCY));
            assert!(!outcome.success);
            assert!(outcome.http_failed);
            assert_eq!(outcome.error_kind, Some(kind));
        }
    }

    #[test]
    fn http_failure_is_independent_of_checks() {
        // No checks at all: a 404 still counts as an HTTP failure, but not as an error.
        let classifier = OutcomeClassifier::new(&[]);
        let outcome = classifier.classify(&TransportResponse::status(404, LATENCY, ""));
        assert!(outcome.success);
        assert!(outcome.http_failed);
    }
}
