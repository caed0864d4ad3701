mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;
    use reqwest::{Client, StatusCode};
    use surge::prelude::*;

    fn plan(json: &str) -> RunPlan {
        RunPlan::compile(&RunConfig::from_json(json).unwrap()).unwrap()
    }

    #[tokio::test]
    #[ntest::timeout(60_000)]
    async fn short_ramp_passes() {
        init().await;
        let accepted_before = mock_service::accepted_events();

        let plan = plan(
            r#"{
                "scenarios": {
                    "ramp": {
                        "executor": "ramping-arrival-rate",
                        "stages": [
                            { "duration": "5s", "target": 200 },
                            { "duration": "2s", "target": 200 }
                        ],
                        "preAllocatedVUs": 20,
                        "maxVUs": 200
                    }
                },
                "thresholds": {
                    "http_req_duration": ["p(95)<500"],
                    "errors": ["rate<0.01"],
                    "dropped_iterations": ["count==0"]
                }
            }"#,
        );

        let summary = LoadTest::new(plan, EventSupplier, HttpTransport::new(mock_url("/events")))
            .run()
            .await;

        let requests = summary.snapshot.requests as f64;
        assert!((requests - 900.).abs() <= 45., "{:?}", summary.snapshot);
        assert!(summary.passed, "{:?}", summary.thresholds);
        let accepted = mock_service::accepted_events() - accepted_before;
        assert!(accepted >= summary.snapshot.success_count);
    }

    #[tokio::test]
    #[ntest::timeout(60_000)]
    async fn rate_limited_target_fails_error_threshold() {
        init().await;

        let plan = plan(
            r#"{
                "scenarios": {
                    "over_limit": {
                        "executor": "constant-arrival-rate",
                        "rate": 200,
                        "duration": "3s",
                        "preAllocatedVUs": 20,
                        "maxVUs": 100
                    }
                },
                "thresholds": { "errors": ["rate<0.01"] }
            }"#,
        );

        let summary = LoadTest::new(
            plan,
            EventSupplier,
            HttpTransport::new(mock_url("/limited/50/events")),
        )
        .run()
        .await;

        assert!(!summary.passed);
        assert_eq!(summary.failed_thresholds().count(), 1);
        assert!(summary.snapshot.http_failed_rate().unwrap() > 0.5);
    }

    #[tokio::test]
    #[ntest::timeout(60_000)]
    async fn slow_target_times_out() {
        init().await;

        let plan = plan(
            r#"{
                "scenarios": {
                    "slow": {
                        "executor": "constant-arrival-rate",
                        "rate": 20,
                        "duration": "1s",
                        "preAllocatedVUs": 20,
                        "requestTimeout": "100ms"
                    }
                },
                "thresholds": { "http_req_failed": ["rate<0.1"] }
            }"#,
        );

        let summary = LoadTest::new(
            plan,
            EventSupplier,
            HttpTransport::new(mock_url("/delay/ms/500/events")),
        )
        .run()
        .await;

        assert_eq!(summary.snapshot.timeouts, summary.snapshot.requests);
        assert!(!summary.passed);
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn refused_connections_are_failures() {
        init().await;
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let plan = plan(
            r#"{
                "scenarios": {
                    "unreachable": {
                        "executor": "constant-arrival-rate",
                        "rate": 20,
                        "duration": "1s",
                        "preAllocatedVUs": 5,
                        "requestTimeout": "2s"
                    }
                },
                "thresholds": { "http_req_failed": ["rate<0.1"] }
            }"#,
        );

        let summary = LoadTest::new(
            plan,
            EventSupplier,
            HttpTransport::new(format!("http://127.0.0.1:{port}/events")),
        )
        .run()
        .await;

        let snapshot = &summary.snapshot;
        assert!(snapshot.requests >= 19, "{snapshot:?}");
        assert_eq!(snapshot.success_count, 0);
        assert_eq!(snapshot.failure_count, snapshot.requests);
        assert_eq!(snapshot.http_failures, snapshot.requests);
        assert_eq!(snapshot.timeouts, 0);
        assert!(!summary.passed);
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn mock_service_endpoints() {
        init().await;
        let client = Client::new();

        let health = client.get(mock_url("/health")).send().await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let body = serde_json::json!({
            "events": [
                { "event_name": "page_view", "user_id": "user_1", "timestamp": 1700000000 },
                {
                    "event_name": "purchase",
                    "user_id": "user_2",
                    "timestamp": 1700000001,
                    "channel": "web"
                }
            ]
        });
        let bulk = client.post(mock_url("/events/bulk")).json(&body).send().await.unwrap();
        assert_eq!(bulk.status(), StatusCode::ACCEPTED);
        let reply: serde_json::Value = bulk.json().await.unwrap();
        assert_eq!(reply["status"], "accepted");

        let malformed = client
            .post(mock_url("/events"))
            .header("Content-Type", "application/json")
            .body("{")
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }
}
