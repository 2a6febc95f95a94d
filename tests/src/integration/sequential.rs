//! # Sequential Discipline
//!
//! An engine that does not echo ids. The gateway keeps one request in
//! flight and must still hand every client its own reply.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{
        answer, jittered_engine, socket_config, FakeEngine, Reply, RunningGateway,
    };
    use futures::future::join_all;
    use route_gateway::CorrelationDiscipline;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_clients_get_their_own_replies() {
        let engine = FakeEngine::start(false, jittered_engine(15)).await;
        let gateway = RunningGateway::start(socket_config(
            &engine.address(),
            CorrelationDiscipline::Sequential,
        ))
        .await;

        let requests = (0..20).map(|i| {
            let gateway = &gateway;
            async move {
                if i % 4 == 3 {
                    let (status, body) = gateway
                        .post("/fuzzy-search", json!({"locationName": "gate"}))
                        .await;
                    (i, status, body)
                } else {
                    let (status, body) = gateway
                        .post(
                            "/calculate-path",
                            json!({
                                "startLocation": format!("S{}", i),
                                "endLocation": format!("E{}", i),
                                "type": "car",
                            }),
                        )
                        .await;
                    (i, status, body)
                }
            }
        });

        for (i, status, body) in join_all(requests).await {
            assert_eq!(status, 200, "request {} failed: {}", i, body);
            if i % 4 == 3 {
                assert_eq!(body, json!(["North Gate"]));
            } else {
                assert_eq!(body["properties"]["from"], format!("S{}", i));
                assert_eq!(body["properties"]["to"], format!("E{}", i));
            }
        }

        let sent = engine.received();
        assert_eq!(sent.len(), 20);
        assert!(sent.iter().all(|request| request.get("id").is_none()));
        assert_eq!(engine.connections(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_request_releases_the_slot() {
        let engine = FakeEngine::start(
            false,
            Arc::new(|request| {
                if request["startLocation"] == "silent" {
                    Reply::Silent
                } else {
                    Reply::Now(answer(request))
                }
            }),
        )
        .await;
        let mut config = socket_config(&engine.address(), CorrelationDiscipline::Sequential);
        config.timeouts.request = Duration::from_millis(300);
        let gateway = RunningGateway::start(config).await;

        let first = gateway.post(
            "/calculate-path",
            json!({"startLocation": "silent", "endLocation": "B", "type": "car"}),
        );
        let second = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            gateway
                .post(
                    "/calculate-path",
                    json!({"startLocation": "A", "endLocation": "B", "type": "car"}),
                )
                .await
        };
        let ((first_status, _), (second_status, second_body)) = tokio::join!(first, second);

        assert_eq!(first_status, 504);
        // Queued behind the silent request until its deadline
        assert_eq!(second_status, 200);
        assert_eq!(second_body["properties"]["from"], "A");
        assert_eq!(engine.connections(), 2);
    }

    #[tokio::test]
    async fn test_late_reply_never_reaches_the_next_client() {
        let engine = FakeEngine::start(
            false,
            Arc::new(|request| {
                let delay = if request["startLocation"] == "slow" { 450 } else { 80 };
                Reply::After(Duration::from_millis(delay), answer(request))
            }),
        )
        .await;
        let mut config = socket_config(&engine.address(), CorrelationDiscipline::Sequential);
        config.timeouts.request = Duration::from_millis(400);
        let gateway = RunningGateway::start(config).await;

        let first = gateway.post(
            "/calculate-path",
            json!({"startLocation": "slow", "endLocation": "X", "type": "car"}),
        );
        let second = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            gateway
                .post(
                    "/calculate-path",
                    json!({"startLocation": "B", "endLocation": "X", "type": "car"}),
                )
                .await
        };
        let ((first_status, _), (second_status, second_body)) = tokio::join!(first, second);

        assert_eq!(first_status, 504);
        assert_eq!(second_status, 200, "{}", second_body);
        assert_eq!(second_body["properties"]["from"], "B");
        assert_eq!(engine.connections(), 2);
    }

    #[tokio::test]
    async fn test_engine_error_passes_through() {
        let engine = FakeEngine::start(false, jittered_engine(5)).await;
        let gateway = RunningGateway::start(socket_config(
            &engine.address(),
            CorrelationDiscipline::Sequential,
        ))
        .await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "Nowhere", "endLocation": "B", "type": "ped"}),
            )
            .await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "Location not found: Nowhere");
    }
}
