//! # Channel Failure Flows
//!
//! Engine restarts, refused connections and slow replies as seen from an
//! HTTP client.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{
        answer, eventually, route_engine, socket_config, FakeEngine, Reply, RunningGateway,
    };
    use route_gateway::CorrelationDiscipline;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn path_body(from: &str) -> serde_json::Value {
        json!({"startLocation": from, "endLocation": "B", "type": "car"})
    }

    #[tokio::test]
    async fn test_lost_connection_fails_in_flight_and_recovers() {
        let engine = FakeEngine::start(
            true,
            Arc::new(|request| {
                if request["startLocation"] == "hang" {
                    Reply::Silent
                } else {
                    Reply::Now(answer(request))
                }
            }),
        )
        .await;
        let gateway = RunningGateway::start(socket_config(
            &engine.address(),
            CorrelationDiscipline::Tagged,
        ))
        .await;

        let ((status, body), ()) = tokio::join!(
            gateway.post("/calculate-path", path_body("hang")),
            async {
                eventually(|| engine.received().len() == 1).await;
                engine.drop_connections();
            }
        );
        assert_eq!(status, 502);
        assert!(body["error"].as_str().unwrap().starts_with("backend unavailable"));

        let (status, body) = gateway.post("/calculate-path", path_body("A")).await;
        assert_eq!(status, 200);
        assert_eq!(body["properties"]["from"], "A");
        assert_eq!(engine.connections(), 2);
        assert!(gateway.metrics.disconnects.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_engine_hangup_mid_request() {
        let engine = FakeEngine::start(
            true,
            Arc::new(|request| {
                if request["startLocation"] == "crash" {
                    Reply::Hangup
                } else {
                    Reply::Now(answer(request))
                }
            }),
        )
        .await;
        let gateway = RunningGateway::start(socket_config(
            &engine.address(),
            CorrelationDiscipline::Tagged,
        ))
        .await;

        let (status, _) = gateway.post("/calculate-path", path_body("crash")).await;
        assert_eq!(status, 502);

        let (status, _) = gateway.post("/calculate-path", path_body("A")).await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_502() {
        // Reserve a port and release it so nothing is listening there
        let address = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            format!("tcp://{}", listener.local_addr().unwrap())
        };
        let gateway =
            RunningGateway::start(socket_config(&address, CorrelationDiscipline::Tagged)).await;

        let (status, body) = gateway.post("/calculate-path", path_body("A")).await;
        assert_eq!(status, 502);
        assert!(body["error"].as_str().unwrap().starts_with("backend unavailable"));

        let (status, body) = gateway.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_timeout_then_late_reply_is_discarded() {
        let engine = FakeEngine::start(
            true,
            Arc::new(|request| {
                if request["startLocation"] == "slow" {
                    Reply::After(Duration::from_millis(600), answer(request))
                } else {
                    Reply::Now(answer(request))
                }
            }),
        )
        .await;
        let mut config = socket_config(&engine.address(), CorrelationDiscipline::Tagged);
        config.timeouts.request = Duration::from_millis(300);
        let gateway = RunningGateway::start(config).await;

        let (status, body) = gateway.post("/calculate-path", path_body("slow")).await;
        assert_eq!(status, 504);
        assert_eq!(body, json!({"error": "backend did not reply within 300ms"}));

        eventually(|| gateway.metrics.stale_replies.load(Ordering::Relaxed) == 1).await;

        let (status, body) = gateway.post("/calculate-path", path_body("A")).await;
        assert_eq!(status, 200);
        assert_eq!(body["properties"]["from"], "A");
        assert_eq!(engine.connections(), 1);
    }

    #[tokio::test]
    async fn test_untagged_reply_on_tagged_channel_times_out() {
        // Engine that does not echo ids while the gateway expects it to
        let engine = FakeEngine::start(false, route_engine()).await;
        let mut config = socket_config(&engine.address(), CorrelationDiscipline::Tagged);
        config.timeouts.request = Duration::from_millis(200);
        let gateway = RunningGateway::start(config).await;

        let (status, _) = gateway.post("/calculate-path", path_body("A")).await;
        assert_eq!(status, 504);
        assert!(gateway.metrics.stale_replies.load(Ordering::Relaxed) >= 1);
    }
}
