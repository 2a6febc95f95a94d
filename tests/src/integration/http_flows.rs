//! # HTTP Flows
//!
//! The client operations end to end under the tagged discipline: many
//! requests share one engine connection and replies are matched by id.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{
        jittered_engine, route_engine, socket_config, FakeEngine, RunningGateway,
    };
    use futures::future::join_all;
    use route_gateway::{ChannelState, CorrelationDiscipline};
    use serde_json::json;

    async fn tagged_setup() -> (FakeEngine, RunningGateway) {
        let engine = FakeEngine::start(true, route_engine()).await;
        let gateway = RunningGateway::start(socket_config(
            &engine.address(),
            CorrelationDiscipline::Tagged,
        ))
        .await;
        (engine, gateway)
    }

    #[tokio::test]
    async fn test_calculate_path_returns_engine_geometry() {
        let (engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "A", "endLocation": "B", "type": "car"}),
            )
            .await;

        assert_eq!(status, 200);
        assert_eq!(body["type"], "FeatureCollection");
        assert_eq!(body["properties"]["from"], "A");
        assert_eq!(body["properties"]["to"], "B");
        assert_eq!(body["properties"]["mode"], "path");

        let sent = engine.received();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["queryType"], "path");
        assert_eq!(sent[0]["id"].as_str().map(str::len), Some(36));
    }

    #[tokio::test]
    async fn test_ped_path_uses_pedestrian_query() {
        let (_engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "Gym", "endLocation": "North Gate", "type": "ped"}),
            )
            .await;

        assert_eq!(status, 200);
        assert_eq!(body["properties"]["mode"], "ped_path");
    }

    #[tokio::test]
    async fn test_missing_end_location_never_reaches_engine() {
        let (engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post("/calculate-path", json!({"startLocation": "A"}))
            .await;

        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "Start and end required"}));
        assert!(engine.received().is_empty());
        // The channel connects lazily, so nothing dialed the engine either
        assert_eq!(engine.connections(), 0);
    }

    #[tokio::test]
    async fn test_missing_route_type_is_rejected() {
        let (engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "A", "endLocation": "B"}),
            )
            .await;

        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("Route type required"));
        assert!(engine.received().is_empty());
    }

    #[tokio::test]
    async fn test_fuzzy_search_candidates_and_empty_result() {
        let (_engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post("/fuzzy-search", json!({"locationName": "library"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!(["Main Library", "Law Library"]));

        let (status, body) = gateway
            .post("/fuzzy-search", json!({"locationName": "zzz"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_arbitrary_route_and_coordinate_validation() {
        let (engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post(
                "/calculate-route-arbitrary",
                json!({"start": [31.2, 121.4], "end": [31.3, 121.5]}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["type"], "LineString");
        assert_eq!(body["coordinates"], json!([[121.4, 31.2], [121.5, 31.3]]));
        assert_eq!(engine.received()[0]["start"], json!({"lat": 31.2, "lng": 121.4}));

        let (status, _) = gateway
            .post(
                "/calculate-route-arbitrary",
                json!({"start": [95.0, 0.0], "end": [0.0, 0.0]}),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(engine.received().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_500() {
        let (_engine, gateway) = tagged_setup().await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "Nowhere", "endLocation": "B", "type": "car"}),
            )
            .await;

        assert_eq!(status, 500);
        assert_eq!(body, json!({"error": "Location not found: Nowhere"}));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_connection() {
        let engine = FakeEngine::start(true, jittered_engine(40)).await;
        let gateway = RunningGateway::start(socket_config(
            &engine.address(),
            CorrelationDiscipline::Tagged,
        ))
        .await;

        let requests = (0..40).map(|i| {
            let gateway = &gateway;
            async move {
                let (status, body) = gateway
                    .post(
                        "/calculate-path",
                        json!({
                            "startLocation": format!("S{}", i),
                            "endLocation": format!("E{}", i),
                            "type": if i % 2 == 0 { "car" } else { "ped" },
                        }),
                    )
                    .await;
                (i, status, body)
            }
        });

        for (i, status, body) in join_all(requests).await {
            assert_eq!(status, 200);
            assert_eq!(body["properties"]["from"], format!("S{}", i));
            assert_eq!(body["properties"]["to"], format!("E{}", i));
            let mode = if i % 2 == 0 { "path" } else { "ped_path" };
            assert_eq!(body["properties"]["mode"], mode);
        }

        assert_eq!(engine.connections(), 1);
        assert_eq!(gateway.backend.status().pending, 0);
    }

    #[tokio::test]
    async fn test_health_reflects_channel_state() {
        let (_engine, gateway) = tagged_setup().await;

        let (status, body) = gateway.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["channel"], "disconnected");

        gateway
            .post("/fuzzy-search", json!({"locationName": "gym"}))
            .await;

        let (status, body) = gateway.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["channel"], "connected");
        assert_eq!(body["pending"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_outcomes() {
        let (_engine, gateway) = tagged_setup().await;

        gateway
            .post("/fuzzy-search", json!({"locationName": "gym"}))
            .await;
        gateway.post("/fuzzy-search", json!({})).await;

        let (status, body) = gateway.get("/metrics").await;
        assert_eq!(status, 200);
        assert_eq!(body["requests"]["total"], 2);
        assert_eq!(body["requests"]["success"], 1);
        assert_eq!(body["errors"]["validation"], 1);
        assert_eq!(body["channel"]["connects"], 1);
    }

    #[tokio::test]
    async fn test_graceful_stop_closes_channel() {
        let (_engine, gateway) = tagged_setup().await;
        gateway
            .post("/fuzzy-search", json!({"locationName": "gym"}))
            .await;

        let backend = gateway.backend.clone();
        gateway.stop().await.unwrap();

        let status = backend.status();
        assert_eq!(status.channel, Some(ChannelState::Disconnected));
        assert_eq!(status.pending, 0);
    }
}
