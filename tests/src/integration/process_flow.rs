//! # Process Handoff
//!
//! The gateway running the engine once per request. A small shell script
//! stands in for the engine executable.

#[cfg(all(test, unix))]
mod tests {
    use crate::integration::harness::RunningGateway;
    use route_gateway::{BackendMode, GatewayConfig, OutputMode};
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    const STDOUT_ENGINE: &str = r#"
case "$1" in
  --fuzzy) printf '["Main Library","Law Library"]\n' ;;
  Nowhere) echo "Location not found: Nowhere" >&2; exit 2 ;;
  *) printf '{"type":"FeatureCollection","features":[],"properties":{"from":"%s","to":"%s","mode":"%s"}}\n' "$1" "$2" "${3:-car}" ;;
esac
"#;

    const FILE_ENGINE: &str = r#"
for out; do :; done
printf '{"geometry":{"type":"LineString","coordinates":[[%s,%s],[%s,%s]]}}' "$2" "$1" "$4" "$3" > "$out"
"#;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("engine.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn process_config(script: &Path, output: OutputMode) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.backend.mode = BackendMode::Process;
        config.process.program = PathBuf::from("/bin/sh");
        config.process.args = vec![script.to_string_lossy().into_owned()];
        config.process.output = output;
        config.timeouts.request = Duration::from_secs(5);
        config
    }

    #[tokio::test]
    async fn test_stdout_engine_serves_all_operations() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), STDOUT_ENGINE);
        let gateway = RunningGateway::start(process_config(&script, OutputMode::Stdout)).await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "Gym", "endLocation": "North Gate", "type": "ped"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["properties"]["from"], "Gym");
        assert_eq!(body["properties"]["to"], "North Gate");
        assert_eq!(body["properties"]["mode"], "ped");

        let (status, body) = gateway
            .post("/fuzzy-search", json!({"locationName": "library"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!(["Main Library", "Law Library"]));

        let (status, body) = gateway.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mode"], "process");
    }

    #[tokio::test]
    async fn test_engine_failure_is_500_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), STDOUT_ENGINE);
        let gateway = RunningGateway::start(process_config(&script, OutputMode::Stdout)).await;

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
    async fn test_flag_like_names_never_reach_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), STDOUT_ENGINE);
        let gateway = RunningGateway::start(process_config(&script, OutputMode::Stdout)).await;

        let (status, body) = gateway
            .post(
                "/calculate-path",
                json!({"startLocation": "--fuzzy", "endLocation": "Gym", "type": "car"}),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "Location names must not start with '-'"}));
    }

    #[tokio::test]
    async fn test_per_request_files_are_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), FILE_ENGINE);
        let out_dir = dir.path().join("routes");
        let gateway = RunningGateway::start(process_config(
            &script,
            OutputMode::PerRequest {
                dir: out_dir.clone(),
            },
        ))
        .await;

        let (status, body) = gateway
            .post(
                "/calculate-route-arbitrary",
                json!({"start": [31.2, 121.4], "end": [31.3, 121.5]}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["coordinates"], json!([[121.4, 31.2], [121.5, 31.3]]));

        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
    }
}
