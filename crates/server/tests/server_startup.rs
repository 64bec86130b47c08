//! Server startup integration tests.
//!
//! Spawns the real binary against a throwaway database and exercises
//! the read-only surface.

use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::sleep;

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a config with database path
fn config_with_db(port: u16, db_path: &str) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[runner]
workers = 1
poll_interval_ms = 200
"#,
        port, db_path
    )
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_mediamill"))
        .env("MEDIAMILL_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

struct TestServer {
    port: u16,
    child: tokio::process::Child,
    _config: NamedTempFile,
    _temp_dir: TempDir,
    db_path: std::path::PathBuf,
}

impl TestServer {
    async fn start() -> Self {
        let port = get_available_port();
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let mut config = NamedTempFile::new().unwrap();
        config
            .write_all(config_with_db(port, db_path.to_str().unwrap()).as_bytes())
            .unwrap();
        config.flush().unwrap();

        let child = spawn_server(config.path()).await;
        assert!(
            wait_for_server(port, 100).await,
            "Server did not start in time"
        );

        Self {
            port,
            child,
            _config: config,
            _temp_dir: temp_dir,
            db_path,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

#[tokio::test]
async fn test_server_creates_database_file() {
    let mut server = TestServer::start().await;
    assert!(
        server.db_path.exists(),
        "Database file should be created on startup"
    );
    server.child.kill().await.ok();
}

#[tokio::test]
async fn test_health_reports_running_runner() {
    let mut server = TestServer::start().await;
    let body: serde_json::Value = Client::new()
        .get(server.url("/api/v1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["runner_running"], true);
    server.child.kill().await.ok();
}

#[tokio::test]
async fn test_formats_lists_builtin_engine() {
    let mut server = TestServer::start().await;
    let body: serde_json::Value = Client::new()
        .get(server.url("/api/v1/formats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let engines = body["engines"].as_array().unwrap();
    assert_eq!(engines.len(), 1);
    assert_eq!(engines[0]["id"], "ffmpeg-local");
    let pairs = body["pairs"].as_array().unwrap();
    assert!(pairs
        .iter()
        .any(|p| p["input"] == "mov" && p["output"] == "mp4"));
    server.child.kill().await.ok();
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_pipeline_metrics() {
    let mut server = TestServer::start().await;
    let body = Client::new()
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("mediamill_"));
    server.child.kill().await.ok();
}
