//! Integration test: start the gateway on a free port, GET /, assert health JSON.
//! Does not require a model server or Telegram. The server task is left running when the test ends.

use lib::config::Config;
use lib::gateway;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_config_dir() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("courier-gateway-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create config dir");
    let config_path = dir.join("config.json");
    std::fs::File::create(&config_path)
        .and_then(|mut f| f.write_all(b"{}"))
        .expect("write config.json");
    (dir, config_path)
}

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let port = free_port();
    let (_temp_dir, config_path) = temp_config_dir();

    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.relay.authorized_ids = vec!["42".to_string()];
    // Nothing listens here; /health must still answer.
    config.inference.url = format!("http://127.0.0.1:{}/completion", free_port());

    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));

                let probe = client
                    .get(format!("http://127.0.0.1:{}/health", port))
                    .send()
                    .await
                    .expect("GET /health")
                    .text()
                    .await
                    .expect("health body");
                assert_eq!(probe, "server=ok llm=unreachable");
                gateway_handle.abort();
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    gateway_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn gateway_refuses_to_start_without_authorized_ids() {
    let (_temp_dir, config_path) = temp_config_dir();
    let mut config = Config::default();
    config.gateway.port = free_port();
    let err = gateway::run_gateway(config, config_path)
        .await
        .expect_err("empty allow-list must fail");
    assert!(err.to_string().contains("authorized"), "{}", err);
}

#[tokio::test]
async fn gateway_refuses_public_bind_without_token() {
    let (_temp_dir, config_path) = temp_config_dir();
    let mut config = Config::default();
    config.gateway.port = free_port();
    config.gateway.bind = "0.0.0.0".to_string();
    config.relay.authorized_ids = vec!["42".to_string()];
    let err = gateway::run_gateway(config, config_path)
        .await
        .expect_err("public bind without token must fail");
    assert!(err.to_string().contains("without auth"), "{}", err);
}
