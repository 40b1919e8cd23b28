//! End-to-end tests over HTTP.
//!
//! A local axum app plays the upstream registry and awesome-list, so the
//! real providers run against it. The catalog API is then served on a
//! second listener and exercised with `reqwest`.

use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use harbor_catalog::config::{parse_config, Config};
use harbor_catalog::manager::{CatalogManager, RefreshOutcome};
use harbor_catalog::server;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

const AWESOME_MD: &str = r#"# Awesome MCP Servers

- [Aggregators](#aggregators)

### Aggregators
- [acme/weather](https://github.com/acme/weather) ☁️ - Weather forecasts
- [other/tool](https://github.com/other/tool) 🐍 🏠 - A local tool
"#;

async fn registry_servers(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    match params.get("cursor").map(String::as_str) {
        None => Json(json!({
            "servers": [{
                "server": {
                    "name": "io.github.acme/weather",
                    "title": "Weather",
                    "description": "Weather forecasts",
                    "repository": { "url": "https://github.com/acme/weather" },
                    "remotes": [{ "type": "streamable-http", "url": "https://weather.acme.dev/mcp" }]
                },
                "_meta": { "io.modelcontextprotocol.registry/official": { "status": "active", "isLatest": true } }
            }],
            "metadata": { "nextCursor": "page-2" }
        })),
        Some(_) => Json(json!({
            "servers": [{
                "server": {
                    "name": "io.github.acme/files",
                    "description": "File access",
                    "websiteUrl": "https://files.acme.dev"
                }
            }],
            "metadata": {}
        })),
    }
}

async fn start_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/v0/servers", get(registry_servers))
        .route("/awesome.md", get(|| async { AWESOME_MD }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

fn test_config(tmp: &TempDir, upstream: SocketAddr) -> Config {
    let content = format!(
        r#"[db]
path = "{}/catalog.sqlite"

[refresh]
cycle_timeout_secs = 10
provider_timeout_secs = 5

[providers.official_registry]
base_url = "http://{}"
page_size = 1

[providers.awesome.test]
url = "http://{}/awesome.md"
"#,
        tmp.path().display(),
        upstream,
        upstream
    );
    parse_config(&content).unwrap()
}

async fn start_catalog(manager: Arc<CatalogManager>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server::serve(manager, listener).await.ok();
    });
    format!("http://{}", addr)
}

async fn refreshed_manager(tmp: &TempDir) -> Arc<CatalogManager> {
    let upstream = start_upstream().await;
    let cfg = test_config(tmp, upstream);
    let manager = CatalogManager::from_config(&cfg).await.unwrap();

    match manager.refresh(None).await.unwrap() {
        RefreshOutcome::Completed(report) => {
            assert!(
                report.failed_providers().next().is_none(),
                "providers failed: {:?}",
                report.providers
            );
        }
        RefreshOutcome::Coalesced => panic!("nothing else was refreshing"),
    }
    manager
}

#[tokio::test]
async fn test_builtin_providers_fetch_over_http() {
    let tmp = TempDir::new().unwrap();
    let manager = refreshed_manager(&tmp).await;

    let catalog = manager.catalog();
    let mut ids: Vec<&str> = catalog.entries.iter().map(|e| e.id.as_str()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "awesome:test:github.com/acme/weather",
            "awesome:test:github.com/other/tool",
            "official_registry:io.github.acme/files",
            "official_registry:io.github.acme/weather",
        ]
    );

    // Both pages of the registry were followed
    let files = catalog.get("official_registry:io.github.acme/files").unwrap();
    assert_eq!(files.source_url.as_deref(), Some("https://files.acme.dev"));

    // The same repository listed twice collapses to one entry
    let deduped = catalog.deduplicated();
    assert_eq!(deduped.len(), 3);
    let weather = deduped
        .iter()
        .filter(|e| e.name.to_lowercase().contains("weather"))
        .count();
    assert_eq!(weather, 1);
}

#[tokio::test]
async fn test_catalog_api() {
    let tmp = TempDir::new().unwrap();
    let manager = refreshed_manager(&tmp).await;
    let base = start_catalog(manager).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let body: Value = client
        .get(format!("{}/catalog", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["populated"], true);
    assert_eq!(body["count"], 4);
    // Remote-capable entries lead the order
    assert_eq!(body["entries"][0]["remote_capable"], true);

    let body: Value = client
        .get(format!("{}/catalog?dedupe=true", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 3);

    let body: Value = client
        .get(format!("{}/catalog?remote_only=true&limit=1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["entries"][0]["remote_capable"], true);

    let resp = client
        .get(format!(
            "{}/history/official_registry:io.github.acme/weather",
            base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["entry_id"], "official_registry:io.github.acme/weather");
    assert_eq!(body["changes"].as_array().unwrap().len(), 1);
    assert_eq!(body["changes"][0]["change_kind"], "added");

    let resp = client
        .get(format!("{}/entries/awesome:test:github.com/other/tool", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "other/tool");
    assert!(body["removed_at"].is_null());

    let resp = client
        .get(format!("{}/history/nope:missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let body: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["populated"], true);
    assert_eq!(body["provider_status"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_refresh_endpoint() {
    let tmp = TempDir::new().unwrap();
    let manager = refreshed_manager(&tmp).await;
    let base = start_catalog(manager.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/refresh", base))
        .json(&json!({ "providers": ["nope"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unknown_provider");

    let resp = client
        .post(format!("{}/refresh?wait=true", base))
        .json(&json!({ "providers": ["awesome:test"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["providers"].as_array().unwrap().len(), 1);
    assert!(body["changes"].as_array().unwrap().is_empty());

    let resp = client
        .post(format!("{}/refresh", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
}
