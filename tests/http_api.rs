#![allow(clippy::unwrap_used)]

use axum_test::TestServer;
use rearch::Container;
use serde_json::{Value, json};
use shorthop::{http::router, short_code::ALPHABET};

// NOTE: a fresh container without a database connection uses the in-memory store
fn server() -> TestServer {
    TestServer::new(router(Container::new())).unwrap()
}

async fn create(server: &TestServer, url: &str) -> Value {
    let response = server.post("/").json(&json!({ "url": url })).await;
    assert_eq!(response.status_code(), 201);
    response.json::<Value>()
}

#[tokio::test]
async fn test_shorten_redirect_and_stats() {
    let server = server();

    let created = create(&server, "https://example.com/a").await;
    let short_code = created["short_code"].as_str().unwrap().to_owned();
    assert!((6..=8).contains(&short_code.len()));
    assert!(short_code.bytes().all(|b| ALPHABET.contains(&b)));
    assert_eq!(created["original_url"], "https://example.com/a");
    assert!(
        created["short_url"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/{short_code}"))
    );

    let stats = server.get(&format!("/{short_code}/stats")).await;
    assert_eq!(stats.status_code(), 200);
    assert_eq!(stats.json::<Value>()["click_count"], 0);

    let redirect = server.get(&format!("/{short_code}")).await;
    assert_eq!(redirect.status_code(), 307);
    assert_eq!(redirect.header("location"), "https://example.com/a");
    assert_eq!(redirect.header("cache-control"), "no-cache");

    let stats = server.get(&format!("/{short_code}/stats")).await;
    assert_eq!(stats.status_code(), 200);
    let stats = stats.json::<Value>();
    assert_eq!(stats["short_code"], short_code.as_str());
    assert_eq!(stats["original_url"], "https://example.com/a");
    assert_eq!(stats["created_at"], created["created_at"]);
    assert_eq!(stats["click_count"], 1);
    assert_eq!(stats["is_active"], true);
}

#[tokio::test]
async fn test_repeated_redirects_are_all_counted() {
    let server = server();
    let created = create(&server, "http://example.com/page?q=1").await;
    let short_code = created["short_code"].as_str().unwrap();

    for _ in 0..5 {
        let redirect = server.get(&format!("/{short_code}")).await;
        assert_eq!(redirect.status_code(), 307);
        assert_eq!(redirect.header("location"), "http://example.com/page?q=1");
    }

    let stats = server.get(&format!("/{short_code}/stats")).await;
    assert_eq!(stats.json::<Value>()["click_count"], 5);
}

#[tokio::test]
async fn test_shorten_rejects_disallowed_scheme() {
    let server = server();

    let response = server
        .post("/")
        .json(&json!({ "url": "javascript:alert(1)" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body = response.json::<Value>();
    assert!(body["error"].as_str().unwrap().contains("http"));
    assert!(body["error_id"].is_string());
}

#[tokio::test]
async fn test_shorten_rejects_missing_url_field() {
    let server = server();

    let response = server.post("/").json(&json!({ "link": "https://example.com" })).await;

    assert_eq!(response.status_code(), 400);
    assert!(
        response.json::<Value>()["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid JSON")
    );
}

#[tokio::test]
async fn test_unknown_code_is_not_found() {
    let server = server();

    let redirect = server.get("/doesNotExist").await;
    assert_eq!(redirect.status_code(), 404);
    assert_eq!(redirect.json::<Value>()["error"], "Short URL not found");

    let stats = server.get("/doesNotExist/stats").await;
    assert_eq!(stats.status_code(), 404);
}

#[tokio::test]
async fn test_malformed_code_is_bad_request() {
    let server = server();

    let redirect = server.get("/bad_code").await;
    assert_eq!(redirect.status_code(), 400);
    assert_eq!(redirect.json::<Value>()["error"], "Invalid short code format");

    let stats = server.get("/bad_code/stats").await;
    assert_eq!(stats.status_code(), 400);
}
