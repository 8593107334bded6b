use project_tests::{TINY_JPEG, TINY_PNG, TestServer};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

const MAC: &str = "AA:BB:CC:DD:EE:FF";
const SCREEN: &str = "aa:bb:cc:dd:ee:ff";

async fn upload(client: &reqwest::Client, server: &TestServer, id: &str, mime: &str, body: &[u8]) -> reqwest::Response {
    client
        .post(server.url(&format!("/api/screens/{}/image", id)))
        .header(CONTENT_TYPE, mime)
        .body(body.to_vec())
        .send()
        .await
        .expect("Upload request failed")
}

#[tokio::test]
async fn test_health_marker() {
    let server = TestServer::start().await.expect("Failed to start server");
    let body: Value = reqwest::get(server.url("/"))
        .await
        .expect("Health request failed")
        .json()
        .await
        .expect("Health body is not JSON");

    assert_eq!(body["status"], "ok");
    assert!(body["service"].as_str().unwrap_or_default().contains("trmnl"));
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_setup_registers_device() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/api/setup"))
        .header("ID", MAC)
        .header("Model", "og")
        .header("Firmware", "1.5.2")
        .send()
        .await
        .expect("Setup request failed");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.expect("Setup body is not JSON");
    assert_eq!(body["api_key"], MAC);
    assert_eq!(body["friendly_id"], MAC);
    assert_eq!(body["image_url"], format!("/screens/{}.jpg", SCREEN));
    assert!(body["message"].as_str().unwrap_or_default().contains("TRMNL"));

    let record = server
        .state
        .registry
        .get(SCREEN)
        .await
        .expect("Device was not registered");
    assert_eq!(record.description.as_deref(), Some("Model og, Firmware 1.5.2"));
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_display_defaults_for_unknown_device() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let body: Value = client
        .get(server.url("/api/display"))
        .header("ID", MAC)
        .header("Refresh_Rate", "not-a-number")
        .send()
        .await
        .expect("Display request failed")
        .json()
        .await
        .expect("Display body is not JSON");

    assert_eq!(body["refresh_rate"], 100);
    assert_eq!(body["filename"], format!("{}.jpg", SCREEN));
    assert_eq!(body["image_url"], server.url(&format!("/screens/{}.jpg", SCREEN)));
    let firmware_url = body["firmware_url"].as_str().unwrap_or_default();
    assert!(firmware_url.starts_with("http://"));
    assert!(firmware_url.contains("/firmware/"));
    assert_eq!(body["update_firmware"], false);
    assert_eq!(body["reset_firmware"], false);
    assert_eq!(body["special_function"], "none");
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_display_honours_refresh_rate_and_forwarded_host() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let body: Value = client
        .get(server.url("/api/display"))
        .header("ID", "kitchen")
        .header("Refresh_Rate", "900")
        .header("X-Forwarded-Proto", "https")
        .header("X-Forwarded-Host", "byos.example.com")
        .send()
        .await
        .expect("Display request failed")
        .json()
        .await
        .expect("Display body is not JSON");

    assert_eq!(body["refresh_rate"], 900);
    assert_eq!(body["image_url"], "https://byos.example.com/screens/kitchen.jpg");
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_log_always_acknowledges() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let batch = json!({
        "logs": [{
            "id": 7,
            "message": "woke up",
            "battery_voltage": 4.1,
            "wifi_signal": -61,
            "source_line": "42"
        }]
    });
    let response = client
        .post(server.url("/api/log"))
        .header("ID", MAC)
        .json(&batch)
        .send()
        .await
        .expect("Log request failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for garbage in ["", "not json", "[1, 2, 3]"] {
        let response = client
            .post(server.url("/api/logs"))
            .body(garbage)
            .send()
            .await
            .expect("Log request failed");
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "body {:?}", garbage);
    }

    let entries = server.telemetry.entries();
    let (device, entry) = entries
        .iter()
        .find(|(_, e)| e.message.as_deref() == Some("woke up"))
        .expect("Log entry did not reach the sink");
    assert_eq!(device.as_deref(), Some(MAC));
    assert_eq!(entry.battery_voltage, Some(4.1));
    assert_eq!(entry.source_line, Some(42));
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_upload_then_serve_jpeg() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let response = upload(&client, &server, MAC, "image/jpeg", TINY_JPEG).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Upload body is not JSON");
    assert_eq!(body["id"], SCREEN);
    assert_eq!(body["path"], format!("/screens/{}.jpg", SCREEN));

    let response = client
        .get(server.url(&format!("/screens/{}.jpg", SCREEN)))
        .send()
        .await
        .expect("Image request failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/jpeg")
    );
    let bytes = response.bytes().await.expect("Failed to read image body");
    assert_eq!(bytes.as_ref(), TINY_JPEG);

    let response = client
        .get(server.url(&format!("/screens/{}.png", SCREEN)))
        .send()
        .await
        .expect("Image request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: Value = client
        .get(server.url("/api/display"))
        .header("ID", MAC)
        .send()
        .await
        .expect("Display request failed")
        .json()
        .await
        .expect("Display body is not JSON");
    let image_url = body["image_url"].as_str().unwrap_or_default();
    assert!(image_url.starts_with("http://"));
    assert!(image_url.contains("/screens/"));
    assert!(image_url.ends_with(".jpg"));
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_png_upload_replaces_jpeg() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let response = upload(&client, &server, "den", "image/jpeg", TINY_JPEG).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = upload(&client, &server, "den", "image/png", TINY_PNG).await;
    assert_eq!(response.status(), StatusCode::OK);

    let jpg = client
        .get(server.url("/screens/den.jpg"))
        .send()
        .await
        .expect("Image request failed");
    assert_eq!(jpg.status(), StatusCode::NOT_FOUND);

    let png = client
        .get(server.url("/screens/den.png"))
        .send()
        .await
        .expect("Image request failed");
    assert_eq!(png.status(), StatusCode::OK);
    assert_eq!(
        png.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/png")
    );

    let root = server.data_dir.path().join("screens");
    assert!(!root.join("den.jpg").exists());
    assert!(root.join("den.png").exists());

    let body: Value = client
        .get(server.url("/api/display"))
        .header("ID", "den")
        .send()
        .await
        .expect("Display request failed")
        .json()
        .await
        .expect("Display body is not JSON");
    assert_eq!(body["filename"], "den.png");
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_rejected_upload_keeps_existing_image() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let response = upload(&client, &server, "hall", "image/jpeg", TINY_JPEG).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = upload(&client, &server, "hall", "text/plain", b"hello").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Error body is not JSON");
    assert!(body["message"].is_string());

    let bytes = client
        .get(server.url("/screens/hall.jpg"))
        .send()
        .await
        .expect("Image request failed")
        .bytes()
        .await
        .expect("Failed to read image body");
    assert_eq!(bytes.as_ref(), TINY_JPEG);
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_missing_image_is_not_found() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    for path in ["/screens/nobody.jpg", "/screens/nobody.png", "/screens/nobody.gif", "/screens/noext"] {
        let response = client
            .get(server.url(path))
            .send()
            .await
            .expect("Image request failed");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "path {}", path);
    }
    server.stop().await.expect("Server did not stop cleanly");
}

#[tokio::test]
async fn test_png_route_serves_png_despite_stray_jpeg() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = reqwest::Client::new();

    let root = server.data_dir.path().join("screens");
    std::fs::write(root.join("attic.png"), TINY_PNG).expect("Failed to write png");
    std::fs::write(root.join("attic.jpg"), TINY_JPEG).expect("Failed to write jpg");

    let response = client
        .get(server.url("/screens/attic.png"))
        .send()
        .await
        .expect("Image request failed");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.bytes().await.expect("Failed to read image body");
    assert_eq!(bytes.as_ref(), TINY_PNG);

    let response = client
        .get(server.url("/screens/attic.jpg"))
        .send()
        .await
        .expect("Image request failed");
    assert_eq!(response.status(), StatusCode::OK);
    server.stop().await.expect("Server did not stop cleanly");
}
