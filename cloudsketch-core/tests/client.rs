use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudsketch_core::{CreateClient, ListOptions, ResourceKind, SketchEdit};

fn sketch_json(id: &str, path: &str, secrets: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "name": path.rsplit('/').next().unwrap_or(path),
        "path": format!("$HOME/sketches_v2{path}"),
        "is_public": false,
        "secrets": secrets
    })
}

async fn mount_sketch_pages(server: &MockServer, sketches: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v2/sketches"))
        .and(query_param("user_id", "me"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sketches": sketches })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/sketches"))
        .and(query_param("user_id", "me"))
        .and(query_param("offset", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sketches": [] })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn list_sends_bearer_token_and_normalizes_paths() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/files/d/$HOME/sketches_v2"))
        .and(query_param("deep", "true"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "path": "$HOME/sketches_v2/Blink",
                "name": "Blink",
                "type": "sketch"
            },
            {
                "path": "$HOME/sketches_v2/Blink/Blink.ino",
                "name": "Blink.ino",
                "type": "file",
                "size": 24,
                "modified_at": "2024-01-01T00:00:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let resources = client
        .list(
            "/",
            &ListOptions {
                recursive: true,
                match_name: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].path, "/Blink");
    assert_eq!(resources[0].kind, ResourceKind::Sketch);
    assert_eq!(resources[1].path, "/Blink/Blink.ino");
    assert_eq!(resources[1].size, Some(24));
}

#[tokio::test]
async fn stat_resolves_through_the_parent_listing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/files/d/$HOME/sketches_v2/Blink"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "path": "$HOME/sketches_v2/Blink/Blink.ino",
                "name": "Blink.ino",
                "type": "file",
                "size": 10
            }
        ])))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let resource = client.stat("/Blink/Blink.ino").await.unwrap();
    assert_eq!(resource.kind, ResourceKind::File);
    assert_eq!(resource.size, Some(10));

    let err = client.stat("/Blink/missing.h").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn list_sketches_pages_until_an_empty_page() {
    let server = MockServer::start().await;
    mount_sketch_pages(
        &server,
        json!([sketch_json("sk-1", "/Blink", json!([])), sketch_json("sk-2", "/Servo", json!([]))]),
    )
    .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let sketches = client.list_sketches().await.unwrap();

    assert_eq!(sketches.len(), 2);
    assert_eq!(sketches[0].path, "/Blink");
    // The listing replaces the identity cache as a side effect.
    assert_eq!(client.sketch_cache().len(), 2);
    assert_eq!(
        client.sketch_cache().get_by_path("/Servo").map(|s| s.id),
        Some("sk-2".to_string())
    );
}

#[tokio::test]
async fn read_file_decodes_the_base64_payload() {
    let server = MockServer::start().await;
    let content = "int helper;\n";

    Mock::given(method("GET"))
        .and(path("/v2/files/f/$HOME/sketches_v2/Blink/helper.h"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": BASE64.encode(content),
            "path": "$HOME/sketches_v2/Blink/helper.h"
        })))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    assert_eq!(client.read_file("/Blink/helper.h").await.unwrap(), content);
}

#[tokio::test]
async fn reading_the_main_file_injects_the_include_exactly_once() {
    let server = MockServer::start().await;
    let body = "void setup() {}\nvoid loop() {}\n";

    mount_sketch_pages(
        &server,
        json!([sketch_json("sk-1", "/Blink", json!([{"name": "SECRET_X", "value": "1"}]))]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v2/files/f/$HOME/sketches_v2/Blink/Blink.ino"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": BASE64.encode(body),
            "path": "$HOME/sketches_v2/Blink/Blink.ino"
        })))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let first = client.read_file("/Blink/Blink.ino").await.unwrap();
    let second = client.read_file("/Blink/Blink.ino").await.unwrap();

    assert!(first.starts_with("#include \"arduino_secrets.h\"\n"));
    assert_eq!(first.matches("arduino_secrets.h").count(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn reading_the_secrets_file_uses_freshly_fetched_metadata() {
    let server = MockServer::start().await;

    // The cached copy carries a stale value; the byID fetch is the truth.
    mount_sketch_pages(
        &server,
        json!([sketch_json("sk-1", "/Blink", json!([{"name": "SECRET_X", "value": "stale"}]))]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v2/sketches/byID/sk-1"))
        .and(query_param("user_id", "me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sketch_json(
            "sk-1",
            "/Blink",
            json!([{"name": "SECRET_X", "value": "fresh"}]),
        )))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let rendered = client.read_file("/Blink/arduino_secrets.h").await.unwrap();
    assert_eq!(rendered, "#define SECRET_X \"fresh\"\n");
}

#[tokio::test]
async fn listing_a_sketch_with_secrets_synthesizes_the_secrets_entry() {
    let server = MockServer::start().await;

    mount_sketch_pages(
        &server,
        json!([sketch_json("sk-1", "/Blink", json!([{"name": "SECRET_X", "value": "1"}]))]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v2/files/d/$HOME/sketches_v2/Blink"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "path": "$HOME/sketches_v2/Blink/Blink.ino",
                "name": "Blink.ino",
                "type": "file",
                "size": 24
            }
        ])))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.list_sketches().await.unwrap();
    let resources = client.list("/Blink", &ListOptions::default()).await.unwrap();

    assert_eq!(resources.len(), 2);
    let secrets = &resources[1];
    assert_eq!(secrets.path, "/Blink/arduino_secrets.h");
    assert_eq!(secrets.kind, ResourceKind::File);
    assert_eq!(secrets.size, None);
}

#[tokio::test]
async fn writing_the_main_file_strips_the_include_before_upload() {
    let server = MockServer::start().await;
    let upstream = "void setup() {}\n";
    let local = format!("#include \"arduino_secrets.h\"\n{upstream}");

    Mock::given(method("POST"))
        .and(path("/v2/files/f/$HOME/sketches_v2/Blink/Blink.ino"))
        .and(body_json(json!({ "data": BASE64.encode(upstream) })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.write_file("/Blink/Blink.ino", &local).await.unwrap();
}

#[tokio::test]
async fn writing_the_secrets_file_edits_sketch_metadata() {
    let server = MockServer::start().await;

    mount_sketch_pages(
        &server,
        json!([sketch_json("sk-1", "/Blink", json!([{"name": "SECRET_X", "value": "old"}]))]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v2/sketches/sk-1"))
        .and(body_json(json!({
            "secrets": [{"name": "SECRET_X", "value": "new"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(sketch_json(
            "sk-1",
            "/Blink",
            json!([{"name": "SECRET_X", "value": "new"}]),
        )))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    client
        .write_file("/Blink/arduino_secrets.h", "#define SECRET_X \"new\"\n")
        .await
        .unwrap();
    // Metadata edits invalidate the identity cache wholesale.
    assert!(client.sketch_cache().is_empty());
}

#[tokio::test]
async fn rename_posts_the_move_route_and_maps_conflicts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/files/mv"))
        .and(body_json(json!({
            "from": "$HOME/sketches_v2/Blink",
            "to": "$HOME/sketches_v2/Blink2"
        })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/files/cp"))
        .respond_with(ResponseTemplate::new(409).set_body_string("destination exists"))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.rename("/Blink", "/Blink2").await.unwrap();

    let err = client.copy("/Blink2", "/Taken").await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn delete_selects_the_file_or_directory_route() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v2/files/f/$HOME/sketches_v2/Blink/old.h"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v2/files/d/$HOME/sketches_v2/Old"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.delete("/Blink/old.h", ResourceKind::File).await.unwrap();
    client.delete("/Old", ResourceKind::Sketch).await.unwrap();
}

#[tokio::test]
async fn create_sketch_sends_the_base64_ino_body() {
    let server = MockServer::start().await;
    let content = "void setup() {}\n";

    Mock::given(method("PUT"))
        .and(path("/v2/sketches"))
        .and(body_json(json!({
            "ino": BASE64.encode(content),
            "path": "$HOME/sketches_v2/Fresh",
            "user_id": "me"
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(sketch_json("sk-9", "/Fresh", json!([]))),
        )
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let sketch = client.create_sketch("/Fresh", content).await.unwrap();
    assert_eq!(sketch.id, "sk-9");
    assert_eq!(sketch.path, "/Fresh");
}

#[tokio::test]
async fn edit_sketch_updates_visibility() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v2/sketches/sk-1"))
        .and(body_json(json!({ "is_public": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sk-1",
            "name": "Blink",
            "path": "$HOME/sketches_v2/Blink",
            "is_public": true,
            "secrets": []
        })))
        .mount(&server)
        .await;

    let client = CreateClient::with_base_url(&server.uri(), "test-token").unwrap();
    let edit = SketchEdit {
        is_public: Some(true),
        ..SketchEdit::default()
    };
    let sketch = client.edit_sketch("sk-1", &edit).await.unwrap();
    assert!(sketch.is_public);
}
