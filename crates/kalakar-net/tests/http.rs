use std::sync::Arc;

use bytes::Bytes;
use kalakar_net::{
    Fetcher, HttpFetcher, LoaderConfig, NetError, Request, UploadClient, UploadConfig, UploadFile,
};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::new(LoaderConfig::default()).unwrap())
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&server.uri()).unwrap().join(p).unwrap()
}

fn painting() -> UploadFile {
    UploadFile {
        name: "sunset.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: Bytes::from_static(b"\x89PNG"),
    }
}

#[tokio::test]
async fn fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<h1>ChitraKalakar</h1>", "text/html"))
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(Request::get(url(&server, "/index.html")))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("text/html"));
    assert_eq!(response.text().unwrap(), "<h1>ChitraKalakar</h1>");
}

#[tokio::test]
async fn http_error_status_is_not_a_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(Request::get(url(&server, "/missing")))
        .await
        .unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn unreachable_host_is_a_fetch_error() {
    // Port 9 (discard) on localhost is not expected to accept connections.
    let target = Url::parse("http://127.0.0.1:9/").unwrap();
    let result = fetcher().fetch(Request::get(target)).await;
    assert!(matches!(result, Err(NetError::HttpError(_))));
}

#[tokio::test]
async fn upload_exchanges_signed_url_then_puts_bytes() {
    let server = MockServer::start().await;
    let upload_url = url(&server, "/bucket/artworks/sunset.png");

    Mock::given(method("POST"))
        .and(path("/api/upload-url"))
        .and(header("authorization", "Bearer token-123"))
        .and(body_json(serde_json::json!({
            "filename": "sunset.png",
            "content_type": "image/png",
            "folder": "artworks",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": upload_url.as_str(),
            "publicUrl": "https://cdn.example.com/artworks/sunset.png",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/bucket/artworks/sunset.png"))
        .and(header("content-type", "image/png"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = UploadClient::new(
        fetcher(),
        UploadConfig {
            backend_url: Url::parse(&server.uri()).unwrap(),
            access_token: Some("token-123".to_string()),
        },
    );

    let public = client.upload(&painting(), "artworks").await.unwrap();
    assert_eq!(public, "https://cdn.example.com/artworks/sunset.png");
}

#[tokio::test]
async fn upload_surfaces_backend_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload-url"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "detail": "Unsupported file type" })),
        )
        .mount(&server)
        .await;

    let client = UploadClient::new(
        fetcher(),
        UploadConfig {
            backend_url: Url::parse(&server.uri()).unwrap(),
            access_token: Some("token-123".to_string()),
        },
    );

    let err = client.upload(&painting(), "artworks").await.unwrap_err();
    match err {
        NetError::UploadFailed(detail) => assert_eq!(detail, "Unsupported file type"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn upload_requires_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = UploadClient::new(
        fetcher(),
        UploadConfig {
            backend_url: Url::parse(&server.uri()).unwrap(),
            access_token: None,
        },
    );

    let err = client.upload(&painting(), "artworks").await.unwrap_err();
    assert!(matches!(err, NetError::NotAuthenticated));
}

#[tokio::test]
async fn upload_fails_when_storage_rejects_put() {
    let server = MockServer::start().await;
    let upload_url = url(&server, "/bucket/a.png");

    Mock::given(method("POST"))
        .and(path("/api/upload-url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": upload_url.as_str(),
            "publicUrl": "https://cdn.example.com/a.png",
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = UploadClient::new(
        fetcher(),
        UploadConfig {
            backend_url: Url::parse(&server.uri()).unwrap(),
            access_token: Some("t".to_string()),
        },
    );

    let err = client.upload(&painting(), "artworks").await.unwrap_err();
    assert!(matches!(err, NetError::UploadFailed(_)));
}

#[tokio::test]
async fn upload_posts_under_backend_base_path() {
    let server = MockServer::start().await;
    let upload_url = url(&server, "/bucket/artworks/sunset.png");

    Mock::given(method("POST"))
        .and(path("/backend/api/upload-url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": upload_url.as_str(),
            "publicUrl": "https://cdn.example.com/artworks/sunset.png",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/bucket/artworks/sunset.png"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = UploadClient::new(
        fetcher(),
        UploadConfig {
            backend_url: Url::parse(&format!("{}/backend", server.uri())).unwrap(),
            access_token: Some("token-123".to_string()),
        },
    );

    let public = client.upload(&painting(), "artworks").await.unwrap();
    assert_eq!(public, "https://cdn.example.com/artworks/sunset.png");
}
