//! HttpFetcher against a local mock origin.

use std::time::Duration;

use http::{HeaderName, HeaderValue, StatusCode};
use offline_net::{Fetcher, FetcherConfig, HttpFetcher, NetError, Request, Url};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(FetcherConfig::default()).unwrap()
}

fn request(server: &MockServer, route: &str) -> Request {
    Request::get(Url::parse(&server.uri()).unwrap().join(route).unwrap())
}

#[tokio::test]
async fn test_fetch_returns_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/style.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("body { margin: 0 }"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = fetcher().fetch(request(&server, "/style.css")).await.unwrap();

    assert!(response.ok());
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.text().unwrap(), "body { margin: 0 }");
}

#[tokio::test]
async fn test_fetch_passes_non_success_status_through() {
    let server = MockServer::start().await;
    Mock::given(path("/ICON_192X192.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(request(&server, "/ICON_192X192.png"))
        .await
        .unwrap();

    assert!(!response.ok());
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fetch_sends_request_headers() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .and(header("x-distance-unit", "km"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let req = request(&server, "/").header(
        HeaderName::from_static("x-distance-unit"),
        HeaderValue::from_static("km"),
    );
    let response = fetcher().fetch(req).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let req = request(&server, "/slow").timeout(Duration::from_millis(50));
    let result = fetcher().fetch(req).await;

    assert!(matches!(result, Err(NetError::Timeout(_))));
}

#[tokio::test]
async fn test_fetch_connection_refused_is_error() {
    let server = MockServer::start().await;
    let req = request(&server, "/");
    drop(server);

    let result = fetcher().fetch(req).await;

    assert!(matches!(result, Err(NetError::HttpError(_))));
}
