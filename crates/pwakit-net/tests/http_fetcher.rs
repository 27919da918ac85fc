//! HttpFetcher against a local mock server.

use pwakit_net::{Fetcher, HttpFetcher, LoaderConfig, NetError, Request, ResponseSource};
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(LoaderConfig::default()).unwrap()
}

#[tokio::test]
async fn fetches_body_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/style.css"))
        .and(header_exists("accept-language"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("body { margin: 0 }", "text/css"),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/style.css", server.uri())).unwrap();
    let response = fetcher().fetch(&Request::get(url)).await.unwrap();

    assert!(response.ok());
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.text().unwrap(), "body { margin: 0 }");
    assert_eq!(response.content_type().unwrap().subtype().as_str(), "css");
}

#[tokio::test]
async fn non_success_status_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.css"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/missing.css", server.uri())).unwrap();
    let response = fetcher().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status.as_u16(), 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn posts_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contact"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/contact", server.uri())).unwrap();
    let response = fetcher()
        .fetch(&Request::post(url, "name=Ada".into()))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn rejects_non_http_schemes() {
    let url = Url::parse("chrome-extension://abcdef/content.js").unwrap();
    let err = fetcher().fetch(&Request::get(url)).await.unwrap_err();
    assert!(matches!(err, NetError::InvalidUrl(_)));
}

#[tokio::test]
async fn unreachable_host_is_reported() {
    // Nothing listens on port 9 (discard) on loopback in CI sandboxes.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let err = fetcher().fetch(&Request::navigate(url)).await.unwrap_err();
    assert!(matches!(
        err,
        NetError::Unreachable(_) | NetError::HttpError(_) | NetError::Timeout(_)
    ));
}
