//! Black-box coverage of the pool's documented scenarios and invariants,
//! driven entirely through the public API plus the in-crate mock backend.

use bytes::Bytes;
use http::{HeaderValue, Method};
use httpcore::net::mock::{MockBackend, MockStream};
use httpcore::{ConnectionPool, PoolConfig, ProxyConfig, ProxyMode, Request};

fn pool_with(backend: MockBackend) -> ConnectionPool {
    ConnectionPool::new(PoolConfig::new().with_backend(std::sync::Arc::new(backend)))
}

fn get(url: &str) -> Request {
    Request::new(Method::GET, httpcore::request::Url::parse(url).unwrap())
}

/// S2: a response with `Connection: close` leaves the pool empty once the
/// body is closed.
#[tokio::test]
async fn connection_close_empties_the_pool() {
    let backend = MockBackend::new();
    backend.push_with(|| {
        MockStream::with_chunks(vec![Bytes::from_static(
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 13\r\n\r\nHello, world!",
        )])
    });
    let pool = pool_with(backend);

    let mut request = get("https://example.com/");
    request
        .headers
        .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
    let mut response = pool.handle_request(&mut request).await.unwrap();
    assert_eq!(response.status, 200);
    let body = response.read().await.unwrap();
    assert_eq!(&body[..], b"Hello, world!");
    response.body.close().await;

    tokio::task::yield_now().await;
    assert!(pool.is_empty());
}

/// S4: a reply that isn't valid HTTP surfaces an error, and leaves no
/// connection behind in the pool.
#[tokio::test]
async fn invalid_response_surfaces_an_error_and_is_not_pooled() {
    let backend = MockBackend::new();
    backend.push(&b"Wait, this isn't valid HTTP!"[..]);
    let pool = pool_with(backend);

    let err = pool.request(get("http://example.com/")).await.unwrap_err();
    assert!(err.is_remote_protocol());
    assert!(pool.is_empty());
}

/// S5: a forward proxy anchors its pooled connection at the proxy origin,
/// and is reused for any `http://` target regardless of host.
#[tokio::test]
async fn forward_proxy_is_anchored_at_the_proxy_and_reused_across_hosts() {
    let backend = MockBackend::new();
    backend.push_with(|| {
        MockStream::with_chunks(vec![Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")])
    });
    let pool = ConnectionPool::new(
        PoolConfig::new()
            .with_backend(std::sync::Arc::new(backend))
            .with_proxy(ProxyConfig::new(httpcore::request::Url::parse("http://localhost:8080/").unwrap())),
    );

    let mut r1 = get("http://example.com/");
    let mut resp1 = pool.handle_request(&mut r1).await.unwrap();
    resp1.body.close().await;
    tokio::task::yield_now().await;

    let infos = pool.connections();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].origin.host, b"localhost");
    assert_eq!(infos[0].origin.port, 8080);

    // A second request to a *different* http host still reuses the same
    // proxy-anchored connection: no second backend connect() is scripted,
    // so this would fail with ConnectError if a fresh connection were made.
    let mut r2 = get("http://other.example/");
    let mut resp2 = pool.handle_request(&mut r2).await.unwrap();
    resp2.body.close().await;
    tokio::task::yield_now().await;

    assert_eq!(pool.len(), 1);
}

/// S6: a tunnel proxy anchors its pooled connection at the remote origin
/// and is reused for further requests to that exact origin.
#[tokio::test]
async fn tunnel_proxy_is_anchored_at_the_remote_origin_and_reused() {
    let backend = MockBackend::new();
    backend.push_with(|| {
        MockStream::with_chunks(vec![
            Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\n"),
            Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
            Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        ])
    });
    let pool = ConnectionPool::new(
        PoolConfig::new()
            .with_backend(std::sync::Arc::new(backend))
            .with_proxy(ProxyConfig::new(httpcore::request::Url::parse("http://localhost:8080/").unwrap())),
    );

    let mut r1 = get("https://example.com/");
    let mut resp1 = pool.handle_request(&mut r1).await.unwrap();
    resp1.body.close().await;
    tokio::task::yield_now().await;

    let infos = pool.connections();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].origin.host, b"example.com");
    assert_eq!(infos[0].origin.port, 443);

    let mut r2 = get("https://example.com/");
    let mut resp2 = pool.handle_request(&mut r2).await.unwrap();
    resp2.body.close().await;
    tokio::task::yield_now().await;

    // Still exactly one pooled connection: the proxy CONNECT handshake was
    // only scripted once, so reuse is the only way the second request could
    // have succeeded at all.
    assert_eq!(pool.len(), 1);
}

/// S7 / invariant 1: with `max_connections = 1`, five concurrent requests to
/// five distinct origins never see more than one pooled connection at a time,
/// and all five eventually complete.
#[tokio::test]
async fn concurrent_waiters_stay_within_the_connection_cap() {
    let backend = MockBackend::new();
    for _ in 0..5 {
        backend.push_with(|| {
            MockStream::with_chunks(vec![Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")])
        });
    }
    let pool = ConnectionPool::new(
        PoolConfig::new()
            .with_backend(std::sync::Arc::new(backend))
            .with_max_connections(1),
    );

    let hosts = ["a.example", "b.example", "c.example", "d.example", "e.example"];
    let mut tasks = Vec::new();
    for host in hosts {
        let pool = pool.clone();
        let url = format!("https://{host}/");
        tasks.push(tokio::spawn(async move {
            let (status, _, _) = pool.request(get(&url)).await.unwrap();
            assert_eq!(status, 200);
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert!(pool.len() <= 1);
}

/// Invariant 5: reading a response body to completion and then reading it
/// again is an error rather than silently returning empty bytes again.
#[tokio::test]
async fn reading_an_exhausted_body_again_is_an_error() {
    let backend = MockBackend::new();
    backend.push_with(|| {
        MockStream::with_chunks(vec![Bytes::from_static(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello",
        )])
    });
    let pool = pool_with(backend);

    let mut request = get("https://example.com/");
    let mut response = pool.handle_request(&mut request).await.unwrap();
    let first = response.read().await.unwrap();
    assert_eq!(&first[..], b"hello");

    let second = response.read().await;
    assert!(second.is_err());

    response.body.close().await;
}

/// Invariant 6: origin equality is exact — `https://example.com:443` and
/// `http://example.com:80` never share a connection, even though they name
/// "the same" host.
#[tokio::test]
async fn distinct_schemes_never_share_a_connection() {
    let backend = MockBackend::new();
    for _ in 0..2 {
        backend.push_with(|| {
            MockStream::with_chunks(vec![Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")])
        });
    }
    let pool = pool_with(backend);

    let mut https_req = get("https://example.com/");
    let mut https_resp = pool.handle_request(&mut https_req).await.unwrap();
    https_resp.body.close().await;

    let mut http_req = get("http://example.com/");
    let mut http_resp = pool.handle_request(&mut http_req).await.unwrap();
    http_resp.body.close().await;

    tokio::task::yield_now().await;
    assert_eq!(pool.len(), 2);
}
