//! Integration tests for the fetch verbs against mock HTTP servers.

use std::time::{Duration, Instant};

use encoding_rs::{SHIFT_JIS, UTF_8, WINDOWS_1252};
use pagefetch_core::{DetectionMode, EncodingSource, FetchError, Session};
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;

use support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};

/// Mounts a GET endpoint answering with raw bytes and a content type.
async fn mount_page(server: &MockServer, route: &str, body: &[u8], content_type: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_decodes_with_header_charset() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, "/utf8", "Grüße, 世界".as_bytes(), "text/html; charset=UTF-8").await;

    let mut session = Session::new();
    let page = session
        .get(&format!("{}/utf8", server.uri()))
        .await
        .expect("fetch should succeed");

    assert_eq!(page.text, "Grüße, 世界");
    assert_eq!(page.status.as_u16(), 200);
    assert_eq!(page.encoding.encoding, UTF_8);
    assert_eq!(page.encoding.source, EncodingSource::Header);
    assert!(!page.truncated);
    assert!(page.redirect_location.is_none());
    assert!(session.last_error().is_empty());
    assert_eq!(session.last_encoding(), Some(page.encoding));
}

#[tokio::test]
async fn test_get_meta_tag_mode_uses_meta_charset() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let html = "<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=Shift_JIS\"></head><body>こんにちは</body></html>";
    let (encoded, _, _) = SHIFT_JIS.encode(html);
    mount_page(&server, "/sjis", &encoded, "text/html").await;

    let mut session = Session::new();
    session.set_detection_mode(DetectionMode::MetaTag);
    session.set_buffer_size(64);
    let page = session
        .get(&format!("{}/sjis", server.uri()))
        .await
        .expect("fetch should succeed");

    assert_eq!(page.text, html);
    assert_eq!(page.encoding.encoding, SHIFT_JIS);
    assert_eq!(page.encoding.source, EncodingSource::MetaTag);
}

#[tokio::test]
async fn test_get_auto_mode_detects_unlabeled_utf8() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let text = "Grüße aus München, ça va? 日本語のテキスト";
    mount_page(&server, "/plain", text.as_bytes(), "text/html").await;

    let mut session = Session::new();
    let page = session
        .get(&format!("{}/plain", server.uri()))
        .await
        .expect("fetch should succeed");

    assert_eq!(page.text, text);
    assert_eq!(page.encoding.encoding, UTF_8);
    assert_eq!(page.encoding.source, EncodingSource::Detector);
}

#[tokio::test]
async fn test_force_statistical_overrides_wrong_header() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let text = "Grüße aus München";
    mount_page(&server, "/mislabeled", text.as_bytes(), "text/html; charset=iso-8859-1").await;
    let url = format!("{}/mislabeled", server.uri());

    let mut session = Session::new();
    let trusting = session.get(&url).await.expect("fetch should succeed");
    assert_eq!(trusting.encoding.encoding, WINDOWS_1252);
    assert_ne!(trusting.text, text, "header charset is wrong for this body");

    session.set_detection_mode(DetectionMode::ForceStatistical);
    let forced = session.get(&url).await.expect("fetch should succeed");
    assert_eq!(forced.text, text);
    assert_eq!(forced.encoding.encoding, UTF_8);
    assert_eq!(forced.encoding.source, EncodingSource::Detector);
}

#[tokio::test]
async fn test_get_truncates_at_max_response_size() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, "/big", &[b'a'; 5000], "text/plain; charset=utf-8").await;

    let mut session = Session::new();
    session.set_max_response_size(Some(1024));
    session.set_buffer_size(300);
    let page = session
        .get(&format!("{}/big", server.uri()))
        .await
        .expect("truncation is not an error");

    assert_eq!(page.text.len(), 1024);
    assert_eq!(page.bytes_read, 1024);
    assert!(page.truncated);
    assert!(session.last_error().is_empty());
}

#[tokio::test]
async fn test_get_error_status_still_decodes_body() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_raw("not here", "text/plain"))
        .mount(&server)
        .await;

    let mut session = Session::new();
    let page = session
        .get(&format!("{}/missing", server.uri()))
        .await
        .expect("HTTP errors are not failures");

    assert_eq!(page.status.as_u16(), 404);
    assert_eq!(page.text, "not here");
    assert_eq!(session.last_status().map(|s| s.as_u16()), Some(404));
}

#[tokio::test]
async fn test_get_empty_body_fails() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut session = Session::new();
    let result = session.get(&format!("{}/empty", server.uri())).await;

    assert!(
        matches!(result, Err(FetchError::EmptyBody { status: 200, .. })),
        "Expected EmptyBody, got {result:?}"
    );
    assert!(session.last_error().contains("empty response body"));
}

#[tokio::test]
async fn test_get_empty_url_fails_before_network() {
    let mut session = Session::new();
    let result = session.get("  ").await;

    assert!(matches!(result, Err(FetchError::Configuration { .. })));
    assert!(session.last_error().contains("URL is empty"));
    assert!(session.last_status().is_none());
}

#[tokio::test]
async fn test_get_or_default_swallows_error() {
    let mut session = Session::new();
    assert_eq!(session.get_or_default("").await, "");
    assert!(!session.last_error().is_empty());
}

#[tokio::test]
async fn test_post_body_encoded_with_session_encoding() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let (expected, _, _) = SHIFT_JIS.encode("q=日本");
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_bytes(expected.into_owned()))
        .respond_with(ResponseTemplate::new(200).set_body_raw("found", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = Session::new();
    assert!(session.set_encoding("Shift_JIS"));
    let text = session
        .post_text(&format!("{}/search", server.uri()), "q=日本")
        .await
        .expect("post should match the encoded body");

    assert_eq!(text, "found");
}

#[tokio::test]
async fn test_cookies_persist_until_cleared() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=abc123; Path=/")
                .set_body_raw("welcome", "text/plain"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "sid=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("member", "text/plain"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("anonymous", "text/plain"))
        .mount(&server)
        .await;

    let mut session = Session::new();
    let base = server.uri();
    session.get(&format!("{base}/login")).await.expect("login");

    let page = session.get(&format!("{base}/account")).await.expect("account");
    assert_eq!(page.text, "member");

    let old_jar = session.cookie_jar();
    session.clear_cookies();
    let page = session.get(&format!("{base}/account")).await.expect("account");
    assert_eq!(page.text, "anonymous");
    assert!(
        reqwest::cookie::CookieStore::cookies(old_jar.as_ref(), &base.parse().expect("url"))
            .is_some(),
        "old jar handle keeps its cookies"
    );
}

#[tokio::test]
async fn test_auto_redirect_records_final_location() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", format!("{base}/new")))
        .mount(&server)
        .await;
    mount_page(&server, "/new", b"moved here", "text/plain").await;

    let mut session = Session::new();
    let page = session.get(&format!("{base}/old")).await.expect("redirect followed");

    assert_eq!(page.text, "moved here");
    assert_eq!(page.status.as_u16(), 200);
    assert_eq!(page.redirect_location.as_deref(), Some(format!("{base}/new").as_str()));
    assert_eq!(session.last_redirect_location(), Some(format!("{base}/new").as_str()));
}

#[tokio::test]
async fn test_no_auto_redirect_returns_redirect_response() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/next")
                .set_body_raw("see next", "text/plain"),
        )
        .mount(&server)
        .await;

    let mut session = Session::new();
    session.set_auto_redirect(false);
    let page = session.get(&format!("{base}/start")).await.expect("302 is not a failure");

    assert_eq!(page.status.as_u16(), 302);
    assert_eq!(page.text, "see next");
    assert_eq!(
        page.redirect_location.as_deref(),
        Some(format!("{base}/start/next").as_str())
    );
}

#[tokio::test]
async fn test_get_bytes_returns_raw_body() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let raw = [0xffu8, 0x00, 0x81, 0x40];
    mount_page(&server, "/raw", &raw, "application/octet-stream").await;

    let mut session = Session::new();
    let bytes = session
        .get_bytes(&format!("{}/raw", server.uri()))
        .await
        .expect("bytes fetch");
    assert_eq!(bytes, raw);
}

#[tokio::test]
async fn test_open_then_read_text() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, "/later", "späť".as_bytes(), "text/plain; charset=utf-8").await;

    let mut session = Session::new();
    let response = session
        .open(Method::GET, &format!("{}/later", server.uri()), None)
        .await
        .expect("open");
    assert_eq!(session.last_status().map(|s| s.as_u16()), Some(200));

    let page = session.read_text(response).await.expect("read_text");
    assert_eq!(page.text, "späť");
}

#[tokio::test]
async fn test_open_then_read_text_reports_followed_redirect() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", format!("{base}/new")))
        .mount(&server)
        .await;
    mount_page(&server, "/new", b"landed", "text/plain").await;

    let mut session = Session::new();
    let response = session
        .open(Method::GET, &format!("{base}/old"), None)
        .await
        .expect("open");
    let page = session.read_text(response).await.expect("read_text");

    assert_eq!(page.text, "landed");
    assert_eq!(page.url, format!("{base}/new"));
    assert_eq!(page.redirect_location.as_deref(), Some(format!("{base}/new").as_str()));
    assert_eq!(session.last_redirect_location(), Some(format!("{base}/new").as_str()));
}

#[tokio::test]
async fn test_operation_timeout_on_stalled_body() {
    if should_skip_socket_bound_test() {
        return;
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;
        let _ = socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\npartial",
            )
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut session = Session::new();
    session.set_operation_timeout(Some(Duration::from_millis(50)));
    let started = Instant::now();
    let result = session.get(&format!("http://{addr}/stall")).await;

    assert!(
        matches!(result, Err(FetchError::Timeout { .. })),
        "Expected Timeout, got {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(session.last_error().contains("timeout"));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let mut session = Session::new();
    let result = session.get("http://127.0.0.1:1/").await;

    assert!(
        matches!(result, Err(FetchError::Network { .. })),
        "Expected Network, got {result:?}"
    );
    assert!(session.last_error().contains("network error"));
}
