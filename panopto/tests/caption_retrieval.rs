use async_trait::async_trait;
use panopto_captions::oauth::{AuthorizationPrompt, CredentialRecord, MemoryTokenStore};
use panopto_captions::panopto_api::{CaptionStrategy, RetrievalContext, RetrievalOutcome};
use panopto_captions::{AuthErrorKind, OAuthManager, PanoptoClient, PanoptoConfig};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello world\n\n2\n00:00:02,000 --> 00:00:03,000\nGoodbye\n";

#[derive(Debug)]
struct Silent;

impl AuthorizationPrompt for Silent {
    fn present(&self, _authorize_url: &Url, _redirect_url: &str) {}
}

fn config(server: &MockServer) -> PanoptoConfig {
    let mut config = PanoptoConfig::new(Url::parse(&server.uri()).unwrap(), "client", "secret");
    config.redirect_port = 0;
    config.callback_timeout = Duration::from_millis(100);
    config.rate_limit_backoff = Duration::from_millis(10);
    config.open_browser = false;
    config
}

/// A client whose cached token is valid, so no token traffic happens.
fn client(server: &MockServer) -> PanoptoClient {
    let config = config(server);
    let record = CredentialRecord {
        access_token: Some("cached".to_string()),
        expires_at: Some(jiff::Timestamp::now().as_second() + 3600),
        ..CredentialRecord::new(config.client_id.clone(), config.server())
    };
    let oauth = OAuthManager::new(&config, Arc::new(MemoryTokenStore::with_record(record)))
        .unwrap()
        .with_prompt(Arc::new(Silent));
    PanoptoClient::new(config, oauth).unwrap()
}

async fn session_metadata(server: &MockServer, id: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/Panopto/api/v1/sessions/{id}")))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn no_legacy_login(server: &MockServer) {
    Mock::given(path("/Panopto/api/v1/auth/legacyLogin"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn rate_limited_endpoint_is_retried_once() {
    let server = MockServer::start().await;
    let captions = "/Panopto/api/v1/sessions/s1/captions";
    Mock::given(method("GET"))
        .and(path(captions))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(captions))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SRT))
        .expect(1)
        .mount(&server)
        .await;
    no_legacy_login(&server).await;

    let text = client(&server).captions("s1").await.unwrap();
    assert_eq!(text.as_deref(), Some("Hello world Goodbye "));
}

#[tokio::test]
async fn persistent_rate_limit_moves_on_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/sessions/s1/captions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/sessions/s1/transcript"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SRT))
        .expect(1)
        .mount(&server)
        .await;
    no_legacy_login(&server).await;

    let text = client(&server).captions("s1").await.unwrap();
    assert_eq!(text.as_deref(), Some("Hello world Goodbye "));
}

#[tokio::test]
async fn later_endpoints_are_tried_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/sessions/s1/transcript"))
        .respond_with(ResponseTemplate::new(200).set_body_string("   \n"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v2/sessions/s1/captions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("WEBVTT\n\n00:01.000 --> 00:02.000\nFrom v2\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v2/sessions/s1/transcript"))
        .respond_with(ResponseTemplate::new(200).set_body_string("never reached"))
        .expect(0)
        .mount(&server)
        .await;
    no_legacy_login(&server).await;

    let text = client(&server).captions("s1").await.unwrap();
    assert_eq!(text.as_deref(), Some("From v2 "));
}

#[tokio::test]
async fn method_not_allowed_switches_to_post_bodies() {
    let server = MockServer::start().await;
    let captions = "/Panopto/api/v1/sessions/s1/captions";
    Mock::given(method("GET"))
        .and(path(captions))
        .respond_with(ResponseTemplate::new(405))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(captions))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(captions))
        .and(body_json(json!({ "format": "srt" })))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SRT))
        .expect(1)
        .mount(&server)
        .await;
    no_legacy_login(&server).await;

    let text = client(&server).captions("s1").await.unwrap();
    assert_eq!(text.as_deref(), Some("Hello world Goodbye "));
}

#[tokio::test]
async fn legacy_download_uses_cookie_not_bearer() {
    let server = MockServer::start().await;
    let download = "/Panopto/Pages/Transcription/GenerateSRT.ashx";
    session_metadata(
        &server,
        "s2",
        json!({
            "Id": "s2",
            "Name": "Lecture 2",
            "Urls": {
                "CaptionDownloadUrl": format!("{}{download}?id=s2&language=0", server.uri()),
            },
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/auth/legacyLogin"))
        .and(header("authorization", "Bearer cached"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "ASP.NET_SessionId=x; path=/")
                .append_header("set-cookie", ".ASPXAUTH=abc123; path=/; HttpOnly"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(download))
        .and(header("cookie", ".ASPXAUTH=abc123"))
        .and(|req: &Request| !req.headers.contains_key("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SRT))
        .expect(1)
        .mount(&server)
        .await;

    let text = client(&server).captions("s2").await.unwrap();
    assert_eq!(text.as_deref(), Some("Hello world Goodbye "));
}

#[tokio::test]
async fn legacy_cookie_stays_with_configured_server() {
    let server = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    // cookies are not scoped by port, so the other server is reached by another name
    let elsewhere_uri = format!("http://localhost:{}", elsewhere.address().port());
    let download = "/Panopto/Pages/Transcription/GenerateSRT.ashx";
    session_metadata(
        &server,
        "away",
        json!({ "Urls": { "CaptionDownloadUrl": format!("{elsewhere_uri}{download}?id=away") } }),
    )
    .await;
    session_metadata(
        &server,
        "home",
        json!({ "Urls": { "CaptionDownloadUrl": format!("{}{download}?id=home", server.uri()) } }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/auth/legacyLogin"))
        .respond_with(
            ResponseTemplate::new(200).append_header("set-cookie", ".ASPXAUTH=secret-cookie"),
        )
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(path(download))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SRT))
        .expect(0)
        .mount(&elsewhere)
        .await;
    // every escalation step reaches the other host, none of them with the cookie
    Mock::given(path(download))
        .respond_with(ResponseTemplate::new(200))
        .expect(8)
        .mount(&elsewhere)
        .await;

    Mock::given(method("GET"))
        .and(path(download))
        .and(header("cookie", ".ASPXAUTH=secret-cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SRT))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(client.captions("away").await.unwrap(), None);
    assert_eq!(
        client.captions("home").await.unwrap().as_deref(),
        Some("Hello world Goodbye ")
    );
}

#[tokio::test]
async fn legacy_download_escalates_to_language_parameters() {
    let server = MockServer::start().await;
    let download = "/Panopto/Pages/Transcription/GenerateSRT.ashx";
    session_metadata(
        &server,
        "s3",
        json!({ "Urls": { "CaptionDownloadUrl": format!("{}{download}?id=s3", server.uri()) } }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/auth/legacyLogin"))
        .respond_with(ResponseTemplate::new(200).append_header("set-cookie", ".ASPXAUTH=tok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(download))
        .and(|req: &Request| req.url.query().is_some_and(|q| q.contains("language=English_USA")))
        .and(|req: &Request| {
            req.headers
                .get("referer")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|r| r.ends_with("/Panopto/Pages/Viewer.aspx?id=s3"))
        })
        .respond_with(ResponseTemplate::new(200).set_body_string("Finally some text\n"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path(download))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let text = client(&server).captions("s3").await.unwrap();
    assert_eq!(text.as_deref(), Some("Finally some text "));
}

#[tokio::test]
async fn embedded_transcript_needs_more_than_fifty_chars() {
    let server = MockServer::start().await;
    session_metadata(&server, "short", json!({ "Description": "short" })).await;
    let long = "An introduction to ownership, borrowing and lifetimes in Rust.";
    session_metadata(&server, "long", json!({ "Description": format!("  {long}  ") })).await;
    no_legacy_login(&server).await;

    let client = client(&server);
    assert_eq!(client.captions("short").await.unwrap(), None);
    assert_eq!(client.captions("long").await.unwrap().as_deref(), Some(long));
}

#[tokio::test]
async fn unnamed_metadata_text_is_not_captions() {
    let server = MockServer::start().await;
    let notes = "In today's lecture we will cover the borrow checker and why it rejects \
                 aliasing mutable references across await points.";
    session_metadata(&server, "notes", json!({ "Name": "Week 3", "FolderNotes": notes })).await;
    no_legacy_login(&server).await;

    assert_eq!(client(&server).captions("notes").await.unwrap(), None);
}

#[tokio::test]
async fn nothing_anywhere_is_absent_not_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Panopto/api/v1/sessions/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    no_legacy_login(&server).await;

    let client = client(&server);
    assert_eq!(client.captions("gone").await.unwrap(), None);
}

#[tokio::test]
async fn session_info_parses_metadata() {
    let server = MockServer::start().await;
    session_metadata(
        &server,
        "s4",
        json!({ "Id": "s4", "Name": "Lecture 4", "Duration": 60.0 }),
    )
    .await;

    let client = client(&server);
    let session = client.session_info("s4").await.unwrap().unwrap();
    assert_eq!(session.name.as_deref(), Some("Lecture 4"));
    assert!(client.session_info("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn authentication_failure_is_the_only_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Panopto/oauth2/connect/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "invalid_client" })))
        .expect(1)
        .mount(&server)
        .await;
    let config = config(&server);
    let oauth = OAuthManager::new(&config, Arc::new(MemoryTokenStore::new()))
        .unwrap()
        .with_prompt(Arc::new(Silent));
    let client = PanoptoClient::new(config, oauth).unwrap().with_unattended(true);

    let err = client.captions("s1").await.unwrap_err();
    assert_eq!(err.kind(), AuthErrorKind::Timeout);
}

#[derive(Debug)]
struct Fixed {
    outcome: RetrievalOutcome,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptionStrategy for Fixed {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn attempt(&self, ctx: &RetrievalContext<'_>) -> RetrievalOutcome {
        assert_eq!(ctx.bearer.secret(), "cached");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

#[tokio::test]
async fn custom_chain_stops_at_first_success() {
    let server = MockServer::start().await;
    let calls: Vec<_> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let outcomes = [
        RetrievalOutcome::TransientFailure("503".into()),
        RetrievalOutcome::EmptyResponse,
        RetrievalOutcome::Success("third".into()),
        RetrievalOutcome::Success("fourth".into()),
    ];
    let strategies = outcomes
        .into_iter()
        .zip(&calls)
        .map(|(outcome, calls)| {
            Box::new(Fixed {
                outcome,
                calls: calls.clone(),
            }) as Box<dyn CaptionStrategy>
        })
        .collect();

    let client = client(&server).with_strategies(strategies);
    assert_eq!(client.captions("any").await.unwrap().as_deref(), Some("third"));
    let counts: Vec<_> = calls.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, [1, 1, 1, 0]);
}
