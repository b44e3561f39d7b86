//! End-to-end behaviour of `Dispatcher::request` over a scripted transport.

mod common;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{dispatcher, settle_until, ScriptedTransport, TEST_KEY_HEX};
use lib_dispatch::core::clock::ManualClock;
use lib_dispatch::core::crypto::{decrypt_payload, parse_key};
use lib_dispatch::core::signature::{canonical_string, HEADER_NONCE, HEADER_SIGN, HEADER_TIMESTAMP};
use lib_dispatch::{
    install_global, global, AuthFailureHandler, DispatchError, Dispatcher, Payload, RequestConfig, RequestOptions,
    SessionGrant, Settings, TransportError,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const T0: u64 = 1_700_000_000_000;

fn settings() -> Settings {
    Settings {
        default_sign_secret: Some("boot-secret".into()),
        ..Settings::default()
    }
}

#[tokio::test]
async fn cached_get_hits_transport_once_within_ttl() {
    let transport = ScriptedTransport::new();
    let clock = ManualClock::new(T0);
    let d = dispatcher(transport.clone(), clock.clone(), settings());
    let goods = || RequestConfig::get("/goods/list").data(json!({"page": 1})).cached(Duration::from_secs(60));

    let first = d.request(goods()).await.unwrap();
    let second = d.request(goods()).await.unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.body, second.body);
    assert_eq!(transport.calls(), 1);

    clock.advance(Duration::from_secs(61));
    let third = d.request(goods()).await.unwrap();
    assert!(!third.from_cache);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn different_params_and_posts_are_not_served_from_cache() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    d.request(RequestConfig::get("/goods").data(json!({"page": 1})).cached(Duration::from_secs(60)))
        .await
        .unwrap();
    d.request(RequestConfig::get("/goods").data(json!({"page": 2})).cached(Duration::from_secs(60)))
        .await
        .unwrap();
    d.request(RequestConfig::post("/goods").cached(Duration::from_secs(60)))
        .await
        .unwrap();
    d.request(RequestConfig::post("/goods").cached(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn failed_responses_are_not_cached() {
    let transport = ScriptedTransport::new();
    transport.push_status(200, json!({"code": 1001, "msg": "sold out"}));
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let req = || RequestConfig::get("/stock").cached(Duration::from_secs(60));

    assert!(matches!(d.request(req()).await, Err(DispatchError::Business { code: 1001, .. })));
    let ok = d.request(req()).await.unwrap();
    assert!(!ok.from_cache);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn throttled_request_never_reaches_transport() {
    let transport = ScriptedTransport::new();
    let clock = ManualClock::new(T0);
    let d = dispatcher(transport.clone(), clock.clone(), settings());
    let add = || RequestConfig::post("/cart/add").throttle(Duration::from_secs(1));

    d.request(add()).await.unwrap();
    let err = d.request(add()).await.unwrap_err();
    assert!(err.is_throttled());
    assert_eq!(err.to_body().code, -1);
    assert_eq!(transport.calls(), 1);

    clock.advance(Duration::from_millis(1_000));
    d.request(add()).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff() {
    let transport = ScriptedTransport::new();
    transport.push(Err(TransportError::Connection("reset".into())));
    transport.push_status(502, json!("bad gateway"));
    transport.push_status(200, json!({"code": 0, "data": "ok"}));
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    let start = Instant::now();
    let res = d.request(RequestConfig::get("/flaky").max_retries(2)).await.unwrap();
    assert_eq!(res.body["data"], "ok");
    assert_eq!(transport.calls(), 3);
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn server_errors_exhaust_into_network_error() {
    let transport = ScriptedTransport::new();
    for _ in 0..3 {
        transport.push_status(503, Value::Null);
    }
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    let err = d.request(RequestConfig::get("/down").max_retries(2)).await.unwrap_err();
    assert!(matches!(err, DispatchError::Network { attempts: 3, .. }));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn client_errors_and_business_errors_are_not_retried() {
    let transport = ScriptedTransport::new();
    transport.push_status(404, json!({"error": "missing"}));
    transport.push_status(200, json!({"code": 2001, "message": "coupon expired"}));
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    let err = d.request(RequestConfig::get("/nope").max_retries(5)).await.unwrap_err();
    assert!(matches!(err, DispatchError::Http { status: 404, .. }));
    assert_eq!(transport.calls(), 1);

    let err = d.request(RequestConfig::post("/coupon").max_retries(5)).await.unwrap_err();
    assert_eq!(err.to_body().code, 2001);
    assert_eq!(err.to_body().message, "coupon expired");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_transport_times_out_per_attempt() {
    struct Stalled;
    #[async_trait::async_trait]
    impl lib_dispatch::TransportAdapter for Stalled {
        async fn execute(
            &self,
            _request: &lib_dispatch::TransportRequest,
        ) -> Result<lib_dispatch::TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    let d = Dispatcher::builder(Arc::new(Stalled)).build().unwrap();
    let err = d
        .request(RequestConfig::get("/slow").timeout(Duration::from_millis(200)).max_retries(1))
        .await
        .unwrap_err();
    match err {
        DispatchError::Network { attempts, message } => {
            assert_eq!(attempts, 2);
            assert!(message.contains("200"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn signed_request_carries_verifiable_headers() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let params = json!({"b": 2, "a": "x"});

    d.request(RequestConfig::get("/orders").data(params.clone()).signed(true))
        .await
        .unwrap();

    let sent = transport.last();
    assert_eq!(sent.headers[HEADER_TIMESTAMP], T0.to_string());
    let nonce = &sent.headers[HEADER_NONCE];
    assert_eq!(nonce.len(), 16);
    let canonical = canonical_string(Some(&params), "boot-secret", T0, nonce);
    assert_eq!(sent.headers[HEADER_SIGN], hex::encode(Sha256::digest(canonical.as_bytes())));
}

#[tokio::test]
async fn login_installs_token_and_session_secret() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    d.request(RequestConfig::get("/me")).await.unwrap();
    assert!(!transport.last().headers.contains_key("Authorization"));

    d.login(SessionGrant {
        token: "tok-42".into(),
        signing_secret: Some("session-secret".into()),
        encryption_key: None,
    })
    .await
    .unwrap();

    d.request(
        RequestConfig::get("/me")
            .header("Authorization", "Bearer stale")
            .header("X-Client", "mini")
            .signed(true),
    )
    .await
    .unwrap();
    let sent = transport.last();
    assert_eq!(sent.headers["Authorization"], "Bearer tok-42");
    assert_eq!(sent.headers["X-Client"], "mini");

    let canonical = canonical_string(None, "session-secret", T0, &sent.headers[HEADER_NONCE]);
    assert_eq!(sent.headers[HEADER_SIGN], hex::encode(Sha256::digest(canonical.as_bytes())));
}

#[tokio::test]
async fn encrypted_payload_is_sent_as_envelope() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let body = json!({"card": "4111", "cvv": "123"});

    let missing = d
        .request(RequestConfig::post("/pay").data(body.clone()).encrypted(true))
        .await
        .unwrap_err();
    assert!(matches!(missing, DispatchError::Crypto(_)));
    assert_eq!(transport.calls(), 0);

    d.login(SessionGrant {
        token: "tok".into(),
        signing_secret: None,
        encryption_key: Some(TEST_KEY_HEX.into()),
    })
    .await
    .unwrap();
    d.request(RequestConfig::post("/pay").data(body.clone()).encrypted(true))
        .await
        .unwrap();

    let Payload::Json(envelope) = transport.last().payload else {
        panic!("expected a JSON payload");
    };
    assert!(envelope.get("card").is_none());
    let key = parse_key(TEST_KEY_HEX).unwrap();
    assert_eq!(decrypt_payload(&key, &envelope).unwrap(), body);
}

#[derive(Default)]
struct RecordingHandler {
    statuses: Mutex<Vec<u16>>,
}

impl AuthFailureHandler for RecordingHandler {
    fn on_auth_failure(&self, status: u16) {
        self.statuses.lock().unwrap().push(status);
    }
}

#[tokio::test(start_paused = true)]
async fn auth_failure_clears_token_then_notifies_after_delay() {
    let transport = ScriptedTransport::new();
    transport.push_status(401, json!({"error": "expired"}));
    let handler = Arc::new(RecordingHandler::default());
    let d = Dispatcher::builder(transport.clone())
        .settings(settings())
        .auth_handler(handler.clone())
        .build()
        .unwrap();
    d.login(SessionGrant {
        token: "tok".into(),
        signing_secret: None,
        encryption_key: None,
    })
    .await
    .unwrap();

    let err = d.request(RequestConfig::get("/profile").max_retries(3)).await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(transport.calls(), 1);
    assert_eq!(d.token().await, None);
    assert!(handler.statuses.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(1_400)).await;
    assert!(handler.statuses.lock().unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*handler.statuses.lock().unwrap(), vec![401]);
}

#[tokio::test]
async fn business_auth_code_is_an_auth_failure() {
    let transport = ScriptedTransport::new();
    transport.push_status(200, json!({"code": 403, "msg": "forbidden"}));
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    let err = d.request(RequestConfig::get("/admin")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Auth { status: 403 }));
}

#[tokio::test]
async fn cancelling_a_running_request_frees_its_slot() {
    let transport = ScriptedTransport::gated();
    let d = Arc::new(dispatcher(
        transport.clone(),
        ManualClock::new(T0),
        Settings {
            max_concurrent: Some(1),
            ..settings()
        },
    ));

    let token = CancellationToken::new();
    let running = tokio::spawn({
        let d = Arc::clone(&d);
        let token = token.clone();
        async move { d.request_with_cancel(RequestConfig::get("/slow"), token).await }
    });
    settle_until(|| transport.calls() == 1).await;
    assert_eq!(d.queue().active_count(), 1);

    token.cancel();
    assert!(matches!(running.await.unwrap(), Err(DispatchError::Cancelled)));
    assert_eq!(d.queue().active_count(), 0);

    transport.open(1);
    d.request(RequestConfig::get("/next")).await.unwrap();
    assert_eq!(transport.started_urls(), vec!["/slow", "/next"]);
}

#[tokio::test]
async fn cancelling_a_queued_request_skips_it() {
    let transport = ScriptedTransport::gated();
    let d = Arc::new(dispatcher(
        transport.clone(),
        ManualClock::new(T0),
        Settings {
            max_concurrent: Some(1),
            ..settings()
        },
    ));

    let first = tokio::spawn({
        let d = Arc::clone(&d);
        async move { d.request(RequestConfig::get("/first")).await }
    });
    settle_until(|| transport.calls() == 1).await;

    let token = CancellationToken::new();
    let queued = tokio::spawn({
        let d = Arc::clone(&d);
        let token = token.clone();
        async move { d.request_with_cancel(RequestConfig::get("/queued"), token).await }
    });
    settle_until(|| d.queue().waiting_len() == 1).await;

    token.cancel();
    assert!(matches!(queued.await.unwrap(), Err(DispatchError::Cancelled)));

    transport.open(1);
    first.await.unwrap().unwrap();
    assert_eq!(d.queue().active_count(), 0);
    assert_eq!(transport.started_urls(), vec!["/first"]);
}

#[tokio::test]
async fn upload_sends_multipart_and_bypasses_cache() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"fake image bytes").unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("album".to_string(), "avatars".to_string());
    let opts = RequestOptions {
        sign: true,
        ..Default::default()
    };

    for _ in 0..2 {
        let res = d
            .upload("/upload", file.path(), "avatar", fields.clone(), opts.clone())
            .await
            .unwrap();
        assert!(!res.from_cache);
    }
    assert_eq!(transport.calls(), 2);

    let sent = transport.last();
    assert_eq!(sent.method, http::Method::POST);
    assert!(sent.headers.contains_key(HEADER_SIGN));
    match sent.payload {
        Payload::Upload(part) => {
            assert_eq!(part.field_name, "avatar");
            assert_eq!(part.file_path, file.path());
            assert_eq!(part.fields["album"], "avatars");
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn upload_of_missing_file_is_an_io_error() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    let err = d
        .upload(
            "/upload",
            "/definitely/not/here.png",
            "file",
            BTreeMap::new(),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Io(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn logout_clears_session_and_cache() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    d.login(SessionGrant {
        token: "tok".into(),
        signing_secret: Some("s".into()),
        encryption_key: Some(TEST_KEY_HEX.into()),
    })
    .await
    .unwrap();
    let cached = || RequestConfig::get("/home").cached(Duration::from_secs(60));
    d.request(cached()).await.unwrap();

    d.logout().await;
    assert_eq!(d.token().await, None);
    assert_eq!(d.credentials().signing_secret(), None);
    assert!(d.credentials().encryption_key().is_none());

    let res = d.request(cached()).await.unwrap();
    assert!(!res.from_cache);
    assert!(!transport.last().headers.contains_key("Authorization"));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn reset_forgets_throttle_windows() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let add = || RequestConfig::post("/cart/add").throttle(Duration::from_secs(5));

    d.request(add()).await.unwrap();
    assert!(d.request(add()).await.unwrap_err().is_throttled());
    d.reset().await;
    d.request(add()).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn convenience_wrappers_set_method_and_data() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());

    d.put("/cart/1", Some(json!({"qty": 2})), RequestOptions::default())
        .await
        .unwrap();
    let sent = transport.last();
    assert_eq!(sent.method, http::Method::PUT);
    assert_eq!(sent.payload, Payload::Json(json!({"qty": 2})));

    d.delete("/cart/1", None, RequestOptions::default()).await.unwrap();
    let sent = transport.last();
    assert_eq!(sent.method, http::Method::DELETE);
    assert_eq!(sent.payload, Payload::Empty);
}

#[tokio::test]
async fn global_dispatcher_is_installed_once() {
    let first = install_global(Dispatcher::builder(ScriptedTransport::new()).build().unwrap());
    let second = install_global(Dispatcher::builder(ScriptedTransport::new()).build().unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &global().unwrap()));
}

#[tokio::test]
async fn signature_covers_the_encrypted_envelope() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    d.login(SessionGrant {
        token: "tok".into(),
        signing_secret: Some("session-secret".into()),
        encryption_key: Some(TEST_KEY_HEX.into()),
    })
    .await
    .unwrap();

    let body = json!({"address": "1 Main St", "phone": "555"});
    d.request(RequestConfig::post("/address").data(body.clone()).encrypted(true).signed(true))
        .await
        .unwrap();

    let sent = transport.last();
    let Payload::Json(envelope) = &sent.payload else {
        panic!("expected a JSON payload");
    };
    let canonical = canonical_string(Some(envelope), "session-secret", T0, &sent.headers[HEADER_NONCE]);
    assert_eq!(sent.headers[HEADER_SIGN], hex::encode(Sha256::digest(canonical.as_bytes())));

    let plain = canonical_string(Some(&body), "session-secret", T0, &sent.headers[HEADER_NONCE]);
    assert_ne!(sent.headers[HEADER_SIGN], hex::encode(Sha256::digest(plain.as_bytes())));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_nothing_in_the_cache() {
    let transport = ScriptedTransport::new();
    for _ in 0..3 {
        transport.push_status(503, Value::Null);
    }
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let feed = || {
        RequestConfig::get("/feed")
            .max_retries(2)
            .cached(Duration::from_secs(60))
    };

    let err = d.request(feed()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Network { attempts: 3, .. }));

    let ok = d.request(feed()).await.unwrap();
    assert!(!ok.from_cache);
    assert_eq!(ok.body["data"], "/feed");
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn missing_upload_file_does_not_consume_throttle_window() {
    let transport = ScriptedTransport::new();
    let d = dispatcher(transport.clone(), ManualClock::new(T0), settings());
    let opts = RequestOptions {
        throttle: Duration::from_secs(5),
        ..Default::default()
    };

    let err = d
        .upload("/upload", "/definitely/not/here.png", "file", BTreeMap::new(), opts.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Io(_)));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"bytes").unwrap();
    d.upload("/upload", file.path(), "file", BTreeMap::new(), opts.clone())
        .await
        .unwrap();
    assert_eq!(transport.calls(), 1);

    let again = d
        .upload("/upload", file.path(), "file", BTreeMap::new(), opts)
        .await
        .unwrap_err();
    assert!(again.is_throttled());
}
