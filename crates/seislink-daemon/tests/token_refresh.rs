#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Token lifecycle against a mock hub.

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{REFRESH_PATH, mint, save_tokens, save_valid_tokens, store, token_manager};
use seislink_daemon::Error;
use seislink_daemon::auth::{RefreshOutcome, TokenState};

#[tokio::test]
async fn valid_access_token_is_returned_without_hub_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let access = save_valid_tokens(&store);
    let tokens = token_manager(store, common::hub(&server.uri()));

    assert_eq!(tokens.ensure_valid_access_token().await.unwrap(), access);
}

#[tokio::test]
async fn expiring_access_token_is_refreshed_and_refresh_token_kept() {
    let server = MockServer::start().await;
    let refresh = mint("refresh", 30 * 86_400);
    let fresh = mint("access-new", 3600);
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refreshToken": refresh })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": fresh })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    // Inside the five minute leeway.
    save_tokens(&store, Some(mint("access-old", 60)), Some(refresh.clone()));
    let tokens = token_manager(store.clone(), common::hub(&server.uri()));

    assert_eq!(tokens.ensure_valid_access_token().await.unwrap(), fresh);

    let record = store.load_tokens().unwrap();
    assert_eq!(record.access_token.as_deref(), Some(fresh.as_str()));
    assert_eq!(record.refresh_token.as_deref(), Some(refresh.as_str()));
    assert!(record.access_token_expires_at.is_some());
    assert!(record.refresh_token_expires_at.is_some());
}

#[tokio::test]
async fn rotated_refresh_token_and_device_info_are_persisted() {
    let server = MockServer::start().await;
    let fresh = mint("access-new", 3600);
    let rotated = mint("refresh-new", 60 * 86_400);
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "message": "ok",
            "payload": {
                "accessToken": fresh,
                "refreshToken": rotated,
                "deviceInfo": { "network": "AM", "station": "R3B2D", "streamId": "AM_R3B2D_.*/MSEED" }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    save_tokens(&store, None, Some(mint("refresh", 30 * 86_400)));
    let tokens = token_manager(store.clone(), common::hub(&server.uri()));

    assert_eq!(tokens.refresh_auth_token().await.unwrap(), fresh);
    assert_eq!(
        store.load_tokens().unwrap().refresh_token.as_deref(),
        Some(rotated.as_str())
    );
    assert_eq!(
        store.load_device_info().unwrap().stream_id.as_deref(),
        Some("AM_R3B2D_.*/MSEED")
    );
}

async fn assert_relink_without_hub_call(setup: impl FnOnce(&seislink_core::FileStore)) -> Error {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    setup(&store);
    let tokens = token_manager(store, common::hub(&server.uri()));

    let err = tokens.ensure_valid_access_token().await.unwrap_err();
    assert!(err.is_relink_required(), "expected relink, got {err:?}");
    err
}

#[tokio::test]
async fn missing_refresh_token_requires_relink() {
    let err = assert_relink_without_hub_call(|store| save_tokens(store, None, None)).await;
    let Error::RelinkRequired { refresh_status, .. } = err else {
        panic!("unexpected error");
    };
    assert_eq!(refresh_status.unwrap().state, TokenState::Missing);
}

#[tokio::test]
async fn expired_refresh_token_requires_relink() {
    let err = assert_relink_without_hub_call(|store| {
        save_tokens(store, Some(mint("access", -60)), Some(mint("refresh", -10)));
    })
    .await;
    let Error::RelinkRequired { refresh_status, .. } = err else {
        panic!("unexpected error");
    };
    assert_eq!(refresh_status.unwrap().state, TokenState::Expired);
}

#[tokio::test]
async fn undecodable_refresh_token_requires_relink() {
    assert_relink_without_hub_call(|store| {
        save_tokens(store, None, Some("not-a-jwt".into()));
    })
    .await;
}

#[tokio::test]
async fn corrupted_token_record_requires_relink() {
    let err = assert_relink_without_hub_call(|store| {
        std::fs::write(store.dir().join("token.json"), "{ not json").unwrap();
    })
    .await;
    let Error::RelinkRequired { refresh_status, .. } = err else {
        panic!("unexpected error");
    };
    assert_eq!(refresh_status.unwrap().state, TokenState::Corrupted);
}

#[tokio::test]
async fn hub_rejection_of_refresh_token_requires_relink() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "refresh token revoked" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    save_tokens(&store, None, Some(mint("refresh", 30 * 86_400)));
    let tokens = token_manager(store, common::hub(&server.uri()));

    let err = tokens.refresh_auth_token().await.unwrap_err();
    assert!(err.is_relink_required());
    assert!(err.to_string().contains("refresh token revoked"));
}

#[tokio::test]
async fn hub_server_error_is_not_relink() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    save_tokens(&store, None, Some(mint("refresh", 30 * 86_400)));
    let tokens = token_manager(store, common::hub(&server.uri()));

    let err = tokens.refresh_auth_token().await.unwrap_err();
    assert!(
        matches!(err, Error::RemoteRejected { status: 503, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    let fresh = mint("access-new", 3600);
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": fresh }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    save_tokens(
        &store,
        Some(mint("access-old", -5)),
        Some(mint("refresh", 30 * 86_400)),
    );
    let tokens = token_manager(store, common::hub(&server.uri()));

    let (a, b, c) = tokio::join!(
        tokens.ensure_valid_access_token(),
        tokens.ensure_valid_access_token(),
        tokens.refresh_if_expiring_soon(),
    );
    assert_eq!(a.unwrap(), fresh);
    assert_eq!(b.unwrap(), fresh);
    assert_eq!(c, RefreshOutcome::Refreshed);
}

#[tokio::test]
async fn proactive_check_only_refreshes_inside_leeway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": mint("access-new", 3600) })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let refresh = mint("refresh", 30 * 86_400);
    save_tokens(&store, Some(mint("access", 3600)), Some(refresh.clone()));
    let tokens = token_manager(store.clone(), common::hub(&server.uri()));
    assert_eq!(
        tokens.refresh_if_expiring_soon().await,
        RefreshOutcome::NotNeeded
    );

    // Eight minutes left: fine on demand, due for the ten minute proactive window.
    save_tokens(&store, Some(mint("access", 480)), Some(refresh));
    assert_eq!(
        tokens.refresh_if_expiring_soon().await,
        RefreshOutcome::Refreshed
    );
}

#[tokio::test]
async fn proactive_check_reports_relink_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let tokens = token_manager(store, common::offline_hub());
    assert!(matches!(
        tokens.refresh_if_expiring_soon().await,
        RefreshOutcome::RelinkRequired(_)
    ));
}

#[tokio::test]
async fn token_status_reports_both_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    save_tokens(&store, Some(mint("access", 120)), None);
    let tokens = token_manager(store, common::offline_hub());

    let report = tokens.token_status();
    assert_eq!(report.access.state, TokenState::Valid);
    assert_eq!(report.access.expiring_soon, Some(true));
    assert!(report.access.present);
    assert_eq!(report.refresh.state, TokenState::Missing);
    assert!(!report.refresh.present);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["tokenStatus"]["state"], "valid");
    assert_eq!(value["refreshTokenStatus"]["state"], "missing");
}
