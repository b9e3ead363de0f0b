use crate::support::{MockRest, RecordingNavigator};
use burrow_core::api::{ApiClient, ApiError, ApiRequest};
use burrow_core::session::SessionStore;
use burrow_core::store::ProfileStore;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn login_body() -> serde_json::Value {
    json!({
        "token": "t1",
        "id": "1",
        "username": "a",
        "email": "a@example.com",
        "roles": ["ROLE_USER"],
        "type": "Bearer",
        "message": "Logged in successfully!"
    })
}

#[test]
fn login_success_authenticates_and_persists() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let profile = ProfileStore::new(temp_dir.path().to_path_buf());
    let transport = MockRest::new();
    transport.respond(200, login_body());
    let session = SessionStore::new(transport.clone(), profile.clone(), false);

    let outcome = runtime.block_on(session.login("a", "pw"));
    assert!(outcome.success);
    assert_eq!(outcome.token.as_deref(), Some("t1"));

    let state = session.session();
    assert!(state.is_authenticated);
    assert_eq!(state.token.as_deref(), Some("t1"));
    assert_eq!(state.user.as_ref().map(|u| u.id.as_str()), Some("1"));
    assert!(state.error.is_none());

    // A fresh store over the same profile picks the credentials back up.
    let reopened = SessionStore::new(transport, profile, false);
    assert!(reopened.is_authenticated());
    assert_eq!(reopened.token().as_deref(), Some("t1"));
}

#[test]
fn login_without_token_stays_anonymous() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.respond(200, json!({ "id": "1", "username": "a" }));
    let session = SessionStore::new(transport, ProfileStore::in_memory(), false);

    let outcome = runtime.block_on(session.login("a", "pw"));
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Login failed: server did not provide a token.");

    let state = session.session();
    assert!(!state.is_authenticated);
    assert!(state.token.is_none());
    assert!(state.error.is_some());
}

#[test]
fn login_rejection_carries_server_message() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.respond(401, json!({ "message": "Bad credentials" }));
    let session = SessionStore::new(transport, ProfileStore::in_memory(), false);

    let outcome = runtime.block_on(session.login("a", "nope"));
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Bad credentials");
    assert!(!session.is_authenticated());
}

#[test]
fn login_network_error_becomes_failure_outcome() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.fail(ApiError::Network("connection refused".into()));
    let session = SessionStore::new(transport, ProfileStore::in_memory(), false);

    let outcome = runtime.block_on(session.login("a", "pw"));
    assert!(!outcome.success);
    assert!(outcome.message.contains("connection refused"));
    assert!(!session.is_authenticated());
}

#[test]
fn logout_clears_persisted_credentials() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let profile = ProfileStore::new(temp_dir.path().to_path_buf());
    let transport = MockRest::new();
    transport.respond(200, login_body());
    let session = SessionStore::new(transport.clone(), profile.clone(), false);

    runtime.block_on(session.login("a", "pw"));
    assert!(session.is_authenticated());

    session.logout();
    let state = session.session();
    assert!(!state.is_authenticated);
    assert!(state.user.is_none());
    assert!(state.error.is_none());

    let reopened = SessionStore::new(transport, profile, false);
    assert!(!reopened.is_authenticated());
}

#[test]
fn signup_reports_message_without_authenticating() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.respond(200, json!({ "message": "User registered successfully!" }));
    let session = SessionStore::new(transport.clone(), ProfileStore::in_memory(), false);

    let outcome = runtime.block_on(session.signup(burrow_core::session::SignupRequest {
        username: "a".into(),
        email: "a@example.com".into(),
        password: "pw".into(),
        date_of_birth: "2000-01-01".into(),
    }));
    assert!(outcome.success);
    assert_eq!(outcome.message, "User registered successfully!");
    assert!(!session.is_authenticated());

    // The registration payload uses the backend's field names.
    let requests = transport.requests.lock();
    let body = match &requests[0].body {
        burrow_core::api::ApiBody::Json(body) => body.clone(),
        other => panic!("unexpected body: {other:?}"),
    };
    assert_eq!(body["dateOfBirth"], "2000-01-01");
}

#[test]
fn forbidden_api_response_logs_out_and_redirects_once() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.respond(200, login_body());
    transport.respond(403, json!({ "message": "Forbidden" }));
    transport.respond(403, json!({ "message": "Forbidden" }));
    let session = SessionStore::new(transport.clone(), ProfileStore::in_memory(), false);
    let navigator = RecordingNavigator::new();
    let api = ApiClient::new(transport, session.clone(), navigator.clone());

    runtime.block_on(session.login("a", "pw"));
    assert!(session.is_authenticated());

    let err = runtime
        .block_on(api.admin_users())
        .expect_err("expected 403");
    assert!(matches!(err, ApiError::Status { status: 403, .. }));
    assert!(!session.is_authenticated());
    assert_eq!(*navigator.routes.lock(), vec!["/login".to_string()]);

    // A second 403 while anonymous does not redirect again.
    let _ = runtime.block_on(api.admin_users()).expect_err("still 403");
    assert_eq!(navigator.routes.lock().len(), 1);
}

#[test]
fn fetch_with_auth_requires_a_token() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    let session = SessionStore::new(transport.clone(), ProfileStore::in_memory(), false);

    let err = runtime
        .block_on(session.fetch_with_auth(ApiRequest::get("/users/me")))
        .expect_err("no token");
    assert!(matches!(err, ApiError::NotAuthenticated));
    // Nothing went out on the wire.
    assert!(transport.requests.lock().is_empty());
}

#[test]
fn fetch_with_auth_injects_bearer_and_handles_expiry() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.respond(200, login_body());
    transport.respond(200, json!({ "ok": true }));
    transport.respond(401, serde_json::Value::Null);
    let session = SessionStore::new(transport.clone(), ProfileStore::in_memory(), false);

    runtime.block_on(session.login("a", "pw"));

    let response = runtime
        .block_on(session.fetch_with_auth(ApiRequest::get("/users/me")))
        .expect("authenticated fetch");
    assert_eq!(response.status, 200);
    {
        let requests = transport.requests.lock();
        assert_eq!(requests.last().unwrap().bearer.as_deref(), Some("t1"));
    }

    let err = runtime
        .block_on(session.fetch_with_auth(ApiRequest::get("/users/me")))
        .expect_err("expired session");
    assert!(matches!(err, ApiError::SessionExpired));
    assert!(!session.is_authenticated());
}

#[test]
fn update_user_merges_and_repersists() {
    let runtime = test_runtime();
    let temp_dir = TempDir::new().expect("temp dir");
    let profile = ProfileStore::new(temp_dir.path().to_path_buf());
    let transport = MockRest::new();
    transport.respond(200, login_body());
    let session = SessionStore::new(transport.clone(), profile.clone(), false);

    runtime.block_on(session.login("a", "pw"));
    session.update_user(burrow_core::session::ProfileUpdate {
        email: Some("new@example.com".into()),
        ..Default::default()
    });

    let user = session.session().user.expect("user");
    assert_eq!(user.username, "a");
    assert_eq!(user.email.as_deref(), Some("new@example.com"));

    let reopened = SessionStore::new(transport, profile, false);
    let persisted = reopened.session().user.expect("persisted user");
    assert_eq!(persisted.email.as_deref(), Some("new@example.com"));
}

#[test]
fn logout_during_login_keeps_the_session_anonymous() {
    use async_trait::async_trait;
    use burrow_core::api::{ApiResponse, RestTransport};
    use parking_lot::Mutex;

    // Transport that signs the store out before the login response lands,
    // like a user hitting logout while the request is in flight.
    struct LogoutMidFlight {
        session: Mutex<Option<SessionStore>>,
    }

    #[async_trait]
    impl RestTransport for LogoutMidFlight {
        async fn execute(&self, _request: ApiRequest) -> Result<ApiResponse, ApiError> {
            if let Some(session) = self.session.lock().clone() {
                session.logout();
            }
            Ok(ApiResponse {
                status: 200,
                body: login_body(),
            })
        }
    }

    let runtime = test_runtime();
    let transport = Arc::new(LogoutMidFlight {
        session: Mutex::new(None),
    });
    let session = SessionStore::new(transport.clone(), ProfileStore::in_memory(), false);
    *transport.session.lock() = Some(session.clone());

    let outcome = runtime.block_on(session.login("a", "pw"));
    assert!(!outcome.success);

    // The stale login did not resurrect the signed-out session.
    let state = session.session();
    assert!(!state.is_authenticated);
    assert!(state.token.is_none());
    assert!(state.user.is_none());
}

#[test]
fn subscribers_observe_session_changes() {
    let runtime = test_runtime();
    let transport = MockRest::new();
    transport.respond(200, login_body());
    let session = SessionStore::new(transport, ProfileStore::in_memory(), false);

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = seen.clone();
    let _subscription = session.subscribe(move |session| {
        log.lock().push(session.is_authenticated);
    });

    runtime.block_on(session.login("a", "pw"));
    session.logout();
    assert_eq!(*seen.lock(), vec![true, false]);
}
