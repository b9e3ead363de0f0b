use crate::api::{ApiError, ApiRequest, ApiResponse, RestTransport};
use crate::observer::{Subscribers, Subscription};
use crate::store::{CredentialAttributes, ProfileStore, SameSite};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

pub const USER_CREDENTIAL: &str = "auth_user";
pub const TOKEN_CREDENTIAL: &str = "auth_token";

const CREDENTIAL_TTL_DAYS: i64 = 7;
const LOGIN_FALLBACK_MESSAGE: &str = "Login failed: invalid credentials or server error.";
const MISSING_TOKEN_MESSAGE: &str = "Login failed: server did not provide a token.";
const SIGNUP_FALLBACK_MESSAGE: &str = "Signup failed with an unknown error.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Authentication state as seen by the rest of the client.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
    pub token: Option<String>,
    pub error: Option<String>,
}

/// Structured result of `login`/`signup`. These operations never fail with
/// an `Err`; network and server trouble degrade into a failed outcome.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub success: bool,
    pub message: String,
    pub user: Option<UserProfile>,
    pub token: Option<String>,
}

impl AuthOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            user: None,
            token: None,
        }
    }

    fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            user: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "dateOfBirth")]
    pub date_of_birth: String,
}

/// Partial profile for `update_user`; set fields replace, unset fields keep
/// the current value (shallow merge).
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub roles: Option<BTreeSet<String>>,
    pub kind: Option<String>,
}

struct InnerSession {
    session: Session,
    // Bumped on logout so a login completing afterwards cannot resurrect
    // the old session.
    generation: u64,
}

/// Source of identity truth for the client.
///
/// Persists user and token as two credential entries with cookie-style
/// attributes (7-day expiry, secure when the transport is HTTPS,
/// SameSite=Lax) and notifies subscribers on every mutation.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<InnerSession>>,
    store: ProfileStore,
    transport: Arc<dyn RestTransport>,
    secure_transport: bool,
    subscribers: Subscribers<Session>,
}

impl SessionStore {
    pub fn new(
        transport: Arc<dyn RestTransport>,
        store: ProfileStore,
        secure_transport: bool,
    ) -> Self {
        let session = load_persisted_session(&store);
        Self {
            inner: Arc::new(RwLock::new(InnerSession {
                session,
                generation: 0,
            })),
            store,
            transport,
            secure_transport,
            subscribers: Subscribers::new(),
        }
    }

    pub fn session(&self) -> Session {
        self.inner.read().session.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().session.token.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner
            .read()
            .session
            .user
            .as_ref()
            .map(|user| user.id.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().session.is_authenticated
    }

    pub fn subscribe(&self, callback: impl Fn(&Session) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    pub async fn login(&self, username: &str, password: &str) -> AuthOutcome {
        let generation = self.inner.read().generation;
        let request = ApiRequest::post("/auth/login")
            .json(json!({ "username": username, "password": password }));

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "login request failed");
                let message = format!("An unexpected network error occurred during login: {err}");
                self.commit(
                    generation,
                    Session {
                        error: Some(message.clone()),
                        ..Session::default()
                    },
                );
                return AuthOutcome::failure(message);
            }
        };

        if !response.is_success() {
            let message = response
                .message()
                .unwrap_or(LOGIN_FALLBACK_MESSAGE)
                .to_string();
            warn!(status = response.status, "login rejected by backend");
            self.commit(
                generation,
                Session {
                    error: Some(message.clone()),
                    ..Session::default()
                },
            );
            return AuthOutcome::failure(message);
        }

        let Some(token) = response.body.get("token").and_then(Value::as_str) else {
            warn!("login response did not carry a token");
            self.commit(
                generation,
                Session {
                    error: Some("Login response missing token.".to_string()),
                    ..Session::default()
                },
            );
            return AuthOutcome::failure(MISSING_TOKEN_MESSAGE);
        };
        let token = token.to_string();
        let user = profile_from_login(&response);

        let authenticated = Session {
            is_authenticated: true,
            user: Some(user.clone()),
            token: Some(token.clone()),
            error: None,
        };
        if !self.commit(generation, authenticated) {
            // A logout raced this login; stay signed out.
            return AuthOutcome::failure("Login superseded by sign-out.");
        }
        self.persist_credentials(&user, &token);

        AuthOutcome {
            success: true,
            message: response
                .message()
                .unwrap_or("Logged in successfully!")
                .to_string(),
            user: Some(user),
            token: Some(token),
        }
    }

    /// Drop the persisted credentials and reset to an anonymous session.
    pub fn logout(&self) {
        self.store.remove_credential(USER_CREDENTIAL);
        self.store.remove_credential(TOKEN_CREDENTIAL);
        let snapshot = {
            let mut inner = self.inner.write();
            inner.generation += 1;
            inner.session = Session::default();
            inner.session.clone()
        };
        self.subscribers.notify(&snapshot);
    }

    /// Register a new account. Does not sign the user in.
    pub async fn signup(&self, request: SignupRequest) -> AuthOutcome {
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(err) => return AuthOutcome::failure(err.to_string()),
        };
        match self
            .transport
            .execute(ApiRequest::post("/auth/signup").json(payload))
            .await
        {
            Ok(response) if response.is_success() => {
                AuthOutcome::succeeded(response.message().unwrap_or("Signup successful!"))
            }
            Ok(response) => {
                warn!(status = response.status, "signup rejected by backend");
                AuthOutcome::failure(response.message().unwrap_or(SIGNUP_FALLBACK_MESSAGE))
            }
            Err(err) => {
                warn!(%err, "signup request failed");
                AuthOutcome::failure(format!(
                    "An unexpected error occurred during signup: {err}"
                ))
            }
        }
    }

    /// Shallow-merge profile fields into the current user and re-persist.
    pub fn update_user(&self, update: ProfileUpdate) {
        let snapshot = {
            let mut inner = self.inner.write();
            let Some(user) = inner.session.user.as_mut() else {
                return;
            };
            if let Some(username) = update.username {
                user.username = username;
            }
            if let Some(email) = update.email {
                user.email = Some(email);
            }
            if let Some(roles) = update.roles {
                user.roles = roles;
            }
            if let Some(kind) = update.kind {
                user.kind = Some(kind);
            }
            match serde_json::to_string(user) {
                Ok(serialized) => {
                    if let Err(err) = self.store.set_credential(
                        USER_CREDENTIAL,
                        &serialized,
                        self.credential_attributes(),
                    ) {
                        warn!(%err, "failed to re-persist updated profile");
                    }
                }
                Err(err) => warn!(%err, "failed to serialize updated profile"),
            }
            inner.session.clone()
        };
        self.subscribers.notify(&snapshot);
    }

    /// Execute a request with the current bearer token.
    ///
    /// Fails fast (and signs out) without a token; a 401/403 response also
    /// signs out and surfaces as `ApiError::SessionExpired`. Unlike
    /// `login`/`signup` this propagates errors to the caller.
    pub async fn fetch_with_auth(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let Some(token) = self.token() else {
            warn!("no authentication token available, signing out");
            self.logout();
            return Err(ApiError::NotAuthenticated);
        };
        let response = self.transport.execute(request.bearer(token)).await?;
        if response.status == 401 || response.status == 403 {
            warn!(status = response.status, "authenticated request rejected, signing out");
            self.logout();
            return Err(ApiError::SessionExpired);
        }
        Ok(response)
    }

    fn credential_attributes(&self) -> CredentialAttributes {
        CredentialAttributes {
            expires_at: Some(Utc::now() + Duration::days(CREDENTIAL_TTL_DAYS)),
            secure: self.secure_transport,
            same_site: SameSite::Lax,
        }
    }

    fn persist_credentials(&self, user: &UserProfile, token: &str) {
        match serde_json::to_string(user) {
            Ok(serialized) => {
                if let Err(err) = self.store.set_credential(
                    USER_CREDENTIAL,
                    &serialized,
                    self.credential_attributes(),
                ) {
                    warn!(%err, "failed to persist user profile");
                }
            }
            Err(err) => warn!(%err, "failed to serialize user profile"),
        }
        if let Err(err) =
            self.store
                .set_credential(TOKEN_CREDENTIAL, token, self.credential_attributes())
        {
            warn!(%err, "failed to persist auth token");
        }
    }

    /// Replace the session unless a logout bumped the generation since the
    /// caller captured it. Notifies subscribers when the write lands.
    fn commit(&self, generation: u64, session: Session) -> bool {
        let snapshot = {
            let mut inner = self.inner.write();
            if inner.generation != generation {
                None
            } else {
                inner.session = session;
                Some(inner.session.clone())
            }
        };
        match snapshot {
            Some(snapshot) => {
                self.subscribers.notify(&snapshot);
                true
            }
            None => false,
        }
    }
}

fn load_persisted_session(store: &ProfileStore) -> Session {
    let mut token = store.credential(TOKEN_CREDENTIAL);
    let user = store.credential(USER_CREDENTIAL).and_then(|raw| {
        match serde_json::from_str::<UserProfile>(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(%err, "discarding unreadable persisted profile");
                store.remove_credential(USER_CREDENTIAL);
                store.remove_credential(TOKEN_CREDENTIAL);
                token = None;
                None
            }
        }
    });
    Session {
        is_authenticated: token.is_some(),
        user,
        token,
        error: None,
    }
}

fn profile_from_login(response: &ApiResponse) -> UserProfile {
    let body = &response.body;
    UserProfile {
        id: id_string(body.get("id")),
        username: body
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        email: body
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string),
        roles: body
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        kind: body
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

// The backend uses opaque string ids, but tolerate numeric ids too.
fn id_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}
