//! Hosted backend: PostgREST for rows, GoTrue for accounts, Realtime for pushed changes.
//!
//! Both clients are blocking facades over an async reqwest client. They must be called
//! from inside the multi-threaded tokio runtime that `main` starts.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;

use tally_core::auth::{AuthListener, AuthProvider, AuthUser, Session, SessionCell, validate_credentials};
use tally_core::error::{Result, TrackerError};
use tally_core::models::Table;
use tally_core::notify::{
    ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, Subscription,
};
use tally_core::store::{DataStore, FilterOp, Query};

use crate::realtime::RealtimeListener;

/// Access tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    url: String,
    anon_key: String,
    realtime: bool,
}

impl RemoteConfig {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            url: url.trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.trim().to_string(),
            realtime: true,
        }
    }

    /// Whether subscribers get changes made by other clients. Without it only this
    /// process's own writes are announced, and views catch up on `refresh`.
    #[must_use]
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    fn rest_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{endpoint}", self.url)
    }
}

/// PostgREST query-string pairs for `query`.
pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|f| {
            let op = match f.op {
                FilterOp::Eq => "eq",
                FilterOp::Gte => "gte",
                FilterOp::Lt => "lt",
            };
            let value = match &f.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (f.column.clone(), format!("{op}.{value}"))
        })
        .collect();
    if let Some(order) = &query.order {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{dir}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Best human-readable message in a PostgREST or GoTrue error body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str))
        })
        .map_or_else(|| body.trim().to_string(), str::to_string)
}

/// Map a failed HTTP response onto the tracker's error taxonomy.
pub fn map_error(status: u16, body: &str) -> TrackerError {
    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string));
    let message = error_message(body);
    match (status, code.as_deref()) {
        // unique_violation
        (_, Some("23505")) => TrackerError::Duplicate(message),
        // foreign_key_violation, check_violation, not_null_violation
        (409, _) | (_, Some("23503" | "23514" | "23502")) => TrackerError::Constraint(message),
        (401 | 403, _) => TrackerError::Auth(message),
        (404 | 406, _) => TrackerError::NotFound(message),
        (400 | 422, _) => TrackerError::Validation(message),
        _ => TrackerError::Connectivity(format!("HTTP {status}: {message}")),
    }
}

fn transport(err: &reqwest::Error) -> TrackerError {
    TrackerError::Connectivity(format!("request failed: {err}"))
}

/// Shared HTTP plumbing.
#[derive(Clone)]
struct Http {
    client: reqwest::Client,
    rt: Handle,
    config: RemoteConfig,
}

impl Http {
    fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("tally-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TrackerError::Connectivity(format!("Failed to build HTTP client: {e}")))?;
        let rt = Handle::try_current()
            .map_err(|e| TrackerError::Connectivity(format!("no async runtime: {e}")))?;
        Ok(Self { client, rt, config })
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.rt.block_on(fut))
    }

    /// Send `request` and decode a JSON body, mapping non-2xx responses.
    fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        self.block_on(async {
            let resp = request
                .header("apikey", &self.config.anon_key)
                .send()
                .await
                .map_err(|e| transport(&e))?;
            let status = resp.status();
            let body = resp.text().await.map_err(|e| transport(&e))?;
            if !status.is_success() {
                let err = map_error(status.as_u16(), &body);
                tracing::debug!(status = status.as_u16(), error = %err, "remote call failed");
                return Err(err);
            }
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(TrackerError::from)
        })
    }
}

/// Rows in a hosted PostgREST schema.
///
/// Change events come from two places: each write made through this store, and the
/// Realtime channel, which starts with the first subscription and carries writes from
/// every client.
pub struct RemoteStore {
    http: Http,
    auth: Arc<dyn AuthProvider>,
    changes: ChangeFeed,
    realtime: OnceLock<RealtimeListener>,
}

impl RemoteStore {
    pub fn new(config: RemoteConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        Ok(Self {
            http: Http::new(config)?,
            auth,
            changes: ChangeFeed::new(),
            realtime: OnceLock::new(),
        })
    }

    fn ensure_realtime(&self) {
        if !self.http.config.realtime {
            return;
        }
        self.realtime.get_or_init(|| {
            RealtimeListener::start(
                &self.http.rt,
                &self.http.config,
                Arc::clone(&self.auth),
                self.changes.clone(),
            )
        });
    }

    /// The signed-in user's token, or the anon key for anonymous access. A token about to
    /// expire is refreshed first; if that fails the old one is sent and the server decides.
    fn bearer(&self) -> String {
        let Some(session) = self.auth.current_session() else {
            return self.http.config.anon_key.clone();
        };
        if !matches!(renewal(&session, Utc::now()), Renewal::Refresh(_)) {
            return session.access_token;
        }
        match self.auth.restore(session.clone()) {
            Ok(renewed) => renewed.access_token,
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                session.access_token
            }
        }
    }

    fn first_row(table: Table, rows: Value) -> Result<Value> {
        match rows {
            Value::Array(rows) => rows.into_iter().next().ok_or_else(|| {
                TrackerError::NotFound(format!("{table}: no row returned"))
            }),
            Value::Object(_) => Ok(rows),
            other => Err(TrackerError::Connectivity(format!(
                "{table}: unexpected response {other}"
            ))),
        }
    }

    fn publish(&self, table: Table, kind: ChangeKind, row: &Value) {
        let field = |name: &str| row.get(name).and_then(Value::as_str).map(str::to_string);
        self.changes
            .publish(&ChangeEvent::push(table, kind, field("user_id"), field("id")));
    }
}

impl DataStore for RemoteStore {
    fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let request = self
            .http
            .client
            .post(self.http.config.rest_url(table))
            .bearer_auth(self.bearer())
            .header("Prefer", "return=representation")
            .json(&row);
        let stored = Self::first_row(table, self.http.send(request)?)?;
        self.publish(table, ChangeKind::Insert, &stored);
        Ok(stored)
    }

    fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        let request = self
            .http
            .client
            .get(self.http.config.rest_url(table))
            .bearer_auth(self.bearer())
            .query(&query_params(query));
        match self.http.send(request)? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(TrackerError::Connectivity(format!(
                "{table}: expected a list of rows, got {other}"
            ))),
        }
    }

    fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        let request = self
            .http
            .client
            .patch(self.http.config.rest_url(table))
            .bearer_auth(self.bearer())
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{id}"))])
            .json(&patch);
        let stored = Self::first_row(table, self.http.send(request)?)
            .map_err(|_| TrackerError::NotFound(format!("{table} row {id}")))?;
        self.publish(table, ChangeKind::Update, &stored);
        Ok(stored)
    }

    fn subscribe(&self, table: Table, on_change: ChangeCallback) -> Subscription {
        self.ensure_realtime();
        self.changes.subscribe(table, on_change)
    }

    fn records_sync_time(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    user: GoTrueUser,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> Session {
        Session {
            access_token: self.access_token,
            user: AuthUser {
                id: self.user.id,
                email: self.user.email.unwrap_or_else(|| fallback_email.to_string()),
            },
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
        }
    }
}

/// What restoring a saved session takes.
#[derive(Debug, PartialEq, Eq)]
enum Renewal<'a> {
    /// The access token is still good; confirm it with the server.
    Verify,
    /// The access token is (nearly) expired; trade the refresh token for a new one.
    Refresh(&'a str),
    /// Expired with nothing to trade.
    Expired,
}

fn renewal(session: &Session, now: DateTime<Utc>) -> Renewal<'_> {
    if !session.expires_within(now, chrono::Duration::seconds(REFRESH_MARGIN_SECS)) {
        return Renewal::Verify;
    }
    match session.refresh_token.as_deref() {
        Some(token) => Renewal::Refresh(token),
        None => Renewal::Expired,
    }
}

/// Parse a signup or token response. Signup without a session means the project requires
/// email confirmation first.
fn session_from_response(body: Value, email: &str) -> Result<Session> {
    if body.get("access_token").is_none() {
        return Err(TrackerError::Auth(
            "account created; confirm your email, then log in".to_string(),
        ));
    }
    let token: TokenResponse = serde_json::from_value(body)?;
    Ok(token.into_session(email))
}

/// Accounts on a hosted GoTrue server.
pub struct RemoteAuth {
    http: Http,
    session: SessionCell,
}

impl RemoteAuth {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        Ok(Self {
            http: Http::new(config)?,
            session: SessionCell::default(),
        })
    }

    fn password_grant(&self, endpoint: &str, email: &str, password: &str) -> Result<Session> {
        let email = validate_credentials(email, password)?;
        let request = self
            .http
            .client
            .post(self.http.config.auth_url(endpoint))
            .json(&json!({ "email": email, "password": password }));
        let session = session_from_response(self.http.send(request)?, &email)?;
        self.session.sign_in(session.clone());
        Ok(session)
    }

    fn refresh_grant(&self, refresh_token: &str, email: &str) -> Result<Session> {
        let request = self
            .http
            .client
            .post(self.http.config.auth_url("token?grant_type=refresh_token"))
            .json(&json!({ "refresh_token": refresh_token }));
        let body = self.http.send(request).map_err(|e| match e {
            // GoTrue answers a used or revoked refresh token with 400
            TrackerError::Validation(msg) | TrackerError::NotFound(msg) => TrackerError::Auth(msg),
            other => other,
        })?;
        tracing::debug!("access token refreshed");
        session_from_response(body, email)
    }

    fn current_user(&self, access_token: &str) -> Result<GoTrueUser> {
        let request = self
            .http
            .client
            .get(self.http.config.auth_url("user"))
            .bearer_auth(access_token);
        Ok(serde_json::from_value(self.http.send(request)?)?)
    }
}

impl AuthProvider for RemoteAuth {
    fn current_session(&self) -> Option<Session> {
        self.session.get()
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        self.password_grant("signup", email, password)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.password_grant("token?grant_type=password", email, password)
    }

    fn sign_out(&self) -> Result<()> {
        let Some(session) = self.session.sign_out() else {
            return Ok(());
        };
        let request = self
            .http
            .client
            .post(self.http.config.auth_url("logout"))
            .bearer_auth(&session.access_token);
        self.http.send(request).map(|_| ())
    }

    /// Verifies a live session, or refreshes one whose access token has expired. A token
    /// the server has revoked early is refreshed too when a refresh token is at hand.
    fn restore(&self, session: Session) -> Result<Session> {
        let restored = match renewal(&session, Utc::now()) {
            Renewal::Expired => {
                return Err(TrackerError::Auth(
                    "session expired; please log in again".to_string(),
                ));
            }
            Renewal::Refresh(token) => self.refresh_grant(token, &session.user.email)?,
            Renewal::Verify => match self.current_user(&session.access_token) {
                Ok(user) => Session {
                    user: AuthUser {
                        id: user.id,
                        email: user.email.unwrap_or_else(|| session.user.email.clone()),
                    },
                    ..session.clone()
                },
                Err(TrackerError::Auth(msg)) => match session.refresh_token.as_deref() {
                    Some(token) => self.refresh_grant(token, &session.user.email)?,
                    None => return Err(TrackerError::Auth(msg)),
                },
                Err(e) => return Err(e),
            },
        };
        if restored.user.id != session.user.id {
            return Err(TrackerError::Auth("session belongs to another user".to_string()));
        }
        self.session.sign_in(restored.clone());
        Ok(restored)
    }

    fn on_session_change(&self, listener: AuthListener) -> Subscription {
        self.session.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = RemoteConfig::new(" https://abc.supabase.co/ ", " key ");
        assert_eq!(config.url(), "https://abc.supabase.co");
        assert_eq!(
            config.rest_url(Table::WaterIntake),
            "https://abc.supabase.co/rest/v1/water_intake"
        );
        assert_eq!(
            config.auth_url("token?grant_type=password"),
            "https://abc.supabase.co/auth/v1/token?grant_type=password"
        );
        assert_eq!(config.anon_key(), "key");
        assert!(config.realtime);
        assert!(!config.with_realtime(false).realtime);
    }

    #[test]
    fn test_query_params() {
        let query = Query::new()
            .eq("user_id", "u1")
            .gte("created_at", "2024-06-15T00:00:00.000000Z")
            .lt("created_at", "2024-06-16T00:00:00.000000Z")
            .order_by("meal_time", true)
            .limit(1);
        let params = query_params(&query);
        let expect = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert_eq!(
            params,
            vec![
                expect("user_id", "eq.u1"),
                expect("created_at", "gte.2024-06-15T00:00:00.000000Z"),
                expect("created_at", "lt.2024-06-16T00:00:00.000000Z"),
                expect("order", "meal_time.asc"),
                expect("limit", "1"),
            ]
        );
    }

    #[test]
    fn test_query_params_numbers_and_desc() {
        let query = Query::new().eq("calories", 78).order_by("created_at", false);
        let params = query_params(&query);
        assert_eq!(params[0], ("calories".to_string(), "eq.78".to_string()));
        assert_eq!(params[1], ("order".to_string(), "created_at.desc".to_string()));
    }

    #[test]
    fn test_map_error_unique_violation() {
        let body = r#"{"code":"23505","details":"Key (user_id, date) already exists.","hint":null,"message":"duplicate key value violates unique constraint \"goals_user_id_date_key\""}"#;
        let err = map_error(409, body);
        assert!(err.is_duplicate());
        assert!(err.to_string().contains("duplicate key"));
        // Some proxies rewrite the status; the SQLSTATE still decides
        assert!(map_error(400, body).is_duplicate());
    }

    #[test]
    fn test_map_error_check_violation_is_not_duplicate() {
        let body = r#"{"code":"23514","message":"new row for relation \"goals\" violates check constraint \"goals_water_goal_ml_check\""}"#;
        let err = map_error(400, body);
        assert!(err.is_constraint());
        assert!(!err.is_duplicate());
    }

    #[test]
    fn test_map_error_other_statuses() {
        assert!(matches!(
            map_error(401, r#"{"msg":"Invalid JWT"}"#),
            TrackerError::Auth(m) if m == "Invalid JWT"
        ));
        assert!(matches!(
            map_error(400, r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            TrackerError::Validation(m) if m == "Invalid login credentials"
        ));
        assert!(map_error(404, "").is_not_found());
        assert!(matches!(
            map_error(503, "upstream unavailable"),
            TrackerError::Connectivity(m) if m.contains("503") && m.contains("upstream unavailable")
        ));
    }

    #[test]
    fn test_session_from_token_response() {
        let body = json!({
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r",
            "user": {"id": "uuid-1", "email": "a@example.com"}
        });
        let session = session_from_response(body, "fallback@example.com").unwrap();
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.user.id, "uuid-1");
        assert_eq!(session.user.email, "a@example.com");
        assert_eq!(session.refresh_token.as_deref(), Some("r"));
        assert!(!session.is_expired(Utc::now()));
    }

    fn saved(expires_in_secs: i64, refresh_token: Option<&str>) -> Session {
        Session {
            access_token: "jwt".into(),
            user: AuthUser {
                id: "uuid-1".into(),
                email: "a@example.com".into(),
            },
            expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    #[test]
    fn test_live_session_is_verified() {
        assert_eq!(renewal(&saved(3600, Some("r")), Utc::now()), Renewal::Verify);
        assert_eq!(renewal(&saved(3600, None), Utc::now()), Renewal::Verify);
    }

    #[test]
    fn test_expired_session_is_refreshed_when_possible() {
        // An hour past expiry, as on the next day's first command
        let stale = saved(-3600, Some("r1"));
        assert_eq!(renewal(&stale, Utc::now()), Renewal::Refresh("r1"));
        // Inside the margin counts as expired
        assert_eq!(renewal(&saved(30, Some("r1")), Utc::now()), Renewal::Refresh("r1"));
        assert_eq!(renewal(&saved(-3600, None), Utc::now()), Renewal::Expired);
    }

    #[test]
    fn test_refresh_response_rotates_tokens() {
        let body = json!({
            "access_token": "jwt-2",
            "expires_in": 3600,
            "refresh_token": "r2",
            "user": {"id": "uuid-1"}
        });
        let session = session_from_response(body, "a@example.com").unwrap();
        assert_eq!(session.access_token, "jwt-2");
        assert_eq!(session.refresh_token.as_deref(), Some("r2"));
        assert_eq!(session.user.email, "a@example.com");
        assert_eq!(renewal(&session, Utc::now()), Renewal::Verify);
    }

    #[test]
    fn test_signup_needing_confirmation() {
        let body = json!({"id": "uuid-1", "email": "a@example.com", "confirmation_sent_at": "2024-06-15T08:00:00Z"});
        let err = session_from_response(body, "a@example.com").unwrap_err();
        assert!(matches!(err, TrackerError::Auth(_)));
    }

    #[test]
    fn test_first_row() {
        let row = RemoteStore::first_row(Table::Goals, json!([{"id": "g1"}, {"id": "g2"}])).unwrap();
        assert_eq!(row["id"], "g1");
        assert!(RemoteStore::first_row(Table::Goals, json!([])).unwrap_err().is_not_found());
    }
}
