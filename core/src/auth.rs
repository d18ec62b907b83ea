//! Authentication.
//!
//! [`AuthProvider`] is the seam between the tracker and whoever issues sessions: the local
//! SQLite user table ([`LocalAuth`]) or a hosted auth service. Providers keep the current
//! session in a [`SessionCell`] and announce every sign-in and sign-out on it.

use std::sync::{Arc, Mutex, PoisonError};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::{Database, UserRecord};
use crate::error::{Result, TrackerError};
use crate::notify::{Hub, Subscription};

pub const LOCAL_SESSION_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Exchanged for a new access token once this one expires. Hosted sessions only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_within(now, Duration::zero())
    }

    /// Whether the access token expires before `now + margin`.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now + margin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
}

pub type AuthListener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

pub trait AuthProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
    fn sign_up(&self, email: &str, password: &str) -> Result<Session>;
    fn sign_in(&self, email: &str, password: &str) -> Result<Session>;
    fn sign_out(&self) -> Result<()>;
    /// Re-adopt a session issued earlier, e.g. one persisted between runs. Fails with
    /// [`TrackerError::Auth`] if the provider no longer honours it.
    fn restore(&self, session: Session) -> Result<Session>;
    fn on_session_change(&self, listener: AuthListener) -> Subscription;
}

/// The current session plus its change stream.
#[derive(Default)]
pub struct SessionCell {
    current: Mutex<Option<Session>>,
    hub: Hub<AuthEvent>,
}

impl SessionCell {
    #[must_use]
    pub fn get(&self) -> Option<Session> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sign_in(&self, session: Session) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        tracing::info!(user = %session.user.email, "signed in");
        self.hub.publish(&AuthEvent::SignedIn(session));
    }

    /// Clears the session. Returns the session that was active, if any.
    pub fn sign_out(&self) -> Option<Session> {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::info!("signed out");
            self.hub.publish(&AuthEvent::SignedOut);
        }
        previous
    }

    pub fn subscribe(&self, listener: AuthListener) -> Subscription {
        self.hub.subscribe(move |event: &AuthEvent| listener(event))
    }
}

/// Normalize and check credentials before they are sent anywhere.
pub fn validate_credentials(email: &str, password: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !well_formed {
        return Err(TrackerError::Validation(format!(
            "'{email}' is not a valid email address"
        )));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(TrackerError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(email)
}

/// Argon2id PHC string for `password` under a fresh random salt.
fn hash_password(password: &str) -> Result<String> {
    let failed = |e: argon2::password_hash::Error| {
        TrackerError::Connectivity(format!("password hashing failed: {e}"))
    };
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes()).map_err(failed)?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(failed)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Salted SHA-256 as stored before schema v3, tagged `sha256$salt$hex`.
fn legacy_sha256_matches(salt: &str, expected_hex: &str, password: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let actual: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    constant_time_eq(actual.as_bytes(), expected_hex.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasswordCheck {
    Rejected,
    Accepted,
    /// Accepted against a legacy hash that should be replaced.
    AcceptedLegacy,
}

fn check_password(stored: &str, password: &str) -> PasswordCheck {
    if let Some((salt, hex)) = stored
        .strip_prefix("sha256$")
        .and_then(|rest| rest.split_once('$'))
    {
        return if legacy_sha256_matches(salt, hex, password) {
            PasswordCheck::AcceptedLegacy
        } else {
            PasswordCheck::Rejected
        };
    }
    let verified = PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    });
    if verified {
        PasswordCheck::Accepted
    } else {
        PasswordCheck::Rejected
    }
}

fn new_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Accounts and sessions kept in the local SQLite database.
pub struct LocalAuth {
    db: Arc<Database>,
    session: SessionCell,
    ttl: Duration,
}

impl LocalAuth {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            session: SessionCell::default(),
            ttl: Duration::days(LOCAL_SESSION_TTL_DAYS),
        }
    }

    fn issue(&self, user: &UserRecord) -> Result<Session> {
        let access_token = new_token();
        let expires_at = Utc::now() + self.ttl;
        self.db.insert_session(&access_token, &user.id, expires_at)?;
        let session = Session {
            access_token,
            user: AuthUser {
                id: user.id.clone(),
                email: user.email.clone(),
            },
            expires_at: Some(expires_at),
            refresh_token: None,
        };
        self.session.sign_in(session.clone());
        Ok(session)
    }
}

impl AuthProvider for LocalAuth {
    fn current_session(&self) -> Option<Session> {
        self.session.get()
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        let email = validate_credentials(email, password)?;
        let user = self
            .db
            .insert_user(&email, &hash_password(password)?)
            .map_err(|e| match e {
                TrackerError::Duplicate(_) => {
                    TrackerError::Auth(format!("an account for {email} already exists"))
                }
                other => other,
            })?;
        self.issue(&user)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim().to_lowercase();
        let rejected = || TrackerError::Auth("invalid email or password".to_string());
        let user = self.db.find_user_by_email(&email)?.ok_or_else(rejected)?;
        match check_password(&user.password_hash, password) {
            PasswordCheck::Rejected => return Err(rejected()),
            PasswordCheck::Accepted => {}
            PasswordCheck::AcceptedLegacy => {
                self.db.set_password_hash(&user.id, &hash_password(password)?)?;
                tracing::info!(user = %user.email, "password hash upgraded to argon2");
            }
        }
        self.db.purge_expired_sessions(Utc::now())?;
        self.issue(&user)
    }

    fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.session.sign_out() {
            self.db.delete_session(&session.access_token)?;
        }
        Ok(())
    }

    fn restore(&self, session: Session) -> Result<Session> {
        let record = self
            .db
            .get_session(&session.access_token)?
            .filter(|r| r.user_id == session.user.id && r.expires_at > Utc::now())
            .ok_or_else(|| TrackerError::Auth("session expired; please log in again".to_string()))?;
        let user = self.db.get_user(&record.user_id)?;
        let restored = Session {
            access_token: record.access_token,
            user: AuthUser {
                id: user.id,
                email: user.email,
            },
            expires_at: Some(record.expires_at),
            refresh_token: None,
        };
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

    fn auth() -> LocalAuth {
        LocalAuth::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn recorder(auth: &LocalAuth) -> (Arc<Mutex<Vec<AuthEvent>>>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_in = Arc::clone(&events);
        let sub = auth.on_session_change(Arc::new(move |e: &AuthEvent| {
            events_in.lock().unwrap().push(e.clone());
        }));
        (events, sub)
    }

    #[test]
    fn test_sign_up_starts_session() {
        let auth = auth();
        assert!(auth.current_session().is_none());
        let session = auth.sign_up(" Ada@Example.com ", "hunter22").unwrap();
        assert_eq!(session.user.email, "ada@example.com");
        assert!(!session.access_token.is_empty());
        assert!(!session.is_expired(Utc::now()));
        assert_eq!(auth.current_session(), Some(session));
    }

    #[test]
    fn test_sign_up_validation() {
        let auth = auth();
        assert!(auth.sign_up("not-an-email", "hunter22").unwrap_err().is_validation());
        assert!(auth.sign_up("a@example.com", "123").unwrap_err().is_validation());
    }

    #[test]
    fn test_duplicate_sign_up_rejected() {
        let auth = auth();
        auth.sign_up("a@example.com", "hunter22").unwrap();
        let err = auth.sign_up("a@example.com", "other-pass").unwrap_err();
        assert!(matches!(err, TrackerError::Auth(_)));
    }

    #[test]
    fn test_sign_in_checks_password() {
        let auth = auth();
        let created = auth.sign_up("a@example.com", "hunter22").unwrap();
        auth.sign_out().unwrap();

        let err = auth.sign_in("a@example.com", "wrong-pass").unwrap_err();
        assert!(matches!(err, TrackerError::Auth(_)));
        let err = auth.sign_in("nobody@example.com", "hunter22").unwrap_err();
        assert!(matches!(err, TrackerError::Auth(_)));
        assert!(auth.current_session().is_none());

        let session = auth.sign_in("A@example.com", "hunter22").unwrap();
        assert_eq!(session.user.id, created.user.id);
        assert_ne!(session.access_token, created.access_token);
    }

    #[test]
    fn test_sign_out_clears_and_notifies() {
        let auth = auth();
        let (events, _sub) = recorder(&auth);
        let session = auth.sign_up("a@example.com", "hunter22").unwrap();
        auth.sign_out().unwrap();

        assert!(auth.current_session().is_none());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], AuthEvent::SignedIn(session));
        assert_eq!(events[1], AuthEvent::SignedOut);
    }

    #[test]
    fn test_sign_out_without_session_is_quiet() {
        let auth = auth();
        let (events, _sub) = recorder(&auth);
        auth.sign_out().unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restore_session() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let first = LocalAuth::new(Arc::clone(&db));
        let session = first.sign_up("a@example.com", "hunter22").unwrap();

        // A new provider over the same database, as on the next run
        let second = LocalAuth::new(Arc::clone(&db));
        let restored = second.restore(session.clone()).unwrap();
        assert_eq!(restored.user, session.user);
        assert_eq!(second.current_session().unwrap().access_token, session.access_token);
    }

    #[test]
    fn test_restore_rejects_revoked_session() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let auth = LocalAuth::new(Arc::clone(&db));
        let session = auth.sign_up("a@example.com", "hunter22").unwrap();
        auth.sign_out().unwrap();

        let err = LocalAuth::new(db).restore(session).unwrap_err();
        assert!(matches!(err, TrackerError::Auth(_)));
    }

    #[test]
    fn test_password_hash_is_salted_argon2() {
        let first = hash_password("hunter22").unwrap();
        let second = hash_password("hunter22").unwrap();
        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert_eq!(check_password(&first, "hunter22"), PasswordCheck::Accepted);
        assert_eq!(check_password(&first, "hunter23"), PasswordCheck::Rejected);
        assert_eq!(check_password("garbage", "hunter22"), PasswordCheck::Rejected);
    }

    #[test]
    fn test_stored_password_is_not_plain_or_sha256() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let auth = LocalAuth::new(Arc::clone(&db));
        auth.sign_up("a@example.com", "hunter22").unwrap();
        let stored = db.find_user_by_email("a@example.com").unwrap().unwrap();
        assert!(stored.password_hash.starts_with("$argon2id$"));
        assert!(!stored.password_hash.contains("hunter22"));
    }

    #[test]
    fn test_legacy_hash_is_upgraded_on_sign_in() {
        let mut hasher = Sha256::new();
        hasher.update(b"salt1:hunter22");
        let hex: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = db
            .insert_user("a@example.com", &format!("sha256$salt1${hex}"))
            .unwrap();
        let auth = LocalAuth::new(Arc::clone(&db));

        assert!(auth.sign_in("a@example.com", "wrong-pass").is_err());
        assert!(db.get_user(&user.id).unwrap().password_hash.starts_with("sha256$"));

        auth.sign_in("a@example.com", "hunter22").unwrap();
        let upgraded = db.get_user(&user.id).unwrap().password_hash;
        assert!(upgraded.starts_with("$argon2id$"));
        auth.sign_out().unwrap();
        assert!(auth.sign_in("a@example.com", "hunter22").is_ok());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let mut session = Session {
            access_token: "t".into(),
            user: AuthUser {
                id: "u".into(),
                email: "a@example.com".into(),
            },
            expires_at: None,
            refresh_token: None,
        };
        assert!(!session.is_expired(now));
        session.expires_at = Some(now + Duration::seconds(30));
        assert!(!session.is_expired(now));
        assert!(session.expires_within(now, Duration::seconds(60)));
        session.expires_at = Some(now - Duration::seconds(1));
        assert!(session.is_expired(now));
    }
}
