use anyhow::{Context, Result, bail};
use std::sync::Arc;

use tally_core::auth::{AuthEvent, AuthProvider, LocalAuth, Session};
use tally_core::db::Database;
use tally_core::notify::Subscription;
use tally_core::service::TrackerService;
use tally_core::store::DataStore;

use crate::config::{Backend, Config};
use crate::remote::{RemoteAuth, RemoteStore};
use crate::session::SessionFile;

/// Everything a command needs: the configured backend plus the persisted session.
///
/// Every sign-in, including a token refresh, is written to the session file as it happens.
pub struct App {
    pub config: Config,
    pub auth: Arc<dyn AuthProvider>,
    pub service: Arc<TrackerService>,
    sessions: SessionFile,
    _persist: Subscription,
}

impl App {
    pub fn open(config: Config) -> Result<Self> {
        let (store, auth): (Arc<dyn DataStore>, Arc<dyn AuthProvider>) = match config.backend {
            Backend::Local => {
                let path = config.db_path();
                let db = Arc::new(
                    Database::open(&path)
                        .with_context(|| format!("Failed to open database: {}", path.display()))?,
                );
                let auth: Arc<dyn AuthProvider> = Arc::new(LocalAuth::new(Arc::clone(&db)));
                let store: Arc<dyn DataStore> = db;
                (store, auth)
            }
            Backend::Remote => {
                let remote = config.remote()?;
                let auth: Arc<dyn AuthProvider> = Arc::new(RemoteAuth::new(remote.clone())?);
                let store: Arc<dyn DataStore> =
                    Arc::new(RemoteStore::new(remote, Arc::clone(&auth))?);
                (store, auth)
            }
        };
        tracing::debug!(backend = ?config.backend, "backend ready");

        let service = Arc::new(TrackerService::new(store, config.day_boundary));
        let sessions = SessionFile::new(config.session_path());
        let persist = {
            let sessions = sessions.clone();
            auth.on_session_change(Arc::new(move |event: &AuthEvent| {
                if let AuthEvent::SignedIn(session) = event {
                    if let Err(e) = sessions.save(session) {
                        tracing::warn!("{e:#}");
                    }
                }
            }))
        };
        let app = Self {
            sessions,
            config,
            auth,
            service,
            _persist: persist,
        };
        app.restore_session();
        Ok(app)
    }

    /// Re-adopt the saved session. A stale or unreadable one is discarded with a warning.
    fn restore_session(&self) {
        let saved = match self.sessions.load() {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("{e:#}");
                let _ = self.sessions.clear();
                return;
            }
        };
        if let Err(e) = self.auth.restore(saved) {
            tracing::warn!(error = %e, "discarding saved session");
            if let Err(e) = self.sessions.clear() {
                tracing::warn!("{e:#}");
            }
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.auth.current_session()
    }

    pub fn require_session(&self) -> Result<Session> {
        let Some(session) = self.session() else {
            bail!("Not logged in. Run `tally login` (or `tally signup`) first.");
        };
        Ok(session)
    }

    pub fn forget(&self) -> Result<bool> {
        self.sessions.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(local_config(dir.path())).unwrap();
        assert!(app.require_session().is_err());
        let session = app.auth.sign_up("a@example.com", "hunter22").unwrap();
        drop(app);

        let app = App::open(local_config(dir.path())).unwrap();
        assert_eq!(app.require_session().unwrap().user.id, session.user.id);
    }

    #[test]
    fn test_revoked_session_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(local_config(dir.path())).unwrap();
        app.auth.sign_up("a@example.com", "hunter22").unwrap();
        // Sign out deletes the server-side session but leaves the file behind
        app.auth.sign_out().unwrap();
        drop(app);

        let app = App::open(local_config(dir.path())).unwrap();
        assert!(app.session().is_none());
        assert!(!dir.path().join("session.json").exists());
    }

    #[test]
    fn test_sign_in_writes_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(local_config(dir.path())).unwrap();
        let path = app.config.session_path();
        assert!(!path.exists());

        let session = app.auth.sign_up("a@example.com", "hunter22").unwrap();
        let saved = SessionFile::new(&path).load().unwrap().unwrap();
        assert_eq!(saved, session);
    }

    #[test]
    fn test_remote_backend_needs_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            backend: Backend::Remote,
            ..local_config(dir.path())
        };
        assert!(App::open(config).is_err());
    }
}
