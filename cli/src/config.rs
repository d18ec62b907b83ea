use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use tally_core::window::DayBoundary;

use crate::remote::RemoteConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded SQLite database in the data directory.
    #[default]
    Local,
    /// Hosted PostgREST + GoTrue backend.
    Remote,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Defaults to `tally.db` inside `data_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_anon_key: Option<String>,
    /// Listen for changes made by other clients of the remote backend.
    #[serde(default = "default_realtime")]
    pub remote_realtime: bool,
    #[serde(default)]
    pub day_boundary: DayBoundary,
}

fn default_realtime() -> bool {
    true
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("db_path", &self.db_path)
            .field("backend", &self.backend)
            .field("remote_url", &self.remote_url)
            .field(
                "remote_anon_key",
                &self.remote_anon_key.as_ref().map(|_| "<redacted>"),
            )
            .field("remote_realtime", &self.remote_realtime)
            .field("day_boundary", &self.day_boundary)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs().map_or_else(
            || PathBuf::from("."),
            |dirs| dirs.data_dir().to_path_buf(),
        );
        Self {
            data_dir,
            db_path: None,
            backend: Backend::Local,
            remote_url: None,
            remote_anon_key: None,
            remote_realtime: true,
            day_boundary: DayBoundary::Local,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tally")
}

impl Config {
    /// Defaults, then `config.toml` in the platform config directory, then `extra`, then
    /// `TALLY_*` environment variables.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dirs) = project_dirs() {
            figment = figment.merge(Toml::file(dirs.config_dir().join("config.toml")));
        }
        if let Some(path) = extra {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("TALLY_"));

        let config: Config = figment.extract().context("Invalid configuration")?;
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir.display()
            )
        })?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tally.db"))
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn remote(&self) -> Result<RemoteConfig> {
        let Some(url) = self.remote_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            bail!("backend = \"remote\" needs remote_url (or TALLY_REMOTE_URL)");
        };
        let Some(anon_key) = self.remote_anon_key.as_deref().filter(|k| !k.trim().is_empty())
        else {
            bail!("backend = \"remote\" needs remote_anon_key (or TALLY_REMOTE_ANON_KEY)");
        };
        Ok(RemoteConfig::new(url, anon_key).with_realtime(self.remote_realtime))
    }
}
