//! Settings file and environment overrides.
//!
//! ```toml
//! [backend]
//! kind = "remote"
//! endpoint = "https://query.wikidata.org/sparql"
//! hot_cache_capacity = 10000
//!
//! [aggregation]
//! workers = 4
//!
//! [ranking]
//! top_n = 0
//! include_full_matches = true
//! deadline_secs = 120
//! ```
//!
//! Every section and field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::service::BackendConfig;
use crate::signature::{RankingOptions, DEFAULT_WORKERS};
use crate::{Error, Result};

pub const ENV_ENDPOINT: &str = "KGQA_SPARQL_ENDPOINT";
pub const ENV_CACHE_DIR: &str = "KGQA_CACHE_DIR";
pub const ENV_WORKERS: &str = "KGQA_WORKERS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendConfig,
    pub aggregation: AggregationSettings,
    pub ranking: RankingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub workers: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    pub top_n: usize,
    pub include_full_matches: bool,
    pub deadline_secs: Option<u64>,
}

impl Default for RankingSettings {
    fn default() -> Self {
        let options = RankingOptions::default();
        Self {
            top_n: options.top_n,
            include_full_matches: options.include_full_matches,
            deadline_secs: None,
        }
    }
}

impl RankingSettings {
    pub fn options(&self) -> RankingOptions {
        RankingOptions { top_n: self.top_n, include_full_matches: self.include_full_matches }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl Settings {
    /// `<user config dir>/kgqa-signatures/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kgqa-signatures").join("config.toml"))
    }

    /// Load settings from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let settings = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Load the file at [`Settings::default_path`] if there is one,
    /// otherwise return the defaults.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut settings: Settings = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        settings.expand_paths();
        Ok(settings)
    }

    /// Apply `KGQA_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, e.g. a fixed map in tests.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.aggregation.workers = workers
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_WORKERS} must be a positive integer, got {workers:?}")))?;
        }

        let endpoint = lookup(ENV_ENDPOINT);
        let cache_dir = lookup(ENV_CACHE_DIR);
        match &mut self.backend {
            #[cfg(feature = "remote")]
            BackendConfig::Remote(remote) => {
                if let Some(endpoint) = endpoint {
                    remote.endpoint = endpoint;
                }
                if let Some(dir) = cache_dir {
                    remote.cache_dir = Some(expand_home(Path::new(&dir)));
                }
            }
            BackendConfig::Local { .. } => {
                if endpoint.is_some() || cache_dir.is_some() {
                    warn!("{ENV_ENDPOINT} and {ENV_CACHE_DIR} are ignored by the local backend");
                }
            }
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        match &mut self.backend {
            #[cfg(feature = "remote")]
            BackendConfig::Remote(remote) => {
                if let Some(dir) = remote.cache_dir.as_mut() {
                    *dir = expand_home(dir);
                }
            }
            BackendConfig::Local { edge_list } => *edge_list = expand_home(edge_list),
        }
    }
}

/// Replace a leading `~` with the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
