//! Server configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::loader::LoadOptions;
use crate::util::{Error, Result};

/// Default number of priority bands.
pub const DEFAULT_QUEUES: usize = 3;

/// Environment override for [`ServerConfig::num_threads`].
pub const ENV_THREADS: &str = "RTSERVER_THREADS";
/// Environment override for [`ServerConfig::num_queues`].
pub const ENV_QUEUES: &str = "RTSERVER_QUEUES";

/// Startup parameters of an [`RtServer`](crate::RtServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads.
    pub num_threads: usize,
    /// Priority bands (input and output queues each).
    pub num_queues: usize,
    /// Threads used to build spatial indices at load time.
    pub prep_threads: usize,
    /// Include air regions when loading.
    pub use_air: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            num_threads: cpus,
            num_queues: DEFAULT_QUEUES,
            prep_threads: cpus,
            use_air: false,
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `RTSERVER_THREADS` / `RTSERVER_QUEUES` from the environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = get(ENV_THREADS) {
            self.num_threads = parse_count(ENV_THREADS, &v)?;
        }
        if let Some(v) = get(ENV_QUEUES) {
            self.num_queues = parse_count(ENV_QUEUES, &v)?;
        }
        Ok(self)
    }

    /// Reject zero thread or band counts.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::InvalidConfig("num_threads must be at least 1".into()));
        }
        if self.num_queues == 0 {
            return Err(Error::InvalidConfig("num_queues must be at least 1".into()));
        }
        if self.prep_threads == 0 {
            return Err(Error::InvalidConfig("prep_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Load options carrying this config's prep settings.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            use_air: self.use_air,
            prep_threads: self.prep_threads,
            ..Default::default()
        }
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key}={value:?} is not a count")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.num_threads >= 1);
        assert_eq!(config.num_queues, DEFAULT_QUEUES);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rtserver.json");
        std::fs::write(&path, r#"{ "num_threads": 2, "use_air": true }"#).unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.num_threads, 2);
        assert!(config.use_air);
        assert_eq!(config.num_queues, DEFAULT_QUEUES);
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rtserver.json");
        let config = ServerConfig {
            num_threads: 5,
            num_queues: 2,
            prep_threads: 1,
            use_air: false,
        };
        config.save(&path).unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_zero_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "num_queues": 0 }"#).unwrap();
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars = |key: &str| match key {
            ENV_THREADS => Some(" 7 ".to_string()),
            ENV_QUEUES => Some("4".to_string()),
            _ => None,
        };
        let config = ServerConfig::default().apply_vars(vars).unwrap();
        assert_eq!(config.num_threads, 7);
        assert_eq!(config.num_queues, 4);

        let bad = ServerConfig::default().apply_vars(|k| (k == ENV_QUEUES).then(|| "many".to_string()));
        assert!(matches!(bad, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_options() {
        let config = ServerConfig {
            prep_threads: 3,
            use_air: true,
            ..Default::default()
        };
        let opts = config.load_options();
        assert_eq!(opts.prep_threads, 3);
        assert!(opts.use_air);
        assert!(opts.objects.is_empty());
    }
}
