//! Engine configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use coterie_shared::constants::DEFAULT_DISPATCH_INTERVAL_SECS;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct CoterieConfig {
    /// Directory holding the per-tenant database files.
    /// Env: `COTERIE_DATA_DIR`
    /// Default: `None` (platform data directory).
    pub data_dir: Option<PathBuf>,

    /// Fixed delay between dispatch scheduler cycles.
    /// Env: `COTERIE_DISPATCH_INTERVAL_SECS`
    /// Default: `5`
    pub dispatch_interval: Duration,
}

impl Default for CoterieConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            dispatch_interval: Duration::from_secs(DEFAULT_DISPATCH_INTERVAL_SECS),
        }
    }
}

impl CoterieConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("COTERIE_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(val) = std::env::var("COTERIE_DISPATCH_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config.dispatch_interval = Duration::from_secs(secs);
                }
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid COTERIE_DISPATCH_INTERVAL_SECS, using default"
                    );
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_is_five_seconds() {
        let config = CoterieConfig::default();
        assert_eq!(config.dispatch_interval, Duration::from_secs(5));
        assert!(config.data_dir.is_none());
    }
}
