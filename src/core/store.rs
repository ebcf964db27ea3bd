//! Store handle for Maia's routing state.
//!
//! A `Store` is built once per process invocation and handed to every
//! component by reference. It owns the resolved root and the routing
//! configuration; nothing in the crate keeps module-level state.

use crate::core::config::RoutingConfig;
use crate::core::error::MaiaError;
use crate::core::schemas;
use std::path::{Path, PathBuf};

pub const ROOT_ENV: &str = "MAIA_ROOT";

/// Store handle representing one Maia root.
#[derive(Debug, Clone)]
pub struct Store {
    /// Repository root; all state lives under `<root>/claude/`.
    pub root: PathBuf,
    pub config: RoutingConfig,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>, config: RoutingConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Store with compiled-in defaults. Mostly useful for tests and tooling.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        Self::new(root, RoutingConfig::default())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(schemas::DATA_DIR)
    }

    pub fn routing_db_path(&self) -> PathBuf {
        self.data_dir().join(schemas::ROUTING_DB_NAME)
    }

    pub fn system_state_db_path(&self) -> PathBuf {
        self.data_dir().join(schemas::SYSTEM_STATE_DB_NAME)
    }

    pub fn system_state_md_path(&self) -> PathBuf {
        self.root.join(schemas::SYSTEM_STATE_MD)
    }

    pub fn gaps_path(&self) -> PathBuf {
        self.data_dir().join(schemas::CAPABILITY_GAPS_FILE)
    }

    pub fn recommendations_path(&self) -> PathBuf {
        self.data_dir().join(schemas::AGENT_RECOMMENDATIONS_FILE)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir().join(schemas::AUDIT_LOG_FILE)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Resolve the root directory: explicit flag, then `MAIA_ROOT`, then a
/// home-relative default.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf, MaiaError> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_root) = std::env::var(ROOT_ENV) {
        if !env_root.trim().is_empty() {
            return Ok(PathBuf::from(env_root));
        }
    }
    dirs::home_dir()
        .map(|home| home.join("git").join("maia"))
        .ok_or_else(|| {
            MaiaError::PathError(format!(
                "cannot determine a root: pass --root or set {}",
                ROOT_ENV
            ))
        })
}
