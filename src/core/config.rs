//! Routing thresholds and loader budgets.
//!
//! Defaults are compiled in; `<root>/claude/routing.toml` may override any
//! field. Every section is optional.

use crate::core::error::MaiaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILE: &str = "claude/routing.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Winning scores below this floor resolve to the `full` domain.
    pub confidence_floor: f64,
    /// Additional regex patterns appended to a domain's built-in set.
    pub extra_patterns: BTreeMap<String, Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.2,
            extra_patterns: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmConfig {
    /// Inclusive.
    pub min_confidence: f64,
    /// Inclusive.
    pub min_complexity: u32,
    /// Exclusive: a query is a capability gap when confidence is strictly below.
    pub gap_confidence: f64,
    pub recommendation_min_gaps: usize,
    pub recommendation_window_days: i64,
    /// Two or more agents at or above this complexity hand off as a swarm.
    pub handoff_complexity: u32,
    pub max_chain_agents: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.60,
            min_complexity: 3,
            gap_confidence: 0.40,
            recommendation_min_gaps: 3,
            recommendation_window_days: 7,
            handoff_complexity: 6,
            max_chain_agents: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    pub loading_threshold: f64,
    pub deep_complexity: u32,
    pub minimum_tokens: usize,
    pub intent_tokens: usize,
    pub deep_tokens: usize,
    pub store_deadline_ms: u64,
    pub recent_phases: usize,
    /// Significant terms needed before an unmatched query earns a keyword search.
    pub search_min_terms: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            loading_threshold: 0.2,
            deep_complexity: 8,
            minimum_tokens: 200,
            intent_tokens: 4_000,
            deep_tokens: 20_000,
            store_deadline_ms: 50,
            recent_phases: 3,
            search_min_terms: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub classifier: ClassifierConfig,
    pub swarm: SwarmConfig,
    pub loader: LoaderConfig,
}

impl RoutingConfig {
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    /// Strict load used by the CLI: a malformed file is an error.
    pub fn load(root: &Path) -> Result<Self, MaiaError> {
        let path = Self::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let config: RoutingConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Lenient load used on the hook path: never fails.
    pub fn load_or_default(root: &Path) -> Self {
        match Self::load(root) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "routing config unusable, falling back to defaults");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), MaiaError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(MaiaError::ConfigError(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )))
            }
        };
        unit("classifier.confidence_floor", self.classifier.confidence_floor)?;
        unit("swarm.min_confidence", self.swarm.min_confidence)?;
        unit("swarm.gap_confidence", self.swarm.gap_confidence)?;
        unit("loader.loading_threshold", self.loader.loading_threshold)?;

        if self.loader.minimum_tokens == 0
            || self.loader.minimum_tokens > self.loader.intent_tokens
            || self.loader.intent_tokens > self.loader.deep_tokens
        {
            return Err(MaiaError::ConfigError(
                "token ceilings must satisfy 0 < minimum <= intent <= deep".to_string(),
            ));
        }
        if self.swarm.recommendation_min_gaps == 0 || self.swarm.recommendation_window_days <= 0 {
            return Err(MaiaError::ConfigError(
                "recommendation window and minimum gap count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
