//! Build configuration.
//!
//! [`BuildConfig`] is what callers hand to `build()`. Every field has a
//! default, so a partial JSON object (or none at all) is a valid config.
//! [`BuildConfig::from_env`] overlays `RPGEN_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// How a per-attempt timeout is classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    /// Consumes an attempt, like a failing test.
    #[default]
    Behavioral,
    /// Consumes the environment budget instead.
    Environment,
}

/// Where the boundary between a bad candidate and bad infrastructure lies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictPolicy {
    pub timeout: TimeoutClass,
    /// Treat verifier environment errors as behavioral failures.
    pub environment_as_behavioral: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum synthesize+verify rounds per node.
    pub max_retries: u32,
    /// Environment retries per node, separate from `max_retries`.
    pub max_environment_retries: u32,
    /// Nodes in flight at once.
    pub max_concurrency: usize,
    pub synthesis_timeout_secs: u64,
    pub verification_timeout_secs: u64,
    /// Ancestor depth included in a repair context.
    pub context_depth: usize,
    /// Non-structural related nodes included in a repair context.
    pub related_limit: usize,
    /// Characters of a dependency's generated content quoted in a repair
    /// context.
    pub excerpt_chars: usize,
    pub verdict_policy: VerdictPolicy,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            max_retries: 8,
            max_environment_retries: 2,
            max_concurrency: 4,
            synthesis_timeout_secs: 120,
            verification_timeout_secs: 300,
            context_depth: 2,
            related_limit: 5,
            excerpt_chars: 2000,
            verdict_policy: VerdictPolicy::default(),
        }
    }
}

impl BuildConfig {
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification_timeout_secs)
    }

    /// Defaults overlaid with `RPGEN_MAX_RETRIES`, `RPGEN_MAX_ENV_RETRIES`,
    /// `RPGEN_MAX_CONCURRENCY`, `RPGEN_SYNTH_TIMEOUT_SECS` and
    /// `RPGEN_VERIFY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, BuildError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, BuildError> {
        let mut config = BuildConfig::default();
        overlay(&lookup, "RPGEN_MAX_RETRIES", &mut config.max_retries)?;
        overlay(&lookup, "RPGEN_MAX_ENV_RETRIES", &mut config.max_environment_retries)?;
        overlay(&lookup, "RPGEN_MAX_CONCURRENCY", &mut config.max_concurrency)?;
        overlay(&lookup, "RPGEN_SYNTH_TIMEOUT_SECS", &mut config.synthesis_timeout_secs)?;
        overlay(&lookup, "RPGEN_VERIFY_TIMEOUT_SECS", &mut config.verification_timeout_secs)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_retries == 0 {
            return Err(BuildError::Config("max_retries must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(BuildError::Config("max_concurrency must be at least 1".into()));
        }
        if self.synthesis_timeout_secs == 0 || self.verification_timeout_secs == 0 {
            return Err(BuildError::Config("timeouts must be at least one second".into()));
        }
        Ok(())
    }
}

fn overlay<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), BuildError> {
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| BuildError::Config(format!("{key}: cannot parse '{raw}'")))?;
    }
    Ok(())
}
