//! Repository configuration, read from the `repository` section.
//!
//! ```yaml
//! repository:
//!   pagination:
//!     default_page_size: 25
//!     max_page_size: 1000
//!   cache:
//!     default_timeout: 5m
//!     default_mode: absolute
//! ```

use std::time::Duration;

use figment::Figment;
use modkit_spec::{CacheSettings, EvaluatorOptions, ExpirationMode};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Figment key holding [`RepositoryConfig`].
pub const CONFIG_SECTION: &str = "repository";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub pagination: PaginationConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    /// Page size used when a request asks for size 0.
    pub default_page_size: u64,
    /// Hard cap on any requested page size.
    pub max_page_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        let options = EvaluatorOptions::default();
        Self {
            default_page_size: options.default_page_size,
            max_page_size: options.max_page_size,
        }
    }
}

/// Defaults applied to specifications that enable result caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(with = "humantime_duration")]
    pub default_timeout: Duration,
    pub default_mode: ExpirationMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            default_mode: ExpirationMode::Absolute,
        }
    }
}

impl RepositoryConfig {
    /// Extract and validate the `repository` section. A missing section
    /// yields the defaults.
    ///
    /// # Errors
    /// `ConfigError::Load` for malformed values or unknown keys,
    /// `ConfigError::Invalid` for inconsistent sizes.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config = if figment.contains(CONFIG_SECTION) {
            figment.extract_inner::<Self>(CONFIG_SECTION)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `ConfigError::Invalid` when a page size is zero or the default exceeds the cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pagination;
        if p.default_page_size == 0 || p.max_page_size == 0 {
            return Err(ConfigError::Invalid("page sizes must be positive".to_owned()));
        }
        if p.max_page_size < p.default_page_size {
            return Err(ConfigError::Invalid(format!(
                "max_page_size ({}) is smaller than default_page_size ({})",
                p.max_page_size, p.default_page_size
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn evaluator_options(&self) -> EvaluatorOptions {
        EvaluatorOptions {
            default_page_size: self.pagination.default_page_size,
            max_page_size: self.pagination.max_page_size,
        }
    }

    /// Caching hints with the configured mode and timeout filled in where the
    /// specification left them unset. `None` when caching is off.
    #[must_use]
    pub fn effective_cache(&self, settings: Option<CacheSettings>) -> Option<CacheSettings> {
        settings.map(|s| CacheSettings {
            expiration_mode: Some(s.expiration_mode.unwrap_or(self.cache.default_mode)),
            timeout: Some(s.timeout.unwrap_or(self.cache.default_timeout)),
        })
    }
}

/// Durations as humantime strings (`"90s"`, `"5m"`).
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}
