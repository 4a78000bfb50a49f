//! Pipeline settings loaded from TOML.
//!
//! ```toml
//! sale_draft_ttl_days = 7
//! default_days_supply = 30
//! ```
//!
//! Both keys are optional; missing keys take the defaults above.

use std::path::Path;

use serde::{Deserialize, Serialize};

use rxflow_contracts::error::{RxError, RxResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// How long a sale draft created at release stays open at the counter.
    pub sale_draft_ttl_days: i64,
    /// Refill interval used when no line carries a days supply.
    pub default_days_supply: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sale_draft_ttl_days: 7,
            default_days_supply: 30,
        }
    }
}

impl PipelineSettings {
    pub fn from_toml_str(s: &str) -> RxResult<Self> {
        let settings: PipelineSettings = toml::from_str(s).map_err(|e| RxError::Config {
            reason: format!("failed to parse pipeline settings TOML: {}", e),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> RxResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RxError::Config {
            reason: format!("failed to read settings file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> RxResult<()> {
        if self.sale_draft_ttl_days <= 0 {
            return Err(RxError::Config {
                reason: "sale_draft_ttl_days must be positive".to_string(),
            });
        }
        if self.default_days_supply == 0 {
            return Err(RxError::Config {
                reason: "default_days_supply must be positive".to_string(),
            });
        }
        Ok(())
    }
}
