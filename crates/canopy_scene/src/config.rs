//! # Scene Runtime Configuration
//!
//! Tunables live in TOML files loaded once at startup, not in code.
//!
//! ```toml
//! initial_capacity = 4096
//!
//! [disposal]
//! queue_capacity = 8192
//! ```

use serde::{Deserialize, Serialize};

use canopy_core::DisposalConfig;

use crate::error::{SceneError, SceneResult};

/// Configuration for a [`SceneGraph`](crate::graph::SceneGraph).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Arena slots reserved up front. The arena grows past this on
    /// demand; the hint only avoids early reallocation churn.
    pub initial_capacity: usize,
    /// Disposal queue tunables.
    pub disposal: DisposalConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            disposal: DisposalConfig::default(),
        }
    }
}

impl SceneConfig {
    /// Production config: sized for large scenes with teardown bursts.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            initial_capacity: 4096,
            disposal: DisposalConfig::production(),
        }
    }

    /// Parses a config from TOML text.
    ///
    /// Missing fields take their defaults, so a partial file is valid.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::InvalidConfig`] if the text is not valid
    /// TOML for this schema.
    pub fn from_toml_str(text: &str) -> SceneResult<Self> {
        toml::from_str(text).map_err(|error| SceneError::InvalidConfig(error.to_string()))
    }
}
