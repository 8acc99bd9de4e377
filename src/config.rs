//! Runtime configuration
//!
//! `VmConfig` sizes every pre-allocated pool and sets the initial timing and
//! transition behaviour. It can be built in code or parsed from TOML:
//!
//! ```toml
//! sample_rate = 44100.0
//! bpm = 128.0
//! crossfade_blocks = 4
//! crossfade_policy = "on_structural_change"
//! blend = "linear"
//! ```
//!
//! Fields that are omitted keep their defaults.

use crate::constants::*;
use crate::error::ConfigError;
use crate::program::Program;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// When a program replacement is blended instead of cut over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadePolicy {
    /// Every replacement after the first load fades, including pure
    /// arithmetic, routing and constant edits.
    #[default]
    Always,
    /// Fade only when the semantic key set of the two programs differs.
    OnStructuralChange,
}

impl CrossfadePolicy {
    pub fn requires_crossfade(self, old: &Program, new: &Program) -> bool {
        match self {
            CrossfadePolicy::Always => true,
            CrossfadePolicy::OnStructuralChange => old.state_keys() != new.state_keys(),
        }
    }
}

/// Gain law used while two programs overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// `cos`/`sin` gains; constant power for uncorrelated material.
    #[default]
    EqualPower,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub sample_rate: f32,
    pub bpm: f32,
    pub crossfade_blocks: u32,
    pub fade_blocks: u32,
    pub crossfade_policy: CrossfadePolicy,
    pub blend: BlendMode,
    pub buffer_count: usize,
    pub state_capacity: usize,
    pub max_params: usize,
    pub max_program_size: usize,
    pub default_slew_ms: f32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bpm: DEFAULT_BPM,
            crossfade_blocks: DEFAULT_CROSSFADE_BLOCKS,
            fade_blocks: DEFAULT_FADE_BLOCKS,
            crossfade_policy: CrossfadePolicy::default(),
            blend: BlendMode::default(),
            buffer_count: MAX_BUFFERS,
            state_capacity: MAX_STATES,
            max_params: MAX_PARAMS,
            max_program_size: MAX_PROGRAM_SIZE,
            default_slew_ms: DEFAULT_SLEW_MS,
        }
    }
}

impl VmConfig {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), sample_rate = config.sample_rate, bpm = config.bpm, "loaded runtime config");
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "bpm must be positive, got {}",
                self.bpm
            )));
        }
        if self.crossfade_blocks > MAX_CROSSFADE_BLOCKS {
            return Err(ConfigError::Invalid(format!(
                "crossfade_blocks must be at most {}, got {}",
                MAX_CROSSFADE_BLOCKS, self.crossfade_blocks
            )));
        }
        if self.buffer_count == 0 || self.buffer_count > BUFFER_UNUSED as usize {
            return Err(ConfigError::Invalid(format!(
                "buffer_count must be in 1..{}, got {}",
                BUFFER_UNUSED, self.buffer_count
            )));
        }
        if self.state_capacity == 0 {
            return Err(ConfigError::Invalid("state_capacity must be nonzero".into()));
        }
        if self.max_params == 0 {
            return Err(ConfigError::Invalid("max_params must be nonzero".into()));
        }
        if self.max_program_size == 0 {
            return Err(ConfigError::Invalid("max_program_size must be nonzero".into()));
        }
        if !(self.default_slew_ms.is_finite() && self.default_slew_ms >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "default_slew_ms must be non-negative, got {}",
                self.default_slew_ms
            )));
        }
        Ok(())
    }
}
