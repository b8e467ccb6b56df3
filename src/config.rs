//! Configuration for lamad-progress

use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

fn default_mastery_threshold() -> f64 {
    0.95
}

fn default_event_capacity() -> usize {
    1024
}

/// Bayesian knowledge tracing parameters for mastery pathways
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BktParams {
    /// Prior probability the student already knows the skill
    #[serde(default = "default_p_init")]
    pub p_init: f64,

    /// Probability of learning the skill on each opportunity
    #[serde(default = "default_p_transit")]
    pub p_transit: f64,

    /// Probability of a correct answer despite not knowing
    #[serde(default = "default_p_guess")]
    pub p_guess: f64,

    /// Probability of an incorrect answer despite knowing
    #[serde(default = "default_p_slip")]
    pub p_slip: f64,
}

fn default_p_init() -> f64 {
    0.2
}

fn default_p_transit() -> f64 {
    0.25
}

fn default_p_guess() -> f64 {
    0.2
}

fn default_p_slip() -> f64 {
    0.1
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_init: default_p_init(),
            p_transit: default_p_transit(),
            p_guess: default_p_guess(),
            p_slip: default_p_slip(),
        }
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Confidence a child must reach before a mastery pathway counts it
    #[serde(default = "default_mastery_threshold")]
    pub mastery_threshold: f64,

    /// Event bus broadcast capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Knowledge tracing parameters for mastery pathways
    #[serde(default)]
    pub bkt: BktParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mastery_threshold: default_mastery_threshold(),
            event_capacity: default_event_capacity(),
            bkt: BktParams::default(),
        }
    }
}

impl Config {
    /// Parse from TOML, falling back to field defaults for anything omitted
    pub fn from_toml(s: &str) -> Result<Self, ProgressError> {
        toml::from_str(s).map_err(|e| ProgressError::Config(format!("Failed to parse config: {}", e)))
    }
}
