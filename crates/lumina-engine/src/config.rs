//! Engine configuration.
//!
//! Plain serde structs with defaults. Every field may be omitted from a JSON
//! document; missing fields take their default.
//!
//! ```
//! use lumina_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "physics": { "max_steps": 3 } }"#).unwrap();
//! assert_eq!(config.physics.max_steps, 3);
//! assert_eq!(config.physics.fixed_step, 1.0 / 60.0);
//! ```

use lumina_script::ScriptConfig;

use crate::EngineError;

// ---------------------------------------------------------------------------
// PhysicsConfig
// ---------------------------------------------------------------------------

/// Fixed-timestep physics settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Integration step in seconds. Must be positive and finite.
    pub fixed_step: f64,
    /// Maximum integration steps per frame. Must be at least 1.
    pub max_steps: u32,
    /// Frame deltas above this are clamped before entering the accumulator.
    pub max_frame_delta: f64,
    pub gravity: [f32; 3],
}

impl Default for PhysicsConfig {
    /// 60 Hz, at most 5 steps per frame, 0.25 s frame cap, earth gravity.
    fn default() -> Self {
        Self {
            fixed_step: 1.0 / 60.0,
            max_steps: 5,
            max_frame_delta: 0.25,
            gravity: [0.0, -9.81, 0.0],
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub physics: PhysicsConfig,
    pub scripting: ScriptConfig,
    /// Hardware threads left out of the worker pool (for the main and
    /// render threads). The pool always keeps at least one worker.
    pub reserved_worker_threads: usize,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let physics = &self.physics;
        if !(physics.fixed_step.is_finite() && physics.fixed_step > 0.0) {
            return Err(EngineError::Config(format!(
                "physics.fixed_step must be positive and finite, got {}",
                physics.fixed_step
            )));
        }
        if physics.max_steps == 0 {
            return Err(EngineError::Config("physics.max_steps must be at least 1".to_owned()));
        }
        if !(physics.max_frame_delta.is_finite() && physics.max_frame_delta > 0.0) {
            return Err(EngineError::Config(format!(
                "physics.max_frame_delta must be positive and finite, got {}",
                physics.max_frame_delta
            )));
        }
        if physics.gravity.iter().any(|g| !g.is_finite()) {
            return Err(EngineError::Config("physics.gravity must be finite".to_owned()));
        }
        if self.scripting.fuel_per_call == 0 {
            return Err(EngineError::Config("scripting.fuel_per_call must be non-zero".to_owned()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
