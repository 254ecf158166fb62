//! Script module loading, validation and hook execution.
//!
//! A [`ScriptModule`] is one instantiated Wasm module acting as an entity
//! system. It must export `execute` and `priority`; `init` and `shutdown`
//! are optional. Every hook call gets a fresh fuel budget, so a runaway
//! script traps with [`ScriptError::OutOfFuel`] instead of stalling the
//! frame.

use wasmtime::{Engine, Instance, Linker, Module, Store, StoreLimitsBuilder};

use crate::host_api::HostState;
use crate::ScriptError;

/// Export called every frame for each stage the script is enabled in.
pub const EXECUTE_EXPORT: &str = "execute";
/// `priority(stage: i32) -> i32`; a negative result disables the stage.
pub const PRIORITY_EXPORT: &str = "priority";
pub const INIT_EXPORT: &str = "init";
pub const SHUTDOWN_EXPORT: &str = "shutdown";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sandbox limits applied to every script.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Fuel granted per hook call. Default: 1,000,000.
    pub fuel_per_call: u64,
    /// Maximum linear memory per script. Default: 16 MiB.
    pub memory_limit_bytes: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            fuel_per_call: 1_000_000,
            memory_limit_bytes: 16 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptModule
// ---------------------------------------------------------------------------

pub struct ScriptModule {
    name: String,
    store: Store<HostState>,
    instance: Instance,
    config: ScriptConfig,
    has_init: bool,
    has_shutdown: bool,
}

impl ScriptModule {
    /// Compile and instantiate `bytes` (binary Wasm or WAT) against `linker`.
    ///
    /// # Errors
    ///
    /// - [`ScriptError::Compile`] if the bytes are not valid Wasm/WAT.
    /// - [`ScriptError::MissingExport`] if `execute` or `priority` is absent.
    /// - [`ScriptError::Runtime`] if instantiation fails (e.g. unknown imports).
    pub fn instantiate(
        name: &str,
        engine: &Engine,
        linker: &Linker<HostState>,
        config: &ScriptConfig,
        bytes: &[u8],
    ) -> Result<Self, ScriptError> {
        let module = Module::new(engine, bytes).map_err(|e| ScriptError::Compile {
            script: name.to_owned(),
            details: format!("{e}"),
        })?;

        for required in [EXECUTE_EXPORT, PRIORITY_EXPORT] {
            if !module.exports().any(|export| export.name() == required) {
                return Err(ScriptError::MissingExport {
                    script: name.to_owned(),
                    export: required.to_owned(),
                });
            }
        }
        let has_init = module.exports().any(|e| e.name() == INIT_EXPORT);
        let has_shutdown = module.exports().any(|e| e.name() == SHUTDOWN_EXPORT);

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.memory_limit_bytes)
            .build();
        let mut store = Store::new(engine, HostState::new(limits));
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(config.fuel_per_call)
            .map_err(|e| ScriptError::Runtime(format!("failed to set fuel: {e}")))?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| ScriptError::Runtime(format!("failed to instantiate '{name}': {e}")))?;

        tracing::debug!(
            script = name,
            has_init,
            has_shutdown,
            fuel_per_call = config.fuel_per_call,
            "script instantiated"
        );

        Ok(Self {
            name: name.to_owned(),
            store,
            instance,
            config: config.clone(),
            has_init,
            has_shutdown,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn host_state(&self) -> &HostState {
        self.store.data()
    }

    pub fn host_state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    pub fn fuel_remaining(&self) -> u64 {
        self.store.get_fuel().unwrap_or(0)
    }

    /// Ask the script which priority it wants for each of `stage_count`
    /// stages. `None` means the stage is disabled; answers above 254 are
    /// clamped since 255 is reserved for "disabled".
    pub fn declared_priorities(&mut self, stage_count: usize) -> Result<Vec<Option<u8>>, ScriptError> {
        let func = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, PRIORITY_EXPORT)
            .map_err(|e| {
                ScriptError::Runtime(format!("'{}': bad priority() signature: {e}", self.name))
            })?;
        let mut out = Vec::with_capacity(stage_count);
        for stage in 0..stage_count {
            self.reset_fuel()?;
            let answer = func
                .call(&mut self.store, stage as i32)
                .map_err(|e| self.classify_trap(e))?;
            out.push((answer >= 0).then(|| answer.min(254) as u8));
        }
        Ok(out)
    }

    /// Run `init` if exported. Returns fuel consumed.
    pub fn call_init(&mut self) -> Result<u64, ScriptError> {
        if !self.has_init {
            return Ok(0);
        }
        self.call_unit(INIT_EXPORT)
    }

    /// Run `execute`. Returns fuel consumed.
    pub fn call_execute(&mut self) -> Result<u64, ScriptError> {
        self.call_unit(EXECUTE_EXPORT)
    }

    /// Run `shutdown` if exported. Returns fuel consumed.
    pub fn call_shutdown(&mut self) -> Result<u64, ScriptError> {
        if !self.has_shutdown {
            return Ok(0);
        }
        self.call_unit(SHUTDOWN_EXPORT)
    }

    /// Call an exported `() -> i32` function. Fuel is reset first.
    pub fn call_i32_export(&mut self, export: &str) -> Result<i32, ScriptError> {
        self.reset_fuel()?;
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, export)
            .map_err(|e| ScriptError::Runtime(format!("failed to resolve export '{export}': {e}")))?;
        func.call(&mut self.store, ())
            .map_err(|e| self.classify_trap(e))
    }

    // -- internal ------------------------------------------------------------

    fn call_unit(&mut self, export: &str) -> Result<u64, ScriptError> {
        self.reset_fuel()?;
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, export)
            .map_err(|e| ScriptError::Runtime(format!("failed to resolve {export}(): {e}")))?;
        func.call(&mut self.store, ())
            .map_err(|e| self.classify_trap(e))?;

        let remaining = self
            .store
            .get_fuel()
            .map_err(|e| ScriptError::Runtime(format!("failed to read fuel: {e}")))?;
        let consumed = self.config.fuel_per_call.saturating_sub(remaining);
        tracing::trace!(script = %self.name, export, fuel_consumed = consumed, "hook completed");
        Ok(consumed)
    }

    fn reset_fuel(&mut self) -> Result<(), ScriptError> {
        self.store
            .set_fuel(self.config.fuel_per_call)
            .map_err(|e| ScriptError::Runtime(format!("failed to set fuel: {e}")))
    }

    fn classify_trap(&self, error: anyhow::Error) -> ScriptError {
        let trap = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<wasmtime::Trap>())
            .copied();
        match trap {
            Some(wasmtime::Trap::OutOfFuel) => ScriptError::OutOfFuel {
                script: self.name.clone(),
                budget: self.config.fuel_per_call,
            },
            Some(_) => ScriptError::Trap {
                script: self.name.clone(),
                details: format!("{error}"),
            },
            None => ScriptError::Runtime(format!("'{}': {error}", self.name)),
        }
    }
}

impl std::fmt::Debug for ScriptModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptModule")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_init", &self.has_init)
            .field("has_shutdown", &self.has_shutdown)
            .finish_non_exhaustive()
    }
}
