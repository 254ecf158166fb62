//! [`ScriptHost`]: owner of the Wasmtime engine, the shared linker and every
//! loaded script.
//!
//! The host keeps the only strong reference to each [`ScriptModule`]. Script
//! systems registered with a world hold weak references, so unloading a
//! script turns its system into a logged no-op instead of a dangling call.

use std::cell::RefCell;
use std::rc::Rc;

use wasmtime::{Engine, Linker};

use crate::host_api::{register_host_api, HostState};
use crate::module::{ScriptConfig, ScriptModule};
use crate::ScriptError;

pub type SharedScript = Rc<RefCell<ScriptModule>>;

pub struct ScriptHost {
    engine: Engine,
    linker: Linker<HostState>,
    config: ScriptConfig,
    scripts: Vec<SharedScript>,
}

impl ScriptHost {
    pub fn new(config: ScriptConfig) -> Result<Self, ScriptError> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.consume_fuel(true);
        let engine = Engine::new(&engine_config)
            .map_err(|e| ScriptError::Runtime(format!("failed to create Wasmtime engine: {e}")))?;

        let mut linker = Linker::new(&engine);
        register_host_api(&mut linker)
            .map_err(|e| ScriptError::Runtime(format!("failed to register host API: {e}")))?;

        Ok(Self {
            engine,
            linker,
            config,
            scripts: Vec::new(),
        })
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Load a script. A script with the same name is replaced; systems bound
    /// to the old instance stop running.
    pub fn load(&mut self, name: &str, bytes: &[u8]) -> Result<SharedScript, ScriptError> {
        let module = ScriptModule::instantiate(name, &self.engine, &self.linker, &self.config, bytes)?;
        let shared = Rc::new(RefCell::new(module));
        if self.unload(name) {
            tracing::info!(script = name, "script reloaded");
        }
        self.scripts.push(Rc::clone(&shared));
        Ok(shared)
    }

    /// Drop the host's reference to `name`. Returns `false` if not loaded.
    pub fn unload(&mut self, name: &str) -> bool {
        let before = self.scripts.len();
        self.scripts.retain(|s| s.borrow().name() != name);
        self.scripts.len() != before
    }

    pub fn get(&self, name: &str) -> Option<SharedScript> {
        self.scripts
            .iter()
            .find(|s| s.borrow().name() == name)
            .cloned()
    }

    /// Loaded scripts in load order.
    pub fn scripts(&self) -> &[SharedScript] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("config", &self.config)
            .field("scripts", &self.scripts.len())
            .finish_non_exhaustive()
    }
}
