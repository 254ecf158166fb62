//! Application root.
//!
//! [`Engine`] owns everything shared between worlds: the configuration, the
//! component capability registry, the system factories, the script host and
//! the worker pool. It is assembled once through [`EngineBuilder`] and then
//! hands out worlds; nothing is reachable through globals.

use std::rc::Rc;
use std::sync::Arc;

use glam::Vec3;
use lumina_ecs::component::{Component, ComponentRegistry};
use lumina_script::{ScriptHost, SharedScript};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::components::register_builtin_components;
use crate::config::EngineConfig;
use crate::factory::SystemFactoryRegistry;
use crate::physics::{FixedStepper, PhysicsScene, RapierScene};
use crate::system::EntitySystem;
use crate::systems::AnimationPlaybackSystem;
use crate::workers::WorkerPool;
use crate::world::{World, WorldResources};
use crate::EngineError;

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    config: EngineConfig,
    worker_threads: Option<usize>,
    components: ComponentRegistry,
    factories: SystemFactoryRegistry,
}

impl EngineBuilder {
    fn new() -> Self {
        let mut components = ComponentRegistry::new();
        register_builtin_components(&mut components);
        let mut factories = SystemFactoryRegistry::new();
        factories.register("animation_playback", || AnimationPlaybackSystem);
        Self {
            config: EngineConfig::default(),
            worker_threads: None,
            components,
            factories,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use exactly `threads` workers instead of sizing the pool from
    /// `reserved_worker_threads`.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Make `T` reachable by name from scripts and entity copies.
    pub fn register_component<T>(mut self, name: &str) -> Self
    where
        T: Component + Serialize + DeserializeOwned,
    {
        self.components.register::<T>(name);
        self
    }

    /// Every world gets a fresh instance of the system `make` builds.
    pub fn register_system<S, F>(mut self, name: &str, make: F) -> Self
    where
        S: EntitySystem + 'static,
        F: Fn() -> S + 'static,
    {
        self.factories.register(name, make);
        self
    }

    /// # Errors
    ///
    /// [`EngineError::Config`] for an invalid configuration,
    /// [`EngineError::Script`] if the script runtime cannot start and
    /// [`EngineError::WorkerPool`] if the thread pool cannot be built.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let workers = match self.worker_threads {
            Some(threads) => WorkerPool::new(threads)?,
            None => WorkerPool::from_reserved(self.config.reserved_worker_threads)?,
        };
        let scripts = ScriptHost::new(self.config.scripting.clone())?;
        tracing::info!(
            workers = workers.threads(),
            components = self.components.len(),
            factories = self.factories.len(),
            "engine started"
        );
        Ok(Engine {
            config: self.config,
            resources: WorldResources {
                components: Rc::new(self.components),
                factories: Rc::new(self.factories),
                workers: Arc::new(workers),
            },
            scripts,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    resources: WorldResources,
    scripts: ScriptHost,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// An engine with the default configuration.
    pub fn new() -> Result<Self, EngineError> {
        Self::builder().build()
    }

    /// A world simulated by a [`RapierScene`] with the configured gravity.
    pub fn create_world(&self, name: &str) -> World {
        let gravity = Vec3::from_array(self.config.physics.gravity);
        self.create_world_with_physics(name, Box::new(RapierScene::new(gravity)))
    }

    /// A world simulated by a caller-supplied scene.
    pub fn create_world_with_physics(&self, name: &str, physics: Box<dyn PhysicsScene>) -> World {
        World::new(
            name,
            self.resources.clone(),
            physics,
            FixedStepper::from_config(&self.config.physics),
        )
    }

    /// Load (or reload) a script. Bind it to a world with
    /// [`World::register_script`].
    pub fn load_script(&mut self, name: &str, bytes: &[u8]) -> Result<SharedScript, EngineError> {
        Ok(self.scripts.load(name, bytes)?)
    }

    /// Systems bound to an unloaded script stop running.
    pub fn unload_script(&mut self, name: &str) -> bool {
        self.scripts.unload(name)
    }

    pub fn scripts(&self) -> &ScriptHost {
        &self.scripts
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.resources.components
    }

    pub fn factories(&self) -> &SystemFactoryRegistry {
        &self.resources.factories
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.resources.workers
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("workers", &self.resources.workers)
            .field("scripts", &self.scripts.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
