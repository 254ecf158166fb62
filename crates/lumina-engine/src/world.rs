//! The [`World`]: entity registry, system schedule and physics scene driven
//! one frame at a time.
//!
//! Each [`update`](World::update):
//!
//! 1. Ages debug lines and advances the clock by the frame delta.
//! 2. Runs `FrameStart..=FrameEnd` in order, or only `Paused` while paused.
//! 3. Before the `DuringPhysics` systems, and only between
//!    [`begin_play`](World::begin_play) and [`end_play`](World::end_play),
//!    creates bodies for newly described entities and runs the fixed-step
//!    physics pass.
//! 4. Removes physics bodies whose entities were destroyed this frame.
//!
//! Systems within a stage run synchronously in schedule order. Anything they
//! fan out to the worker pool has joined before they return.
//!
//! # Example
//!
//! ```
//! use lumina_engine::prelude::*;
//!
//! let engine = Engine::builder().worker_threads(1).build().unwrap();
//! let mut world = engine.create_world("demo");
//! world.initialize();
//! let crate_entity = world.construct_entity("Crate", Transform::default());
//! world.update(1.0 / 60.0).unwrap();
//! assert!(world.registry().valid(crate_entity));
//! assert_eq!(world.tick_count(), 1);
//! world.shutdown();
//! ```

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use lumina_ecs::component::ComponentRegistry;
use lumina_ecs::entity::Entity;
use lumina_ecs::registry::Registry;
use lumina_ecs::signal::Dispatcher;
use lumina_script::SharedScript;

use crate::components::{NeedsTransformUpdate, PhysicsBodyHandle, Transform};
use crate::context::{FrameState, SystemContext};
use crate::debug_draw::{Color, LineBatcher, RenderSink};
use crate::factory::SystemFactoryRegistry;
use crate::physics::sync::{create_pending_bodies, BodyRemovalQueue, PhysicsPass, PhysicsPassReport};
use crate::physics::{FixedStepper, PhysicsScene, RayCastSettings, RayHit, SphereCastSettings};
use crate::schedule::SystemSchedule;
use crate::stage::UpdateStage;
use crate::system::{EntitySystem, NativeSystem, SystemVariant};
use crate::workers::WorkerPool;
use crate::EngineError;

// ---------------------------------------------------------------------------
// WorldResources
// ---------------------------------------------------------------------------

/// Engine-owned collaborators every world borrows.
#[derive(Debug, Clone)]
pub struct WorldResources {
    pub components: Rc<ComponentRegistry>,
    pub factories: Rc<SystemFactoryRegistry>,
    pub workers: Arc<WorkerPool>,
}

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timing of the last frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// Wall-clock time per system call, in execution order.
    pub system_times: Vec<(Rc<str>, UpdateStage, Duration)>,
    pub physics: PhysicsPassReport,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

pub struct World {
    name: String,
    registry: Registry,
    dispatcher: Dispatcher,
    schedule: SystemSchedule,
    physics: Box<dyn PhysicsScene>,
    physics_pass: PhysicsPass,
    lines: LineBatcher,
    resources: WorldResources,
    frame: FrameState,
    paused: bool,
    simulating: bool,
    initialized: bool,
    shut_down: bool,
    removals: BodyRemovalQueue,
    diagnostics: FrameDiagnostics,
}

impl World {
    /// Create a world and register one fresh instance of every factory
    /// system.
    pub fn new(
        name: &str,
        resources: WorldResources,
        physics: Box<dyn PhysicsScene>,
        stepper: FixedStepper,
    ) -> Self {
        let mut registry = Registry::new();
        let removals = BodyRemovalQueue::new();
        removals.connect(&mut registry);

        let mut world = Self {
            name: name.to_owned(),
            registry,
            dispatcher: Dispatcher::new(),
            schedule: SystemSchedule::new(),
            physics,
            physics_pass: PhysicsPass::new(stepper),
            lines: LineBatcher::new(),
            resources,
            frame: FrameState::default(),
            paused: false,
            simulating: false,
            initialized: false,
            shut_down: false,
            removals,
            diagnostics: FrameDiagnostics::default(),
        };
        for system in world.resources.factories.instantiate_all() {
            world.register_native(system);
        }
        tracing::debug!(world = %world.name, systems = world.schedule.len(), "world created");
        world
    }

    fn context(&mut self) -> SystemContext<'_> {
        SystemContext::new(
            self.frame,
            &mut self.registry,
            &mut self.dispatcher,
            self.physics.as_mut(),
            &mut self.lines,
            &self.resources.workers,
            &self.resources.components,
        )
    }

    // -- registration -----------------------------------------------------------

    pub fn register_system<S: EntitySystem + 'static>(&mut self, system: S) -> bool {
        self.register_native(NativeSystem::new(system))
    }

    pub fn register_native(&mut self, system: NativeSystem) -> bool {
        self.register_variant(SystemVariant::Native(system))
    }

    /// Bind a loaded script as a system.
    pub fn register_script(&mut self, script: &SharedScript) -> Result<bool, EngineError> {
        let system = SystemVariant::script(script)?;
        Ok(self.register_variant(system))
    }

    /// Schedule `system`. Registering into an initialized world starts the
    /// system immediately so it never updates before its startup.
    pub fn register_variant(&mut self, system: SystemVariant) -> bool {
        if !self.schedule.register(system.clone()) {
            return false;
        }
        if self.initialized && !self.shut_down {
            system.startup(&mut self.context());
        }
        true
    }

    pub fn systems_for_stage(&self, stage: UpdateStage) -> &[SystemVariant] {
        self.schedule.systems(stage)
    }

    pub fn schedule(&self) -> &SystemSchedule {
        &self.schedule
    }

    // -- lifecycle --------------------------------------------------------------

    /// Start every system once. Later calls do nothing.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.frame.stage = UpdateStage::FrameStart;
        let systems = self.schedule.unique_systems();
        for system in &systems {
            system.startup(&mut self.context());
        }
        tracing::debug!(world = %self.name, systems = systems.len(), "world initialized");
    }

    /// Tear every system down once, stop simulating and drop the schedule.
    /// Later calls do nothing.
    pub fn shutdown(&mut self) {
        if !self.initialized || self.shut_down {
            return;
        }
        self.shut_down = true;
        self.frame.stage = UpdateStage::FrameEnd;
        let systems = self.schedule.unique_systems();
        for system in &systems {
            system.teardown(&mut self.context());
        }
        self.end_play();
        self.schedule.clear();
        tracing::debug!(world = %self.name, systems = systems.len(), "world shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized && !self.shut_down
    }

    /// Run one frame of `frame_delta` seconds.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotInitialized`] before [`initialize`](Self::initialize)
    /// or after [`shutdown`](Self::shutdown).
    pub fn update(&mut self, frame_delta: f64) -> Result<(), EngineError> {
        if !self.is_initialized() {
            return Err(EngineError::NotInitialized);
        }
        let started = Instant::now();
        self.diagnostics = FrameDiagnostics::default();

        let dt = if frame_delta.is_finite() { frame_delta.max(0.0) } else { 0.0 };
        self.lines.age(dt as f32);
        self.frame.delta_time = dt;
        self.frame.time += dt;

        let stages: &[UpdateStage] = if self.paused {
            &[UpdateStage::Paused]
        } else {
            &UpdateStage::RUNNING
        };
        for &stage in stages {
            self.run_stage(stage);
        }

        self.removals.drain(self.physics.as_mut());
        self.frame.tick += 1;
        self.diagnostics.total_time = started.elapsed();
        Ok(())
    }

    fn run_stage(&mut self, stage: UpdateStage) {
        self.frame.stage = stage;
        if stage == UpdateStage::DuringPhysics && self.simulating {
            self.removals.drain(self.physics.as_mut());
            // Entities constructed mid-play join the simulation here.
            create_pending_bodies(&mut self.registry, self.physics.as_mut());
            self.diagnostics.physics = self.physics_pass.run(
                &mut self.registry,
                self.physics.as_mut(),
                &self.resources.workers,
                self.frame.delta_time,
            );
        }

        let Self {
            schedule,
            registry,
            dispatcher,
            physics,
            lines,
            resources,
            frame,
            diagnostics,
            ..
        } = self;
        let mut ctx = SystemContext::new(
            *frame,
            registry,
            dispatcher,
            physics.as_mut(),
            lines,
            &resources.workers,
            &resources.components,
        );
        for system in schedule.systems(stage) {
            let started = Instant::now();
            system.update(&mut ctx);
            diagnostics
                .system_times
                .push((system.shared_name(), stage, started.elapsed()));
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            tracing::debug!(world = %self.name, paused, "pause toggled");
        }
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Start simulating: create bodies for every entity that describes one
    /// and reset the accumulator. Returns how many bodies were created.
    pub fn begin_play(&mut self) -> usize {
        if self.simulating {
            return 0;
        }
        let created = create_pending_bodies(&mut self.registry, self.physics.as_mut());
        self.physics_pass.stepper.reset();
        self.simulating = true;
        tracing::debug!(world = %self.name, bodies = created, "begin play");
        created
    }

    /// Stop simulating: drop every body and its handle component and discard
    /// the accumulator.
    pub fn end_play(&mut self) {
        if !self.simulating {
            return;
        }
        for entity in self.registry.entities_with::<(PhysicsBodyHandle,)>() {
            self.registry.remove::<PhysicsBodyHandle>(entity);
        }
        self.removals.discard();
        self.physics.clear();
        self.physics_pass.stepper.reset();
        self.simulating = false;
        tracing::debug!(world = %self.name, "end play");
    }

    pub fn is_simulating(&self) -> bool {
        self.simulating
    }

    // -- entities -----------------------------------------------------------------

    pub fn construct_entity(&mut self, name: &str, transform: Transform) -> Entity {
        self.context().construct_entity(name, transform)
    }

    pub fn copy_entity(&mut self, source: Entity, filter: impl Fn(&str) -> bool) -> Option<Entity> {
        self.context().copy_entity(source, filter)
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        self.context().destroy_entity(entity)
    }

    pub fn attach(&mut self, child: Entity, parent: Entity) -> bool {
        self.context().attach(child, parent)
    }

    pub fn set_entity_transform(&mut self, entity: Entity, transform: Transform) -> bool {
        self.context().set_entity_transform(entity, transform)
    }

    pub fn translate_entity(&mut self, entity: Entity, offset: Vec3) -> bool {
        self.context().translate_entity(entity, offset)
    }

    pub fn mark_transform_dirty(&mut self, entity: Entity) -> bool {
        self.context().mark_transform_dirty(entity)
    }

    // -- queries and debug draw ---------------------------------------------------

    pub fn cast_ray(&mut self, settings: &RayCastSettings) -> Option<RayHit> {
        self.context().cast_ray(settings)
    }

    pub fn cast_sphere(&mut self, settings: &SphereCastSettings) -> Vec<RayHit> {
        self.context().cast_sphere(settings)
    }

    pub fn draw_line(&mut self, start: Vec3, end: Vec3, color: Color, duration: f32) {
        self.lines.draw_line(start, end, color, duration);
    }

    pub fn draw_box(&mut self, center: Vec3, half_extent: Vec3, rotation: Quat, color: Color, duration: f32) {
        self.lines.draw_box(center, half_extent, rotation, color, duration);
    }

    pub fn draw_sphere(&mut self, center: Vec3, radius: f32, color: Color, duration: f32) {
        self.lines.draw_sphere(center, radius, color, duration);
    }

    pub fn draw_arrow(&mut self, start: Vec3, direction: Vec3, length: f32, color: Color, duration: f32) {
        self.lines.draw_arrow(start, direction, length, color, duration);
    }

    /// Hand dirty transforms (consuming their flag) and live debug lines to
    /// `sink`. Returns how many transforms were sent.
    pub fn render(&mut self, sink: &mut dyn RenderSink) -> usize {
        let dirty = self.registry.entities_with::<(Transform, NeedsTransformUpdate)>();
        for &entity in &dirty {
            if let Some(transform) = self.registry.get::<Transform>(entity) {
                sink.transform_updated(entity, transform);
            }
            self.registry.remove::<NeedsTransformUpdate>(entity);
        }
        for line in self.lines.lines() {
            sink.debug_line(line);
        }
        dirty.len()
    }

    // -- duplication --------------------------------------------------------------

    /// Copy every entity and component into a new, uninitialized world.
    ///
    /// Factory systems are instantiated afresh and script systems re-bound;
    /// systems registered directly are not carried over. Physics bodies are
    /// not copied: the copy creates its own on [`begin_play`](Self::begin_play).
    pub fn duplicate(&self, name: &str) -> World {
        let (mut registry, map) = self.registry.duplicate();
        for entity in registry.entities_with::<(PhysicsBodyHandle,)>() {
            registry.remove::<PhysicsBodyHandle>(entity);
        }

        let mut copy = World::new(
            name,
            self.resources.clone(),
            self.physics.empty_scene(),
            self.physics_pass.stepper.clone(),
        );
        copy.registry = registry;
        copy.removals.connect(&mut copy.registry);
        copy.physics_pass.stepper.reset();
        copy.paused = self.paused;

        for system in self.schedule.unique_systems() {
            if let SystemVariant::Script(_) = system {
                copy.register_variant(system);
            }
        }
        tracing::debug!(world = %copy.name, source = %self.name, entities = map.len(), "world duplicated");
        copy
    }

    // -- accessors ----------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn physics(&self) -> &dyn PhysicsScene {
        self.physics.as_ref()
    }

    pub fn physics_mut(&mut self) -> &mut dyn PhysicsScene {
        self.physics.as_mut()
    }

    pub fn stepper(&self) -> &FixedStepper {
        &self.physics_pass.stepper
    }

    pub fn lines(&self) -> &LineBatcher {
        &self.lines
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.resources.components
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.resources.workers
    }

    pub fn frame(&self) -> FrameState {
        self.frame
    }

    pub fn delta_time(&self) -> f64 {
        self.frame.delta_time
    }

    pub fn time(&self) -> f64 {
        self.frame.time
    }

    pub fn tick_count(&self) -> u64 {
        self.frame.tick
    }

    pub fn diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("entities", &self.registry.len())
            .field("systems", &self.schedule.len())
            .field("tick", &self.frame.tick)
            .field("paused", &self.paused)
            .field("simulating", &self.simulating)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
