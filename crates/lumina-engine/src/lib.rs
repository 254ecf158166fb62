//! Lumina Engine -- staged world simulation on top of [`lumina_ecs`].
//!
//! A [`World`](world::World) runs its systems once per frame through a fixed
//! sequence of [`UpdateStage`](stage::UpdateStage)s, ordered inside each
//! stage by [`UpdatePriority`](stage::UpdatePriority). Systems are native
//! Rust ([`EntitySystem`](system::EntitySystem)) or Wasm scripts hosted by
//! [`lumina_script`]. Physics is delegated to rapier3d behind the
//! [`PhysicsScene`](physics::PhysicsScene) seam and stepped by a
//! fixed-timestep accumulator during the `DuringPhysics` stage.
//!
//! # Quick Start
//!
//! ```
//! use lumina_engine::prelude::*;
//!
//! struct Drift;
//!
//! impl EntitySystem for Drift {
//!     fn priority_list(&self) -> UpdatePriorityList {
//!         UpdatePriorityList::new().with(UpdateStage::PrePhysics)
//!     }
//!
//!     fn update(&mut self, ctx: &mut SystemContext<'_>) {
//!         let step = Vec3::X * ctx.delta_time() as f32;
//!         for entity in ctx.registry().entities_with::<(Transform,)>() {
//!             ctx.translate_entity(entity, step);
//!         }
//!     }
//! }
//!
//! let engine = Engine::builder().worker_threads(1).build().unwrap();
//! let mut world = engine.create_world("demo");
//! assert!(world.register_system(Drift));
//! let e = world.construct_entity("mover", Transform::default());
//!
//! world.initialize();
//! world.update(0.5).unwrap();
//! assert_eq!(world.registry().get::<Transform>(e).unwrap().location, Vec3::new(0.5, 0.0, 0.0));
//! world.shutdown();
//! ```

#![deny(unsafe_code)]

pub mod components;
pub mod config;
pub mod context;
pub mod debug_draw;
pub mod engine;
pub mod factory;
pub mod logging;
pub mod physics;
pub mod schedule;
pub mod stage;
pub mod system;
pub mod systems;
pub mod workers;
pub mod world;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use lumina_ecs;
pub use lumina_script;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Script(#[from] lumina_script::ScriptError),

    #[error(transparent)]
    Ecs(#[from] lumina_ecs::EcsError),

    #[error("worker pool could not be started: {0}")]
    WorkerPool(String),

    /// The world was updated before `initialize` or after `shutdown`.
    #[error("world is not initialized")]
    NotInitialized,
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use lumina_ecs::prelude::*;

    pub use glam::{Quat, Vec2, Vec3};

    pub use crate::components::{
        AnimationPlayback, BodyType, BoxCollider, CharacterController, CharacterMovement,
        CharacterPhysics, Name, NeedsTransformUpdate, PhysicsBodyHandle, Relationship, RigidBody,
        SphereCollider, Transform,
    };
    pub use crate::config::{EngineConfig, PhysicsConfig};
    pub use crate::context::{FrameState, SystemContext};
    pub use crate::debug_draw::{Color, DebugLine, LineBatcher, RecordingSink, RenderSink};
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::factory::SystemFactoryRegistry;
    pub use crate::physics::{
        BodyId, BodyKind, FixedStepper, GroundState, PhysicsScene, RapierScene, RayCastSettings,
        RayHit, SphereCastSettings,
    };
    pub use crate::schedule::SystemSchedule;
    pub use crate::stage::{UpdatePriority, UpdatePriorityList, UpdateStage};
    pub use crate::system::{EntitySystem, NativeSystem, ScriptSystem, SystemVariant};
    pub use crate::systems::AnimationPlaybackSystem;
    pub use crate::workers::WorkerPool;
    pub use crate::world::{FrameDiagnostics, World, WorldResources};
    pub use crate::EngineError;
}
