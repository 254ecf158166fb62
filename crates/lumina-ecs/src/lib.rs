//! Lumina ECS -- sparse-set entity registry with hooks, a by-name component
//! capability table and a typed event dispatcher.
//!
//! Components live in one [`SparseSet`](storage::SparseSet) per type. Entities
//! are generational handles, so a handle that outlives its entity is detected
//! on every access instead of aliasing a recycled slot.
//!
//! # Quick Start
//!
//! ```
//! use lumina_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! let mut registry = Registry::new();
//! let e = registry.create();
//! registry.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! registry.insert(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! for entity in registry.entities_with::<(Position, Velocity)>() {
//!     let v = registry.get::<Velocity>(entity).cloned().unwrap();
//!     let p = registry.get_mut::<Position>(entity).unwrap();
//!     p.x += v.dx;
//! }
//! assert_eq!(registry.get::<Position>(e), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod registry;
pub mod signal;
pub mod storage;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The handle is stale or was never allocated by this registry.
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::Entity },

    /// The entity is alive but does not carry the requested component.
    #[error("entity {entity:?} has no '{component}' component")]
    MissingComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    /// A component name was looked up that nothing registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    #[error("failed to serialize component '{component}': {details}")]
    ComponentSerialization { component: String, details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::component::{Component, ComponentOps, ComponentRegistry};
    pub use crate::entity::{Entity, EntityAllocator, EntityMap};
    pub use crate::registry::{ComponentSet, Registry};
    pub use crate::signal::{Connection, Dispatcher, ObserverList};
    pub use crate::storage::SparseSet;
    pub use crate::EcsError;
}
