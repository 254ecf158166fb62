//! Component trait and the by-name capability registry.
//!
//! Any `Clone + 'static` type can be stored as a component once it implements
//! [`Component`]. Types that should also be reachable by *name* (scripts,
//! editor tooling, entity copying with a filter) are registered in a
//! [`ComponentRegistry`], which records a [`ComponentOps`] table of plain
//! function pointers monomorphized for that type. The table is populated once
//! at startup by the application root and passed down by reference.

use std::any::TypeId;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entity::{Entity, EntityMap};
use crate::registry::Registry;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Marker for storable component types.
///
/// Components that hold [`Entity`] handles override
/// [`remap_entities`](Self::remap_entities) so world duplication rewrites
/// them to the copied entities.
pub trait Component: Clone + 'static {
    fn remap_entities(&mut self, _map: &EntityMap) {}
}

// ---------------------------------------------------------------------------
// ComponentOps
// ---------------------------------------------------------------------------

/// Type-erased capabilities of one registered component type.
#[derive(Clone, Copy)]
pub struct ComponentOps {
    pub type_id: TypeId,
    pub has: fn(&Registry, Entity) -> bool,
    pub get_json: fn(&Registry, Entity) -> Result<Option<serde_json::Value>, EcsError>,
    pub emplace_json: fn(&mut Registry, Entity, serde_json::Value) -> Result<(), EcsError>,
    pub remove: fn(&mut Registry, Entity) -> bool,
    /// Clone the component from the first entity onto the second.
    pub copy: fn(&mut Registry, Entity, Entity) -> bool,
}

impl std::fmt::Debug for ComponentOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentOps")
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

fn has_impl<T: Component>(registry: &Registry, entity: Entity) -> bool {
    registry.has::<T>(entity)
}

fn get_json_impl<T: Component + Serialize>(
    registry: &Registry,
    entity: Entity,
) -> Result<Option<serde_json::Value>, EcsError> {
    registry
        .get::<T>(entity)
        .map(|value| {
            serde_json::to_value(value).map_err(|e| EcsError::ComponentSerialization {
                component: std::any::type_name::<T>().to_owned(),
                details: e.to_string(),
            })
        })
        .transpose()
}

fn emplace_json_impl<T: Component + DeserializeOwned>(
    registry: &mut Registry,
    entity: Entity,
    value: serde_json::Value,
) -> Result<(), EcsError> {
    let component: T =
        serde_json::from_value(value).map_err(|e| EcsError::ComponentDeserialization {
            component: std::any::type_name::<T>().to_owned(),
            details: e.to_string(),
        })?;
    registry.insert(entity, component)
}

fn remove_impl<T: Component>(registry: &mut Registry, entity: Entity) -> bool {
    registry.remove::<T>(entity).is_some()
}

fn copy_impl<T: Component>(registry: &mut Registry, from: Entity, to: Entity) -> bool {
    match registry.get::<T>(from).cloned() {
        Some(value) => registry.insert(to, value).is_ok(),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Name -> [`ComponentOps`] table.
///
/// Registration is idempotent per Rust type; registering a second type under
/// an existing name panics, since that is a startup wiring bug.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
    names: Vec<String>,
    ops: Vec<ComponentOps>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`, returning its ops table.
    pub fn register<T>(&mut self, name: &str) -> ComponentOps
    where
        T: Component + Serialize + DeserializeOwned,
    {
        if let Some(&idx) = self.by_type.get(&TypeId::of::<T>()) {
            return self.ops[idx];
        }
        if self.by_name.contains_key(name) {
            panic!("component name '{name}' is already registered for a different type");
        }
        let ops = ComponentOps {
            type_id: TypeId::of::<T>(),
            has: has_impl::<T>,
            get_json: get_json_impl::<T>,
            emplace_json: emplace_json_impl::<T>,
            remove: remove_impl::<T>,
            copy: copy_impl::<T>,
        };
        let idx = self.ops.len();
        self.ops.push(ops);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), idx);
        self.by_type.insert(ops.type_id, idx);
        tracing::debug!(component = name, "registered component capabilities");
        ops
    }

    /// Look up by name, failing with the list of known names.
    pub fn get(&self, name: &str) -> Result<&ComponentOps, EcsError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.ops[idx])
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
                registered: self.names.join(", "),
            })
    }

    pub fn name_of<T: 'static>(&self) -> Option<&str> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&idx| self.names[idx].as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// `(name, ops)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentOps)> {
        self.names.iter().map(String::as_str).zip(self.ops.iter())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
