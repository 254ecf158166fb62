//! Sparse-set component storage.
//!
//! Each component type lives in its own [`SparseSet`]: a packed `dense` array
//! of `(entity, value)` pairs plus a `sparse` array indexed by entity slot
//! that points into it. Lookups, inserts and removals are O(1); iteration is
//! a linear walk over packed memory. Removal swaps the last element into the
//! hole, so iteration order is insertion order only until the first removal.

use std::any::{Any, TypeId};

use crate::component::Component;
use crate::entity::{Entity, EntityMap};

// ---------------------------------------------------------------------------
// SparseSet
// ---------------------------------------------------------------------------

/// Packed storage for one component type.
#[derive(Debug, Clone)]
pub struct SparseSet<T> {
    sparse: Vec<Option<u32>>,
    entities: Vec<Entity>,
    values: Vec<T>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> SparseSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn dense_index(&self, entity: Entity) -> Option<usize> {
        let slot = *self.sparse.get(entity.index() as usize)?;
        let dense = slot? as usize;
        // The slot may be occupied by an older generation of this index.
        (self.entities[dense] == entity).then_some(dense)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Insert or overwrite; returns the previous value.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        if let Some(dense) = self.dense_index(entity) {
            return Some(std::mem::replace(&mut self.values[dense], value));
        }
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }
        // A stale generation may still hold the slot; evict it.
        if let Some(stale) = self.sparse[idx] {
            let stale_entity = self.entities[stale as usize];
            self.remove(stale_entity);
        }
        self.sparse[idx] = Some(self.entities.len() as u32);
        self.entities.push(entity);
        self.values.push(value);
        None
    }

    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let dense = self.dense_index(entity)?;
        self.sparse[entity.index() as usize] = None;
        let last = self.entities.len() - 1;
        if dense != last {
            let moved = self.entities[last];
            self.sparse[moved.index() as usize] = Some(dense as u32);
        }
        self.entities.swap_remove(dense);
        Some(self.values.swap_remove(dense))
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.dense_index(entity).map(|d| &self.values[d])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.dense_index(entity).map(move |d| &mut self.values[d])
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in packed order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Values in packed order, parallel to [`entities`](Self::entities).
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.values.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.values.iter_mut())
    }
}

// ---------------------------------------------------------------------------
// Type-erased storage
// ---------------------------------------------------------------------------

/// Operations the registry performs on a storage without knowing its type.
pub(crate) trait ErasedStorage: Any {
    fn component_type(&self) -> TypeId;
    fn component_name(&self) -> &'static str;
    fn contains(&self, entity: Entity) -> bool;
    fn remove_entity(&mut self, entity: Entity) -> bool;
    fn len(&self) -> usize;
    fn entities(&self) -> &[Entity];
    /// Copy every value into a new storage keyed by the mapped handles.
    fn duplicate(&self, map: &EntityMap) -> Box<dyn ErasedStorage>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStorage for SparseSet<T> {
    fn component_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn contains(&self, entity: Entity) -> bool {
        SparseSet::contains(self, entity)
    }

    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn len(&self) -> usize {
        SparseSet::len(self)
    }

    fn entities(&self) -> &[Entity] {
        SparseSet::entities(self)
    }

    fn duplicate(&self, map: &EntityMap) -> Box<dyn ErasedStorage> {
        let mut out = SparseSet::<T>::new();
        for (entity, value) in self.iter() {
            let Some(target) = map.get(entity) else {
                continue;
            };
            let mut value = value.clone();
            value.remap_entities(map);
            out.insert(target, value);
        }
        Box::new(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
