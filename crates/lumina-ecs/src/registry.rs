//! The entity [`Registry`]: entity lifetimes, component storages, views and
//! construct/destroy hooks.
//!
//! Every accessor validates the handle it is given. A stale or never
//! allocated [`Entity`] reads as "no component" and write operations report
//! [`EcsError::StaleEntity`]; nothing ever touches a recycled slot through an
//! old handle.
//!
//! Hooks are plain closures over `(&mut Registry, Entity)`. Construct hooks
//! run after a component is first attached (not when it is overwritten);
//! destroy hooks run while the component is still readable, right before it
//! is detached, both for explicit removal and for entity destruction.

use std::any::TypeId;
use std::collections::HashMap;
use std::rc::Rc;

use crate::component::Component;
use crate::entity::{Entity, EntityAllocator, EntityMap};
use crate::signal::{Connection, ConnectionIds, ObserverList};
use crate::storage::{ErasedStorage, SparseSet};
use crate::EcsError;

type Hook = dyn Fn(&mut Registry, Entity);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HookKind {
    Construct,
    Destroy,
}

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// A tuple of component types used to select entities carrying all of them.
pub trait ComponentSet {
    fn type_ids() -> Vec<TypeId>;
}

macro_rules! impl_component_set {
    ($($t:ident),+) => {
        impl<$($t: Component),+> ComponentSet for ($($t,)+) {
            fn type_ids() -> Vec<TypeId> {
                vec![$(TypeId::of::<$t>()),+]
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Registry {
    allocator: EntityAllocator,
    /// Storages in first-use order; `index` maps a type to its slot.
    storages: Vec<Box<dyn ErasedStorage>>,
    index: HashMap<TypeId, usize>,
    hooks: HashMap<(TypeId, HookKind), ObserverList<Hook>>,
    ids: ConnectionIds,
    /// Entities whose destruction is in progress (hooks may re-enter).
    destroying: Vec<Entity>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.allocator.alive_count())
            .field(
                "storages",
                &self
                    .storages
                    .iter()
                    .map(|s| (s.component_name(), s.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- entity lifetime ----------------------------------------------------

    pub fn create(&mut self) -> Entity {
        self.allocator.allocate()
    }

    /// `true` if `entity` is alive in this registry.
    pub fn valid(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    fn ensure_valid(&self, entity: Entity) -> Result<(), EcsError> {
        if self.valid(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleEntity { entity })
        }
    }

    /// Destroy `entity`, firing destroy hooks for each of its components.
    ///
    /// Re-entrant destruction of an entity already being destroyed (a hook
    /// destroying its own owner) is a no-op.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.ensure_valid(entity)?;
        if self.destroying.contains(&entity) {
            return Ok(());
        }
        self.destroying.push(entity);

        let attached: Vec<TypeId> = self
            .storages
            .iter()
            .filter(|s| s.contains(entity))
            .map(|s| s.component_type())
            .collect();
        for type_id in attached {
            self.fire(type_id, HookKind::Destroy, entity);
            if let Some(&slot) = self.index.get(&type_id) {
                self.storages[slot].remove_entity(entity);
            }
        }
        // Hooks may have attached new components; sweep without notifying.
        for storage in &mut self.storages {
            storage.remove_entity(entity);
        }

        self.destroying.retain(|&e| e != entity);
        self.allocator.release(entity);
        tracing::trace!(%entity, "entity destroyed");
        Ok(())
    }

    /// Destroy every live entity in slot order.
    pub fn clear(&mut self) {
        let alive: Vec<Entity> = self.allocator.iter_alive().collect();
        for entity in alive {
            // Hooks may have destroyed later entries already.
            if self.valid(entity) {
                let _ = self.destroy(entity);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.allocator.alive_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.allocator.iter_alive()
    }

    // -- components ---------------------------------------------------------

    fn storage_slot<T: Component>(&mut self) -> usize {
        let key = TypeId::of::<T>();
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.storages.len();
        self.storages.push(Box::new(SparseSet::<T>::new()));
        self.index.insert(key, slot);
        slot
    }

    pub fn storage<T: Component>(&self) -> Option<&SparseSet<T>> {
        let slot = *self.index.get(&TypeId::of::<T>())?;
        self.storages[slot].as_any().downcast_ref()
    }

    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        let slot = *self.index.get(&TypeId::of::<T>())?;
        self.storages[slot].as_any_mut().downcast_mut()
    }

    /// Attach or overwrite `T` on `entity`. Construct hooks fire only when
    /// the component was not present before.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        self.ensure_valid(entity)?;
        let slot = self.storage_slot::<T>();
        let previous = self.storages[slot]
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()
            .and_then(|set| set.insert(entity, value));
        if previous.is_none() {
            self.fire(TypeId::of::<T>(), HookKind::Construct, entity);
        }
        Ok(())
    }

    /// Detach `T`, firing destroy hooks first. Returns the removed value.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.has::<T>(entity) {
            return None;
        }
        self.fire(TypeId::of::<T>(), HookKind::Destroy, entity);
        self.storage_mut::<T>()?.remove(entity)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Like [`get`](Self::get) but distinguishes a stale handle from a
    /// missing component.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        self.ensure_valid(entity)?;
        self.get::<T>(entity).ok_or_else(|| EcsError::MissingComponent {
            entity,
            component: std::any::type_name::<T>(),
        })
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.storage::<T>().is_some_and(|s| s.contains(entity))
    }

    /// Get `T` on `entity`, attaching `T::default()` first if absent.
    pub fn get_or_insert_default<T: Component + Default>(
        &mut self,
        entity: Entity,
    ) -> Result<&mut T, EcsError> {
        if !self.has::<T>(entity) {
            self.insert(entity, T::default())?;
        }
        self.get_mut::<T>(entity)
            .ok_or(EcsError::StaleEntity { entity })
    }

    pub fn count<T: Component>(&self) -> usize {
        self.storage::<T>().map_or(0, |s| s.len())
    }

    // -- views ----------------------------------------------------------------

    pub fn view<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.storage::<T>().into_iter().flat_map(|s| s.iter())
    }

    pub fn view_mut<T: Component>(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.storage_mut::<T>().into_iter().flat_map(|s| s.iter_mut())
    }

    /// Entities carrying every component of `Q`, in the packed order of the
    /// smallest participating storage.
    pub fn entities_with<Q: ComponentSet>(&self) -> Vec<Entity> {
        let mut sets: Vec<&dyn ErasedStorage> = Vec::new();
        for type_id in Q::type_ids() {
            match self.index.get(&type_id) {
                Some(&slot) => sets.push(self.storages[slot].as_ref()),
                None => return Vec::new(),
            }
        }
        let Some(smallest) = sets.iter().min_by_key(|s| s.len()) else {
            return Vec::new();
        };
        smallest
            .entities()
            .iter()
            .copied()
            .filter(|&e| sets.iter().all(|s| s.contains(e)))
            .collect()
    }

    // -- hooks ----------------------------------------------------------------

    pub fn on_construct<T: Component>(
        &mut self,
        hook: impl Fn(&mut Registry, Entity) + 'static,
    ) -> Connection {
        self.connect(TypeId::of::<T>(), HookKind::Construct, Rc::new(hook))
    }

    pub fn on_destroy<T: Component>(
        &mut self,
        hook: impl Fn(&mut Registry, Entity) + 'static,
    ) -> Connection {
        self.connect(TypeId::of::<T>(), HookKind::Destroy, Rc::new(hook))
    }

    pub fn disconnect(&mut self, connection: Connection) -> bool {
        self.hooks.values_mut().any(|l| l.disconnect(connection))
    }

    fn connect(&mut self, type_id: TypeId, kind: HookKind, hook: Rc<Hook>) -> Connection {
        let connection = self.ids.next();
        self.hooks
            .entry((type_id, kind))
            .or_default()
            .connect(connection, hook);
        connection
    }

    fn fire(&mut self, type_id: TypeId, kind: HookKind, entity: Entity) {
        let Some(list) = self.hooks.get(&(type_id, kind)) else {
            return;
        };
        for hook in list.snapshot() {
            hook(self, entity);
        }
    }

    // -- duplication ----------------------------------------------------------

    /// Copy every live entity and component into a fresh registry.
    ///
    /// Entities are recreated in slot order, components that hold handles are
    /// remapped through the returned [`EntityMap`]. Hooks are not copied and
    /// no construct hook fires on the copy.
    pub fn duplicate(&self) -> (Registry, EntityMap) {
        let mut out = Registry::new();
        let mut map = EntityMap::new();
        for entity in self.allocator.iter_alive() {
            map.insert(entity, out.allocator.allocate());
        }
        for storage in &self.storages {
            let copy = storage.duplicate(&map);
            out.index.insert(copy.component_type(), out.storages.len());
            out.storages.push(copy);
        }
        (out, map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
