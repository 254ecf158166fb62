//! [`SystemContext`]: the per-stage view of a world handed to systems.
//!
//! The context is rebuilt for every stage from the world's [`FrameState`]
//! and short-lived borrows of its registry, dispatcher, physics scene, line
//! batcher and worker pool. Nothing obtained from it may outlive the call
//! that received it.

use std::collections::HashMap;
use std::rc::Rc;

use glam::{Quat, Vec3};
use lumina_ecs::component::ComponentRegistry;
use lumina_ecs::entity::Entity;
use lumina_ecs::registry::Registry;
use lumina_ecs::signal::Dispatcher;
use lumina_ecs::EcsError;
use lumina_script::{EntityView, WorldView};

use crate::components::{Name, NeedsTransformUpdate, Relationship, Transform};
use crate::debug_draw::{Color, LineBatcher};
use crate::physics::{PhysicsScene, RayCastSettings, RayHit, SphereCastSettings};
use crate::stage::UpdateStage;
use crate::workers::WorkerPool;

/// Component names never carried over by [`SystemContext::copy_entity`].
const NOT_COPIED: [&str; 2] = ["name", "relationship"];

// ---------------------------------------------------------------------------
// FrameState
// ---------------------------------------------------------------------------

/// Clock and stage of the frame being run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Seconds since the previous frame.
    pub delta_time: f64,
    /// Seconds accumulated over every frame of this world.
    pub time: f64,
    pub stage: UpdateStage,
    /// Frames completed before this one.
    pub tick: u64,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            delta_time: 0.0,
            time: 0.0,
            stage: UpdateStage::FrameStart,
            tick: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

pub struct SystemContext<'w> {
    frame: FrameState,
    registry: &'w mut Registry,
    dispatcher: &'w mut Dispatcher,
    physics: &'w mut dyn PhysicsScene,
    lines: &'w mut LineBatcher,
    workers: &'w WorkerPool,
    components: &'w ComponentRegistry,
    script_view: Option<WorldView>,
}

impl<'w> SystemContext<'w> {
    pub fn new(
        frame: FrameState,
        registry: &'w mut Registry,
        dispatcher: &'w mut Dispatcher,
        physics: &'w mut dyn PhysicsScene,
        lines: &'w mut LineBatcher,
        workers: &'w WorkerPool,
        components: &'w ComponentRegistry,
    ) -> Self {
        Self {
            frame,
            registry,
            dispatcher,
            physics,
            lines,
            workers,
            components,
            script_view: None,
        }
    }

    // -- frame ------------------------------------------------------------------

    pub fn frame(&self) -> FrameState {
        self.frame
    }

    pub fn delta_time(&self) -> f64 {
        self.frame.delta_time
    }

    pub fn time(&self) -> f64 {
        self.frame.time
    }

    pub fn stage(&self) -> UpdateStage {
        self.frame.stage
    }

    // -- collaborators --------------------------------------------------------

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        self.dispatcher
    }

    pub fn components(&self) -> &'w ComponentRegistry {
        self.components
    }

    pub fn physics(&self) -> &dyn PhysicsScene {
        self.physics
    }

    pub fn physics_mut(&mut self) -> &mut dyn PhysicsScene {
        self.physics
    }

    pub fn lines(&self) -> &LineBatcher {
        self.lines
    }

    pub fn workers(&self) -> &'w WorkerPool {
        self.workers
    }

    /// Run `f` over `items` on the worker pool; returns once all are done.
    pub fn parallel_for<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(&mut T) + Send + Sync,
    {
        self.workers.parallel_for(items, f);
    }

    // -- entities ---------------------------------------------------------------

    /// Create an entity with a [`Name`], a [`Transform`] and a pending
    /// render update. An empty name becomes `Entity_<index>`.
    pub fn construct_entity(&mut self, name: &str, transform: Transform) -> Entity {
        let entity = self.registry.create();
        let name = if name.is_empty() {
            format!("Entity_{}", entity.index())
        } else {
            name.to_owned()
        };
        self.registry
            .insert(entity, Name(name))
            .and_then(|()| self.registry.insert(entity, transform))
            .and_then(|()| self.registry.insert(entity, NeedsTransformUpdate))
            .expect("freshly created entity is valid");
        entity
    }

    /// Copy every named component `filter` accepts from `source` onto a new
    /// entity named `<base>_<index>`. Hierarchy links are not copied.
    pub fn copy_entity(&mut self, source: Entity, filter: impl Fn(&str) -> bool) -> Option<Entity> {
        if !self.registry.valid(source) {
            return None;
        }
        let base = self
            .registry
            .get::<Name>(source)
            .map_or_else(|| "Entity".to_owned(), |n| n.0.clone());
        let transform = self.registry.get::<Transform>(source).copied().unwrap_or_default();
        let copy = self.registry.create();
        let name = format!("{base}_{}", copy.index());
        self.registry
            .insert(copy, Name(name))
            .and_then(|()| self.registry.insert(copy, transform))
            .and_then(|()| self.registry.insert(copy, NeedsTransformUpdate))
            .expect("freshly created entity is valid");

        for (name, ops) in self.components.iter() {
            if NOT_COPIED.contains(&name) || !filter(name) || !(ops.has)(self.registry, source) {
                continue;
            }
            (ops.copy)(self.registry, source, copy);
        }
        Some(copy)
    }

    /// Destroy `entity` and, through its [`Relationship`], every descendant.
    /// Returns `false` for stale handles.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        destroy_hierarchy(self.registry, entity)
    }

    /// Make `child` a child of `parent`, detaching it from any previous one.
    pub fn attach(&mut self, child: Entity, parent: Entity) -> bool {
        attach(self.registry, child, parent)
    }

    // -- transforms -------------------------------------------------------------

    pub fn set_entity_transform(&mut self, entity: Entity, transform: Transform) -> bool {
        self.edit_transform(entity, |t| *t = transform)
    }

    pub fn set_location(&mut self, entity: Entity, location: Vec3) -> bool {
        self.edit_transform(entity, |t| t.location = location)
    }

    pub fn set_rotation(&mut self, entity: Entity, rotation: Quat) -> bool {
        self.edit_transform(entity, |t| t.rotation = rotation)
    }

    pub fn translate_entity(&mut self, entity: Entity, offset: Vec3) -> bool {
        self.edit_transform(entity, |t| t.translate(offset))
    }

    /// Flag the transform for the next render and physics push.
    pub fn mark_transform_dirty(&mut self, entity: Entity) -> bool {
        self.registry.has::<Transform>(entity)
            && self.registry.insert(entity, NeedsTransformUpdate).is_ok()
    }

    fn edit_transform(&mut self, entity: Entity, edit: impl FnOnce(&mut Transform)) -> bool {
        match self.registry.get_mut::<Transform>(entity) {
            Some(transform) => edit(transform),
            None => return false,
        }
        self.registry.insert(entity, NeedsTransformUpdate).is_ok()
    }

    // -- queries ----------------------------------------------------------------

    /// Cast a ray, optionally drawing it: hit color up to the hit point,
    /// miss color for the rest.
    pub fn cast_ray(&mut self, settings: &RayCastSettings) -> Option<RayHit> {
        let hit = self.physics.cast_ray(settings);
        if settings.draw_debug {
            let duration = settings.debug_duration;
            match &hit {
                Some(hit) => {
                    self.lines
                        .draw_line(settings.start, hit.location, settings.debug_hit_color, duration);
                    self.lines
                        .draw_line(hit.location, settings.end, settings.debug_miss_color, duration);
                }
                None => self
                    .lines
                    .draw_line(settings.start, settings.end, settings.debug_miss_color, duration),
            }
        }
        hit
    }

    /// Every body touched by a sphere swept from `start` to `end`.
    pub fn cast_sphere(&mut self, settings: &SphereCastSettings) -> Vec<RayHit> {
        let hits = self.physics.overlap_sphere(settings);
        if settings.draw_debug {
            let color = if hits.is_empty() { Color::RED } else { Color::GREEN };
            let duration = settings.debug_duration;
            self.lines.draw_sphere(settings.start, settings.radius, color, duration);
            self.lines.draw_sphere(settings.end, settings.radius, color, duration);
            self.lines.draw_line(settings.start, settings.end, color, duration);
        }
        hits
    }

    // -- script view ------------------------------------------------------------

    /// Every entity as script hooks see it. Built on first use, then shared
    /// by later hooks until [`invalidate_script_view`](Self::invalidate_script_view).
    pub fn script_view(&mut self) -> WorldView {
        if let Some(view) = &self.script_view {
            return Rc::clone(view);
        }
        let view = Rc::new(build_script_view(self.registry, self.components));
        self.script_view = Some(Rc::clone(&view));
        view
    }

    /// Drop the cached script view after the world may have changed.
    pub fn invalidate_script_view(&mut self) {
        self.script_view = None;
    }

    // -- debug draw -------------------------------------------------------------

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
}

fn build_script_view(registry: &Registry, components: &ComponentRegistry) -> HashMap<u64, EntityView> {
    registry
        .entities()
        .map(|entity| {
            let view = EntityView {
                location: registry.get::<Transform>(entity).map(|t| t.location.to_array()),
                components: components
                    .iter()
                    .filter(|(_, ops)| (ops.has)(registry, entity))
                    .map(|(name, _)| name.to_owned())
                    .collect(),
            };
            (entity.to_bits(), view)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

pub(crate) fn attach(registry: &mut Registry, child: Entity, parent: Entity) -> bool {
    if child == parent || !registry.valid(child) || !registry.valid(parent) {
        return false;
    }
    detach_from_parent(registry, child);
    link(registry, child, parent).is_ok()
}

fn link(registry: &mut Registry, child: Entity, parent: Entity) -> Result<(), EcsError> {
    registry.get_or_insert_default::<Relationship>(child)?.parent = Some(parent);
    registry.get_or_insert_default::<Relationship>(parent)?.children.push(child);
    Ok(())
}

fn detach_from_parent(registry: &mut Registry, child: Entity) {
    let Some(parent) = registry.get::<Relationship>(child).and_then(|rel| rel.parent) else {
        return;
    };
    if let Some(rel) = registry.get_mut::<Relationship>(parent) {
        rel.children.retain(|&c| c != child);
    }
    if let Some(rel) = registry.get_mut::<Relationship>(child) {
        rel.parent = None;
    }
}

/// Destroy `root` and its descendants, children before parents.
pub(crate) fn destroy_hierarchy(registry: &mut Registry, root: Entity) -> bool {
    if !registry.valid(root) {
        return false;
    }
    detach_from_parent(registry, root);

    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        if order.contains(&entity) {
            continue;
        }
        order.push(entity);
        if let Some(rel) = registry.get::<Relationship>(entity) {
            stack.extend(rel.children.iter().copied());
        }
    }
    for entity in order.into_iter().rev() {
        // Children may already be gone if something else destroyed them.
        let _ = registry.destroy(entity);
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
