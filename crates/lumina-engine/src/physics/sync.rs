//! Registry <-> physics scene synchronization and the per-frame physics pass.
//!
//! Each frame the world is simulating, [`PhysicsPass::run`] banks the frame
//! delta into the [`FixedStepper`] and, when at least one step is due:
//!
//! 1. pushes transforms flagged with [`NeedsTransformUpdate`] into the scene
//!    (kinematic targets, teleports),
//! 2. runs the [`CharacterPass`] once with the whole stepped interval,
//! 3. integrates exactly `steps` fixed steps.
//!
//! The transform sync pass then runs unconditionally, copying poses of
//! awake bodies and of every character back into their [`Transform`].

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Quat, Vec3};
use lumina_ecs::entity::Entity;
use lumina_ecs::registry::Registry;
use lumina_ecs::signal::Connection;

use super::{
    BodyDesc, BodyId, BodyKind, CharacterDesc, CharacterPass, ColliderDesc, FixedStepper,
    PhysicsScene,
};
use crate::components::{
    BoxCollider, CharacterPhysics, NeedsTransformUpdate, PhysicsBodyHandle, RigidBody,
    SphereCollider, Transform,
};
use crate::workers::WorkerPool;

/// Poses closer than this are considered unchanged.
const POSE_EPSILON: f32 = 1e-5;

// ---------------------------------------------------------------------------
// Body creation and removal
// ---------------------------------------------------------------------------

/// Create scene bodies for entities that describe one but have no handle yet.
///
/// Rigid bodies need a [`Transform`], a [`RigidBody`] and a box or sphere
/// collider (box wins when both are present). Characters need a
/// [`Transform`] and [`CharacterPhysics`]. Returns how many were created.
pub fn create_pending_bodies(registry: &mut Registry, physics: &mut dyn PhysicsScene) -> usize {
    let mut created = 0;

    for entity in registry.entities_with::<(Transform, RigidBody)>() {
        if registry.has::<PhysicsBodyHandle>(entity) {
            continue;
        }
        let Some(desc) = body_desc(registry, entity) else {
            continue;
        };
        let body = physics.create_body(entity, &desc);
        attach_handle(registry, physics, entity, body, desc.kind, &mut created);
    }

    for entity in registry.entities_with::<(Transform, CharacterPhysics)>() {
        if registry.has::<PhysicsBodyHandle>(entity) {
            continue;
        }
        let (Some(transform), Some(shape)) = (
            registry.get::<Transform>(entity),
            registry.get::<CharacterPhysics>(entity),
        ) else {
            continue;
        };
        let desc = CharacterDesc {
            location: transform.location,
            rotation: transform.rotation,
            half_height: shape.half_height,
            radius: shape.radius,
            mass: shape.mass,
            max_slope_angle: shape.max_slope_angle,
            step_height: shape.step_height,
        };
        let body = physics.create_character(entity, &desc);
        attach_handle(registry, physics, entity, body, BodyKind::Character, &mut created);
    }

    if created > 0 {
        tracing::debug!(created, total = physics.body_count(), "physics bodies created");
    }
    created
}

fn body_desc(registry: &Registry, entity: Entity) -> Option<BodyDesc> {
    let transform = registry.get::<Transform>(entity)?;
    let body = registry.get::<RigidBody>(entity)?;
    let collider = if let Some(shape) = registry.get::<BoxCollider>(entity) {
        ColliderDesc::Box {
            half_extent: shape.half_extent * transform.scale,
            offset: shape.offset,
        }
    } else {
        let shape = registry.get::<SphereCollider>(entity)?;
        ColliderDesc::Sphere {
            radius: shape.radius * transform.scale.max_element(),
            offset: shape.offset,
        }
    };
    Some(BodyDesc {
        kind: body.body_type.kind(),
        location: transform.location,
        rotation: transform.rotation,
        collider,
        mass: body.mass,
        linear_damping: body.linear_damping,
        angular_damping: body.angular_damping,
        use_gravity: body.use_gravity,
    })
}

fn attach_handle(
    registry: &mut Registry,
    physics: &mut dyn PhysicsScene,
    entity: Entity,
    body: BodyId,
    kind: BodyKind,
    created: &mut usize,
) {
    match registry.insert(entity, PhysicsBodyHandle { body, kind }) {
        Ok(()) => *created += 1,
        Err(_) => {
            physics.remove_body(body);
        }
    }
}

/// Bodies whose owning entity (or handle component) went away, queued by a
/// registry destroy hook and removed from the scene by [`drain`](Self::drain).
#[derive(Debug, Clone, Default)]
pub struct BodyRemovalQueue {
    pending: Rc<RefCell<Vec<BodyId>>>,
}

impl BodyRemovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `registry` for removed [`PhysicsBodyHandle`]s.
    pub fn connect(&self, registry: &mut Registry) -> Connection {
        let pending = Rc::clone(&self.pending);
        registry.on_destroy::<PhysicsBodyHandle>(move |registry, entity| {
            if let Some(handle) = registry.get::<PhysicsBodyHandle>(entity) {
                pending.borrow_mut().push(handle.body);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Remove every queued body from `physics`. Returns how many existed.
    pub fn drain(&self, physics: &mut dyn PhysicsScene) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        pending.into_iter().filter(|&body| physics.remove_body(body)).count()
    }

    /// Forget queued bodies without touching a scene.
    pub fn discard(&self) {
        self.pending.borrow_mut().clear();
    }
}

// ---------------------------------------------------------------------------
// Transform passes
// ---------------------------------------------------------------------------

/// Push flagged transforms into the scene when they differ from the body's
/// pose. Returns how many bodies were moved.
pub fn push_transforms(registry: &Registry, physics: &mut dyn PhysicsScene) -> usize {
    let mut pushed = 0;
    for entity in registry.entities_with::<(PhysicsBodyHandle, Transform, NeedsTransformUpdate)>() {
        let (Some(handle), Some(transform)) = (
            registry.get::<PhysicsBodyHandle>(entity),
            registry.get::<Transform>(entity),
        ) else {
            continue;
        };
        let changed = physics
            .body_transform(handle.body)
            .map_or(false, |(location, rotation)| {
                !same_pose(location, rotation, transform.location, transform.rotation)
            });
        if changed {
            physics.set_body_transform(handle.body, transform.location, transform.rotation);
            pushed += 1;
        }
    }
    pushed
}

/// Copy body poses into transforms and flag them for render.
///
/// Only awake bodies are read; characters are read unconditionally since
/// the character pass moves them. Returns how many transforms were written.
pub fn sync_transforms(registry: &mut Registry, physics: &dyn PhysicsScene) -> usize {
    let mut synced = 0;
    for entity in registry.entities_with::<(PhysicsBodyHandle, Transform)>() {
        let Some(handle) = registry.get::<PhysicsBodyHandle>(entity).copied() else {
            continue;
        };
        if handle.kind != BodyKind::Character && !physics.is_body_active(handle.body) {
            continue;
        }
        let Some((location, rotation)) = physics.body_transform(handle.body) else {
            continue;
        };
        if let Some(transform) = registry.get_mut::<Transform>(entity) {
            transform.location = location;
            transform.rotation = rotation;
        }
        if registry.insert(entity, NeedsTransformUpdate).is_ok() {
            synced += 1;
        }
    }
    synced
}

fn same_pose(a_loc: Vec3, a_rot: Quat, b_loc: Vec3, b_rot: Quat) -> bool {
    a_loc.abs_diff_eq(b_loc, POSE_EPSILON) && a_rot.dot(b_rot).abs() >= 1.0 - POSE_EPSILON
}

// ---------------------------------------------------------------------------
// PhysicsPass
// ---------------------------------------------------------------------------

/// What one physics pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicsPassReport {
    pub steps: u32,
    pub characters: usize,
    pub pushed: usize,
    pub synced: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PhysicsPass {
    pub stepper: FixedStepper,
    pub characters: CharacterPass,
}

impl PhysicsPass {
    pub fn new(stepper: FixedStepper) -> Self {
        Self {
            stepper,
            characters: CharacterPass::default(),
        }
    }

    pub fn run(
        &mut self,
        registry: &mut Registry,
        physics: &mut dyn PhysicsScene,
        workers: &WorkerPool,
        frame_delta: f64,
    ) -> PhysicsPassReport {
        let mut report = PhysicsPassReport {
            steps: self.stepper.advance(frame_delta),
            ..PhysicsPassReport::default()
        };

        if report.steps > 0 {
            let h = self.stepper.fixed_step();
            report.pushed = push_transforms(registry, physics);
            let stepped = (report.steps as f64 * h) as f32;
            report.characters = self.characters.run(registry, physics, workers, stepped);
            for _ in 0..report.steps {
                physics.integrate(h);
            }
            tracing::trace!(steps = report.steps, residual = self.stepper.accumulator(), "physics integrated");
        }

        report.synced = sync_transforms(registry, physics);
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
