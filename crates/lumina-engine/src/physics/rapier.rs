//! rapier3d implementation of [`PhysicsScene`].
//!
//! Rapier owns its own body and collider storage, so the scene lives outside
//! the entity registry. Each body's `user_data` carries the bits of the
//! entity it was created for, which is how query hits and collision pairs
//! are mapped back to entities.

use std::collections::HashMap;

use glam::{Quat, Vec3};
use lumina_ecs::entity::Entity;
use rapier3d::control::{CharacterAutostep, CharacterLength, KinematicCharacterController};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::parry::shape::Capsule;
use rapier3d::prelude::*;

use super::{
    layers, BodyDesc, BodyId, BodyKind, CharacterDesc, CharacterMove, CharacterMoveSettings,
    ColliderDesc, GroundState, PhysicsScene, RayCastSettings, RayHit, SphereCastSettings,
};

/// Skin kept between a character and what it touches.
const CHARACTER_OFFSET: f32 = 0.01;
/// Extra reach below a character's feet when looking for the supporting body.
const SUPPORT_PROBE: f32 = 0.6;
/// Downward nudge applied to a character that is not moving down, so the
/// sweep keeps touching the floor it rests on.
const GROUND_PRESS: f32 = 2.0 * CHARACTER_OFFSET;
/// Radians of slack when comparing a floor normal to the slope limit.
const SLOPE_TOLERANCE: f32 = 1.0e-3;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_rotation(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_rotation(q: &UnitQuaternion<Real>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

fn to_isometry(location: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(Translation3::from(to_vector(location)), to_rotation(rotation))
}

fn to_handle(body: BodyId) -> RigidBodyHandle {
    let raw = body.to_raw();
    RigidBodyHandle::from_raw_parts(raw as u32, (raw >> 32) as u32)
}

fn to_body_id(handle: RigidBodyHandle) -> BodyId {
    let (index, generation) = handle.into_raw_parts();
    BodyId::from_raw(((generation as u64) << 32) | index as u64)
}

fn query_groups(mask: u32) -> InteractionGroups {
    InteractionGroups::new(Group::ALL, Group::from_bits_truncate(mask))
}

fn membership(layer: u32) -> InteractionGroups {
    InteractionGroups::new(Group::from_bits_truncate(layer), Group::ALL)
}

// ---------------------------------------------------------------------------
// RapierScene
// ---------------------------------------------------------------------------

struct CharacterState {
    controller: KinematicCharacterController,
    half_height: f32,
    radius: f32,
    ground: GroundState,
    ground_velocity: Vec3,
}

pub struct RapierScene {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    characters: HashMap<RigidBodyHandle, CharacterState>,
    /// Collision pairs that started during the last step, sorted.
    collisions: Vec<(Entity, Entity)>,
}

impl RapierScene {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: to_vector(gravity),
            integration_params: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            characters: HashMap::new(),
            collisions: Vec::new(),
        }
    }

    pub fn gravity(&self) -> Vec3 {
        from_vector(&self.gravity)
    }

    /// Collision pairs that started during the last [`integrate`](PhysicsScene::integrate).
    pub fn collisions(&self) -> &[(Entity, Entity)] {
        &self.collisions
    }

    fn entity_of(&self, handle: RigidBodyHandle) -> Entity {
        self.rigid_body_set
            .get(handle)
            .map_or(Entity::NULL, |body| Entity::from_bits(body.user_data as u64))
    }

    fn collider_entity(&self, collider: ColliderHandle) -> Option<(RigidBodyHandle, Entity)> {
        let parent = self.collider_set.get(collider)?.parent()?;
        Some((parent, self.entity_of(parent)))
    }

    fn insert_body(&mut self, body: RigidBody, collider: Collider) -> RigidBodyHandle {
        let handle = self.rigid_body_set.insert(body);
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        self.query_pipeline.update(&self.collider_set);
        handle
    }

    /// The surface straight below a character: its normal and the velocity of
    /// the body it belongs to.
    fn support(&self, handle: RigidBodyHandle, location: Vec3, state: &CharacterState) -> Option<(Vec3, Vec3)> {
        let reach = state.half_height + state.radius + SUPPORT_PROBE;
        let ray = Ray::new(point![location.x, location.y, location.z], vector![0.0, -1.0, 0.0]);
        let filter = QueryFilter::default().exclude_rigid_body(handle);
        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.rigid_body_set,
            &self.collider_set,
            &ray,
            reach,
            true,
            filter,
        )?;
        let (parent, _) = self.collider_entity(collider)?;
        let velocity = self
            .rigid_body_set
            .get(parent)
            .map_or(Vec3::ZERO, |body| from_vector(body.linvel()));
        Some((from_vector(&hit.normal), velocity))
    }
}

/// Ground state of a character after a sweep. `floor_normal` is the
/// flattest upward-facing surface it touched; a grounded character with no
/// known surface counts as standing on walkable ground.
fn classify_ground(grounded: bool, floor_normal: Option<Vec3>, max_slope: f32) -> GroundState {
    if !grounded {
        return GroundState::InAir;
    }
    match floor_normal {
        Some(normal) if normal.angle_between(Vec3::Y) > max_slope + SLOPE_TOLERANCE => GroundState::OnSteepGround,
        _ => GroundState::OnGround,
    }
}

impl Default for RapierScene {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

impl std::fmt::Debug for RapierScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RapierScene")
            .field("bodies", &self.rigid_body_set.len())
            .field("characters", &self.characters.len())
            .finish_non_exhaustive()
    }
}

impl PhysicsScene for RapierScene {
    fn create_body(&mut self, entity: Entity, desc: &BodyDesc) -> BodyId {
        let builder = match desc.kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            BodyKind::Kinematic | BodyKind::Character => RigidBodyBuilder::kinematic_position_based(),
            BodyKind::Static => RigidBodyBuilder::fixed(),
        };
        let body = builder
            .position(to_isometry(desc.location, desc.rotation))
            .linear_damping(desc.linear_damping)
            .angular_damping(desc.angular_damping)
            .gravity_scale(if desc.use_gravity { 1.0 } else { 0.0 })
            .user_data(entity.to_bits() as u128)
            .build();

        let (shape, offset) = match desc.collider {
            ColliderDesc::Box { half_extent, offset } => {
                (SharedShape::cuboid(half_extent.x, half_extent.y, half_extent.z), offset)
            }
            ColliderDesc::Sphere { radius, offset } => (SharedShape::ball(radius), offset),
        };
        let layer = if desc.kind == BodyKind::Static {
            layers::NON_MOVING
        } else {
            layers::MOVING
        };
        let collider = ColliderBuilder::new(shape)
            .translation(to_vector(offset))
            .mass(desc.mass)
            .collision_groups(membership(layer))
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();

        let handle = self.insert_body(body, collider);
        tracing::trace!(%entity, kind = ?desc.kind, "rigid body created");
        to_body_id(handle)
    }

    fn create_character(&mut self, entity: Entity, desc: &CharacterDesc) -> BodyId {
        let body = RigidBodyBuilder::kinematic_position_based()
            .position(to_isometry(desc.location, desc.rotation))
            .user_data(entity.to_bits() as u128)
            .build();
        let collider = ColliderBuilder::capsule_y(desc.half_height, desc.radius)
            .mass(desc.mass)
            .collision_groups(membership(layers::MOVING))
            .build();
        let handle = self.insert_body(body, collider);

        let slope = desc.max_slope_angle.to_radians();
        let controller = KinematicCharacterController {
            offset: CharacterLength::Absolute(CHARACTER_OFFSET),
            max_slope_climb_angle: slope,
            min_slope_slide_angle: slope,
            autostep: Some(CharacterAutostep {
                max_height: CharacterLength::Absolute(desc.step_height),
                min_width: CharacterLength::Absolute(0.2),
                include_dynamic_bodies: true,
            }),
            ..KinematicCharacterController::default()
        };
        self.characters.insert(
            handle,
            CharacterState {
                controller,
                half_height: desc.half_height,
                radius: desc.radius,
                ground: GroundState::InAir,
                ground_velocity: Vec3::ZERO,
            },
        );
        tracing::trace!(%entity, "character created");
        to_body_id(handle)
    }

    fn remove_body(&mut self, body: BodyId) -> bool {
        let handle = to_handle(body);
        self.characters.remove(&handle);
        let removed = self
            .rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some();
        if removed {
            self.query_pipeline.update(&self.collider_set);
        }
        removed
    }

    fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    fn is_body_active(&self, body: BodyId) -> bool {
        self.rigid_body_set
            .get(to_handle(body))
            .is_some_and(|rb| !rb.is_fixed() && !rb.is_sleeping())
    }

    fn body_transform(&self, body: BodyId) -> Option<(Vec3, Quat)> {
        let rb = self.rigid_body_set.get(to_handle(body))?;
        let pose = rb.position();
        Some((from_vector(&pose.translation.vector), from_rotation(&pose.rotation)))
    }

    fn set_body_transform(&mut self, body: BodyId, location: Vec3, rotation: Quat) {
        let Some(rb) = self.rigid_body_set.get_mut(to_handle(body)) else {
            return;
        };
        let pose = to_isometry(location, rotation);
        if rb.is_kinematic() {
            rb.set_next_kinematic_position(pose);
        } else {
            rb.set_position(pose, true);
        }
    }

    fn integrate(&mut self, dt: f64) {
        self.integration_params.dt = dt as Real;

        let (collision_send, collision_recv) = rapier3d::crossbeam::channel::unbounded::<CollisionEvent>();
        let (force_send, _force_recv) = rapier3d::crossbeam::channel::unbounded::<ContactForceEvent>();
        let event_handler = ChannelEventCollector::new(collision_send, force_send);

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &event_handler,
        );

        self.collisions.clear();
        while let Ok(event) = collision_recv.try_recv() {
            if let CollisionEvent::Started(a, b, _) = event {
                if let (Some((_, ea)), Some((_, eb))) = (self.collider_entity(a), self.collider_entity(b)) {
                    self.collisions.push((ea.min(eb), ea.max(eb)));
                }
            }
        }
        // Channel delivery order is not part of the determinism contract.
        self.collisions.sort();
    }

    fn ground_state(&self, character: BodyId) -> GroundState {
        self.characters
            .get(&to_handle(character))
            .map_or(GroundState::InAir, |state| state.ground)
    }

    fn ground_velocity(&self, character: BodyId) -> Vec3 {
        self.characters
            .get(&to_handle(character))
            .map_or(Vec3::ZERO, |state| state.ground_velocity)
    }

    fn move_character(
        &self,
        character: BodyId,
        velocity: Vec3,
        settings: &CharacterMoveSettings,
        dt: f32,
    ) -> Option<CharacterMove> {
        let handle = to_handle(character);
        let state = self.characters.get(&handle)?;
        let body = self.rigid_body_set.get(handle)?;
        let collider = self.collider_set.get(*body.colliders().first()?)?;

        let mut controller = state.controller.clone();
        controller.snap_to_ground = Some(CharacterLength::Absolute(settings.stick_to_floor_step_down));
        if let Some(autostep) = controller.autostep.as_mut() {
            if let CharacterLength::Absolute(height) = autostep.max_height {
                autostep.max_height = CharacterLength::Absolute(height.max(settings.walk_stairs_step_up));
            }
        }

        let mut translation = velocity * dt;
        if state.ground != GroundState::InAir && translation.y <= 0.0 {
            translation.y -= GROUND_PRESS;
        }

        let mut floor_normal: Option<Vec3> = None;
        let movement = controller.move_shape(
            dt,
            &self.rigid_body_set,
            &self.collider_set,
            &self.query_pipeline,
            collider.shape(),
            body.position(),
            to_vector(translation),
            QueryFilter::default().exclude_rigid_body(handle),
            |collision| {
                let normal = from_vector(&collision.hit.normal1);
                if normal.y > 0.0 && floor_normal.map_or(true, |best| normal.y > best.y) {
                    floor_normal = Some(normal);
                }
            },
        );

        let location = from_vector(&(body.position().translation.vector + movement.translation));
        let support = if movement.grounded {
            self.support(handle, location, state)
        } else {
            None
        };
        let floor_normal = floor_normal.or(support.map(|(normal, _)| normal));
        let ground_state = classify_ground(movement.grounded, floor_normal, controller.max_slope_climb_angle);
        Some(CharacterMove {
            location,
            ground_state,
            ground_velocity: support.map_or(Vec3::ZERO, |(_, velocity)| velocity),
        })
    }

    fn apply_character_move(&mut self, character: BodyId, result: &CharacterMove) {
        let handle = to_handle(character);
        if let Some(state) = self.characters.get_mut(&handle) {
            state.ground = result.ground_state;
            state.ground_velocity = result.ground_velocity;
        }
        if let Some(rb) = self.rigid_body_set.get_mut(handle) {
            let rotation = rb.position().rotation;
            rb.set_next_kinematic_position(Isometry::from_parts(
                Translation3::from(to_vector(result.location)),
                rotation,
            ));
        }
    }

    fn cast_ray(&self, settings: &RayCastSettings) -> Option<RayHit> {
        let delta = settings.end - settings.start;
        if delta.length_squared() <= f32::EPSILON {
            return None;
        }
        let ray = Ray::new(
            point![settings.start.x, settings.start.y, settings.start.z],
            to_vector(delta),
        );
        let ignored: Vec<RigidBodyHandle> = settings.ignore_bodies.iter().copied().map(to_handle).collect();
        let predicate = |_: ColliderHandle, collider: &Collider| {
            collider.parent().map_or(true, |parent| !ignored.contains(&parent))
        };
        let filter = QueryFilter::default()
            .groups(query_groups(settings.layer_mask))
            .predicate(&predicate);

        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.rigid_body_set,
            &self.collider_set,
            &ray,
            1.0,
            true,
            filter,
        )?;
        let fraction = hit.time_of_impact;
        let (parent, entity) = self.collider_entity(collider)?;

        Some(RayHit {
            body: to_body_id(parent),
            entity,
            start: settings.start,
            end: settings.end,
            location: settings.start + delta * fraction,
            normal: from_vector(&hit.normal),
            fraction,
        })
    }

    fn overlap_sphere(&self, settings: &SphereCastSettings) -> Vec<RayHit> {
        let delta = settings.end - settings.start;
        let capsule = Capsule::new(
            point![settings.start.x, settings.start.y, settings.start.z],
            point![settings.end.x, settings.end.y, settings.end.z],
            settings.radius,
        );
        let ignored: Vec<RigidBodyHandle> = settings.ignore_bodies.iter().copied().map(to_handle).collect();
        let predicate = |_: ColliderHandle, collider: &Collider| {
            collider.parent().map_or(true, |parent| !ignored.contains(&parent))
        };
        let filter = QueryFilter::default()
            .groups(query_groups(settings.layer_mask))
            .predicate(&predicate);

        let mut touched = Vec::new();
        self.query_pipeline.intersections_with_shape(
            &self.rigid_body_set,
            &self.collider_set,
            &Isometry::identity(),
            &capsule,
            filter,
            |collider| {
                touched.push(collider);
                true
            },
        );

        let length_sq = delta.length_squared();
        let mut hits: Vec<RayHit> = touched
            .into_iter()
            .filter_map(|handle| {
                let collider = self.collider_set.get(handle)?;
                let (parent, entity) = self.collider_entity(handle)?;
                let location = from_vector(&collider.position().translation.vector);
                let fraction = if length_sq > f32::EPSILON {
                    ((location - settings.start).dot(delta) / length_sq).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let on_path = settings.start + delta * fraction;
                Some(RayHit {
                    body: to_body_id(parent),
                    entity,
                    start: settings.start,
                    end: settings.end,
                    location,
                    normal: (on_path - location).normalize_or_zero(),
                    fraction,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.fraction.total_cmp(&b.fraction).then(a.body.cmp(&b.body)));
        hits
    }

    fn clear(&mut self) {
        let gravity = self.gravity();
        *self = Self::new(gravity);
    }

    fn empty_scene(&self) -> Box<dyn PhysicsScene> {
        Box::new(Self::new(self.gravity()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
