//! Physics collaborator interface and the per-frame physics pass.
//!
//! The solver itself is imported: [`PhysicsScene`] is the narrow seam the
//! world drives, and [`RapierScene`](rapier::RapierScene) implements it with
//! rapier3d. Everything above the seam (accumulator, transform sync,
//! character pass) lives in this module tree and is solver-agnostic.
//!
//! # Determinism
//!
//! rapier3d is compiled with `enhanced-determinism`. Bodies are created in
//! entity order and the character pass writes results back in gather order,
//! so a run does not depend on worker scheduling.

pub mod character;
pub mod rapier;
pub mod stepper;
pub mod sync;

use glam::{Quat, Vec3};
use lumina_ecs::entity::Entity;

use crate::debug_draw::Color;

pub use character::CharacterPass;
pub use rapier::RapierScene;
pub use stepper::FixedStepper;

/// Collision layer bits used for collider membership and query masks.
pub mod layers {
    /// Static geometry.
    pub const NON_MOVING: u32 = 1 << 0;
    /// Dynamic, kinematic and character bodies.
    pub const MOVING: u32 = 1 << 1;
    pub const ALL: u32 = u32::MAX;
}

// ---------------------------------------------------------------------------
// Handles and descriptors
// ---------------------------------------------------------------------------

/// Opaque handle of a body inside a [`PhysicsScene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BodyId(pub u64);

impl BodyId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }
}

/// How the solver treats a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BodyKind {
    /// Fully simulated.
    Dynamic,
    /// Moved by game code through kinematic targets.
    Kinematic,
    /// Never moves.
    Static,
    /// Moved by the character pass.
    Character,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderDesc {
    Box { half_extent: Vec3, offset: Vec3 },
    Sphere { radius: f32, offset: Vec3 },
}

/// Everything needed to create a rigid body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub location: Vec3,
    pub rotation: Quat,
    pub collider: ColliderDesc,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub use_gravity: bool,
}

/// Everything needed to create a character body.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterDesc {
    pub location: Vec3,
    pub rotation: Quat,
    pub half_height: f32,
    pub radius: f32,
    pub mass: f32,
    /// Degrees.
    pub max_slope_angle: f32,
    pub step_height: f32,
}

// ---------------------------------------------------------------------------
// Character movement
// ---------------------------------------------------------------------------

/// Support state of a character after its last move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum GroundState {
    /// Standing on walkable ground.
    OnGround,
    /// Touching ground too steep to stand on.
    OnSteepGround,
    /// Touching something that does not support it.
    NotSupported,
    #[default]
    InAir,
}

/// Result of a read-only character sweep, applied later with
/// [`PhysicsScene::apply_character_move`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CharacterMove {
    /// Position after sweep-and-slide.
    pub location: Vec3,
    pub ground_state: GroundState,
    /// Velocity of the supporting body, zero when unsupported.
    pub ground_velocity: Vec3,
}

/// Extra motion settings for a character sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterMoveSettings {
    /// Downward probe keeping the character glued to slopes and stairs.
    pub stick_to_floor_step_down: f32,
    /// Minimum upward step attempted when walking into stairs.
    pub walk_stairs_step_up: f32,
}

impl Default for CharacterMoveSettings {
    fn default() -> Self {
        Self {
            stick_to_floor_step_down: 0.5,
            walk_stairs_step_up: 0.04,
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RayCastSettings {
    pub start: Vec3,
    pub end: Vec3,
    pub draw_debug: bool,
    pub debug_duration: f32,
    pub debug_hit_color: Color,
    pub debug_miss_color: Color,
    /// Only colliders whose layer bits intersect this mask are hit.
    pub layer_mask: u32,
    pub ignore_bodies: Vec<BodyId>,
}

impl Default for RayCastSettings {
    fn default() -> Self {
        Self {
            start: Vec3::ZERO,
            end: Vec3::ZERO,
            draw_debug: false,
            debug_duration: 0.0,
            debug_hit_color: Color::GREEN,
            debug_miss_color: Color::RED,
            layer_mask: layers::ALL,
            ignore_bodies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SphereCastSettings {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub draw_debug: bool,
    pub debug_duration: f32,
    pub layer_mask: u32,
    pub ignore_bodies: Vec<BodyId>,
}

impl Default for SphereCastSettings {
    fn default() -> Self {
        Self {
            start: Vec3::ZERO,
            end: Vec3::ZERO,
            radius: 0.5,
            draw_debug: false,
            debug_duration: 0.0,
            layer_mask: layers::ALL,
            ignore_bodies: Vec::new(),
        }
    }
}

/// One query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: BodyId,
    /// Entity the body was created for, `Entity::NULL` if unknown.
    pub entity: Entity,
    pub start: Vec3,
    pub end: Vec3,
    pub location: Vec3,
    pub normal: Vec3,
    /// Hit position as a fraction of `start..end`.
    pub fraction: f32,
}

// ---------------------------------------------------------------------------
// PhysicsScene
// ---------------------------------------------------------------------------

/// The solver seam.
///
/// `move_character` and the queries take `&self` so the character pass can
/// sweep many characters from worker threads at once; every mutation goes
/// through `&mut self` on the frame thread.
pub trait PhysicsScene: Send + Sync {
    fn create_body(&mut self, entity: Entity, desc: &BodyDesc) -> BodyId;

    fn create_character(&mut self, entity: Entity, desc: &CharacterDesc) -> BodyId;

    /// Returns `false` if the body does not exist.
    fn remove_body(&mut self, body: BodyId) -> bool;

    fn body_count(&self) -> usize;

    /// Awake and movable. Sleeping, static and unknown bodies are inactive.
    fn is_body_active(&self, body: BodyId) -> bool;

    fn body_transform(&self, body: BodyId) -> Option<(Vec3, Quat)>;

    /// Teleport a dynamic body or set the next target of a kinematic one.
    fn set_body_transform(&mut self, body: BodyId, location: Vec3, rotation: Quat);

    /// Advance the simulation by exactly `dt` seconds.
    fn integrate(&mut self, dt: f64);

    fn ground_state(&self, character: BodyId) -> GroundState;

    fn ground_velocity(&self, character: BodyId) -> Vec3;

    /// Sweep `character` along `velocity * dt` without mutating the scene.
    fn move_character(
        &self,
        character: BodyId,
        velocity: Vec3,
        settings: &CharacterMoveSettings,
        dt: f32,
    ) -> Option<CharacterMove>;

    fn apply_character_move(&mut self, character: BodyId, result: &CharacterMove);

    fn cast_ray(&self, settings: &RayCastSettings) -> Option<RayHit>;

    /// Every body overlapped by a sphere swept from `start` to `end`,
    /// nearest first.
    fn overlap_sphere(&self, settings: &SphereCastSettings) -> Vec<RayHit>;

    /// Remove every body.
    fn clear(&mut self);

    /// A new, empty scene with the same settings, for duplicated worlds.
    fn empty_scene(&self) -> Box<dyn PhysicsScene>;
}
