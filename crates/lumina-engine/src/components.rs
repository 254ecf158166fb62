//! Built-in components.
//!
//! Everything here is plain data. Components reachable by name (scripts,
//! entity copying) are registered through [`register_builtin_components`].
//! [`PhysicsBodyHandle`] is runtime-only and deliberately left unregistered,
//! so copies and duplicates never share a physics body.

use glam::{EulerRot, Quat, Vec2, Vec3};
use lumina_ecs::component::{Component, ComponentRegistry};
use lumina_ecs::entity::{Entity, EntityMap};

use crate::physics::{BodyId, BodyKind};

// ---------------------------------------------------------------------------
// Scene components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    pub location: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub fn from_location(location: Vec3) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.location += offset;
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Component for Transform {}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Name(pub String);

impl Name {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Component for Name {}

/// Marker: the transform changed since the last render. Consumed by
/// [`World::render`](crate::world::World::render).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NeedsTransformUpdate;

impl Component for NeedsTransformUpdate {}

/// Parent/child links. Destroying a parent destroys its children.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Relationship {
    pub parent: Option<Entity>,
    pub children: Vec<Entity>,
}

impl Component for Relationship {
    fn remap_entities(&mut self, map: &EntityMap) {
        self.parent = self.parent.map(|p| map.remap(p)).filter(|p| !p.is_null());
        self.children = self
            .children
            .iter()
            .map(|&c| map.remap(c))
            .filter(|c| !c.is_null())
            .collect();
    }
}

// ---------------------------------------------------------------------------
// Physics components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BodyType {
    #[default]
    Dynamic,
    Kinematic,
    Static,
}

impl BodyType {
    pub fn kind(self) -> BodyKind {
        match self {
            BodyType::Dynamic => BodyKind::Dynamic,
            BodyType::Kinematic => BodyKind::Kinematic,
            BodyType::Static => BodyKind::Static,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RigidBody {
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub body_type: BodyType,
    pub use_gravity: bool,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            mass: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.05,
            body_type: BodyType::Dynamic,
            use_gravity: true,
        }
    }
}

impl Component for RigidBody {}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BoxCollider {
    pub half_extent: Vec3,
    pub offset: Vec3,
}

impl Default for BoxCollider {
    fn default() -> Self {
        Self {
            half_extent: Vec3::splat(0.5),
            offset: Vec3::ZERO,
        }
    }
}

impl Component for BoxCollider {}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SphereCollider {
    pub radius: f32,
    pub offset: Vec3,
}

impl Default for SphereCollider {
    fn default() -> Self {
        Self {
            radius: 0.5,
            offset: Vec3::ZERO,
        }
    }
}

impl Component for SphereCollider {}

/// Link from an entity to its body in the physics scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicsBodyHandle {
    pub body: BodyId,
    pub kind: BodyKind,
}

impl Component for PhysicsBodyHandle {}

// ---------------------------------------------------------------------------
// Character components
// ---------------------------------------------------------------------------

/// Shape and limits of a character body.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CharacterPhysics {
    pub half_height: f32,
    pub radius: f32,
    pub mass: f32,
    pub max_strength: f32,
    /// Degrees.
    pub max_slope_angle: f32,
    pub step_height: f32,
}

impl Default for CharacterPhysics {
    fn default() -> Self {
        Self {
            half_height: 1.8,
            radius: 1.0,
            mass: 70.0,
            max_strength: 100.0,
            max_slope_angle: 45.0,
            step_height: 0.4,
        }
    }
}

impl Component for CharacterPhysics {}

/// Movement tuning plus the state the character pass carries between frames.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CharacterMovement {
    pub move_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    /// Blend factor applied to acceleration while airborne.
    pub air_control: f32,
    pub ground_friction: f32,
    pub jump_speed: f32,
    pub max_jump_count: u32,
    pub gravity: f32,

    pub velocity: Vec3,
    pub grounded: bool,
    pub jump_count: u32,
}

impl Default for CharacterMovement {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            acceleration: 10.0,
            deceleration: 8.0,
            air_control: 0.3,
            ground_friction: 8.0,
            jump_speed: 8.0,
            max_jump_count: 1,
            gravity: -9.81,
            velocity: Vec3::ZERO,
            grounded: false,
            jump_count: 0,
        }
    }
}

impl Component for CharacterMovement {}

/// Per-frame input for a character. Movement and jump requests are consumed
/// by the character pass; `look_input` is an absolute orientation in
/// degrees (`x` = yaw, `y` = pitch) and persists.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CharacterController {
    pub move_input: Vec3,
    pub look_input: Vec2,
    pub jump_pressed: bool,
}

impl CharacterController {
    /// Accumulate movement input; `x` strafes right, `y` moves forward.
    pub fn add_movement_input(&mut self, input: Vec3) {
        self.move_input += input;
    }

    pub fn add_look_input(&mut self, input: Vec2) {
        self.look_input += input;
    }

    pub fn jump(&mut self) {
        self.jump_pressed = true;
    }

    /// Facing rotation around +Y for the current yaw.
    pub fn yaw_rotation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.look_input.x.to_radians(), 0.0, 0.0)
    }
}

impl Component for CharacterController {}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

/// Clip playback state advanced by the animation system.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnimationPlayback {
    pub current_time: f32,
    pub duration: f32,
    pub playback_speed: f32,
    pub playing: bool,
    pub looping: bool,
}

impl AnimationPlayback {
    pub fn new(duration: f32) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    /// Advance by `dt`, wrapping or clamping at the end of the clip.
    pub fn advance(&mut self, dt: f32) {
        if !self.playing || self.duration <= 0.0 {
            return;
        }
        self.current_time += dt * self.playback_speed;
        if self.looping {
            self.current_time = self.current_time.rem_euclid(self.duration);
        } else if self.current_time >= self.duration {
            self.current_time = self.duration;
            self.playing = false;
        } else if self.current_time < 0.0 {
            self.current_time = 0.0;
            self.playing = false;
        }
    }

    /// Playback position in `0.0..=1.0`.
    pub fn normalized_time(&self) -> f32 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for AnimationPlayback {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            playback_speed: 1.0,
            playing: true,
            looping: true,
        }
    }
}

impl Component for AnimationPlayback {}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register every built-in component under its script-facing name.
pub fn register_builtin_components(components: &mut ComponentRegistry) {
    components.register::<Transform>("transform");
    components.register::<Name>("name");
    components.register::<NeedsTransformUpdate>("needs_transform_update");
    components.register::<Relationship>("relationship");
    components.register::<RigidBody>("rigid_body");
    components.register::<BoxCollider>("box_collider");
    components.register::<SphereCollider>("sphere_collider");
    components.register::<CharacterPhysics>("character_physics");
    components.register::<CharacterMovement>("character_movement");
    components.register::<CharacterController>("character_controller");
    components.register::<AnimationPlayback>("animation_playback");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
