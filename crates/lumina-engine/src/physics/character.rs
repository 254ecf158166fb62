//! Character controller pass.
//!
//! Runs once per frame that integrates at least one physics step, before the
//! steps. Characters are gathered into a flat batch, each element is updated
//! on the worker pool (motion math plus a read-only sweep through the
//! physics scene), and results are written back on the frame thread in
//! gather order. Elements never touch each other, so the outcome does not
//! depend on how the batch is split across workers.

use glam::Vec3;
use lumina_ecs::entity::Entity;
use lumina_ecs::registry::Registry;

use super::{BodyId, BodyKind, CharacterMove, CharacterMoveSettings, GroundState, PhysicsScene};
use crate::components::{CharacterController, CharacterMovement, PhysicsBodyHandle};
use crate::workers::WorkerPool;

/// Input magnitudes below this are treated as no input.
const INPUT_DEADZONE: f32 = 0.001;

// ---------------------------------------------------------------------------
// Motion
// ---------------------------------------------------------------------------

/// Advance one character's movement state by `dt` and return the velocity
/// to sweep with. Consumes `move_input` and `jump_pressed`.
pub fn compute_character_motion(
    controller: &mut CharacterController,
    movement: &mut CharacterMovement,
    ground: GroundState,
    ground_velocity: Vec3,
    dt: f32,
) -> Vec3 {
    let was_grounded = movement.grounded;
    movement.grounded = ground == GroundState::OnGround;
    if !was_grounded && movement.grounded {
        movement.jump_count = 0;
    }

    let mut direction = Vec3::ZERO;
    if controller.move_input.length() > INPUT_DEADZONE {
        let yaw = controller.yaw_rotation();
        let forward = flatten(yaw * Vec3::NEG_Z);
        let right = flatten(yaw * Vec3::X);
        direction = (forward * controller.move_input.y + right * controller.move_input.x).normalize_or_zero();
    }

    let target = direction * movement.move_speed;
    let mut horizontal = Vec3::new(movement.velocity.x, 0.0, movement.velocity.z);
    if target.length() > INPUT_DEADZONE {
        let control = if movement.grounded { 1.0 } else { movement.air_control };
        let blend = (movement.acceleration * control * dt).clamp(0.0, 1.0);
        horizontal = horizontal.lerp(target, blend);
    } else {
        let rate = if movement.grounded {
            movement.ground_friction
        } else {
            movement.deceleration * movement.air_control
        };
        horizontal *= (1.0 - rate * dt).max(0.0);
    }
    movement.velocity.x = horizontal.x;
    movement.velocity.z = horizontal.z;

    let can_jump = controller.jump_pressed && movement.jump_count < movement.max_jump_count;
    if movement.grounded {
        movement.velocity.x += ground_velocity.x;
        movement.velocity.z += ground_velocity.z;
        movement.velocity.y = 0.0;
    } else {
        movement.velocity.y += movement.gravity * dt;
    }
    if can_jump {
        movement.velocity.y = movement.jump_speed;
        movement.jump_count += 1;
        movement.grounded = false;
    }

    controller.move_input = Vec3::ZERO;
    controller.jump_pressed = false;
    movement.velocity
}

fn flatten(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z).normalize_or_zero()
}

// ---------------------------------------------------------------------------
// CharacterPass
// ---------------------------------------------------------------------------

struct CharacterWork {
    entity: Entity,
    body: BodyId,
    controller: CharacterController,
    movement: CharacterMovement,
    ground: GroundState,
    ground_velocity: Vec3,
    result: Option<CharacterMove>,
}

#[derive(Debug, Clone, Default)]
pub struct CharacterPass {
    pub settings: CharacterMoveSettings,
}

impl CharacterPass {
    pub fn new(settings: CharacterMoveSettings) -> Self {
        Self { settings }
    }

    /// Update every character by `dt`. Returns how many were moved.
    pub fn run(
        &self,
        registry: &mut Registry,
        physics: &mut dyn PhysicsScene,
        workers: &WorkerPool,
        dt: f32,
    ) -> usize {
        let mut batch = gather(registry, physics);
        if batch.is_empty() {
            return 0;
        }

        let scene: &dyn PhysicsScene = &*physics;
        let settings = &self.settings;
        workers.parallel_for(&mut batch, |work| {
            let velocity = compute_character_motion(
                &mut work.controller,
                &mut work.movement,
                work.ground,
                work.ground_velocity,
                dt,
            );
            work.result = scene.move_character(work.body, velocity, settings, dt);
        });

        let moved = batch.len();
        for work in batch {
            if let Some(controller) = registry.get_mut::<CharacterController>(work.entity) {
                *controller = work.controller;
            }
            if let Some(movement) = registry.get_mut::<CharacterMovement>(work.entity) {
                *movement = work.movement;
            }
            if let Some(result) = work.result {
                physics.apply_character_move(work.body, &result);
            }
        }
        tracing::trace!(characters = moved, dt, "character pass");
        moved
    }
}

fn gather(registry: &Registry, physics: &dyn PhysicsScene) -> Vec<CharacterWork> {
    registry
        .entities_with::<(CharacterController, CharacterMovement, PhysicsBodyHandle)>()
        .into_iter()
        .filter_map(|entity| {
            let handle = registry.get::<PhysicsBodyHandle>(entity)?;
            if handle.kind != BodyKind::Character {
                return None;
            }
            let body = handle.body;
            Some(CharacterWork {
                entity,
                body,
                controller: *registry.get::<CharacterController>(entity)?,
                movement: *registry.get::<CharacterMovement>(entity)?,
                ground: physics.ground_state(body),
                ground_velocity: physics.ground_velocity(body),
                result: None,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn step(
        controller: &mut CharacterController,
        movement: &mut CharacterMovement,
        ground: GroundState,
    ) -> Vec3 {
        compute_character_motion(controller, movement, ground, Vec3::ZERO, DT)
    }

    // -- 1. ground transitions ------------------------------------------------

    #[test]
    fn landing_resets_jump_count() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            jump_count: 1,
            ..CharacterMovement::default()
        };
        step(&mut controller, &mut movement, GroundState::InAir);
        assert_eq!(movement.jump_count, 1, "no reset while airborne");
        step(&mut controller, &mut movement, GroundState::OnGround);
        assert_eq!(movement.jump_count, 0);
        assert!(movement.grounded);
    }

    #[test]
    fn staying_grounded_does_not_reset() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            grounded: true,
            jump_count: 1,
            ..CharacterMovement::default()
        };
        step(&mut controller, &mut movement, GroundState::OnGround);
        assert_eq!(movement.jump_count, 1);
    }

    #[test]
    fn steep_ground_is_not_grounded() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement::default();
        let velocity = step(&mut controller, &mut movement, GroundState::OnSteepGround);
        assert!(!movement.grounded);
        assert!(velocity.y < 0.0, "gravity applies");
    }

    // -- 2. jumping -----------------------------------------------------------

    #[test]
    fn jump_from_ground_consumes_a_jump() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            grounded: true,
            ..CharacterMovement::default()
        };
        controller.jump();
        let velocity = step(&mut controller, &mut movement, GroundState::OnGround);
        assert_eq!(velocity.y, movement.jump_speed);
        assert_eq!(movement.jump_count, 1);
        assert!(!controller.jump_pressed, "jump request is consumed");

        controller.jump();
        let velocity = step(&mut controller, &mut movement, GroundState::InAir);
        assert!(velocity.y < movement.jump_speed, "no second jump with max_jump_count = 1");
        assert_eq!(movement.jump_count, 1);
    }

    #[test]
    fn double_jump_when_allowed() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            max_jump_count: 2,
            jump_count: 1,
            velocity: Vec3::new(0.0, -3.0, 0.0),
            ..CharacterMovement::default()
        };
        controller.jump();
        let velocity = step(&mut controller, &mut movement, GroundState::InAir);
        assert_eq!(velocity.y, movement.jump_speed);
        assert_eq!(movement.jump_count, 2);
    }

    // -- 3. horizontal motion ---------------------------------------------------

    #[test]
    fn forward_input_accelerates_along_yaw() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            grounded: true,
            ..CharacterMovement::default()
        };
        controller.add_look_input(glam::Vec2::new(90.0, 0.0));
        controller.add_movement_input(Vec3::new(0.0, 1.0, 0.0));
        let velocity = step(&mut controller, &mut movement, GroundState::OnGround);
        assert!(velocity.x < 0.0, "yaw 90 faces -X, got {velocity}");
        assert!(velocity.z.abs() < 1e-4);
        assert_eq!(controller.move_input, Vec3::ZERO, "movement input is consumed");
        assert_eq!(controller.look_input.x, 90.0, "look input persists");
    }

    #[test]
    fn air_control_scales_acceleration() {
        let mut ground_c = CharacterController::default();
        let mut air_c = CharacterController::default();
        let mut on_ground = CharacterMovement {
            grounded: true,
            ..CharacterMovement::default()
        };
        let mut in_air = CharacterMovement::default();
        ground_c.add_movement_input(Vec3::Y);
        air_c.add_movement_input(Vec3::Y);
        let g = step(&mut ground_c, &mut on_ground, GroundState::OnGround);
        let a = step(&mut air_c, &mut in_air, GroundState::InAir);
        let ratio = a.z / g.z;
        assert!((ratio - in_air.air_control).abs() < 1e-4, "ratio {ratio}");
    }

    #[test]
    fn friction_decays_without_input() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            grounded: true,
            velocity: Vec3::new(4.0, 0.0, 0.0),
            ..CharacterMovement::default()
        };
        let velocity = step(&mut controller, &mut movement, GroundState::OnGround);
        let expected = 4.0 * (1.0 - movement.ground_friction * DT);
        assert!((velocity.x - expected).abs() < 1e-5);

        let mut stopped = CharacterMovement {
            grounded: true,
            velocity: Vec3::new(4.0, 0.0, 0.0),
            ..CharacterMovement::default()
        };
        let velocity = compute_character_motion(&mut controller, &mut stopped, GroundState::OnGround, Vec3::ZERO, 1.0);
        assert_eq!(velocity.x, 0.0, "friction never reverses direction");
    }

    #[test]
    fn ground_velocity_carries_character() {
        let mut controller = CharacterController::default();
        let mut movement = CharacterMovement {
            grounded: true,
            ..CharacterMovement::default()
        };
        let velocity = compute_character_motion(
            &mut controller,
            &mut movement,
            GroundState::OnGround,
            Vec3::new(2.0, 5.0, 0.0),
            DT,
        );
        assert_eq!(velocity, Vec3::new(2.0, 0.0, 0.0));
    }
}
