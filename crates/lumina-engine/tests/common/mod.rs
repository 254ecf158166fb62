//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use lumina_engine::physics::{
    BodyDesc, BodyId, BodyKind, CharacterDesc, CharacterMove, CharacterMoveSettings, GroundState,
    PhysicsScene, RayCastSettings, RayHit, SphereCastSettings,
};
use lumina_engine::prelude::*;

// ---------------------------------------------------------------------------
// MockScene
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockBody {
    pub entity: Entity,
    pub kind: BodyKind,
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub active: bool,
}

/// A scene with scripted behaviour: bodies drift by their velocity on every
/// step, characters report a fixed ground state.
#[derive(Debug, Default)]
pub struct MockScene {
    next: u64,
    pub bodies: BTreeMap<u64, MockBody>,
    /// Step sizes passed to `integrate`, in call order.
    pub integrated: Vec<f64>,
    pub ground: GroundState,
}

impl MockScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grounded() -> Self {
        Self {
            ground: GroundState::OnGround,
            ..Self::default()
        }
    }

    fn insert(&mut self, body: MockBody) -> BodyId {
        let id = self.next;
        self.next += 1;
        self.bodies.insert(id, body);
        BodyId(id)
    }
}

impl PhysicsScene for MockScene {
    fn create_body(&mut self, entity: Entity, desc: &BodyDesc) -> BodyId {
        self.insert(MockBody {
            entity,
            kind: desc.kind,
            location: desc.location,
            rotation: desc.rotation,
            velocity: Vec3::ZERO,
            active: desc.kind != BodyKind::Static,
        })
    }

    fn create_character(&mut self, entity: Entity, desc: &CharacterDesc) -> BodyId {
        self.insert(MockBody {
            entity,
            kind: BodyKind::Character,
            location: desc.location,
            rotation: desc.rotation,
            velocity: Vec3::ZERO,
            active: true,
        })
    }

    fn remove_body(&mut self, body: BodyId) -> bool {
        self.bodies.remove(&body.0).is_some()
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn is_body_active(&self, body: BodyId) -> bool {
        self.bodies.get(&body.0).is_some_and(|b| b.active)
    }

    fn body_transform(&self, body: BodyId) -> Option<(Vec3, Quat)> {
        self.bodies.get(&body.0).map(|b| (b.location, b.rotation))
    }

    fn set_body_transform(&mut self, body: BodyId, location: Vec3, rotation: Quat) {
        if let Some(b) = self.bodies.get_mut(&body.0) {
            b.location = location;
            b.rotation = rotation;
        }
    }

    fn integrate(&mut self, dt: f64) {
        self.integrated.push(dt);
        for body in self.bodies.values_mut() {
            if body.active && body.kind == BodyKind::Dynamic {
                body.location += body.velocity * dt as f32;
            }
        }
    }

    fn ground_state(&self, _character: BodyId) -> GroundState {
        self.ground
    }

    fn ground_velocity(&self, _character: BodyId) -> Vec3 {
        Vec3::ZERO
    }

    fn move_character(
        &self,
        character: BodyId,
        velocity: Vec3,
        _settings: &CharacterMoveSettings,
        dt: f32,
    ) -> Option<CharacterMove> {
        let body = self.bodies.get(&character.0)?;
        Some(CharacterMove {
            location: body.location + velocity * dt,
            ground_state: self.ground,
            ground_velocity: Vec3::ZERO,
        })
    }

    fn apply_character_move(&mut self, character: BodyId, result: &CharacterMove) {
        if let Some(body) = self.bodies.get_mut(&character.0) {
            body.location = result.location;
        }
    }

    fn cast_ray(&self, _settings: &RayCastSettings) -> Option<RayHit> {
        None
    }

    fn overlap_sphere(&self, _settings: &SphereCastSettings) -> Vec<RayHit> {
        Vec::new()
    }

    fn clear(&mut self) {
        self.bodies.clear();
    }

    fn empty_scene(&self) -> Box<dyn PhysicsScene> {
        Box::new(MockScene {
            ground: self.ground,
            ..MockScene::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Records `<name>:<stage>` on every update.
pub struct Tracer {
    pub name: &'static str,
    pub priorities: UpdatePriorityList,
    pub log: CallLog,
}

impl Tracer {
    pub fn new(name: &'static str, priorities: UpdatePriorityList, log: &CallLog) -> Self {
        Self {
            name,
            priorities,
            log: Rc::clone(log),
        }
    }
}

impl EntitySystem for Tracer {
    fn name(&self) -> &str {
        self.name
    }

    fn priority_list(&self) -> UpdatePriorityList {
        self.priorities
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        self.log.borrow_mut().push(format!("{}:{}", self.name, ctx.stage()));
    }
}

// ---------------------------------------------------------------------------
// Engine helpers
// ---------------------------------------------------------------------------

pub fn engine() -> Engine {
    Engine::builder().worker_threads(2).build().unwrap()
}

pub fn engine_with_threads(threads: usize) -> Engine {
    Engine::builder().worker_threads(threads).build().unwrap()
}
