//! Script systems driven through whole frames: hooks, command application,
//! failure isolation and unloading.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{engine, CallLog, Tracer};
use lumina_engine::prelude::*;

fn at(stage: UpdateStage, priority: u8) -> UpdatePriorityList {
    UpdatePriorityList::new().with_priority(stage, UpdatePriority(priority))
}

/// Enabled only in `stage` at `priority`.
fn priority_fn(stage: u8, priority: u8) -> String {
    format!(
        r#"(func (export "priority") (param i32) (result i32)
            (if (result i32) (i32.eq (local.get 0) (i32.const {stage}))
                (then (i32.const {priority}))
                (else (i32.const -1))))"#
    )
}

/// Moves the entity with bits `target` to (1, 2, 3) during PrePhysics.
fn mover_script(target: u64) -> String {
    format!(
        r#"(module
            (import "lumina" "set_location" (func $set (param i64 f32 f32 f32)))
            {priority}
            (func (export "execute")
                (call $set (i64.const {target}) (f32.const 1) (f32.const 2) (f32.const 3))))"#,
        priority = priority_fn(1, 0),
    )
}

/// Records the target's x coordinate during PrePhysics, after the mover.
fn reader_script(target: u64) -> String {
    format!(
        r#"(module
            (import "lumina" "get_location" (func $get (param i64 i32) (result i32)))
            (memory (export "memory") 1)
            (global $x (mut i32) (i32.const -1))
            {priority}
            (func (export "execute")
                (drop (call $get (i64.const {target}) (i32.const 0)))
                (global.set $x (i32.trunc_f32_s (f32.load (i32.const 0)))))
            (func (export "x") (result i32) (global.get $x)))"#,
        priority = priority_fn(1, 5),
    )
}

/// A later revision of [`mover_script`]: runs in PostPhysics, moves the
/// target to (4, 5, 6) and counts its `init` calls.
fn revised_mover_script(target: u64) -> String {
    format!(
        r#"(module
            (import "lumina" "set_location" (func $set (param i64 f32 f32 f32)))
            (global $inits (mut i32) (i32.const 0))
            {priority}
            (func (export "init")
                (global.set $inits (i32.add (global.get $inits) (i32.const 1))))
            (func (export "execute")
                (call $set (i64.const {target}) (f32.const 4) (f32.const 5) (f32.const 6)))
            (func (export "inits") (result i32) (global.get $inits)))"#,
        priority = priority_fn(3, 7),
    )
}

/// Counts its executions, queues a move, then traps.
fn faulty_script(target: u64) -> String {
    format!(
        r#"(module
            (import "lumina" "set_location" (func $set (param i64 f32 f32 f32)))
            (global $runs (mut i32) (i32.const 0))
            {priority}
            (func (export "execute")
                (global.set $runs (i32.add (global.get $runs) (i32.const 1)))
                (call $set (i64.const {target}) (f32.const 9) (f32.const 9) (f32.const 9))
                unreachable)
            (func (export "runs") (result i32) (global.get $runs)))"#,
        priority = priority_fn(0, 0),
    )
}

/// Records `init`, `shutdown` and the stage index seen by `execute`.
const LIFECYCLE_SCRIPT: &str = r#"(module
    (import "lumina" "update_stage" (func $stage (result i32)))
    (global $inits (mut i32) (i32.const 0))
    (global $shutdowns (mut i32) (i32.const 0))
    (global $stage (mut i32) (i32.const -1))
    (func (export "priority") (param i32) (result i32)
        (if (result i32) (i32.eq (local.get 0) (i32.const 3))
            (then (i32.const 10))
            (else (i32.const -1))))
    (func (export "init")
        (global.set $inits (i32.add (global.get $inits) (i32.const 1))))
    (func (export "shutdown")
        (global.set $shutdowns (i32.add (global.get $shutdowns) (i32.const 1))))
    (func (export "execute")
        (global.set $stage (call $stage)))
    (func (export "inits") (result i32) (global.get $inits))
    (func (export "shutdowns") (result i32) (global.get $shutdowns))
    (func (export "last_stage") (result i32) (global.get $stage)))"#;

/// Draws one white line from the origin to +X each frame.
const DRAW_SCRIPT: &str = r#"(module
    (import "lumina" "draw_line"
        (func $line (param f32 f32 f32 f32 f32 f32 i32 f32)))
    (func (export "priority") (param i32) (result i32)
        (if (result i32) (i32.eq (local.get 0) (i32.const 4))
            (then (i32.const 0))
            (else (i32.const -1))))
    (func (export "execute")
        (call $line
            (f32.const 0) (f32.const 0) (f32.const 0)
            (f32.const 1) (f32.const 0) (f32.const 0)
            (i32.const -1) (f32.const 0))))"#;

/// Native system recording where `target` is when it runs.
struct Observer {
    target: Entity,
    seen: Rc<RefCell<Vec<Vec3>>>,
}

impl EntitySystem for Observer {
    fn name(&self) -> &str {
        "observer"
    }

    fn priority_list(&self) -> UpdatePriorityList {
        at(UpdateStage::PrePhysics, 200)
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        if let Some(t) = ctx.registry().get::<Transform>(self.target) {
            self.seen.borrow_mut().push(t.location);
        }
    }
}

// -- 1. command application ---------------------------------------------------

#[test]
fn script_commands_are_visible_to_later_systems_in_the_same_stage() {
    let mut engine = engine();
    let mut world = engine.create_world("commands");
    let target = world.construct_entity("target", Transform::default());

    let script = engine
        .load_script("mover", mover_script(target.to_bits()).as_bytes())
        .unwrap();
    assert!(world.register_script(&script).unwrap());
    let seen = Rc::new(RefCell::new(Vec::new()));
    world.register_system(Observer {
        target,
        seen: Rc::clone(&seen),
    });

    world.initialize();
    world.update(0.016).unwrap();

    assert_eq!(*seen.borrow(), vec![Vec3::new(1.0, 2.0, 3.0)]);
    assert!(world.registry().has::<NeedsTransformUpdate>(target));
}

#[test]
fn later_scripts_in_a_stage_read_earlier_script_writes() {
    let mut engine = engine();
    let mut world = engine.create_world("chain");
    let target = world.construct_entity("target", Transform::default());
    let mover = engine
        .load_script("mover", mover_script(target.to_bits()).as_bytes())
        .unwrap();
    let reader = engine
        .load_script("reader", reader_script(target.to_bits()).as_bytes())
        .unwrap();
    world.register_script(&reader).unwrap();
    world.register_script(&mover).unwrap();

    world.initialize();
    world.update(0.016).unwrap();
    assert_eq!(reader.borrow_mut().call_i32_export("x").unwrap(), 1);
}

#[test]
fn commands_against_stale_entities_are_ignored() {
    let mut engine = engine();
    let mut world = engine.create_world("stale");
    let target = world.construct_entity("target", Transform::default());
    let script = engine
        .load_script("mover", mover_script(target.to_bits()).as_bytes())
        .unwrap();
    world.register_script(&script).unwrap();
    assert!(world.destroy_entity(target));

    world.initialize();
    world.update(0.016).unwrap();
    assert_eq!(world.registry().len(), 0);
}

#[test]
fn drawn_lines_reach_the_batcher() {
    let mut engine = engine();
    let mut world = engine.create_world("lines");
    let script = engine.load_script("draw", DRAW_SCRIPT.as_bytes()).unwrap();
    world.register_script(&script).unwrap();

    world.initialize();
    world.update(0.016).unwrap();

    let lines = world.lines().lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].end, Vec3::X);
    assert_eq!(lines[0].color, Color::from_rgba_u32(u32::MAX));
}

// -- 2. lifecycle hooks -------------------------------------------------------

#[test]
fn init_and_shutdown_run_once_and_execute_sees_its_stage() {
    let mut engine = engine();
    let mut world = engine.create_world("hooks");
    let script = engine.load_script("hooks", LIFECYCLE_SCRIPT.as_bytes()).unwrap();
    world.register_script(&script).unwrap();

    world.initialize();
    world.initialize();
    world.update(0.016).unwrap();
    world.update(0.016).unwrap();
    world.shutdown();
    world.shutdown();

    let mut module = script.borrow_mut();
    assert_eq!(module.call_i32_export("inits").unwrap(), 1);
    assert_eq!(module.call_i32_export("shutdowns").unwrap(), 1);
    assert_eq!(
        module.call_i32_export("last_stage").unwrap(),
        UpdateStage::PostPhysics.index() as i32
    );
}

#[test]
fn script_and_native_systems_share_one_priority_order() {
    let mut engine = engine();
    let mut world = engine.create_world("mixed");
    let log = CallLog::default();
    world.register_system(Tracer::new("before", at(UpdateStage::PostPhysics, 5), &log));
    world.register_system(Tracer::new("after", at(UpdateStage::PostPhysics, 20), &log));
    let script = engine.load_script("hooks", LIFECYCLE_SCRIPT.as_bytes()).unwrap();
    world.register_script(&script).unwrap();

    let names: Vec<_> = world
        .systems_for_stage(UpdateStage::PostPhysics)
        .iter()
        .map(|s| s.name().to_owned())
        .collect();
    assert_eq!(names, ["before", "hooks", "after"]);
}

#[test]
fn reregistering_a_script_is_rejected() {
    let mut engine = engine();
    let mut world = engine.create_world("dupe");
    let script = engine.load_script("hooks", LIFECYCLE_SCRIPT.as_bytes()).unwrap();
    assert!(world.register_script(&script).unwrap());
    assert!(!world.register_script(&script).unwrap());
    assert_eq!(world.systems_for_stage(UpdateStage::PostPhysics).len(), 1);
}

// -- 3. failure isolation -----------------------------------------------------

#[test]
fn trapping_script_does_not_stop_the_frame() {
    let mut engine = engine();
    let mut world = engine.create_world("faulty");
    let target = world.construct_entity("target", Transform::default());
    let script = engine
        .load_script("faulty", faulty_script(target.to_bits()).as_bytes())
        .unwrap();
    world.register_script(&script).unwrap();
    let log = CallLog::default();
    world.register_system(Tracer::new("later", at(UpdateStage::FrameStart, 100), &log));
    world.register_system(Tracer::new("end", at(UpdateStage::FrameEnd, 0), &log));

    world.initialize();
    world.update(0.016).unwrap();
    world.update(0.016).unwrap();

    assert_eq!(
        *log.borrow(),
        ["later:FrameStart", "end:FrameEnd", "later:FrameStart", "end:FrameEnd"]
    );
    // Executed every frame, but the queued move died with the trap.
    assert_eq!(script.borrow_mut().call_i32_export("runs").unwrap(), 2);
    assert_eq!(
        world.registry().get::<Transform>(target).unwrap().location,
        Vec3::ZERO
    );
    assert_eq!(world.tick_count(), 2);
}

#[test]
fn unloaded_script_becomes_a_no_op() {
    let mut engine = engine();
    let mut world = engine.create_world("unload");
    let target = world.construct_entity("target", Transform::default());
    let script = engine
        .load_script("mover", mover_script(target.to_bits()).as_bytes())
        .unwrap();
    world.register_script(&script).unwrap();
    world.initialize();

    assert!(engine.unload_script("mover"));
    drop(script);
    world.update(0.016).unwrap();

    assert_eq!(
        world.registry().get::<Transform>(target).unwrap().location,
        Vec3::ZERO
    );
    // Still scheduled; skipped at run time.
    assert_eq!(world.systems_for_stage(UpdateStage::PrePhysics).len(), 2);
}

#[test]
fn reloaded_script_replaces_its_old_system() {
    let mut engine = engine();
    let mut world = engine.create_world("reload");
    let target = world.construct_entity("target", Transform::default());
    let original = engine
        .load_script("mover", mover_script(target.to_bits()).as_bytes())
        .unwrap();
    assert!(world.register_script(&original).unwrap());
    world.initialize();
    world.update(0.016).unwrap();
    assert_eq!(world.registry().get::<Transform>(target).unwrap().location, Vec3::new(1.0, 2.0, 3.0));

    let reloaded = engine
        .load_script("mover", revised_mover_script(target.to_bits()).as_bytes())
        .unwrap();
    assert!(world.register_script(&reloaded).unwrap());
    assert_eq!(reloaded.borrow_mut().call_i32_export("inits").unwrap(), 1);
    assert!(world.systems_for_stage(UpdateStage::PrePhysics).is_empty());
    let post = world.systems_for_stage(UpdateStage::PostPhysics);
    assert_eq!(post.len(), 1);
    assert_eq!(post[0].priority_list().priority_for(UpdateStage::PostPhysics), UpdatePriority(7));

    // The same instance twice is still a duplicate.
    assert!(!world.register_script(&reloaded).unwrap());

    world.update(0.016).unwrap();
    assert_eq!(world.registry().get::<Transform>(target).unwrap().location, Vec3::new(4.0, 5.0, 6.0));
    drop(original);
}

#[test]
fn script_without_required_exports_fails_to_load() {
    let mut engine = engine();
    let err = engine
        .load_script("bare", br#"(module (func (export "execute")))"#)
        .unwrap_err();
    assert!(matches!(err, EngineError::Script(_)), "got {err:?}");
    assert!(engine.scripts().get("bare").is_none());
}

// -- 4. duplication -----------------------------------------------------------

#[test]
fn duplicated_world_keeps_script_systems() {
    let mut engine = engine();
    let mut world = engine.create_world("source");
    let script = engine.load_script("hooks", LIFECYCLE_SCRIPT.as_bytes()).unwrap();
    world.register_script(&script).unwrap();

    let copy = world.duplicate("copy");
    let names: Vec<_> = copy
        .systems_for_stage(UpdateStage::PostPhysics)
        .iter()
        .map(|s| s.name().to_owned())
        .collect();
    assert_eq!(names, ["hooks"]);
}
