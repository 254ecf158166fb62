//! Host functions exercised from real modules: pointer-based reads and
//! writes, JSON payloads, frame clock access and the memory cap.

use std::collections::HashMap;

use lumina_ecs::entity::Entity;
use lumina_script::{EntityView, FrameInfo, ScriptCommand, ScriptConfig, ScriptHost};

fn view_of(entity: Entity, location: [f32; 3]) -> HashMap<u64, EntityView> {
    let mut view = HashMap::new();
    view.insert(
        entity.to_bits(),
        EntityView {
            location: Some(location),
            components: vec!["transform".to_owned()],
        },
    );
    view
}

#[test]
fn get_location_writes_into_linear_memory() {
    let wat = r#"(module
        (import "lumina" "get_location" (func $get (param i64 i32) (result i32)))
        (memory (export "memory") 1)
        (global $status (mut i32) (i32.const 99))
        (global $sum (mut i32) (i32.const 0))
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute")
            (global.set $status (call $get (i64.const 5) (i32.const 32)))
            (global.set $sum (i32.trunc_f32_s
                (f32.add (f32.load (i32.const 32))
                    (f32.add (f32.load (i32.const 36)) (f32.load (i32.const 40)))))))
        (func (export "status") (result i32) (global.get $status))
        (func (export "sum") (result i32) (global.get $sum)))"#;
    let mut host = ScriptHost::new(ScriptConfig::default()).unwrap();
    let script = host.load("reader", wat.as_bytes()).unwrap();
    let mut script = script.borrow_mut();

    script
        .host_state_mut()
        .begin_hook(FrameInfo::default(), view_of(Entity::from_bits(5), [1.0, 2.0, 3.0]));
    script.call_execute().unwrap();
    assert_eq!(script.call_i32_export("status").unwrap(), 0);
    assert_eq!(script.call_i32_export("sum").unwrap(), 6);

    // Unknown entities report -1 and leave memory alone.
    script.host_state_mut().begin_hook(FrameInfo::default(), HashMap::new());
    script.call_execute().unwrap();
    assert_eq!(script.call_i32_export("status").unwrap(), -1);
}

#[test]
fn emplace_component_parses_json_and_rejects_garbage() {
    let wat = r#"(module
        (import "lumina" "emplace_component"
            (func $emplace (param i64 i32 i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "health")
        (data (i32.const 16) "{\"hp\":5}")
        (data (i32.const 32) "{oops")
        (global $good (mut i32) (i32.const 99))
        (global $bad (mut i32) (i32.const 99))
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute")
            (global.set $good (call $emplace (i64.const 3) (i32.const 0) (i32.const 6) (i32.const 16) (i32.const 8)))
            (global.set $bad (call $emplace (i64.const 3) (i32.const 0) (i32.const 6) (i32.const 32) (i32.const 5))))
        (func (export "good") (result i32) (global.get $good))
        (func (export "bad") (result i32) (global.get $bad)))"#;
    let mut host = ScriptHost::new(ScriptConfig::default()).unwrap();
    let script = host.load("emplacer", wat.as_bytes()).unwrap();
    let mut script = script.borrow_mut();

    script.host_state_mut().begin_hook(FrameInfo::default(), HashMap::new());
    script.call_execute().unwrap();

    assert_eq!(script.call_i32_export("good").unwrap(), 0);
    assert_eq!(script.call_i32_export("bad").unwrap(), -1);
    assert_eq!(
        script.host_state_mut().drain_commands(),
        vec![ScriptCommand::EmplaceComponent {
            entity: Entity::from_bits(3),
            component: "health".to_owned(),
            value: serde_json::json!({ "hp": 5 }),
        }]
    );
}

#[test]
fn frame_clock_and_validity_come_from_the_hook() {
    let wat = r#"(module
        (import "lumina" "update_stage" (func $stage (result i32)))
        (import "lumina" "entity_count" (func $count (result i32)))
        (import "lumina" "is_valid_entity" (func $valid (param i64) (result i32)))
        (import "lumina" "remove_component" (func $remove (param i64 i32 i32)))
        (import "lumina" "destroy_entity" (func $destroy (param i64)))
        (memory (export "memory") 1)
        (data (i32.const 0) "transform")
        (global $out (mut i32) (i32.const 0))
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute")
            ;; stage * 100 + count * 10 + valid(5) + valid(6)
            (global.set $out
                (i32.add
                    (i32.add
                        (i32.mul (call $stage) (i32.const 100))
                        (i32.mul (call $count) (i32.const 10)))
                    (i32.add (call $valid (i64.const 5)) (call $valid (i64.const 6)))))
            (call $remove (i64.const 5) (i32.const 0) (i32.const 9))
            (call $destroy (i64.const 6)))
        (func (export "out") (result i32) (global.get $out)))"#;
    let mut host = ScriptHost::new(ScriptConfig::default()).unwrap();
    let script = host.load("clock", wat.as_bytes()).unwrap();
    let mut script = script.borrow_mut();

    script.host_state_mut().begin_hook(
        FrameInfo {
            delta_time: 0.016,
            time: 2.0,
            stage: 4,
        },
        view_of(Entity::from_bits(5), [0.0; 3]),
    );
    script.call_execute().unwrap();

    assert_eq!(script.call_i32_export("out").unwrap(), 411);
    assert_eq!(script.host_state().host_call_count, 6);
    assert_eq!(
        script.host_state_mut().drain_commands(),
        vec![
            ScriptCommand::RemoveComponent {
                entity: Entity::from_bits(5),
                component: "transform".to_owned(),
            },
            ScriptCommand::DestroyEntity {
                entity: Entity::from_bits(6),
            },
        ]
    );
}

#[test]
fn memory_growth_past_the_cap_fails() {
    let wat = r#"(module
        (memory (export "memory") 1)
        (global $grown (mut i32) (i32.const 0))
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute")
            (global.set $grown (memory.grow (i32.const 4))))
        (func (export "grown") (result i32) (global.get $grown)))"#;
    let mut host = ScriptHost::new(ScriptConfig {
        memory_limit_bytes: 2 * 65_536,
        ..ScriptConfig::default()
    })
    .unwrap();
    let script = host.load("greedy", wat.as_bytes()).unwrap();
    let mut script = script.borrow_mut();
    script.call_execute().unwrap();
    assert_eq!(script.call_i32_export("grown").unwrap(), -1);
}

#[test]
fn reading_strings_without_memory_is_refused() {
    let wat = r#"(module
        (import "lumina" "has_component" (func $has (param i64 i32 i32) (result i32)))
        (global $r (mut i32) (i32.const 99))
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute")
            (global.set $r (call $has (i64.const 5) (i32.const 0) (i32.const 4))))
        (func (export "r") (result i32) (global.get $r)))"#;
    let mut host = ScriptHost::new(ScriptConfig::default()).unwrap();
    let script = host.load("memoryless", wat.as_bytes()).unwrap();
    let mut script = script.borrow_mut();
    script
        .host_state_mut()
        .begin_hook(FrameInfo::default(), view_of(Entity::from_bits(5), [0.0; 3]));
    script.call_execute().unwrap();
    assert_eq!(script.call_i32_export("r").unwrap(), -1);
}

#[test]
fn hook_reads_its_own_queued_writes() {
    let wat = r#"(module
        (import "lumina" "set_location" (func $set (param i64 f32 f32 f32)))
        (import "lumina" "get_location" (func $get (param i64 i32) (result i32)))
        (import "lumina" "destroy_entity" (func $destroy (param i64)))
        (import "lumina" "is_valid_entity" (func $valid (param i64) (result i32)))
        (import "lumina" "entity_count" (func $count (result i32)))
        (import "lumina" "emplace_component"
            (func $emplace (param i64 i32 i32 i32 i32) (result i32)))
        (import "lumina" "remove_component" (func $remove (param i64 i32 i32)))
        (import "lumina" "has_component" (func $has (param i64 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "health")
        (data (i32.const 16) "{}")
        (data (i32.const 32) "transform")
        (global $x (mut i32) (i32.const 0))
        (global $health (mut i32) (i32.const 99))
        (global $transform (mut i32) (i32.const 99))
        (global $valid (mut i32) (i32.const 99))
        (global $count (mut i32) (i32.const 99))
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute")
            (call $set (i64.const 5) (f32.const 7) (f32.const 8) (f32.const 9))
            (drop (call $get (i64.const 5) (i32.const 64)))
            (global.set $x (i32.trunc_f32_s (f32.load (i32.const 64))))
            (drop (call $emplace (i64.const 5) (i32.const 0) (i32.const 6) (i32.const 16) (i32.const 2)))
            (global.set $health (call $has (i64.const 5) (i32.const 0) (i32.const 6)))
            (call $remove (i64.const 5) (i32.const 32) (i32.const 9))
            (global.set $transform (call $has (i64.const 5) (i32.const 32) (i32.const 9)))
            (call $destroy (i64.const 6))
            (global.set $valid (call $valid (i64.const 6)))
            (global.set $count (call $count)))
        (func (export "x") (result i32) (global.get $x))
        (func (export "health") (result i32) (global.get $health))
        (func (export "transform") (result i32) (global.get $transform))
        (func (export "valid") (result i32) (global.get $valid))
        (func (export "count") (result i32) (global.get $count))
        (func (export "peek") (result i32) (call $valid (i64.const 6))))"#;
    let mut host = ScriptHost::new(ScriptConfig::default()).unwrap();
    let script = host.load("writer", wat.as_bytes()).unwrap();
    let mut script = script.borrow_mut();

    let mut view = view_of(Entity::from_bits(5), [1.0, 2.0, 3.0]);
    view.insert(6, EntityView::default());
    script.host_state_mut().begin_hook(FrameInfo::default(), view.clone());
    script.call_execute().unwrap();

    assert_eq!(script.call_i32_export("x").unwrap(), 7);
    assert_eq!(script.call_i32_export("health").unwrap(), 1);
    assert_eq!(script.call_i32_export("transform").unwrap(), 0);
    assert_eq!(script.call_i32_export("valid").unwrap(), 0);
    assert_eq!(script.call_i32_export("count").unwrap(), 1);
    assert_eq!(script.host_state_mut().drain_commands().len(), 4);

    // The next hook starts from the world it is handed.
    script.host_state_mut().begin_hook(FrameInfo::default(), view);
    assert_eq!(script.call_i32_export("peek").unwrap(), 1);
}
