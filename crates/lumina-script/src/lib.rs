//! Lumina Script -- Wasmtime sandbox for script-authored entity systems.
//!
//! Scripts are Wasm modules that behave like native entity systems: they
//! declare per-stage priorities through a `priority(stage) -> i32` export and
//! run `init` / `execute` / `shutdown` hooks. Each hook runs under a fuel
//! budget with no WASI, no filesystem and no clock beyond what the host
//! hands in.
//!
//! # Architecture
//!
//! - **`ScriptConfig`**: fuel per hook call and linear memory cap.
//! - **`ScriptHost`**: owns the Wasmtime engine, the linker carrying the host
//!   API, and the loaded scripts.
//! - **`ScriptModule`**: one instantiated script and its store.
//! - **`HostState`**: per-store state; the world view scripts read and the
//!   [`ScriptCommand`]s they emit.
//!
//! # Example
//!
//! ```no_run
//! use lumina_script::{ScriptConfig, ScriptHost};
//!
//! let mut host = ScriptHost::new(ScriptConfig::default()).unwrap();
//! let wat = r#"(module
//!     (func (export "priority") (param i32) (result i32) i32.const 128)
//!     (func (export "execute")))"#;
//! let script = host.load("noop", wat.as_bytes()).unwrap();
//! let fuel = script.borrow_mut().call_execute().unwrap();
//! assert!(fuel > 0);
//! ```

#![deny(unsafe_code)]

mod host;
pub mod host_api;
mod module;

pub use host::{ScriptHost, SharedScript};
pub use host_api::{EntityView, FrameInfo, HostState, ScriptCommand, WorldView};
pub use module::{ScriptConfig, ScriptModule};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while loading or running scripts.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script '{script}' failed to compile: {details}")]
    Compile { script: String, details: String },

    #[error("script '{script}' is missing required export '{export}' -- scripts must export `execute` and `priority`")]
    MissingExport { script: String, export: String },

    #[error("script '{script}' ran out of fuel (budget: {budget} units) -- possible infinite loop")]
    OutOfFuel { script: String, budget: u64 },

    /// A Wasm trap: `unreachable`, division by zero, out-of-bounds access.
    #[error("script '{script}' trapped: {details}")]
    Trap { script: String, details: String },

    /// The script a system was bound to has been unloaded.
    #[error("script '{script}' is no longer loaded")]
    Unloaded { script: String },

    #[error("script runtime error: {0}")]
    Runtime(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lumina_ecs::entity::Entity;
    use std::collections::HashMap;

    const NOOP: &str = r#"(module
        (func (export "priority") (param i32) (result i32) i32.const 128)
        (func (export "execute")))"#;

    const COUNTER: &str = r#"(module
        (global $n (mut i32) (i32.const 0))
        (global $inits (mut i32) (i32.const 0))
        (func (export "priority") (param i32) (result i32)
            (if (result i32) (i32.eq (local.get 0) (i32.const 1))
                (then (i32.const 10))
                (else (i32.const -1))))
        (func (export "init") (global.set $inits (i32.add (global.get $inits) (i32.const 1))))
        (func (export "execute") (global.set $n (i32.add (global.get $n) (i32.const 1))))
        (func (export "count") (result i32) (global.get $n))
        (func (export "inits") (result i32) (global.get $inits)))"#;

    const FUEL_HOG: &str = r#"(module
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute") (loop $l (br $l))))"#;

    const TRAPS: &str = r#"(module
        (func (export "priority") (param i32) (result i32) i32.const 0)
        (func (export "execute") unreachable))"#;

    const HOST_CALLS: &str = r#"(module
        (import "lumina" "has_component" (func $has (param i64 i32 i32) (result i32)))
        (import "lumina" "set_location" (func $set (param i64 f32 f32 f32)))
        (import "lumina" "log" (func $log (param i32 i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "health")
        (data (i32.const 16) "hello")
        (global $found (mut i32) (i32.const -5))
        (func (export "priority") (param i32) (result i32) i32.const 64)
        (func (export "execute")
            (global.set $found (call $has (i64.const 7) (i32.const 0) (i32.const 6)))
            (call $set (i64.const 7) (f32.const 1) (f32.const 2) (f32.const 3))
            (call $log (i32.const 2) (i32.const 16) (i32.const 5)))
        (func (export "found") (result i32) (global.get $found)))"#;

    fn host() -> ScriptHost {
        ScriptHost::new(ScriptConfig::default()).unwrap()
    }

    // -- 1. loading -----------------------------------------------------------

    #[test]
    fn noop_script_loads_and_consumes_fuel() {
        let mut host = host();
        let script = host.load("noop", NOOP.as_bytes()).unwrap();
        let fuel = script.borrow_mut().call_execute().unwrap();
        assert!(fuel > 0, "call overhead should cost some fuel");
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn missing_priority_export_is_rejected() {
        let mut host = host();
        let err = host
            .load("bad", br#"(module (func (export "execute")))"#)
            .unwrap_err();
        assert!(
            matches!(err, ScriptError::MissingExport { ref export, .. } if export == "priority"),
            "got {err:?}"
        );
    }

    #[test]
    fn invalid_wat_is_compile_error() {
        let mut host = host();
        let err = host.load("junk", b"(module (func").unwrap_err();
        assert!(matches!(err, ScriptError::Compile { .. }), "got {err:?}");
    }

    #[test]
    fn unknown_import_fails_instantiation() {
        let mut host = host();
        let wat = r#"(module
            (import "lumina" "does_not_exist" (func))
            (func (export "priority") (param i32) (result i32) i32.const 0)
            (func (export "execute")))"#;
        let err = host.load("imports", wat.as_bytes()).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)), "got {err:?}");
    }

    // -- 2. priorities and hooks ----------------------------------------------

    #[test]
    fn declared_priorities_follow_priority_export() {
        let mut host = host();
        let script = host.load("counter", COUNTER.as_bytes()).unwrap();
        let priorities = script.borrow_mut().declared_priorities(6).unwrap();
        assert_eq!(priorities, vec![None, Some(10), None, None, None, None]);
    }

    #[test]
    fn init_and_execute_mutate_script_state() {
        let mut host = host();
        let script = host.load("counter", COUNTER.as_bytes()).unwrap();
        let mut script = script.borrow_mut();
        script.call_init().unwrap();
        for _ in 0..5 {
            script.call_execute().unwrap();
        }
        assert_eq!(script.call_shutdown().unwrap(), 0, "no shutdown export");
        assert_eq!(script.call_i32_export("count").unwrap(), 5);
        assert_eq!(script.call_i32_export("inits").unwrap(), 1);
    }

    // -- 3. faults --------------------------------------------------------------

    #[test]
    fn fuel_exhaustion_is_out_of_fuel() {
        let mut host = ScriptHost::new(ScriptConfig {
            fuel_per_call: 10_000,
            ..ScriptConfig::default()
        })
        .unwrap();
        let script = host.load("hog", FUEL_HOG.as_bytes()).unwrap();
        let err = script.borrow_mut().call_execute().unwrap_err();
        assert!(matches!(err, ScriptError::OutOfFuel { budget: 10_000, .. }), "got {err:?}");
    }

    #[test]
    fn trap_is_reported_and_script_stays_callable() {
        let mut host = host();
        let script = host.load("trap", TRAPS.as_bytes()).unwrap();
        for _ in 0..2 {
            let err = script.borrow_mut().call_execute().unwrap_err();
            assert!(matches!(err, ScriptError::Trap { .. }), "got {err:?}");
        }
    }

    // -- 4. host API --------------------------------------------------------------

    #[test]
    fn host_calls_read_view_and_queue_commands() {
        let mut host = host();
        let script = host.load("calls", HOST_CALLS.as_bytes()).unwrap();
        let entity = Entity::from_bits(7);
        let mut view = HashMap::new();
        view.insert(
            entity.to_bits(),
            EntityView {
                location: Some([0.0, 0.0, 0.0]),
                components: vec!["health".to_owned()],
            },
        );

        let mut script = script.borrow_mut();
        script.host_state_mut().begin_hook(
            FrameInfo {
                delta_time: 0.016,
                time: 1.0,
                stage: 1,
            },
            view,
        );
        script.call_execute().unwrap();

        assert_eq!(script.call_i32_export("found").unwrap(), 1);
        assert_eq!(script.host_state().host_call_count, 3);
        let commands = script.host_state_mut().drain_commands();
        assert_eq!(
            commands,
            vec![ScriptCommand::SetLocation {
                entity,
                location: [1.0, 2.0, 3.0],
            }]
        );
        assert!(script.host_state().commands.is_empty());
    }

    // -- 5. reload ----------------------------------------------------------------

    #[test]
    fn reloading_replaces_and_orphans_old_instance() {
        let mut host = host();
        let old = host.load("counter", COUNTER.as_bytes()).unwrap();
        let weak = std::rc::Rc::downgrade(&old);
        drop(old);
        assert!(weak.upgrade().is_some());

        host.load("counter", COUNTER.as_bytes()).unwrap();
        assert_eq!(host.len(), 1);
        assert!(weak.upgrade().is_none(), "old instance should be dropped");

        assert!(host.unload("counter"));
        assert!(host.get("counter").is_none());
    }
}
