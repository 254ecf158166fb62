//! Host API exposed to script systems.
//!
//! [`HostState`] lives inside every script's Wasmtime [`Store`](wasmtime::Store).
//! Before each hook the engine fills it with the frame clock and a read-only
//! view of the world; host functions answer reads from that view and record
//! every mutation as a [`ScriptCommand`]. The engine drains and applies the
//! commands as soon as the hook returns, so systems later in the same stage
//! observe them.
//!
//! # View semantics
//!
//! The [`WorldView`] is a snapshot shared by every script hook of a stage
//! until some system changes the world; it is never rebuilt per call. Inside
//! one hook a script reads its own queued writes: `set_location` is visible
//! to `get_location`, a destroyed entity stops being valid, and emplaced or
//! removed components show up in `has_component`. Writes are still only
//! requests. If the engine later refuses one (a stale entity, an unknown
//! component, a payload that fails to deserialize) the world keeps its old
//! state, and the next hook sees that.
//!
//! # Host Functions (registered under `"lumina"`)
//!
//! ## Read
//! - `delta_time() -> f32`
//! - `time() -> f64`
//! - `update_stage() -> i32`
//! - `entity_count() -> i32`
//! - `is_valid_entity(entity: i64) -> i32`
//! - `get_location(entity: i64, out_ptr: i32) -> i32` (writes three `f32`)
//! - `has_component(entity: i64, name_ptr: i32, name_len: i32) -> i32`
//!
//! ## Write (deferred)
//! - `set_location(entity: i64, x: f32, y: f32, z: f32)`
//! - `destroy_entity(entity: i64)`
//! - `emplace_component(entity: i64, name_ptr, name_len, json_ptr, json_len) -> i32`
//! - `remove_component(entity: i64, name_ptr: i32, name_len: i32)`
//! - `draw_line(sx, sy, sz, ex, ey, ez: f32, rgba: i32, duration: f32)`
//!
//! ## Utility
//! - `log(level: i32, msg_ptr: i32, msg_len: i32)`

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use lumina_ecs::entity::Entity;
use wasmtime::{Caller, Linker, StoreLimits};

/// Import namespace of every host function.
pub const HOST_NAMESPACE: &str = "lumina";

// ---------------------------------------------------------------------------
// Commands and world view
// ---------------------------------------------------------------------------

/// A mutation requested by a script, applied by the engine after the hook.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    SetLocation {
        entity: Entity,
        location: [f32; 3],
    },
    DestroyEntity {
        entity: Entity,
    },
    EmplaceComponent {
        entity: Entity,
        component: String,
        value: serde_json::Value,
    },
    RemoveComponent {
        entity: Entity,
        component: String,
    },
    DrawLine {
        start: [f32; 3],
        end: [f32; 3],
        rgba: u32,
        duration: f32,
    },
}

/// What a script may read about one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityView {
    pub location: Option<[f32; 3]>,
    /// Registered names of the components the entity carries.
    pub components: Vec<String>,
}

/// Every live entity's [`EntityView`], keyed by [`Entity::to_bits`].
pub type WorldView = Rc<HashMap<u64, EntityView>>;

/// A script's own writes during the current hook, layered over the view.
#[derive(Debug, Default)]
struct HookWrites {
    locations: HashMap<u64, [f32; 3]>,
    destroyed: HashSet<u64>,
    /// `true` for emplaced, `false` for removed.
    components: HashMap<(u64, String), bool>,
}

/// Frame clock handed to a hook.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInfo {
    pub delta_time: f32,
    pub time: f64,
    /// Declaration index of the stage being run.
    pub stage: i32,
}

// ---------------------------------------------------------------------------
// HostState
// ---------------------------------------------------------------------------

pub struct HostState {
    pub frame: FrameInfo,
    pub entities: WorldView,
    pub commands: Vec<ScriptCommand>,
    /// Host calls made during the current hook.
    pub host_call_count: u32,
    writes: HookWrites,
    pub(crate) limits: StoreLimits,
}

impl HostState {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            frame: FrameInfo::default(),
            entities: WorldView::default(),
            commands: Vec::new(),
            host_call_count: 0,
            writes: HookWrites::default(),
            limits,
        }
    }

    /// Reset per-hook state and install the frame clock and world view.
    pub fn begin_hook(&mut self, frame: FrameInfo, entities: impl Into<WorldView>) {
        self.frame = frame;
        self.entities = entities.into();
        self.host_call_count = 0;
        self.writes = HookWrites::default();
    }

    pub fn drain_commands(&mut self) -> Vec<ScriptCommand> {
        std::mem::take(&mut self.commands)
    }

    fn view(&self, bits: i64) -> Option<&EntityView> {
        let bits = bits as u64;
        if self.writes.destroyed.contains(&bits) {
            return None;
        }
        self.entities.get(&bits)
    }

    fn is_valid(&self, bits: i64) -> bool {
        self.view(bits).is_some()
    }

    fn location(&self, bits: i64) -> Option<[f32; 3]> {
        let stored = self.view(bits)?.location?;
        Some(self.writes.locations.get(&(bits as u64)).copied().unwrap_or(stored))
    }

    fn has_component(&self, bits: i64, name: &str) -> bool {
        let Some(view) = self.view(bits) else {
            return false;
        };
        match self.writes.components.get(&(bits as u64, name.to_owned())) {
            Some(&present) => present,
            None => view.components.iter().any(|c| c == name),
        }
    }

    /// Live entities as this hook sees them.
    fn entity_count(&self) -> usize {
        let destroyed = self
            .writes
            .destroyed
            .iter()
            .filter(|bits| self.entities.contains_key(*bits))
            .count();
        self.entities.len() - destroyed
    }

    fn push(&mut self, command: ScriptCommand) {
        match &command {
            ScriptCommand::SetLocation { entity, location } => {
                self.writes.locations.insert(entity.to_bits(), *location);
            }
            ScriptCommand::DestroyEntity { entity } => {
                self.writes.destroyed.insert(entity.to_bits());
            }
            ScriptCommand::EmplaceComponent { entity, component, .. } => {
                self.writes.components.insert((entity.to_bits(), component.clone()), true);
            }
            ScriptCommand::RemoveComponent { entity, component } => {
                self.writes.components.insert((entity.to_bits(), component.clone()), false);
            }
            ScriptCommand::DrawLine { .. } => {}
        }
        self.commands.push(command);
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("frame", &self.frame)
            .field("entity_count", &self.entities.len())
            .field("pending_commands", &self.commands.len())
            .field("host_call_count", &self.host_call_count)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register every host function under [`HOST_NAMESPACE`].
pub fn register_host_api(linker: &mut Linker<HostState>) -> Result<(), anyhow::Error> {
    linker.func_wrap(HOST_NAMESPACE, "delta_time", host_delta_time)?;
    linker.func_wrap(HOST_NAMESPACE, "time", host_time)?;
    linker.func_wrap(HOST_NAMESPACE, "update_stage", host_update_stage)?;
    linker.func_wrap(HOST_NAMESPACE, "entity_count", host_entity_count)?;
    linker.func_wrap(HOST_NAMESPACE, "is_valid_entity", host_is_valid_entity)?;
    linker.func_wrap(HOST_NAMESPACE, "get_location", host_get_location)?;
    linker.func_wrap(HOST_NAMESPACE, "has_component", host_has_component)?;

    linker.func_wrap(HOST_NAMESPACE, "set_location", host_set_location)?;
    linker.func_wrap(HOST_NAMESPACE, "destroy_entity", host_destroy_entity)?;
    linker.func_wrap(HOST_NAMESPACE, "emplace_component", host_emplace_component)?;
    linker.func_wrap(HOST_NAMESPACE, "remove_component", host_remove_component)?;
    linker.func_wrap(HOST_NAMESPACE, "draw_line", host_draw_line)?;

    linker.func_wrap(HOST_NAMESPACE, "log", host_log)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Linear memory helpers
// ---------------------------------------------------------------------------

fn exported_memory(caller: &mut Caller<'_, HostState>) -> Result<wasmtime::Memory, String> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| {
            "script must export 'memory' to use pointer-based host functions".to_owned()
        })
}

fn read_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<String, String> {
    if ptr < 0 || len < 0 {
        return Err(format!("negative pointer or length: ptr={ptr}, len={len}"));
    }
    let memory = exported_memory(caller)?;
    let data = memory.data(&*caller);
    let start = ptr as usize;
    let end = start + len as usize;
    if end > data.len() {
        return Err(format!(
            "string read out of bounds: ptr={ptr}, len={len}, memory_size={}",
            data.len()
        ));
    }
    String::from_utf8(data[start..end].to_vec())
        .map_err(|e| format!("string at ptr={ptr} len={len} is not valid UTF-8: {e}"))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

fn host_delta_time(mut caller: Caller<'_, HostState>) -> f32 {
    caller.data_mut().host_call_count += 1;
    caller.data().frame.delta_time
}

fn host_time(mut caller: Caller<'_, HostState>) -> f64 {
    caller.data_mut().host_call_count += 1;
    caller.data().frame.time
}

fn host_update_stage(mut caller: Caller<'_, HostState>) -> i32 {
    caller.data_mut().host_call_count += 1;
    caller.data().frame.stage
}

fn host_entity_count(mut caller: Caller<'_, HostState>) -> i32 {
    caller.data_mut().host_call_count += 1;
    caller.data().entity_count() as i32
}

fn host_is_valid_entity(mut caller: Caller<'_, HostState>, entity: i64) -> i32 {
    caller.data_mut().host_call_count += 1;
    caller.data().is_valid(entity) as i32
}

/// Writes `[x, y, z]` as little-endian `f32` at `out_ptr`. Returns 0 on
/// success, -1 if the entity has no location, -2 on a bad pointer.
fn host_get_location(mut caller: Caller<'_, HostState>, entity: i64, out_ptr: i32) -> i32 {
    caller.data_mut().host_call_count += 1;
    let Some(location) = caller.data().location(entity) else {
        return -1;
    };
    let memory = match exported_memory(&mut caller) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "get_location: no memory export");
            return -2;
        }
    };
    let mut bytes = [0u8; 12];
    for (chunk, value) in bytes.chunks_exact_mut(4).zip(location) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    if out_ptr < 0 || memory.write(&mut caller, out_ptr as usize, &bytes).is_err() {
        tracing::warn!(out_ptr, "get_location: output pointer out of bounds");
        return -2;
    }
    0
}

fn host_has_component(
    mut caller: Caller<'_, HostState>,
    entity: i64,
    name_ptr: i32,
    name_len: i32,
) -> i32 {
    caller.data_mut().host_call_count += 1;
    let name = match read_string(&mut caller, name_ptr, name_len) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "has_component: failed to read component name");
            return -1;
        }
    };
    caller.data().has_component(entity, &name) as i32
}

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

fn host_set_location(mut caller: Caller<'_, HostState>, entity: i64, x: f32, y: f32, z: f32) {
    let state = caller.data_mut();
    state.host_call_count += 1;
    state.push(ScriptCommand::SetLocation {
        entity: Entity::from_bits(entity as u64),
        location: [x, y, z],
    });
}

fn host_destroy_entity(mut caller: Caller<'_, HostState>, entity: i64) {
    let state = caller.data_mut();
    state.host_call_count += 1;
    state.push(ScriptCommand::DestroyEntity {
        entity: Entity::from_bits(entity as u64),
    });
}

/// Returns 0 when queued, -1 when the name or JSON could not be read.
fn host_emplace_component(
    mut caller: Caller<'_, HostState>,
    entity: i64,
    name_ptr: i32,
    name_len: i32,
    json_ptr: i32,
    json_len: i32,
) -> i32 {
    caller.data_mut().host_call_count += 1;
    let name = match read_string(&mut caller, name_ptr, name_len) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "emplace_component: failed to read component name");
            return -1;
        }
    };
    let value = match read_string(&mut caller, json_ptr, json_len)
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, component = %name, "emplace_component: bad JSON payload");
            return -1;
        }
    };
    caller.data_mut().push(ScriptCommand::EmplaceComponent {
        entity: Entity::from_bits(entity as u64),
        component: name,
        value,
    });
    0
}

fn host_remove_component(
    mut caller: Caller<'_, HostState>,
    entity: i64,
    name_ptr: i32,
    name_len: i32,
) {
    caller.data_mut().host_call_count += 1;
    match read_string(&mut caller, name_ptr, name_len) {
        Ok(component) => caller.data_mut().push(ScriptCommand::RemoveComponent {
            entity: Entity::from_bits(entity as u64),
            component,
        }),
        Err(e) => tracing::warn!(error = %e, "remove_component: failed to read component name"),
    }
}

#[allow(clippy::too_many_arguments)]
fn host_draw_line(
    mut caller: Caller<'_, HostState>,
    sx: f32,
    sy: f32,
    sz: f32,
    ex: f32,
    ey: f32,
    ez: f32,
    rgba: i32,
    duration: f32,
) {
    let state = caller.data_mut();
    state.host_call_count += 1;
    state.push(ScriptCommand::DrawLine {
        start: [sx, sy, sz],
        end: [ex, ey, ez],
        rgba: rgba as u32,
        duration,
    });
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

fn host_log(mut caller: Caller<'_, HostState>, level: i32, msg_ptr: i32, msg_len: i32) {
    caller.data_mut().host_call_count += 1;
    let msg = match read_string(&mut caller, msg_ptr, msg_len) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "log: failed to read message");
            return;
        }
    };
    match level {
        0 => tracing::trace!(source = "script", "{msg}"),
        1 => tracing::debug!(source = "script", "{msg}"),
        2 => tracing::info!(source = "script", "{msg}"),
        3 => tracing::warn!(source = "script", "{msg}"),
        _ => tracing::error!(source = "script", level, "{msg}"),
    }
}
