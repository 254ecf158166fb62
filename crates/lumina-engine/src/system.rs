//! Entity systems and the closed [`SystemVariant`] sum the schedule stores.
//!
//! A native system is any [`EntitySystem`] implementation shared through
//! `Rc<RefCell<_>>`; a script system is a weak handle to a script module
//! owned by the engine's [`ScriptHost`](lumina_script::ScriptHost). Both are
//! cheap handles, so the same system can sit in several stage lists.
//!
//! Script hooks follow one flow: install the frame clock and a read-only
//! world view in the script's host state, call the export, drain the queued
//! [`ScriptCommand`]s and apply them to the world right away.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use glam::Vec3;
use lumina_ecs::entity::Entity;
use lumina_script::{FrameInfo, ScriptCommand, ScriptError, ScriptModule, SharedScript};

use crate::context::SystemContext;
use crate::debug_draw::Color;
use crate::stage::{UpdatePriorityList, UpdateStage};

// ---------------------------------------------------------------------------
// EntitySystem
// ---------------------------------------------------------------------------

/// A native system. Only [`update`](Self::update) and
/// [`priority_list`](Self::priority_list) are required.
pub trait EntitySystem {
    /// Stable name; also the identity used to deduplicate registrations.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Stages this system runs in and at which priority. Read once when
    /// the system is wrapped.
    fn priority_list(&self) -> UpdatePriorityList;

    fn startup(&mut self, _ctx: &mut SystemContext<'_>) {}

    fn update(&mut self, ctx: &mut SystemContext<'_>);

    fn teardown(&mut self, _ctx: &mut SystemContext<'_>) {}
}

/// 64-bit identity of a system: the first eight bytes of a BLAKE3 hash of
/// its kind and name.
pub fn identity_hash(kind: &str, name: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

// ---------------------------------------------------------------------------
// NativeSystem
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct NativeSystem {
    name: Rc<str>,
    identity: u64,
    priorities: UpdatePriorityList,
    inner: Rc<RefCell<dyn EntitySystem>>,
}

impl NativeSystem {
    pub fn new<S: EntitySystem + 'static>(system: S) -> Self {
        Self::from_shared(Rc::new(RefCell::new(system)))
    }

    /// Wrap a system the caller keeps a handle to (e.g. to inspect it
    /// between frames).
    pub fn from_shared(inner: Rc<RefCell<dyn EntitySystem>>) -> Self {
        let (name, priorities) = {
            let system = inner.borrow();
            (Rc::<str>::from(system.name()), system.priority_list())
        };
        Self {
            identity: identity_hash("native", &name),
            name,
            priorities,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity_hash(&self) -> u64 {
        self.identity
    }

    pub fn priority_list(&self) -> &UpdatePriorityList {
        &self.priorities
    }

    pub fn shared(&self) -> &Rc<RefCell<dyn EntitySystem>> {
        &self.inner
    }
}

impl fmt::Debug for NativeSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSystem")
            .field("name", &self.name)
            .field("identity", &format_args!("{:016x}", self.identity))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ScriptSystem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptHook {
    Init,
    Execute,
    Shutdown,
}

impl ScriptHook {
    fn export(self) -> &'static str {
        match self {
            ScriptHook::Init => "init",
            ScriptHook::Execute => "execute",
            ScriptHook::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone)]
pub struct ScriptSystem {
    name: Rc<str>,
    identity: u64,
    priorities: UpdatePriorityList,
    script: Weak<RefCell<ScriptModule>>,
}

impl ScriptSystem {
    /// Bind to a loaded script, asking it for its stage priorities.
    pub fn new(script: &SharedScript) -> Result<Self, ScriptError> {
        let mut module = script.borrow_mut();
        let declared = module.declared_priorities(UpdateStage::COUNT)?;
        let name = Rc::<str>::from(module.name());
        Ok(Self {
            identity: identity_hash("script", &name),
            name,
            priorities: UpdatePriorityList::from_declared(&declared),
            script: Rc::downgrade(script),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity_hash(&self) -> u64 {
        self.identity
    }

    pub fn priority_list(&self) -> &UpdatePriorityList {
        &self.priorities
    }

    /// Whether the script module this system is bound to is still loaded.
    pub fn is_loaded(&self) -> bool {
        self.script.strong_count() > 0
    }

    /// Whether both systems are bound to the same module instance.
    pub fn same_instance(&self, other: &ScriptSystem) -> bool {
        Weak::ptr_eq(&self.script, &other.script)
    }

    fn run(&self, ctx: &mut SystemContext<'_>, hook: ScriptHook) {
        match self.try_run(ctx, hook) {
            Ok(()) => {}
            Err(error @ ScriptError::Unloaded { .. }) => {
                tracing::warn!(system = %self.name, hook = hook.export(), error = %error, "script system skipped");
            }
            Err(error) => {
                tracing::error!(system = %self.name, hook = hook.export(), error = %error, "script system failed");
            }
        }
    }

    fn try_run(&self, ctx: &mut SystemContext<'_>, hook: ScriptHook) -> Result<(), ScriptError> {
        let script = self.script.upgrade().ok_or_else(|| ScriptError::Unloaded {
            script: self.name.to_string(),
        })?;
        let view = ctx.script_view();
        let mut module = script.borrow_mut();

        module.host_state_mut().begin_hook(frame_info(ctx), view);
        let result = match hook {
            ScriptHook::Init => module.call_init(),
            ScriptHook::Execute => module.call_execute(),
            ScriptHook::Shutdown => module.call_shutdown(),
        };
        let commands = module.host_state_mut().drain_commands();
        drop(module);

        let fuel = result?;
        let applied = commands.len();
        if commands.iter().any(|c| !matches!(c, ScriptCommand::DrawLine { .. })) {
            ctx.invalidate_script_view();
        }
        for command in commands {
            apply_command(ctx, command);
        }
        tracing::trace!(system = %self.name, hook = hook.export(), fuel, applied, "script hook");
        Ok(())
    }
}

impl fmt::Debug for ScriptSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptSystem")
            .field("name", &self.name)
            .field("identity", &format_args!("{:016x}", self.identity))
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn frame_info(ctx: &SystemContext<'_>) -> FrameInfo {
    FrameInfo {
        delta_time: ctx.delta_time() as f32,
        time: ctx.time(),
        stage: ctx.stage().index() as i32,
    }
}

fn apply_command(ctx: &mut SystemContext<'_>, command: ScriptCommand) {
    match command {
        ScriptCommand::SetLocation { entity, location } => {
            if !ctx.set_location(entity, Vec3::from_array(location)) {
                stale(entity, "set_location");
            }
        }
        ScriptCommand::DestroyEntity { entity } => {
            if !ctx.destroy_entity(entity) {
                stale(entity, "destroy_entity");
            }
        }
        ScriptCommand::EmplaceComponent { entity, component, value } => {
            let ops = match ctx.components().get(&component) {
                Ok(ops) => *ops,
                Err(error) => {
                    tracing::warn!(%entity, error = %error, "script emplace ignored");
                    return;
                }
            };
            match (ops.emplace_json)(ctx.registry_mut(), entity, value) {
                Ok(()) if component == "transform" => {
                    ctx.mark_transform_dirty(entity);
                }
                Ok(()) => {}
                Err(error) => tracing::warn!(%entity, error = %error, "script emplace ignored"),
            }
        }
        ScriptCommand::RemoveComponent { entity, component } => {
            if let Ok(ops) = ctx.components().get(&component).copied() {
                (ops.remove)(ctx.registry_mut(), entity);
            }
        }
        ScriptCommand::DrawLine { start, end, rgba, duration } => {
            ctx.draw_line(
                Vec3::from_array(start),
                Vec3::from_array(end),
                Color::from_rgba_u32(rgba),
                duration,
            );
        }
    }
}

fn stale(entity: Entity, command: &str) {
    tracing::warn!(%entity, command, "script command targets a stale entity");
}

// ---------------------------------------------------------------------------
// SystemVariant
// ---------------------------------------------------------------------------

/// A registered system, native or script.
#[derive(Debug, Clone)]
pub enum SystemVariant {
    Native(NativeSystem),
    Script(ScriptSystem),
}

impl SystemVariant {
    pub fn native<S: EntitySystem + 'static>(system: S) -> Self {
        SystemVariant::Native(NativeSystem::new(system))
    }

    pub fn script(script: &SharedScript) -> Result<Self, ScriptError> {
        ScriptSystem::new(script).map(SystemVariant::Script)
    }

    pub fn name(&self) -> &str {
        match self {
            SystemVariant::Native(s) => s.name(),
            SystemVariant::Script(s) => s.name(),
        }
    }

    /// The name as stored by the system, for callers that keep it around.
    pub fn shared_name(&self) -> Rc<str> {
        match self {
            SystemVariant::Native(s) => Rc::clone(&s.name),
            SystemVariant::Script(s) => Rc::clone(&s.name),
        }
    }

    pub fn identity_hash(&self) -> u64 {
        match self {
            SystemVariant::Native(s) => s.identity_hash(),
            SystemVariant::Script(s) => s.identity_hash(),
        }
    }

    pub fn priority_list(&self) -> &UpdatePriorityList {
        match self {
            SystemVariant::Native(s) => s.priority_list(),
            SystemVariant::Script(s) => s.priority_list(),
        }
    }

    /// Whether scheduling `self` should replace `existing`: both are the
    /// same script by name, but `self` is bound to a reloaded instance.
    pub fn rebinds(&self, existing: &SystemVariant) -> bool {
        match (self, existing) {
            (SystemVariant::Script(new), SystemVariant::Script(old)) => {
                new.identity_hash() == old.identity_hash() && !new.same_instance(old)
            }
            _ => false,
        }
    }

    // Native systems may change anything, so the script view is dropped
    // after each of their calls.

    pub fn startup(&self, ctx: &mut SystemContext<'_>) {
        match self {
            SystemVariant::Native(s) => {
                s.inner.borrow_mut().startup(ctx);
                ctx.invalidate_script_view();
            }
            SystemVariant::Script(s) => s.run(ctx, ScriptHook::Init),
        }
    }

    pub fn update(&self, ctx: &mut SystemContext<'_>) {
        match self {
            SystemVariant::Native(s) => {
                s.inner.borrow_mut().update(ctx);
                ctx.invalidate_script_view();
            }
            SystemVariant::Script(s) => s.run(ctx, ScriptHook::Execute),
        }
    }

    pub fn teardown(&self, ctx: &mut SystemContext<'_>) {
        match self {
            SystemVariant::Native(s) => {
                s.inner.borrow_mut().teardown(ctx);
                ctx.invalidate_script_view();
            }
            SystemVariant::Script(s) => s.run(ctx, ScriptHook::Shutdown),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
