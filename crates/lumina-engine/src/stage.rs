//! Update stages and per-stage priorities.
//!
//! A frame is split into ordered [`UpdateStage`]s. Each system declares, once,
//! an [`UpdatePriorityList`] saying which stages it runs in and at which
//! [`UpdatePriority`]. Lower priorities run earlier within a stage.

use std::fmt;

// ---------------------------------------------------------------------------
// UpdateStage
// ---------------------------------------------------------------------------

/// Ordered phases of a frame.
///
/// `FrameStart..=FrameEnd` run while the world is running; `Paused` runs
/// alone while it is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum UpdateStage {
    FrameStart = 0,
    PrePhysics = 1,
    DuringPhysics = 2,
    PostPhysics = 3,
    FrameEnd = 4,
    Paused = 5,
}

impl UpdateStage {
    /// Number of stages; bounds every per-stage array.
    pub const COUNT: usize = 6;

    /// Every stage in declaration order.
    pub const ALL: [UpdateStage; Self::COUNT] = [
        UpdateStage::FrameStart,
        UpdateStage::PrePhysics,
        UpdateStage::DuringPhysics,
        UpdateStage::PostPhysics,
        UpdateStage::FrameEnd,
        UpdateStage::Paused,
    ];

    /// Stages executed by a running (not paused) world, in order.
    pub const RUNNING: [UpdateStage; 5] = [
        UpdateStage::FrameStart,
        UpdateStage::PrePhysics,
        UpdateStage::DuringPhysics,
        UpdateStage::PostPhysics,
        UpdateStage::FrameEnd,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            UpdateStage::FrameStart => "FrameStart",
            UpdateStage::PrePhysics => "PrePhysics",
            UpdateStage::DuringPhysics => "DuringPhysics",
            UpdateStage::PostPhysics => "PostPhysics",
            UpdateStage::FrameEnd => "FrameEnd",
            UpdateStage::Paused => "Paused",
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// UpdatePriority
// ---------------------------------------------------------------------------

/// Ordering key within a stage. Lower runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UpdatePriority(pub u8);

impl UpdatePriority {
    pub const HIGHEST: Self = Self(0);
    pub const HIGH: Self = Self(64);
    pub const MEDIUM: Self = Self(128);
    pub const DEFAULT: Self = Self::MEDIUM;
    pub const LOW: Self = Self(192);
    /// Marks a stage the system does not take part in.
    pub const DISABLED: Self = Self(255);

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_disabled(self) -> bool {
        self == Self::DISABLED
    }
}

impl Default for UpdatePriority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u8> for UpdatePriority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// UpdatePriorityList
// ---------------------------------------------------------------------------

/// Per-stage priorities of one system, fixed at declaration.
///
/// ```
/// use lumina_engine::stage::{UpdatePriority, UpdatePriorityList, UpdateStage};
///
/// let list = UpdatePriorityList::new()
///     .with(UpdateStage::PrePhysics)
///     .with_priority(UpdateStage::FrameEnd, UpdatePriority::LOW);
/// assert!(list.is_stage_enabled(UpdateStage::PrePhysics));
/// assert_eq!(list.priority_for(UpdateStage::FrameEnd), UpdatePriority::LOW);
/// assert!(!list.is_stage_enabled(UpdateStage::Paused));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdatePriorityList {
    priorities: [UpdatePriority; UpdateStage::COUNT],
}

impl UpdatePriorityList {
    /// A list with every stage disabled.
    pub const fn new() -> Self {
        Self {
            priorities: [UpdatePriority::DISABLED; UpdateStage::COUNT],
        }
    }

    /// Enable `stage` at [`UpdatePriority::DEFAULT`].
    pub fn with(self, stage: UpdateStage) -> Self {
        self.with_priority(stage, UpdatePriority::DEFAULT)
    }

    /// Enable `stage` at `priority`. Passing [`UpdatePriority::DISABLED`]
    /// disables it again.
    pub fn with_priority(mut self, stage: UpdateStage, priority: UpdatePriority) -> Self {
        self.priorities[stage.index()] = priority;
        self
    }

    /// Build from per-stage answers where `None` means disabled, e.g. what a
    /// script declared. Missing trailing entries stay disabled.
    pub fn from_declared(declared: &[Option<u8>]) -> Self {
        let mut list = Self::new();
        for (stage, answer) in UpdateStage::ALL.iter().zip(declared) {
            if let Some(priority) = answer {
                list = list.with_priority(*stage, UpdatePriority(*priority));
            }
        }
        list
    }

    pub fn is_stage_enabled(&self, stage: UpdateStage) -> bool {
        !self.priorities[stage.index()].is_disabled()
    }

    pub fn priority_for(&self, stage: UpdateStage) -> UpdatePriority {
        self.priorities[stage.index()]
    }

    pub fn enabled_stages(&self) -> impl Iterator<Item = UpdateStage> + '_ {
        UpdateStage::ALL
            .into_iter()
            .filter(|stage| self.is_stage_enabled(*stage))
    }

    /// True when no stage is enabled.
    pub fn is_empty(&self) -> bool {
        self.priorities.iter().all(|p| p.is_disabled())
    }
}

impl Default for UpdatePriorityList {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
