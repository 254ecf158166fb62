//! Per-stage system lists.

use std::collections::HashSet;

use crate::stage::UpdateStage;
use crate::system::SystemVariant;

/// One list per [`UpdateStage`], each sorted by ascending priority and,
/// among equal priorities, by registration order.
#[derive(Debug, Default)]
pub struct SystemSchedule {
    stages: [Vec<SystemVariant>; UpdateStage::COUNT],
}

impl SystemSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `system` into every stage it enables.
    ///
    /// Returns `false` and changes nothing when a system with the same
    /// identity is already scheduled or when no stage is enabled. A script
    /// system bound to a reloaded instance of a scheduled script takes the
    /// old entry's place instead, under its own priorities.
    pub fn register(&mut self, system: SystemVariant) -> bool {
        let identity = system.identity_hash();
        let priorities = *system.priority_list();
        let rebinding = match self.find(identity) {
            Some(existing) if system.rebinds(existing) => true,
            Some(_) => {
                tracing::warn!(system = system.name(), identity, "system already registered");
                return false;
            }
            None => false,
        };
        if priorities.is_empty() {
            tracing::warn!(system = system.name(), "system enables no stage");
            return false;
        }
        if rebinding {
            self.remove(identity);
            tracing::debug!(system = system.name(), identity, "script system rebound");
        }

        for stage in priorities.enabled_stages() {
            let priority = priorities.priority_for(stage);
            let list = &mut self.stages[stage.index()];
            let at = list.partition_point(|s| s.priority_list().priority_for(stage) <= priority);
            list.insert(at, system.clone());
        }
        tracing::debug!(system = system.name(), identity, "system registered");
        true
    }

    pub fn systems(&self, stage: UpdateStage) -> &[SystemVariant] {
        &self.stages[stage.index()]
    }

    pub fn contains(&self, identity: u64) -> bool {
        self.find(identity).is_some()
    }

    pub fn find(&self, identity: u64) -> Option<&SystemVariant> {
        self.stages
            .iter()
            .flatten()
            .find(|s| s.identity_hash() == identity)
    }

    /// Take the system with `identity` out of every stage.
    pub fn remove(&mut self, identity: u64) -> bool {
        let mut removed = false;
        for list in &mut self.stages {
            let before = list.len();
            list.retain(|s| s.identity_hash() != identity);
            removed |= list.len() != before;
        }
        removed
    }

    /// Every scheduled system once, in stage order then list order.
    pub fn unique_systems(&self) -> Vec<SystemVariant> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .flatten()
            .filter(|s| seen.insert(s.identity_hash()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.unique_systems().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(Vec::is_empty)
    }

    /// Drop every list. Only used when a world is torn down.
    pub fn clear(&mut self) {
        for list in &mut self.stages {
            list.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
