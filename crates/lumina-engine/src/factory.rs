//! Named constructors for native systems.
//!
//! The engine owns one [`SystemFactoryRegistry`] and hands it to every world
//! it creates. Worlds instantiate every factory when they are created and
//! again when they are duplicated, so each world gets fresh system state.

use std::fmt;
use std::rc::Rc;

use crate::system::{EntitySystem, NativeSystem};

type Factory = Rc<dyn Fn() -> NativeSystem>;

#[derive(Default, Clone)]
pub struct SystemFactoryRegistry {
    factories: Vec<(String, Factory)>,
}

impl SystemFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`. A second registration under the
    /// same name replaces the first.
    pub fn register<S, F>(&mut self, name: &str, make: F)
    where
        S: EntitySystem + 'static,
        F: Fn() -> S + 'static,
    {
        let factory: Factory = Rc::new(move || NativeSystem::new(make()));
        match self.factories.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name.to_owned(), factory)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| n == name)
    }

    /// A fresh instance of every registered system, in registration order.
    pub fn instantiate_all(&self) -> Vec<NativeSystem> {
        self.factories.iter().map(|(_, make)| make()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for SystemFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SystemContext;
    use crate::stage::{UpdatePriorityList, UpdateStage};

    struct Counter(u32);

    impl EntitySystem for Counter {
        fn priority_list(&self) -> UpdatePriorityList {
            UpdatePriorityList::new().with(UpdateStage::FrameStart)
        }

        fn update(&mut self, _ctx: &mut SystemContext<'_>) {
            self.0 += 1;
        }
    }

    #[test]
    fn each_instantiation_is_fresh() {
        let mut factories = SystemFactoryRegistry::new();
        factories.register("counter", || Counter(0));
        let a = factories.instantiate_all();
        let b = factories.instantiate_all();
        assert_eq!(a.len(), 1);
        assert!(!Rc::ptr_eq(a[0].shared(), b[0].shared()));
        assert_eq!(a[0].identity_hash(), b[0].identity_hash());
    }

    #[test]
    fn reregistering_replaces() {
        let mut factories = SystemFactoryRegistry::new();
        factories.register("counter", || Counter(0));
        factories.register("counter", || Counter(5));
        assert_eq!(factories.len(), 1);
        assert!(factories.contains("counter"));
        assert_eq!(factories.names().collect::<Vec<_>>(), ["counter"]);
    }
}
