//! # Scoped Service Map
//!
//! The dependency-injection seam of the scene graph. A container resolves a
//! child's services once at load time: the child sees everything its
//! ancestors provided, plus whatever it registers for its own subtree.
//!
//! Scopes are immutable once built. Extending a scope creates a child scope
//! that shadows the parent on type collisions; the parent is never touched,
//! so sibling subtrees cannot observe each other's registrations.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;

struct Scope {
    parent: Option<Arc<Scope>>,
    entries: HashMap<TypeId, Entry>,
}

/// An immutable, cheaply cloneable set of services scoped to a subtree.
///
/// # Example
///
/// ```rust,ignore
/// struct AudioMixer { /* ... */ }
///
/// let root = Services::new().extend().provide(AudioMixer::new()).finish();
/// let mixer: Arc<AudioMixer> = root.get().unwrap();
/// ```
#[derive(Clone, Default)]
pub struct Services {
    scope: Option<Arc<Scope>>,
}

impl Services {
    /// Creates an empty service set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a child scope on top of this one.
    #[must_use]
    pub fn extend(&self) -> ServicesBuilder {
        ServicesBuilder {
            parent: self.scope.clone(),
            entries: HashMap::new(),
        }
    }

    /// Resolves a service, innermost scope first.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut scope = self.scope.as_ref();
        while let Some(current) = scope {
            if let Some(entry) = current.entries.get(&TypeId::of::<T>()) {
                return Arc::clone(entry).downcast::<T>().ok();
            }
            scope = current.parent.as_ref();
        }
        None
    }

    /// Returns true if a service of type `T` is visible from this scope.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.get::<T>().is_some()
    }

    /// Number of scopes between this set and the root provider.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut scope = self.scope.as_ref();
        while let Some(current) = scope {
            depth += 1;
            scope = current.parent.as_ref();
        }
        depth
    }
}

/// Builder for a child service scope.
pub struct ServicesBuilder {
    parent: Option<Arc<Scope>>,
    entries: HashMap<TypeId, Entry>,
}

impl ServicesBuilder {
    /// Registers a service for the subtree this scope will govern.
    ///
    /// Registering a second service of the same type in one builder
    /// replaces the first; registering a type the parent already provides
    /// shadows the parent's instance.
    #[must_use]
    pub fn provide<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.entries.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    /// Registers an already-shared service.
    #[must_use]
    pub fn provide_shared<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.entries.insert(TypeId::of::<T>(), service);
        self
    }

    /// Finishes the scope.
    ///
    /// An empty builder collapses to its parent instead of stacking an
    /// empty scope.
    #[must_use]
    pub fn finish(self) -> Services {
        if self.entries.is_empty() {
            return Services { scope: self.parent };
        }
        Services {
            scope: Some(Arc::new(Scope {
                parent: self.parent,
                entries: self.entries,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Registry(u32);
    struct Mixer(&'static str);

    #[test]
    fn test_empty_set_resolves_nothing() {
        let services = Services::new();
        assert!(services.get::<Registry>().is_none());
        assert_eq!(services.depth(), 0);
    }

    #[test]
    fn test_child_sees_parent_services() {
        let root = Services::new().extend().provide(Registry(7)).finish();
        let child = root.extend().provide(Mixer("stereo")).finish();

        assert_eq!(child.get::<Registry>().unwrap().0, 7);
        assert_eq!(child.get::<Mixer>().unwrap().0, "stereo");
        assert!(root.get::<Mixer>().is_none());
    }

    #[test]
    fn test_child_scope_shadows_parent() {
        let root = Services::new().extend().provide(Registry(1)).finish();
        let child = root.extend().provide(Registry(2)).finish();

        assert_eq!(child.get::<Registry>().unwrap().0, 2);
        assert_eq!(root.get::<Registry>().unwrap().0, 1);
    }

    #[test]
    fn test_empty_builder_collapses() {
        let root = Services::new().extend().provide(Registry(1)).finish();
        let same = root.extend().finish();
        assert_eq!(same.depth(), root.depth());
    }

    #[test]
    fn test_shared_instance_is_not_cloned() {
        let mixer = Arc::new(Mixer("mono"));
        let services = Services::new()
            .extend()
            .provide_shared(Arc::clone(&mixer))
            .finish();

        let resolved = services.get::<Mixer>().unwrap();
        assert!(Arc::ptr_eq(&resolved, &mixer));
    }
}
