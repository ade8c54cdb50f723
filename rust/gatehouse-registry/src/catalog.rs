use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{BoxError, EngineParameter};

/// A constructed implementation, to be downcast by the caller.
pub type Implementation = Box<dyn Any + Send>;

/// Builds an implementation, given the constructor parameter if the
/// service type takes one.
pub type Factory =
    dyn Fn(Option<&dyn EngineParameter>) -> Result<Implementation, BoxError> + Send + Sync;

/// A factory registered under a class name.
pub struct Implementor {
    class_name: String,
    factory: Box<Factory>,
}

impl Implementor {
    pub(crate) fn new(class_name: impl Into<String>, factory: Box<Factory>) -> Self {
        Self {
            class_name: class_name.into(),
            factory,
        }
    }

    /// The class name this implementor was registered under.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub(crate) fn construct(
        &self,
        parameter: Option<&dyn EngineParameter>,
    ) -> Result<Implementation, BoxError> {
        (self.factory)(parameter)
    }
}

impl Debug for Implementor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Implementor")
            .field("class_name", &self.class_name)
            .finish_non_exhaustive()
    }
}

/// The implementations a provider can construct, by class name.
///
/// Services registered by class name resolve their implementor here on
/// first use and keep only a weak reference to it, so unregistering a class
/// releases it even while services still name it.
#[derive(Debug, Default)]
pub struct ImplementationCatalog {
    implementors: RwLock<HashMap<String, Arc<Implementor>>>,
}

impl ImplementationCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `class_name` constructible through `factory`, replacing any
    /// previous registration.
    pub fn register<F>(&self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(Option<&dyn EngineParameter>) -> Result<Implementation, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let class_name = class_name.into();
        tracing::trace!(%class_name, "registered implementation");
        let implementor = Arc::new(Implementor::new(class_name.clone(), Box::new(factory)));
        self.implementors.write().insert(class_name, implementor);
    }

    /// Forget `class_name`. Returns whether it was registered.
    pub fn unregister(&self, class_name: &str) -> bool {
        self.implementors.write().remove(class_name).is_some()
    }

    /// Whether `class_name` is registered.
    pub fn contains(&self, class_name: &str) -> bool {
        self.implementors.read().contains_key(class_name)
    }

    pub(crate) fn implementor(&self, class_name: &str) -> Option<Arc<Implementor>> {
        self.implementors.read().get(class_name).cloned()
    }
}
