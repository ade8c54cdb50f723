use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use gatehouse_common::Certificate;
use parking_lot::RwLock;

use crate::{
    ALL_PERMISSION, AllPermission, BasicPermission, FILE_PERMISSION, FilePermission,
    GatehousePermissionError, PROPERTY_PERMISSION, Permission, PropertyPermission,
    RUNTIME_PERMISSION, SECURITY_PERMISSION, SharedPermission, UnresolvedPermission,
};

type Constructed = Result<SharedPermission, GatehousePermissionError>;
type Nullary = Arc<dyn Fn() -> Constructed + Send + Sync>;
type Unary = Arc<dyn Fn(&str) -> Constructed + Send + Sync>;
type Binary = Arc<dyn Fn(&str, Option<&str>) -> Constructed + Send + Sync>;

/// Constructors for one permission kind.
///
/// A factory may offer any combination of a no-argument constructor, a
/// constructor taking a name, and one taking a name plus actions. The
/// signers are the parties that vouch for the factory; an
/// [`UnresolvedPermission`] that names signers only resolves through a
/// factory carrying all of them.
#[derive(Clone)]
pub struct PermissionFactory {
    kind: String,
    nullary: Option<Nullary>,
    unary: Option<Unary>,
    binary: Option<Binary>,
    signers: Vec<Certificate>,
}

impl PermissionFactory {
    /// A factory for `kind` with no constructors yet.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            nullary: None,
            unary: None,
            binary: None,
            signers: Vec::new(),
        }
    }

    /// Add a constructor taking no arguments.
    pub fn with_nullary(
        mut self,
        constructor: impl Fn() -> Constructed + Send + Sync + 'static,
    ) -> Self {
        self.nullary = Some(Arc::new(constructor));
        self
    }

    /// Add a constructor taking a name.
    pub fn with_unary(
        mut self,
        constructor: impl Fn(&str) -> Constructed + Send + Sync + 'static,
    ) -> Self {
        self.unary = Some(Arc::new(constructor));
        self
    }

    /// Add a constructor taking a name and optional actions.
    pub fn with_binary(
        mut self,
        constructor: impl Fn(&str, Option<&str>) -> Constructed + Send + Sync + 'static,
    ) -> Self {
        self.binary = Some(Arc::new(constructor));
        self
    }

    /// Record the parties that signed this factory.
    pub fn signed_by(mut self, signers: Vec<Certificate>) -> Self {
        self.signers = signers;
        self
    }

    /// The kind this factory builds.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The parties that signed this factory.
    pub fn signers(&self) -> &[Certificate] {
        &self.signers
    }

    /// Build a permission, picking the constructor by which arguments are
    /// present. Without name and actions the no-argument constructor is
    /// preferred; with a name only, the name constructor; when a
    /// constructor is missing the next wider one is tried.
    pub fn construct(&self, name: Option<&str>, actions: Option<&str>) -> Constructed {
        let missing = |arity| GatehousePermissionError::NoConstructor {
            kind: self.kind.clone(),
            arity,
        };
        let with_name = |name: Option<&str>| -> Constructed {
            match (&self.unary, &self.binary) {
                (Some(unary), _) => unary(name.unwrap_or_default()),
                (None, Some(binary)) => binary(name.unwrap_or_default(), None),
                (None, None) => Err(missing(1)),
            }
        };

        match (name, actions) {
            (None, None) => match &self.nullary {
                Some(nullary) => nullary(),
                None => with_name(None),
            },
            (Some(name), None) => with_name(Some(name)),
            (name, Some(actions)) => match &self.binary {
                Some(binary) => binary(name.unwrap_or_default(), Some(actions)),
                None => Err(missing(2)),
            },
        }
    }
}

impl Debug for PermissionFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionFactory")
            .field("kind", &self.kind)
            .field("nullary", &self.nullary.is_some())
            .field("unary", &self.unary.is_some())
            .field("binary", &self.binary.is_some())
            .field("signers", &self.signers)
            .finish()
    }
}

/// Maps permission kind names to the factories that build them.
///
/// Stands in for loading a permission class by name: policies refer to
/// permissions by kind, and a kind becomes constructible once its factory
/// is registered here.
#[derive(Debug, Default)]
pub struct PermissionResolver {
    factories: RwLock<HashMap<String, PermissionFactory>>,
}

impl PermissionResolver {
    /// A resolver that knows no kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver that knows the kinds defined in this crate.
    pub fn with_defaults() -> Self {
        let resolver = Self::new();
        resolver.register(
            PermissionFactory::new(ALL_PERMISSION)
                .with_nullary(|| Ok(AllPermission.shared()))
                .with_binary(|_, _| Ok(AllPermission.shared())),
        );
        resolver.register_basic(RUNTIME_PERMISSION);
        resolver.register_basic(SECURITY_PERMISSION);
        resolver.register(PermissionFactory::new(FILE_PERMISSION).with_binary(
            |name, actions| Ok(FilePermission::new(name, actions.unwrap_or_default())?.shared()),
        ));
        resolver.register(PermissionFactory::new(PROPERTY_PERMISSION).with_binary(
            |name, actions| {
                Ok(PropertyPermission::new(name, actions.unwrap_or_default())?.shared())
            },
        ));
        resolver
    }

    /// Register (or replace) the factory for its kind.
    pub fn register(&self, factory: PermissionFactory) {
        tracing::trace!(kind = %factory.kind, "registering permission factory");
        self.factories
            .write()
            .insert(factory.kind.clone(), factory);
    }

    /// Register a [`BasicPermission`] kind that ignores actions.
    pub fn register_basic(&self, kind: &str) {
        let unary_kind = kind.to_owned();
        let binary_kind = kind.to_owned();
        self.register(
            PermissionFactory::new(kind)
                .with_unary(move |name| {
                    Ok(BasicPermission::new(unary_kind.as_str(), name)?.shared())
                })
                .with_binary(move |name, _| {
                    Ok(BasicPermission::new(binary_kind.as_str(), name)?.shared())
                }),
        );
    }

    /// Whether a factory is registered for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.read().contains_key(kind)
    }

    /// The factory registered for `kind`.
    pub fn factory(&self, kind: &str) -> Option<PermissionFactory> {
        self.factories.read().get(kind).cloned()
    }

    /// Build a permission of `kind` if its factory is known, or an
    /// [`UnresolvedPermission`] to be resolved later if it is not.
    ///
    /// `signers` only constrain deferred permissions: a kind that is already
    /// known is built directly.
    pub fn instantiate(
        &self,
        kind: &str,
        name: Option<String>,
        actions: Option<String>,
        signers: Vec<Certificate>,
    ) -> Result<SharedPermission, GatehousePermissionError> {
        match self.factory(kind) {
            Some(factory) => factory.construct(name.as_deref(), actions.as_deref()),
            None => Ok(UnresolvedPermission::new(kind, name, actions, signers).shared()),
        }
    }
}
