use std::any::Any;

use gatehouse_common::Certificate;

use crate::{GatehousePermissionError, Permission, PermissionResolver, SharedPermission};

/// Kind name of [`UnresolvedPermission`].
pub const UNRESOLVED_PERMISSION: &str = "UnresolvedPermission";

/// A placeholder for a permission whose kind had no factory when the grant
/// was read.
///
/// It never implies anything itself. Once a factory for its kind has been
/// registered it can be [resolved](UnresolvedPermission::resolve) into a
/// real permission, provided every signer recorded here also signed the
/// factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPermission {
    kind: String,
    name: Option<String>,
    actions: Option<String>,
    signers: Vec<Certificate>,
}

impl UnresolvedPermission {
    /// Record a permission of `kind` to be built later from `name` and
    /// `actions`, only from a factory signed by all of `signers`.
    pub fn new(
        kind: impl Into<String>,
        name: Option<String>,
        actions: Option<String>,
        signers: Vec<Certificate>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name,
            actions,
            signers,
        }
    }

    /// The kind the real permission will have.
    pub fn unresolved_kind(&self) -> &str {
        &self.kind
    }

    /// The recorded name, if one was given.
    pub fn unresolved_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The recorded actions, if any were given.
    pub fn unresolved_actions(&self) -> Option<&str> {
        self.actions.as_deref()
    }

    /// Signers the factory must have been signed by.
    pub fn unresolved_signers(&self) -> &[Certificate] {
        &self.signers
    }

    /// Build the real permission.
    ///
    /// `Ok(None)` means no factory is registered for the kind yet, or the
    /// factory's signers do not include every recorded signer.
    pub fn try_resolve(
        &self,
        resolver: &PermissionResolver,
    ) -> Result<Option<SharedPermission>, GatehousePermissionError> {
        let Some(factory) = resolver.factory(&self.kind) else {
            return Ok(None);
        };

        let missing_signer = self
            .signers
            .iter()
            .find(|signer| !factory.signers().contains(signer));
        if let Some(signer) = missing_signer {
            tracing::warn!(
                kind = %self.kind,
                signer = %signer,
                "permission factory is not signed by a required signer"
            );
            return Ok(None);
        }

        factory
            .construct(self.name.as_deref(), self.actions.as_deref())
            .map(Some)
    }

    /// Like [`UnresolvedPermission::try_resolve`], but construction failures
    /// are logged and reported as `None`.
    pub fn resolve(&self, resolver: &PermissionResolver) -> Option<SharedPermission> {
        match self.try_resolve(resolver) {
            Ok(permission) => permission,
            Err(error) => {
                tracing::warn!(kind = %self.kind, %error, "failed to resolve permission");
                None
            }
        }
    }
}

impl Permission for UnresolvedPermission {
    fn kind(&self) -> &str {
        UNRESOLVED_PERMISSION
    }

    fn name(&self) -> &str {
        &self.kind
    }

    fn implies(&self, _other: &dyn Permission) -> bool {
        false
    }

    fn same_as(&self, other: &dyn Permission) -> bool {
        other
            .downcast_ref::<UnresolvedPermission>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
