use std::sync::Arc;

use gatehouse_permission::{BasicPermission, Permission, SharedPermission};

use crate::{AccessContext, GatehouseAccessError, Policy, PolicyHandle, stack};

/// Name of the [`SECURITY_PERMISSION`](gatehouse_permission::SECURITY_PERMISSION)
/// required to replace the installed policy.
pub const SET_POLICY: &str = "setPolicy";

/// Makes access decisions for the current thread against an installed
/// policy.
///
/// ```rust
/// use gatehouse_access::{AccessController, GrantPolicy, PolicyHandle, ProtectionDomain, stack};
/// use gatehouse_permission::{FilePermission, Permission, Permissions};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = AccessController::new(PolicyHandle::new(GrantPolicy::new(vec![])?));
///
/// let mut granted = Permissions::new();
/// granted.add(FilePermission::new("/tmp/-", "read")?.shared())?;
/// let plugin = ProtectionDomain::new(None, Some(granted));
///
/// let read = FilePermission::new("/tmp/cache/index", "read")?.shared();
/// let write = FilePermission::new("/tmp/cache/index", "write")?.shared();
/// stack::run_as(plugin, || {
///     assert!(controller.is_permitted(&read));
///     assert!(!controller.is_permitted(&write));
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AccessController {
    policy: PolicyHandle,
}

impl AccessController {
    /// A controller deciding against `policy`.
    pub fn new(policy: PolicyHandle) -> Self {
        Self { policy }
    }

    /// The policy decisions are made against.
    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    /// Capture the current context so it can be checked later, possibly on
    /// another thread.
    pub fn context(&self) -> AccessContext {
        stack::capture()
    }

    /// Succeed if the current thread may exercise `permission`.
    pub fn check_permission(
        &self,
        permission: &SharedPermission,
    ) -> Result<(), GatehouseAccessError> {
        let captured = stack::capture_stack();
        if captured.is_system() && captured.is_privileged() {
            tracing::trace!(%permission, "allowed for privileged system code");
            return Ok(());
        }

        let context = captured.optimize(stack::inherited_context().as_ref());
        self.check_permission_in(&context, permission)
    }

    /// Succeed if `context` may exercise `permission`.
    pub fn check_permission_in(
        &self,
        context: &AccessContext,
        permission: &SharedPermission,
    ) -> Result<(), GatehouseAccessError> {
        if context.is_system() {
            tracing::trace!(%permission, "allowed for system context");
            return Ok(());
        }
        context.check_permission(permission, &self.policy)?;
        tracing::trace!(%permission, domains = context.domains().len(), "allowed");
        Ok(())
    }

    /// Whether the current thread may exercise `permission`. Never signals.
    pub fn is_permitted(&self, permission: &SharedPermission) -> bool {
        self.check_permission(permission).is_ok()
    }

    /// Replace the installed policy, if the current thread may.
    pub fn set_policy(&self, policy: impl Policy + 'static) -> Result<(), GatehouseAccessError> {
        self.check_permission(&BasicPermission::security(SET_POLICY)?.shared())?;
        self.policy.set_policy(policy);
        Ok(())
    }

    /// Run `action` privileged: checks made inside it consider the domains
    /// entered inside it and the domain that called this, but nothing
    /// further out.
    pub fn run_privileged<T>(action: impl FnOnce() -> T) -> T {
        stack::run_privileged(None, None, action)
    }

    /// Like [`AccessController::run_privileged`], but checks inside
    /// `action` must also pass against `context`.
    pub fn run_privileged_with<T>(context: &AccessContext, action: impl FnOnce() -> T) -> T {
        stack::run_privileged(Some(context.clone()), None, action)
    }

    /// Run `action` privileged only for permissions implied by one of
    /// `permissions`. Those are checked as in
    /// [`AccessController::run_privileged_with`] (or
    /// [`AccessController::run_privileged`] without a `context`); every
    /// other check also has to pass for the callers of this.
    pub fn run_privileged_limited<T>(
        context: Option<&AccessContext>,
        permissions: &[SharedPermission],
        action: impl FnOnce() -> T,
    ) -> T {
        let limit: Arc<[SharedPermission]> = permissions.into();
        stack::run_privileged(context.cloned(), Some(limit), action)
    }
}
