use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use gatehouse_common::{CodeSource, Principal};
use gatehouse_permission::{ALL_PERMISSION, Permission, Permissions};

use crate::PolicyHandle;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// A stable identifier for a [`ProtectionDomain`], unique for the life of the
/// process. Used to key the policy cache without keeping domains alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey(u64);

impl DomainKey {
    fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for DomainKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

struct DomainInner {
    key: DomainKey,
    code_source: Option<CodeSource>,
    permissions: Option<Permissions>,
    principals: Vec<Principal>,
    loader: Option<String>,
    static_only: bool,
    all_permission: bool,
}

/// A unit of trust: the code source a piece of code came from, the
/// permissions bound to it directly, and the principals it acts for.
///
/// Domains are cheap to clone and compare by identity. Two domains built
/// from identical parts are still different domains.
#[derive(Clone)]
pub struct ProtectionDomain(Arc<DomainInner>);

impl ProtectionDomain {
    /// A domain whose permissions are fixed at construction. The installed
    /// policy is never consulted for it.
    pub fn new(code_source: Option<CodeSource>, permissions: Option<Permissions>) -> Self {
        Self::build(code_source, permissions, Vec::new(), None, true)
    }

    /// A domain whose effective permissions are its own `permissions` plus
    /// whatever the installed policy grants to its code source and
    /// principals.
    pub fn with_policy(
        code_source: Option<CodeSource>,
        permissions: Option<Permissions>,
        principals: Vec<Principal>,
        loader: Option<String>,
    ) -> Self {
        Self::build(code_source, permissions, principals, loader, false)
    }

    fn build(
        code_source: Option<CodeSource>,
        permissions: Option<Permissions>,
        principals: Vec<Principal>,
        loader: Option<String>,
        static_only: bool,
    ) -> Self {
        let permissions = permissions.map(|mut permissions| {
            permissions.set_read_only();
            permissions
        });
        let all_permission = permissions.as_ref().is_some_and(|permissions| {
            permissions
                .elements()
                .iter()
                .any(|permission| permission.kind() == ALL_PERMISSION)
        });

        Self(Arc::new(DomainInner {
            key: DomainKey::next(),
            code_source,
            permissions,
            principals,
            loader,
            static_only,
            all_permission,
        }))
    }

    /// The cache key of this domain.
    pub fn key(&self) -> DomainKey {
        self.0.key
    }

    /// Where the code of this domain came from.
    pub fn code_source(&self) -> Option<&CodeSource> {
        self.0.code_source.as_ref()
    }

    /// Permissions bound to the domain at construction. Sealed.
    pub fn permissions(&self) -> Option<&Permissions> {
        self.0.permissions.as_ref()
    }

    /// Principals the code of this domain runs on behalf of.
    pub fn principals(&self) -> &[Principal] {
        &self.0.principals
    }

    /// Name of the loading unit that produced this domain.
    pub fn loader(&self) -> Option<&str> {
        self.0.loader.as_deref()
    }

    /// Whether the policy is ignored for this domain.
    pub fn is_static(&self) -> bool {
        self.0.static_only
    }

    /// Whether this domain holds `permission`, consulting `policy` unless
    /// the domain is static.
    pub fn implies(&self, permission: &dyn Permission, policy: &PolicyHandle) -> bool {
        if self.0.all_permission {
            return true;
        }
        if !self.0.static_only && policy.implies(self, permission) {
            return true;
        }
        self.0
            .permissions
            .as_ref()
            .is_some_and(|permissions| permissions.implies(permission))
    }

    pub(crate) fn downgrade(&self) -> WeakDomain {
        WeakDomain(Arc::downgrade(&self.0))
    }
}

impl PartialEq for ProtectionDomain {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ProtectionDomain {}

impl Hash for ProtectionDomain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key.hash(state);
    }
}

impl Debug for ProtectionDomain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionDomain")
            .field("key", &self.0.key)
            .field("code_source", &self.0.code_source)
            .field("principals", &self.0.principals)
            .field("loader", &self.0.loader)
            .field("static_only", &self.0.static_only)
            .finish()
    }
}

impl Display for ProtectionDomain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.key)?;
        match &self.0.code_source {
            Some(code_source) => write!(f, " ({code_source})"),
            None => write!(f, " (<no code source>)"),
        }
    }
}

/// A reference to a domain that does not keep it alive.
#[derive(Clone)]
pub(crate) struct WeakDomain(Weak<DomainInner>);

impl WeakDomain {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_permission::{AllPermission, FilePermission};
    use testresult::TestResult;

    #[test]
    fn it_compares_by_identity() {
        let a = ProtectionDomain::new(None, None);
        let b = ProtectionDomain::new(None, None);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn it_seals_bound_permissions() -> TestResult {
        let mut permissions = Permissions::new();
        permissions.add(FilePermission::new("/tmp/*", "read")?.shared())?;
        let domain = ProtectionDomain::new(None, Some(permissions));

        assert!(domain.permissions().ok_or("missing")?.is_read_only());
        Ok(())
    }

    #[test]
    fn it_ignores_the_policy_for_static_domains() -> TestResult {
        let policy = PolicyHandle::new(crate::GrantPolicy::new(vec![crate::GrantEntry {
            permissions: vec![
                crate::PermissionEntry::new("FilePermission", "/-").with_actions("write"),
            ],
            ..Default::default()
        }])?);
        let mut permissions = Permissions::new();
        permissions.add(FilePermission::new("/tmp/*", "read")?.shared())?;

        let fixed = ProtectionDomain::new(None, Some(permissions.clone()));
        let dynamic = ProtectionDomain::with_policy(None, Some(permissions), vec![], None);
        let write = FilePermission::new("/tmp/a", "write")?;

        assert!(!fixed.implies(&write, &policy));
        assert!(dynamic.implies(&write, &policy));
        Ok(())
    }

    #[test]
    fn it_short_circuits_on_bound_all_permission() -> TestResult {
        let policy = PolicyHandle::new(crate::GrantPolicy::new(vec![])?);
        let permissions: Permissions = [AllPermission.shared()].into_iter().collect();
        let domain = ProtectionDomain::with_policy(None, Some(permissions), vec![], None);

        assert!(domain.implies(&FilePermission::new("/etc/shadow", "read")?, &policy));
        Ok(())
    }

    #[test]
    fn it_does_not_keep_domains_alive_through_weak_references() {
        let domain = ProtectionDomain::new(None, None);
        let weak = domain.downgrade();

        assert!(weak.is_alive());
        drop(domain);
        assert!(!weak.is_alive());
    }
}
