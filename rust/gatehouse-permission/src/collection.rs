use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    ALL_PERMISSION, GatehousePermissionError, Permission, PermissionResolver, SharedPermission,
    UnresolvedPermission,
};

/// Members of a [`Permissions`] collection that share a kind.
#[derive(Debug, Clone, Default)]
struct Bucket {
    members: Vec<SharedPermission>,
}

impl Bucket {
    fn push(&mut self, permission: SharedPermission) {
        if !self
            .members
            .iter()
            .any(|member| member.same_as(permission.as_ref()))
        {
            self.members.push(permission);
        }
    }

    fn implies(&self, permission: &dyn Permission) -> bool {
        let Some(desired) = permission.action_mask() else {
            return self.members.iter().any(|member| member.implies(permission));
        };

        let mut effective = 0;
        for member in &self.members {
            if !member.implies_target(permission) {
                continue;
            }
            effective |= member.action_mask().unwrap_or(u32::MAX);
            if effective & desired == desired {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone, Default)]
struct Inner {
    buckets: IndexMap<String, Bucket>,
    unresolved: IndexMap<String, Vec<Arc<UnresolvedPermission>>>,
    all_permission: bool,
}

impl Inner {
    fn insert(&mut self, permission: SharedPermission) {
        if let Some(unresolved) = permission.downcast_ref::<UnresolvedPermission>() {
            let pending = self
                .unresolved
                .entry(unresolved.unresolved_kind().to_owned())
                .or_default();
            if !pending.iter().any(|p| p.as_ref() == unresolved) {
                pending.push(Arc::new(unresolved.clone()));
            }
            return;
        }

        if permission.kind() == ALL_PERMISSION {
            self.all_permission = true;
        }
        self.buckets
            .entry(permission.kind().to_owned())
            .or_default()
            .push(permission);
    }

    fn implies(&self, permission: &dyn Permission) -> bool {
        self.all_permission
            || self
                .buckets
                .get(permission.kind())
                .is_some_and(|bucket| bucket.implies(permission))
    }
}

/// A heterogeneous collection of permissions.
///
/// Members are bucketed by kind, so `implies` only ever compares a
/// permission against members of its own kind (plus the [`AllPermission`]
/// fast path). Kinds whose actions combine (see
/// [`Permission::action_mask`]) are satisfied by the union of every
/// applicable member.
///
/// [`UnresolvedPermission`] members are set aside. When the collection has a
/// [`PermissionResolver`], the pending members of a kind are resolved the
/// first time a permission of that kind is checked.
///
/// [`AllPermission`]: crate::AllPermission
pub struct Permissions {
    inner: RwLock<Inner>,
    read_only: bool,
    resolver: Option<Arc<PermissionResolver>>,
}

impl Permissions {
    /// An empty, writable collection.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            read_only: false,
            resolver: None,
        }
    }

    /// Resolve pending [`UnresolvedPermission`]s through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<PermissionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The resolver used for pending members, if any.
    pub fn resolver(&self) -> Option<&Arc<PermissionResolver>> {
        self.resolver.as_ref()
    }

    /// Add a permission.
    pub fn add(&mut self, permission: SharedPermission) -> Result<(), GatehousePermissionError> {
        if self.read_only {
            return Err(GatehousePermissionError::ReadOnly);
        }
        self.inner.get_mut().insert(permission);
        Ok(())
    }

    /// Add every member of `other`, including its pending unresolved ones.
    pub fn add_all(&mut self, other: &Permissions) -> Result<(), GatehousePermissionError> {
        if self.read_only {
            return Err(GatehousePermissionError::ReadOnly);
        }
        for permission in other.elements() {
            self.inner.get_mut().insert(permission);
        }
        Ok(())
    }

    /// Seal the collection. Further `add`s fail with
    /// [`GatehousePermissionError::ReadOnly`].
    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Whether the collection has been sealed.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether some member (or union of members) implies `permission`.
    pub fn implies(&self, permission: &dyn Permission) -> bool {
        {
            let inner = self.inner.read();
            if inner.all_permission {
                return true;
            }
            let pending = inner.unresolved.contains_key(permission.kind());
            if !pending || self.resolver.is_none() {
                return inner.implies(permission);
            }
        }

        self.resolve_pending(permission.kind());
        self.inner.read().implies(permission)
    }

    fn resolve_pending(&self, kind: &str) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        if !resolver.contains(kind) {
            return;
        }

        let mut inner = self.inner.write();
        let Some(pending) = inner.unresolved.shift_remove(kind) else {
            return;
        };
        for unresolved in pending {
            if let Some(permission) = unresolved.resolve(resolver) {
                tracing::trace!(%permission, "resolved pending permission");
                inner.insert(permission);
            }
        }
    }

    /// Every member, resolved members first, in insertion order.
    pub fn elements(&self) -> Vec<SharedPermission> {
        let inner = self.inner.read();
        let resolved = inner
            .buckets
            .values()
            .flat_map(|bucket| bucket.members.iter().cloned());
        let pending = inner
            .unresolved
            .values()
            .flat_map(|pending| pending.iter().map(|p| p.clone() as SharedPermission));
        resolved.chain(pending).collect()
    }

    /// Number of members, counting pending unresolved ones.
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.buckets.values().map(|b| b.members.len()).sum::<usize>()
            + inner.unresolved.values().map(Vec::len).sum::<usize>()
    }

    /// Whether the collection has no members at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Permissions {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
            read_only: self.read_only,
            resolver: self.resolver.clone(),
        }
    }
}

impl Debug for Permissions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permissions")
            .field("elements", &self.elements())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl FromIterator<SharedPermission> for Permissions {
    fn from_iter<T: IntoIterator<Item = SharedPermission>>(iter: T) -> Self {
        let mut inner = Inner::default();
        for permission in iter {
            inner.insert(permission);
        }
        Self {
            inner: RwLock::new(inner),
            read_only: false,
            resolver: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllPermission, BasicPermission, FilePermission, PermissionFactory};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    #[test]
    fn it_combines_actions_across_members() -> TestResult {
        let mut permissions = Permissions::new();
        permissions.add(FilePermission::new("/tmp/*", "read")?.shared())?;
        permissions.add(FilePermission::new("/tmp/-", "write")?.shared())?;

        assert!(permissions.implies(&FilePermission::new("/tmp/foo", "read,write")?));
        assert!(!permissions.implies(&FilePermission::new("/tmp/a/b", "read,write")?));
        assert!(permissions.implies(&FilePermission::new("/tmp/a/b", "write")?));
        Ok(())
    }

    #[test]
    fn it_keeps_kinds_apart() -> TestResult {
        let permissions: Permissions = [BasicPermission::runtime("*")?.shared()]
            .into_iter()
            .collect();

        assert!(permissions.implies(&BasicPermission::runtime("exitVM")?));
        assert!(!permissions.implies(&BasicPermission::security("exitVM")?));
        Ok(())
    }

    #[test]
    fn it_short_circuits_on_all_permission() -> TestResult {
        let mut permissions = Permissions::new();
        permissions.add(AllPermission.shared())?;

        assert!(permissions.implies(&FilePermission::new("/etc/shadow", "write")?));
        Ok(())
    }

    #[test]
    fn it_rejects_additions_once_sealed() -> TestResult {
        let mut permissions = Permissions::new();
        permissions.add(BasicPermission::runtime("a")?.shared())?;
        permissions.set_read_only();

        assert_eq!(
            permissions.add(BasicPermission::runtime("b")?.shared()),
            Err(GatehousePermissionError::ReadOnly)
        );
        assert_eq!(permissions.len(), 1);
        Ok(())
    }

    #[test]
    fn it_ignores_duplicate_members() -> TestResult {
        let mut permissions = Permissions::new();
        permissions.add(FilePermission::new("/a", "read")?.shared())?;
        permissions.add(FilePermission::new("/a", "read")?.shared())?;

        assert_eq!(permissions.len(), 1);
        Ok(())
    }

    #[test_log::test]
    fn it_resolves_pending_members_on_first_use() -> TestResult {
        let resolver = Arc::new(PermissionResolver::new());
        let mut permissions = Permissions::new().with_resolver(resolver.clone());
        permissions.add(
            UnresolvedPermission::new("ThreadPermission", Some("spawn".into()), None, vec![])
                .shared(),
        )?;

        let spawn = BasicPermission::new("ThreadPermission", "spawn")?;
        assert!(!permissions.implies(&spawn));

        resolver.register(PermissionFactory::new("ThreadPermission").with_unary(|name| {
            Ok(BasicPermission::new("ThreadPermission", name)?.shared())
        }));

        assert!(permissions.implies(&spawn));
        assert_eq!(permissions.elements()[0].kind(), "ThreadPermission");
        Ok(())
    }
}
