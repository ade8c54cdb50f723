use std::fmt::Debug;
use std::sync::Arc;

use gatehouse_permission::SharedPermission;

use crate::{GatehouseAccessError, PolicyHandle, ProtectionDomain};

/// Rewrites the domains of a context as it is captured.
///
/// A combiner is attached to a context with [`AccessContext::with_combiner`].
/// When that context is later the inherited or narrowing context of a
/// capture, the combiner receives the domains found on the stack
/// (`current`) and the domains of the context it was attached to
/// (`assigned`), and its result becomes the domain list of the captured
/// context. It runs once per capture.
pub trait DomainCombiner: Debug + Send + Sync {
    /// Produce the domains of the captured context.
    fn combine(
        &self,
        current: &[ProtectionDomain],
        assigned: &[ProtectionDomain],
    ) -> Vec<ProtectionDomain>;
}

#[derive(Debug, Clone)]
struct Limit {
    permissions: Arc<[SharedPermission]>,
    narrowing: Option<Arc<AccessContext>>,
    parent: Arc<AccessContext>,
}

/// A snapshot of the domains an operation is executing on behalf of.
///
/// A check against a context succeeds only if every domain holds the
/// permission. The context with no domains is the system context and allows
/// everything.
///
/// Contexts are immutable. Captures made inside a privileged call may carry
/// an extra context that is checked along with the domains; a limited
/// privileged call additionally carries the context of its callers, which
/// is consulted for permissions the call was not privileged for.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    domains: Vec<ProtectionDomain>,
    privileged: bool,
    assigned: Option<Arc<AccessContext>>,
    combiner: Option<Arc<dyn DomainCombiner>>,
    limit: Option<Limit>,
}

impl AccessContext {
    /// The context that allows everything.
    pub fn system() -> Self {
        Self::default()
    }

    /// A context of `domains`, with duplicates removed.
    pub fn new(domains: impl IntoIterator<Item = ProtectionDomain>) -> Self {
        let mut unique = Vec::new();
        for domain in domains {
            push_unique(&mut unique, &domain);
        }
        Self {
            domains: unique,
            ..Self::default()
        }
    }

    pub(crate) fn captured(
        domains: Vec<ProtectionDomain>,
        privileged: bool,
        narrowing: Option<AccessContext>,
    ) -> Self {
        Self {
            domains,
            privileged,
            assigned: narrowing.map(Arc::new),
            ..Self::default()
        }
    }

    pub(crate) fn limited(
        domains: Vec<ProtectionDomain>,
        permissions: Arc<[SharedPermission]>,
        narrowing: Option<AccessContext>,
        parent: AccessContext,
    ) -> Self {
        Self {
            domains,
            privileged: true,
            limit: Some(Limit {
                permissions,
                narrowing: narrowing.map(Arc::new),
                parent: Arc::new(parent),
            }),
            ..Self::default()
        }
    }

    /// Attach `combiner` to this context.
    pub fn with_combiner(mut self, combiner: Arc<dyn DomainCombiner>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    /// The domains of the context, in capture order.
    pub fn domains(&self) -> &[ProtectionDomain] {
        &self.domains
    }

    /// The attached combiner, if any.
    pub fn combiner(&self) -> Option<&Arc<dyn DomainCombiner>> {
        self.combiner.as_ref()
    }

    /// Whether the context was captured inside a privileged call.
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Whether this is the system context.
    pub fn is_system(&self) -> bool {
        self.domains.is_empty() && self.assigned.is_none() && self.limit.is_none()
    }

    /// Succeeds when every domain of the context holds `permission`.
    pub fn check_permission(
        &self,
        permission: &SharedPermission,
        policy: &PolicyHandle,
    ) -> Result<(), GatehouseAccessError> {
        for domain in &self.domains {
            if !domain.implies(permission.as_ref(), policy) {
                tracing::debug!(%permission, %domain, "access denied");
                return Err(GatehouseAccessError::AccessDenied {
                    permission: permission.clone(),
                });
            }
        }

        if let Some(assigned) = &self.assigned {
            assigned.check_permission(permission, policy)?;
        }

        if let Some(limit) = &self.limit {
            let covered = limit
                .permissions
                .iter()
                .any(|granted| granted.implies(permission.as_ref()));
            if covered {
                if let Some(narrowing) = &limit.narrowing {
                    narrowing.check_permission(permission, policy)?;
                }
            } else {
                limit.parent.check_permission(permission, policy)?;
            }
        }

        Ok(())
    }

    /// Fold the context that applies beyond the captured stack into this
    /// one.
    ///
    /// For a privileged capture that is the narrowing context given to the
    /// privileged call; otherwise it is `inherited`. If that context carries
    /// a combiner the combiner decides the result. Otherwise the domains of
    /// both are merged without duplicates. The result decides every
    /// permission exactly as checking both contexts would.
    ///
    /// A limited capture keeps its callers' context. Only a combiner on its
    /// narrowing context rewrites its domains.
    pub fn optimize(&self, inherited: Option<&AccessContext>) -> AccessContext {
        if let Some(limit) = &self.limit {
            let Some(narrowing) = &limit.narrowing else {
                return self.clone();
            };
            let Some(combiner) = &narrowing.combiner else {
                return self.clone();
            };
            let combined = combiner.combine(&self.domains, &narrowing.domains);
            return Self {
                privileged: true,
                combiner: Some(combiner.clone()),
                limit: Some(Limit {
                    narrowing: None,
                    ..limit.clone()
                }),
                ..Self::new(combined)
            };
        }

        let assigned = if self.privileged {
            self.assigned.as_deref()
        } else {
            inherited
        };
        let Some(assigned) = assigned else {
            return self.clone();
        };

        if let Some(combiner) = &assigned.combiner {
            let combined = combiner.combine(&self.domains, &assigned.domains);
            return Self {
                combiner: Some(combiner.clone()),
                ..Self::new(combined)
            };
        }

        if assigned.assigned.is_some() || assigned.limit.is_some() {
            return Self {
                domains: self.domains.clone(),
                assigned: Some(Arc::new(assigned.clone())),
                ..Self::default()
            };
        }

        if self.domains.is_empty() {
            return assigned.clone();
        }
        if assigned.domains.is_empty() {
            return Self::new(self.domains.iter().cloned());
        }
        if self.domains.len() == 1 && assigned.domains.contains(&self.domains[0]) {
            return assigned.clone();
        }

        Self::new(self.domains.iter().chain(&assigned.domains).cloned())
    }

    fn same_domains(&self, other: &AccessContext) -> bool {
        self.domains
            .iter()
            .all(|domain| other.domains.contains(domain))
            && other
                .domains
                .iter()
                .all(|domain| self.domains.contains(domain))
    }
}

impl PartialEq for AccessContext {
    fn eq(&self, other: &Self) -> bool {
        let same_combiner = match (&self.combiner, &other.combiner) {
            (None, None) => true,
            (Some(this), Some(that)) => Arc::ptr_eq(this, that),
            _ => false,
        };
        let same_limit = match (&self.limit, &other.limit) {
            (None, None) => true,
            (Some(this), Some(that)) => {
                let covers = |a: &[SharedPermission], b: &[SharedPermission]| {
                    a.iter()
                        .all(|permission| b.iter().any(|other| other.same_as(permission.as_ref())))
                };
                covers(&this.permissions, &that.permissions)
                    && covers(&that.permissions, &this.permissions)
                    && this.narrowing == that.narrowing
                    && this.parent == that.parent
            }
            _ => false,
        };

        self.same_domains(other) && same_combiner && same_limit
    }
}

impl Eq for AccessContext {}

pub(crate) fn push_unique(domains: &mut Vec<ProtectionDomain>, domain: &ProtectionDomain) {
    if !domains.contains(domain) {
        domains.push(domain.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GrantPolicy, PolicyHandle};
    use gatehouse_permission::{FilePermission, Permission, Permissions};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn domain(grants: &[(&str, &str)]) -> ProtectionDomain {
        let permissions: Permissions = grants
            .iter()
            .map(|(path, actions)| FilePermission::new(*path, actions).unwrap().shared())
            .collect();
        ProtectionDomain::new(None, Some(permissions))
    }

    fn policy() -> PolicyHandle {
        PolicyHandle::new(GrantPolicy::new(vec![]).unwrap())
    }

    #[derive(Debug)]
    struct Restrict(ProtectionDomain);

    impl DomainCombiner for Restrict {
        fn combine(
            &self,
            current: &[ProtectionDomain],
            assigned: &[ProtectionDomain],
        ) -> Vec<ProtectionDomain> {
            let mut combined = current.to_vec();
            combined.extend_from_slice(assigned);
            combined.push(self.0.clone());
            combined
        }
    }

    #[test]
    fn it_requires_every_domain_to_hold_the_permission() -> TestResult {
        let read = domain(&[("/tmp/*", "read")]);
        let write = domain(&[("/tmp/*", "read,write")]);
        let context = AccessContext::new([read, write.clone()]);
        let policy = policy();

        let write_foo = FilePermission::new("/tmp/foo", "write")?.shared();
        let denied = context.check_permission(&write_foo, &policy);
        assert!(matches!(denied, Err(GatehouseAccessError::AccessDenied { .. })));

        AccessContext::new([write])
            .check_permission(&FilePermission::new("/tmp/foo", "write")?.shared(), &policy)?;
        Ok(())
    }

    #[test]
    fn it_allows_everything_in_the_system_context() -> TestResult {
        let context = AccessContext::new([]);

        assert!(context.is_system());
        let write_shadow = FilePermission::new("/etc/shadow", "write")?.shared();
        context.check_permission(&write_shadow, &policy())?;
        Ok(())
    }

    #[test]
    fn it_reports_the_denied_permission() -> TestResult {
        let context = AccessContext::new([domain(&[])]);
        let wanted = FilePermission::new("/tmp/foo", "read")?.shared();

        match context.check_permission(&wanted, &policy()) {
            Err(GatehouseAccessError::AccessDenied { permission }) => {
                assert!(permission.same_as(wanted.as_ref()));
            }
            other => panic!("expected a denial, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn it_deduplicates_domains() {
        let a = domain(&[]);
        let context = AccessContext::new([a.clone(), a.clone(), a]);

        assert_eq!(context.domains().len(), 1);
    }

    #[test]
    fn it_compares_contexts_as_sets() {
        let a = domain(&[]);
        let b = domain(&[]);

        assert_eq!(
            AccessContext::new([a.clone(), b.clone()]),
            AccessContext::new([b.clone(), a.clone(), b.clone()])
        );
        assert_ne!(AccessContext::new([a.clone()]), AccessContext::new([a, b]));
    }

    #[test]
    fn it_compares_combiners_by_identity() {
        let a = domain(&[]);
        let combiner: Arc<dyn DomainCombiner> = Arc::new(Restrict(domain(&[])));
        let other: Arc<dyn DomainCombiner> = Arc::new(Restrict(domain(&[])));

        let with = AccessContext::new([a.clone()]).with_combiner(combiner.clone());

        assert_eq!(with, AccessContext::new([a.clone()]).with_combiner(combiner));
        assert_ne!(with, AccessContext::new([a.clone()]).with_combiner(other));
        assert_ne!(with, AccessContext::new([a]));
    }

    #[test]
    fn it_merges_the_inherited_context() {
        let a = domain(&[]);
        let b = domain(&[]);
        let stack = AccessContext::captured(vec![a.clone()], false, None);
        let inherited = AccessContext::new([a.clone(), b.clone()]);

        assert_eq!(stack.optimize(Some(&inherited)), inherited);
        assert_eq!(
            AccessContext::captured(vec![b.clone()], false, None)
                .optimize(Some(&AccessContext::new([a.clone()]))),
            AccessContext::new([a, b])
        );
    }

    #[test]
    fn it_uses_the_narrowing_context_instead_of_the_inherited_one() {
        let a = domain(&[]);
        let narrowing = domain(&[]);
        let inherited = domain(&[]);
        let stack = AccessContext::captured(
            vec![a.clone()],
            true,
            Some(AccessContext::new([narrowing.clone()])),
        );

        let optimized = stack.optimize(Some(&AccessContext::new([inherited])));

        assert_eq!(optimized, AccessContext::new([a, narrowing]));
        assert!(!optimized.is_privileged());
    }

    #[test]
    fn it_lets_the_combiner_decide() {
        let a = domain(&[]);
        let b = domain(&[]);
        let restriction = domain(&[]);
        let combiner: Arc<dyn DomainCombiner> = Arc::new(Restrict(restriction.clone()));
        let inherited = AccessContext::new([b.clone()]).with_combiner(combiner.clone());

        let optimized =
            AccessContext::captured(vec![a.clone()], false, None).optimize(Some(&inherited));

        assert_eq!(optimized.domains(), &[a, b, restriction]);
        assert!(optimized.combiner().is_some_and(|c| Arc::ptr_eq(c, &combiner)));
    }

    #[test]
    fn it_applies_the_narrowing_combiner_to_limited_captures() -> TestResult {
        let read = FilePermission::new("/tmp/x", "read")?.shared();
        let trusted = domain(&[("/tmp/*", "read")]);
        let narrowed = domain(&[("/tmp/*", "read")]);
        let restriction = domain(&[]);
        let combiner: Arc<dyn DomainCombiner> = Arc::new(Restrict(restriction.clone()));
        let narrowing = AccessContext::new([narrowed.clone()]).with_combiner(combiner.clone());
        let policy = policy();

        let captured = AccessContext::limited(
            vec![trusted.clone()],
            Arc::from(vec![read.clone()]),
            Some(narrowing),
            AccessContext::system(),
        );
        captured.check_permission(&read, &policy)?;

        let optimized = captured.optimize(None);

        assert_eq!(optimized.domains(), &[trusted, narrowed, restriction]);
        assert!(optimized.is_privileged());
        assert!(optimized.combiner().is_some_and(|c| Arc::ptr_eq(c, &combiner)));
        assert!(optimized.check_permission(&read, &policy).is_err());
        Ok(())
    }
}
