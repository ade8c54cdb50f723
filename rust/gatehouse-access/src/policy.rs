use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use gatehouse_common::CodeSource;
use gatehouse_permission::{AllPermission, Permission, Permissions};
use parking_lot::{Mutex, RwLock};

use crate::{DomainKey, GatehouseAccessError, ProtectionDomain, domain::WeakDomain};

/// Decides which permissions a domain holds.
pub trait Policy: Debug + Send + Sync {
    /// Permissions granted to code from `code_source`, regardless of who it
    /// runs for.
    fn permissions_for_source(
        &self,
        code_source: Option<&CodeSource>,
    ) -> Result<Permissions, GatehouseAccessError>;

    /// Every permission `domain` holds: what the policy grants its code
    /// source (and principals, for policies that understand them) together
    /// with the permissions bound to the domain itself.
    fn permissions(&self, domain: &ProtectionDomain) -> Result<Permissions, GatehouseAccessError> {
        let mut permissions = self.permissions_for_source(domain.code_source())?;
        if let Some(bound) = domain.permissions() {
            permissions.add_all(bound)?;
        }
        Ok(permissions)
    }

    /// Whether `domain` holds `permission`. Uncached.
    fn implies(&self, domain: &ProtectionDomain, permission: &dyn Permission) -> bool {
        self.permissions(domain)
            .is_ok_and(|permissions| permissions.implies(permission))
    }

    /// Reload the backing policy data.
    fn refresh(&self) -> Result<(), GatehouseAccessError> {
        Ok(())
    }

    /// The domain of the policy implementation itself, if it runs in one.
    fn domain(&self) -> Option<ProtectionDomain> {
        None
    }
}

/// Cache size below which entries of dropped domains are left in place.
const SWEEP_THRESHOLD: usize = 32;

struct CacheEntry {
    domain: WeakDomain,
    permissions: Arc<Permissions>,
}

struct InstalledPolicy {
    policy: Arc<dyn Policy>,
    cache: DashMap<DomainKey, CacheEntry>,
    generation: AtomicU64,
    swept_len: AtomicUsize,
    bootstrap: Option<(DomainKey, WeakDomain, Arc<Permissions>)>,
}

impl InstalledPolicy {
    fn permissions(
        &self,
        domain: &ProtectionDomain,
    ) -> Result<Arc<Permissions>, GatehouseAccessError> {
        if let Some(entry) = self.cache.get(&domain.key()) {
            return Ok(entry.permissions.clone());
        }

        tracing::trace!(%domain, "policy cache miss");
        let generation = self.generation.load(Ordering::Acquire);
        let permissions = Arc::new(self.policy.permissions(domain)?);

        self.sweep();
        self.cache.insert(
            domain.key(),
            CacheEntry {
                domain: domain.downgrade(),
                permissions: permissions.clone(),
            },
        );
        if self.generation.load(Ordering::Acquire) != generation {
            self.cache.remove(&domain.key());
        }

        Ok(permissions)
    }

    /// Drop entries of dead domains once the cache has doubled since the
    /// last sweep.
    fn sweep(&self) {
        let len = self.cache.len();
        let swept_len = self.swept_len.load(Ordering::Relaxed);
        if len < SWEEP_THRESHOLD.max(swept_len * 2) {
            return;
        }
        self.cache.retain(|_, entry| entry.domain.is_alive());
        self.swept_len.store(self.cache.len(), Ordering::Relaxed);
        tracing::trace!(before = len, after = self.cache.len(), "swept policy cache");
    }

    fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        self.swept_len.store(0, Ordering::Relaxed);
        if let Some((key, domain, permissions)) = &self.bootstrap {
            self.cache.insert(
                *key,
                CacheEntry {
                    domain: domain.clone(),
                    permissions: permissions.clone(),
                },
            );
        }
    }
}

/// The installed [`Policy`] together with its per-domain cache.
///
/// The permissions of a domain are computed once and reused until the policy
/// is refreshed or replaced. Entries are keyed by [`DomainKey`] and do not
/// keep their domain alive; entries for dropped domains are swept on a
/// miss once the cache has grown enough.
///
/// Handles are cheap to clone and all clones share the installed policy.
#[derive(Clone)]
pub struct PolicyHandle {
    installed: Arc<RwLock<Arc<InstalledPolicy>>>,
    replacing: Arc<Mutex<()>>,
}

impl PolicyHandle {
    /// Install `policy`. Its own domain, if it has one, is fully trusted.
    pub fn new(policy: impl Policy + 'static) -> Self {
        let policy: Arc<dyn Policy> = Arc::new(policy);
        Self {
            installed: Arc::new(RwLock::new(Arc::new(install(policy, None)))),
            replacing: Arc::new(Mutex::new(())),
        }
    }

    /// The installed policy.
    pub fn policy(&self) -> Arc<dyn Policy> {
        self.installed.read().policy.clone()
    }

    /// Replace the installed policy and drop every cached decision.
    ///
    /// The permissions of the new policy's own domain are computed by the
    /// policy being replaced, before the swap, so that checks made while the
    /// new policy evaluates other domains do not recurse into it.
    pub fn set_policy(&self, policy: impl Policy + 'static) {
        self.set_shared_policy(Arc::new(policy));
    }

    /// [`PolicyHandle::set_policy`] for an already shared policy.
    ///
    /// Concurrent replacements are serialized, so each new policy is
    /// bootstrapped from the one it replaces.
    pub fn set_shared_policy(&self, policy: Arc<dyn Policy>) {
        let _replacing = self.replacing.lock();
        let previous = self.installed.read().clone();
        let next = install(policy, Some(&previous));
        *self.installed.write() = Arc::new(next);
        tracing::debug!(policy = ?self.policy(), "installed policy");
    }

    /// The permissions `domain` holds, from the cache when possible.
    pub fn permissions(
        &self,
        domain: &ProtectionDomain,
    ) -> Result<Arc<Permissions>, GatehouseAccessError> {
        let installed = self.installed.read().clone();
        installed.permissions(domain)
    }

    /// Whether `domain` holds `permission`. A domain whose permissions cannot
    /// be computed holds nothing.
    pub fn implies(&self, domain: &ProtectionDomain, permission: &dyn Permission) -> bool {
        match self.permissions(domain) {
            Ok(permissions) => permissions.implies(permission),
            Err(error) => {
                tracing::warn!(%domain, %error, "failed to compute domain permissions");
                false
            }
        }
    }

    /// Reload the installed policy and drop every cached decision.
    ///
    /// The cache is cleared even when the reload fails.
    pub fn refresh(&self) -> Result<(), GatehouseAccessError> {
        let installed = self.installed.read().clone();
        let result = installed.policy.refresh();
        installed.clear();
        tracing::debug!(ok = result.is_ok(), "refreshed policy");
        result
    }

    /// Number of domains with cached permissions.
    pub fn cached_domains(&self) -> usize {
        self.installed.read().cache.len()
    }
}

impl Debug for PolicyHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let installed = self.installed.read();
        f.debug_struct("PolicyHandle")
            .field("policy", &installed.policy)
            .field("cached_domains", &installed.cache.len())
            .finish()
    }
}

fn install(policy: Arc<dyn Policy>, previous: Option<&InstalledPolicy>) -> InstalledPolicy {
    let bootstrap = policy.domain().map(|domain| {
        let permissions = match previous.map(|previous| previous.permissions(&domain)) {
            Some(Ok(permissions)) => permissions,
            Some(Err(error)) => {
                tracing::warn!(%domain, %error, "falling back to full trust for policy domain");
                full_trust()
            }
            None => full_trust(),
        };
        (domain.key(), domain.downgrade(), permissions)
    });

    let installed = InstalledPolicy {
        policy,
        cache: DashMap::new(),
        generation: AtomicU64::new(0),
        swept_len: AtomicUsize::new(0),
        bootstrap,
    };
    installed.clear();
    installed
}

fn full_trust() -> Arc<Permissions> {
    let mut permissions: Permissions = [AllPermission.shared()].into_iter().collect();
    permissions.set_read_only();
    Arc::new(permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_permission::{BasicPermission, FilePermission};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    /// Grants whatever is currently in `granted` to every code source.
    #[derive(Debug, Default)]
    struct Mutable {
        granted: Mutex<Vec<String>>,
        calls: AtomicU64,
        domain: Option<ProtectionDomain>,
        fail: bool,
    }

    impl Policy for Mutable {
        fn permissions_for_source(
            &self,
            _code_source: Option<&CodeSource>,
        ) -> Result<Permissions, GatehouseAccessError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(GatehouseAccessError::PolicySource("unavailable".into()));
            }
            let mut permissions = Permissions::new();
            for name in self.granted.lock().iter() {
                permissions.add(BasicPermission::runtime(name.as_str())?.shared())?;
            }
            Ok(permissions)
        }

        fn domain(&self) -> Option<ProtectionDomain> {
            self.domain.clone()
        }
    }

    fn dynamic_domain() -> ProtectionDomain {
        ProtectionDomain::with_policy(None, None, vec![], None)
    }

    #[test]
    fn it_serves_repeated_lookups_from_the_cache() -> TestResult {
        let policy = Arc::new(Mutable::default());
        policy.granted.lock().push("a".into());
        let handle = PolicyHandle::new(ArcPolicy(policy.clone()));
        let domain = dynamic_domain();

        let first = handle.permissions(&domain)?;
        policy.granted.lock().push("b".into());
        let second = handle.permissions(&domain)?;

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.implies(&BasicPermission::runtime("b")?));
        assert_eq!(policy.calls.load(Ordering::Relaxed), 1);

        handle.refresh()?;
        assert!(handle.permissions(&domain)?.implies(&BasicPermission::runtime("b")?));
        Ok(())
    }

    #[test]
    fn it_sweeps_entries_of_dropped_domains() -> TestResult {
        let policy = Arc::new(Mutable::default());
        let handle = PolicyHandle::new(ArcPolicy(policy.clone()));
        let kept = dynamic_domain();
        handle.permissions(&kept)?;

        for _ in 0..SWEEP_THRESHOLD * 4 {
            handle.permissions(&dynamic_domain())?;
        }
        assert!(handle.cached_domains() <= SWEEP_THRESHOLD);

        let calls = policy.calls.load(Ordering::Relaxed);
        handle.permissions(&kept)?;
        assert_eq!(policy.calls.load(Ordering::Relaxed), calls);
        Ok(())
    }

    #[test]
    fn it_bootstraps_each_replacement_from_the_policy_it_replaces() -> TestResult {
        let first = Arc::new(Mutable::default());
        let handle = PolicyHandle::new(ArcPolicy(first.clone()));
        let replacements: Vec<Arc<Mutable>> = (0..8)
            .map(|_| {
                Arc::new(Mutable {
                    domain: Some(dynamic_domain()),
                    ..Default::default()
                })
            })
            .collect();

        let threads: Vec<_> = replacements
            .iter()
            .map(|policy| {
                let handle = handle.clone();
                let policy = policy.clone();
                std::thread::spawn(move || handle.set_policy(ArcPolicy(policy)))
            })
            .collect();
        for thread in threads {
            thread.join().map_err(|_| "thread panicked")?;
        }

        let calls: Vec<u64> = std::iter::once(&first)
            .chain(&replacements)
            .map(|policy| policy.calls.load(Ordering::Relaxed))
            .collect();
        assert!(calls.iter().all(|calls| *calls <= 1), "{calls:?}");
        assert_eq!(calls.iter().sum::<u64>(), replacements.len() as u64);
        Ok(())
    }

    #[test]
    fn it_fully_trusts_the_first_policy_domain() -> TestResult {
        let own = dynamic_domain();
        let handle = PolicyHandle::new(Mutable {
            domain: Some(own.clone()),
            ..Default::default()
        });

        assert!(handle.implies(&own, &FilePermission::new("/etc/shadow", "write")?));
        assert!(!handle.implies(&dynamic_domain(), &FilePermission::new("/etc/shadow", "write")?));
        Ok(())
    }

    #[test]
    fn it_bootstraps_a_new_policy_from_the_previous_one() -> TestResult {
        let previous = Mutable::default();
        previous.granted.lock().push("getProtectionDomain".into());
        let handle = PolicyHandle::new(previous);

        let own = dynamic_domain();
        handle.set_policy(Mutable {
            domain: Some(own.clone()),
            fail: true,
            ..Default::default()
        });

        assert!(handle.implies(&own, &BasicPermission::runtime("getProtectionDomain")?));
        assert!(!handle.implies(&own, &BasicPermission::runtime("exitVM")?));

        handle.refresh()?;
        assert!(handle.implies(&own, &BasicPermission::runtime("getProtectionDomain")?));
        Ok(())
    }

    #[test_log::test]
    fn it_denies_domains_whose_permissions_cannot_be_computed() -> TestResult {
        let handle = PolicyHandle::new(Mutable {
            fail: true,
            ..Default::default()
        });

        assert!(!handle.implies(&dynamic_domain(), &BasicPermission::runtime("a")?));
        assert_eq!(handle.cached_domains(), 0);
        Ok(())
    }

    #[derive(Debug)]
    struct ArcPolicy(Arc<Mutable>);

    impl Policy for ArcPolicy {
        fn permissions_for_source(
            &self,
            code_source: Option<&CodeSource>,
        ) -> Result<Permissions, GatehouseAccessError> {
            self.0.permissions_for_source(code_source)
        }

        fn domain(&self) -> Option<ProtectionDomain> {
            self.0.domain()
        }
    }
}
