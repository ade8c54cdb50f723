use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use gatehouse_access::{
    AccessContext, AccessController, DomainCombiner, GatehouseAccessError, GrantEntry, GrantPolicy,
    PermissionEntry, PolicyHandle, ProtectionDomain, stack,
};
use gatehouse_common::CodeSource;
use gatehouse_permission::{FilePermission, Permission, Permissions, SharedPermission};
use parking_lot::RwLock;
use pretty_assertions::assert_eq;
use testresult::TestResult;

fn controller() -> AccessController {
    AccessController::new(PolicyHandle::new(GrantPolicy::new(vec![]).unwrap()))
}

fn file(path: &str, actions: &str) -> SharedPermission {
    FilePermission::new(path, actions).unwrap().shared()
}

fn domain(grants: &[SharedPermission]) -> ProtectionDomain {
    ProtectionDomain::new(None, Some(grants.iter().cloned().collect::<Permissions>()))
}

#[test_log::test]
fn it_denies_unless_every_domain_agrees() -> TestResult {
    let controller = controller();
    let read = file("/tmp/report", "read");
    let a = domain(&[file("/tmp/*", "read")]);
    let b = domain(&[file("/tmp/-", "read")]);
    let c = domain(&[file("/var/*", "read")]);

    let two_of_three = stack::run_as(c.clone(), || {
        stack::run_as(b.clone(), || {
            stack::run_as(a.clone(), || controller.check_permission(&read))
        })
    });
    assert!(matches!(two_of_three, Err(GatehouseAccessError::AccessDenied { .. })));

    let all = AccessContext::new([a, b]);
    controller.check_permission_in(&all, &read)?;
    Ok(())
}

#[test]
fn it_allows_anything_for_the_system_context() -> TestResult {
    let controller = controller();

    for permission in [file("/etc/shadow", "write"), file("<<ALL FILES>>", "execute")] {
        controller.check_permission_in(&AccessContext::system(), &permission)?;
    }
    Ok(())
}

#[test]
fn it_does_not_consult_callers_past_a_privileged_frame() -> TestResult {
    let controller = controller();
    let read = file("/tmp/report", "read");
    let a = domain(&[read.clone()]);
    let b = domain(&[read.clone()]);
    let c = domain(&[]);

    let allowed = stack::run_as(c.clone(), || {
        stack::run_as(b, || {
            AccessController::run_privileged(|| {
                stack::run_as(a.clone(), || controller.check_permission(&read))
            })
        })
    });
    assert!(allowed.is_ok());

    let unprivileged_caller = domain(&[]);
    let denied = stack::run_as(c, || {
        stack::run_as(unprivileged_caller, || {
            AccessController::run_privileged(|| {
                stack::run_as(a, || controller.check_permission(&read))
            })
        })
    });
    assert!(denied.is_err());
    Ok(())
}

#[test]
fn it_denies_writes_granted_to_only_one_origin() -> TestResult {
    let controller = controller();
    let origin_a = ProtectionDomain::new(
        Some(CodeSource::parse("https://a.example.com/app.wasm", vec![])?),
        Some([file("/tmp/*", "read")].into_iter().collect()),
    );
    let origin_b = ProtectionDomain::new(
        Some(CodeSource::parse("https://b.example.com/app.wasm", vec![])?),
        Some([file("/tmp/*", "read"), file("/tmp/*", "write")].into_iter().collect()),
    );
    let context = AccessContext::new([origin_a, origin_b]);

    let result = controller.check_permission_in(&context, &file("/tmp/foo", "write"));

    match result {
        Err(GatehouseAccessError::AccessDenied { permission }) => {
            assert_eq!(permission.to_string(), "(\"FilePermission\" \"/tmp/foo\" \"write\")");
        }
        other => panic!("expected a denial, got {other:?}"),
    }
    Ok(())
}

#[test]
fn it_keeps_cached_permissions_until_refresh() -> TestResult {
    let source = Arc::new(RwLock::new(vec![GrantEntry {
        code_base: Some("https://cdn.example.com/-".into()),
        permissions: vec![PermissionEntry::new("FilePermission", "/data/-").with_actions("read")],
        ..Default::default()
    }]));
    let policy = PolicyHandle::new(GrantPolicy::new(source.clone())?);
    let controller = AccessController::new(policy.clone());
    let domain = ProtectionDomain::with_policy(
        Some(CodeSource::parse("https://cdn.example.com/lib/app.wasm", vec![])?),
        None,
        vec![],
        None,
    );
    let write = file("/data/index", "write");

    let before = policy.permissions(&domain)?;
    source.write()[0].permissions[0].actions = Some("read,write".into());
    let cached = policy.permissions(&domain)?;

    assert!(Arc::ptr_eq(&before, &cached));
    assert!(!cached.implies(write.as_ref()));
    assert!(!stack::run_as(domain.clone(), || controller.is_permitted(&write)));

    policy.refresh()?;

    assert!(policy.permissions(&domain)?.implies(write.as_ref()));
    assert!(stack::run_as(domain, || controller.is_permitted(&write)));
    Ok(())
}

#[derive(Debug, Default)]
struct Sandbox {
    restriction: Option<ProtectionDomain>,
    calls: AtomicUsize,
}

impl DomainCombiner for Sandbox {
    fn combine(
        &self,
        current: &[ProtectionDomain],
        assigned: &[ProtectionDomain],
    ) -> Vec<ProtectionDomain> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        current
            .iter()
            .chain(assigned)
            .chain(&self.restriction)
            .cloned()
            .collect()
    }
}

#[test]
fn it_lets_an_assigned_combiner_restrict_privileged_code() -> TestResult {
    let controller = controller();
    let read = file("/tmp/report", "read");
    let trusted = domain(&[read.clone()]);
    let sandbox = Arc::new(Sandbox {
        restriction: Some(domain(&[])),
        calls: AtomicUsize::new(0),
    });
    let assigned = AccessContext::new([trusted.clone()]).with_combiner(sandbox.clone());

    let result = stack::run_as(trusted, || {
        AccessController::run_privileged_with(&assigned, || controller.check_permission(&read))
    });

    assert!(result.is_err());
    assert_eq!(sandbox.calls.load(Ordering::Relaxed), 1);
    Ok(())
}
