use std::collections::BTreeMap;
use std::sync::Arc;

use gatehouse_access::{
    AccessController, GrantEntry, GrantPolicy, PermissionEntry, PolicyHandle, ProtectionDomain,
    stack,
};
use gatehouse_common::{Certificate, CodeSource, KeyMaterial, PrivateKey, PublicKey, SecretKey};
use gatehouse_permission::{BasicPermission, Permission};
use gatehouse_registry::{Provider, Registry};
use gatehouse_truststore::{
    Entry, GatehouseTrustStoreError, MEMORY_TRUSTSTORE, MemoryTrustStore, PrivateKeyEntry,
    ProtectionParameter, SecretKeyEntry, TRUSTSTORE_PERMISSION, TrustStore,
    TrustedCertificateEntry,
};
use pretty_assertions::assert_eq;
use testresult::TestResult;

fn registry() -> Registry {
    let provider = Provider::new("Gatehouse", "1.0", "built-in trust stores");
    MemoryTrustStore::register(&provider);
    Registry::with_providers([provider])
}

fn certificate(subject: &str) -> Certificate {
    Certificate::self_signed(subject, PublicKey::new("RSA", subject.as_bytes().to_vec()))
}

#[test]
fn it_refuses_to_read_entries_before_load() -> TestResult {
    let store = TrustStore::from_registry(MEMORY_TRUSTSTORE, &registry())?;

    let result = store.entry("alias1", Some(&ProtectionParameter::password("changeit")));

    assert!(matches!(result, Err(GatehouseTrustStoreError::Uninitialized)));
    assert_eq!(
        result.err().map(|error| error.to_string()),
        Some("Trust store has not been loaded".to_owned())
    );
    Ok(())
}

#[test]
fn it_reports_unknown_store_types() {
    assert!(matches!(
        TrustStore::from_registry("PKCS12", &registry()),
        Err(GatehouseTrustStoreError::Registry(_))
    ));
}

#[test_log::test]
fn it_round_trips_through_persistence() -> TestResult {
    let registry = registry();
    let store = TrustStore::from_registry(MEMORY_TRUSTSTORE, &registry)?;
    store.load(None, None)?;

    let password = ProtectionParameter::password("changeit");
    let signing = PrivateKeyEntry::new(
        PrivateKey::from(KeyMaterial::new("RSA", Some("PKCS#8"), vec![3u8; 64])),
        vec![certificate("server"), certificate("intermediate")],
    )?
    .with_attributes(BTreeMap::from([("friendlyName".to_owned(), "server".to_owned())]));
    store.set_entry("server", signing.clone(), Some(&password))?;
    let session = SecretKeyEntry::new(SecretKey::new("AES", vec![5u8; 32]));
    store.set_entry("session", session, Some(&password))?;
    store.set_entry("ca", TrustedCertificateEntry::new(certificate("ca")), None)?;

    let mut persisted = Vec::new();
    store.store(&mut persisted, "store secret")?;

    let reloaded = TrustStore::from_registry(MEMORY_TRUSTSTORE, &registry)?;
    reloaded.load(Some(&mut persisted.as_slice()), Some("store secret"))?;

    assert_eq!(reloaded.len()?, 3);
    assert_eq!(reloaded.entry("server", Some(&password))?, Some(Entry::PrivateKey(signing)));
    assert_eq!(reloaded.certificate_alias(&certificate("server"))?, Some("server".to_owned()));
    assert!(matches!(
        reloaded.entry("server", Some(&ProtectionParameter::password("wrong"))),
        Err(GatehouseTrustStoreError::Unrecoverable { .. })
    ));

    reloaded.delete_entry("session")?;
    assert!(!reloaded.contains_alias("session")?);
    Ok(())
}

#[test]
fn it_guards_mutations_with_the_installed_policy() -> TestResult {
    let controller = AccessController::new(PolicyHandle::new(GrantPolicy::new(vec![])?));
    let store = TrustStore::new(MEMORY_TRUSTSTORE, MemoryTrustStore::new()).with_guard(controller);
    store.load(None, None)?;

    let may_set = ProtectionDomain::new(
        None,
        Some(
            [BasicPermission::new(TRUSTSTORE_PERMISSION, "setEntry")?.shared()]
                .into_iter()
                .collect(),
        ),
    );
    let may_nothing = ProtectionDomain::new(None, None);

    stack::run_as(may_set, || {
        store.set_entry("ca", TrustedCertificateEntry::new(certificate("ca")), None)
    })?;
    let denied = stack::run_as(may_nothing, || store.delete_entry("ca"));

    assert!(matches!(denied, Err(GatehouseTrustStoreError::Access(_))));
    assert!(store.contains_alias("ca")?);
    Ok(())
}

#[test]
fn it_supplies_signer_certificates_to_grant_policies() -> TestResult {
    let store = Arc::new(TrustStore::new(MEMORY_TRUSTSTORE, MemoryTrustStore::new()));
    store.load(None, None)?;
    let vendor = certificate("vendor");
    store.set_entry("vendor", TrustedCertificateEntry::new(vendor.clone()), None)?;

    let policy = GrantPolicy::builder(vec![GrantEntry {
        signed_by: vec!["vendor".to_owned()],
        permissions: vec![PermissionEntry::new("RuntimePermission", "exitVM")],
        ..Default::default()
    }])
    .certificates(store)
    .build()?;
    let handle = PolicyHandle::new(policy);

    let signed = ProtectionDomain::with_policy(
        Some(CodeSource::new(None, vec![vendor])),
        None,
        vec![],
        None,
    );
    let unsigned =
        ProtectionDomain::with_policy(Some(CodeSource::new(None, vec![])), None, vec![], None);
    let exit = BasicPermission::runtime("exitVM")?;

    assert!(handle.implies(&signed, &exit));
    assert!(!handle.implies(&unsigned, &exit));
    Ok(())
}
