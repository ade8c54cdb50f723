use std::io::{Read, Write};

use gatehouse_access::{AccessController, CertificateSource, GatehouseAccessError};
use gatehouse_common::Certificate;
use gatehouse_permission::{BasicPermission, Permission};
use gatehouse_registry::Registry;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    Entry, GatehouseTrustStoreError, ProtectionParameter, StoredKey, TRUSTSTORE_SERVICE,
    TrustStoreBackend,
};

/// Kind of the permissions guarding trust store operations. Names are the
/// operations: `load`, `store`, `setEntry` and `deleteEntry`.
pub const TRUSTSTORE_PERMISSION: &str = "TrustStorePermission";

struct State {
    backend: Box<dyn TrustStoreBackend>,
    loaded: bool,
}

/// A keyed collection of private keys, secret keys and trusted
/// certificates.
///
/// Every operation fails with [`GatehouseTrustStoreError::Uninitialized`]
/// until the store has been [loaded](TrustStore::load). With a guard
/// attached, loading, storing and mutating the store also require a
/// [`TRUSTSTORE_PERMISSION`] named after the operation.
pub struct TrustStore {
    store_type: String,
    state: RwLock<State>,
    guard: Option<AccessController>,
}

impl TrustStore {
    /// A store of `store_type` kept by `backend`.
    pub fn new(store_type: impl Into<String>, backend: impl TrustStoreBackend + 'static) -> Self {
        Self::with_backend(store_type, Box::new(backend))
    }

    fn with_backend(store_type: impl Into<String>, backend: Box<dyn TrustStoreBackend>) -> Self {
        Self {
            store_type: store_type.into(),
            state: RwLock::new(State {
                backend,
                loaded: false,
            }),
            guard: None,
        }
    }

    /// A store whose backend is the `store_type` algorithm of the most
    /// preferred provider in `registry` offering it.
    pub fn from_registry(
        store_type: &str,
        registry: &Registry,
    ) -> Result<Self, GatehouseTrustStoreError> {
        let backend =
            registry.instance_of::<Box<dyn TrustStoreBackend>>(TRUSTSTORE_SERVICE, store_type)?;
        Ok(Self::with_backend(store_type, *backend))
    }

    /// Check a [`TRUSTSTORE_PERMISSION`] with `controller` before loading,
    /// storing and every mutation.
    pub fn with_guard(mut self, controller: AccessController) -> Self {
        self.guard = Some(controller);
        self
    }

    /// The type of this store.
    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    fn check(&self, operation: &str) -> Result<(), GatehouseTrustStoreError> {
        let Some(controller) = &self.guard else {
            return Ok(());
        };
        let permission = BasicPermission::new(TRUSTSTORE_PERMISSION, operation)
            .map_err(GatehouseAccessError::from)?
            .shared();
        controller.check_permission(&permission)?;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, GatehouseTrustStoreError> {
        let state = self.state.read();
        if !state.loaded {
            return Err(GatehouseTrustStoreError::Uninitialized);
        }
        Ok(state)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, GatehouseTrustStoreError> {
        let state = self.state.write();
        if !state.loaded {
            return Err(GatehouseTrustStoreError::Uninitialized);
        }
        Ok(state)
    }

    /// Load the store from `input`, or initialize it empty without one.
    /// With a `password`, the integrity of `input` is checked.
    pub fn load(
        &self,
        input: Option<&mut dyn Read>,
        password: Option<&str>,
    ) -> Result<(), GatehouseTrustStoreError> {
        self.check("load")?;
        let mut state = self.state.write();
        state.backend.load(input, password)?;
        state.loaded = true;
        Ok(())
    }

    /// Persist the store to `output`, protecting its integrity with
    /// `password`.
    pub fn store(
        &self,
        output: &mut dyn Write,
        password: &str,
    ) -> Result<(), GatehouseTrustStoreError> {
        self.check("store")?;
        self.read()?.backend.store(output, password)
    }

    /// Read the entry `alias`. Key entries need a `protection`; trusted
    /// certificates must be read without one.
    pub fn entry(
        &self,
        alias: &str,
        protection: Option<&ProtectionParameter>,
    ) -> Result<Option<Entry>, GatehouseTrustStoreError> {
        let state = self.read()?;
        let protection = protection.map(|protection| protection.for_alias(alias));
        state.backend.entry(alias, protection.as_ref())
    }

    /// Store `entry` under `alias`. Key entries need a password; trusted
    /// certificates must not have one.
    pub fn set_entry(
        &self,
        alias: &str,
        entry: impl Into<Entry>,
        protection: Option<&ProtectionParameter>,
    ) -> Result<(), GatehouseTrustStoreError> {
        self.check("setEntry")?;
        let mut state = self.write()?;
        let protection = protection.map(|protection| protection.for_alias(alias));
        state.backend.set_entry(alias, entry.into(), protection.as_ref())?;
        tracing::debug!(store = %self.store_type, %alias, "set trust store entry");
        Ok(())
    }

    /// Remove the entry `alias`.
    pub fn delete_entry(&self, alias: &str) -> Result<(), GatehouseTrustStoreError> {
        self.check("deleteEntry")?;
        self.write()?.backend.delete_entry(alias)?;
        tracing::debug!(store = %self.store_type, %alias, "deleted trust store entry");
        Ok(())
    }

    /// Recover the key stored under `alias` with `password`.
    pub fn key(
        &self,
        alias: &str,
        password: Option<&str>,
    ) -> Result<Option<StoredKey>, GatehouseTrustStoreError> {
        self.read()?.backend.key(alias, password)
    }

    /// Every alias.
    pub fn aliases(&self) -> Result<Vec<String>, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.aliases())
    }

    /// Whether `alias` names an entry.
    pub fn contains_alias(&self, alias: &str) -> Result<bool, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.contains_alias(alias))
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.len())
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> Result<bool, GatehouseTrustStoreError> {
        Ok(self.len()? == 0)
    }

    /// The certificate of a trusted certificate entry, or the leaf of a
    /// private key entry.
    pub fn certificate(
        &self,
        alias: &str,
    ) -> Result<Option<Certificate>, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.certificate(alias))
    }

    /// The certificate chain of a private key entry, leaf first.
    pub fn certificate_chain(
        &self,
        alias: &str,
    ) -> Result<Option<Vec<Certificate>>, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.certificate_chain(alias))
    }

    /// The first alias whose certificate is `certificate`.
    pub fn certificate_alias(
        &self,
        certificate: &Certificate,
    ) -> Result<Option<String>, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.certificate_alias(certificate))
    }

    /// Whether `alias` names a key entry.
    pub fn is_key_entry(&self, alias: &str) -> Result<bool, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.is_key_entry(alias))
    }

    /// Whether `alias` names a trusted certificate entry.
    pub fn is_certificate_entry(&self, alias: &str) -> Result<bool, GatehouseTrustStoreError> {
        Ok(self.read()?.backend.is_certificate_entry(alias))
    }
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("TrustStore")
            .field("store_type", &self.store_type)
            .field("backend", &state.backend)
            .field("loaded", &state.loaded)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

impl CertificateSource for TrustStore {
    fn certificate(&self, alias: &str) -> Option<Certificate> {
        match TrustStore::certificate(self, alias) {
            Ok(certificate) => certificate,
            Err(error) => {
                tracing::warn!(store = %self.store_type, %alias, %error, "cannot read certificate");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryTrustStore, PrivateKeyEntry, TrustedCertificateEntry};
    use gatehouse_common::{KeyMaterial, PrivateKey, PublicKey};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn certificate(subject: &str) -> Certificate {
        Certificate::self_signed(subject, PublicKey::new("Ed25519", subject.as_bytes().to_vec()))
    }

    fn loaded() -> Result<TrustStore, GatehouseTrustStoreError> {
        let store = TrustStore::new("memory", MemoryTrustStore::new());
        store.load(None, None)?;
        Ok(store)
    }

    #[test]
    fn it_refuses_every_operation_before_load() {
        let store = TrustStore::new("memory", MemoryTrustStore::new());

        assert!(matches!(store.aliases(), Err(GatehouseTrustStoreError::Uninitialized)));
        assert!(matches!(store.len(), Err(GatehouseTrustStoreError::Uninitialized)));
        assert!(matches!(
            store.delete_entry("anything"),
            Err(GatehouseTrustStoreError::Uninitialized)
        ));
        assert!(matches!(
            store.set_entry("root", TrustedCertificateEntry::new(certificate("root")), None),
            Err(GatehouseTrustStoreError::Uninitialized)
        ));
    }

    #[test]
    fn it_asks_callbacks_for_entry_passwords() -> TestResult {
        let store = loaded()?;
        let key = PrivateKey::from(KeyMaterial::new("Ed25519", Some("PKCS#8"), vec![4u8; 32]));
        let entry = PrivateKeyEntry::new(key, vec![certificate("me")])?;
        store.set_entry("me", entry.clone(), Some(&ProtectionParameter::password("open sesame")))?;

        let callback = ProtectionParameter::callback(|alias: &str| {
            (alias == "me").then(|| "open sesame".to_owned())
        });
        assert_eq!(store.entry("me", Some(&callback))?, Some(Entry::PrivateKey(entry)));
        Ok(())
    }

    #[test]
    fn it_resolves_grant_signers_through_certificate_entries() -> TestResult {
        let store = loaded()?;
        let root = certificate("root");
        store.set_entry("root", TrustedCertificateEntry::new(root.clone()), None)?;

        let source: &dyn CertificateSource = &store;
        assert_eq!(source.certificate("root"), Some(root));
        assert_eq!(source.certificate("missing"), None);
        assert_eq!(store.len()?, 1);
        assert!(store.contains_alias("root")?);
        Ok(())
    }
}
