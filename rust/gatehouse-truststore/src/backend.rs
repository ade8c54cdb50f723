use std::fmt::Debug;
use std::io::{Read, Write};

use gatehouse_common::Certificate;

use crate::{
    Entry, EntryAttributes, GatehouseTrustStoreError, PasswordProtection, PrivateKeyEntry,
    SecretKeyEntry, StoredKey, TrustedCertificateEntry,
};

/// A storage format for a [`TrustStore`](crate::TrustStore).
///
/// Backends implement the primitive key and certificate operations and
/// their own persistence. Whether the store has been loaded is tracked by
/// the [`TrustStore`](crate::TrustStore), so backends never see calls before
/// [`TrustStoreBackend::load`].
pub trait TrustStoreBackend: Debug + Send + Sync {
    /// Recover the key stored under `alias` with `password`.
    ///
    /// Returns `None` if `alias` does not name a key entry and
    /// [`GatehouseTrustStoreError::Unrecoverable`] if the password is wrong.
    fn key(
        &self,
        alias: &str,
        password: Option<&str>,
    ) -> Result<Option<StoredKey>, GatehouseTrustStoreError>;

    /// The chain of the private key entry `alias`, leaf first.
    fn certificate_chain(&self, alias: &str) -> Option<Vec<Certificate>>;

    /// The certificate of a trusted certificate entry, or the leaf of a
    /// private key entry.
    fn certificate(&self, alias: &str) -> Option<Certificate>;

    /// Attributes of the entry `alias`.
    fn attributes(&self, alias: &str) -> EntryAttributes;

    /// Store a key under `alias`, protected by `password`, replacing any
    /// existing entry.
    fn set_key_entry(
        &mut self,
        alias: &str,
        key: StoredKey,
        password: &str,
        chain: Vec<Certificate>,
        attributes: EntryAttributes,
    ) -> Result<(), GatehouseTrustStoreError>;

    /// Trust `certificate` under `alias`, replacing any existing entry.
    fn set_certificate_entry(
        &mut self,
        alias: &str,
        certificate: Certificate,
        attributes: EntryAttributes,
    ) -> Result<(), GatehouseTrustStoreError>;

    /// Remove the entry `alias`. Removing a missing entry is not an error.
    fn delete_entry(&mut self, alias: &str) -> Result<(), GatehouseTrustStoreError>;

    /// Every alias.
    fn aliases(&self) -> Vec<String>;

    /// Whether `alias` names an entry.
    fn contains_alias(&self, alias: &str) -> bool;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether `alias` names a key entry.
    fn is_key_entry(&self, alias: &str) -> bool;

    /// Whether `alias` names a trusted certificate entry.
    fn is_certificate_entry(&self, alias: &str) -> bool;

    /// The first alias whose certificate (see
    /// [`TrustStoreBackend::certificate`]) is `certificate`.
    fn certificate_alias(&self, certificate: &Certificate) -> Option<String> {
        self.aliases()
            .into_iter()
            .find(|alias| self.certificate(alias).as_ref() == Some(certificate))
    }

    /// Replace the contents with the store read from `input`, or start
    /// empty without one. A `password` is used to check integrity.
    fn load(
        &mut self,
        input: Option<&mut dyn Read>,
        password: Option<&str>,
    ) -> Result<(), GatehouseTrustStoreError>;

    /// Write the store to `output`, protecting its integrity with
    /// `password`.
    fn store(&self, output: &mut dyn Write, password: &str) -> Result<(), GatehouseTrustStoreError>;

    /// Read the entry `alias`.
    ///
    /// Trusted certificates are read without protection; asking for one
    /// with a password is an error. Key entries need a password.
    fn entry(
        &self,
        alias: &str,
        protection: Option<&PasswordProtection>,
    ) -> Result<Option<Entry>, GatehouseTrustStoreError> {
        if !self.contains_alias(alias) {
            return Ok(None);
        }

        if self.is_certificate_entry(alias) {
            if protection.is_some() {
                return Err(GatehouseTrustStoreError::InvalidProtection(
                    "trusted certificate entries are not password-protected".into(),
                ));
            }
            return Ok(self.certificate(alias).map(|certificate| {
                TrustedCertificateEntry::new(certificate)
                    .with_attributes(self.attributes(alias))
                    .into()
            }));
        }

        let Some(protection) = protection else {
            return Err(GatehouseTrustStoreError::Unrecoverable {
                alias: alias.to_owned(),
                reason: "requested entry requires a password".into(),
            });
        };
        let entry: Entry = match self.key(alias, protection.password())? {
            Some(StoredKey::Private(key)) => {
                let chain = self.certificate_chain(alias).unwrap_or_default();
                PrivateKeyEntry::new(key, chain)?
                    .with_attributes(self.attributes(alias))
                    .into()
            }
            Some(StoredKey::Secret(key)) => SecretKeyEntry::new(key)
                .with_attributes(self.attributes(alias))
                .into(),
            None => return Ok(None),
        };
        Ok(Some(entry))
    }

    /// Store `entry` under `alias`.
    ///
    /// Key entries need a password; trusted certificates must not have one.
    fn set_entry(
        &mut self,
        alias: &str,
        entry: Entry,
        protection: Option<&PasswordProtection>,
    ) -> Result<(), GatehouseTrustStoreError> {
        let password = protection.and_then(PasswordProtection::password);
        match entry {
            Entry::TrustedCertificate(entry) => {
                if password.is_some() {
                    return Err(GatehouseTrustStoreError::InvalidProtection(
                        "trusted certificate entries are not password-protected".into(),
                    ));
                }
                let attributes = entry.attributes().clone();
                self.set_certificate_entry(alias, entry.certificate().clone(), attributes)
            }
            Entry::PrivateKey(entry) => {
                let password = password.ok_or_else(|| {
                    GatehouseTrustStoreError::InvalidProtection(
                        "non-null password required to create a private key entry".into(),
                    )
                })?;
                let (key, chain, attributes) = entry.into_parts();
                self.set_key_entry(alias, StoredKey::Private(key), password, chain, attributes)
            }
            Entry::SecretKey(entry) => {
                let password = password.ok_or_else(|| {
                    GatehouseTrustStoreError::InvalidProtection(
                        "non-null password required to create a secret key entry".into(),
                    )
                })?;
                let attributes = entry.attributes().clone();
                self.set_key_entry(
                    alias,
                    StoredKey::Secret(entry.secret_key().clone()),
                    password,
                    Vec::new(),
                    attributes,
                )
            }
        }
    }
}
