use std::collections::BTreeMap;

use gatehouse_common::{Certificate, Key, PrivateKey, SecretKey};
use serde::{Deserialize, Serialize};

use crate::GatehouseTrustStoreError;

/// Named string attributes attached to an entry.
pub type EntryAttributes = BTreeMap<String, String>;

/// A private key together with the certificate chain for its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyEntry {
    private_key: PrivateKey,
    chain: Vec<Certificate>,
    attributes: EntryAttributes,
}

impl PrivateKeyEntry {
    /// Pair `private_key` with `chain`, leaf first.
    ///
    /// The chain must not be empty, every certificate in it must be of the
    /// same type, and the leaf must certify a public key of the private
    /// key's algorithm.
    pub fn new(
        private_key: PrivateKey,
        chain: Vec<Certificate>,
    ) -> Result<Self, GatehouseTrustStoreError> {
        let Some(leaf) = chain.first() else {
            return Err(GatehouseTrustStoreError::InvalidConfiguration(
                "invalid zero-length input chain".into(),
            ));
        };
        if chain
            .iter()
            .any(|certificate| certificate.certificate_type() != leaf.certificate_type())
        {
            return Err(GatehouseTrustStoreError::InvalidConfiguration(
                "chain does not contain certificates of the same type".into(),
            ));
        }
        if leaf.public_key().algorithm() != private_key.algorithm() {
            return Err(GatehouseTrustStoreError::InvalidConfiguration(format!(
                "private key algorithm {} does not match algorithm {} of public key in end entity certificate (at index 0)",
                private_key.algorithm(),
                leaf.public_key().algorithm()
            )));
        }

        Ok(Self {
            private_key,
            chain,
            attributes: EntryAttributes::new(),
        })
    }

    /// Replace the attributes of this entry.
    pub fn with_attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// The private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// The certificate chain, leaf first.
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// The leaf certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    /// Attributes of this entry.
    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }

    pub(crate) fn into_parts(self) -> (PrivateKey, Vec<Certificate>, EntryAttributes) {
        (self.private_key, self.chain, self.attributes)
    }
}

/// A symmetric key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyEntry {
    secret_key: SecretKey,
    attributes: EntryAttributes,
}

impl SecretKeyEntry {
    /// Wrap `secret_key`.
    pub fn new(secret_key: SecretKey) -> Self {
        Self {
            secret_key,
            attributes: EntryAttributes::new(),
        }
    }

    /// Replace the attributes of this entry.
    pub fn with_attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// The secret key.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Attributes of this entry.
    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }
}

/// A certificate trusted as-is. Never password protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCertificateEntry {
    certificate: Certificate,
    attributes: EntryAttributes,
}

impl TrustedCertificateEntry {
    /// Trust `certificate`.
    pub fn new(certificate: Certificate) -> Self {
        Self {
            certificate,
            attributes: EntryAttributes::new(),
        }
    }

    /// Replace the attributes of this entry.
    pub fn with_attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// The trusted certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Attributes of this entry.
    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }
}

/// Anything a trust store can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// See [`PrivateKeyEntry`].
    PrivateKey(PrivateKeyEntry),
    /// See [`SecretKeyEntry`].
    SecretKey(SecretKeyEntry),
    /// See [`TrustedCertificateEntry`].
    TrustedCertificate(TrustedCertificateEntry),
}

impl Entry {
    /// Attributes of the entry.
    pub fn attributes(&self) -> &EntryAttributes {
        match self {
            Entry::PrivateKey(entry) => entry.attributes(),
            Entry::SecretKey(entry) => entry.attributes(),
            Entry::TrustedCertificate(entry) => entry.attributes(),
        }
    }
}

impl From<PrivateKeyEntry> for Entry {
    fn from(entry: PrivateKeyEntry) -> Self {
        Entry::PrivateKey(entry)
    }
}

impl From<SecretKeyEntry> for Entry {
    fn from(entry: SecretKeyEntry) -> Self {
        Entry::SecretKey(entry)
    }
}

impl From<TrustedCertificateEntry> for Entry {
    fn from(entry: TrustedCertificateEntry) -> Self {
        Entry::TrustedCertificate(entry)
    }
}

/// The key held by a key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum StoredKey {
    /// An asymmetric private key.
    Private(PrivateKey),
    /// A symmetric key.
    Secret(SecretKey),
}

impl StoredKey {
    /// The key as a [`Key`].
    pub fn as_key(&self) -> &dyn Key {
        match self {
            StoredKey::Private(key) => key,
            StoredKey::Secret(key) => key,
        }
    }
}
