use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gatehouse_common::Certificate;
use gatehouse_registry::{Provider, Service};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{EntryAttributes, GatehouseTrustStoreError, StoredKey, TrustStoreBackend};

/// Type name of [`MemoryTrustStore`].
pub const MEMORY_TRUSTSTORE: &str = "memory";

/// Registry service type under which backends are offered.
pub const TRUSTSTORE_SERVICE: &str = "KeyStore";

const FORMAT_VERSION: u32 = 1;
const SALT_LENGTH: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Proves knowledge of an entry password without storing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PasswordVerifier {
    salt: String,
    tag: String,
}

impl PasswordVerifier {
    fn new(password: &str) -> Result<Self, GatehouseTrustStoreError> {
        let salt = salt();
        let tag = sign(&salt, password.as_bytes())?;
        Ok(Self {
            salt: STANDARD.encode(salt),
            tag: STANDARD.encode(tag),
        })
    }

    fn verify(&self, password: &str) -> Result<bool, GatehouseTrustStoreError> {
        let salt = decode(&self.salt)?;
        let tag = decode(&self.tag)?;
        Ok(mac(&salt)?
            .chain_update(password.as_bytes())
            .verify_slice(&tag)
            .is_ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoredEntry {
    Key {
        key: StoredKey,
        #[serde(default)]
        chain: Vec<Certificate>,
        verifier: PasswordVerifier,
        #[serde(default)]
        attributes: EntryAttributes,
    },
    Certificate {
        certificate: Certificate,
        #[serde(default)]
        attributes: EntryAttributes,
    },
}

/// The persisted form: the JSON encoded entries and an HMAC-SHA256 tag
/// over them.
#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    salt: String,
    entries: String,
    mac: String,
}

/// A trust store kept in memory and persisted as a JSON document.
///
/// Key entry passwords are never stored: each key entry keeps a salted
/// HMAC-SHA256 verifier of its password. Key material itself is stored as
/// is, so persisted stores have to be kept confidential by other means. The
/// document carries an HMAC-SHA256 tag keyed by the store password, which
/// [`TrustStoreBackend::load`] checks whenever a password is supplied.
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    entries: BTreeMap<String, StoredEntry>,
}

impl MemoryTrustStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer this backend through `provider` as the
    /// [`MEMORY_TRUSTSTORE`] algorithm of [`TRUSTSTORE_SERVICE`].
    pub fn register(provider: &Provider) {
        provider.put_service(
            Service::new(TRUSTSTORE_SERVICE, MEMORY_TRUSTSTORE, "gatehouse.MemoryTrustStore")
                .with_attribute("ImplementedIn", "Software")
                .with_factory(|_| {
                    let backend: Box<dyn TrustStoreBackend> = Box::new(MemoryTrustStore::new());
                    Ok(Box::new(backend))
                }),
        );
    }
}

impl TrustStoreBackend for MemoryTrustStore {
    fn key(
        &self,
        alias: &str,
        password: Option<&str>,
    ) -> Result<Option<StoredKey>, GatehouseTrustStoreError> {
        let Some(StoredEntry::Key { key, verifier, .. }) = self.entries.get(alias) else {
            return Ok(None);
        };
        let unrecoverable = || GatehouseTrustStoreError::Unrecoverable {
            alias: alias.to_owned(),
            reason: "wrong password".into(),
        };
        let password = password.ok_or_else(unrecoverable)?;
        if !verifier.verify(password)? {
            tracing::debug!(%alias, "rejected key entry password");
            return Err(unrecoverable());
        }
        Ok(Some(key.clone()))
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<Certificate>> {
        match self.entries.get(alias)? {
            StoredEntry::Key { chain, .. } if !chain.is_empty() => Some(chain.clone()),
            _ => None,
        }
    }

    fn certificate(&self, alias: &str) -> Option<Certificate> {
        match self.entries.get(alias)? {
            StoredEntry::Key { chain, .. } => chain.first().cloned(),
            StoredEntry::Certificate { certificate, .. } => Some(certificate.clone()),
        }
    }

    fn attributes(&self, alias: &str) -> EntryAttributes {
        match self.entries.get(alias) {
            Some(StoredEntry::Key { attributes, .. })
            | Some(StoredEntry::Certificate { attributes, .. }) => attributes.clone(),
            None => EntryAttributes::new(),
        }
    }

    fn set_key_entry(
        &mut self,
        alias: &str,
        key: StoredKey,
        password: &str,
        chain: Vec<Certificate>,
        attributes: EntryAttributes,
    ) -> Result<(), GatehouseTrustStoreError> {
        if matches!(key, StoredKey::Private(_)) && chain.is_empty() {
            return Err(GatehouseTrustStoreError::InvalidConfiguration(
                "private key entries need a certificate chain".into(),
            ));
        }
        let verifier = PasswordVerifier::new(password)?;
        self.entries.insert(
            alias.to_owned(),
            StoredEntry::Key {
                key,
                chain,
                verifier,
                attributes,
            },
        );
        Ok(())
    }

    fn set_certificate_entry(
        &mut self,
        alias: &str,
        certificate: Certificate,
        attributes: EntryAttributes,
    ) -> Result<(), GatehouseTrustStoreError> {
        if matches!(self.entries.get(alias), Some(StoredEntry::Key { .. })) {
            return Err(GatehouseTrustStoreError::InvalidConfiguration(format!(
                "cannot overwrite key entry '{alias}' with a trusted certificate"
            )));
        }
        self.entries.insert(
            alias.to_owned(),
            StoredEntry::Certificate {
                certificate,
                attributes,
            },
        );
        Ok(())
    }

    fn delete_entry(&mut self, alias: &str) -> Result<(), GatehouseTrustStoreError> {
        self.entries.remove(alias);
        Ok(())
    }

    fn aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_key_entry(&self, alias: &str) -> bool {
        matches!(self.entries.get(alias), Some(StoredEntry::Key { .. }))
    }

    fn is_certificate_entry(&self, alias: &str) -> bool {
        matches!(self.entries.get(alias), Some(StoredEntry::Certificate { .. }))
    }

    fn load(
        &mut self,
        input: Option<&mut dyn Read>,
        password: Option<&str>,
    ) -> Result<(), GatehouseTrustStoreError> {
        let Some(input) = input else {
            self.entries.clear();
            return Ok(());
        };

        let envelope: Envelope = serde_json::from_reader(input)?;
        if envelope.version != FORMAT_VERSION {
            return Err(GatehouseTrustStoreError::InvalidConfiguration(format!(
                "unsupported trust store version {}",
                envelope.version
            )));
        }
        let entries = decode(&envelope.entries)?;
        match password {
            Some(password) => {
                let key = sign(&decode(&envelope.salt)?, password.as_bytes())?;
                mac(&key)?
                    .chain_update(&entries)
                    .verify_slice(&decode(&envelope.mac)?)
                    .map_err(|_| GatehouseTrustStoreError::IntegrityCheckFailed)?;
            }
            None => tracing::debug!("loading trust store without an integrity check"),
        }

        self.entries = serde_json::from_slice(&entries)?;
        tracing::debug!(entries = self.entries.len(), "loaded trust store");
        Ok(())
    }

    fn store(
        &self,
        output: &mut dyn Write,
        password: &str,
    ) -> Result<(), GatehouseTrustStoreError> {
        let entries = serde_json::to_vec(&self.entries)?;
        let salt = salt();
        let key = sign(&salt, password.as_bytes())?;
        let tag = sign(&key, &entries)?;

        let envelope = Envelope {
            version: FORMAT_VERSION,
            salt: STANDARD.encode(salt),
            entries: STANDARD.encode(&entries),
            mac: STANDARD.encode(tag),
        };
        serde_json::to_writer(&mut *output, &envelope)?;
        output.flush()?;
        tracing::debug!(entries = self.entries.len(), "stored trust store");
        Ok(())
    }
}

fn salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn mac(key: &[u8]) -> Result<HmacSha256, GatehouseTrustStoreError> {
    HmacSha256::new_from_slice(key)
        .map_err(|error| GatehouseTrustStoreError::InvalidConfiguration(error.to_string()))
}

fn sign(key: &[u8], data: &[u8]) -> Result<Vec<u8>, GatehouseTrustStoreError> {
    Ok(mac(key)?.chain_update(data).finalize().into_bytes().to_vec())
}

fn decode(text: &str) -> Result<Vec<u8>, GatehouseTrustStoreError> {
    STANDARD
        .decode(text.as_bytes())
        .map_err(|error| GatehouseTrustStoreError::InvalidConfiguration(error.to_string()))
}
