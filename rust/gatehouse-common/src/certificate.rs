use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Key, PublicKey};

/// The certificate type most certificates are issued as.
pub const X509: &str = "X.509";

/// An identity certificate binding a subject name to a [`PublicKey`].
///
/// Parsing is out of scope; a certificate is only ever compared, hashed and
/// asked for its public key. Two certificates are equal when they have the
/// same type and the same encoding.
#[derive(Clone, Serialize, Deserialize)]
pub struct Certificate {
    certificate_type: String,
    subject: String,
    issuer: String,
    public_key: PublicKey,
    #[serde(with = "crate::encoding")]
    encoded: Vec<u8>,
}

impl Certificate {
    /// Describe a certificate. Its encoding is derived from the fields, so
    /// two certificates built from the same fields are the same certificate.
    pub fn new(
        certificate_type: impl Into<String>,
        subject: impl Into<String>,
        issuer: impl Into<String>,
        public_key: PublicKey,
    ) -> Self {
        let certificate_type = certificate_type.into();
        let subject = subject.into();
        let issuer = issuer.into();

        let mut encoded = Vec::new();
        for field in [
            certificate_type.as_bytes(),
            subject.as_bytes(),
            issuer.as_bytes(),
            public_key.algorithm().as_bytes(),
            public_key.encoded().unwrap_or_default(),
        ] {
            encoded.extend_from_slice(&(field.len() as u32).to_be_bytes());
            encoded.extend_from_slice(field);
        }

        Self {
            certificate_type,
            subject,
            issuer,
            public_key,
            encoded,
        }
    }

    /// A self-signed `X.509` certificate for `subject`.
    pub fn self_signed(subject: impl Into<String>, public_key: PublicKey) -> Self {
        let subject = subject.into();
        Self::new(X509, subject.clone(), subject, public_key)
    }

    /// The type of this certificate (e.g. `X.509`).
    pub fn certificate_type(&self) -> &str {
        &self.certificate_type
    }

    /// The distinguished name of the subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The distinguished name of the issuer.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The public key this certificate binds to its subject.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The encoded form of this certificate.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// SHA-256 over the encoded form.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.encoded).into()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.certificate_type == other.certificate_type && self.encoded == other.encoded
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.certificate_type.hash(state);
        self.encoded.hash(state);
    }
}

impl Debug for Certificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("type", &self.certificate_type)
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("key_algorithm", &self.public_key.algorithm())
            .finish()
    }
}

impl Display for Certificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} certificate for {}", self.certificate_type, self.subject)
    }
}
