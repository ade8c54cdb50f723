//! Opaque key material.
//!
//! Keys are never interpreted here. The registry only needs to know a key's
//! format and which kinds it is an instance of (to honour the
//! `SupportedKeyFormats` / `SupportedKeyClasses` service attributes), and the
//! trust store only needs the algorithm to match a private key against the
//! leaf of its certificate chain.

use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

/// Kind name shared by every key.
pub const KEY_KIND: &str = "Key";
/// Kind name of [`PublicKey`].
pub const PUBLIC_KEY_KIND: &str = "PublicKey";
/// Kind name of [`PrivateKey`].
pub const PRIVATE_KEY_KIND: &str = "PrivateKey";
/// Kind name of [`SecretKey`].
pub const SECRET_KEY_KIND: &str = "SecretKey";

/// Behaviour common to all keys.
pub trait Key: Debug + Send + Sync {
    /// Standard algorithm name of this key (e.g. `RSA`, `Ed25519`, `AES`).
    fn algorithm(&self) -> &str;

    /// Name of the primary encoding format (e.g. `X.509`, `PKCS#8`, `RAW`),
    /// or `None` if the key does not support encoding.
    fn format(&self) -> Option<&str>;

    /// The encoded key, or `None` if the key does not support encoding.
    fn encoded(&self) -> Option<&[u8]>;

    /// Every kind this key is an instance of, most specific first.
    ///
    /// A key answers `true` to "is this key a `PrivateKey`?" iff
    /// `PrivateKey` appears in this list.
    fn kinds(&self) -> Vec<&str>;

    /// Convenience check against [`Key::kinds`].
    fn is_kind(&self, kind: &str) -> bool {
        self.kinds().contains(&kind)
    }
}

/// The fields every concrete key carries.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyMaterial {
    algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(with = "crate::encoding")]
    encoded: Vec<u8>,
    /// An algorithm-specific kind name (e.g. `RSAPrivateKey`) layered on top
    /// of the generic ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

impl KeyMaterial {
    /// Describe key material for `algorithm` encoded in `format`.
    pub fn new(
        algorithm: impl Into<String>,
        format: Option<impl Into<String>>,
        encoded: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            format: format.map(Into::into),
            encoded: encoded.into(),
            kind: None,
        }
    }

    /// Attach an algorithm-specific kind name.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    fn kinds<'a>(&'a self, generic: &'static str) -> Vec<&'a str> {
        let mut kinds = Vec::with_capacity(3);
        if let Some(kind) = &self.kind {
            kinds.push(kind.as_str());
        }
        kinds.push(generic);
        kinds.push(KEY_KIND);
        kinds
    }
}

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident, $kind:expr, $default_format:expr, redact = $redact:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(KeyMaterial);

        impl $name {
            /// Wrap encoded key material for `algorithm` in the default
            /// format for this kind of key.
            pub fn new(algorithm: impl Into<String>, encoded: impl Into<Vec<u8>>) -> Self {
                Self(KeyMaterial::new(algorithm, Some($default_format), encoded))
            }

            /// Access the underlying material.
            pub fn material(&self) -> &KeyMaterial {
                &self.0
            }
        }

        impl From<KeyMaterial> for $name {
            fn from(material: KeyMaterial) -> Self {
                Self(material)
            }
        }

        impl Key for $name {
            fn algorithm(&self) -> &str {
                &self.0.algorithm
            }

            fn format(&self) -> Option<&str> {
                self.0.format.as_deref()
            }

            fn encoded(&self) -> Option<&[u8]> {
                Some(&self.0.encoded)
            }

            fn kinds(&self) -> Vec<&str> {
                self.0.kinds($kind)
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                let mut debug = f.debug_struct(stringify!($name));
                debug
                    .field("algorithm", &self.0.algorithm)
                    .field("format", &self.0.format);
                if $redact {
                    debug.field("encoded", &"<redacted>");
                } else {
                    debug.field("encoded", &self.0.encoded.len());
                }
                debug.finish()
            }
        }
    };
}

key_type!(
    /// A public key, by default in `X.509` (SubjectPublicKeyInfo) format.
    PublicKey,
    PUBLIC_KEY_KIND,
    "X.509",
    redact = false
);

key_type!(
    /// A private key, by default in `PKCS#8` format.
    PrivateKey,
    PRIVATE_KEY_KIND,
    "PKCS#8",
    redact = true
);

key_type!(
    /// A symmetric key in `RAW` format.
    SecretKey,
    SECRET_KEY_KIND,
    "RAW",
    redact = true
);
