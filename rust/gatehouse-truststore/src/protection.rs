use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Protects an entry with a password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PasswordProtection {
    password: Option<String>,
}

impl PasswordProtection {
    /// Protection with `password`.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }

    /// Password protection without a password. Accepted when reading
    /// entries, but never enough to create a key entry.
    pub fn none() -> Self {
        Self::default()
    }

    /// The password, if there is one.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl Debug for PasswordProtection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordProtection")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Supplies the password for an entry when it is needed.
pub trait PasswordCallback: Send + Sync {
    /// The password protecting `alias`, or `None` to supply no password.
    fn password(&self, alias: &str) -> Option<String>;
}

impl<F> PasswordCallback for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn password(&self, alias: &str) -> Option<String> {
        self(alias)
    }
}

/// How an entry is protected.
#[derive(Clone)]
pub enum ProtectionParameter {
    /// A password known up front.
    Password(PasswordProtection),
    /// A password asked for per entry.
    Callback(Arc<dyn PasswordCallback>),
}

impl ProtectionParameter {
    /// Protection with `password`.
    pub fn password(password: impl Into<String>) -> Self {
        ProtectionParameter::Password(PasswordProtection::new(password))
    }

    /// Protection with passwords supplied by `callback`.
    pub fn callback(callback: impl PasswordCallback + 'static) -> Self {
        ProtectionParameter::Callback(Arc::new(callback))
    }

    pub(crate) fn for_alias(&self, alias: &str) -> PasswordProtection {
        match self {
            ProtectionParameter::Password(protection) => protection.clone(),
            ProtectionParameter::Callback(callback) => PasswordProtection {
                password: callback.password(alias),
            },
        }
    }
}

impl From<PasswordProtection> for ProtectionParameter {
    fn from(protection: PasswordProtection) -> Self {
        ProtectionParameter::Password(protection)
    }
}

impl Debug for ProtectionParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionParameter::Password(protection) => protection.fmt(f),
            ProtectionParameter::Callback(_) => f.write_str("Callback"),
        }
    }
}
