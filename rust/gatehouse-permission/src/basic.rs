use std::any::Any;

use crate::{GatehousePermissionError, Permission};

/// Kind name for permissions guarding runtime facilities.
pub const RUNTIME_PERMISSION: &str = "RuntimePermission";
/// Kind name for permissions guarding the security machinery itself
/// (installing policies, adding providers, ...).
pub const SECURITY_PERMISSION: &str = "SecurityPermission";
/// Kind name of [`PropertyPermission`].
pub const PROPERTY_PERMISSION: &str = "PropertyPermission";

/// A named permission without actions.
///
/// Names are dot-separated and hierarchical. A trailing `*` (on its own or
/// after a `.`) is a wildcard: `net.*` implies `net.connect` and
/// `net.connect.outbound`, and `*` implies every name of the same kind.
/// A `*` anywhere else is just a character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasicPermission {
    kind: String,
    name: String,
    prefix: String,
    wildcard: bool,
}

impl BasicPermission {
    /// A permission of `kind` with the given hierarchical `name`.
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, GatehousePermissionError> {
        let kind = kind.into();
        let name = name.into();
        if name.is_empty() {
            return Err(GatehousePermissionError::InvalidName { kind, name });
        }

        let (prefix, wildcard) = if name == "*" {
            (String::new(), true)
        } else if let Some(prefix) = name.strip_suffix(".*") {
            (format!("{prefix}."), true)
        } else {
            (name.clone(), false)
        };

        Ok(Self {
            kind,
            name,
            prefix,
            wildcard,
        })
    }

    /// A [`RUNTIME_PERMISSION`] called `name`.
    pub fn runtime(name: impl Into<String>) -> Result<Self, GatehousePermissionError> {
        Self::new(RUNTIME_PERMISSION, name)
    }

    /// A [`SECURITY_PERMISSION`] called `name`.
    pub fn security(name: impl Into<String>) -> Result<Self, GatehousePermissionError> {
        Self::new(SECURITY_PERMISSION, name)
    }

    /// Whether the name ends in a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    fn implies_name(&self, other: &BasicPermission) -> bool {
        if self.wildcard {
            if other.wildcard {
                other.prefix.starts_with(&self.prefix)
            } else {
                other.prefix.len() > self.prefix.len() && other.prefix.starts_with(&self.prefix)
            }
        } else if other.wildcard {
            false
        } else {
            self.prefix == other.prefix
        }
    }
}

impl Permission for BasicPermission {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn implies(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<BasicPermission>() {
            Some(other) => self.kind == other.kind && self.implies_name(other),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

const READ: u32 = 0x1;
const WRITE: u32 = 0x2;

/// Read and/or write access to a named configuration property.
///
/// Names follow [`BasicPermission`] wildcard rules. Actions are `read`,
/// `write` or both, and combine across grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPermission {
    target: BasicPermission,
    mask: u32,
}

impl PropertyPermission {
    /// A permission to perform `actions` on property `name`.
    pub fn new(name: impl Into<String>, actions: &str) -> Result<Self, GatehousePermissionError> {
        let target = BasicPermission::new(PROPERTY_PERMISSION, name)?;
        let mut mask = 0;
        for action in actions.split([',', ' ']).filter(|a| !a.trim().is_empty()) {
            mask |= match action.trim().to_ascii_lowercase().as_str() {
                "read" => READ,
                "write" => WRITE,
                _ => {
                    return Err(GatehousePermissionError::InvalidActions {
                        kind: PROPERTY_PERMISSION.into(),
                        actions: actions.into(),
                    });
                }
            };
        }
        if mask == 0 {
            return Err(GatehousePermissionError::InvalidActions {
                kind: PROPERTY_PERMISSION.into(),
                actions: actions.into(),
            });
        }
        Ok(Self { target, mask })
    }
}

impl Permission for PropertyPermission {
    fn kind(&self) -> &str {
        PROPERTY_PERMISSION
    }

    fn name(&self) -> &str {
        self.target.name()
    }

    fn actions(&self) -> String {
        match self.mask {
            READ => "read".into(),
            WRITE => "write".into(),
            _ => "read,write".into(),
        }
    }

    fn implies(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<PropertyPermission>() {
            Some(other) => {
                self.mask & other.mask == other.mask && self.target.implies_name(&other.target)
            }
            None => false,
        }
    }

    fn action_mask(&self) -> Option<u32> {
        Some(self.mask)
    }

    fn implies_target(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<PropertyPermission>() {
            Some(other) => self.target.implies_name(&other.target),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[test]
    fn it_matches_hierarchical_wildcards() -> TestResult {
        let net = BasicPermission::runtime("net.*")?;

        assert!(net.implies(&BasicPermission::runtime("net.connect")?));
        assert!(net.implies(&BasicPermission::runtime("net.connect.outbound")?));
        assert!(net.implies(&BasicPermission::runtime("net.connect.*")?));
        assert!(!net.implies(&BasicPermission::runtime("net")?));
        assert!(!net.implies(&BasicPermission::runtime("network")?));
        Ok(())
    }

    #[test]
    fn it_matches_everything_of_its_kind_with_a_bare_star() -> TestResult {
        let any = BasicPermission::runtime("*")?;

        assert!(any.implies(&BasicPermission::runtime("exitVM")?));
        assert!(any.implies(&BasicPermission::runtime("*")?));
        assert!(!any.implies(&BasicPermission::security("exitVM")?));
        Ok(())
    }

    #[test]
    fn it_does_not_let_exact_names_imply_wildcards() -> TestResult {
        let exact = BasicPermission::runtime("net.connect")?;

        assert!(exact.implies(&BasicPermission::runtime("net.connect")?));
        assert!(!exact.implies(&BasicPermission::runtime("net.*")?));
        Ok(())
    }

    #[test]
    fn it_rejects_empty_names() {
        assert!(matches!(
            BasicPermission::runtime(""),
            Err(GatehousePermissionError::InvalidName { .. })
        ));
    }

    #[test]
    fn it_checks_property_actions() -> TestResult {
        let read_all = PropertyPermission::new("user.*", "read")?;

        assert!(read_all.implies(&PropertyPermission::new("user.home", "read")?));
        assert!(!read_all.implies(&PropertyPermission::new("user.home", "read,write")?));
        assert!(PropertyPermission::new("user.home", "execute").is_err());
        assert!(PropertyPermission::new("user.home", "").is_err());
        Ok(())
    }
}
