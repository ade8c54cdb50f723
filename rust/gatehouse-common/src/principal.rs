use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// An authenticated party code may be running on behalf of, such as a user
/// or a service account. Identified by a kind (e.g. `X500Principal`) and a
/// name within that kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Principal {
    kind: String,
    name: String,
}

impl Principal {
    /// A principal of `kind` called `name`.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// The kind of principal.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The principal's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} \"{}\"", self.kind, self.name)
    }
}
