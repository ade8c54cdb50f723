use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Certificate, GatehouseCommonError};

/// Where a unit of code came from and who signed it.
///
/// This is the origin identifier that policies grant permissions against.
/// A grant is written against a (possibly wildcarded) code source, and a
/// concrete code source receives the grant when the grant's code source
/// [implies](CodeSource::implies) it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<Url>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    signers: Vec<Certificate>,
}

impl CodeSource {
    /// A code source for `location` signed by `signers`.
    pub fn new(location: Option<Url>, signers: Vec<Certificate>) -> Self {
        let mut deduplicated: Vec<Certificate> = Vec::with_capacity(signers.len());
        for signer in signers {
            if !deduplicated.contains(&signer) {
                deduplicated.push(signer);
            }
        }
        Self {
            location,
            signers: deduplicated,
        }
    }

    /// Parse `location` and build a code source from it.
    pub fn parse(location: &str, signers: Vec<Certificate>) -> Result<Self, GatehouseCommonError> {
        let url = Url::parse(location).map_err(|error| GatehouseCommonError::InvalidLocation {
            location: location.to_owned(),
            reason: error.to_string(),
        })?;
        Ok(Self::new(Some(url), signers))
    }

    /// The location of the code, if known.
    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    /// Certificates of the parties that signed the code.
    pub fn signers(&self) -> &[Certificate] {
        &self.signers
    }

    /// Whether holding a grant for `self` is enough to cover `other`.
    ///
    /// Every signer of `self` must also have signed `other`, and the location
    /// of `self` must match the location of `other`:
    ///
    /// - no location matches every location;
    /// - a path ending in `/-` matches everything below that directory;
    /// - a path ending in `/*` matches the direct children of that directory;
    /// - anything else must match exactly (a trailing `/` is tolerated).
    pub fn implies(&self, other: &CodeSource) -> bool {
        self.matches_signers(other) && self.matches_location(other)
    }

    fn matches_signers(&self, other: &CodeSource) -> bool {
        self.signers
            .iter()
            .all(|signer| other.signers.contains(signer))
    }

    fn matches_location(&self, other: &CodeSource) -> bool {
        let Some(this) = &self.location else {
            return true;
        };
        let Some(that) = &other.location else {
            return false;
        };

        if this == that {
            return true;
        }

        if this.scheme() != that.scheme() {
            return false;
        }

        let this_host = this.host_str().unwrap_or_default();
        let that_host = that.host_str().unwrap_or_default();
        let local = |host: &str| host.is_empty() || host.eq_ignore_ascii_case("localhost");
        if local(this_host) {
            if !local(that_host) {
                return false;
            }
        } else if !this_host.eq_ignore_ascii_case(that_host) {
            return false;
        }

        if this.port().is_some() && this.port_or_known_default() != that.port_or_known_default() {
            return false;
        }

        let this_path = this.path();
        let that_path = that.path();
        if let Some(prefix) = this_path.strip_suffix('-').filter(|p| p.ends_with('/')) {
            if !that_path.starts_with(prefix) {
                return false;
            }
        } else if let Some(prefix) = this_path.strip_suffix('*').filter(|p| p.ends_with('/')) {
            match that_path.strip_prefix(prefix) {
                Some(rest) if !rest.contains('/') => {}
                _ => return false,
            }
        } else if that_path != this_path && that_path.strip_suffix('/') != Some(this_path) {
            return false;
        }

        if let Some(fragment) = this.fragment() {
            if that.fragment() != Some(fragment) {
                return false;
            }
        }

        true
    }
}

impl Display for CodeSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "({location}")?,
            None => write!(f, "(<no location>")?,
        }
        if self.signers.is_empty() {
            write!(f, " <no signer certificates>)")
        } else {
            for signer in &self.signers {
                write!(f, " {}", signer.subject())?;
            }
            write!(f, ")")
        }
    }
}
