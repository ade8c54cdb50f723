use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use gatehouse_common::{Certificate, CodeSource, Principal};
use gatehouse_permission::{PermissionResolver, Permissions, SharedPermission};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{GatehouseAccessError, Policy, ProtectionDomain};

/// Matches any principal kind or name in a [`PrincipalEntry`].
pub const WILDCARD: &str = "*";

/// One `grant` of a [`GrantPolicy`]: the permissions given to code from
/// `code_base`, signed by every alias in `signed_by`, running for all of
/// `principals`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantEntry {
    /// Location the grant applies to; absent means every location. May
    /// contain `${name}` property references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_base: Option<String>,
    /// Aliases of certificates the code must be signed with.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signed_by: Vec<String>,
    /// Principals the code must be running for.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<PrincipalEntry>,
    /// The permissions granted.
    pub permissions: Vec<PermissionEntry>,
}

/// A principal requirement of a [`GrantEntry`]. Either part may be
/// [`WILDCARD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalEntry {
    /// Principal kind, or `*`.
    pub kind: String,
    /// Principal name, or `*`.
    pub name: String,
}

impl PrincipalEntry {
    /// A requirement for a principal of `kind` called `name`.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    fn matches(&self, principal: &Principal) -> bool {
        (self.kind == WILDCARD || self.kind == principal.kind())
            && (self.name == WILDCARD || self.name == principal.name())
    }
}

/// A permission of a [`GrantEntry`], by kind name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Kind of the permission.
    pub kind: String,
    /// Target name. May contain `${name}` property references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Actions, for kinds that take them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<String>,
    /// Aliases of certificates the permission's factory must be signed with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signed_by: Vec<String>,
}

impl PermissionEntry {
    /// A permission of `kind` on `name`.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: Some(name.into()),
            actions: None,
            signed_by: Vec::new(),
        }
    }

    /// Set the actions.
    pub fn with_actions(mut self, actions: impl Into<String>) -> Self {
        self.actions = Some(actions.into());
        self
    }
}

/// Supplies the grant entries of a [`GrantPolicy`]. Read once when the
/// policy is built and again on every refresh.
pub trait PolicySource: Send + Sync {
    /// The current grant entries.
    fn grants(&self) -> Result<Vec<GrantEntry>, GatehouseAccessError>;
}

impl PolicySource for Vec<GrantEntry> {
    fn grants(&self) -> Result<Vec<GrantEntry>, GatehouseAccessError> {
        Ok(self.clone())
    }
}

impl PolicySource for Arc<RwLock<Vec<GrantEntry>>> {
    fn grants(&self) -> Result<Vec<GrantEntry>, GatehouseAccessError> {
        Ok(self.read().clone())
    }
}

/// Looks up certificates by alias for `signed_by` clauses.
pub trait CertificateSource: Send + Sync {
    /// The certificate stored under `alias`.
    fn certificate(&self, alias: &str) -> Option<Certificate>;
}

impl CertificateSource for HashMap<String, Certificate> {
    fn certificate(&self, alias: &str) -> Option<Certificate> {
        self.get(alias).cloned()
    }
}

impl CertificateSource for BTreeMap<String, Certificate> {
    fn certificate(&self, alias: &str) -> Option<Certificate> {
        self.get(alias).cloned()
    }
}

struct Grant {
    code_source: CodeSource,
    principals: Vec<PrincipalEntry>,
    permissions: Vec<SharedPermission>,
}

/// Builds a [`GrantPolicy`].
pub struct GrantPolicyBuilder {
    source: Box<dyn PolicySource>,
    resolver: Option<Arc<PermissionResolver>>,
    certificates: Option<Arc<dyn CertificateSource>>,
    properties: BTreeMap<String, String>,
    domain: Option<ProtectionDomain>,
}

impl GrantPolicyBuilder {
    /// Resolve permission kinds through `resolver` instead of one that only
    /// knows the built-in kinds.
    pub fn resolver(mut self, resolver: Arc<PermissionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Resolve `signed_by` aliases through `certificates`. Without one, every
    /// entry that names a signer is ignored.
    pub fn certificates(mut self, certificates: Arc<dyn CertificateSource>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    /// Values for `${name}` references.
    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// The domain the policy itself runs in.
    pub fn domain(mut self, domain: ProtectionDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Read the source and build the policy.
    pub fn build(self) -> Result<GrantPolicy, GatehouseAccessError> {
        let policy = GrantPolicy {
            source: self.source,
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(PermissionResolver::with_defaults())),
            certificates: self.certificates,
            properties: self.properties,
            domain: self.domain,
            grants: RwLock::new(Vec::new()),
        };
        *policy.grants.write() = policy.load()?;
        Ok(policy)
    }
}

/// A policy made of grant entries.
///
/// Code receives the union of the permissions of every entry whose code
/// source implies its own and whose principals it runs for. Entries are
/// read from a [`PolicySource`] at construction and on
/// [`refresh`](Policy::refresh).
///
/// An entry that cannot be used (a malformed code base, an undefined
/// property, an unknown signer alias) is skipped with a warning, as is a
/// single permission that cannot be constructed. Permission kinds the
/// resolver does not know yet are kept unresolved and resolved on first
/// use.
pub struct GrantPolicy {
    source: Box<dyn PolicySource>,
    resolver: Arc<PermissionResolver>,
    certificates: Option<Arc<dyn CertificateSource>>,
    properties: BTreeMap<String, String>,
    domain: Option<ProtectionDomain>,
    grants: RwLock<Vec<Grant>>,
}

impl GrantPolicy {
    /// A policy read from `source` with the built-in permission kinds.
    pub fn new(source: impl PolicySource + 'static) -> Result<Self, GatehouseAccessError> {
        Self::builder(source).build()
    }

    /// Configure a policy read from `source`.
    pub fn builder(source: impl PolicySource + 'static) -> GrantPolicyBuilder {
        GrantPolicyBuilder {
            source: Box::new(source),
            resolver: None,
            certificates: None,
            properties: BTreeMap::new(),
            domain: None,
        }
    }

    /// The resolver used for permission kinds.
    pub fn resolver(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }

    fn load(&self) -> Result<Vec<Grant>, GatehouseAccessError> {
        let mut grants = Vec::new();
        for entry in self.source.grants()? {
            match self.parse_grant(&entry) {
                Ok(Some(grant)) => grants.push(grant),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(?entry, %error, "ignoring grant entry");
                }
            }
        }
        Ok(grants)
    }

    fn parse_grant(&self, entry: &GrantEntry) -> Result<Option<Grant>, GatehouseAccessError> {
        let Some(signers) = self.signers(&entry.signed_by) else {
            tracing::warn!(
                signed_by = ?entry.signed_by,
                "ignoring grant entry with unknown signer"
            );
            return Ok(None);
        };
        let code_source = match &entry.code_base {
            Some(code_base) => CodeSource::parse(&expand(code_base, &self.properties)?, signers)?,
            None => CodeSource::new(None, signers),
        };

        let mut permissions = Vec::new();
        for permission in &entry.permissions {
            match self.parse_permission(permission) {
                Ok(Some(permission)) => permissions.push(permission),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(kind = %permission.kind, %error, "ignoring permission entry");
                }
            }
        }

        Ok(Some(Grant {
            code_source,
            principals: entry.principals.clone(),
            permissions,
        }))
    }

    fn parse_permission(
        &self,
        entry: &PermissionEntry,
    ) -> Result<Option<SharedPermission>, GatehouseAccessError> {
        let Some(signers) = self.signers(&entry.signed_by) else {
            tracing::warn!(kind = %entry.kind, "ignoring permission with unknown signer");
            return Ok(None);
        };
        let name = entry
            .name
            .as_deref()
            .map(|name| expand(name, &self.properties))
            .transpose()?;

        let permission = self
            .resolver
            .instantiate(&entry.kind, name, entry.actions.clone(), signers)?;
        Ok(Some(permission))
    }

    fn signers(&self, aliases: &[String]) -> Option<Vec<Certificate>> {
        aliases
            .iter()
            .map(|alias| self.certificates.as_ref()?.certificate(alias))
            .collect()
    }

    fn collect(
        &self,
        code_source: Option<&CodeSource>,
        principals: Option<&[Principal]>,
    ) -> Result<Permissions, GatehouseAccessError> {
        let anonymous = CodeSource::default();
        let code_source = code_source.unwrap_or(&anonymous);

        let mut permissions = Permissions::new().with_resolver(self.resolver.clone());
        for grant in self.grants.read().iter() {
            if !grant.code_source.implies(code_source) {
                continue;
            }
            if !grant.principals.is_empty() {
                let Some(principals) = principals else {
                    continue;
                };
                let satisfied = grant
                    .principals
                    .iter()
                    .all(|required| principals.iter().any(|p| required.matches(p)));
                if !satisfied {
                    continue;
                }
            }
            for permission in &grant.permissions {
                permissions.add(permission.clone())?;
            }
        }
        Ok(permissions)
    }
}

impl Policy for GrantPolicy {
    fn permissions_for_source(
        &self,
        code_source: Option<&CodeSource>,
    ) -> Result<Permissions, GatehouseAccessError> {
        self.collect(code_source, None)
    }

    fn permissions(&self, domain: &ProtectionDomain) -> Result<Permissions, GatehouseAccessError> {
        let mut permissions = self.collect(domain.code_source(), Some(domain.principals()))?;
        if let Some(bound) = domain.permissions() {
            permissions.add_all(bound)?;
        }
        Ok(permissions)
    }

    fn refresh(&self) -> Result<(), GatehouseAccessError> {
        let grants = self.load()?;
        tracing::debug!(grants = grants.len(), "reloaded grant policy");
        *self.grants.write() = grants;
        Ok(())
    }

    fn domain(&self) -> Option<ProtectionDomain> {
        self.domain.clone()
    }
}

impl Debug for GrantPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantPolicy")
            .field("grants", &self.grants.read().len())
            .field("properties", &self.properties)
            .field("domain", &self.domain)
            .finish()
    }
}

/// Replace `${name}` with the value of property `name`. `${/}` is the path
/// separator.
fn expand(
    value: &str,
    properties: &BTreeMap<String, String>,
) -> Result<String, GatehouseAccessError> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let reference = &rest[start + 2..];
        let end = reference.find('}').ok_or_else(|| {
            GatehouseAccessError::InvalidConfiguration(format!(
                "unterminated property reference in '{value}'"
            ))
        })?;
        match &reference[..end] {
            "/" => expanded.push('/'),
            name => {
                let property = properties.get(name).ok_or_else(|| {
                    GatehouseAccessError::InvalidConfiguration(format!(
                        "undefined property '{name}' in '{value}'"
                    ))
                })?;
                expanded.push_str(property);
            }
        }
        rest = &reference[end + 1..];
    }
    expanded.push_str(rest);
    Ok(expanded)
}
