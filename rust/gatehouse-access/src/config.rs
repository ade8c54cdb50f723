use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{GatehouseAccessError, GrantPolicy, GrantPolicyBuilder, PolicySource};

/// Policy type served by [`GrantPolicy`].
pub const GRANT_POLICY_TYPE: &str = "grant";

/// Trust store type used when none is configured.
pub const DEFAULT_TRUSTSTORE_TYPE: &str = "memory";

/// Security settings resolved by whatever bootstraps the process.
///
/// Nothing here is read from disk by this crate. A host deserializes the
/// configuration in whatever format it likes and passes it in; every field
/// has a default so partial documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Provider names in order of preference.
    pub providers: Vec<String>,
    /// Which policy implementation to install.
    pub policy_type: String,
    /// Which trust store backend to create.
    pub truststore_type: String,
    /// Values for `${name}` references in grant entries.
    pub properties: BTreeMap<String, String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            policy_type: GRANT_POLICY_TYPE.into(),
            truststore_type: DEFAULT_TRUSTSTORE_TYPE.into(),
            properties: BTreeMap::new(),
        }
    }
}

impl SecurityConfig {
    /// Start building the configured policy over `source`, with the
    /// configured properties.
    pub fn grant_policy(
        &self,
        source: impl PolicySource + 'static,
    ) -> Result<GrantPolicyBuilder, GatehouseAccessError> {
        if !self.policy_type.eq_ignore_ascii_case(GRANT_POLICY_TYPE) {
            return Err(GatehouseAccessError::InvalidConfiguration(format!(
                "unsupported policy type '{}'",
                self.policy_type
            )));
        }
        Ok(GrantPolicy::builder(source).properties(self.properties.clone()))
    }
}
