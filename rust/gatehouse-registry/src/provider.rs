use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{ImplementationCatalog, Service};

const ALIAS_PREFIX: &str = "Alg.Alias.";
const PROVIDER_PREFIX: &str = "Provider.";

/// Identifies a service within a provider: type and algorithm, both
/// compared without regard to case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    service_type: String,
    algorithm: String,
}

impl ServiceKey {
    fn new(service_type: &str, algorithm: &str) -> Self {
        Self {
            service_type: service_type.to_ascii_uppercase(),
            algorithm: algorithm.to_ascii_uppercase(),
        }
    }
}

/// A service being assembled from legacy properties.
struct LegacyEntry {
    service_type: String,
    algorithm: String,
    class_name: Option<String>,
    aliases: Vec<String>,
    attributes: Vec<(String, String)>,
}

impl LegacyEntry {
    fn new(service_type: &str, algorithm: &str) -> Self {
        Self {
            service_type: service_type.to_owned(),
            algorithm: algorithm.to_owned(),
            class_name: None,
            aliases: Vec::new(),
            attributes: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ProviderState {
    services: IndexMap<ServiceKey, Arc<Service>>,
    aliases: HashMap<ServiceKey, ServiceKey>,
    properties: IndexMap<String, String>,
    legacy_changed: bool,
    legacy: IndexMap<ServiceKey, Arc<Service>>,
    legacy_aliases: HashMap<ServiceKey, ServiceKey>,
}

impl ProviderState {
    fn structured(&self, key: &ServiceKey) -> Option<Arc<Service>> {
        self.services
            .get(key)
            .or_else(|| self.aliases.get(key).and_then(|key| self.services.get(key)))
            .cloned()
    }

    fn legacy(&self, key: &ServiceKey) -> Option<Arc<Service>> {
        self.legacy
            .get(key)
            .or_else(|| {
                self.legacy_aliases
                    .get(key)
                    .and_then(|key| self.legacy.get(key))
            })
            .cloned()
    }

    fn structured_key(&self, key: &ServiceKey) -> Option<ServiceKey> {
        if self.services.contains_key(key) {
            return Some(key.clone());
        }
        self.aliases.get(key).cloned()
    }
}

/// A named bundle of services.
///
/// Services are registered either as structured [`Service`] values with
/// [`Provider::put_service`] or as legacy string properties with
/// [`Provider::put`]:
///
/// - `"<Type>.<Algorithm>"` maps to the implementation class name,
/// - `"<Type>.<Algorithm> <Attribute>"` maps to an attribute value,
/// - `"Alg.Alias.<Type>.<Alias>"` maps to the standard algorithm name.
///
/// Properties are parsed into services lazily, the first time a lookup
/// happens after they changed. Entries that end up without a class name
/// are dropped. Structured services always win over legacy ones.
///
/// ```rust
/// use gatehouse_registry::Provider;
///
/// let provider = Provider::new("Example", "1.0", "example provider");
/// provider.put("MessageDigest.SHA-256", "example.Sha256");
/// provider.put("MessageDigest.SHA-256 ImplementedIn", "Software");
/// provider.put("Alg.Alias.MessageDigest.SHA256", "SHA-256");
///
/// let service = provider.service("messagedigest", "sha256").unwrap();
/// assert_eq!(service.algorithm(), "SHA-256");
/// assert_eq!(service.attribute("implementedin"), Some("Software"));
/// ```
pub struct Provider {
    name: String,
    version: String,
    info: String,
    catalog: Arc<ImplementationCatalog>,
    state: Mutex<ProviderState>,
}

impl Provider {
    /// An empty provider with its own [`ImplementationCatalog`].
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        info: impl Into<String>,
    ) -> Self {
        Self::with_catalog(name, version, info, Arc::new(ImplementationCatalog::new()))
    }

    /// An empty provider resolving class names through `catalog`.
    pub fn with_catalog(
        name: impl Into<String>,
        version: impl Into<String>,
        info: impl Into<String>,
        catalog: Arc<ImplementationCatalog>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            info: info.into(),
            catalog,
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// The provider name, unique within a [`Registry`](crate::Registry).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// A human readable description.
    pub fn info(&self) -> &str {
        &self.info
    }

    /// The implementations this provider constructs by class name.
    pub fn catalog(&self) -> &Arc<ImplementationCatalog> {
        &self.catalog
    }

    /// Register `service`, replacing any structured service with the same
    /// type and algorithm.
    pub fn put_service(&self, service: Service) -> Arc<Service> {
        let service = Arc::new(service.bind(&self.name, &self.catalog));
        let key = ServiceKey::new(service.service_type(), service.algorithm());

        let mut state = self.state.lock();
        state.aliases.retain(|_, target| *target != key);
        for alias in service.aliases() {
            state
                .aliases
                .insert(ServiceKey::new(service.service_type(), alias), key.clone());
        }
        state.services.insert(key, service.clone());
        tracing::trace!(provider = %self.name, %service, "registered service");
        service
    }

    /// Register a structured service in one call.
    pub fn register<A, K, V>(
        &self,
        service_type: &str,
        algorithm: &str,
        class_name: &str,
        aliases: A,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Arc<Service>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut service = Service::new(service_type, algorithm, class_name).with_aliases(aliases);
        for (name, value) in attributes {
            service = service.with_attribute(name, value);
        }
        self.put_service(service)
    }

    /// Remove the structured service answering to `algorithm` (or one of
    /// its aliases) of `service_type`.
    pub fn remove_service(&self, service_type: &str, algorithm: &str) -> Option<Arc<Service>> {
        let mut state = self.state.lock();
        let key = state.structured_key(&ServiceKey::new(service_type, algorithm))?;
        state.aliases.retain(|_, target| *target != key);
        state.services.shift_remove(&key)
    }

    /// Set a legacy property, returning the previous value.
    pub fn put(&self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let mut state = self.state.lock();
        state.legacy_changed = true;
        state.properties.insert(name.into(), value.into())
    }

    /// Remove a legacy property, returning its value.
    pub fn remove(&self, name: &str) -> Option<String> {
        let mut state = self.state.lock();
        let removed = state.properties.shift_remove(name);
        if removed.is_some() {
            state.legacy_changed = true;
        }
        removed
    }

    /// The value of a legacy property.
    pub fn property(&self, name: &str) -> Option<String> {
        self.state.lock().properties.get(name).cloned()
    }

    /// The service for `algorithm` of `service_type`, ignoring case and
    /// resolving aliases.
    pub fn service(&self, service_type: &str, algorithm: &str) -> Option<Arc<Service>> {
        let key = ServiceKey::new(service_type, algorithm);
        let mut state = self.state.lock();
        if let Some(service) = state.structured(&key) {
            return Some(service);
        }
        self.parse_legacy(&mut state);
        state.legacy(&key)
    }

    /// Every service, structured ones first. Legacy services shadowed by a
    /// structured one are left out.
    pub fn services(&self) -> Vec<Arc<Service>> {
        let mut state = self.state.lock();
        self.parse_legacy(&mut state);

        let mut services: Vec<_> = state.services.values().cloned().collect();
        services.extend(
            state
                .legacy
                .iter()
                .filter(|(key, _)| !state.services.contains_key(*key))
                .map(|(_, service)| service.clone()),
        );
        services
    }

    fn parse_legacy(&self, state: &mut ProviderState) {
        if !state.legacy_changed {
            return;
        }

        let mut entries: IndexMap<ServiceKey, LegacyEntry> = IndexMap::new();
        let mut aliases = HashMap::new();
        for (name, value) in &state.properties {
            if name.starts_with(PROVIDER_PREFIX) {
                continue;
            }
            if let Some(rest) = name.strip_prefix(ALIAS_PREFIX) {
                let Some((service_type, alias)) = split_type(rest) else {
                    tracing::warn!(
                        provider = %self.name,
                        %name,
                        "ignoring invalid entry in provider"
                    );
                    continue;
                };
                let standard = value.trim();
                let key = ServiceKey::new(service_type, standard);
                entries
                    .entry(key.clone())
                    .or_insert_with(|| LegacyEntry::new(service_type, standard))
                    .aliases
                    .push(alias.to_owned());
                aliases.insert(ServiceKey::new(service_type, alias), key);
                continue;
            }

            let Some((service_type, rest)) = split_type(name) else {
                tracing::warn!(provider = %self.name, %name, "ignoring invalid entry in provider");
                continue;
            };
            match rest.split_once(' ') {
                None => {
                    entries
                        .entry(ServiceKey::new(service_type, rest))
                        .or_insert_with(|| LegacyEntry::new(service_type, rest))
                        .class_name = Some(value.trim().to_owned());
                }
                Some((algorithm, attribute)) => {
                    entries
                        .entry(ServiceKey::new(service_type, algorithm))
                        .or_insert_with(|| LegacyEntry::new(service_type, algorithm))
                        .attributes
                        .push((attribute.trim().to_owned(), value.trim().to_owned()));
                }
            }
        }

        let mut legacy = IndexMap::with_capacity(entries.len());
        for (key, entry) in entries {
            let Some(class_name) = entry.class_name.filter(|class_name| !class_name.is_empty())
            else {
                tracing::warn!(
                    provider = %self.name,
                    service_type = %entry.service_type,
                    algorithm = %entry.algorithm,
                    "ignoring invalid entry in provider"
                );
                continue;
            };
            let mut service = Service::new(&entry.service_type, entry.algorithm, class_name)
                .with_aliases(entry.aliases);
            for (name, value) in entry.attributes {
                service.set_attribute(name, value);
            }
            legacy.insert(key, Arc::new(service.bind(&self.name, &self.catalog)));
        }
        aliases.retain(|_, target| legacy.contains_key(target));

        state.legacy = legacy;
        state.legacy_aliases = aliases;
        state.legacy_changed = false;
    }
}

fn split_type(name: &str) -> Option<(&str, &str)> {
    let (service_type, rest) = name.split_once('.')?;
    if service_type.is_empty() || rest.is_empty() {
        return None;
    }
    Some((service_type, rest))
}

impl Debug for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} version {}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn provider() -> Provider {
        Provider::new("Example", "1.0", "test provider")
    }

    #[test]
    fn it_parses_legacy_properties() -> TestResult {
        let provider = provider();
        provider.put("Signature.SHA256withRSA", "example.RsaSha256");
        provider.put("Signature.SHA256withRSA SupportedKeyClasses", "RSAPrivateKey|RSAPublicKey");
        provider.put("Alg.Alias.Signature.1.2.840.113549.1.1.11", "SHA256withRSA");

        let service = provider
            .service("signature", "1.2.840.113549.1.1.11")
            .ok_or("missing")?;
        assert_eq!(service.service_type(), "Signature");
        assert_eq!(service.algorithm(), "SHA256withRSA");
        assert_eq!(service.class_name(), "example.RsaSha256");
        assert_eq!(service.provider(), "Example");
        assert_eq!(service.aliases(), &["1.2.840.113549.1.1.11".to_owned()]);
        assert_eq!(
            service.attribute("SupportedKeyClasses"),
            Some("RSAPrivateKey|RSAPublicKey")
        );
        Ok(())
    }

    #[test]
    fn it_reparses_after_properties_change() -> TestResult {
        let provider = provider();
        provider.put("MessageDigest.MD5", "example.Md5");
        assert!(provider.service("MessageDigest", "MD5").is_some());

        provider.remove("MessageDigest.MD5");
        provider.put("MessageDigest.SHA-1", "example.Sha1");

        assert!(provider.service("MessageDigest", "MD5").is_none());
        assert_eq!(
            provider
                .service("MessageDigest", "SHA-1")
                .ok_or("missing")?
                .class_name(),
            "example.Sha1"
        );
        Ok(())
    }

    #[test_log::test]
    fn it_drops_entries_without_a_class_name() {
        let provider = provider();
        provider.put("Cipher.AES SupportedKeyFormats", "RAW");
        provider.put("Alg.Alias.Cipher.Rijndael", "AES");
        provider.put("NoDot", "example.Nothing");
        provider.put("Provider.id name", "Example");

        assert!(provider.service("Cipher", "AES").is_none());
        assert!(provider.service("Cipher", "Rijndael").is_none());
        assert!(provider.services().is_empty());
    }

    #[test]
    fn it_prefers_structured_services() -> TestResult {
        let provider = provider();
        provider.put("MessageDigest.SHA-256", "example.LegacySha256");
        provider.put_service(Service::new("MessageDigest", "SHA-256", "example.Sha256"));

        let service = provider.service("MessageDigest", "sha-256").ok_or("missing")?;
        assert_eq!(service.class_name(), "example.Sha256");
        assert_eq!(provider.services().len(), 1);

        provider.remove_service("MessageDigest", "SHA-256");
        let service = provider.service("MessageDigest", "sha-256").ok_or("missing")?;
        assert_eq!(service.class_name(), "example.LegacySha256");
        Ok(())
    }

    #[test]
    fn it_removes_structured_services_by_alias() -> TestResult {
        let provider = provider();
        provider.register(
            "MessageDigest",
            "SHA-256",
            "example.Sha256",
            ["SHA256"],
            [("ImplementedIn", "Software")],
        );

        let removed = provider.remove_service("MessageDigest", "sha256").ok_or("missing")?;
        assert_eq!(removed.algorithm(), "SHA-256");
        assert!(provider.service("MessageDigest", "SHA256").is_none());
        assert!(provider.service("MessageDigest", "SHA-256").is_none());
        Ok(())
    }
}
