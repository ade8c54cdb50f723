use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Weak};

use gatehouse_common::Key;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    ANY_PARAMETER, BoxError, EngineParameter, GatehouseRegistryError, Implementation,
    ImplementationCatalog, Implementor, canonical_type, engine_description,
};

/// Pipe-delimited key formats a key-consuming service accepts.
pub const SUPPORTED_KEY_FORMATS: &str = "SupportedKeyFormats";
/// Pipe-delimited key kinds a key-consuming service accepts.
pub const SUPPORTED_KEY_CLASSES: &str = "SupportedKeyClasses";
/// Largest key size a service supports.
pub const KEY_SIZE: &str = "KeySize";
/// Where a service is implemented, e.g. `Software` or `Hardware`.
pub const IMPLEMENTED_IN: &str = "ImplementedIn";

/// One algorithm offered by a provider.
///
/// A service is built with [`Service::new`] and handed to
/// [`Provider::put_service`](crate::Provider::put_service), after which it is
/// immutable. Its implementation is either a factory attached with
/// [`Service::with_factory`] or resolved by class name through the
/// provider's [`ImplementationCatalog`].
pub struct Service {
    service_type: String,
    algorithm: String,
    class_name: String,
    provider: String,
    aliases: Vec<String>,
    attributes: IndexMap<String, String>,
    direct: Option<Arc<Implementor>>,
    catalog: Option<Arc<ImplementationCatalog>>,
    resolved: Mutex<Weak<Implementor>>,
}

impl Service {
    /// Describe `algorithm` of `service_type`, implemented by `class_name`.
    pub fn new(
        service_type: impl AsRef<str>,
        algorithm: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            service_type: canonical_type(service_type.as_ref()).to_owned(),
            algorithm: algorithm.into(),
            class_name: class_name.into(),
            provider: String::new(),
            aliases: Vec::new(),
            attributes: IndexMap::new(),
            direct: None,
            catalog: None,
            resolved: Mutex::new(Weak::new()),
        }
    }

    /// Add an alternative name for the algorithm.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.add_alias(alias.into());
        self
    }

    /// Add several alternative names for the algorithm.
    pub fn with_aliases<I>(mut self, aliases: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for alias in aliases {
            self.add_alias(alias.into());
        }
        self
    }

    /// Set an attribute. Attribute names are case-insensitive.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name.into(), value.into());
        self
    }

    /// Construct implementations with `factory` instead of resolving the
    /// class name.
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(Option<&dyn EngineParameter>) -> Result<Implementation, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.direct = Some(Arc::new(Implementor::new(
            self.class_name.clone(),
            Box::new(factory),
        )));
        self
    }

    pub(crate) fn add_alias(&mut self, alias: String) {
        if !self
            .aliases
            .iter()
            .any(|known| known.eq_ignore_ascii_case(&alias))
        {
            self.aliases.push(alias);
        }
    }

    pub(crate) fn set_attribute(&mut self, name: String, value: String) {
        if let Some(existing) = self
            .attributes
            .keys()
            .find(|existing| existing.eq_ignore_ascii_case(&name))
            .cloned()
        {
            self.attributes.shift_remove(&existing);
        }
        self.attributes.insert(name, value);
    }

    pub(crate) fn bind(mut self, provider: &str, catalog: &Arc<ImplementationCatalog>) -> Self {
        self.provider = provider.to_owned();
        self.catalog = Some(catalog.clone());
        self
    }

    /// The canonical service type, e.g. `MessageDigest`.
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// The standard name of the algorithm.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The implementation class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Name of the provider offering this service.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Alternative names of the algorithm.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Every attribute, in registration order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The value of attribute `name`, ignoring case.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn attribute_list(&self, name: &str) -> Option<Vec<&str>> {
        self.attribute(name).map(|value| {
            value
                .split('|')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .collect()
        })
    }

    /// Whether `name` names this service's algorithm, directly or through
    /// an alias.
    pub fn is_named(&self, name: &str) -> bool {
        self.algorithm.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }

    /// Whether this service can be used with `key`.
    ///
    /// Services of unknown types accept anything, and so do services that
    /// declare neither [`SUPPORTED_KEY_FORMATS`] nor
    /// [`SUPPORTED_KEY_CLASSES`]. Otherwise the key's format or one of its
    /// kinds has to be listed. Asking a well-known type that never consumes
    /// keys is an error.
    pub fn supports_parameter(
        &self,
        key: Option<&dyn Key>,
    ) -> Result<bool, GatehouseRegistryError> {
        let Some(engine) = engine_description(&self.service_type) else {
            return Ok(true);
        };
        if !engine.supports_parameter {
            return Err(GatehouseRegistryError::InvalidParameter(format!(
                "supports_parameter() not used with {} engines",
                self.service_type
            )));
        }

        let formats = self.attribute_list(SUPPORTED_KEY_FORMATS);
        let classes = self.attribute_list(SUPPORTED_KEY_CLASSES);
        if formats.is_none() && classes.is_none() {
            return Ok(true);
        }
        let Some(key) = key else {
            return Ok(false);
        };

        if let (Some(formats), Some(format)) = (&formats, key.format()) {
            if formats.contains(&format) {
                return Ok(true);
            }
        }
        Ok(classes.is_some_and(|classes| classes.iter().any(|kind| key.is_kind(kind))))
    }

    /// Construct a new implementation of this service.
    ///
    /// `parameter` has to match the constructor contract of the service
    /// type: types that take no parameter reject one, and types that take a
    /// particular kind reject any other.
    pub fn new_instance(
        &self,
        parameter: Option<&dyn EngineParameter>,
    ) -> Result<Implementation, GatehouseRegistryError> {
        self.check_constructor_parameter(parameter)?;

        let implementor = self.implementor().ok_or_else(|| {
            self.construction_error(
                format!("no implementation registered for class {}", self.class_name).into(),
            )
        })?;
        implementor
            .construct(parameter)
            .map_err(|source| self.construction_error(source))
    }

    fn check_constructor_parameter(
        &self,
        parameter: Option<&dyn EngineParameter>,
    ) -> Result<(), GatehouseRegistryError> {
        let (Some(engine), Some(parameter)) = (engine_description(&self.service_type), parameter)
        else {
            return Ok(());
        };
        match engine.constructor_parameter {
            None => Err(GatehouseRegistryError::InvalidParameter(format!(
                "constructor parameter not used with {} engines",
                self.service_type
            ))),
            Some(expected)
                if expected != ANY_PARAMETER && parameter.parameter_kind() != expected =>
            {
                Err(GatehouseRegistryError::InvalidParameter(format!(
                    "constructor parameter must be {expected} for engine type {}",
                    self.service_type
                )))
            }
            Some(_) => Ok(()),
        }
    }

    fn implementor(&self) -> Option<Arc<Implementor>> {
        if let Some(direct) = &self.direct {
            return Some(direct.clone());
        }
        let mut resolved = self.resolved.lock();
        if let Some(implementor) = resolved.upgrade() {
            return Some(implementor);
        }
        let implementor = self.catalog.as_ref()?.implementor(&self.class_name)?;
        *resolved = Arc::downgrade(&implementor);
        Some(implementor)
    }

    fn construction_error(&self, source: BoxError) -> GatehouseRegistryError {
        GatehouseRegistryError::Construction {
            algorithm: self.algorithm.clone(),
            provider: self.provider.clone(),
            class_name: self.class_name.clone(),
            source,
        }
    }
}

impl Debug for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("service_type", &self.service_type)
            .field("algorithm", &self.algorithm)
            .field("class_name", &self.class_name)
            .field("provider", &self.provider)
            .field("aliases", &self.aliases)
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}.{} -> {}",
            self.provider, self.service_type, self.algorithm, self.class_name
        )?;
        if !self.aliases.is_empty() {
            write!(f, " aliases: [{}]", self.aliases.join(", "))?;
        }
        if !self.attributes.is_empty() {
            let attributes = self
                .attributes
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>();
            write!(f, " attributes: {{{}}}", attributes.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Provider, SECURE_RANDOM_PARAMETERS};
    use gatehouse_common::{KeyMaterial, SecretKey};
    use pretty_assertions::assert_eq;
    use std::any::Any;
    use testresult::TestResult;

    #[derive(Debug)]
    struct Seed(&'static str);

    impl EngineParameter for Seed {
        fn parameter_kind(&self) -> &str {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn aes_key(format: &str) -> SecretKey {
        SecretKey::from(KeyMaterial::new("AES", Some(format), vec![0u8; 16]))
    }

    #[test]
    fn it_accepts_every_key_without_key_attributes() -> TestResult {
        let cipher = Service::new("Cipher", "AES", "example.Aes");

        assert!(cipher.supports_parameter(Some(&aes_key("RAW")))?);
        assert!(cipher.supports_parameter(None)?);
        Ok(())
    }

    #[test]
    fn it_matches_keys_by_format_or_kind() -> TestResult {
        let by_format = Service::new("Cipher", "AES", "example.Aes")
            .with_attribute(SUPPORTED_KEY_FORMATS, "RAW|PKCS#8");
        let by_kind = Service::new("Mac", "HmacSHA256", "example.Hmac")
            .with_attribute("supportedkeyclasses", "SecretKey");

        assert!(by_format.supports_parameter(Some(&aes_key("RAW")))?);
        assert!(!by_format.supports_parameter(Some(&aes_key("X.509")))?);
        assert!(!by_format.supports_parameter(None)?);
        assert!(by_kind.supports_parameter(Some(&aes_key("X.509")))?);
        Ok(())
    }

    #[test]
    fn it_rejects_key_questions_for_engines_without_keys() {
        let digest = Service::new("MessageDigest", "SHA-256", "example.Sha256");

        assert!(matches!(
            digest.supports_parameter(None),
            Err(GatehouseRegistryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn it_enforces_the_constructor_contract() -> TestResult {
        let provider = Provider::new("Example", "1.0", "test provider");
        provider.put_service(
            Service::new("SecureRandom", "DRBG", "example.Drbg")
                .with_factory(|parameter| Ok(Box::new(parameter.is_some()))),
        );
        provider.put_service(
            Service::new("MessageDigest", "SHA-256", "example.Sha256")
                .with_factory(|_| Ok(Box::new(()))),
        );
        let random = provider.service("SecureRandom", "DRBG").ok_or("missing")?;
        let digest = provider.service("MessageDigest", "SHA-256").ok_or("missing")?;

        let seeded = random.new_instance(Some(&Seed(SECURE_RANDOM_PARAMETERS)))?;
        assert_eq!(seeded.downcast_ref::<bool>(), Some(&true));

        let wrong = random.new_instance(Some(&Seed("CertStoreParameters")));
        assert!(matches!(wrong, Err(GatehouseRegistryError::InvalidParameter(_))));

        let unused = digest.new_instance(Some(&Seed(SECURE_RANDOM_PARAMETERS)));
        assert!(matches!(unused, Err(GatehouseRegistryError::InvalidParameter(_))));
        Ok(())
    }

    #[test]
    fn it_reports_failed_construction_with_its_origin() -> TestResult {
        let provider = Provider::new("Example", "1.0", "test provider");
        provider.put_service(
            Service::new("MessageDigest", "SHA-256", "example.Sha256")
                .with_factory(|_| Err("hardware unavailable".into())),
        );
        let service = provider.service("MessageDigest", "SHA-256").ok_or("missing")?;

        let error = service.new_instance(None).err().ok_or("expected failure")?;
        assert_eq!(
            error.to_string(),
            "Error constructing implementation (algorithm: SHA-256, provider: Example, class: example.Sha256)"
        );
        assert_eq!(
            std::error::Error::source(&error).map(ToString::to_string),
            Some("hardware unavailable".to_owned())
        );
        Ok(())
    }

    #[test]
    fn it_releases_unregistered_classes() -> TestResult {
        let provider = Provider::new("Example", "1.0", "test provider");
        provider
            .catalog()
            .register("example.Sha256", |_| Ok(Box::new("sha-256")));
        provider.put_service(Service::new("MessageDigest", "SHA-256", "example.Sha256"));
        let service = provider.service("MessageDigest", "SHA-256").ok_or("missing")?;

        service.new_instance(None)?;
        provider.catalog().unregister("example.Sha256");

        assert!(matches!(
            service.new_instance(None),
            Err(GatehouseRegistryError::Construction { .. })
        ));
        Ok(())
    }
}
