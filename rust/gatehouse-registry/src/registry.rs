use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use gatehouse_common::Key;
use parking_lot::RwLock;

use crate::{
    EngineParameter, GatehouseRegistryError, Implementation, KEY_SIZE, Provider, Service,
};

/// An implementation together with the service it was constructed from.
pub struct Instance {
    service: Arc<Service>,
    implementation: Implementation,
}

impl Instance {
    /// The service that constructed this instance.
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Name of the provider that constructed this instance.
    pub fn provider(&self) -> &str {
        self.service.provider()
    }

    /// The implementation.
    pub fn implementation(&self) -> &(dyn Any + Send) {
        self.implementation.as_ref()
    }

    /// Take the implementation.
    pub fn into_implementation(self) -> Implementation {
        self.implementation
    }

    /// Take the implementation as a `T`, or get the instance back if it is
    /// something else.
    pub fn downcast<T: Any>(self) -> Result<Box<T>, Self> {
        let Self {
            service,
            implementation,
        } = self;
        implementation
            .downcast::<T>()
            .map_err(|implementation| Self {
                service,
                implementation,
            })
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// The installed providers, most preferred first.
///
/// Every lookup consults the providers in order and the first one offering
/// the algorithm wins. Instantiation falls over to the next provider when
/// construction fails, and reports the last failure once every provider has
/// been tried.
///
/// ```rust
/// use gatehouse_registry::{Provider, Registry, Service};
/// # fn main() -> Result<(), gatehouse_registry::GatehouseRegistryError> {
/// let provider = Provider::new("Example", "1.0", "example provider");
/// provider.put_service(
///     Service::new("MessageDigest", "SHA-256", "example.Sha256")
///         .with_factory(|_| Ok(Box::new(String::from("sha-256")))),
/// );
///
/// let registry = Registry::new();
/// registry.add_provider(provider);
///
/// let digest = registry.instance_of::<String>("MessageDigest", "sha-256")?;
/// assert_eq!(*digest, "sha-256");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    providers: RwLock<Vec<Arc<Provider>>>,
}

impl Registry {
    /// A registry without providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `providers` in the order given.
    pub fn with_providers<I>(providers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arc<Provider>>,
    {
        let registry = Self::new();
        for provider in providers {
            registry.add_provider(provider);
        }
        registry
    }

    /// A registry holding the `available` providers named in `preference`,
    /// in that order, followed by the remaining ones in their original
    /// order.
    pub fn with_preference<I>(preference: &[impl AsRef<str>], available: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arc<Provider>>,
    {
        let mut remaining: Vec<Arc<Provider>> = available.into_iter().map(Into::into).collect();
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in preference {
            let name = name.as_ref();
            match remaining.iter().position(|provider| provider.name() == name) {
                Some(index) => ordered.push(remaining.remove(index)),
                None => tracing::warn!(provider = %name, "preferred provider is not available"),
            }
        }
        ordered.extend(remaining);
        Self::with_providers(ordered)
    }

    /// Append `provider`. Returns its position, or `None` if a provider with
    /// the same name is already installed.
    pub fn add_provider(&self, provider: impl Into<Arc<Provider>>) -> Option<usize> {
        self.insert_provider_at(provider, usize::MAX)
    }

    /// Insert `provider` at `position` (clamped to the end). Returns the
    /// position it ended up at, or `None` if a provider with the same name
    /// is already installed.
    pub fn insert_provider_at(
        &self,
        provider: impl Into<Arc<Provider>>,
        position: usize,
    ) -> Option<usize> {
        let provider = provider.into();
        let mut providers = self.providers.write();
        if providers
            .iter()
            .any(|installed| installed.name() == provider.name())
        {
            return None;
        }
        let position = position.min(providers.len());
        tracing::debug!(provider = %provider, position, "installed provider");
        providers.insert(position, provider);
        Some(position)
    }

    /// Uninstall the provider called `name`.
    pub fn remove_provider(&self, name: &str) -> Option<Arc<Provider>> {
        let mut providers = self.providers.write();
        let index = providers.iter().position(|provider| provider.name() == name)?;
        tracing::debug!(provider = %name, "removed provider");
        Some(providers.remove(index))
    }

    /// The provider called `name`.
    pub fn provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers
            .read()
            .iter()
            .find(|provider| provider.name() == name)
            .cloned()
    }

    /// Every installed provider, most preferred first.
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        self.providers.read().clone()
    }

    /// The service of the most preferred provider offering `algorithm` of
    /// `service_type`.
    pub fn service(
        &self,
        service_type: &str,
        algorithm: &str,
    ) -> Result<Arc<Service>, GatehouseRegistryError> {
        self.providers()
            .iter()
            .find_map(|provider| provider.service(service_type, algorithm))
            .ok_or_else(|| no_such_algorithm(service_type, algorithm))
    }

    /// Every service offering `algorithm` of `service_type`, in provider
    /// order.
    pub fn services(&self, service_type: &str, algorithm: &str) -> Vec<Arc<Service>> {
        self.providers()
            .iter()
            .filter_map(|provider| provider.service(service_type, algorithm))
            .collect()
    }

    /// Standard names of every algorithm of `service_type` any provider
    /// offers.
    pub fn algorithms(&self, service_type: &str) -> BTreeSet<String> {
        self.providers()
            .iter()
            .flat_map(|provider| provider.services())
            .filter(|service| service.service_type().eq_ignore_ascii_case(service_type))
            .map(|service| service.algorithm().to_owned())
            .collect()
    }

    /// Construct `algorithm` of `service_type` with the most preferred
    /// provider that manages to.
    pub fn instance(
        &self,
        service_type: &str,
        algorithm: &str,
        parameter: Option<&dyn EngineParameter>,
    ) -> Result<Instance, GatehouseRegistryError> {
        let mut failure = None;
        for service in self.services(service_type, algorithm) {
            match construct(&service, parameter, &mut failure)? {
                Some(implementation) => {
                    return Ok(Instance {
                        service,
                        implementation,
                    });
                }
                None => continue,
            }
        }
        Err(failure.unwrap_or_else(|| no_such_algorithm(service_type, algorithm)))
    }

    /// Construct `algorithm` of `service_type` with the provider called
    /// `provider` only.
    pub fn instance_from(
        &self,
        provider: &str,
        service_type: &str,
        algorithm: &str,
        parameter: Option<&dyn EngineParameter>,
    ) -> Result<Instance, GatehouseRegistryError> {
        let provider = self
            .provider(provider)
            .ok_or_else(|| GatehouseRegistryError::NoSuchProvider(provider.to_owned()))?;
        let service = provider
            .service(service_type, algorithm)
            .ok_or_else(|| no_such_algorithm(service_type, algorithm))?;
        let implementation = service.new_instance(parameter)?;
        Ok(Instance {
            service,
            implementation,
        })
    }

    /// Construct `algorithm` of `service_type` with the most preferred
    /// provider whose service accepts `key`.
    pub fn instance_for_key(
        &self,
        service_type: &str,
        algorithm: &str,
        key: &dyn Key,
    ) -> Result<Instance, GatehouseRegistryError> {
        let services = self.services(service_type, algorithm);
        if services.is_empty() {
            return Err(no_such_algorithm(service_type, algorithm));
        }

        let mut failure = None;
        for service in services {
            if !service.supports_parameter(Some(key))? {
                continue;
            }
            if let Some(implementation) = construct(&service, None, &mut failure)? {
                return Ok(Instance {
                    service,
                    implementation,
                });
            }
        }
        Err(failure.unwrap_or_else(|| {
            GatehouseRegistryError::InvalidParameter(format!(
                "no installed provider supports this key: {} ({})",
                key.algorithm(),
                key.format().unwrap_or("unencoded")
            ))
        }))
    }

    /// Construct `algorithm` of `service_type` without a parameter and take
    /// it as a `T`.
    pub fn instance_of<T: Any>(
        &self,
        service_type: &str,
        algorithm: &str,
    ) -> Result<Box<T>, GatehouseRegistryError> {
        self.instance(service_type, algorithm, None)?
            .downcast::<T>()
            .map_err(|instance| GatehouseRegistryError::Construction {
                algorithm: instance.service.algorithm().to_owned(),
                provider: instance.service.provider().to_owned(),
                class_name: instance.service.class_name().to_owned(),
                source: format!("implementation is not a {}", std::any::type_name::<T>()).into(),
            })
    }

    /// Providers satisfying `filter`, in preference order.
    ///
    /// A filter is either `"<Type>.<Algorithm>"`, satisfied by providers
    /// offering the algorithm, or `"<Type>.<Algorithm> <Attribute>:<value>"`,
    /// which additionally requires the attribute to match. `KeySize` matches
    /// services supporting at least the given size; other attributes are
    /// compared ignoring case.
    pub fn providers_matching(
        &self,
        filter: &str,
    ) -> Result<Vec<Arc<Provider>>, GatehouseRegistryError> {
        self.providers_matching_all(&[filter])
    }

    /// Providers satisfying every one of `filters`, in preference order.
    pub fn providers_matching_all(
        &self,
        filters: &[&str],
    ) -> Result<Vec<Arc<Provider>>, GatehouseRegistryError> {
        let criteria = filters
            .iter()
            .map(|filter| Criterion::parse(filter))
            .collect::<Result<Vec<_>, _>>()?;

        let mut matching = Vec::new();
        for provider in self.providers() {
            let mut satisfied = true;
            for criterion in &criteria {
                if !criterion.is_satisfied_by(&provider)? {
                    satisfied = false;
                    break;
                }
            }
            if satisfied {
                matching.push(provider);
            }
        }
        Ok(matching)
    }
}

fn construct(
    service: &Service,
    parameter: Option<&dyn EngineParameter>,
    failure: &mut Option<GatehouseRegistryError>,
) -> Result<Option<Implementation>, GatehouseRegistryError> {
    match service.new_instance(parameter) {
        Ok(implementation) => Ok(Some(implementation)),
        Err(error @ GatehouseRegistryError::Construction { .. }) => {
            tracing::debug!(%service, %error, "construction failed, trying the next provider");
            *failure = Some(error);
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

fn no_such_algorithm(service_type: &str, algorithm: &str) -> GatehouseRegistryError {
    GatehouseRegistryError::NoSuchAlgorithm {
        service_type: service_type.to_owned(),
        algorithm: algorithm.to_owned(),
    }
}

#[derive(Debug)]
enum Requirement {
    Present,
    KeySize(u64),
    Equals(String, String),
}

#[derive(Debug)]
struct Criterion {
    service_type: String,
    algorithm: String,
    requirement: Requirement,
}

impl Criterion {
    fn parse(filter: &str) -> Result<Self, GatehouseRegistryError> {
        let invalid =
            || GatehouseRegistryError::InvalidConfiguration(format!("Invalid filter: '{filter}'"));

        let filter = filter.trim();
        let (service, attribute) = match filter.split_once(' ') {
            Some((service, attribute)) => (service, Some(attribute.trim())),
            None => (filter, None),
        };
        let (service_type, algorithm) = service.split_once('.').ok_or_else(invalid)?;
        if service_type.is_empty() || algorithm.is_empty() {
            return Err(invalid());
        }

        let requirement = match attribute {
            None => Requirement::Present,
            Some(attribute) => {
                let (name, value) = attribute.split_once(':').ok_or_else(invalid)?;
                let (name, value) = (name.trim(), value.trim());
                if name.is_empty() || value.is_empty() {
                    return Err(invalid());
                }
                if name.eq_ignore_ascii_case(KEY_SIZE) {
                    Requirement::KeySize(value.parse().map_err(|_| invalid())?)
                } else {
                    Requirement::Equals(name.to_owned(), value.to_owned())
                }
            }
        };

        Ok(Self {
            service_type: service_type.to_owned(),
            algorithm: algorithm.to_owned(),
            requirement,
        })
    }

    fn is_satisfied_by(&self, provider: &Provider) -> Result<bool, GatehouseRegistryError> {
        let Some(service) = provider.service(&self.service_type, &self.algorithm) else {
            return Ok(false);
        };
        match &self.requirement {
            Requirement::Present => Ok(true),
            Requirement::KeySize(requested) => {
                let Some(supported) = service.attribute(KEY_SIZE) else {
                    return Ok(false);
                };
                let supported: u64 = supported.trim().parse().map_err(|_| {
                    GatehouseRegistryError::InvalidConfiguration(format!(
                        "Invalid {KEY_SIZE} attribute '{supported}' of {service}"
                    ))
                })?;
                Ok(*requested <= supported)
            }
            Requirement::Equals(name, value) => Ok(service
                .attribute(name)
                .is_some_and(|actual| actual.trim().eq_ignore_ascii_case(value))),
        }
    }
}
