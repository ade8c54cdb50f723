use std::any::Any;
use std::fmt::Debug;

/// Parameter kind accepted by `SecureRandom` engines.
pub const SECURE_RANDOM_PARAMETERS: &str = "SecureRandomParameters";
/// Parameter kind accepted by `CertStore` engines.
pub const CERT_STORE_PARAMETERS: &str = "CertStoreParameters";
/// Parameter kind accepted by `Policy` engines.
pub const POLICY_PARAMETERS: &str = "PolicyParameters";
/// Parameter kind accepted by `Configuration` engines.
pub const CONFIGURATION_PARAMETERS: &str = "ConfigurationParameters";
/// Accepts a parameter of any kind.
pub const ANY_PARAMETER: &str = "Object";

/// A value handed to an implementation factory at construction time.
pub trait EngineParameter: Debug + Send + Sync {
    /// The kind of this parameter, matched against
    /// [`EngineDescription::constructor_parameter`].
    fn parameter_kind(&self) -> &str;

    /// Access the concrete parameter.
    fn as_any(&self) -> &dyn Any;
}

/// How implementations of a well-known service type are constructed and
/// whether they can be asked about keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineDescription {
    /// Canonical name of the service type.
    pub name: &'static str,
    /// Whether [`Service::supports_parameter`](crate::Service::supports_parameter)
    /// applies to this type.
    pub supports_parameter: bool,
    /// Kind of the single constructor parameter, if implementations take
    /// one.
    pub constructor_parameter: Option<&'static str>,
}

const fn engine(
    name: &'static str,
    supports_parameter: bool,
    constructor_parameter: Option<&'static str>,
) -> EngineDescription {
    EngineDescription {
        name,
        supports_parameter,
        constructor_parameter,
    }
}

static ENGINES: &[EngineDescription] = &[
    engine("AlgorithmParameterGenerator", false, None),
    engine("AlgorithmParameters", false, None),
    engine("KeyFactory", false, None),
    engine("KeyPairGenerator", false, None),
    engine("KeyStore", false, None),
    engine("MessageDigest", false, None),
    engine("SecureRandom", false, Some(SECURE_RANDOM_PARAMETERS)),
    engine("Signature", true, None),
    engine("CertificateFactory", false, None),
    engine("CertPathBuilder", false, None),
    engine("CertPathValidator", false, None),
    engine("CertStore", false, Some(CERT_STORE_PARAMETERS)),
    engine("Cipher", true, None),
    engine("ExemptionMechanism", false, None),
    engine("Mac", true, None),
    engine("KeyAgreement", true, None),
    engine("KeyGenerator", false, None),
    engine("SecretKeyFactory", false, None),
    engine("KEM", true, None),
    engine("KeyManagerFactory", false, None),
    engine("SSLContext", false, None),
    engine("TrustManagerFactory", false, None),
    engine("GssApiMechanism", false, None),
    engine("SaslClientFactory", false, None),
    engine("SaslServerFactory", false, None),
    engine("Policy", false, Some(POLICY_PARAMETERS)),
    engine("Configuration", false, Some(CONFIGURATION_PARAMETERS)),
    engine("XMLSignatureFactory", false, None),
    engine("KeyInfoFactory", false, None),
    engine("TransformService", false, None),
    engine("TerminalFactory", false, Some(ANY_PARAMETER)),
];

/// Look up the description of a well-known service type, ignoring case.
pub fn engine_description(service_type: &str) -> Option<&'static EngineDescription> {
    ENGINES
        .iter()
        .find(|engine| engine.name == service_type)
        .or_else(|| {
            ENGINES
                .iter()
                .find(|engine| engine.name.eq_ignore_ascii_case(service_type))
        })
}

/// The canonical spelling of `service_type`. Unknown types are returned
/// unchanged.
pub fn canonical_type(service_type: &str) -> &str {
    match engine_description(service_type) {
        Some(engine) => engine.name,
        None => service_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_canonicalizes_well_known_types() {
        assert_eq!(canonical_type("messagedigest"), "MessageDigest");
        assert_eq!(canonical_type("SSLCONTEXT"), "SSLContext");
        assert_eq!(canonical_type("Frobnicator"), "Frobnicator");
    }

    #[test]
    fn it_describes_constructor_contracts() {
        let random = engine_description("securerandom").map(|engine| engine.constructor_parameter);
        assert_eq!(random, Some(Some(SECURE_RANDOM_PARAMETERS)));

        let signature = engine_description("Signature");
        assert!(signature.is_some_and(|engine| engine.supports_parameter));
        assert!(
            engine_description("MessageDigest").is_some_and(|engine| !engine.supports_parameter)
        );
    }
}
