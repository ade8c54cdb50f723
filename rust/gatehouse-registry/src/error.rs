use thiserror::Error;

/// A boxed error raised by an implementation factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum GatehouseRegistryError {
    /// No provider offers the requested algorithm
    #[error("{algorithm} {service_type} not available")]
    NoSuchAlgorithm {
        /// The requested service type
        service_type: String,
        /// The requested algorithm
        algorithm: String,
    },

    /// No provider with the given name is installed
    #[error("Provider {0} not found")]
    NoSuchProvider(String),

    /// A service was found but its implementation could not be constructed
    #[error(
        "Error constructing implementation (algorithm: {algorithm}, provider: {provider}, class: {class_name})"
    )]
    Construction {
        /// The algorithm being constructed
        algorithm: String,
        /// The provider offering it
        provider: String,
        /// The implementation class name of the service
        class_name: String,
        /// Why construction failed
        #[source]
        source: BoxError,
    },

    /// A parameter was passed that the service type does not accept
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A filter or attribute value is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
