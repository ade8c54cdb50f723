use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum GatehouseCommonError {
    /// A code source location could not be parsed as a URL
    #[error("Invalid code source location '{location}': {reason}")]
    InvalidLocation {
        /// The location as it was given
        location: String,
        /// Why the location was rejected
        reason: String,
    },
}
