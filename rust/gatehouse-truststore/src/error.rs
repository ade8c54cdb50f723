use gatehouse_access::GatehouseAccessError;
use gatehouse_registry::GatehouseRegistryError;
use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum GatehouseTrustStoreError {
    /// The store was used before it was loaded
    #[error("Trust store has not been loaded")]
    Uninitialized,

    /// An entry exists but could not be recovered with what was given
    #[error("Cannot recover entry '{alias}': {reason}")]
    Unrecoverable {
        /// The alias of the entry
        alias: String,
        /// Why recovery failed
        reason: String,
    },

    /// Stored data does not match its integrity tag
    #[error("Trust store integrity check failed: wrong password or corrupted data")]
    IntegrityCheckFailed,

    /// A protection parameter is not acceptable for the entry
    #[error("Invalid protection: {0}")]
    InvalidProtection(String),

    /// An entry or stored document is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Reading or writing the persisted store failed
    #[error("Trust store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted store could not be encoded or decoded
    #[error("Trust store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The current context may not perform the operation
    #[error(transparent)]
    Access(#[from] GatehouseAccessError),

    /// The backend could not be obtained from the registry
    #[error(transparent)]
    Registry(#[from] GatehouseRegistryError),
}
