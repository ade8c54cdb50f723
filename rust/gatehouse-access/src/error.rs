use gatehouse_common::GatehouseCommonError;
use gatehouse_permission::{GatehousePermissionError, SharedPermission};
use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum GatehouseAccessError {
    /// A permission check failed for at least one domain of the context
    #[error("Access denied {permission}")]
    AccessDenied {
        /// The permission that was requested
        permission: SharedPermission,
    },

    /// A policy or configuration value could not be used
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The backing data of a policy could not be read
    #[error("Failed to read policy source: {0}")]
    PolicySource(String),

    /// A permission could not be constructed
    #[error(transparent)]
    Permission(#[from] GatehousePermissionError),

    /// A code source or other identity value was malformed
    #[error(transparent)]
    Common(#[from] GatehouseCommonError),
}
