use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatehousePermissionError {
    /// A permission name is not valid for its kind
    #[error("Invalid {kind} name: '{name}'")]
    InvalidName {
        /// The permission kind
        kind: String,
        /// The rejected name
        name: String,
    },

    /// A permission actions string is not valid for its kind
    #[error("Invalid {kind} actions: '{actions}'")]
    InvalidActions {
        /// The permission kind
        kind: String,
        /// The rejected actions
        actions: String,
    },

    /// An attempt was made to add to a sealed collection
    #[error("Attempt to add a permission to a read-only collection")]
    ReadOnly,

    /// A permission factory has no constructor for the given arguments
    #[error("No {arity}-argument constructor registered for {kind}")]
    NoConstructor {
        /// The permission kind
        kind: String,
        /// Number of arguments that were supplied
        arity: usize,
    },
}
