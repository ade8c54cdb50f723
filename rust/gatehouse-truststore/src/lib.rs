#![warn(missing_docs)]

//! Trust stores: keyed collections of private keys with their certificate
//! chains, secret keys and trusted certificates.
//!
//! A [`TrustStore`] delegates storage to a [`TrustStoreBackend`] selected by
//! type, either directly or through a [`Registry`](gatehouse_registry::Registry)
//! offering backends as [`TRUSTSTORE_SERVICE`] algorithms. The store has to
//! be loaded before it can be used:
//!
//! ```rust
//! use gatehouse_truststore::{GatehouseTrustStoreError, MemoryTrustStore, TrustStore};
//!
//! let store = TrustStore::new("memory", MemoryTrustStore::new());
//! assert!(matches!(store.aliases(), Err(GatehouseTrustStoreError::Uninitialized)));
//!
//! store.load(None, None).unwrap();
//! assert!(store.aliases().unwrap().is_empty());
//! ```

mod error;
pub use error::*;

mod entry;
pub use entry::*;

mod protection;
pub use protection::*;

mod backend;
pub use backend::*;

mod memory;
pub use memory::*;

mod store;
pub use store::*;
