#![warn(missing_docs)]

//! An ordered registry of algorithm providers.
//!
//! A [`Provider`] offers [`Service`]s, each naming an algorithm of some
//! service type (e.g. `SHA-256` of `MessageDigest`). The [`Registry`]
//! consults its providers in preference order: the first provider offering
//! an algorithm answers lookups, and instantiation falls over to later
//! providers when construction fails.
//!
//! Implementations are built by factories rather than by reflection. A
//! service either carries its own factory or names a class that its
//! provider's [`ImplementationCatalog`] knows how to construct.

mod error;
pub use error::*;

mod engine;
pub use engine::*;

mod catalog;
pub use catalog::*;

mod service;
pub use service::*;

mod provider;
pub use provider::*;

mod registry;
pub use registry::*;
