#![warn(missing_docs)]

//! Permissions and the `implies` relation.
//!
//! A [`Permission`] is a typed, named and optionally parameterized assertion
//! such as "read access to `/tmp/*`". Permissions are compared with
//! [`Permission::implies`]: holding `a` is sufficient to justify `b` when
//! `a.implies(b)`. The relation is neither symmetric nor equality.
//!
//! ```rust
//! use gatehouse_permission::{FilePermission, Permission, Permissions};
//! # fn main() -> Result<(), gatehouse_permission::GatehousePermissionError> {
//! let mut granted = Permissions::new();
//! granted.add(FilePermission::new("/tmp/*", "read")?.shared())?;
//! granted.add(FilePermission::new("/tmp/*", "write")?.shared())?;
//!
//! // Actions granted by separate entries combine.
//! assert!(granted.implies(&FilePermission::new("/tmp/report", "read,write")?));
//! assert!(!granted.implies(&FilePermission::new("/tmp/a/b", "read")?));
//! # Ok(())
//! # }
//! ```
//!
//! Permission kinds that are not known when a policy is parsed are kept as
//! [`UnresolvedPermission`]s and turned into real permissions later through a
//! [`PermissionResolver`], which maps kind names to constructor factories.

mod error;
pub use error::*;

mod permission;
pub use permission::*;

mod basic;
pub use basic::*;

mod file;
pub use file::*;

mod collection;
pub use collection::*;

mod unresolved;
pub use unresolved::*;

mod resolver;
pub use resolver::*;
