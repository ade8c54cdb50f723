#![warn(missing_docs)]

//! Identity primitives shared by the gatehouse crates.
//!
//! Nothing in here makes an authorization decision. These are the values
//! that decisions are made _about_: the [`CodeSource`] a piece of code was
//! loaded from, the [`Certificate`]s it was signed with, the [`Principal`]s
//! it runs on behalf of, and the opaque [`Key`] material that the algorithm
//! registry and the trust store pass around.

mod error;
pub use error::*;

mod encoding;

mod key;
pub use key::*;

mod certificate;
pub use certificate::*;

mod code_source;
pub use code_source::*;

mod principal;
pub use principal::*;
