#![warn(missing_docs)]

//! Access decisions for code running on behalf of protection domains.
//!
//! Every piece of code runs in a [`ProtectionDomain`]: where it came from,
//! what it is allowed to do, who it acts for. As code calls into other code
//! the thread's [execution stack](stack) records the domains involved, and a
//! permission check succeeds only if every one of them holds the permission.
//!
//! Privileged code can stop that walk at itself with
//! [`AccessController::run_privileged`], so that callers without a
//! permission can still use a trusted component that has it. Contexts can be
//! captured with [`AccessController::context`] and checked later on another
//! thread, and threads spawned through [`stack::spawn`] inherit the context
//! of their parent.
//!
//! What a domain holds is decided by the installed [`Policy`], whose answers
//! are cached per domain by a [`PolicyHandle`] until the policy is refreshed
//! or replaced. [`GrantPolicy`] is a policy built from grant entries.

mod error;
pub use error::*;

mod domain;
pub use domain::*;

mod context;
pub use context::*;

pub mod stack;

mod policy;
pub use policy::*;

mod grant;
pub use grant::*;

mod config;
pub use config::*;

mod controller;
pub use controller::*;
