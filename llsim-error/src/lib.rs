//! # llsim-error
//!
//! Unified error handling for llsim, following OpenDAL's error handling practices.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., BackendTimeout, ParseFailure)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use llsim_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::UnknownAction, "action 'fly' is not registered")
//!         .with_operation("executor::apply")
//!         .with_context("agent", "agent-3")
//!         .with_context("action", "fly"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All library functions return `Result<T, llsim_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using llsim Error
pub type Result<T> = std::result::Result<T, Error>;
