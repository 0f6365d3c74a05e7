//! Core in-process logic for the scanline cache: the Holder, the lazy remote
//! reference that backs mirrored scanlines, and the `Environment` injection
//! trait shared by every periodic task.
//!
//! # Components
//!
//! - [`holder`]: the concurrent two-level map and the lazy remote reference.
//! - [`env`]: the `Environment` trait that decouples the Cleaner and
//!   Heartbeat emitter from system time, so their interval logic can be
//!   tested without real sleeps.
//! - [`error`]: the error enum shared across both.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod holder;

pub use env::Environment;
pub use error::HolderError;
pub use holder::{Announcer, Holder, LazyRemoteReference, PayloadSource, RemoteFetch};
