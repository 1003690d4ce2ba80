//! Shared types for the OAuth session workspace
//!
//! Holds the environment seams every other crate is written against: a
//! wall clock, a navigator standing in for the browser location, and the
//! `Secret` wrapper used for client secrets and tokens.

mod clock;
mod error;
mod navigator;
mod secret;
mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use navigator::{MemoryNavigator, Navigator};
pub use secret::Secret;
pub use sync::MutexExt;
