//! Rebind - per-application adapter rebinding
//!
//! Moves the traffic of one application from the default network adapter to a
//! secondary adapter by rewriting captured link-layer frames in both
//! directions. The application itself is left untouched.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod host;
pub mod process;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
