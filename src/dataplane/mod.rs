//! Data plane components
//!
//! Binds the default and rebind adapters, decides per frame whether it
//! belongs to the target application, and rewrites it for the peer adapter.

mod binding;
mod checksum;
mod flow;
mod rebind;
mod session;

pub use binding::{find_capture_interface, AdapterBinding, GatewayBinding, RebindConfig, Role};
pub use checksum::{recompute, recompute_ipv4};
pub use flow::{FlowKey, FlowResolver};
pub use rebind::RebindEngine;
pub use session::Session;
