//! The plugin RPC bridge: listeners (plain or middleware), plugin-provided
//! commands, and outbound message delivery. See `devzat-proto` for the wire
//! contract and `original_source/rpc.go` for the behavior this ports.

mod listeners;
mod middleware;
mod registry;
mod server;

pub use listeners::PassiveListeners;
pub use middleware::{MiddlewareChain, MiddlewareSlot};
pub use registry::PluginCommandRegistry;
pub use server::PluginService;
