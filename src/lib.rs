//! Local side of an agent bridge.
//!
//! The bridge keeps one WebSocket open to a remote agent. Over it the bridge
//! sends the user's prompts (and correlates the answers), and it serves the
//! agent's JSON-RPC `tools/list` and `tools/call` requests by editing a local
//! resource through a [`ResourceAdapter`].

pub mod adapter;
pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod tracker;
pub mod transport;

pub use adapter::{
    AdapterError, FieldDescriptor, FieldKind, FieldOption, ResourceAdapter, ResourceLocation,
};
pub use bridge::{Bridge, BridgeEvent, BridgeHandle};
pub use config::BridgeConfig;
pub use context::BridgeContext;
pub use error::{BridgeError, RpcError};
pub use memory::{FieldValue, MemoryForm};
pub use protocol::AgentOutcome;
pub use transport::SessionState;
