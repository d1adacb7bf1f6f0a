//! Desktop bridge: a host process owns the SQL database and serves clients
//! over a local socket.

mod client;
mod host;
pub mod protocol;

pub use client::BridgeClient;
pub use host::BridgeHost;

/// File name of the host socket inside the data directory.
pub const SOCKET_FILE_NAME: &str = "bridge.sock";
