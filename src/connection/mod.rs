pub mod backoff;
pub mod manager;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use manager::ConnectionManager;
pub use transport::{ChannelConnector, Connector, Link, PendingOpen, RemoteEnd, WsConnector};
