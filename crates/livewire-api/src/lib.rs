// livewire-api: wire transport for the livewire event subscription layer

pub mod error;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use transport::{EventTransport, Teardown, WireEvent};
pub use websocket::{ReconnectConfig, WsTransport};
