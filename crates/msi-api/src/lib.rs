// msi-api: wire layer for the De.MSI gateway SDK
//
// Cross-boundary message channel and its frames, the WebSocket port, and
// the REST collaborators (access tokens, orders, client listings, order
// room events).

pub mod access;
pub mod channel;
pub mod error;
pub mod events;
pub mod frame;
pub mod models;
pub mod orders;
pub mod transport;
pub mod websocket;

pub use access::{AccessClient, AccessOptions, Credentials, Environment};
pub use channel::{Ack, AckId, Channel, ConnectionState, Connector, Handler, HandlerId, MessageChannel, Port, Responder};
pub use error::Error;
pub use frame::{AckResult, Frame};
pub use orders::{ClientApi, OrderClient};
pub use websocket::WebSocketConnector;
