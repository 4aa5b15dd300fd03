//! A CoAP multicast discovery and observe client/server.
//!
//! The crate carries a small CoAP-over-UDP stack: a message codec
//! ([`Packet`], [`CoapRequest`], [`CoapResponse`]), a client
//! [`client::Connection`] with confirmable retransmission and
//! observation, and a [`server::Server`] answering discovery on the
//! "All CoAP Nodes" group and pushing periodic notifications to observers.
//!
//! ```ignore
//! let device = client::discover(group, "/oic/res", wait, |_, _| {}).await?;
//! let conn = client::Connection::dial(
//!     client::observer_addr(device, OBSERVER_PORT),
//!     TransmissionParams::default(),
//!     Duration::from_secs(30),
//! )
//! .await?;
//! let observation = conn.observe("/observe", |n| println!("{:?}", n)).await?;
//! ```

pub mod client;
pub mod config;
mod dedup;
pub mod error;
mod header;
pub mod ids;
mod message_class;
mod message_type;
pub mod packet;
mod request;
mod request_type;
mod response;
mod response_type;
pub mod server;

pub use config::{
    ClientConfig, ServerConfig, TransmissionParams, DISCOVERY_PATH,
    DISCOVERY_PORT, OBSERVER_PORT, OBSERVE_PATH,
};
pub use error::{Error, MessageError, Result};
pub use header::Header;
pub use message_class::MessageClass;
pub use message_type::MessageType;
pub use packet::{CoapOption, ContentFormat, ObserveOption, Packet};
pub use request::CoapRequest;
pub use request_type::RequestType;
pub use response::CoapResponse;
pub use response_type::ResponseType;
