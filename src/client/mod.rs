//! The discovery-and-observe client: find a server over multicast, dial its
//! observer port and subscribe to a resource.

mod connection;
mod discovery;
mod observe;

pub use connection::{Connection, Observation};
pub use discovery::{discover, is_loopback, observer_addr, DeviceSelector, Offer};
pub use observe::Freshness;
