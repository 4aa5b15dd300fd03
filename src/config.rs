//! Addresses, timeouts and retransmission settings shared by the client and
//! the server. Defaults are the values both sides agree on out of the box.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use crate::error::{Error, Result};

/// CoAP "All CoAP Nodes" IPv4 multicast group.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);
pub const DISCOVERY_PORT: u16 = 5683;
/// Unicast port the server accepts observe registrations on.
pub const OBSERVER_PORT: u16 = 5688;

pub const DISCOVERY_PATH: &str = "/oic/res";
pub const OBSERVE_PATH: &str = "/observe";

/// Parses a `host:port` string, mapping failures onto [`Error::InvalidAddress`].
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|_| Error::InvalidAddress(addr.to_owned()))
}

/// Retransmission policy for confirmable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionParams {
    pub max_retransmit: u32,
    pub ack_timeout: Duration,
    pub backoff_factor: u32,
}

impl TransmissionParams {
    pub fn new(
        max_retransmit: u32,
        ack_timeout: Duration,
        backoff_factor: u32,
    ) -> TransmissionParams {
        TransmissionParams {
            max_retransmit,
            ack_timeout,
            backoff_factor,
        }
    }

    /// How long to wait for an acknowledgement after transmission number
    /// `attempt` (0 for the first send).
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.ack_timeout * self.backoff_factor.saturating_pow(attempt)
    }

    /// Total time from the first transmission until the last wait expires.
    pub fn exchange_lifetime(&self) -> Duration {
        (0..=self.max_retransmit).map(|a| self.timeout_for(a)).sum()
    }
}

impl Default for TransmissionParams {
    fn default() -> Self {
        TransmissionParams::new(1, Duration::from_secs(5), 2)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub multicast_addr: SocketAddr,
    pub discovery_path: String,
    pub discovery_timeout: Duration,
    pub observer_port: u16,
    pub observe_path: String,
    pub connection_timeout: Duration,
    pub transmission: TransmissionParams,
    pub cancel_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            multicast_addr: SocketAddrV4::new(DISCOVERY_GROUP, DISCOVERY_PORT)
                .into(),
            discovery_path: DISCOVERY_PATH.to_owned(),
            discovery_timeout: Duration::from_secs(3),
            observer_port: OBSERVER_PORT,
            observe_path: OBSERVE_PATH.to_owned(),
            connection_timeout: Duration::from_secs(30),
            transmission: TransmissionParams::default(),
            cancel_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub multicast_addr: SocketAddrV4,
    pub observer_port: u16,
    pub notify_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            multicast_addr: SocketAddrV4::new(DISCOVERY_GROUP, DISCOVERY_PORT),
            observer_port: OBSERVER_PORT,
            notify_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let params = TransmissionParams::default();
        assert_eq!(Duration::from_secs(5), params.timeout_for(0));
        assert_eq!(Duration::from_secs(10), params.timeout_for(1));
        assert_eq!(Duration::from_secs(15), params.exchange_lifetime());
    }

    #[test]
    fn address_parsing() {
        assert_eq!(
            "224.0.1.187:5683".parse::<SocketAddr>().unwrap(),
            parse_addr("224.0.1.187:5683").unwrap()
        );
        match parse_addr("224.0.1.187") {
            Err(Error::InvalidAddress(a)) => assert_eq!("224.0.1.187", a),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn defaults_agree() {
        let client = ClientConfig::default();
        let server = ServerConfig::default();
        assert_eq!(SocketAddr::V4(server.multicast_addr), client.multicast_addr);
        assert_eq!(server.observer_port, client.observer_port);
    }
}
