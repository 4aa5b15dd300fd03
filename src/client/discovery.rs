use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{net::UdpSocket, sync::oneshot, time::timeout};

use crate::{
    error::{Error, Result},
    ids::{generate_token, MessageIdGenerator},
    CoapRequest, CoapResponse, MessageType, Packet,
};

/// What happened to a responder offered to a [`DeviceSelector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Selected,
    Loopback,
    AlreadySelected,
}

/// Picks the first non-loopback responder of a discovery run and publishes
/// it exactly once through a oneshot channel.
///
/// When several devices answer at about the same time the winner is simply
/// whichever datagram arrived first.
#[derive(Debug)]
pub struct DeviceSelector {
    selected: Option<oneshot::Sender<SocketAddr>>,
}

impl DeviceSelector {
    pub fn new() -> (DeviceSelector, oneshot::Receiver<SocketAddr>) {
        let (tx, rx) = oneshot::channel();
        (DeviceSelector { selected: Some(tx) }, rx)
    }

    pub fn offer(&mut self, addr: SocketAddr) -> Offer {
        if is_loopback(&addr) {
            return Offer::Loopback;
        }
        match self.selected.take() {
            Some(tx) => {
                // nobody waiting any more is not our concern
                let _ = tx.send(addr);
                Offer::Selected
            }
            None => Offer::AlreadySelected,
        }
    }
}

/// Loopback check that also catches IPv4-mapped IPv6 loopback addresses.
pub fn is_loopback(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_loopback(),
        IpAddr::V6(ip) => {
            ip.is_loopback()
                || ip.to_ipv4().map_or(false, |v4| {
                    ip.segments()[5] == 0xFFFF && v4.is_loopback()
                })
        }
    }
}

/// The address to dial for observation: same host, fixed observer port.
pub fn observer_addr(device: SocketAddr, port: u16) -> SocketAddr {
    SocketAddr::new(device.ip(), port)
}

/// Sends a non-confirmable GET for `path` to `group` and waits up to
/// `wait` for the first non-loopback responder.
///
/// `on_response` runs once for every distinct responder whose reply carries
/// our token, loopback ones included.
pub async fn discover<F>(
    group: SocketAddr,
    path: &str,
    wait: Duration,
    mut on_response: F,
) -> Result<SocketAddr>
where
    F: FnMut(SocketAddr, &CoapResponse) + Send + 'static,
{
    let bind = if group.is_ipv4() {
        SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
    } else {
        SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
    };
    let socket = UdpSocket::bind(bind).await?;

    let token = generate_token();
    let request = CoapRequest::get(
        path,
        token.clone(),
        MessageIdGenerator::new().next_id(),
        MessageType::NonConfirmable,
    )?;
    socket.send_to(&request.message.to_bytes()?, group).await?;
    debug!("Sent discovery request for {} to {}", path, group);

    let (mut selector, selected) = DeviceSelector::new();
    let listener = tokio::spawn(async move {
        let mut seen = HashSet::new();
        let mut buf = [0; 1500];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Discovery socket failed: {}", e);
                    return;
                }
            };
            let response = match Packet::from_bytes(&buf[..len])
                .ok()
                .and_then(CoapResponse::from_packet)
            {
                Some(r) if r.message.token() == token.as_slice() => r,
                _ => {
                    debug!("Ignoring unrelated datagram from {}", src);
                    continue;
                }
            };
            if !seen.insert(src) {
                continue;
            }
            on_response(src, &response);
            match selector.offer(src) {
                Offer::Selected => info!("Discovered device at: {}", src),
                Offer::Loopback => info!("Skipping local device at: {}", src),
                Offer::AlreadySelected => {
                    debug!("Device at {} answered after selection", src)
                }
            }
        }
    });

    let result = timeout(wait, selected).await;
    listener.abort();
    match result {
        Ok(Ok(addr)) => Ok(addr),
        Ok(Err(_)) => Err(Error::ConnectionClosed),
        Err(_) => Err(Error::Timeout),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn first_remote_responder_wins() {
        let (mut selector, mut rx) = DeviceSelector::new();
        assert_eq!(Offer::Loopback, selector.offer(addr("127.0.0.1:5683")));
        assert!(rx.try_recv().is_err());
        assert_eq!(Offer::Selected, selector.offer(addr("203.0.113.5:5683")));
        assert_eq!(
            Offer::AlreadySelected,
            selector.offer(addr("203.0.113.9:5683"))
        );
        assert_eq!(addr("203.0.113.5:5683"), rx.try_recv().unwrap());
    }

    #[test]
    fn loopback_only_never_selects() {
        let (mut selector, mut rx) = DeviceSelector::new();
        selector.offer(addr("127.0.0.1:5683"));
        selector.offer(addr("127.1.2.3:5683"));
        selector.offer(addr("[::1]:5683"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn loopback_variants() {
        assert!(is_loopback(&SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 1)));
        let mapped = Ipv4Addr::LOCALHOST.to_ipv6_mapped();
        assert!(is_loopback(&SocketAddr::new(mapped.into(), 1)));
        assert!(!is_loopback(&addr("192.168.1.20:5683")));
    }

    #[test]
    fn observer_port_replaces_source_port() {
        assert_eq!(
            addr("203.0.113.5:5688"),
            observer_addr(addr("203.0.113.5:5683"), 5688)
        );
        assert_eq!(
            addr("[2001:db8::1]:5688"),
            observer_addr(addr("[2001:db8::1]:40000"), 5688)
        );
    }
}
