//! Multicast listener set-up.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket},
};

use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

/// IPv4 addresses of every local interface. Falls back to the unspecified
/// address, letting the kernel pick, when enumeration fails.
pub fn interface_addrs() -> Vec<Ipv4Addr> {
    let addrs: Vec<Ipv4Addr> = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs
            .into_iter()
            .filter_map(|(name, ip)| match ip {
                IpAddr::V4(v4) => {
                    debug!("Interface {} has {}", name, v4);
                    Some(v4)
                }
                IpAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            warn!("Cannot list network interfaces: {}", e);
            Vec::new()
        }
    };
    if addrs.is_empty() {
        vec![Ipv4Addr::UNSPECIFIED]
    } else {
        addrs
    }
}

/// Binds a non-blocking UDP socket on the group's port and joins the group
/// on every interface in `interfaces`.
///
/// Joining is best effort: failures on single interfaces are logged and the
/// socket is returned as long as binding succeeded. Multicast loopback is on
/// so a client on the same host can discover this server.
pub fn join_multicast(
    group: SocketAddrV4,
    interfaces: &[Ipv4Addr],
) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
    socket.bind(&bind.into())?;

    let mut joined = 0;
    for iface in interfaces {
        match socket.join_multicast_v4(group.ip(), iface) {
            Ok(()) => {
                debug!("Joined {} on {}", group.ip(), iface);
                joined += 1;
            }
            Err(e) => warn!("cannot JoinGroup({}, {}): {}", iface, group, e),
        }
    }
    if joined == 0 {
        warn!("Not a member of {} on any interface", group.ip());
    } else {
        info!("Joined {} on {} interface(s)", group.ip(), joined);
    }

    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn join_failures_are_not_fatal() {
        let group = SocketAddrV4::new(Ipv4Addr::new(224, 0, 1, 187), 0);
        let socket =
            join_multicast(group, &[Ipv4Addr::new(192, 0, 2, 1)]).unwrap();
        assert_ne!(0, socket.local_addr().unwrap().port());
    }

    #[test]
    fn always_some_interface() {
        assert!(!interface_addrs().is_empty());
    }
}
