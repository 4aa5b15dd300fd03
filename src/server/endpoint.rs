use std::{io, net::SocketAddr, sync::Arc};

use log::{debug, info, warn};
use tokio::net::UdpSocket;

use super::{
    router::{Responder, ResponseWriter, Router},
    transmitter::ObserverRegistry,
};
use crate::{
    dedup::RecentMessages, error::Result, ids::MessageIdGenerator,
    CoapRequest, MessageClass, MessageType, Packet,
};

const RECENT_MESSAGES: usize = 256;

/// One listening socket serving the shared router.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    router: Arc<Router>,
    observers: Arc<ObserverRegistry>,
    ids: Arc<MessageIdGenerator>,
    multicast: bool,
}

impl Endpoint {
    pub fn new(
        socket: UdpSocket,
        router: Arc<Router>,
        observers: Arc<ObserverRegistry>,
        ids: Arc<MessageIdGenerator>,
    ) -> Endpoint {
        Endpoint {
            socket: Arc::new(socket),
            router,
            observers,
            ids,
            multicast: false,
        }
    }

    /// Marks the endpoint as a multicast listener; error responses to
    /// requests arriving there are suppressed.
    pub fn multicast(mut self) -> Endpoint {
        self.multicast = true;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves requests until the socket fails.
    pub async fn serve(self) -> Result<()> {
        info!("Serving CoAP on {}", self.local_addr()?);
        let mut recent = RecentMessages::new(RECENT_MESSAGES);
        let mut buf = [0; 1500];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                // an observer's port went away; some platforms report the
                // ICMP error on the next receive
                Err(e)
                    if e.kind() == io::ErrorKind::ConnectionReset
                        || e.kind() == io::ErrorKind::ConnectionRefused =>
                {
                    debug!("Ignoring receive error: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let packet = match Packet::from_bytes(&buf[..len]) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Malformed message from {}: {}", peer, e);
                    continue;
                }
            };
            self.handle(packet, peer, &mut recent).await;
        }
    }

    async fn handle(
        &self,
        packet: Packet,
        peer: SocketAddr,
        recent: &mut RecentMessages<(SocketAddr, u16), Option<Vec<u8>>>,
    ) {
        let mid = packet.message_id();
        match (packet.message_type(), packet.code()) {
            (MessageType::Confirmable, MessageClass::Empty) => {
                debug!("Ping from {}", peer);
                self.send(&Packet::empty(MessageType::Reset, mid), peer).await;
                return;
            }
            (MessageType::Reset, _) => {
                if self.observers.reset(peer, mid) {
                    info!(
                        "{} reset notification {}, stopped observing",
                        peer, mid
                    );
                } else {
                    debug!("{} rejected message {}", peer, mid);
                }
                return;
            }
            (MessageType::Acknowledgement, _) => {
                self.observers.acknowledge(peer, mid);
                return;
            }
            _ => {}
        }

        let key = (peer, mid);
        if let Some(cached) = recent.get(&key) {
            debug!("Duplicate request {} from {}", mid, peer);
            if let Some(bytes) = cached {
                if let Err(e) = self.socket.send_to(bytes, peer).await {
                    warn!("Cannot resend to {}: {}", peer, e);
                }
            }
            return;
        }

        let request = match CoapRequest::from_packet(packet) {
            Some(r) => r,
            None => {
                debug!("Ignoring non-request {} from {}", mid, peer);
                return;
            }
        };
        debug!(
            "Got {:?} /{} from {} on {}",
            request.method(),
            request.path(),
            peer,
            if self.multicast { "multicast" } else { "unicast" }
        );

        let responder =
            Responder::new(self.socket.clone(), peer, self.ids.clone());
        let mut w = ResponseWriter::new(&request, responder);
        self.router.dispatch(&mut w, &request);

        let reply = match w.into_response() {
            Some(response)
                if self.multicast
                    && !response.status().map_or(false, |s| s.is_success()) =>
            {
                debug!("Suppressing error response to multicast request");
                None
            }
            Some(mut response) => {
                if !request.is_confirmable() {
                    response.message.set_message_id(self.ids.next_id());
                }
                Some(response.message)
            }
            None if request.is_confirmable() => {
                Some(Packet::empty(MessageType::Acknowledgement, mid))
            }
            None => None,
        };

        let bytes = match reply.map(|p| p.to_bytes()).transpose() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot encode response to {}: {}", peer, e);
                return;
            }
        };
        if let Some(bytes) = &bytes {
            if let Err(e) = self.socket.send_to(bytes, peer).await {
                warn!("Cannot respond to {}: {}", peer, e);
            }
        }
        recent.insert(key, bytes);
    }

    async fn send(&self, packet: &Packet, peer: SocketAddr) {
        let sent = match packet.to_bytes() {
            Ok(bytes) => self.socket.send_to(&bytes, peer).await.map(|_| ()),
            Err(e) => {
                warn!("Cannot encode message to {}: {}", peer, e);
                return;
            }
        };
        if let Err(e) = sent {
            warn!("Cannot send to {}: {}", peer, e);
        }
    }
}
