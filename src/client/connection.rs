use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::{timeout, Instant},
};

use super::observe::Freshness;
use crate::{
    config::TransmissionParams,
    dedup::RecentMessages,
    error::{Error, Result},
    ids::{generate_token, MessageIdGenerator},
    CoapRequest, CoapResponse, MessageClass, MessageType, ObserveOption,
    Packet,
};

const RECENT_MESSAGES: usize = 64;

#[derive(Default)]
struct State {
    /// Waiting for an ACK or RST, by message id.
    acks: HashMap<u16, oneshot::Sender<Packet>>,
    /// Waiting for a single response, by token.
    exchanges: HashMap<Vec<u8>, oneshot::Sender<Packet>>,
    /// Active observations, by token.
    observers: HashMap<Vec<u8>, mpsc::UnboundedSender<Packet>>,
}

struct Inner {
    socket: UdpSocket,
    peer: SocketAddr,
    params: TransmissionParams,
    ids: MessageIdGenerator,
    state: Mutex<State>,
}

/// A unicast CoAP session with one server.
pub struct Connection {
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Opens a session to `addr`. Socket set-up is bounded by
    /// `connect_timeout`; confirmable messages follow `params`.
    pub async fn dial(
        addr: SocketAddr,
        params: TransmissionParams,
        connect_timeout: Duration,
    ) -> Result<Connection> {
        let open = async {
            let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(addr).await?;
            Ok::<_, Error>(socket)
        };
        let socket = timeout(connect_timeout, open)
            .await
            .map_err(|_| Error::Timeout)??;
        debug!("Connected {} -> {}", socket.local_addr()?, addr);

        let inner = Arc::new(Inner {
            socket,
            peer: addr,
            params,
            ids: MessageIdGenerator::new(),
            state: Mutex::new(State::default()),
        });
        let reader = tokio::spawn(read_loop(inner.clone()));
        Ok(Connection { inner, reader })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// A confirmable GET without observation.
    pub async fn get(&self, path: &str) -> Result<CoapResponse> {
        let request = CoapRequest::get(
            path,
            generate_token(),
            self.inner.ids.next_id(),
            MessageType::Confirmable,
        )?;
        self.inner.exchange(request).await
    }

    /// Registers an observation of `path`. `on_notify` runs for every
    /// notification that is newer than the previous one.
    pub async fn observe<F>(
        &self,
        path: &str,
        mut on_notify: F,
    ) -> Result<Observation>
    where
        F: FnMut(&CoapResponse) + Send + 'static,
    {
        let token = generate_token();
        let mut request = CoapRequest::get(
            path,
            token.clone(),
            self.inner.ids.next_id(),
            MessageType::Confirmable,
        )?;
        request.set_observe_flag(ObserveOption::Register);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner
            .state
            .lock()
            .await
            .observers
            .insert(token.clone(), tx);

        if let Err(e) = self.inner.send_confirmable(&request.message).await {
            self.inner.state.lock().await.observers.remove(&token);
            return Err(e);
        }
        info!("Observing {} on {}", request.path(), self.inner.peer);

        let dispatch = tokio::spawn(async move {
            let mut freshness = Freshness::new();
            while let Some(packet) = rx.recv().await {
                let response = match CoapResponse::from_packet(packet) {
                    Some(r) => r,
                    None => continue,
                };
                if let Some(seq) = response.observe_value() {
                    if !freshness.accept(seq, Instant::now().into_std()) {
                        debug!("Dropping reordered notification {}", seq);
                        continue;
                    }
                }
                on_notify(&response);
            }
        });

        Ok(Observation {
            inner: self.inner.clone(),
            path: path.to_owned(),
            token,
            dispatch,
        })
    }

    pub fn close(self) {
        debug!("Closing connection to {}", self.inner.peer);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Handle to an active observation.
pub struct Observation {
    inner: Arc<Inner>,
    path: String,
    token: Vec<u8>,
    dispatch: JoinHandle<()>,
}

impl Observation {
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Stops local delivery and deregisters at the server, giving the
    /// deregistration at most `wait`.
    pub async fn cancel(self, wait: Duration) -> Result<()> {
        self.inner.state.lock().await.observers.remove(&self.token);
        self.dispatch.abort();

        let mut request = CoapRequest::get(
            &self.path,
            self.token.clone(),
            self.inner.ids.next_id(),
            MessageType::Confirmable,
        )?;
        request.set_observe_flag(ObserveOption::Deregister);
        timeout(wait, self.inner.exchange(request))
            .await
            .map_err(|_| Error::Timeout)??;
        info!("Cancelled observation of {}", self.path);
        Ok(())
    }
}

impl Inner {
    async fn send(&self, packet: &Packet) -> Result<()> {
        self.socket.send(&packet.to_bytes()?).await?;
        Ok(())
    }

    /// Sends a confirmable message, retransmitting until it is acknowledged
    /// or the retransmission budget runs out.
    async fn send_confirmable(&self, packet: &Packet) -> Result<Packet> {
        let mid = packet.message_id();
        let bytes = packet.to_bytes()?;
        let (tx, mut rx) = oneshot::channel();
        self.state.lock().await.acks.insert(mid, tx);

        for attempt in 0..=self.params.max_retransmit {
            if attempt > 0 {
                debug!("Retransmitting {} to {} ({})", mid, self.peer, attempt);
            }
            if let Err(e) = self.socket.send(&bytes).await {
                self.state.lock().await.acks.remove(&mid);
                return Err(e.into());
            }
            match timeout(self.params.timeout_for(attempt), &mut rx).await {
                Ok(Ok(reply)) if reply.message_type() == MessageType::Reset => {
                    return Err(Error::Reset(self.peer))
                }
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(_)) => return Err(Error::ConnectionClosed),
                Err(_) => continue,
            }
        }
        self.state.lock().await.acks.remove(&mid);
        Err(Error::Timeout)
    }

    /// Sends a confirmable request and waits for its response, piggybacked
    /// or separate.
    async fn exchange(&self, request: CoapRequest) -> Result<CoapResponse> {
        let token = request.token().to_vec();
        let (tx, rx) = oneshot::channel();
        self.state.lock().await.exchanges.insert(token.clone(), tx);

        if let Err(e) = self.send_confirmable(&request.message).await {
            self.state.lock().await.exchanges.remove(&token);
            return Err(e);
        }
        match timeout(self.params.exchange_lifetime(), rx).await {
            Ok(Ok(packet)) => {
                CoapResponse::from_packet(packet).ok_or(Error::ConnectionClosed)
            }
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.state.lock().await.exchanges.remove(&token);
                Err(Error::Timeout)
            }
        }
    }

    /// Hands a response to whoever waits for its token.
    fn deliver(state: &mut State, packet: Packet) -> bool {
        let token = packet.token().to_vec();
        if let Some(tx) = state.observers.get(&token) {
            if tx.send(packet).is_ok() {
                return true;
            }
            state.observers.remove(&token);
            return false;
        }
        match state.exchanges.remove(&token) {
            Some(tx) => tx.send(packet).is_ok(),
            None => false,
        }
    }

    async fn handle(&self, packet: Packet, recent: &mut RecentMessages<u16, ()>) {
        let mid = packet.message_id();
        match packet.message_type() {
            MessageType::Acknowledgement | MessageType::Reset => {
                let mut state = self.state.lock().await;
                if let Some(tx) = state.acks.remove(&mid) {
                    let _ = tx.send(packet.clone());
                }
                if let MessageClass::Response(_) = packet.code() {
                    if !Inner::deliver(&mut state, packet) {
                        debug!("Unmatched piggybacked response {}", mid);
                    }
                }
            }
            MessageType::Confirmable | MessageType::NonConfirmable => {
                let confirmable =
                    packet.message_type() == MessageType::Confirmable;
                if recent.get(&mid).is_some() {
                    debug!("Duplicate message {} from {}", mid, self.peer);
                    if confirmable {
                        self.reply(MessageType::Acknowledgement, mid).await;
                    }
                    return;
                }
                recent.insert(mid, ());

                let delivered = match packet.code() {
                    MessageClass::Response(_) => {
                        Inner::deliver(&mut *self.state.lock().await, packet)
                    }
                    _ => false,
                };
                if delivered {
                    if confirmable {
                        self.reply(MessageType::Acknowledgement, mid).await;
                    }
                } else {
                    debug!("Rejecting message {} from {}", mid, self.peer);
                    self.reply(MessageType::Reset, mid).await;
                }
            }
        }
    }

    async fn reply(&self, message_type: MessageType, mid: u16) {
        if let Err(e) = self.send(&Packet::empty(message_type, mid)).await {
            warn!("Cannot reply to {}: {}", self.peer, e);
        }
    }
}

async fn read_loop(inner: Arc<Inner>) {
    let mut recent = RecentMessages::new(RECENT_MESSAGES);
    let mut buf = [0; 1500];
    loop {
        let len = match inner.socket.recv(&mut buf).await {
            Ok(len) => len,
            // ICMP port unreachable surfaces here on connected sockets
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("{} refused a message: {}", inner.peer, e);
                continue;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", inner.peer, e);
                break;
            }
        };
        match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => inner.handle(packet, &mut recent).await,
            Err(e) => warn!("Malformed message from {}: {}", inner.peer, e),
        }
    }
    // wake every waiter with a closed channel
    let mut state = inner.state.lock().await;
    state.acks.clear();
    state.exchanges.clear();
    state.observers.clear();
}
