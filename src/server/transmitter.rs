use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::{sleep, Instant},
};

use super::router::Responder;
use crate::{
    packet::ContentFormat, MessageClass, MessageType, Packet, ResponseType,
};

/// First sequence number a transmitter sends; 0 and 1 belong to the
/// registration exchange.
pub const FIRST_SEQUENCE: u32 = 2;

/// Every this many notifications one goes out confirmable. If it is still
/// unacknowledged when the next confirmable one is due, the observer is
/// considered gone.
pub const CONFIRM_EVERY: u32 = 5;

/// Notification ids remembered per subscription for matching resets.
const SENT_IDS: usize = 8;

/// Body of an uptime notification.
pub fn uptime_body(elapsed: Duration) -> String {
    format!("Been running for {:?}", elapsed)
}

#[derive(Debug)]
struct Subscription {
    peer: SocketAddr,
    token: Vec<u8>,
    sent: VecDeque<u16>,
    unacked: Option<u16>,
    cancel: oneshot::Sender<()>,
}

/// Running transmitters by subscription id, each with its cancellation
/// handle and the ids of the notifications it sent last.
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
}

impl ObserverRegistry {
    pub fn new() -> ObserverRegistry {
        Default::default()
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<u64, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }

    /// Records a subscription of `peer` under `token`, replacing and
    /// stopping an earlier one with the same peer and token.
    fn register(
        &self,
        peer: SocketAddr,
        token: Vec<u8>,
    ) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        let mut subs = self.subscriptions();
        let previous = subs
            .iter()
            .find(|(_, s)| s.peer == peer && s.token == token)
            .map(|(id, _)| *id);
        if let Some(previous) = previous.and_then(|p| subs.remove(&p)) {
            debug!("{} re-registered, replacing its transmitter", peer);
            let _ = previous.cancel.send(());
        }
        subs.insert(
            id,
            Subscription {
                peer,
                token,
                sent: VecDeque::with_capacity(SENT_IDS),
                unacked: None,
                cancel,
            },
        );
        (id, cancelled)
    }

    /// Notes a notification about to be sent. Returns false when the
    /// subscription ended or its last confirmable notification was never
    /// acknowledged.
    fn notified(&self, id: u64, mid: u16, confirmable: bool) -> bool {
        let mut subs = self.subscriptions();
        let sub = match subs.get_mut(&id) {
            Some(sub) => sub,
            None => return false,
        };
        if confirmable {
            if let Some(lost) = sub.unacked {
                warn!("{} never acknowledged notification {}", sub.peer, lost);
                subs.remove(&id);
                return false;
            }
            sub.unacked = Some(mid);
        }
        if sub.sent.len() == SENT_IDS {
            sub.sent.pop_front();
        }
        sub.sent.push_back(mid);
        true
    }

    fn remove_where<P>(&self, pred: P) -> bool
    where
        P: Fn(&Subscription) -> bool,
    {
        let mut subs = self.subscriptions();
        let id = match subs.iter().find(|(_, s)| pred(s)) {
            Some((id, _)) => *id,
            None => return false,
        };
        match subs.remove(&id) {
            Some(sub) => {
                let _ = sub.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// An ACK from `peer`; clears the pending confirmable notification.
    pub fn acknowledge(&self, peer: SocketAddr, mid: u16) {
        for sub in self.subscriptions().values_mut() {
            if sub.peer == peer && sub.unacked == Some(mid) {
                sub.unacked = None;
            }
        }
    }

    /// An RST from `peer`; stops the transmitter that sent `mid`.
    pub fn reset(&self, peer: SocketAddr, mid: u16) -> bool {
        self.remove_where(|s| s.peer == peer && s.sent.contains(&mid))
    }

    /// A GET with Observe=1; stops the transmitter of `peer` and `token`.
    pub fn deregister(&self, peer: SocketAddr, token: &[u8]) -> bool {
        self.remove_where(|s| s.peer == peer && s.token == token)
    }

    fn release(&self, id: u64) {
        self.subscriptions().remove(&id);
    }

    /// Stops the transmitter of subscription `id`. Returns false if it
    /// already ended.
    pub fn cancel(&self, id: u64) -> bool {
        match self.subscriptions().remove(&id) {
            Some(sub) => sub.cancel.send(()).is_ok(),
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, sub) in self.subscriptions().drain() {
            let _ = sub.cancel.send(());
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pushes an uptime notification to one subscriber every interval until a
/// send fails or the subscription ends.
#[derive(Debug)]
pub struct PeriodicTransmitter {
    registry: Arc<ObserverRegistry>,
    id: u64,
    responder: Responder,
    token: Vec<u8>,
    started: Instant,
    sequence: u32,
    interval: Duration,
}

impl PeriodicTransmitter {
    /// Builds the next notification and advances the sequence counter.
    pub fn next_notification(&mut self) -> Packet {
        let confirmable = self.sequence.wrapping_sub(FIRST_SEQUENCE)
            % CONFIRM_EVERY
            == CONFIRM_EVERY - 1;
        let mut packet = Packet::new();
        packet.set_type(if confirmable {
            MessageType::Confirmable
        } else {
            MessageType::NonConfirmable
        });
        packet.set_code(MessageClass::Response(ResponseType::Content));
        packet.set_message_id(self.responder.next_message_id());
        // token length was checked when the request was decoded
        let _ = packet.set_token(self.token.clone());
        packet.set_observe_value(self.sequence);
        packet.set_content_format(ContentFormat::TextPlain);
        packet.payload = uptime_body(self.started.elapsed()).into_bytes();
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }

    pub async fn run(mut self, mut cancelled: oneshot::Receiver<()>) {
        let peer = self.responder.remote_addr();
        loop {
            match cancelled.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    debug!("Transmitter to {} cancelled", peer);
                    return;
                }
            }
            let notification = self.next_notification();
            let confirmable =
                notification.message_type() == MessageType::Confirmable;
            if !self.registry.notified(
                self.id,
                notification.message_id(),
                confirmable,
            ) {
                info!("Observer {} is gone, stopping transmitter", peer);
                return;
            }
            if let Err(e) = self.responder.send(&notification).await {
                warn!("Error on transmitter to {}, stopping: {}", peer, e);
                return;
            }
            tokio::select! {
                _ = &mut cancelled => {
                    debug!("Transmitter to {} cancelled", peer);
                    return;
                }
                _ = sleep(self.interval) => {}
            }
        }
    }
}

/// Registers a subscription for `token` on `responder` and starts its
/// transmitter task. The entry is in the registry when this returns and is
/// dropped again when the task ends.
pub fn spawn_transmitter(
    registry: Arc<ObserverRegistry>,
    responder: Responder,
    token: Vec<u8>,
    interval: Duration,
) -> u64 {
    let (id, cancelled) =
        registry.register(responder.remote_addr(), token.clone());
    info!(
        "Starting transmitter {} for {}",
        id,
        responder.remote_addr()
    );
    let transmitter = PeriodicTransmitter {
        registry: registry.clone(),
        id,
        responder,
        token,
        started: Instant::now(),
        sequence: FIRST_SEQUENCE,
        interval,
    };
    tokio::spawn(async move {
        transmitter.run(cancelled).await;
        registry.release(id);
    });
    id
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::MessageIdGenerator;
    use tokio::net::UdpSocket;

    async fn pair() -> (Responder, UdpSocket) {
        let subscriber = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder = Responder::new(
            Arc::new(socket),
            subscriber.local_addr().unwrap(),
            Arc::new(MessageIdGenerator::starting_at(100)),
        );
        (responder, subscriber)
    }

    async fn recv(socket: &UdpSocket) -> (Packet, SocketAddr) {
        let mut buf = [0; 1500];
        let (len, src) = socket.recv_from(&mut buf).await.unwrap();
        (Packet::from_bytes(&buf[..len]).unwrap(), src)
    }

    fn transmitter(responder: Responder) -> PeriodicTransmitter {
        PeriodicTransmitter {
            registry: Arc::new(ObserverRegistry::new()),
            id: 0,
            responder,
            token: vec![7, 7],
            started: Instant::now(),
            sequence: FIRST_SEQUENCE,
            interval: Duration::from_secs(1),
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn sequence_starts_at_two() {
        let (responder, _subscriber) = pair().await;
        let mut t = transmitter(responder);
        let first = t.next_notification();
        let second = t.next_notification();
        assert_eq!(Some(2), first.observe_value());
        assert_eq!(Some(3), second.observe_value());
        assert_eq!(&[7, 7], first.token());
        assert_eq!(Some(ContentFormat::TextPlain), first.content_format());
        assert_ne!(first.message_id(), second.message_id());
        assert!(String::from_utf8(first.payload)
            .unwrap()
            .starts_with("Been running for "));
    }

    #[tokio::test]
    async fn every_fifth_notification_is_confirmable() {
        let (responder, _subscriber) = pair().await;
        let mut t = transmitter(responder);
        let types: Vec<MessageType> =
            (0..10).map(|_| t.next_notification().message_type()).collect();
        assert_eq!(MessageType::NonConfirmable, types[0]);
        assert_eq!(MessageType::Confirmable, types[4]);
        assert_eq!(MessageType::Confirmable, types[9]);
        assert_eq!(
            2,
            types.iter().filter(|t| **t == MessageType::Confirmable).count()
        );
    }

    #[tokio::test]
    async fn pushes_until_cancelled() {
        let (responder, subscriber) = pair().await;
        let registry = Arc::new(ObserverRegistry::new());
        let id = spawn_transmitter(
            registry.clone(),
            responder,
            vec![1, 2, 3],
            Duration::from_millis(20),
        );

        let mut last = 0;
        for _ in 0..3 {
            let (packet, _) = recv(&subscriber).await;
            let seq = packet.observe_value().unwrap();
            assert!(seq > last);
            last = seq;
        }
        assert_eq!(4, last);

        assert!(registry.cancel(id));
        sleep(Duration::from_millis(50)).await;
        assert!(registry.is_empty());
        assert!(!registry.cancel(id));
    }

    #[tokio::test]
    async fn cancel_right_after_spawn() {
        let (responder, _subscriber) = pair().await;
        let registry = Arc::new(ObserverRegistry::new());
        let id = spawn_transmitter(
            registry.clone(),
            responder,
            vec![1],
            Duration::from_millis(20),
        );
        assert_eq!(1, registry.len());
        assert!(registry.cancel(id));
        sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());
    }

    #[test]
    fn reset_matches_sent_notification() {
        let registry = ObserverRegistry::new();
        let peer = addr("10.0.0.1:5683");
        let (id, mut cancelled) = registry.register(peer, vec![1]);
        assert!(registry.notified(id, 40, false));
        assert!(!registry.reset(addr("10.0.0.2:5683"), 40));
        assert!(!registry.reset(peer, 41));
        assert!(registry.reset(peer, 40));
        assert!(registry.is_empty());
        assert_eq!(Ok(()), cancelled.try_recv());
    }

    #[test]
    fn deregister_by_peer_and_token() {
        let registry = ObserverRegistry::new();
        let peer = addr("10.0.0.1:5683");
        registry.register(peer, vec![1]);
        registry.register(peer, vec![2]);
        assert!(!registry.deregister(peer, &[3]));
        assert!(registry.deregister(peer, &[1]));
        assert_eq!(1, registry.len());
    }

    #[test]
    fn reregistering_replaces() {
        let registry = ObserverRegistry::new();
        let peer = addr("10.0.0.1:5683");
        let (_, mut first) = registry.register(peer, vec![1]);
        registry.register(peer, vec![1]);
        assert_eq!(1, registry.len());
        assert_eq!(Ok(()), first.try_recv());
    }

    #[test]
    fn unacknowledged_confirmable_ends_subscription() {
        let registry = ObserverRegistry::new();
        let peer = addr("10.0.0.1:5683");
        let (id, _cancelled) = registry.register(peer, vec![1]);
        assert!(registry.notified(id, 1, true));
        registry.acknowledge(peer, 1);
        assert!(registry.notified(id, 2, true));
        assert!(!registry.notified(id, 3, true));
        assert!(registry.is_empty());
    }

    #[test]
    fn body_format() {
        assert_eq!(
            "Been running for 1.5s",
            uptime_body(Duration::from_millis(1500))
        );
    }
}
