//! The multicast-and-observe server: answers discovery on the multicast
//! group and streams uptime notifications to observers.

mod endpoint;
mod multicast;
mod router;
mod transmitter;

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{net::UdpSocket, time::Instant};

pub use endpoint::Endpoint;
pub use multicast::{interface_addrs, join_multicast};
pub use router::{Handler, Responder, ResponseWriter, Router};
pub use transmitter::{
    spawn_transmitter, uptime_body, ObserverRegistry, PeriodicTransmitter,
    FIRST_SEQUENCE,
};

use crate::{
    config::{ServerConfig, DISCOVERY_PATH, OBSERVE_PATH},
    error::Result,
    ids::MessageIdGenerator,
    CoapRequest, ObserveOption, RequestType, ResponseType,
};

/// Body of the discovery answer.
pub const DISCOVERY_RESPONSE: &str = "mcast response";

fn handle_discovery(w: &mut ResponseWriter<'_>, request: &CoapRequest) {
    info!(
        "Got mcast message: path={:?}: from {}",
        request.path(),
        w.responder().remote_addr()
    );
    w.set_response(ResponseType::Content, DISCOVERY_RESPONSE);
}

/// `/observe`: a GET with Observe=0 starts a transmitter and returns
/// nothing; any other GET gets the uptime once, and Observe=1 also stops
/// the caller's transmitter.
struct ObserveHandler {
    started: Instant,
    interval: Duration,
    registry: Arc<ObserverRegistry>,
}

impl Handler for ObserveHandler {
    fn handle(&self, w: &mut ResponseWriter<'_>, request: &CoapRequest) {
        debug!(
            "Got message path={} token={:x?} from {}",
            request.path(),
            request.token(),
            w.responder().remote_addr()
        );
        match (request.method(), request.observe_flag()) {
            (Some(RequestType::Get), Some(ObserveOption::Register)) => {
                spawn_transmitter(
                    self.registry.clone(),
                    w.responder().clone(),
                    request.token().to_vec(),
                    self.interval,
                );
            }
            (Some(RequestType::Get), flag) => {
                if flag == Some(ObserveOption::Deregister)
                    && self.registry.deregister(
                        w.responder().remote_addr(),
                        request.token(),
                    )
                {
                    info!(
                        "{} deregistered from {}",
                        w.responder().remote_addr(),
                        request.path()
                    );
                }
                w.set_response(
                    ResponseType::Content,
                    &uptime_body(self.started.elapsed()),
                )
            }
            (method, _) => {
                warn!("{:?} not allowed on /observe", method);
                w.set_response(ResponseType::MethodNotAllowed, "");
            }
        }
    }
}

pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    registry: Arc<ObserverRegistry>,
    ids: Arc<MessageIdGenerator>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        let registry = Arc::new(ObserverRegistry::new());
        let mut router = Router::new();
        router.handle(DISCOVERY_PATH, handle_discovery);
        router.handle(
            OBSERVE_PATH,
            ObserveHandler {
                started: Instant::now(),
                interval: config.notify_interval,
                registry: registry.clone(),
            },
        );
        Server {
            config,
            router: Arc::new(router),
            registry,
            ids: Arc::new(MessageIdGenerator::new()),
        }
    }

    pub fn registry(&self) -> Arc<ObserverRegistry> {
        self.registry.clone()
    }

    /// An endpoint on the discovery group, joined on every interface.
    pub fn bind_multicast(&self) -> Result<Endpoint> {
        let std_socket =
            join_multicast(self.config.multicast_addr, &interface_addrs())?;
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(self.endpoint(socket).multicast())
    }

    /// A unicast endpoint on `addr`.
    pub async fn bind_unicast(&self, addr: SocketAddr) -> Result<Endpoint> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(self.endpoint(socket))
    }

    fn endpoint(&self, socket: UdpSocket) -> Endpoint {
        Endpoint::new(
            socket,
            self.router.clone(),
            self.registry.clone(),
            self.ids.clone(),
        )
    }

    /// Serves the multicast group and the observer port until one of them
    /// fails.
    pub async fn run(self) -> Result<()> {
        let multicast = self.bind_multicast()?;
        let unicast = self
            .bind_unicast(SocketAddr::new(
                Ipv4Addr::UNSPECIFIED.into(),
                self.config.observer_port,
            ))
            .await?;
        info!(
            "Starting multicast server on {}, observer server on {}",
            self.config.multicast_addr,
            unicast.local_addr()?
        );
        let result = tokio::try_join!(multicast.serve(), unicast.serve());
        self.registry.cancel_all();
        result.map(|_| ())
    }
}
