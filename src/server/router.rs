use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use log::warn;
use tokio::net::UdpSocket;

use crate::{
    error::Result, ids::MessageIdGenerator, CoapRequest, CoapResponse,
    Packet, ResponseType,
};

/// Sends messages to one peer through the endpoint's socket. Cheap to clone
/// into tasks that outlive the request.
#[derive(Clone, Debug)]
pub struct Responder {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    ids: Arc<MessageIdGenerator>,
}

impl Responder {
    pub fn new(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        ids: Arc<MessageIdGenerator>,
    ) -> Responder {
        Responder { socket, peer, ids }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn next_message_id(&self) -> u16 {
        self.ids.next_id()
    }

    pub async fn send(&self, packet: &Packet) -> Result<()> {
        self.socket.send_to(&packet.to_bytes()?, self.peer).await?;
        Ok(())
    }
}

/// Collects the synchronous answer of a handler.
pub struct ResponseWriter<'a> {
    request: &'a CoapRequest,
    responder: Responder,
    response: Option<CoapResponse>,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(request: &'a CoapRequest, responder: Responder) -> Self {
        ResponseWriter {
            request,
            responder,
            response: None,
        }
    }

    /// Answers with `status` and a text/plain body.
    pub fn set_response(&mut self, status: ResponseType, body: &str) {
        let mut response = CoapResponse::from_request(self.request, status);
        if !body.is_empty() {
            response.set_text(body);
        }
        self.response = Some(response);
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn into_response(self) -> Option<CoapResponse> {
        self.response
    }
}

/// Handles requests for one path.
pub trait Handler: Send + Sync {
    fn handle(&self, w: &mut ResponseWriter<'_>, request: &CoapRequest);
}

impl<F> Handler for F
where
    F: Fn(&mut ResponseWriter<'_>, &CoapRequest) + Send + Sync,
{
    fn handle(&self, w: &mut ResponseWriter<'_>, request: &CoapRequest) {
        self(w, request)
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Maps Uri-Path values to handlers; shared by every endpoint of a server.
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Router {
        Default::default()
    }

    pub fn handle<H: Handler + 'static>(&mut self, path: &str, handler: H) {
        let path = normalize(path).to_owned();
        if self.routes.insert(path.clone(), Arc::new(handler)).is_some() {
            warn!("Replacing handler for /{}", path);
        }
    }

    /// Runs the handler for the request's path; unknown paths get 4.04.
    pub fn dispatch(&self, w: &mut ResponseWriter<'_>, request: &CoapRequest) {
        match self.routes.get(normalize(&request.path())) {
            Some(handler) => handler.handle(w, request),
            None => w.set_response(ResponseType::NotFound, ""),
        }
    }
}
