use crate::{
    address::{self, ConnectRequest},
    error::{ProxyError, Result},
    protocol::{self, ReplyCode},
    relay::{self, ClientSender, Relay, RelaySettings},
    resolver::{self, Resolver},
};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// ConnectionHandler is the callback surface a transport drives: one
/// call per lifecycle step and one per inbound chunk, never concurrently.
pub trait ConnectionHandler {
    /// Completion type delivered back to the handler from its own tasks
    type Event;

    fn on_open(&mut self);
    fn on_data(&mut self, data: &[u8]);
    fn on_event(&mut self, event: Self::Event);
    fn on_close(&mut self);
}

/// Stage is the position of a session in the greeting/request/stream flow.
/// It only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingGreeting,
    AwaitingRequest,
    Streaming,
}

/// SessionEvent carries results of work the session started
#[derive(Debug)]
pub enum SessionEvent {
    /// Resolve and connect finished for the pending request
    Established(Result<(TcpStream, SocketAddr)>),
    /// The outbound socket rejected queued client bytes
    RelayWriteFailed(io::Error),
    /// The outbound side hit EOF or a read error
    OutboundClosed(Option<io::Error>),
}

/// Link tracks the outbound side of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Idle,
    Connecting,
    Ready,
    Failed,
}

/// Session is the per-connection state machine
pub struct Session<R> {
    peer: SocketAddr,
    stage: Stage,
    link: Link,
    /// Echo bytes of the latest request (ATYP + address + port)
    pending_request: Option<Vec<u8>>,
    /// Stream bytes that arrived while the link was still connecting
    early_data: Vec<u8>,
    client: ClientSender,
    relay: Relay,
    resolver: Arc<R>,
    settings: RelaySettings,
    /// Cancels every resolve/connect started by this session
    scope: CancellationToken,
    events: UnboundedSender<SessionEvent>,
}

impl<R: Resolver> Session<R> {
    /// new creates a session writing to `client`. The returned receiver
    /// yields completions that must be fed back through `on_event`.
    pub fn new(
        peer: SocketAddr,
        client: ClientSender,
        resolver: Arc<R>,
        settings: RelaySettings,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let session = Self {
            peer,
            stage: Stage::AwaitingGreeting,
            link: Link::Idle,
            pending_request: None,
            early_data: Vec::new(),
            client,
            relay: Relay::new(),
            resolver,
            settings,
            scope: CancellationToken::new(),
            events,
        };

        (session, events_rx)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_relaying(&self) -> bool {
        self.relay.is_established()
    }

    fn write(&self, bytes: Vec<u8>) {
        if self.client.send(bytes).is_err() {
            debug!("client {} already gone, dropping write", self.peer);
        }
    }

    fn reply(&mut self, code: ReplyCode) {
        let echoed = self.pending_request.as_deref().unwrap_or_default();
        let reply = protocol::build_reply(code, echoed);
        self.write(reply);
    }

    fn handle_greeting(&mut self, data: &[u8]) {
        let consumed = match address::check_greeting(data) {
            Ok(len) => len,
            Err(e) => {
                warn!("odd greeting from {}: {e}", self.peer);
                data.len()
            }
        };

        // No-auth is selected without looking at the offered methods
        self.write(protocol::method_selection().to_vec());
        self.stage = Stage::AwaitingRequest;

        // A request pipelined behind the greeting
        if consumed < data.len() {
            self.handle_request(&data[consumed..]);
        }
    }

    fn handle_request(&mut self, data: &[u8]) {
        let (request, consumed) = match address::parse_request(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("{}", ProxyError::from(e));
                return;
            }
        };

        info!(
            "{} requests {:?} to {}:{}",
            self.peer,
            request.named_command(),
            request.target.host,
            request.target.port
        );

        self.pending_request = Some(request.target.encoded().to_vec());
        self.stage = Stage::Streaming;
        self.start_connect(request);

        // Anything pipelined behind the request is stream data
        if consumed < data.len() {
            self.handle_stream(&data[consumed..]);
        }
    }

    /// start_connect resolves and connects in a task bound to the session
    /// scope. A cancelled task only logs.
    fn start_connect(&mut self, request: ConnectRequest) {
        self.link = Link::Connecting;

        let resolver = Arc::clone(&self.resolver);
        let settings = self.settings.clone();
        let events = self.events.clone();
        let scope = self.scope.clone();
        let host = request.target.host;
        let port = request.target.port;

        tokio::spawn(async move {
            let work = async {
                let candidate = resolver::resolve(resolver.as_ref(), &host, port).await?;
                let stream = relay::establish(candidate, &settings).await?;
                Ok::<_, ProxyError>((stream, candidate))
            };

            select! {
                _ = scope.cancelled() => {
                    warn!("{}", ProxyError::Cancelled);
                }
                res = work => {
                    let _ = events.send(SessionEvent::Established(res));
                }
            }
        });
    }

    fn handle_stream(&mut self, data: &[u8]) {
        match self.link {
            Link::Ready => {
                if let Err(e) = self.relay.forward(data) {
                    self.relay_failed(e);
                }
            }
            Link::Connecting => {
                debug!("buffering {} bytes until relay is ready", data.len());
                self.early_data.extend_from_slice(data);
            }
            Link::Idle | Link::Failed => {
                warn!("{}", ProxyError::StageViolation(data.len()));
            }
        }
    }

    fn handle_established(&mut self, res: Result<(TcpStream, SocketAddr)>) {
        match res {
            Ok((stream, target)) => {
                // Reply is queued before the pump can push target bytes
                self.reply(ReplyCode::Succeeded);
                self.relay.attach(
                    stream,
                    target,
                    self.client.clone(),
                    self.events.clone(),
                    &self.settings,
                    &self.scope,
                );
                self.link = Link::Ready;

                if !self.early_data.is_empty() {
                    let early = std::mem::take(&mut self.early_data);
                    self.handle_stream(&early);
                }
            }
            Err(e) => {
                error!("connect for {} failed: {e}", self.peer);
                self.link = Link::Failed;
                self.early_data.clear();
                self.reply(ReplyCode::GeneralFailure);
            }
        }
    }

    /// relay_failed answers a dead outbound once and drops it. The
    /// session itself stays open.
    fn relay_failed(&mut self, e: ProxyError) {
        if !self.relay.is_established() {
            debug!("ignoring stale relay failure: {e}");
            return;
        }

        error!("relay for {} failed: {e}", self.peer);
        self.relay.teardown();
        self.link = Link::Failed;
        self.reply(ReplyCode::GeneralFailure);
    }
}

impl<R: Resolver> ConnectionHandler for Session<R> {
    type Event = SessionEvent;

    fn on_open(&mut self) {
        info!("connection from {}", self.peer);
    }

    fn on_data(&mut self, data: &[u8]) {
        match self.stage {
            Stage::AwaitingGreeting => self.handle_greeting(data),
            Stage::AwaitingRequest => self.handle_request(data),
            Stage::Streaming => self.handle_stream(data),
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Established(res) => self.handle_established(res),
            SessionEvent::RelayWriteFailed(e) => self.relay_failed(ProxyError::RelayWrite(e)),
            SessionEvent::OutboundClosed(None) => {
                info!("target closed the relay for {}", self.peer);
            }
            SessionEvent::OutboundClosed(Some(e)) => {
                warn!("outbound read for {} failed: {e}", self.peer);
            }
        }
    }

    fn on_close(&mut self) {
        info!("connection from {} closed", self.peer);
        self.scope.cancel();
        self.relay.teardown();
    }
}
