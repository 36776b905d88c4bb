use crate::{
    error::{ProxyError, Result},
    session::SessionEvent,
};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// ClientSender queues bytes for the client connection. The queue is
/// unbounded: nothing waits for the client to drain it.
pub type ClientSender = UnboundedSender<Vec<u8>>;

/// Default size of each read from the outbound socket
pub const DEFAULT_READ_BUFFER: usize = 512;

/// RelaySettings tunes outbound connections
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Maximum bytes taken from the outbound socket per read
    pub read_buffer_size: usize,

    /// Upper bound on a single connect; None waits for the OS
    pub connect_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
            connect_timeout: None,
        }
    }
}

/// establish opens the outbound TCP connection to a resolved candidate
pub async fn establish(candidate: SocketAddr, settings: &RelaySettings) -> Result<TcpStream> {
    let connect = TcpStream::connect(candidate);

    let res = match settings.connect_timeout {
        Some(timeout) => time::timeout(timeout, connect)
            .await
            .map_err(|_| ProxyError::ConnectTimeout {
                addr: candidate,
                timeout,
            })?,
        None => connect.await,
    };

    res.map_err(|source| ProxyError::Connect {
        addr: candidate,
        source,
    })
}

/// Outbound is the live half of a relay: a queue feeding the writer task
/// and the token stopping both pumps
struct Outbound {
    target: SocketAddr,
    to_target: UnboundedSender<Vec<u8>>,
    stop: CancellationToken,
}

/// Relay owns at most one outbound connection and the tasks pumping it
#[derive(Default)]
pub struct Relay {
    outbound: Option<Outbound>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_established(&self) -> bool {
        self.outbound.is_some()
    }

    /// attach takes ownership of a connected stream and starts pumping it:
    /// outbound bytes go to `client`, queued client bytes go to the stream.
    /// Pump failures come back to the session through `events`.
    pub fn attach(
        &mut self,
        stream: TcpStream,
        target: SocketAddr,
        client: ClientSender,
        events: UnboundedSender<SessionEvent>,
        settings: &RelaySettings,
        scope: &CancellationToken,
    ) {
        // One outbound at a time
        self.teardown();

        let (reader, writer) = stream.into_split();
        let (to_target, queued) = mpsc::unbounded_channel();
        let stop = scope.child_token();

        tokio::spawn(pump_to_client(
            reader,
            client,
            events.clone(),
            stop.clone(),
            settings.read_buffer_size.max(1),
        ));
        tokio::spawn(pump_to_target(writer, queued, events, stop.clone()));

        info!("relay established with {target}");

        self.outbound = Some(Outbound {
            target,
            to_target,
            stop,
        });
    }

    /// forward queues client bytes for the outbound socket without waiting.
    /// Fails once the writer has stopped, e.g. after a broken pipe.
    pub fn forward(&mut self, data: &[u8]) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ProxyError::RelayWrite(io::ErrorKind::NotConnected.into()))?;

        outbound
            .to_target
            .send(data.to_vec())
            .map_err(|_| ProxyError::RelayWrite(io::ErrorKind::BrokenPipe.into()))
    }

    /// teardown stops both pumps and closes the outbound socket. Safe to
    /// call repeatedly or with nothing attached.
    pub fn teardown(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            outbound.stop.cancel();
            info!("relay with {} closed", outbound.target);
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// pump_to_client copies outbound bytes to the client queue until EOF,
/// error, or teardown
async fn pump_to_client(
    mut reader: OwnedReadHalf,
    client: ClientSender,
    events: UnboundedSender<SessionEvent>,
    stop: CancellationToken,
    read_buffer_size: usize,
) {
    let mut buf = vec![0u8; read_buffer_size];

    loop {
        select! {
            _ = stop.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    let _ = events.send(SessionEvent::OutboundClosed(None));
                    break;
                }
                Ok(n) => {
                    if client.send(buf[..n].to_vec()).is_err() {
                        debug!("client queue closed, stopping outbound reads");
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::OutboundClosed(Some(e)));
                    break;
                }
            }
        }
    }
}

/// pump_to_target drains queued client bytes into the outbound socket.
/// The first write error is reported and ends the pump; teardown ends it
/// even mid-write.
async fn pump_to_target(
    mut writer: OwnedWriteHalf,
    mut queued: UnboundedReceiver<Vec<u8>>,
    events: UnboundedSender<SessionEvent>,
    stop: CancellationToken,
) {
    loop {
        select! {
            _ = stop.cancelled() => break,
            chunk = queued.recv() => match chunk {
                Some(chunk) => {
                    // A target that stops reading must not pin the socket open
                    let written = select! {
                        _ = stop.cancelled() => break,
                        res = writer.write_all(&chunk) => res,
                    };

                    if let Err(e) = written {
                        warn!("outbound write failed: {e}");
                        let _ = events.send(SessionEvent::RelayWriteFailed(e));
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn teardown_without_outbound_is_noop() {
        let mut relay = Relay::new();
        relay.teardown();
        relay.teardown();
        assert!(!relay.is_established());
    }

    #[test]
    fn forward_without_outbound_fails() {
        let mut relay = Relay::new();
        assert!(matches!(relay.forward(b"x"), Err(ProxyError::RelayWrite(_))));
    }

    #[tokio::test]
    async fn establish_reports_refused_connect() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = establish(addr, &RelaySettings::default()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Connect { .. }));
    }

    #[tokio::test]
    async fn pumps_bytes_both_ways_and_closes_on_teardown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let settings = RelaySettings::default();
        let stream = establish(addr, &settings).await.unwrap();
        let (mut target, _) = listener.accept().await.unwrap();

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let scope = CancellationToken::new();

        let mut relay = Relay::new();
        relay.attach(stream, addr, client_tx, events_tx, &settings, &scope);
        assert!(relay.is_established());

        relay.forward(b"ping").unwrap();
        let mut buf = [0u8; 4];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        target.write_all(b"pong").await.unwrap();
        assert_eq!(client_rx.recv().await.unwrap(), b"pong".to_vec());

        relay.teardown();
        assert!(!relay.is_established());

        // Outbound socket is closed once both pumps stop
        let n = time::timeout(Duration::from_secs(5), target.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn teardown_interrupts_write_to_stalled_target() {
        const FORWARDED: usize = 32 * 1024 * 1024;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let settings = RelaySettings::default();
        let stream = establish(addr, &settings).await.unwrap();
        let (mut target, _) = listener.accept().await.unwrap();

        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let scope = CancellationToken::new();

        let mut relay = Relay::new();
        relay.attach(stream, addr, client_tx, events_tx, &settings, &scope);

        // Target is not reading, so the writer blocks once buffers fill
        relay.forward(&vec![0xab; FORWARDED]).unwrap();
        time::sleep(Duration::from_millis(200)).await;

        scope.cancel();
        relay.teardown();

        // Only what already sat in socket buffers arrives before EOF
        let mut buf = vec![0u8; 64 * 1024];
        let mut received = 0;
        time::timeout(Duration::from_secs(5), async {
            loop {
                match target.read(&mut buf).await.unwrap() {
                    0 => break,
                    n => received += n,
                }
            }
        })
        .await
        .expect("outbound socket stayed open after teardown");

        assert!(received < FORWARDED, "received {received} bytes");
    }
}
