use crate::{
    relay::RelaySettings,
    resolver::{Resolver, SystemResolver},
    session::{ConnectionHandler, Session},
};
use anyhow::{Result, anyhow, bail};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::mpsc::{self, UnboundedReceiver},
};
use tracing::{Instrument, debug, error, info, info_span};

/// Size of each read from a client connection
const CLIENT_READ_BUFFER: usize = 4096;

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server<R = SystemResolver> {
    pub listen_addr: String,
    pub settings: RelaySettings,
    resolver: Arc<R>,
    listener: Option<TcpListener>,
}

impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            settings: RelaySettings::default(),
            resolver: Arc::new(SystemResolver),
            listener: None,
        }
    }
}

/// Socks5Server implementation block
impl<R: Resolver> Socks5Server<R> {
    /// with_settings replaces the outbound relay settings
    pub fn with_settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// with_resolver swaps the name resolver used by every session
    pub fn with_resolver<T: Resolver>(self, resolver: T) -> Socks5Server<T> {
        Socks5Server {
            listen_addr: self.listen_addr,
            settings: self.settings,
            resolver: Arc::new(resolver),
            listener: self.listener,
        }
    }

    /// bind to the listen address; may only be called once
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("[ERR] bind can only be called once");
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("[ERR] listener missing after bind"))?;

        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = listener.accept().await?;

            let resolver = Arc::clone(&self.resolver);
            let settings = self.settings.clone();
            let span = info_span!("connection", %peer_addr);

            // One task and one session per client
            tokio::spawn(
                async move {
                    if let Err(e) = handle_connection(inbound, peer_addr, resolver, settings).await {
                        error!("connection error: {e}");
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// handle_connection drives one session from its client socket until the
/// client goes away
async fn handle_connection<R: Resolver>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    resolver: Arc<R>,
    settings: RelaySettings,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (client_tx, client_rx) = mpsc::unbounded_channel();

    tokio::spawn(write_to_client(writer, client_rx).in_current_span());

    let (mut session, mut events) = Session::new(peer_addr, client_tx, resolver, settings);
    session.on_open();

    let mut buf = vec![0u8; CLIENT_READ_BUFFER];
    let res = loop {
        select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => session.on_data(&buf[..n]),
                Err(e) => break Err(anyhow::Error::from(e)),
            },
            Some(event) = events.recv() => session.on_event(event),
        }
    };

    session.on_close();
    res
}

/// write_to_client drains queued bytes into the client socket in order
async fn write_to_client(mut writer: OwnedWriteHalf, mut queued: UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = queued.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            debug!("client write failed: {e}");
            break;
        }
    }
}
