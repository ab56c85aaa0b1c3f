//! The connection object shared by the receive loop and the write path.
//!
//! One [`Client`] owns everything the protocol needs: session state, the
//! outbound id counter, the retransmission cache and the transport's write
//! half. All of it sits behind a single async mutex that is held for the whole
//! of each logical operation (allocate + cache + write on the way out; parse +
//! ack bookkeeping + replay + dispatch on the way in). Transport reads happen
//! outside the lock.
//!
//! Every connection also has a cut signal that lives outside the lock.
//! [`Client::disconnect`] fires it first, so a write stalled on a peer that
//! stopped reading gives up and releases the lock.

use crate::assembler::ReceiveAssembler;
use crate::cache::RetransmissionCache;
use crate::dispatch::{ClientEvents, DisconnectReason, Dispatcher};
use crate::error::ClientError;
use crate::sequence::SequenceIds;
use crate::state::{ConnectionState, SessionState};
use crate::transport::{connect_tcp, IoStream};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vulp_wire::{
    parse_resync, ControlCode, Frame, Packet, PacketType, SessionKey, WireError,
    DEFAULT_MAX_PAYLOAD,
};

/// Configuration for a client
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Protocol version announced in the login packet
    pub protocol_version: u32,
    /// Largest payload accepted from the bouncer; larger frames drop the connection
    pub max_payload_len: usize,
    /// Bytes requested per transport read
    pub read_chunk: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            max_payload_len: DEFAULT_MAX_PAYLOAD,
            read_chunk: 1024,
        }
    }
}

/// What happened to an outbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport
    Written {
        /// Sequence id, if reliable
        sequence_id: Option<u32>,
    },
    /// Reliable packet cached but not written because the session is not
    /// authenticated; it goes out with the next resync
    Deferred {
        /// Sequence id
        sequence_id: u32,
    },
    /// Control packet dropped because the session is not authenticated
    Suppressed,
    /// The write failed; a reliable packet stays cached
    WriteFailed {
        /// Sequence id, if reliable
        sequence_id: Option<u32>,
        /// Error text
        error: String,
    },
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on the graceful transport shutdown in [`Client::disconnect`]
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Write half of the current connection
struct Connection {
    writer: BoxedWriter,
    /// Flips to `true` when the connection is cut locally
    cut: watch::Receiver<bool>,
}

impl Connection {
    /// Write one packet, giving up as soon as the connection is cut
    async fn write(&mut self, packet: &Packet, ack: u32) -> std::io::Result<()> {
        let bytes = packet
            .encode(ack)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let Connection { writer, cut } = self;

        tokio::select! {
            biased;

            _ = cut_signal(cut) => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closed locally",
            )),
            result = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            } => result,
        }
    }
}

/// Resolves once the connection is cut or its owner is gone
async fn cut_signal(cut: &mut watch::Receiver<bool>) {
    let _ = cut.wait_for(|cut| *cut).await;
}

/// State guarded by the session lock
struct Inner {
    session: SessionState,
    ids: SequenceIds,
    cache: RetransmissionCache,
    connection: Option<Connection>,
    /// Bumped on every attach so a stale receive loop cannot touch a newer connection
    generation: u64,
}

struct ReceiveTask {
    cut: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    config: ClientConfig,
    dispatcher: Dispatcher,
    inner: Mutex<Inner>,
    receiver: Mutex<Option<ReceiveTask>>,
}

/// Client side of the resumable packet protocol.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a disconnected client and the consumer end of its event channel
    pub fn new(config: ClientConfig) -> (Self, ClientEvents) {
        let (dispatcher, events) = Dispatcher::channel();
        let shared = Shared {
            config,
            dispatcher,
            inner: Mutex::new(Inner::new()),
            receiver: Mutex::new(None),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            events,
        )
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Dial the bouncer over plain TCP and attach the stream
    pub async fn connect(&self, addr: SocketAddr) -> Result<(), ClientError> {
        info!("Connecting to {}", addr);
        let stream = connect_tcp(addr).await?;
        self.attach(IoStream::Plain(stream)).await;
        Ok(())
    }

    /// Take over an established stream.
    ///
    /// Any previous connection is torn down first. The cache, id counter,
    /// session key and resume cursor carry over; the receive buffer does not.
    pub async fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.disconnect().await;

        let (reader, writer) = tokio::io::split(stream);
        let (cut, cut_rx) = watch::channel(false);
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            inner.generation += 1;
            inner.connection = Some(Connection {
                writer: Box::new(writer),
                cut: cut_rx.clone(),
            });
            if let Some(state) = inner.session.on_connected() {
                self.shared.dispatcher.connection_state_changed(state);
            }
            info!(
                "Attached connection generation={} cached={}",
                inner.generation,
                inner.cache.len()
            );
            inner.generation
        };

        let handle = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            generation,
            reader,
            cut_rx,
        ));
        *self.shared.receiver.lock().await = Some(ReceiveTask { cut, handle });
    }

    /// Close the transport and wait for the receive loop to exit.
    ///
    /// The cut signal fires before the session lock is taken, so this returns
    /// even when a write is stuck on a peer that stopped reading.
    pub async fn disconnect(&self) {
        let task = self.shared.receiver.lock().await.take();
        if let Some(task) = task {
            task.cut.send_replace(true);
            if let Err(e) = task.handle.await {
                warn!("Receive loop ended abnormally: {}", e);
            }
        }

        let mut inner = self.shared.inner.lock().await;
        if let Some(mut connection) = inner.connection.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, connection.writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Transport shutdown failed: {}", e),
                Err(_) => debug!("Transport shutdown timed out, dropping it"),
            }
        }
        if let Some(state) = inner.session.on_disconnected() {
            self.shared.dispatcher.connection_state_changed(state);
            self.shared.dispatcher.disconnected(DisconnectReason::Local);
        }
    }

    /// Send the login packet, presenting the stored key and resume cursor.
    ///
    /// This is the only packet written while unauthenticated.
    pub async fn login(&self) -> Result<SendOutcome, ClientError> {
        let mut inner = self.shared.inner.lock().await;
        let login = inner.session.login(self.shared.config.protocol_version);
        let packet = Packet::control(PacketType::LOGIN, login.encode())?;

        info!(
            "Logging in: version={} last_received_id={} fresh_session={}",
            login.protocol_version,
            login.last_received_id,
            login.session_key.is_zero()
        );

        let outcome = inner
            .write_gated(&packet, true, &self.shared.dispatcher)
            .await;
        if matches!(outcome, SendOutcome::Written { .. }) {
            if let Some(state) = inner.session.on_login_sent() {
                self.shared.dispatcher.connection_state_changed(state);
            }
        }
        Ok(outcome)
    }

    /// Send an application packet.
    ///
    /// Reliable types get the next sequence id and are cached until the
    /// bouncer acknowledges them, whether or not the write happens now.
    pub async fn send(
        &self,
        packet_type: PacketType,
        payload: impl Into<Bytes>,
    ) -> Result<SendOutcome, ClientError> {
        let payload = payload.into();
        if u32::try_from(payload.len()).is_err() {
            return Err(WireError::Size(payload.len()).into());
        }

        let mut inner = self.shared.inner.lock().await;
        let packet = if packet_type.is_control() {
            Packet::control(packet_type, payload)?
        } else {
            let id = inner.ids.allocate().ok_or(ClientError::SequenceExhausted)?;
            let packet = Packet::reliable(packet_type, id, payload)?;
            inner.cache.append(packet.clone())?;
            packet
        };

        Ok(inner
            .write_gated(&packet, false, &self.shared.dispatcher)
            .await)
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.session.state()
    }

    /// Current (or last issued) session key
    pub async fn session_key(&self) -> SessionKey {
        self.shared.inner.lock().await.session.session_key()
    }

    /// Highest sequence id received from the bouncer
    pub async fn last_received_id(&self) -> u32 {
        self.shared.inner.lock().await.session.last_received_id()
    }

    /// Ids still waiting for acknowledgment, ascending
    pub async fn cached_ids(&self) -> Vec<u32> {
        self.shared.inner.lock().await.cache.ids()
    }

    /// Number of packets waiting for acknowledgment
    pub async fn cache_len(&self) -> usize {
        self.shared.inner.lock().await.cache.len()
    }
}

impl Shared {
    /// Handle every complete frame sitting in the assembler
    async fn process_buffered(
        &self,
        generation: u64,
        assembler: &mut ReceiveAssembler,
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return Ok(());
        }
        for frame in assembler.frames() {
            inner.handle_frame(frame?, &self.dispatcher).await?;
        }
        Ok(())
    }

    async fn connection_lost(&self, generation: u64, reason: DisconnectReason) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.connection = None;
        if let Some(state) = inner.session.on_disconnected() {
            info!(
                "Connection lost ({}), {} packets cached for resync",
                reason,
                inner.cache.len()
            );
            self.dispatcher.connection_state_changed(state);
            self.dispatcher.disconnected(reason);
        }
    }
}

impl Inner {
    fn new() -> Self {
        Self {
            session: SessionState::new(),
            ids: SequenceIds::new(),
            cache: RetransmissionCache::new(),
            connection: None,
            generation: 0,
        }
    }

    /// Write a packet if the session allows it
    async fn write_gated(
        &mut self,
        packet: &Packet,
        allow_unauthenticated: bool,
        dispatcher: &Dispatcher,
    ) -> SendOutcome {
        let sequence_id = packet.sequence_id();
        let held = match sequence_id {
            Some(sequence_id) => SendOutcome::Deferred { sequence_id },
            None => SendOutcome::Suppressed,
        };

        if !self.session.may_write(allow_unauthenticated) {
            debug!(
                "Holding packet type={} seq={:?}: session is {}",
                packet.packet_type(),
                sequence_id,
                self.session.state()
            );
            return held;
        }

        let ack = self.session.last_received_id();
        let Some(connection) = self.connection.as_mut() else {
            return held;
        };

        match connection.write(packet, ack).await {
            Ok(()) => {
                debug!(
                    "Sent packet type={} seq={:?} ack={} len={}",
                    packet.packet_type(),
                    sequence_id,
                    ack,
                    packet.payload().len()
                );
                SendOutcome::Written { sequence_id }
            }
            Err(e) => {
                warn!(
                    "Write failed for packet type={} seq={:?}: {}",
                    packet.packet_type(),
                    sequence_id,
                    e
                );
                dispatcher.write_failed(sequence_id, &e);
                SendOutcome::WriteFailed {
                    sequence_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Apply one inbound frame
    async fn handle_frame(
        &mut self,
        frame: Frame,
        dispatcher: &Dispatcher,
    ) -> Result<(), ClientError> {
        let Frame {
            packet,
            peer_ack_id,
        } = frame;

        // Ack bookkeeping happens before dispatch so a resync later in the
        // same read sees the pruned cache.
        if let Some(sequence_id) = packet.sequence_id() {
            let ack = peer_ack_id.unwrap_or(0);
            self.session.record_received(sequence_id);
            self.cache.prune(ack);
            debug!(
                "Received packet type={} seq={} ack={} len={}",
                packet.packet_type(),
                sequence_id,
                ack,
                packet.payload().len()
            );
            dispatcher.deliver(packet.packet_type(), packet.payload().clone());
            return Ok(());
        }

        match ControlCode::try_from(packet.packet_type()) {
            Ok(ControlCode::AuthSuccess) => {
                let key = SessionKey::from_slice(packet.payload())?;
                if let Some(state) = self.session.on_auth_success(key) {
                    dispatcher.connection_state_changed(state);
                }
            }
            Ok(ControlCode::AuthFailure) => {
                warn!("Bouncer rejected login");
                if let Some(state) = self.session.on_auth_failure() {
                    dispatcher.connection_state_changed(state);
                }
                dispatcher.auth_failed();
            }
            Ok(ControlCode::Resync) => {
                let acked = parse_resync(packet.payload())?;
                if let Some(state) = self.session.on_resync() {
                    dispatcher.connection_state_changed(state);
                }
                let pruned = self.cache.prune(acked);
                let replayed = self.replay(dispatcher).await;
                info!(
                    "Resync: peer acked={} pruned={} replayed={} cached={}",
                    acked,
                    pruned,
                    replayed,
                    self.cache.len()
                );
            }
            Err(_) => {
                debug!(
                    "Received control packet type={} len={}",
                    packet.packet_type(),
                    packet.payload().len()
                );
                dispatcher.deliver(packet.packet_type(), packet.payload().clone());
            }
        }
        Ok(())
    }

    /// Retransmit every cached packet in ascending order.
    ///
    /// Stops at the first failed write; nothing is removed from the cache.
    async fn replay(&mut self, dispatcher: &Dispatcher) -> usize {
        let Inner {
            session,
            cache,
            connection,
            ..
        } = self;
        let Some(connection) = connection.as_mut() else {
            return 0;
        };

        let ack = session.last_received_id();
        let mut replayed = 0;
        for packet in cache.snapshot() {
            if let Err(e) = connection.write(packet, ack).await {
                warn!(
                    "Replay interrupted at seq={:?}: {}",
                    packet.sequence_id(),
                    e
                );
                dispatcher.write_failed(packet.sequence_id(), &e);
                break;
            }
            replayed += 1;
        }
        replayed
    }
}

async fn receive_loop<R>(
    shared: Arc<Shared>,
    generation: u64,
    mut reader: R,
    mut cut: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut assembler =
        ReceiveAssembler::new(shared.config.max_payload_len, shared.config.read_chunk);
    debug!("Receive loop started (generation {})", generation);

    let reason = loop {
        let read = tokio::select! {
            biased;

            _ = cut_signal(&mut cut) => break None,
            read = assembler.fill(&mut reader) => read,
        };

        match read {
            Ok(0) => break Some(DisconnectReason::Closed),
            Ok(_) => {
                if let Err(e) = shared.process_buffered(generation, &mut assembler).await {
                    warn!("Dropping connection: {}", e);
                    break Some(DisconnectReason::Protocol(e.to_string()));
                }
            }
            Err(e) => break Some(DisconnectReason::Transport(e.to_string())),
        }
    };

    if let Some(reason) = reason {
        shared.connection_lost(generation, reason).await;
    }
    debug!("Receive loop finished (generation {})", generation);
}
