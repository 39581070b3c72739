//! # Connection - one framed TCP byte stream
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────┬───────────┬──────────────┐
//! │ length: u32  │ tag: [6]  │ body         │
//! └──────────────┴───────────┴──────────────┘
//!   length counts tag + body
//! ```
//!
//! ## Threading
//!
//! Every connection runs one receive thread for its lifetime. Any number of
//! threads may call [`Connection::send`]; whole frames are written under the
//! connection's send lock so concurrent frames never interleave. The send lock
//! carries a stream closer, so a sender stuck in a blocked write can be freed
//! by the stall watchdog.
//!
//! ## Dispatch
//!
//! Responses, and requests whose key is pending, go to the
//! [`RequestCorrelator`]. Everything else goes to the [`ConnectionHandler`].
//! Unmatched responses are logged and dropped.

use bytes::BytesMut;
use codec::{dump::hex_dump, Message, SyncRequest, TypeRegistry, FRAME_HEADER_LEN, TAG_LEN};
use config::NetworkConfig;
use locking::{order, spawn_tracked_in, LockRegistry, OrderedLock, Tracked};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::correlator::{PendingReply, RequestCorrelator};
use crate::{Result, TransportError};

/// Application callbacks for one side of a connection
///
/// Callbacks run on the connection's receive thread; `on_connect` runs on the
/// thread that created the connection, before the receive thread starts.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A decoded message the correlator did not consume
    fn on_message(&self, connection: &Connection, message: Message);

    fn on_connect(&self, _connection: &Connection) {}

    /// The receive loop ended, by shutdown or by an I/O error
    fn on_disconnect(&self, _connection: &Connection) {}
}

/// Everything a connection shares with the factory that made it
pub(crate) struct ConnectionContext {
    pub handler: Arc<dyn ConnectionHandler>,
    pub correlator: RequestCorrelator,
    pub types: Arc<TypeRegistry>,
    pub locks: LockRegistry,
    pub config: NetworkConfig,
}

/// Frame and byte counters for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub connected_for: Duration,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
}

struct ConnectionInner {
    name: String,
    peer: SocketAddr,
    stream: TcpStream,
    send_lock: OrderedLock,
    receiver: Tracked<Option<JoinHandle<()>>>,
    running: AtomicBool,
    closed: AtomicBool,
    connected_at: Instant,
    counters: Counters,
    handler: Arc<dyn ConnectionHandler>,
    correlator: RequestCorrelator,
    types: Arc<TypeRegistry>,
    config: NetworkConfig,
}

/// Handle to a framed TCP connection. Clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap a connected stream and start its receive thread
    pub(crate) fn start(stream: TcpStream, name: String, context: ConnectionContext) -> Result<Self> {
        stream.set_nodelay(context.config.tcp_nodelay)?;
        let peer = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        let closer = stream.try_clone()?;

        let send_lock = OrderedLock::with_stream_closer(
            &context.locks,
            &format!("{} send", name),
            order::CONNECTION_SEND,
            move || {
                let _ = closer.shutdown(Shutdown::Both);
            },
        );
        let receiver = Tracked::new_in(
            &context.locks,
            &format!("{} state", name),
            order::CONNECTION_STATE,
            None,
        );

        let connection = Connection {
            inner: Arc::new(ConnectionInner {
                name,
                peer,
                stream,
                send_lock,
                receiver,
                running: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                connected_at: Instant::now(),
                counters: Counters::default(),
                handler: context.handler,
                correlator: context.correlator,
                types: context.types,
                config: context.config,
            }),
        };

        info!(connection = %connection.inner.name, peer = %peer, "Connection established");
        connection.inner.handler.on_connect(&connection);

        let looping = connection.clone();
        let handle = spawn_tracked_in(&context.locks, connection.inner.name.clone(), move || {
            looping.receive_loop(reader)
        })
        .map_err(|e| TransportError::network_with_source("Failed to spawn receive thread", e))?;
        *connection.inner.receiver.lock() = Some(handle);

        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.stream.local_addr()?)
    }

    /// True until the receive loop ends or [`shutdown`](Self::shutdown) is called
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.inner.correlator
    }

    pub fn stats(&self) -> ConnectionStats {
        let counters = &self.inner.counters;
        ConnectionStats {
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            frames_received: counters.frames_received.load(Ordering::Relaxed),
            bytes_received: counters.bytes_received.load(Ordering::Relaxed),
            connected_for: self.inner.connected_at.elapsed(),
        }
    }

    /// Encode and write one frame.
    ///
    /// An unanswered [`SyncRequest`] is registered with the correlator first;
    /// its answer arrives through the request's results queue, if it has one.
    /// Use [`request`](Self::request) to wait on the answer directly.
    pub fn send(&self, message: &Message) -> Result<()> {
        let registered = match message {
            Message::SyncRequest(request) => self.inner.correlator.register(request.clone()),
            _ => None,
        };
        let result = self.write_message(message);
        if let (Err(_), Some(pending)) = (&result, &registered) {
            self.inner.correlator.expire(pending.sync_key());
        }
        result
    }

    /// Send an unanswered request and return a handle to wait for its reply
    pub fn request(&self, request: SyncRequest) -> Result<PendingReply> {
        let sync_key = request.sync_key();
        let pending = self.inner.correlator.register(request.clone()).ok_or_else(|| {
            TransportError::protocol(format!(
                "Request {} is already answered and cannot await a reply",
                sync_key
            ))
        })?;
        if let Err(e) = self.write_message(&request.into()) {
            self.inner.correlator.expire(sync_key);
            return Err(e);
        }
        Ok(pending)
    }

    fn write_message(&self, message: &Message) -> Result<()> {
        if !self.is_running() {
            return Err(TransportError::connection(
                format!("{} is closed", self.inner.name),
                Some(self.inner.peer),
            ));
        }

        let frame = self.inner.types.encode_frame(message)?;
        let payload_len = frame.len() - FRAME_HEADER_LEN;
        if payload_len > self.inner.config.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame of {} bytes exceeds maximum {}",
                payload_len, self.inner.config.max_frame_size
            )));
        }
        if self.inner.config.dump_frames {
            trace!(connection = %self.inner.name, "sending frame:\n{}", hex_dump(&frame));
        }

        let started = Instant::now();
        {
            let _send = self.inner.send_lock.lock();
            (&self.inner.stream)
                .write_all(&frame)
                .map_err(|e| TransportError::network_with_source("Failed to write frame", e))?;
        }

        let counters = &self.inner.counters;
        counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        counters.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        debug!(
            connection = %self.inner.name,
            bytes = frame.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "sent {}",
            message
        );
        Ok(())
    }

    /// Half-close both directions, close the socket and stop the receive thread
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.running.store(false, Ordering::Release);
        if let Err(e) = self.inner.stream.shutdown(Shutdown::Both) {
            debug!(connection = %self.inner.name, error = %e, "Socket already shut down");
        }

        let handle = self.inner.receiver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(connection = %self.inner.name, "Receive thread panicked");
            }
        }
        info!(connection = %self.inner.name, "Connection shut down");
    }

    fn receive_loop(&self, mut reader: TcpStream) {
        debug!(connection = %self.inner.name, "Receive loop running");
        loop {
            let payload = match self.read_frame(&mut reader) {
                Ok(payload) => payload,
                Err(e) => {
                    if self.inner.closed.load(Ordering::Acquire) || e.is_disconnect() {
                        debug!(connection = %self.inner.name, error = %e, "Receive loop ending");
                    } else {
                        warn!(
                            connection = %self.inner.name,
                            error = %e,
                            category = e.category(),
                            "Receive loop failed"
                        );
                    }
                    break;
                }
            };

            match self.inner.types.decode_payload(&payload) {
                Ok(message) => self.dispatch(message),
                Err(e) if e.is_fatal() => {
                    error!(
                        connection = %self.inner.name,
                        error = %e,
                        "Protocol corruption, dropping connection"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        connection = %self.inner.name,
                        error = %e,
                        category = e.category(),
                        "Discarding undecodable frame"
                    );
                }
            }
        }

        self.inner.running.store(false, Ordering::Release);
        self.inner.handler.on_disconnect(self);
        debug!(connection = %self.inner.name, "Receive loop terminated");
    }

    fn read_frame(&self, reader: &mut TcpStream) -> Result<BytesMut> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let len = u32::from_be_bytes(header) as usize;
        if len < TAG_LEN || len > self.inner.config.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame length {} outside {}..={}",
                len, TAG_LEN, self.inner.config.max_frame_size
            )));
        }

        let mut payload = BytesMut::zeroed(len);
        reader.read_exact(&mut payload)?;

        let counters = &self.inner.counters;
        counters.frames_received.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_received
            .fetch_add((FRAME_HEADER_LEN + len) as u64, Ordering::Relaxed);

        if self.inner.config.dump_frames {
            let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + len);
            frame.extend_from_slice(&header);
            frame.extend_from_slice(&payload);
            trace!(connection = %self.inner.name, "received frame:\n{}", hex_dump(&frame));
        }
        Ok(payload)
    }

    fn dispatch(&self, message: Message) {
        debug!(connection = %self.inner.name, "received {}", message);
        let consumed = match &message {
            Message::Response(response) => {
                if !self.inner.correlator.complete(&message) {
                    debug!(
                        connection = %self.inner.name,
                        sync_key = response.sync_key,
                        "Dropping response with no pending request"
                    );
                }
                true
            }
            Message::SyncRequest(_) => self.inner.correlator.complete(&message),
            _ => false,
        };
        if !consumed {
            self.inner.handler.on_message(self, message);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("peer", &self.inner.peer)
            .field("running", &self.is_running())
            .finish()
    }
}
