//! Connection construction shared by client and server sides

use codec::{SyncKeyAllocator, TypeRegistry};
use config::{NetworkConfig, SubstrateConfig};
use locking::{LockRegistry, RegistrySettings};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionContext, ConnectionHandler};
use crate::correlator::RequestCorrelator;
use crate::{Result, TransportError};

/// Builds connections that share one handler, correlator, type registry and
/// lock registry. Clones share all of them.
#[derive(Clone)]
pub struct TransportFactory {
    handler: Arc<dyn ConnectionHandler>,
    correlator: RequestCorrelator,
    types: Arc<TypeRegistry>,
    locks: LockRegistry,
    config: NetworkConfig,
    next_id: Arc<AtomicU64>,
}

impl TransportFactory {
    /// Factory on the global lock registry, which is reconfigured from
    /// `config.locking`
    pub fn new(handler: impl ConnectionHandler, config: &SubstrateConfig) -> Self {
        let locks = LockRegistry::global();
        locks.configure(RegistrySettings::from(&config.locking));
        Self::with_lock_registry(handler, config, locks)
    }

    /// Factory whose locks report to `locks` instead of the global registry.
    /// `config.locking` is ignored; `locks` keeps its own settings.
    pub fn with_lock_registry(
        handler: impl ConnectionHandler,
        config: &SubstrateConfig,
        locks: LockRegistry,
    ) -> Self {
        let correlator =
            RequestCorrelator::new_in(&locks, SyncKeyAllocator::global(), &config.correlation);
        Self {
            handler: Arc::new(handler),
            correlator,
            types: TypeRegistry::shared_standard(),
            locks,
            config: config.network.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Use `correlator` for every connection made from now on
    pub fn with_correlator(mut self, correlator: RequestCorrelator) -> Self {
        self.correlator = correlator;
        self
    }

    /// Encode and decode with `types` instead of the standard registry
    pub fn with_type_registry(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn lock_registry(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Open a client connection
    pub fn connect(&self, addr: impl ToSocketAddrs) -> Result<Connection> {
        let stream = TcpStream::connect(addr).map_err(|e| {
            TransportError::network_with_source("Failed to connect", e)
        })?;
        debug!(peer = ?stream.peer_addr().ok(), "Connected");
        self.from_stream(stream)
    }

    /// Wrap an already connected stream
    pub fn from_stream(&self, stream: TcpStream) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer_addr()?;
        let name = format!("conn-{}-{}", id, peer);
        Connection::start(
            stream,
            name,
            ConnectionContext {
                handler: Arc::clone(&self.handler),
                correlator: self.correlator.clone(),
                types: Arc::clone(&self.types),
                locks: self.locks.clone(),
                config: self.config.clone(),
            },
        )
    }

    /// Listen for server-side connections
    pub fn bind(&self, addr: impl ToSocketAddrs) -> Result<Listener> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| TransportError::network_with_source("Failed to bind listener", e))?;
        info!(addr = ?listener.local_addr().ok(), "Listening");
        Ok(Listener {
            listener,
            factory: self.clone(),
        })
    }
}

impl std::fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFactory")
            .field("correlator", &self.correlator)
            .field("config", &self.config)
            .finish()
    }
}

/// Server socket producing connections from its factory
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    factory: TransportFactory,
}

impl Listener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until a peer connects
    pub fn accept(&self) -> Result<Connection> {
        let (stream, peer) = self.listener.accept()?;
        debug!(peer = %peer, "Accepted connection");
        self.factory.from_stream(stream)
    }

    pub fn factory(&self) -> &TransportFactory {
        &self.factory
    }
}
