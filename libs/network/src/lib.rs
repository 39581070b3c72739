//! Network Infrastructure
//!
//! Framed TCP connections with a dedicated receive thread per connection, and
//! the request correlator that turns asynchronous replies into blocking calls.
//!
//! ```text
//! application ── send/request ──► Connection ── [len][tag][body] ──► peer
//!      ▲                              │
//!      │ on_message                   │ receive thread
//!      └──── ConnectionHandler ◄──────┴──► RequestCorrelator ──► PendingReply / ResultsQueue
//! ```

pub mod connection;
pub mod correlator;
pub mod error;
pub mod factory;
pub mod watchdog;

// Re-export commonly used types
pub use connection::{Connection, ConnectionHandler, ConnectionStats};
pub use correlator::{PendingReply, RequestCorrelator};
pub use error::{Result, TransportError};
pub use factory::{Listener, TransportFactory};
pub use watchdog::StallWatchdog;
