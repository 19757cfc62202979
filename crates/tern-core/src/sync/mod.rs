//! Push connection
//!
//! Maintains at most one live WebSocket connection per authenticated
//! session and feeds decoded events into the event bus.
//!
//! ## Lifecycle
//!
//! 1. Dial with the current bearer token as a query parameter
//! 2. Pump JSON event frames onto the bus
//! 3. On transport failure, retry with capped exponential backoff
//! 4. After five consecutive failures, settle until a manual reconnect
//!
//! ## Usage
//!
//! ```ignore
//! let manager = Arc::new(ConnectionManager::new(ws_url, config, tokens, bus));
//! manager.connect()?;
//! let mut state = manager.subscribe_state();
//! ```

mod backoff;
mod connection;

pub use backoff::{ReconnectConfig, ReconnectPolicy};
pub use connection::{ConnectError, ConnectionManager, ConnectionState};
