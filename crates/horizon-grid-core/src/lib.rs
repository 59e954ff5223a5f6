//! Core systems for Horizon Grid.
//!
//! This crate provides the foundational components shared by the row models:
//!
//! - **Signal/Slot System**: Type-safe change notification
//! - **Logging**: `tracing` targets, span names and a timing guard
//! - **Errors**: Core error types
//!
//! # Signal/Slot Example
//!
//! ```
//! use horizon_grid_core::Signal;
//!
//! // Create a signal that notifies when a value changes
//! let value_changed = Signal::<i32>::new();
//!
//! // Connect a slot to handle the signal
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! // Emit the signal
//! value_changed.emit(42);
//!
//! // Disconnect when done
//! value_changed.disconnect(conn_id);
//! ```

mod error;
pub mod logging;
pub mod signal;

pub use error::SignalError;
pub use logging::PerfSpan;
pub use signal::{BlockGuard, ConnectionId, Signal};
