//! ATM layer-2 model for discrete-event network simulation.
//!
//! Cells are admitted into per-class queues under RED, scheduled by a
//! weighted round-robin that honours bandwidth reservations, batched into
//! four-cell frames and serialised onto point-to-point links. Nothing here
//! owns a clock: time is passed in, and future work is handed to an
//! [`event::EventSink`].
//!
//! - [`cell`]: header layouts, HEC, idle cells
//! - [`red`] and [`queue`]: RED admission and the byte-bounded cell FIFO
//! - [`scheduler`]: weighted round-robin with a strict-priority control queue
//! - [`framer`]: segmentation and frame assembly
//! - [`link`]: busy/idle transmission state
//! - [`interface`] and [`node`]: per-interface aggregates, switching and delivery
//! - [`routing`]: VPI/VCI translation tables
//! - [`config`], [`stats`], [`metrics`]: configuration, reports and Prometheus text

pub mod cell;
pub mod config;
pub mod event;
pub mod framer;
pub mod interface;
pub mod link;
pub mod metrics;
pub mod node;
pub mod queue;
pub mod red;
pub mod routing;
pub mod scheduler;
pub mod stats;

pub use cell::{Cell, CellHeader, Circuit, HeaderFormat};
pub use config::{ConfigError, Layer2Config};
pub use event::{Endpoint, Event, EventQueue, EventSink};
pub use framer::{DataUnit, Frame};
pub use node::{Delivery, Node, NodeType};
pub use queue::{InsertOutcome, RedQueue};
pub use red::{RedController, RedParams, RedVerdict};
pub use scheduler::WrrScheduler;
