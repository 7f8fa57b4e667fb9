//! Basic-block trace collection for instrumented processes.
//!
//! An instrumentation engine drives a [`Collector`] through its `on_*`
//! callbacks. Hits inside whitelisted images are buffered and streamed over a
//! [`Channel`] to a consumer, which parses them back with
//! [`reader::TraceReader`].

mod buffer;
mod collector;
mod error;
mod termination;
mod watcher;

pub mod channel;
pub mod reader;
pub mod whitelist;
pub mod wire;

pub use buffer::EventBuffer;
pub use channel::Channel;
pub use collector::{Collector, Stats};
pub use error::Error;
pub use termination::{ContextChangeReason, ExitProcess, ProcessControl, Reason, is_fatal_exception};
pub use watcher::{Poll, SignalTrigger, TimeoutTrigger};
pub use whitelist::{ImageIndex, ImageRef, Whitelist};
pub use wire::{Header, Record};
