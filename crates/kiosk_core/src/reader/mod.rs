//! Identity-token reader.
//!
//! The hardware driver sits behind `TokenDriver`; `EventSource` owns the read
//! loop and delivers login events to registered callbacks.

pub mod event_source;

pub use event_source::{EventSource, HardwareError, ReaderTiming, TokenCallback, TokenDriver};
