//! Shared data structures for the correlation and alerting engine
//!
//! - Reading / ChannelKey: instrument values keyed as `VALNAME_in_UNITNAME`
//! - Readings: one cycle's channel snapshot (channel key → value)
//! - RunEvent: authoritative run record fetched from the record store

mod event;
mod reading;

pub use event::*;
pub use reading::*;
