//! C8 (change notifier) and C9 (realtime hub): turns row-trigger `NOTIFY`
//! traffic into a process-local `Event` bus, then fans that bus out to
//! per-connection SSE subscribers with table and RLS filtering.

pub mod error;
pub mod event;
pub mod hub;
pub mod listener;

pub use error::RealtimeError;
pub use event::{Event, EventAction};
pub use hub::{stream, HubState};
pub use listener::run;

/// Capacity of the in-process fan-out channel shared by the listener and
/// every hub subscription. A slow individual subscriber lags its own
/// `broadcast::Receiver`, not this shared sender, so one stalled SSE
/// connection cannot starve the others.
pub const EVENT_BUS_CAPACITY: usize = 1024;
