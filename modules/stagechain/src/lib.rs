//! Composable stage chains over a live event stream.
//!
//! A chain starts at a root stage fed by an entry pump. Any stage can delegate
//! control of all future events to a new child ([`Stage::transfer`],
//! [`Stage::enter`]) and gets control back when the child is stopped. Relay tasks
//! forward events one level down, running [`Interrupt`]s that may cancel the
//! child's subtree instead of forwarding. Per-stage quiescence counters keep a
//! subtree from being torn down while events it was handed are still in flight.

pub mod adapters;
mod buffer;
pub mod config;
pub mod counter;
pub mod error;
pub mod interrupt;
pub mod lock;
pub mod options;
pub mod signal;
pub mod source;
pub mod stage;
mod transfer;
pub mod traits;

pub use adapters::{narrowed, Keyed, Keymap, Narrow, Narrowed};
pub use config::Config;
pub use counter::QuiescenceCounter;
pub use error::{FlowError, Result};
pub use interrupt::{stop_next_when, stop_when, Cancel, Control, Interrupt, StopWhen};
pub use lock::{ExclusiveGuard, ExclusiveLock};
pub use options::{Hook, Options};
pub use signal::{ConditionSignal, ListenerToken, Waiter};
pub use source::{open, poll_fn, spawn_pump, start, IterSource, PollFn, Source, StreamSource};
pub use stage::{Delivery, Stage, StageId};
pub use traits::{FlowEvent, Handler};
