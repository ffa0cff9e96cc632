//! Subscription engine: the reconnecting, resumable event iterator
//!
//! A subscription is a server-push stream carried over the host's event
//! bus. The client issues `rpc_subscribe`, listens on
//! `rpc:subscription:sub_<id>`, and feeds every payload into a FIFO queue
//! consumed by [`EventIterator`].
//!
//! ## Guarantees
//!
//! - **Ordering** - per connection, consumers observe events in enqueue
//!   order; with several concurrent consumers each element is delivered
//!   to exactly one of them.
//! - **Resumption** - data events may carry an id; on reconnect the most
//!   recently observed id is sent as `lastEventId` so the host can resume.
//! - **Deterministic shutdown** - every exit path (explicit close, abort
//!   signal, host completion, terminal error) releases the event-bus
//!   listener exactly once and unblocks every waiting consumer before a
//!   best-effort `rpc_unsubscribe`.
//! - **Bounded failure** - reconnection backs off exponentially with
//!   jitter and gives up after the configured budget, broadcasting
//!   `MAX_RECONNECTS_EXCEEDED` to every pending consumer.
//!
//! ## Module Organization
//!
//! - `id` - subscription ID type and channel naming
//! - `event` - wire event schema
//! - `queue` - the FIFO feeding consumers, with terminator items
//! - `state` - connection state machine
//! - `iterator` - the engine itself
//! - `consume` - callback-style consumption helper

mod consume;
mod event;
mod id;
mod iterator;
mod queue;
mod state;

pub use consume::{ConsumeCallbacks, ConsumerHandle, FinishReason, consume_event_iterator};
pub use event::{Event, SubscriptionEvent};
pub use id::{ParseIdError, SubscriptionId};
pub use iterator::{EventIterator, TypedEventIterator};
pub use state::ConnectionState;
