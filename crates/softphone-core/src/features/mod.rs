//! Optional observers built on the public client surface
//!
//! Features never reach into the orchestrator: they hold a
//! [`WeakSipClient`](crate::client::WeakSipClient), listen on the event bus and
//! call public methods, so dropping the client drops their effect too.

pub mod history;
pub mod presence;

pub use history::{CallHistory, CallRecord};
pub use presence::PresenceWatcher;
