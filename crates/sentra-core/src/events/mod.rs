//! Policy-change event system.
//!
//! Components that mutate the policy set announce what they did through the
//! [`ChangeNotifier`]; interested parties (cache invalidation, audit
//! recording, operator tooling) subscribe by event kind or to everything.

mod notifier;
mod types;

pub use notifier::{ChangeHandler, ChangeNotifier, DEFAULT_QUEUE_CAPACITY};
pub use types::{ChangeEvent, ChangeEventKind};
