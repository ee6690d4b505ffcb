//! The two ways the answer-fill procedure is deployed: a long-running
//! change-feed watcher and a one-shot document-write event handler.

pub mod trigger;
pub mod watcher;

pub use trigger::{Handled, Ineligible, TriggerPayload, decode_payload, handle_event};
pub use watcher::{WatchStats, run_watcher};
