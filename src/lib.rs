//! Inbox engine: turns files dropped into a vault inbox into organized notes.

pub mod api;
pub mod config;
pub mod error;
pub mod inbox;
pub mod intelligence;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod watcher;
