pub mod common;
pub mod completions;
pub mod content;
pub mod outbox;
pub mod session;
pub mod settings;
pub mod sync;
