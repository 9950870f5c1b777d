//! Ready handlers and notifiers used by the `dropwatch` binary.

pub mod handler;
pub mod notifier;

pub use handler::{CommandHandler, LogHandler};
pub use notifier::TelegramNotifier;
