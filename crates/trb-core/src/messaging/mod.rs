//! Messaging client abstractions (Telegram bot today; user sessions behind the same port).

pub mod port;
pub mod throttled;
pub mod types;
