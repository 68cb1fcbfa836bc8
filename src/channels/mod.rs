//! External service clients — chat platform and handoff notifier.

pub mod avito;
pub mod telegram;

pub use avito::AvitoClient;
pub use telegram::TelegramNotifier;
