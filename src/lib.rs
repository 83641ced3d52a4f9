// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::module_name_repetitions, // e.g. SendError in sender module
    clippy::missing_errors_doc,      // Internal API
    clippy::missing_panics_doc       // Internal API
)]

pub mod app;
pub mod buffer;
pub mod collector;
pub mod parser;
pub mod reliability;
pub mod sender;
pub mod server;

// Re-export main types for easy access
pub use app::Config;
pub use collector::Collector;
pub use sender::Sender;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
