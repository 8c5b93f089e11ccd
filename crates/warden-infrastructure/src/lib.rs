//! # Infrastructure Layer
//!
//! Implementations of the domain ports plus the ambient plumbing the
//! daemon needs: SQLite persistence, YAML configuration with validation,
//! tracing setup, the system clock, the sysinfo-backed process sampler,
//! the signal-based terminator and the logging notifier.
//!
//! Everything here is replaceable behind a domain port; the application
//! and server layers see traits only.

/// Application configuration: types, loader, validation
pub mod config;
/// SQLite-backed policy repository
pub mod database;
/// Structured logging setup
pub mod logging;
/// Tracing-backed notifier
pub mod notifier;
/// Host system adapters: clock, sampler, terminator
pub mod system;

pub use config::{AppConfig, ConfigLoader};
pub use database::SqlitePolicyRepository;
pub use logging::init_logging;
pub use notifier::TracingNotifier;
pub use system::{NixProcessTerminator, SysinfoProcessSampler, SystemClock};
