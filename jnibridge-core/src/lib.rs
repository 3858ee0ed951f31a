//! jnibridge core - safe native access to an embedded JVM
//!
//! This crate lets native code call into a managed runtime hosted in the same
//! process and get its failures back as ordinary `Result` values:
//! - cross-runtime references are owned by scoped guards and released exactly
//!   once on every exit path
//! - pending managed exceptions are translated into [`BridgeError`]s
//! - class and method handles are resolved once and cached for the process
//!
//! # Layers:
//! - [`ffi`]: the primitive runtime surface, with a libjvm backend and an
//!   in-process simulated runtime
//! - [`guard`], [`registry`], [`exception`]: the safety layer over it
//! - [`bootstrap`]: one-time startup and the cached diagnostic calls

pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exception;
pub mod ffi;
pub mod guard;
pub mod protocol;
pub mod registry;
pub mod stats;

pub use bootstrap::{BootstrapState, JniBridge};
pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorKind, Result};
pub use exception::ExceptionTranslator;
pub use ffi::{RuntimeEnv, RuntimeHost};
pub use registry::{ClassRef, ClassRegistry, MethodDescriptor, MethodRef, MethodRegistry, Registry};
pub use stats::{BridgeStats, ScopedCallTimer};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once; only
/// the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
    {
        info!("jnibridge v{}", env!("CARGO_PKG_VERSION"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        let _env = config::env_lock();
        init_tracing();
        init_tracing();
    }
}
