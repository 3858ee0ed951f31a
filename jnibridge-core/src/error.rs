//! Error taxonomy for the bridge
//!
//! Every failure that crosses back from the managed runtime is returned as a
//! [`BridgeError`] value. The only condition that is not a value is a protocol
//! violation (a pending exception where none may exist), which panics in
//! [`crate::protocol`].

use thiserror::Error;

use crate::bootstrap::BootstrapState;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Coarse category of a [`BridgeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Class or method could not be resolved
    Resolution,
    /// No environment handle could be obtained or created
    RuntimeUnavailable,
    /// A runtime instance exists that this layer did not create
    AlreadyRunning,
    /// A diagnostic call raised while translating another exception
    OutOfMemory,
    /// A scoped guard could not acquire its resource
    ResourceAcquisition,
    /// The managed side raised an exception
    Managed,
    /// Bootstrap ordering was not respected
    Lifecycle,
    /// Process configuration or library loading failed
    Configuration,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to find class {name}")]
    ClassNotFound { name: String },

    #[error("failed to find method {class}.{name}{signature}")]
    MethodNotFound {
        class: String,
        name: String,
        signature: String,
    },

    #[error("failed to create global reference to {name}")]
    GlobalRefFailed { name: String },

    #[error("failed to get/create JVM: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("JNI_GetCreatedJavaVMs() failed")]
    RuntimeEnumeration,

    #[error("JVM has already been spawned; refusing to tune startup options")]
    AlreadyRunning,

    #[error("error setting {option} in {var}")]
    OptionTuning { var: String, option: String },

    #[error("{diagnostic} threw an unchecked exception; the JVM is likely out of memory (OOM)")]
    SuspectedOom { diagnostic: &'static str },

    #[error("{0}")]
    ResourceAcquisition(&'static str),

    #[error("{message}")]
    Managed {
        message: String,
        stack_trace: Option<String>,
    },

    #[error("JniBridge::bootstrap() not called or did not complete")]
    NotInitialized,

    #[error("bootstrap already ran (state: {state:?})")]
    AlreadyInitialized { state: BootstrapState },

    #[error("failed to read config {path}: {source}")]
    Config {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to load JVM library: {0}")]
    LibraryLoad(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl BridgeError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ClassNotFound { .. }
            | BridgeError::MethodNotFound { .. }
            | BridgeError::GlobalRefFailed { .. } => ErrorKind::Resolution,
            BridgeError::RuntimeUnavailable { .. } => ErrorKind::RuntimeUnavailable,
            BridgeError::RuntimeEnumeration | BridgeError::AlreadyRunning => {
                ErrorKind::AlreadyRunning
            }
            BridgeError::SuspectedOom { .. } => ErrorKind::OutOfMemory,
            BridgeError::ResourceAcquisition(_) => ErrorKind::ResourceAcquisition,
            BridgeError::Managed { .. } | BridgeError::Payload(_) => ErrorKind::Managed,
            BridgeError::NotInitialized | BridgeError::AlreadyInitialized { .. } => {
                ErrorKind::Lifecycle
            }
            BridgeError::OptionTuning { .. }
            | BridgeError::Config { .. }
            | BridgeError::LibraryLoad(_) => ErrorKind::Configuration,
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        BridgeError::RuntimeUnavailable {
            reason: reason.into(),
        }
    }
}
