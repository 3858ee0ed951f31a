//! Bridge configuration
//!
//! Defaults match the managed-side utility classes shipped with the frontend.
//! A config can be loaded from a JSON file; missing fields fall back to the
//! defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// Environment variable consulted by [`BridgeConfig::from_env`] to mark a test context
pub const TEST_CONTEXT_ENV: &str = "JNIBRIDGE_TEST_CONTEXT";

/// Environment variable consulted by [`BridgeConfig::from_env`] for the JVM classpath
pub const CLASSPATH_ENV: &str = "JNIBRIDGE_CLASSPATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Variable carrying space-separated JVM startup options
    pub options_env_var: String,
    /// Substring whose presence means the option is already configured
    pub required_option: String,
    /// Option appended when `required_option` is missing
    pub appended_option: String,
    /// Skip startup option tuning (the test harness configures the JVM itself)
    pub test_context: bool,
    /// Class holding the static diagnostic and metrics entry points
    pub util_class: String,
    pub internal_exception_class: String,
    /// Also render the stack trace of translated exceptions
    pub log_stack_traces: bool,
    /// Local reference budget for a single bridge call
    pub local_frame_capacity: i32,
    /// Extra directories searched for libjvm before the built-in locations
    pub jvm_search_paths: Vec<PathBuf>,
    /// Classpath handed to a JVM created by this process
    pub classpath: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            options_env_var: "JAVA_TOOL_OPTIONS".to_string(),
            required_option: "-XX:MaxPermSize".to_string(),
            appended_option: "-XX:MaxPermSize=128m".to_string(),
            test_context: false,
            util_class: "org.apache.impala.common.JniUtil".to_string(),
            internal_exception_class: "org.apache.impala.common.InternalException".to_string(),
            log_stack_traces: true,
            local_frame_capacity: 16,
            jvm_search_paths: Vec::new(),
            classpath: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults, adjusted by `JNIBRIDGE_TEST_CONTEXT` and `JNIBRIDGE_CLASSPATH`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(TEST_CONTEXT_ENV) {
            config.test_context = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Ok(classpath) = std::env::var(CLASSPATH_ENV) {
            config.classpath = Some(classpath);
        }
        config
    }

    /// Load a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| BridgeError::Config {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Serializes unit tests that read or write the process environment
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
