//! Startup option tuning
//!
//! Older runtimes need a bigger permanent generation than their default. The
//! option is passed through the environment variable the VM reads at
//! creation, so it only has an effect before any VM exists in the process.

use std::ffi::{OsStr, OsString};

use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::ffi::{RuntimeHost, JNI_VERSION_1_8};

/// The new value of the options variable, or `None` when `current` already
/// carries `required`.
pub fn with_required_option(
    current: Option<&OsStr>,
    required: &str,
    appended: &str,
) -> Option<OsString> {
    let current = current.unwrap_or_default();
    if current.to_string_lossy().contains(required) {
        return None;
    }
    let mut updated = current.to_os_string();
    updated.push(" ");
    updated.push(appended);
    Some(updated)
}

/// Make sure the options variable carries the required option before the VM
/// is created.
///
/// Writes the process environment, so it must run before other threads read
/// it; bootstrap calls it first, under its own lock.
pub fn tune_startup_options<H: RuntimeHost>(host: &H, config: &BridgeConfig) -> Result<()> {
    if config.test_context {
        debug!("Test context, leaving startup options alone");
        return Ok(());
    }
    if host.supports_version(JNI_VERSION_1_8) {
        debug!("JNI 1.8 supported, no startup option tuning needed");
        return Ok(());
    }

    let created = host
        .created_runtimes()
        .map_err(|_| BridgeError::RuntimeEnumeration)?;
    if created > 0 {
        return Err(BridgeError::AlreadyRunning);
    }

    let var = config.options_env_var.as_str();
    let tuning_error = || BridgeError::OptionTuning {
        var: var.to_string(),
        option: config.appended_option.clone(),
    };
    if var.is_empty() || var.contains(['=', '\0']) || config.appended_option.contains('\0') {
        return Err(tuning_error());
    }

    let current = std::env::var_os(var);
    match with_required_option(
        current.as_deref(),
        &config.required_option,
        &config.appended_option,
    ) {
        Some(updated) => {
            info!(var, value = %updated.to_string_lossy(), "Appending startup option");
            std::env::set_var(var, updated);
        }
        None => debug!(var, "{} already set", config.required_option),
    }
    Ok(())
}
