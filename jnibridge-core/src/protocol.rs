//! Check-clear protocol enforcement
//!
//! A pending exception where none is allowed means the check-clear contract
//! was broken somewhere above: that is an internal bug, not a runtime
//! condition, so it stops the process instead of being returned as an error.

use tracing::error;

use crate::ffi::RuntimeEnv;

/// Panics if an exception is pending on `env`
pub fn assert_no_pending<E: RuntimeEnv + ?Sized>(env: &E, site: &str) {
    if env.exception_check() {
        error!(site, "pending exception before a runtime call");
        env.exception_describe();
        panic!(
            "{}: called into the runtime with a pending exception (check-clear protocol violated)",
            site
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::simulated::SimulatedRuntime;
    use crate::ffi::RuntimeHost;

    #[test]
    fn test_no_pending_passes() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        assert_no_pending(&env, "test");
    }

    #[test]
    #[should_panic(expected = "check-clear protocol violated")]
    fn test_pending_is_fatal() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "left behind");
        assert_no_pending(&env, "test");
    }
}
