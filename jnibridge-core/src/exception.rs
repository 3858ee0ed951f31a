//! Translation of pending managed exceptions into [`BridgeError`] values
//!
//! The translator renders the pending throwable through two cached static
//! diagnostics on the utility class. Either diagnostic may itself raise (most
//! likely because the VM is out of memory); that secondary exception is
//! cleared and replaced by a fixed message naming the diagnostic, never
//! translated in turn.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::bootstrap::{THROWABLE_TO_STACK_TRACE, THROWABLE_TO_STRING};
use crate::error::{BridgeError, Result};
use crate::ffi::{JValue, ObjectRef, RuntimeEnv};
use crate::guard::{LocalRefGuard, Utf8CharsGuard};
use crate::registry::MethodRef;
use crate::stats::BridgeStats;

#[derive(Debug, Clone)]
pub struct ExceptionTranslator {
    to_string: MethodRef,
    to_stack_trace: MethodRef,
    with_stack_trace: bool,
    stats: Arc<BridgeStats>,
}

impl ExceptionTranslator {
    /// Translator over the resolved `throwableToString` and
    /// `throwableToStackTrace` methods
    pub fn new(to_string: MethodRef, to_stack_trace: MethodRef) -> Self {
        Self {
            to_string,
            to_stack_trace,
            with_stack_trace: true,
            stats: BridgeStats::new(),
        }
    }

    pub fn with_stack_trace(mut self, enabled: bool) -> Self {
        self.with_stack_trace = enabled;
        self
    }

    pub fn with_stats(mut self, stats: Arc<BridgeStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Turn the pending exception, if any, into `Err(Managed)`.
    ///
    /// Returns `Ok(())` when nothing is pending. On return no exception is
    /// pending on `env`, whatever the outcome.
    pub fn translate<E: RuntimeEnv + ?Sized>(&self, env: &E, prefix: &str) -> Result<()> {
        let Some(throwable) = env.exception_occurred() else {
            return Ok(());
        };
        env.exception_clear();
        let throwable = LocalRefGuard::new(env, throwable);
        self.stats.record_managed_exception();

        let message = self.render(env, self.to_string, THROWABLE_TO_STRING.name, throwable.get())?;

        let stack_trace = if self.with_stack_trace {
            match self.render(
                env,
                self.to_stack_trace,
                THROWABLE_TO_STACK_TRACE.name,
                throwable.get(),
            ) {
                Ok(trace) => {
                    debug!(stack_trace = %trace, "Managed exception stack trace");
                    Some(trace)
                }
                Err(e) => {
                    warn!("Stack trace unavailable: {}", e);
                    Some(e.to_string())
                }
            }
        } else {
            None
        };

        Err(BridgeError::Managed {
            message: format!("{}{}", prefix, message),
            stack_trace,
        })
    }

    /// Clear any pending exception, reporting whether there was one
    pub fn check<E: RuntimeEnv + ?Sized>(env: &E) -> bool {
        let raised = env.exception_check();
        if raised {
            env.exception_clear();
        }
        raised
    }

    /// Call one diagnostic on `throwable` and copy out the returned string
    fn render<E: RuntimeEnv + ?Sized>(
        &self,
        env: &E,
        method: MethodRef,
        diagnostic: &'static str,
        throwable: ObjectRef,
    ) -> Result<String> {
        let rendered = env.call_static_object(
            method.class().as_object(),
            method.id(),
            &[JValue::Object(Some(throwable))],
        );
        let rendered = LocalRefGuard::from_nullable(env, rendered);
        if Self::check(env) {
            self.stats.record_oom_fallback();
            let err = BridgeError::SuspectedOom { diagnostic };
            error!("{}", err);
            return Err(err);
        }
        let Some(rendered) = rendered else {
            return Ok("null".to_string());
        };

        let chars = Utf8CharsGuard::new(env, rendered.get())?;
        let text = chars.to_string_lossy().into_owned();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::ffi::simulated::{SimulatedRuntime, Thrown};
    use crate::ffi::RuntimeHost;
    use crate::registry::{ClassRegistry, MethodRegistry};

    fn translator(rt: &SimulatedRuntime) -> ExceptionTranslator {
        let util = BridgeConfig::default().util_class;
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();
        let mut methods = MethodRegistry::new();
        classes.resolve(&env, &util).unwrap();
        let to_string = methods
            .resolve(&env, &classes, &util, &THROWABLE_TO_STRING)
            .unwrap();
        let to_stack_trace = methods
            .resolve(&env, &classes, &util, &THROWABLE_TO_STACK_TRACE)
            .unwrap();
        ExceptionTranslator::new(to_string, to_stack_trace)
    }

    #[test]
    fn test_nothing_pending() {
        let rt = SimulatedRuntime::standard();
        let translator = translator(&rt);
        let env = rt.env().unwrap();
        assert!(translator.translate(&env, "ctx: ").is_ok());
        assert_eq!(rt.counters().calls, 0);
    }

    #[test]
    fn test_translate_with_prefix_and_stack() {
        let rt = SimulatedRuntime::standard();
        let translator = translator(&rt);
        let env = rt.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "boom");

        let err = translator.translate(&env, "ctx: ").unwrap_err();
        match err {
            BridgeError::Managed {
                message,
                stack_trace,
            } => {
                assert_eq!(message, "ctx: java.lang.IllegalStateException: boom");
                assert!(stack_trace.unwrap().contains("\tat "));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!env.exception_check());

        let counters = rt.counters();
        assert_eq!(counters.live_locals(), 0);
        assert_eq!(counters.utf_acquired, 2);
        assert_eq!(counters.utf_released, 2);
    }

    #[test]
    fn test_translate_without_stack() {
        let rt = SimulatedRuntime::standard();
        let translator = translator(&rt).with_stack_trace(false);
        let env = rt.env().unwrap();
        env.throw_new("java.lang.RuntimeException", "x");

        match translator.translate(&env, "").unwrap_err() {
            BridgeError::Managed { stack_trace, .. } => assert!(stack_trace.is_none()),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(rt.counters().calls, 1);
    }

    #[test]
    fn test_to_string_raising_is_not_translated_again() {
        let rt = SimulatedRuntime::standard();
        let translator = translator(&rt);
        let util = BridgeConfig::default().util_class;
        rt.define_method(&util, &THROWABLE_TO_STRING, |_| {
            Err(Thrown::new("java.lang.OutOfMemoryError", "Java heap space"))
        });
        let env = rt.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "boom");

        let err = translator.translate(&env, "ctx: ").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SuspectedOom {
                diagnostic: "throwableToString"
            }
        ));
        assert!(err.to_string().contains("throwableToString"));
        assert!(!env.exception_check());
        // original cleared, then the secondary one
        assert_eq!(rt.counters().exceptions_cleared, 2);
        assert_eq!(rt.counters().live_locals(), 0);
    }

    #[test]
    fn test_stack_trace_failure_keeps_message() {
        let rt = SimulatedRuntime::standard();
        let translator = translator(&rt);
        let util = BridgeConfig::default().util_class;
        rt.define_method(&util, &THROWABLE_TO_STACK_TRACE, |_| {
            Err(Thrown::new("java.lang.OutOfMemoryError", "Java heap space"))
        });
        let env = rt.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "boom");

        match translator.translate(&env, "").unwrap_err() {
            BridgeError::Managed {
                message,
                stack_trace,
            } => {
                assert_eq!(message, "java.lang.IllegalStateException: boom");
                let stack_trace = stack_trace.unwrap();
                assert!(stack_trace
                    .starts_with("throwableToStackTrace threw an unchecked exception"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!env.exception_check());
    }

    #[test]
    fn test_stats_record_fallbacks() {
        let rt = SimulatedRuntime::standard();
        let stats = BridgeStats::new();
        let translator = translator(&rt).with_stats(Arc::clone(&stats));
        let util = BridgeConfig::default().util_class;
        rt.define_method(&util, &THROWABLE_TO_STRING, |_| {
            Err(Thrown::new("java.lang.OutOfMemoryError", ""))
        });
        let env = rt.env().unwrap();
        env.throw_new("java.lang.Error", "e");
        let _ = translator.translate(&env, "");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.managed_exceptions, 1);
        assert_eq!(snapshot.oom_fallbacks, 1);
    }

    #[test]
    fn test_check_clears() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        assert!(!ExceptionTranslator::check(&env));
        env.throw_new("java.lang.Error", "e");
        assert!(ExceptionTranslator::check(&env));
        assert!(!env.exception_check());
    }
}
