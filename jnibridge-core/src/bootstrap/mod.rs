//! Runtime bootstrap and the cached cross-runtime calls
//!
//! [`JniBridge::bootstrap`] runs once per process: it tunes startup options,
//! obtains an environment, resolves the utility classes and methods, and
//! freezes them into a [`Registry`]. After that the bridge is shared freely
//! between threads; each call obtains its own per-thread environment.
//!
//! ```rust,no_run
//! use jnibridge_core::bootstrap::JniBridge;
//! use jnibridge_core::config::BridgeConfig;
//! use jnibridge_core::diagnostics::MemoryMetricsRequest;
//! use jnibridge_core::ffi::simulated::SimulatedRuntime;
//!
//! # fn main() -> jnibridge_core::Result<()> {
//! let bridge = JniBridge::new(SimulatedRuntime::standard(), BridgeConfig::default());
//! bridge.bootstrap()?;
//! let metrics = bridge.jvm_memory_metrics(&MemoryMetricsRequest::default())?;
//! println!("{} pools", metrics.memory_pools.len());
//! # Ok(())
//! # }
//! ```

pub mod options;

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::BridgeConfig;
use crate::diagnostics::{
    JmxJsonResponse, MemoryMetricsRequest, MemoryMetricsResponse, ThreadsInfoRequest,
    ThreadsInfoResponse,
};
use crate::error::{BridgeError, Result};
use crate::exception::ExceptionTranslator;
use crate::ffi::{JValue, RuntimeEnv, RuntimeHost};
use crate::guard::{ArrayCriticalGuard, LocalFrameGuard, LocalRefGuard};
use crate::protocol;
use crate::registry::{ClassRegistry, MethodDescriptor, MethodRef, MethodRegistry, Registry};
use crate::stats::{BridgeStats, ScopedCallTimer};

pub const THROWABLE_TO_STRING: MethodDescriptor = MethodDescriptor::new_static(
    "throwableToString",
    "(Ljava/lang/Throwable;)Ljava/lang/String;",
);
pub const THROWABLE_TO_STACK_TRACE: MethodDescriptor = MethodDescriptor::new_static(
    "throwableToStackTrace",
    "(Ljava/lang/Throwable;)Ljava/lang/String;",
);
pub const GET_JVM_MEMORY_METRICS: MethodDescriptor =
    MethodDescriptor::new_static("getJvmMemoryMetrics", "([B)[B");
pub const GET_JVM_THREADS_INFO: MethodDescriptor =
    MethodDescriptor::new_static("getJvmThreadsInfo", "([B)[B");
pub const GET_JMX_JSON: MethodDescriptor = MethodDescriptor::new_static("getJMXJson", "()[B");
/// Optional; older utility classes do not have it
pub const INIT_PAUSE_MONITOR: MethodDescriptor =
    MethodDescriptor::new_static("initPauseMonitor", "()V");

/// Bootstrap progress. `Failed` and `FullyInitialized` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotInitialized,
    EnvironmentReady,
    ClassesResolved,
    MethodsResolved,
    FullyInitialized,
    Failed,
}

/// Everything resolved by a successful bootstrap
struct BridgeCache {
    registry: Registry,
    translator: ExceptionTranslator,
    memory_metrics: MethodRef,
    threads_info: MethodRef,
    jmx_json: MethodRef,
    pause_monitor: Option<MethodRef>,
}

/// Bridge between native code and one managed runtime host
pub struct JniBridge<H: RuntimeHost> {
    host: H,
    config: BridgeConfig,
    state: Mutex<BootstrapState>,
    cache: OnceLock<BridgeCache>,
    stats: Arc<BridgeStats>,
}

impl<H: RuntimeHost> JniBridge<H> {
    pub fn new(host: H, config: BridgeConfig) -> Self {
        Self {
            host,
            config,
            state: Mutex::new(BootstrapState::NotInitialized),
            cache: OnceLock::new(),
            stats: BridgeStats::new(),
        }
    }

    /// Run the one-time bootstrap sequence.
    ///
    /// Only the first call does any work; every later call, including after a
    /// failed bootstrap, returns [`BridgeError::AlreadyInitialized`].
    pub fn bootstrap(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != BootstrapState::NotInitialized {
            return Err(BridgeError::AlreadyInitialized { state: *state });
        }

        let cache = match self.resolve_all(&mut state) {
            Ok(cache) => cache,
            Err(e) => {
                error!(state = ?*state, "Bootstrap failed: {}", e);
                *state = BootstrapState::Failed;
                return Err(e);
            }
        };
        let (classes, methods) = (cache.registry.class_count(), cache.registry.method_count());
        if self.cache.set(cache).is_err() {
            return Err(BridgeError::AlreadyInitialized { state: *state });
        }
        *state = BootstrapState::FullyInitialized;
        info!(classes, methods, "JNI bridge initialized");
        Ok(())
    }

    fn resolve_all(&self, state: &mut BootstrapState) -> Result<BridgeCache> {
        options::tune_startup_options(&self.host, &self.config)?;

        let env = self.host.env()?;
        *state = BootstrapState::EnvironmentReady;

        let util = self.config.util_class.as_str();
        let mut classes = ClassRegistry::new();
        let util_class = classes.resolve(&env, util)?;
        classes.resolve(&env, &self.config.internal_exception_class)?;
        *state = BootstrapState::ClassesResolved;

        let mut methods = MethodRegistry::new();
        let mut resolve = |descriptor: &MethodDescriptor| {
            methods.resolve(&env, &classes, util, descriptor)
        };
        let to_string = resolve(&THROWABLE_TO_STRING)?;
        let to_stack_trace = resolve(&THROWABLE_TO_STACK_TRACE)?;
        let memory_metrics = resolve(&GET_JVM_MEMORY_METRICS)?;
        let threads_info = resolve(&GET_JVM_THREADS_INFO)?;
        let jmx_json = resolve(&GET_JMX_JSON)?;
        let pause_monitor = if MethodRegistry::method_exists(&env, util_class, &INIT_PAUSE_MONITOR) {
            Some(resolve(&INIT_PAUSE_MONITOR)?)
        } else {
            debug!(class = util, "No pause monitor entry point");
            None
        };
        *state = BootstrapState::MethodsResolved;

        let translator = ExceptionTranslator::new(to_string, to_stack_trace)
            .with_stack_trace(self.config.log_stack_traces)
            .with_stats(Arc::clone(&self.stats));
        Ok(BridgeCache {
            registry: Registry::freeze(classes, methods),
            translator,
            memory_metrics,
            threads_info,
            jmx_json,
            pause_monitor,
        })
    }

    pub fn state(&self) -> BootstrapState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The frozen handle registry, once bootstrap has completed
    pub fn registry(&self) -> Result<&Registry> {
        Ok(&self.cache()?.registry)
    }

    /// Environment handle for the calling thread
    pub fn env(&self) -> Result<H::Env<'_>> {
        self.host.env()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// Translate whatever is pending on `env` into an error prefixed with `prefix`
    pub fn translate_pending<E: RuntimeEnv + ?Sized>(&self, env: &E, prefix: &str) -> Result<()> {
        self.cache()?.translator.translate(env, prefix)
    }

    /// Call a static `([B)[B` or `()[B` method, passing `request` (if any) as
    /// a byte array and copying out the returned bytes.
    ///
    /// All local references created by the call live in a frame popped on
    /// return. A raised exception is translated into [`BridgeError::Managed`].
    pub fn call_static_bytes(&self, method: MethodRef, request: Option<&[u8]>) -> Result<Vec<u8>> {
        let cache = self.cache()?;
        let env = self.host.env()?;
        protocol::assert_no_pending(&env, "JniBridge::call_static_bytes");
        let _timer = ScopedCallTimer::new(&self.stats);

        let _frame = self.acquire(LocalFrameGuard::push(&env, self.config.local_frame_capacity))?;
        let args = match request {
            Some(bytes) => {
                let array = env.new_byte_array(bytes);
                if ExceptionTranslator::check(&env) || array.is_none() {
                    self.stats.record_acquisition_failure();
                    return Err(BridgeError::ResourceAcquisition(
                        "failed to allocate request array",
                    ));
                }
                vec![JValue::Object(array)]
            }
            None => Vec::new(),
        };

        let class = method.class().as_object();
        let result = env.call_static_object(class, method.id(), &args);
        let result = LocalRefGuard::from_nullable(&env, result);
        cache.translator.translate(&env, "")?;
        let Some(result) = result else {
            return Ok(Vec::new());
        };

        let pinned = self.acquire(ArrayCriticalGuard::new(&env, result.get()))?;
        let bytes = pinned.as_slice().to_vec();
        Ok(bytes)
    }

    pub fn jvm_memory_metrics(&self, request: &MemoryMetricsRequest) -> Result<MemoryMetricsResponse> {
        let method = self.cache()?.memory_metrics;
        self.call_json(method, Some(request))
    }

    pub fn jvm_threads_info(&self, request: &ThreadsInfoRequest) -> Result<ThreadsInfoResponse> {
        let method = self.cache()?.threads_info;
        self.call_json(method, Some(request))
    }

    /// All JMX beans as a parsed JSON document
    pub fn jmx_json(&self) -> Result<serde_json::Value> {
        let method = self.cache()?.jmx_json;
        let response: JmxJsonResponse = self.call_json(method, None::<&()>)?;
        response.parsed()
    }

    /// Start the managed-side pause monitor. A no-op when the utility class
    /// has no such entry point.
    pub fn init_pause_monitor(&self) -> Result<()> {
        let cache = self.cache()?;
        let Some(method) = cache.pause_monitor else {
            debug!("Pause monitor not available");
            return Ok(());
        };
        let env = self.host.env()?;
        protocol::assert_no_pending(&env, "JniBridge::init_pause_monitor");
        let _timer = ScopedCallTimer::new(&self.stats);
        env.call_static_void(method.class().as_object(), method.id(), &[]);
        cache.translator.translate(&env, "initPauseMonitor: ")
    }

    fn call_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: MethodRef,
        request: Option<&Req>,
    ) -> Result<Resp> {
        let request = request.map(serde_json::to_vec).transpose()?;
        let response = self.call_static_bytes(method, request.as_deref())?;
        Ok(serde_json::from_slice(&response)?)
    }

    fn acquire<T>(&self, guard: Result<T>) -> Result<T> {
        match guard {
            Ok(guard) => {
                self.stats.record_acquisition();
                Ok(guard)
            }
            Err(e) => {
                self.stats.record_acquisition_failure();
                Err(e)
            }
        }
    }

    fn cache(&self) -> Result<&BridgeCache> {
        self.cache.get().ok_or(BridgeError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::simulated::{SimObject, SimulatedRuntime, Thrown};

    fn bridge() -> JniBridge<SimulatedRuntime> {
        JniBridge::new(SimulatedRuntime::standard(), BridgeConfig::default())
    }

    #[test]
    fn test_bootstrap_reaches_fully_initialized() {
        let bridge = bridge();
        assert_eq!(bridge.state(), BootstrapState::NotInitialized);
        bridge.bootstrap().unwrap();
        assert_eq!(bridge.state(), BootstrapState::FullyInitialized);

        let registry = bridge.registry().unwrap();
        assert_eq!(registry.class_count(), 2);
        assert_eq!(registry.method_count(), 6);
        assert!(registry
            .method(
                &bridge.config().util_class,
                GET_JMX_JSON.name,
                GET_JMX_JSON.signature
            )
            .is_some());
    }

    #[test]
    fn test_second_bootstrap_rejected() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        let before = bridge.host().counters();

        let err = bridge.bootstrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::AlreadyInitialized {
                state: BootstrapState::FullyInitialized
            }
        ));
        let after = bridge.host().counters();
        assert_eq!(before.find_class_calls, after.find_class_calls);
        assert_eq!(before.method_lookups, after.method_lookups);
    }

    #[test]
    fn test_missing_class_fails_bootstrap() {
        let config = BridgeConfig {
            util_class: "does.not.Exist".to_string(),
            ..BridgeConfig::default()
        };
        let bridge = JniBridge::new(SimulatedRuntime::standard(), config);
        let err = bridge.bootstrap().unwrap_err();
        assert!(matches!(err, BridgeError::ClassNotFound { .. }));
        assert_eq!(bridge.state(), BootstrapState::Failed);

        let err = bridge.bootstrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::AlreadyInitialized {
                state: BootstrapState::Failed
            }
        ));
    }

    #[test]
    fn test_operations_before_bootstrap() {
        let bridge = bridge();
        assert!(matches!(
            bridge.jmx_json().unwrap_err(),
            BridgeError::NotInitialized
        ));
        assert!(matches!(
            bridge.init_pause_monitor().unwrap_err(),
            BridgeError::NotInitialized
        ));
        assert!(bridge.registry().is_err());
    }

    #[test]
    fn test_missing_pause_monitor_is_optional() {
        let rt = SimulatedRuntime::standard();
        rt.remove_method(&BridgeConfig::default().util_class, INIT_PAUSE_MONITOR.name);
        let bridge = JniBridge::new(rt, BridgeConfig::default());
        bridge.bootstrap().unwrap();
        assert_eq!(bridge.registry().unwrap().method_count(), 5);
        bridge.init_pause_monitor().unwrap();
        assert!(!bridge.host().pause_monitor_started());
    }

    #[test]
    fn test_init_pause_monitor() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        bridge.init_pause_monitor().unwrap();
        assert!(bridge.host().pause_monitor_started());
    }

    #[test]
    #[should_panic(expected = "JniBridge::init_pause_monitor")]
    fn test_pause_monitor_with_exception_left_on_thread() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        let env = bridge.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "left behind");
        let _ = bridge.init_pause_monitor();
    }

    #[test]
    #[should_panic(expected = "JniBridge::call_static_bytes")]
    fn test_call_with_exception_left_on_thread() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        let method = bridge.registry().unwrap().method(
            &bridge.config().util_class,
            GET_JVM_MEMORY_METRICS.name,
            GET_JVM_MEMORY_METRICS.signature,
        );
        let env = bridge.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "left behind");
        let _ = bridge.call_static_bytes(method.unwrap(), None);
    }

    #[test]
    fn test_memory_metrics_round_trip() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        let metrics = bridge
            .jvm_memory_metrics(&MemoryMetricsRequest::default())
            .unwrap();
        assert!(metrics.pool("heap").is_some());

        let counters = bridge.host().counters();
        assert_eq!(counters.frames_pushed, counters.frames_popped);
        assert_eq!(counters.critical_acquired, counters.critical_released);
        assert_eq!(counters.live_locals(), 0);
        assert_eq!(bridge.stats().snapshot().foreign_calls, 1);
    }

    #[test]
    fn test_threads_info_complete() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        let summary = bridge
            .jvm_threads_info(&ThreadsInfoRequest::default())
            .unwrap();
        assert!(summary.threads.is_none());
        let complete = bridge
            .jvm_threads_info(&ThreadsInfoRequest {
                get_complete_info: true,
            })
            .unwrap();
        assert_eq!(complete.threads.map(|t| t.len()), Some(2));
    }

    #[test]
    fn test_jmx_json_parsed() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        let jmx = bridge.jmx_json().unwrap();
        assert_eq!(jmx["beans"][0]["VmName"], "Simulated VM");
    }

    #[test]
    fn test_managed_exception_translated() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        bridge.host().define_method(
            &bridge.config().util_class,
            &GET_JVM_MEMORY_METRICS,
            |_| Err(Thrown::new("java.lang.IllegalArgumentException", "bad request")),
        );

        let err = bridge
            .jvm_memory_metrics(&MemoryMetricsRequest::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "java.lang.IllegalArgumentException: bad request"
        );
        let counters = bridge.host().counters();
        assert_eq!(counters.frames_pushed, counters.frames_popped);
        assert_eq!(counters.critical_acquired, 0);
        assert_eq!(counters.utf_acquired, counters.utf_released);
        assert_eq!(bridge.stats().snapshot().managed_exceptions, 1);
    }

    #[test]
    fn test_translate_pending() {
        let bridge = bridge();
        let env = bridge.env().unwrap();
        assert!(matches!(
            bridge.translate_pending(&env, "x: ").unwrap_err(),
            BridgeError::NotInitialized
        ));
        drop(env);

        bridge.bootstrap().unwrap();
        let env = bridge.env().unwrap();
        assert!(bridge.translate_pending(&env, "x: ").is_ok());
        env.throw_new("java.lang.UnsupportedOperationException", "nope");
        let err = bridge.translate_pending(&env, "loading table: ").unwrap_err();
        assert_eq!(
            err.to_string(),
            "loading table: java.lang.UnsupportedOperationException: nope"
        );
        assert!(!env.exception_check());
    }

    #[test]
    fn test_garbage_response_is_payload_error() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        bridge.host().define_method(
            &bridge.config().util_class,
            &GET_JVM_MEMORY_METRICS,
            |_| Ok(Some(SimObject::Bytes(b"not json".to_vec()))),
        );
        let err = bridge
            .jvm_memory_metrics(&MemoryMetricsRequest::default())
            .unwrap_err();
        assert!(matches!(err, BridgeError::Payload(_)));
    }

    #[test]
    fn test_request_array_failure() {
        let bridge = bridge();
        bridge.bootstrap().unwrap();
        bridge.host().update_faults(|f| f.byte_array_fails = true);
        let err = bridge
            .jvm_memory_metrics(&MemoryMetricsRequest::default())
            .unwrap_err();
        assert!(matches!(err, BridgeError::ResourceAcquisition(_)));
        let counters = bridge.host().counters();
        assert_eq!(counters.frames_pushed, counters.frames_popped);
        assert_eq!(bridge.stats().snapshot().acquisition_failures, 1);
    }
}
