//! Simulated managed runtime
//!
//! An in-process stand-in for the JVM that implements [`RuntimeHost`] and
//! [`RuntimeEnv`] with the same rules a real VM imposes, and enforces them
//! loudly:
//! - calling into the runtime with a pending exception panics; pending
//!   exceptions belong to the thread, so every env on it sees them
//! - calling into the runtime while an array is pinned panics
//! - releasing something that was never acquired (or twice) panics
//!
//! Every acquisition and release is counted in [`SimCounters`], which is what
//! makes exactly-once release observable. Classes and static methods are
//! defined up front; method bodies are plain closures over [`SimObject`]s.
//! [`SimulatedRuntime::standard`] defines the utility classes the bridge
//! bootstraps against.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::os::raw::c_char;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;

use super::{
    JValue, MethodId, MethodKind, ObjectRef, RuntimeEnv, RuntimeHost, JNI_VERSION_1_8,
};
use crate::bootstrap::{
    GET_JMX_JSON, GET_JVM_MEMORY_METRICS, GET_JVM_THREADS_INFO, INIT_PAUSE_MONITOR,
    THROWABLE_TO_STACK_TRACE, THROWABLE_TO_STRING,
};
use crate::config::BridgeConfig;
use crate::diagnostics::{
    JmxJsonResponse, MemoryMetricsRequest, MemoryMetricsResponse, MemoryPool, ThreadInfo,
    ThreadsInfoRequest, ThreadsInfoResponse,
};
use crate::error::{BridgeError, Result};
use crate::registry::MethodDescriptor;

const OOM_ERROR: &str = "java.lang.OutOfMemoryError";

/// A managed object as seen by simulated method bodies
#[derive(Debug, Clone, PartialEq)]
pub enum SimObject {
    Class(String),
    Str(String),
    Bytes(Vec<u8>),
    Throwable { class: String, message: String },
}

/// An exception raised by a simulated method body
#[derive(Debug, Clone, PartialEq)]
pub struct Thrown {
    pub class: String,
    pub message: String,
}

impl Thrown {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

/// Body of a simulated method; object arguments arrive in order, primitives as `None`
pub type MethodBody = Arc<
    dyn Fn(&[Option<SimObject>]) -> std::result::Result<Option<SimObject>, Thrown> + Send + Sync,
>;

struct SimMethod {
    class: String,
    name: String,
    signature: String,
    kind: MethodKind,
    body: MethodBody,
}

struct Slot {
    object: SimObject,
    global: bool,
}

#[derive(Default)]
struct Heap {
    next_id: usize,
    objects: HashMap<usize, Slot>,
    classes: HashSet<String>,
    methods: Vec<SimMethod>,
}

impl Heap {
    fn alloc(&mut self, object: SimObject, global: bool) -> ObjectRef {
        self.next_id += 1;
        let id = self.next_id;
        self.objects.insert(id, Slot { object, global });
        ObjectRef::from_id(NonZeroUsize::new(id).unwrap_or(NonZeroUsize::MIN))
    }
}

/// Failure injection switches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// `env()` fails as if the VM could not be created
    pub runtime_unavailable: bool,
    /// Runtime enumeration itself fails
    pub enumeration_fails: bool,
    /// Pretend a VM was created by someone else before us
    pub preexisting_runtime: bool,
    pub global_ref_fails: bool,
    pub utf_chars_fail: bool,
    pub array_critical_fails: bool,
    pub push_frame_fails: bool,
    pub byte_array_fails: bool,
}

/// Running totals of every runtime interaction that acquires or releases something
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub envs: usize,
    pub find_class_calls: usize,
    pub method_lookups: usize,
    pub global_refs: usize,
    pub locals_created: usize,
    pub locals_deleted: usize,
    pub utf_acquired: usize,
    pub utf_released: usize,
    pub critical_acquired: usize,
    pub critical_released: usize,
    pub frames_pushed: usize,
    pub frames_popped: usize,
    pub exceptions_cleared: usize,
    pub calls: usize,
}

impl SimCounters {
    pub fn live_locals(&self) -> usize {
        self.locals_created - self.locals_deleted
    }
}

struct Inner {
    heap: Mutex<Heap>,
    counters: Mutex<SimCounters>,
    faults: Mutex<Faults>,
    pending: Mutex<HashMap<ThreadId, SimObject>>,
    max_version: AtomicI32,
    created: AtomicBool,
    pause_monitor: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle to one simulated runtime instance
#[derive(Clone)]
pub struct SimulatedRuntime {
    inner: Arc<Inner>,
}

impl SimulatedRuntime {
    /// An empty runtime with no classes defined
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                heap: Mutex::new(Heap::default()),
                counters: Mutex::new(SimCounters::default()),
                faults: Mutex::new(Faults::default()),
                pending: Mutex::new(HashMap::new()),
                max_version: AtomicI32::new(JNI_VERSION_1_8),
                created: AtomicBool::new(false),
                pause_monitor: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// A runtime with the default utility classes defined
    pub fn standard() -> Self {
        Self::standard_for(&BridgeConfig::default())
    }

    /// A runtime with the utility classes named by `config` defined
    pub fn standard_for(config: &BridgeConfig) -> Self {
        let rt = Self::new();
        let util = config.util_class.as_str();
        rt.define_class(util);
        rt.define_class(&config.internal_exception_class);

        rt.define_method(util, &THROWABLE_TO_STRING, |args| match args.first() {
            Some(Some(SimObject::Throwable { class, message })) => {
                Ok(Some(SimObject::Str(format!("{}: {}", class, message))))
            }
            _ => Err(Thrown::new("java.lang.NullPointerException", "throwable")),
        });
        rt.define_method(util, &THROWABLE_TO_STACK_TRACE, |args| match args.first() {
            Some(Some(SimObject::Throwable { class, message })) => Ok(Some(SimObject::Str(
                format!("{}: {}\n\tat {}.<init>(Simulated.java)", class, message, class),
            ))),
            _ => Err(Thrown::new("java.lang.NullPointerException", "throwable")),
        });
        rt.define_method(util, &GET_JVM_MEMORY_METRICS, |args| {
            let _request: MemoryMetricsRequest = decode_request(args)?;
            encode_response(&simulated_memory_metrics())
        });
        rt.define_method(util, &GET_JVM_THREADS_INFO, |args| {
            let request: ThreadsInfoRequest = decode_request(args)?;
            encode_response(&simulated_threads_info(request.get_complete_info))
        });
        rt.define_method(util, &GET_JMX_JSON, |_| {
            let beans = serde_json::json!({
                "beans": [{
                    "name": "java.lang:type=Runtime",
                    "VmName": "Simulated VM",
                }]
            });
            encode_response(&JmxJsonResponse {
                jmx_json: beans.to_string(),
            })
        });
        let started = Arc::clone(&rt.inner.pause_monitor);
        rt.define_method(util, &INIT_PAUSE_MONITOR, move |_| {
            started.store(true, Ordering::SeqCst);
            Ok(None)
        });
        rt
    }

    pub fn define_class(&self, name: &str) {
        lock(&self.inner.heap).classes.insert(name.to_string());
    }

    /// Define (or replace the body of) a method on an already defined class
    pub fn define_method<F>(&self, class: &str, descriptor: &MethodDescriptor, body: F)
    where
        F: Fn(&[Option<SimObject>]) -> std::result::Result<Option<SimObject>, Thrown>
            + Send
            + Sync
            + 'static,
    {
        let body: MethodBody = Arc::new(body);
        let mut heap = lock(&self.inner.heap);
        let existing = heap.methods.iter_mut().find(|m| {
            m.class == class
                && m.name == descriptor.name
                && m.signature == descriptor.signature
                && m.kind == descriptor.kind
        });
        match existing {
            Some(method) => method.body = body,
            None => heap.methods.push(SimMethod {
                class: class.to_string(),
                name: descriptor.name.to_string(),
                signature: descriptor.signature.to_string(),
                kind: descriptor.kind,
                body,
            }),
        }
    }

    /// Remove a method so lookups of it fail
    pub fn remove_method(&self, class: &str, name: &str) {
        let mut heap = lock(&self.inner.heap);
        for method in heap.methods.iter_mut() {
            if method.class == class && method.name == name {
                // Keep the slot so other method ids stay stable.
                method.name = String::new();
            }
        }
    }

    /// Make the runtime report support only up to `version`
    pub fn set_max_version(&self, version: i32) {
        self.inner.max_version.store(version, Ordering::SeqCst);
    }

    pub fn set_faults(&self, faults: Faults) {
        *lock(&self.inner.faults) = faults;
    }

    pub fn update_faults(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut lock(&self.inner.faults));
    }

    pub fn counters(&self) -> SimCounters {
        *lock(&self.inner.counters)
    }

    pub fn is_created(&self) -> bool {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn pause_monitor_started(&self) -> bool {
        self.inner.pause_monitor.load(Ordering::SeqCst)
    }

    /// Number of global references currently alive
    pub fn live_globals(&self) -> usize {
        lock(&self.inner.heap)
            .objects
            .values()
            .filter(|s| s.global)
            .count()
    }

    fn faults(&self) -> Faults {
        lock(&self.inner.faults).clone()
    }

    fn count(&self, update: impl FnOnce(&mut SimCounters)) {
        update(&mut lock(&self.inner.counters));
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_request<T: serde::de::DeserializeOwned>(
    args: &[Option<SimObject>],
) -> std::result::Result<T, Thrown> {
    match args.first() {
        Some(Some(SimObject::Bytes(bytes))) => serde_json::from_slice(bytes)
            .map_err(|e| Thrown::new("org.apache.impala.common.InternalException", e.to_string())),
        _ => Err(Thrown::new("java.lang.NullPointerException", "request")),
    }
}

fn encode_response<T: serde::Serialize>(
    response: &T,
) -> std::result::Result<Option<SimObject>, Thrown> {
    serde_json::to_vec(response)
        .map(|bytes| Some(SimObject::Bytes(bytes)))
        .map_err(|e| Thrown::new("org.apache.impala.common.InternalException", e.to_string()))
}

fn simulated_memory_metrics() -> MemoryMetricsResponse {
    let heap = MemoryPool {
        name: "heap".to_string(),
        committed: 256 << 20,
        init: 64 << 20,
        max: 1 << 30,
        used: 48 << 20,
        ..MemoryPool::default()
    };
    let non_heap = MemoryPool {
        name: "non-heap".to_string(),
        committed: 32 << 20,
        init: 8 << 20,
        max: -1,
        used: 24 << 20,
        ..MemoryPool::default()
    };
    MemoryMetricsResponse {
        memory_pools: vec![heap, non_heap],
        gc_num_collections: 3,
        gc_total_time_ms: 12,
        ..MemoryMetricsResponse::default()
    }
}

fn simulated_threads_info(complete: bool) -> ThreadsInfoResponse {
    ThreadsInfoResponse {
        total_thread_count: 2,
        daemon_thread_count: 1,
        peak_thread_count: 2,
        threads: complete.then(|| {
            vec![
                ThreadInfo {
                    summary: "\"main\" Id=1 RUNNABLE".to_string(),
                    is_in_native: true,
                    ..ThreadInfo::default()
                },
                ThreadInfo {
                    summary: "\"JvmPauseMonitor\" Id=2 TIMED_WAITING".to_string(),
                    ..ThreadInfo::default()
                },
            ]
        }),
    }
}

impl RuntimeHost for SimulatedRuntime {
    type Env<'h> = SimulatedEnv<'h>;

    fn env(&self) -> Result<SimulatedEnv<'_>> {
        if self.faults().runtime_unavailable {
            return Err(BridgeError::unavailable("simulated runtime unavailable"));
        }
        self.inner.created.store(true, Ordering::SeqCst);
        self.count(|c| c.envs += 1);
        Ok(SimulatedEnv {
            rt: self,
            thread: thread::current().id(),
            frames: RefCell::new(Vec::new()),
            utf_outstanding: RefCell::new(Vec::new()),
            pinned: RefCell::new(Vec::new()),
            _not_send: PhantomData,
        })
    }

    fn supports_version(&self, version: i32) -> bool {
        version <= self.inner.max_version.load(Ordering::SeqCst)
    }

    fn created_runtimes(&self) -> Result<usize> {
        let faults = self.faults();
        if faults.enumeration_fails {
            return Err(BridgeError::RuntimeEnumeration);
        }
        Ok(usize::from(self.is_created() || faults.preexisting_runtime))
    }
}

/// One attached thread's view of the simulated runtime
pub struct SimulatedEnv<'h> {
    rt: &'h SimulatedRuntime,
    thread: ThreadId,
    frames: RefCell<Vec<Vec<usize>>>,
    utf_outstanding: RefCell<Vec<usize>>,
    pinned: RefCell<Vec<(usize, usize)>>,
    _not_send: PhantomData<*const ()>,
}

impl SimulatedEnv<'_> {
    /// Raise an exception on this thread, like JNI `ThrowNew`
    pub fn throw_new(&self, class: &str, message: &str) {
        self.raise(Thrown::new(class, message));
    }

    /// Create a managed string, returned as a local reference
    pub fn new_string(&self, value: &str) -> ObjectRef {
        self.enter("NewStringUTF");
        self.new_local(SimObject::Str(value.to_string()))
    }

    /// Look at the object behind a reference without affecting counters
    pub fn object(&self, obj: ObjectRef) -> Option<SimObject> {
        lock(&self.rt.inner.heap)
            .objects
            .get(&obj.id())
            .map(|slot| slot.object.clone())
    }

    /// The exception pending on this env's thread, if any
    pub fn pending_exception(&self) -> Option<SimObject> {
        self.pending().get(&self.thread).cloned()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<ThreadId, SimObject>> {
        lock(&self.rt.inner.pending)
    }

    fn enter(&self, op: &str) {
        if let Some(exc) = self.pending_exception() {
            panic!("{} called with a pending exception: {:?}", op, exc);
        }
        if !self.pinned.borrow().is_empty() {
            panic!("{} called inside a critical region", op);
        }
    }

    fn raise(&self, thrown: Thrown) {
        let exc = SimObject::Throwable {
            class: thrown.class,
            message: thrown.message,
        };
        self.pending().insert(self.thread, exc);
    }

    fn new_local(&self, object: SimObject) -> ObjectRef {
        let obj = lock(&self.rt.inner.heap).alloc(object, false);
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.push(obj.id());
        }
        self.rt.count(|c| c.locals_created += 1);
        obj
    }

    fn invoke(&self, method: MethodId, args: &[JValue]) -> Option<SimObject> {
        self.rt.count(|c| c.calls += 1);
        let (body, args) = {
            let heap = lock(&self.rt.inner.heap);
            let index = method.as_raw() as usize - 1;
            let Some(m) = heap.methods.get(index) else {
                panic!("call through unknown method id {:?}", method);
            };
            let args: Vec<Option<SimObject>> = args
                .iter()
                .map(|arg| match arg {
                    JValue::Object(Some(obj)) => {
                        heap.objects.get(&obj.id()).map(|s| s.object.clone())
                    }
                    _ => None,
                })
                .collect();
            (Arc::clone(&m.body), args)
        };
        match body(&args) {
            Ok(result) => result,
            Err(thrown) => {
                self.raise(thrown);
                None
            }
        }
    }
}

impl RuntimeEnv for SimulatedEnv<'_> {
    fn find_class(&self, name: &str) -> Option<ObjectRef> {
        self.enter("FindClass");
        self.rt.count(|c| c.find_class_calls += 1);
        let known = lock(&self.rt.inner.heap).classes.contains(name);
        if known {
            Some(self.new_local(SimObject::Class(name.to_string())))
        } else {
            self.raise(Thrown::new(
                "java.lang.NoClassDefFoundError",
                name.replace('.', "/"),
            ));
            None
        }
    }

    fn new_global_ref(&self, obj: ObjectRef) -> Option<ObjectRef> {
        self.enter("NewGlobalRef");
        if self.rt.faults().global_ref_fails {
            self.raise(Thrown::new(OOM_ERROR, "global reference table full"));
            return None;
        }
        let object = self.object(obj)?;
        let global = lock(&self.rt.inner.heap).alloc(object, true);
        self.rt.count(|c| c.global_refs += 1);
        Some(global)
    }

    fn delete_local_ref(&self, obj: ObjectRef) {
        let removed = {
            let mut heap = lock(&self.rt.inner.heap);
            let local = heap.objects.get(&obj.id()).map_or(false, |slot| !slot.global);
            local && heap.objects.remove(&obj.id()).is_some()
        };
        if !removed {
            panic!("DeleteLocalRef of a dead or global reference {:?}", obj);
        }
        for frame in self.frames.borrow_mut().iter_mut() {
            frame.retain(|id| *id != obj.id());
        }
        self.rt.count(|c| c.locals_deleted += 1);
    }

    fn method_id(
        &self,
        class: ObjectRef,
        name: &str,
        signature: &str,
        kind: MethodKind,
    ) -> Option<MethodId> {
        self.enter("GetMethodID");
        self.rt.count(|c| c.method_lookups += 1);
        let class_name = match self.object(class) {
            Some(SimObject::Class(class_name)) => class_name,
            other => panic!("method lookup on a non-class object {:?}", other),
        };
        let index = lock(&self.rt.inner.heap).methods.iter().position(|m| {
            m.class == class_name && m.name == name && m.signature == signature && m.kind == kind
        });
        match index.and_then(|i| NonZeroUsize::new(i + 1)) {
            Some(id) => Some(MethodId::from_id(id)),
            None => {
                self.raise(Thrown::new("java.lang.NoSuchMethodError", name));
                None
            }
        }
    }

    fn exception_occurred(&self) -> Option<ObjectRef> {
        self.pending_exception().map(|exc| self.new_local(exc))
    }

    fn exception_check(&self) -> bool {
        self.pending().contains_key(&self.thread)
    }

    fn exception_clear(&self) {
        let cleared = self.pending().remove(&self.thread).is_some();
        if cleared {
            self.rt.count(|c| c.exceptions_cleared += 1);
        }
    }

    fn exception_describe(&self) {
        if let Some(exc) = self.pending_exception() {
            debug!(exception = ?exc, "ExceptionDescribe");
        }
    }

    fn call_static_object(
        &self,
        _class: ObjectRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<ObjectRef> {
        self.enter("CallStaticObjectMethod");
        self.invoke(method, args).map(|obj| self.new_local(obj))
    }

    fn call_static_void(&self, _class: ObjectRef, method: MethodId, args: &[JValue]) {
        self.enter("CallStaticVoidMethod");
        self.invoke(method, args);
    }

    fn new_byte_array(&self, bytes: &[u8]) -> Option<ObjectRef> {
        self.enter("NewByteArray");
        if self.rt.faults().byte_array_fails {
            self.raise(Thrown::new(OOM_ERROR, "Java heap space"));
            return None;
        }
        Some(self.new_local(SimObject::Bytes(bytes.to_vec())))
    }

    fn string_utf_chars(&self, string: ObjectRef) -> Option<NonNull<c_char>> {
        self.enter("GetStringUTFChars");
        if self.rt.faults().utf_chars_fail {
            self.raise(Thrown::new(OOM_ERROR, "Java heap space"));
            return None;
        }
        let SimObject::Str(value) = self.object(string)? else {
            return None;
        };
        let chars = NonNull::new(CString::new(value).ok()?.into_raw())?;
        self.utf_outstanding.borrow_mut().push(chars.as_ptr() as usize);
        self.rt.count(|c| c.utf_acquired += 1);
        Some(chars)
    }

    fn release_string_utf_chars(&self, _string: ObjectRef, chars: NonNull<c_char>) {
        let mut outstanding = self.utf_outstanding.borrow_mut();
        let Some(pos) = outstanding.iter().position(|p| *p == chars.as_ptr() as usize) else {
            panic!("ReleaseStringUTFChars of chars that are not outstanding");
        };
        outstanding.swap_remove(pos);
        // SAFETY: the pointer came from CString::into_raw in string_utf_chars
        // and was still outstanding.
        drop(unsafe { CString::from_raw(chars.as_ptr()) });
        self.rt.count(|c| c.utf_released += 1);
    }

    fn array_length(&self, array: ObjectRef) -> i32 {
        self.enter("GetArrayLength");
        match self.object(array) {
            Some(SimObject::Bytes(bytes)) => bytes.len() as i32,
            _ => 0,
        }
    }

    fn array_critical(&self, array: ObjectRef) -> Option<NonNull<u8>> {
        self.enter("GetPrimitiveArrayCritical");
        if self.rt.faults().array_critical_fails {
            return None;
        }
        let SimObject::Bytes(bytes) = self.object(array)? else {
            return None;
        };
        let len = bytes.len();
        let elems = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        let elems = NonNull::new(elems)?;
        self.pinned.borrow_mut().push((elems.as_ptr() as usize, len));
        self.rt.count(|c| c.critical_acquired += 1);
        Some(elems)
    }

    fn release_array_critical(&self, _array: ObjectRef, elems: NonNull<u8>) {
        let len = {
            let mut pinned = self.pinned.borrow_mut();
            let Some(pos) = pinned.iter().position(|(p, _)| *p == elems.as_ptr() as usize) else {
                panic!("ReleasePrimitiveArrayCritical of an array that is not pinned");
            };
            pinned.remove(pos).1
        };
        // SAFETY: the pointer and length came from Box::into_raw in
        // array_critical and the pin was still outstanding.
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(elems.as_ptr(), len)) });
        self.rt.count(|c| c.critical_released += 1);
    }

    fn push_local_frame(&self, _capacity: i32) -> bool {
        self.enter("PushLocalFrame");
        if self.rt.faults().push_frame_fails {
            self.raise(Thrown::new(OOM_ERROR, "could not reserve local frame"));
            return false;
        }
        self.frames.borrow_mut().push(Vec::new());
        self.rt.count(|c| c.frames_pushed += 1);
        true
    }

    fn pop_local_frame(&self) {
        let Some(frame) = self.frames.borrow_mut().pop() else {
            panic!("PopLocalFrame without a matching PushLocalFrame");
        };
        let freed = {
            let mut heap = lock(&self.rt.inner.heap);
            frame
                .iter()
                .filter(|id| heap.objects.remove(*id).is_some())
                .count()
        };
        self.rt.count(|c| {
            c.locals_deleted += freed;
            c.frames_popped += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_class_unknown_raises() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        assert!(env.find_class("does.not.Exist").is_none());
        assert!(env.exception_check());
        env.exception_clear();
        assert_eq!(rt.counters().exceptions_cleared, 1);
    }

    #[test]
    #[should_panic(expected = "pending exception")]
    fn test_call_with_pending_exception_panics() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "boom");
        env.find_class("java.lang.Object");
    }

    #[test]
    #[should_panic(expected = "PushLocalFrame called with a pending exception")]
    fn test_push_frame_with_pending_exception_panics() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        env.throw_new("java.lang.IllegalStateException", "boom");
        env.push_local_frame(4);
    }

    #[test]
    fn test_pending_exception_is_per_thread() {
        let rt = SimulatedRuntime::standard();
        let first = rt.env().unwrap();
        first.throw_new("java.lang.IllegalStateException", "boom");

        let second = rt.env().unwrap();
        assert!(second.exception_check());
        assert_eq!(second.pending_exception(), first.pending_exception());

        let other = rt.clone();
        let seen_elsewhere = std::thread::spawn(move || other.env().unwrap().exception_check())
            .join()
            .unwrap();
        assert!(!seen_elsewhere);

        second.exception_clear();
        assert!(!first.exception_check());
    }

    #[test]
    fn test_frame_pop_frees_locals() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        assert!(env.push_local_frame(4));
        env.new_string("a");
        env.new_string("b");
        env.pop_local_frame();
        let counters = rt.counters();
        assert_eq!(counters.locals_created, 2);
        assert_eq!(counters.live_locals(), 0);
    }

    #[test]
    fn test_utf_chars_round_trip_accounting() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        let s = env.new_string("hello");
        let chars = env.string_utf_chars(s).unwrap();
        env.release_string_utf_chars(s, chars);
        let counters = rt.counters();
        assert_eq!(counters.utf_acquired, 1);
        assert_eq!(counters.utf_released, 1);
    }

    #[test]
    #[should_panic(expected = "critical region")]
    fn test_call_inside_critical_region_panics() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        let arr = env.new_byte_array(&[1, 2, 3]).unwrap();
        let _elems = env.array_critical(arr).unwrap();
        env.new_string("not allowed");
    }

    #[test]
    fn test_created_runtimes_tracks_env() {
        let rt = SimulatedRuntime::new();
        assert_eq!(rt.created_runtimes().unwrap(), 0);
        let _env = rt.env().unwrap();
        assert_eq!(rt.created_runtimes().unwrap(), 1);
    }

    #[test]
    fn test_standard_throwable_to_string() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let class = env.find_class("org.apache.impala.common.JniUtil").unwrap();
        let id = env
            .method_id(
                class,
                THROWABLE_TO_STRING.name,
                THROWABLE_TO_STRING.signature,
                MethodKind::Static,
            )
            .unwrap();
        env.throw_new("java.lang.RuntimeException", "bad");
        let exc = env.exception_occurred().unwrap();
        env.exception_clear();
        let rendered = env
            .call_static_object(class, id, &[JValue::Object(Some(exc))])
            .unwrap();
        assert_eq!(
            env.object(rendered),
            Some(SimObject::Str("java.lang.RuntimeException: bad".to_string()))
        );
    }
}
