//! FFI Bridge - the seam between native code and the managed runtime
//!
//! Everything the rest of the crate does to the JVM goes through the two
//! traits defined here:
//! - [`RuntimeHost`]: process-level access (environment handles, version probe,
//!   runtime enumeration)
//! - [`RuntimeEnv`]: the per-thread primitive JNI surface
//!
//! Two hosts implement them: [`jvm::JvmHost`] (libjvm through raw JNI tables)
//! and [`simulated::SimulatedRuntime`] (an in-process stand-in that counts every
//! acquisition and release).
//!
//! # Handle contract
//! An environment handle returned by [`RuntimeHost::env`] is valid only on the
//! calling thread and only for the current call stack. Implementations make the
//! handle `!Send` and tie it to the host's lifetime, so it can neither cross a
//! thread boundary nor outlive the runtime. Callers must not stash it anywhere.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::raw::c_char;
use std::ptr::NonNull;

use crate::error::Result;

pub mod jvm;
pub mod simulated;

pub const JNI_VERSION_1_6: i32 = 0x0001_0006;
pub const JNI_VERSION_1_8: i32 = 0x0001_0008;

/// Opaque, non-null reference to a managed object (local or global)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonZeroUsize);

impl ObjectRef {
    /// Wrap a raw runtime pointer, `None` for null
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(ObjectRef)
    }

    pub(crate) fn from_id(id: NonZeroUsize) -> Self {
        ObjectRef(id)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    pub(crate) fn id(self) -> usize {
        self.0.get()
    }
}

/// Opaque, non-null method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(NonZeroUsize);

impl MethodId {
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(MethodId)
    }

    pub(crate) fn from_id(id: NonZeroUsize) -> Self {
        MethodId(id)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }
}

/// Whether a method is looked up and invoked statically or on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Static,
    Instance,
}

/// Argument passed to a managed call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JValue {
    Object(Option<ObjectRef>),
    Bool(bool),
    Int(i32),
    Long(i64),
}

/// The per-thread primitive surface of the managed runtime.
///
/// Methods mirror JNI one-to-one and keep its rules: after any call that can
/// raise, the caller must check for a pending exception and clear it before
/// making another call. Only the `exception_*`, `release_*`, `delete_local_ref`
/// and frame functions may be called while an exception is pending. While an
/// array is pinned through [`RuntimeEnv::array_critical`] no other call may be
/// made until it is released.
///
/// Handles passed in must have been produced by the same runtime.
pub trait RuntimeEnv {
    /// Look up a class by fully qualified dotted name
    fn find_class(&self, name: &str) -> Option<ObjectRef>;

    /// Promote a reference to a process-wide global reference
    fn new_global_ref(&self, obj: ObjectRef) -> Option<ObjectRef>;

    fn delete_local_ref(&self, obj: ObjectRef);

    fn method_id(
        &self,
        class: ObjectRef,
        name: &str,
        signature: &str,
        kind: MethodKind,
    ) -> Option<MethodId>;

    /// New local reference to the pending exception, if any
    fn exception_occurred(&self) -> Option<ObjectRef>;

    fn exception_check(&self) -> bool;

    fn exception_clear(&self);

    /// Print the pending exception to the runtime's error stream
    fn exception_describe(&self);

    fn call_static_object(
        &self,
        class: ObjectRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<ObjectRef>;

    fn call_static_void(&self, class: ObjectRef, method: MethodId, args: &[JValue]);

    /// Create a managed byte array holding a copy of `bytes`
    fn new_byte_array(&self, bytes: &[u8]) -> Option<ObjectRef>;

    /// Materialize the modified UTF-8 form of a managed string
    fn string_utf_chars(&self, string: ObjectRef) -> Option<NonNull<c_char>>;

    fn release_string_utf_chars(&self, string: ObjectRef, chars: NonNull<c_char>);

    fn array_length(&self, array: ObjectRef) -> i32;

    /// Pin a primitive array and return a pointer to its first element
    fn array_critical(&self, array: ObjectRef) -> Option<NonNull<u8>>;

    fn release_array_critical(&self, array: ObjectRef, elems: NonNull<u8>);

    /// Returns `false` if the frame could not be pushed
    fn push_local_frame(&self, capacity: i32) -> bool;

    fn pop_local_frame(&self);
}

/// Process-level access to the managed runtime
pub trait RuntimeHost: Send + Sync {
    /// Per-thread environment handle, see the module docs for its contract
    type Env<'h>: RuntimeEnv
    where
        Self: 'h;

    /// Obtain an environment handle for the calling thread, attaching the
    /// thread (and creating the runtime) if necessary.
    fn env(&self) -> Result<Self::Env<'_>>;

    /// Whether the linked runtime supports the given interface version
    fn supports_version(&self, version: i32) -> bool;

    /// Number of runtime instances already created in this process
    fn created_runtimes(&self) -> Result<usize>;
}
