//! Scoped guards over runtime-owned resources
//!
//! Each guard acquires exactly one resource in its constructor and releases it
//! exactly once in `Drop`, so release happens on normal return, on `?` early
//! return and on unwinding alike. A constructor that fails returns `Err` (or
//! `None`) and holds nothing.
//!
//! Guards borrow the environment handle they came from, which pins them to the
//! creating thread and call scope.
//!
//! ```rust,no_run
//! # use jnibridge_core::ffi::{RuntimeEnv, ObjectRef};
//! # use jnibridge_core::guard::{LocalRefGuard, Utf8CharsGuard};
//! # fn render<E: RuntimeEnv>(env: &E, jstr: ObjectRef) -> jnibridge_core::Result<String> {
//! let jstr = LocalRefGuard::new(env, jstr);
//! let chars = Utf8CharsGuard::new(env, jstr.get())?;
//! let text = chars.to_string_lossy().into_owned();
//! Ok(text)
//! // chars released, then the local reference deleted
//! # }
//! ```

use std::borrow::Cow;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr::NonNull;

use tracing::error;

use crate::error::{BridgeError, Result};
use crate::ffi::{ObjectRef, RuntimeEnv};
use crate::protocol;

const UTF_CHARS_FAILED: &str = "GetStringUTFChars failed. Probable OOM on JVM side";
const ARRAY_CRITICAL_FAILED: &str = "GetPrimitiveArrayCritical() failed. Probable OOM on JVM side";
const PUSH_FRAME_FAILED: &str = "failed to push frame";

/// Deletes a local reference on drop
pub struct LocalRefGuard<'e, E: RuntimeEnv + ?Sized> {
    env: &'e E,
    obj: ObjectRef,
}

impl<'e, E: RuntimeEnv + ?Sized> LocalRefGuard<'e, E> {
    pub fn new(env: &'e E, obj: ObjectRef) -> Self {
        Self { env, obj }
    }

    /// `None` for a null reference
    pub fn from_nullable(env: &'e E, obj: Option<ObjectRef>) -> Option<Self> {
        obj.map(|obj| Self::new(env, obj))
    }

    pub fn get(&self) -> ObjectRef {
        self.obj
    }
}

impl<E: RuntimeEnv + ?Sized> Drop for LocalRefGuard<'_, E> {
    fn drop(&mut self) {
        self.env.delete_local_ref(self.obj);
    }
}

/// Read-only modified UTF-8 view of a managed string
pub struct Utf8CharsGuard<'e, E: RuntimeEnv + ?Sized> {
    env: &'e E,
    jstr: ObjectRef,
    chars: NonNull<c_char>,
}

impl<'e, E: RuntimeEnv + ?Sized> Utf8CharsGuard<'e, E> {
    pub fn new(env: &'e E, jstr: ObjectRef) -> Result<Self> {
        protocol::assert_no_pending(env, "Utf8CharsGuard::new");
        let chars = env.string_utf_chars(jstr);
        let raised = env.exception_check();
        match chars {
            Some(chars) if !raised => Ok(Self { env, jstr, chars }),
            chars => {
                if raised {
                    env.exception_clear();
                }
                if let Some(chars) = chars {
                    env.release_string_utf_chars(jstr, chars);
                }
                error!("{}", UTF_CHARS_FAILED);
                Err(BridgeError::ResourceAcquisition(UTF_CHARS_FAILED))
            }
        }
    }

    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: the runtime hands out NUL-terminated chars that stay valid
        // until released in drop.
        unsafe { CStr::from_ptr(self.chars.as_ptr()) }
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        self.as_c_str().to_string_lossy()
    }
}

impl<E: RuntimeEnv + ?Sized> Drop for Utf8CharsGuard<'_, E> {
    fn drop(&mut self) {
        self.env.release_string_utf_chars(self.jstr, self.chars);
    }
}

/// Pinned, directly addressable view of a managed byte array.
///
/// No other runtime call may be made while the guard is alive; copy what is
/// needed and let it drop.
pub struct ArrayCriticalGuard<'e, E: RuntimeEnv + ?Sized> {
    env: &'e E,
    jarr: ObjectRef,
    elems: NonNull<u8>,
    len: usize,
}

impl<'e, E: RuntimeEnv + ?Sized> ArrayCriticalGuard<'e, E> {
    pub fn new(env: &'e E, jarr: ObjectRef) -> Result<Self> {
        protocol::assert_no_pending(env, "ArrayCriticalGuard::new");
        let len = usize::try_from(env.array_length(jarr)).unwrap_or(0);
        match env.array_critical(jarr) {
            Some(elems) => Ok(Self {
                env,
                jarr,
                elems,
                len,
            }),
            None => {
                error!("{}", ARRAY_CRITICAL_FAILED);
                Err(BridgeError::ResourceAcquisition(ARRAY_CRITICAL_FAILED))
            }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the pin keeps `len` bytes at `elems` valid and unmoved until drop.
        unsafe { std::slice::from_raw_parts(self.elems.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<E: RuntimeEnv + ?Sized> Drop for ArrayCriticalGuard<'_, E> {
    fn drop(&mut self) {
        self.env.release_array_critical(self.jarr, self.elems);
    }
}

/// Bounded frame for the local references created during one call
pub struct LocalFrameGuard<'e, E: RuntimeEnv + ?Sized> {
    env: &'e E,
}

impl<'e, E: RuntimeEnv + ?Sized> LocalFrameGuard<'e, E> {
    pub fn push(env: &'e E, capacity: i32) -> Result<Self> {
        debug_assert!(capacity > 0, "local frame capacity must be positive");
        protocol::assert_no_pending(env, "LocalFrameGuard::push");
        if !env.push_local_frame(capacity) {
            // only the failed push's own exception can be pending here
            if env.exception_check() {
                env.exception_clear();
            }
            error!(capacity, "{}", PUSH_FRAME_FAILED);
            return Err(BridgeError::ResourceAcquisition(PUSH_FRAME_FAILED));
        }
        Ok(Self { env })
    }
}

impl<E: RuntimeEnv + ?Sized> Drop for LocalFrameGuard<'_, E> {
    fn drop(&mut self) {
        self.env.pop_local_frame();
    }
}
