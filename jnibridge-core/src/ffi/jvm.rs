//! libjvm backend
//!
//! The JVM shared library is located on a list of search paths and opened with
//! libloading. The three JNI invocation entry points are resolved once and
//! kept alongside the [`Library`] that owns them.
//!
//! The VM is created lazily by the first [`RuntimeHost::env`] call unless one
//! already exists in the process. Threads that were not attached are attached
//! on demand and detached again when the thread exits.

use std::cell::RefCell;
use std::ffi::{c_void, CString};
use std::marker::PhantomData;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use jni_sys::{jboolean, jint, jsize, jvalue, JNIEnv, JavaVM, JavaVMInitArgs, JavaVMOption};
use libloading::Library;
use tracing::{debug, info, warn};

use super::{JValue, MethodId, MethodKind, ObjectRef, RuntimeEnv, RuntimeHost, JNI_VERSION_1_6};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

const JNI_OK: jint = 0;
const JNI_EDETACHED: jint = -2;
const JNI_FALSE: jboolean = 0;
const JNI_TRUE: jboolean = 1;
/// Release mode that frees the pinned buffer without copying back
const JNI_ABORT: jint = 2;

type GetDefaultJavaVmInitArgsFn = unsafe extern "system" fn(args: *mut c_void) -> jint;
type CreateJavaVmFn = unsafe extern "system" fn(
    pvm: *mut *mut JavaVM,
    penv: *mut *mut c_void,
    args: *mut c_void,
) -> jint;
type GetCreatedJavaVmsFn =
    unsafe extern "system" fn(vm_buf: *mut *mut JavaVM, buf_len: jsize, n_vms: *mut jsize) -> jint;

/// Call through the JNI function table of an environment pointer
macro_rules! jni_call {
    ($env:expr, $name:ident $(, $arg:expr)*) => {{
        let env: *mut JNIEnv = $env;
        match (**env).$name {
            Some(f) => f(env $(, $arg)*),
            None => panic!(concat!("JNI function table has no ", stringify!($name))),
        }
    }};
}

/// Call through the invocation interface of a VM pointer
macro_rules! jvm_call {
    ($vm:expr, $name:ident $(, $arg:expr)*) => {{
        let vm: *mut JavaVM = $vm;
        match (**vm).$name {
            Some(f) => f(vm $(, $arg)*),
            None => panic!(concat!("JNI invocation interface has no ", stringify!($name))),
        }
    }};
}

#[derive(Clone, Copy)]
struct VmPtr(*mut JavaVM);

// The invocation interface is callable from any thread.
unsafe impl Send for VmPtr {}
unsafe impl Sync for VmPtr {}

/// Detaches the current thread from the VM when the thread exits
struct AttachGuard(VmPtr);

impl Drop for AttachGuard {
    fn drop(&mut self) {
        unsafe {
            jvm_call!(self.0 .0, DetachCurrentThread);
        }
    }
}

thread_local! {
    static ATTACHED: RefCell<Option<AttachGuard>> = const { RefCell::new(None) };
}

/// Host backed by a real JVM loaded from `libjvm`
pub struct JvmHost {
    get_default_args: GetDefaultJavaVmInitArgsFn,
    create_vm: CreateJavaVmFn,
    get_created_vms: GetCreatedJavaVmsFn,
    vm: Mutex<Option<VmPtr>>,
    options: Vec<String>,
    /// Keeps the resolved entry points mapped
    _library: Library,
}

impl JvmHost {
    /// Locate and open libjvm, resolving the JNI invocation entry points
    pub fn load(config: &BridgeConfig) -> Result<Self> {
        let path = search_paths(config)
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                BridgeError::LibraryLoad("libjvm not found; set JAVA_HOME".to_string())
            })?;

        info!("Loading JVM from {:?}", path);

        let library = unsafe { Library::new(&path) }
            .map_err(|e| BridgeError::LibraryLoad(format!("{:?}: {}", path, e)))?;

        let get_default_args = unsafe {
            *library
                .get::<GetDefaultJavaVmInitArgsFn>(b"JNI_GetDefaultJavaVMInitArgs\0")
                .map_err(|e| BridgeError::LibraryLoad(e.to_string()))?
        };
        let create_vm = unsafe {
            *library
                .get::<CreateJavaVmFn>(b"JNI_CreateJavaVM\0")
                .map_err(|e| BridgeError::LibraryLoad(e.to_string()))?
        };
        let get_created_vms = unsafe {
            *library
                .get::<GetCreatedJavaVmsFn>(b"JNI_GetCreatedJavaVMs\0")
                .map_err(|e| BridgeError::LibraryLoad(e.to_string()))?
        };

        let mut options = Vec::new();
        if let Some(classpath) = config
            .classpath
            .clone()
            .or_else(|| std::env::var("CLASSPATH").ok())
        {
            options.push(format!("-Djava.class.path={}", classpath));
        }

        Ok(Self {
            get_default_args,
            create_vm,
            get_created_vms,
            vm: Mutex::new(None),
            options,
            _library: library,
        })
    }

    fn existing_vm(&self) -> Result<Option<VmPtr>> {
        let mut buf: [*mut JavaVM; 1] = [ptr::null_mut()];
        let mut count: jsize = 0;
        let rc = unsafe { (self.get_created_vms)(buf.as_mut_ptr(), 1, &mut count) };
        if rc != JNI_OK {
            return Err(BridgeError::RuntimeEnumeration);
        }
        Ok((count > 0 && !buf[0].is_null()).then_some(VmPtr(buf[0])))
    }

    fn create(&self) -> Result<VmPtr> {
        let strings = self
            .options
            .iter()
            .map(|o| CString::new(o.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| BridgeError::unavailable("JVM option contains a NUL byte"))?;
        let mut options: Vec<JavaVMOption> = strings
            .iter()
            .map(|s| JavaVMOption {
                optionString: s.as_ptr() as *mut c_char,
                extraInfo: ptr::null_mut(),
            })
            .collect();
        let mut args = JavaVMInitArgs {
            version: JNI_VERSION_1_6,
            nOptions: options.len() as jint,
            options: options.as_mut_ptr(),
            ignoreUnrecognized: JNI_TRUE,
        };

        let mut vm: *mut JavaVM = ptr::null_mut();
        let mut env: *mut c_void = ptr::null_mut();
        let rc = unsafe {
            (self.create_vm)(&mut vm, &mut env, &mut args as *mut JavaVMInitArgs as *mut c_void)
        };
        if rc != JNI_OK || vm.is_null() {
            return Err(BridgeError::unavailable(format!(
                "JNI_CreateJavaVM returned {}",
                rc
            )));
        }
        info!("Created JVM with {} option(s)", options.len());
        Ok(VmPtr(vm))
    }

    fn vm(&self) -> Result<VmPtr> {
        let mut slot = self
            .vm
            .lock()
            .map_err(|_| BridgeError::unavailable("JVM handle lock poisoned"))?;
        if let Some(vm) = *slot {
            return Ok(vm);
        }
        let vm = match self.existing_vm()? {
            Some(vm) => {
                debug!("Using JVM already created in this process");
                vm
            }
            None => self.create()?,
        };
        *slot = Some(vm);
        Ok(vm)
    }
}

fn search_paths(config: &BridgeConfig) -> Vec<PathBuf> {
    let lib = if cfg!(target_os = "macos") {
        "libjvm.dylib"
    } else if cfg!(target_os = "windows") {
        "jvm.dll"
    } else {
        "libjvm.so"
    };

    let mut dirs = config.jvm_search_paths.clone();
    if let Ok(home) = std::env::var("JAVA_HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join("lib/server"));
        dirs.push(home.join("jre/lib/server"));
        dirs.push(home.join("jre/lib/amd64/server"));
        dirs.push(home.join("bin/server"));
    }
    dirs.push(PathBuf::from("/usr/lib/jvm/default-java/lib/server"));
    dirs.push(PathBuf::from("/usr/lib/jvm/java/lib/server"));

    dirs.into_iter().map(|d| d.join(lib)).collect()
}

impl RuntimeHost for JvmHost {
    type Env<'h> = JvmEnv<'h>;

    fn env(&self) -> Result<JvmEnv<'_>> {
        let vm = self.vm()?;
        let mut env: *mut c_void = ptr::null_mut();
        let rc = unsafe { jvm_call!(vm.0, GetEnv, &mut env, JNI_VERSION_1_6) };
        if rc == JNI_EDETACHED {
            let rc = unsafe { jvm_call!(vm.0, AttachCurrentThread, &mut env, ptr::null_mut()) };
            if rc != JNI_OK {
                return Err(BridgeError::unavailable(format!(
                    "AttachCurrentThread returned {}",
                    rc
                )));
            }
            debug!(thread = ?std::thread::current().id(), "Attached thread to JVM");
            ATTACHED.with(|slot| *slot.borrow_mut() = Some(AttachGuard(vm)));
        } else if rc != JNI_OK {
            return Err(BridgeError::unavailable(format!("GetEnv returned {}", rc)));
        }

        if env.is_null() {
            return Err(BridgeError::unavailable("null JNIEnv"));
        }
        Ok(JvmEnv {
            raw: env as *mut JNIEnv,
            _host: PhantomData,
        })
    }

    fn supports_version(&self, version: i32) -> bool {
        let mut args = JavaVMInitArgs {
            version,
            nOptions: 0,
            options: ptr::null_mut(),
            ignoreUnrecognized: JNI_FALSE,
        };
        unsafe { (self.get_default_args)(&mut args as *mut JavaVMInitArgs as *mut c_void) == JNI_OK }
    }

    fn created_runtimes(&self) -> Result<usize> {
        Ok(self.existing_vm()?.map_or(0, |_| 1))
    }
}

/// JNI environment of the current thread; `!Send` through the raw pointer
pub struct JvmEnv<'h> {
    raw: *mut JNIEnv,
    _host: PhantomData<&'h JvmHost>,
}

fn jni_args(args: &[JValue]) -> Vec<jvalue> {
    args.iter()
        .map(|arg| match *arg {
            JValue::Object(obj) => jvalue {
                l: obj.map_or(ptr::null_mut(), |o| o.as_raw() as jni_sys::jobject),
            },
            JValue::Bool(b) => jvalue {
                z: if b { JNI_TRUE } else { JNI_FALSE },
            },
            JValue::Int(i) => jvalue { i },
            JValue::Long(j) => jvalue { j },
        })
        .collect()
}

fn obj(o: ObjectRef) -> jni_sys::jobject {
    o.as_raw() as jni_sys::jobject
}

impl RuntimeEnv for JvmEnv<'_> {
    fn find_class(&self, name: &str) -> Option<ObjectRef> {
        let name = CString::new(name.replace('.', "/")).ok()?;
        let class = unsafe { jni_call!(self.raw, FindClass, name.as_ptr()) };
        ObjectRef::from_raw(class as *mut c_void)
    }

    fn new_global_ref(&self, o: ObjectRef) -> Option<ObjectRef> {
        let global = unsafe { jni_call!(self.raw, NewGlobalRef, obj(o)) };
        ObjectRef::from_raw(global as *mut c_void)
    }

    fn delete_local_ref(&self, o: ObjectRef) {
        unsafe { jni_call!(self.raw, DeleteLocalRef, obj(o)) }
    }

    fn method_id(
        &self,
        class: ObjectRef,
        name: &str,
        signature: &str,
        kind: MethodKind,
    ) -> Option<MethodId> {
        let name = CString::new(name).ok()?;
        let signature = CString::new(signature).ok()?;
        let id = unsafe {
            match kind {
                MethodKind::Static => jni_call!(
                    self.raw,
                    GetStaticMethodID,
                    obj(class),
                    name.as_ptr(),
                    signature.as_ptr()
                ),
                MethodKind::Instance => jni_call!(
                    self.raw,
                    GetMethodID,
                    obj(class),
                    name.as_ptr(),
                    signature.as_ptr()
                ),
            }
        };
        MethodId::from_raw(id as *mut c_void)
    }

    fn exception_occurred(&self) -> Option<ObjectRef> {
        let exc = unsafe { jni_call!(self.raw, ExceptionOccurred) };
        ObjectRef::from_raw(exc as *mut c_void)
    }

    fn exception_check(&self) -> bool {
        let raised = unsafe { jni_call!(self.raw, ExceptionCheck) };
        raised == JNI_TRUE
    }

    fn exception_clear(&self) {
        unsafe { jni_call!(self.raw, ExceptionClear) }
    }

    fn exception_describe(&self) {
        unsafe { jni_call!(self.raw, ExceptionDescribe) }
    }

    fn call_static_object(
        &self,
        class: ObjectRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<ObjectRef> {
        let args = jni_args(args);
        let result = unsafe {
            jni_call!(
                self.raw,
                CallStaticObjectMethodA,
                obj(class),
                method.as_raw() as jni_sys::jmethodID,
                args.as_ptr()
            )
        };
        ObjectRef::from_raw(result as *mut c_void)
    }

    fn call_static_void(&self, class: ObjectRef, method: MethodId, args: &[JValue]) {
        let args = jni_args(args);
        unsafe {
            jni_call!(
                self.raw,
                CallStaticVoidMethodA,
                obj(class),
                method.as_raw() as jni_sys::jmethodID,
                args.as_ptr()
            )
        }
    }

    fn new_byte_array(&self, bytes: &[u8]) -> Option<ObjectRef> {
        let len = jsize::try_from(bytes.len()).ok()?;
        let array = unsafe { jni_call!(self.raw, NewByteArray, len) };
        let array = ObjectRef::from_raw(array as *mut c_void)?;
        unsafe {
            jni_call!(
                self.raw,
                SetByteArrayRegion,
                obj(array),
                0,
                len,
                bytes.as_ptr() as *const jni_sys::jbyte
            )
        }
        if self.exception_check() {
            warn!("SetByteArrayRegion raised; dropping the new array");
            self.delete_local_ref(array);
            return None;
        }
        Some(array)
    }

    fn string_utf_chars(&self, string: ObjectRef) -> Option<NonNull<c_char>> {
        let chars = unsafe { jni_call!(self.raw, GetStringUTFChars, obj(string), ptr::null_mut()) };
        NonNull::new(chars as *mut c_char)
    }

    fn release_string_utf_chars(&self, string: ObjectRef, chars: NonNull<c_char>) {
        unsafe {
            jni_call!(
                self.raw,
                ReleaseStringUTFChars,
                obj(string),
                chars.as_ptr() as *const c_char
            )
        }
    }

    fn array_length(&self, array: ObjectRef) -> i32 {
        unsafe { jni_call!(self.raw, GetArrayLength, obj(array)) }
    }

    fn array_critical(&self, array: ObjectRef) -> Option<NonNull<u8>> {
        let elems =
            unsafe { jni_call!(self.raw, GetPrimitiveArrayCritical, obj(array), ptr::null_mut()) };
        NonNull::new(elems as *mut u8)
    }

    fn release_array_critical(&self, array: ObjectRef, elems: NonNull<u8>) {
        unsafe {
            jni_call!(
                self.raw,
                ReleasePrimitiveArrayCritical,
                obj(array),
                elems.as_ptr() as *mut c_void,
                JNI_ABORT
            )
        }
    }

    fn push_local_frame(&self, capacity: i32) -> bool {
        let rc = unsafe { jni_call!(self.raw, PushLocalFrame, capacity) };
        rc == JNI_OK
    }

    fn pop_local_frame(&self) {
        unsafe {
            jni_call!(self.raw, PopLocalFrame, ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_paths_prefer_configured_dirs() {
        let config = BridgeConfig {
            jvm_search_paths: vec![PathBuf::from("/opt/custom-jvm")],
            ..BridgeConfig::default()
        };
        let paths = search_paths(&config);
        assert!(paths[0].starts_with("/opt/custom-jvm"));
        assert!(paths.len() > 1);
    }

    #[test]
    fn test_load_missing_library() {
        let config = BridgeConfig {
            jvm_search_paths: vec![PathBuf::from("/nonexistent/jvm")],
            ..BridgeConfig::default()
        };
        if search_paths(&config).iter().any(|p| p.exists()) {
            // A JVM is installed on this machine; nothing to assert.
            return;
        }
        let err = JvmHost::load(&config).err().unwrap();
        assert!(matches!(err, BridgeError::LibraryLoad(_)));
    }

    #[test]
    fn test_jni_args_layout() {
        let args = jni_args(&[JValue::Int(7), JValue::Object(None)]);
        assert_eq!(args.len(), 2);
        unsafe {
            assert_eq!(args[0].i, 7);
            assert!(args[1].l.is_null());
        }
    }
}
