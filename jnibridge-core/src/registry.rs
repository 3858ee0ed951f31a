//! Class and method handle registries
//!
//! Resolution is expensive (class loading, global reference creation), so
//! handles are resolved once and cached for the life of the process. The
//! registries are written through `&mut` during bootstrap only and then frozen
//! into a [`Registry`] that is read without locking.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::ffi::{MethodId, MethodKind, ObjectRef, RuntimeEnv};
use crate::guard::LocalRefGuard;
use crate::protocol;

/// A class resolved to a process-wide global reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef(ObjectRef);

impl ClassRef {
    pub fn as_object(self) -> ObjectRef {
        self.0
    }
}

/// A method resolved against a [`ClassRef`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    class: ClassRef,
    id: MethodId,
    kind: MethodKind,
}

impl MethodRef {
    pub fn class(&self) -> ClassRef {
        self.class
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// Name, signature and dispatch kind of a method to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub signature: &'static str,
    pub kind: MethodKind,
}

impl MethodDescriptor {
    pub const fn new_static(name: &'static str, signature: &'static str) -> Self {
        Self {
            name,
            signature,
            kind: MethodKind::Static,
        }
    }

    pub const fn new_instance(name: &'static str, signature: &'static str) -> Self {
        Self {
            name,
            signature,
            kind: MethodKind::Instance,
        }
    }
}

/// Clears a pending exception, reporting whether there was one
fn clear_pending<E: RuntimeEnv + ?Sized>(env: &E) -> bool {
    let raised = env.exception_check();
    if raised {
        env.exception_clear();
    }
    raised
}

/// Cache of resolved classes keyed by fully qualified dotted name
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassRef>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to a global class reference, reusing a cached one.
    ///
    /// Failures are never cached: the next call looks the class up again.
    pub fn resolve<E: RuntimeEnv + ?Sized>(&mut self, env: &E, name: &str) -> Result<ClassRef> {
        if let Some(class) = self.classes.get(name) {
            return Ok(*class);
        }
        protocol::assert_no_pending(env, "ClassRegistry::resolve");

        let local = LocalRefGuard::from_nullable(env, env.find_class(name));
        let raised = clear_pending(env);
        let local = match local {
            Some(local) if !raised => local,
            _ => {
                debug!(class = name, "Class lookup failed");
                return Err(BridgeError::ClassNotFound {
                    name: name.to_string(),
                });
            }
        };

        let global = env.new_global_ref(local.get());
        let raised = clear_pending(env);
        let global = match global {
            Some(global) if !raised => global,
            _ => {
                return Err(BridgeError::GlobalRefFailed {
                    name: name.to_string(),
                })
            }
        };
        drop(local);

        let class = ClassRef(global);
        self.classes.insert(name.to_string(), class);
        debug!(class = name, "Resolved class");
        Ok(class)
    }

    /// Probe whether a class can be loaded, without caching it
    pub fn class_exists<E: RuntimeEnv + ?Sized>(env: &E, name: &str) -> bool {
        protocol::assert_no_pending(env, "ClassRegistry::class_exists");
        let local = env.find_class(name);
        let _local = LocalRefGuard::from_nullable(env, local);
        !clear_pending(env) && local.is_some()
    }

    pub fn get(&self, name: &str) -> Option<ClassRef> {
        self.classes.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

type MethodKey = (String, String, String);

fn method_key(class_name: &str, name: &str, signature: &str) -> MethodKey {
    (class_name.to_string(), name.to_string(), signature.to_string())
}

/// Cache of resolved methods keyed by (class name, method name, signature).
///
/// A class cannot declare a static and an instance method with the same name
/// and signature, so a lookup whose kind differs from the cached entry fails
/// with [`BridgeError::MethodNotFound`].
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<MethodKey, MethodRef>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a method on a class previously resolved through `classes`
    pub fn resolve<E: RuntimeEnv + ?Sized>(
        &mut self,
        env: &E,
        classes: &ClassRegistry,
        class_name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodRef> {
        let not_found = || BridgeError::MethodNotFound {
            class: class_name.to_string(),
            name: descriptor.name.to_string(),
            signature: descriptor.signature.to_string(),
        };
        let key = method_key(class_name, descriptor.name, descriptor.signature);
        if let Some(method) = self.methods.get(&key) {
            if method.kind != descriptor.kind {
                return Err(not_found());
            }
            return Ok(*method);
        }
        let class = classes.get(class_name).ok_or_else(not_found)?;

        protocol::assert_no_pending(env, "MethodRegistry::resolve");
        let id = env.method_id(
            class.as_object(),
            descriptor.name,
            descriptor.signature,
            descriptor.kind,
        );
        let raised = clear_pending(env);
        let id = match id {
            Some(id) if !raised => id,
            _ => return Err(not_found()),
        };

        let method = MethodRef {
            class,
            id,
            kind: descriptor.kind,
        };
        self.methods.insert(key, method);
        debug!(
            class = class_name,
            method = descriptor.name,
            signature = descriptor.signature,
            "Resolved method"
        );
        Ok(method)
    }

    /// Probe for an optional method; a failed lookup is `false`, not an error
    pub fn method_exists<E: RuntimeEnv + ?Sized>(
        env: &E,
        class: ClassRef,
        descriptor: &MethodDescriptor,
    ) -> bool {
        protocol::assert_no_pending(env, "MethodRegistry::method_exists");
        let id = env.method_id(
            class.as_object(),
            descriptor.name,
            descriptor.signature,
            descriptor.kind,
        );
        !clear_pending(env) && id.is_some()
    }

    pub fn get(&self, class_name: &str, name: &str, signature: &str) -> Option<MethodRef> {
        self.methods
            .get(&method_key(class_name, name, signature))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Frozen registries, readable from any thread once bootstrap has finished
#[derive(Debug)]
pub struct Registry {
    classes: ClassRegistry,
    methods: MethodRegistry,
}

impl Registry {
    pub fn freeze(classes: ClassRegistry, methods: MethodRegistry) -> Self {
        Self { classes, methods }
    }

    pub fn class(&self, name: &str) -> Option<ClassRef> {
        self.classes.get(name)
    }

    pub fn method(&self, class_name: &str, name: &str, signature: &str) -> Option<MethodRef> {
        self.methods.get(class_name, name, signature)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::simulated::SimulatedRuntime;
    use crate::ffi::RuntimeHost;

    const UTIL: &str = "org.apache.impala.common.JniUtil";
    const TO_STRING: MethodDescriptor = MethodDescriptor::new_static(
        "throwableToString",
        "(Ljava/lang/Throwable;)Ljava/lang/String;",
    );

    #[test]
    fn test_resolve_class_is_cached() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();

        let first = classes.resolve(&env, UTIL).unwrap();
        let second = classes.resolve(&env, UTIL).unwrap();
        assert_eq!(first, second);
        let counters = rt.counters();
        assert_eq!(counters.find_class_calls, 1);
        assert_eq!(counters.global_refs, 1);
        assert_eq!(counters.live_locals(), 0);
    }

    #[test]
    fn test_resolve_missing_class_not_cached() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();

        let err = classes.resolve(&env, "does.not.Exist").unwrap_err();
        assert!(matches!(err, BridgeError::ClassNotFound { .. }));
        assert!(classes.get("does.not.Exist").is_none());
        assert!(classes.is_empty());
        assert!(!env.exception_check());

        let _ = classes.resolve(&env, "does.not.Exist");
        assert_eq!(rt.counters().find_class_calls, 2);
    }

    #[test]
    fn test_resolve_after_definition_succeeds() {
        let rt = SimulatedRuntime::new();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();

        assert!(classes.resolve(&env, "late.Loaded").is_err());
        rt.define_class("late.Loaded");
        assert!(classes.resolve(&env, "late.Loaded").is_ok());
    }

    #[test]
    fn test_global_ref_failure() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        rt.update_faults(|f| f.global_ref_fails = true);
        let mut classes = ClassRegistry::new();

        let err = classes.resolve(&env, UTIL).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("failed to create global reference to {}", UTIL)
        );
        assert!(classes.is_empty());
        assert_eq!(rt.counters().live_locals(), 0);
    }

    #[test]
    fn test_class_exists_probe() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        assert!(ClassRegistry::class_exists(&env, UTIL));
        assert!(!ClassRegistry::class_exists(&env, "does.not.Exist"));
        assert!(!env.exception_check());
        assert_eq!(rt.counters().live_locals(), 0);
    }

    #[test]
    fn test_resolve_method_is_cached() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();
        let mut methods = MethodRegistry::new();
        classes.resolve(&env, UTIL).unwrap();

        let first = methods.resolve(&env, &classes, UTIL, &TO_STRING).unwrap();
        let second = methods.resolve(&env, &classes, UTIL, &TO_STRING).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.kind(), MethodKind::Static);
        assert_eq!(rt.counters().method_lookups, 1);
        assert_eq!(
            methods.get(UTIL, TO_STRING.name, TO_STRING.signature),
            Some(first)
        );
    }

    #[test]
    fn test_resolve_method_wrong_signature() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();
        let mut methods = MethodRegistry::new();
        classes.resolve(&env, UTIL).unwrap();

        let wrong = MethodDescriptor::new_static("throwableToString", "()V");
        let err = methods.resolve(&env, &classes, UTIL, &wrong).unwrap_err();
        assert!(matches!(err, BridgeError::MethodNotFound { .. }));
        assert!(methods.is_empty());
        assert!(!env.exception_check());
    }

    #[test]
    fn test_resolve_method_kind_mismatch() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();
        let mut methods = MethodRegistry::new();
        classes.resolve(&env, UTIL).unwrap();
        methods.resolve(&env, &classes, UTIL, &TO_STRING).unwrap();

        let as_instance = MethodDescriptor::new_instance(TO_STRING.name, TO_STRING.signature);
        let err = methods.resolve(&env, &classes, UTIL, &as_instance).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::MethodNotFound { ref name, .. } if name == TO_STRING.name
        ));
        assert_eq!(methods.len(), 1);
        assert_eq!(rt.counters().method_lookups, 1);
        assert!(!env.exception_check());
    }

    #[test]
    fn test_resolve_method_requires_resolved_class() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let classes = ClassRegistry::new();
        let mut methods = MethodRegistry::new();

        let err = methods.resolve(&env, &classes, UTIL, &TO_STRING).unwrap_err();
        assert!(matches!(err, BridgeError::MethodNotFound { .. }));
        assert_eq!(rt.counters().method_lookups, 0);
    }

    #[test]
    fn test_method_exists_probe() {
        let rt = SimulatedRuntime::standard();
        let env = rt.env().unwrap();
        let mut classes = ClassRegistry::new();
        let class = classes.resolve(&env, UTIL).unwrap();

        assert!(MethodRegistry::method_exists(&env, class, &TO_STRING));
        let missing = MethodDescriptor::new_instance("nope", "()V");
        assert!(!MethodRegistry::method_exists(&env, class, &missing));
        assert!(!env.exception_check());
    }
}
