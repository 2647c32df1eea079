//! Service container.
//!
//! The [`Container`] maps string keys to [`ServiceProvider`]s and resolves
//! them into capability-tagged [`Service`] instances.
//!
//! # Instantiation policies
//!
//! | Lifetime    | `make`                               | `make_new`            |
//! |-------------|--------------------------------------|-----------------------|
//! | `Singleton` | built once, cached, shared           | fresh, never cached   |
//! | `Transient` | fresh instance on every call         | fresh, never cached   |
//!
//! Providers that are not deferred (`is_defer() == false`) are constructed
//! eagerly when bound.
//!
//! # Concurrency
//!
//! Cached instances live in a per-binding `OnceLock` and are read without
//! locking once published. A singleton's first construction holds that
//! binding's build lock, so it runs at most once even when many requests
//! race on it. Transient services and `make_new` take no lock at all, and
//! unrelated bindings never wait on each other.
//!
//! Each thread keeps the stack of bindings it is currently constructing. A
//! provider that (transitively) depends on itself fails with
//! [`ContainerError::CyclicDependency`] before it could block or overflow.
//!
//! # Scoping
//!
//! [`Container::scope`] creates a child container with private bindings and
//! a private singleton cache. Keys not bound in the child are resolved by the
//! parent.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::{BoxError, ContainerError, ContainerResult};

// =============================================================================
// Service
// =============================================================================

/// A resolved service instance.
///
/// The instance is stored as an `Arc<T>` (where `T` may be a trait object
/// such as `dyn Log`) and tagged with the name of `T`. Callers recover the
/// capability with [`get`](Self::get).
#[derive(Clone)]
pub struct Service {
    capability: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Service {
    /// Wraps an instance that provides capability `T`.
    pub fn new<T>(instance: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            capability: type_name::<T>(),
            inner: Arc::new(instance),
        }
    }

    /// Wraps a plain value.
    pub fn from_value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::new(Arc::new(value))
    }

    /// Returns the instance as capability `T`, if that is what it provides.
    pub fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.inner.downcast_ref::<Arc<T>>().map(Arc::clone)
    }

    /// Returns `true` if the instance provides capability `T`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.inner.is::<Arc<T>>()
    }

    /// The capability this instance was built with.
    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// Returns `true` if both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ServiceParams
// =============================================================================

/// An ordered list of typed constructor parameters.
#[derive(Clone, Default)]
pub struct ServiceParams(Vec<Arc<dyn Any + Send + Sync>>);

impl ServiceParams {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter, builder style.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Appends a parameter.
    pub fn push<T: Send + Sync + 'static>(&mut self, value: T) {
        self.0.push(Arc::new(value));
    }

    /// Returns the parameter at `index` as a `T`.
    pub fn get<T: 'static>(&self, index: usize) -> ContainerResult<&T> {
        self.0
            .get(index)
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or(ContainerError::MissingParam {
                index,
                expected: type_name::<T>(),
            })
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positional overlay: explicit parameters replace the defaults at the
    /// same index; defaults beyond the explicit list are kept.
    fn overlay(self, defaults: ServiceParams) -> ServiceParams {
        let mut merged = self.0;
        merged.extend(defaults.0.into_iter().skip(merged.len()));
        ServiceParams(merged)
    }
}

impl fmt::Debug for ServiceParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceParams")
            .field("len", &self.0.len())
            .finish()
    }
}

// =============================================================================
// ServiceProvider
// =============================================================================

/// Instantiation policy of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Constructed once and shared.
    #[default]
    Singleton,
    /// Constructed on every `make`.
    Transient,
}

/// What `bind` does when a key is already bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindPolicy {
    /// Replace the provider and drop its cached instance.
    #[default]
    Overwrite,
    /// Refuse with [`ContainerError::AlreadyBound`].
    Strict,
}

/// A factory registered in the [`Container`].
///
/// Construction goes `boot` → `params` → `register`. `register` receives the
/// container, so it may resolve other services.
pub trait ServiceProvider: Send + Sync + 'static {
    /// The key the service is bound under.
    fn name(&self) -> &str;

    /// Instantiation policy.
    fn lifetime(&self) -> Lifetime {
        Lifetime::Singleton
    }

    /// Deferred providers are constructed on first `make`; others at bind.
    fn is_defer(&self) -> bool {
        true
    }

    /// Runs before every construction.
    fn boot(&self, _container: &Container) -> Result<(), BoxError> {
        Ok(())
    }

    /// Default constructor parameters.
    fn params(&self, _container: &Container) -> ServiceParams {
        ServiceParams::new()
    }

    /// Builds a new instance.
    fn register(&self, container: &Container, params: &ServiceParams)
    -> Result<Service, BoxError>;
}

type Factory = dyn Fn(&Container, &ServiceParams) -> Result<Service, BoxError> + Send + Sync;

/// A provider assembled from a closure.
///
/// ```rust,ignore
/// container.bind(
///     FactoryProvider::singleton("greeting", |_, _| Ok(Service::from_value("hello")))
/// )?;
/// ```
pub struct FactoryProvider {
    name: String,
    lifetime: Lifetime,
    defer: bool,
    params: ServiceParams,
    factory: Box<Factory>,
}

impl FactoryProvider {
    /// A lazily constructed, cached service.
    pub fn singleton<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Container, &ServiceParams) -> Result<Service, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            lifetime: Lifetime::Singleton,
            defer: true,
            params: ServiceParams::new(),
            factory: Box::new(factory),
        }
    }

    /// A service constructed on every `make`.
    pub fn transient<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Container, &ServiceParams) -> Result<Service, BoxError> + Send + Sync + 'static,
    {
        Self {
            lifetime: Lifetime::Transient,
            ..Self::singleton(name, factory)
        }
    }

    /// Construct at bind time instead of on first use.
    pub fn eager(mut self) -> Self {
        self.defer = false;
        self
    }

    /// Default constructor parameters.
    pub fn with_params(mut self, params: ServiceParams) -> Self {
        self.params = params;
        self
    }
}

impl ServiceProvider for FactoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    fn is_defer(&self) -> bool {
        self.defer
    }

    fn params(&self, _container: &Container) -> ServiceParams {
        self.params.clone()
    }

    fn register(
        &self,
        container: &Container,
        params: &ServiceParams,
    ) -> Result<Service, BoxError> {
        (self.factory)(container, params)
    }
}

// =============================================================================
// Container
// =============================================================================

struct Binding {
    provider: Arc<dyn ServiceProvider>,
    instance: OnceLock<Service>,
    building: Mutex<()>,
}

impl Binding {
    fn new(provider: Arc<dyn ServiceProvider>) -> Self {
        Self {
            provider,
            instance: OnceLock::new(),
            building: Mutex::new(()),
        }
    }
}

thread_local! {
    /// Bindings under construction on this thread, by address, with their keys.
    static RESOLVING: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// A binding on this thread's resolution stack, popped on drop even if a
/// constructor panics.
struct StackFrame;

impl StackFrame {
    fn enter(key: &str, binding: &Arc<Binding>) -> ContainerResult<Self> {
        let id = Arc::as_ptr(binding) as usize;
        RESOLVING.with_borrow_mut(|frames| {
            if frames.iter().any(|(frame, _)| *frame == id) {
                let mut chain: Vec<String> = frames.iter().map(|(_, key)| key.clone()).collect();
                chain.push(key.to_string());
                return Err(ContainerError::CyclicDependency { chain });
            }
            frames.push((id, key.to_string()));
            Ok(StackFrame)
        })
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        RESOLVING.with_borrow_mut(|frames| {
            frames.pop();
        });
    }
}

/// The service registry.
pub struct Container {
    bindings: RwLock<HashMap<String, Arc<Binding>>>,
    parent: Option<Arc<Container>>,
    policy: BindPolicy,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("keys", &self.keys())
            .field("policy", &self.policy)
            .field("scoped", &self.parent.is_some())
            .finish()
    }
}

impl Container {
    /// Creates an empty container that overwrites on re-binding.
    pub fn new() -> Self {
        Self::with_policy(BindPolicy::default())
    }

    /// Creates an empty container with the given re-binding policy.
    pub fn with_policy(policy: BindPolicy) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            parent: None,
            policy,
        }
    }

    /// Creates a child container that falls back to `self` for unbound keys.
    pub fn scope(self: &Arc<Self>) -> Container {
        Container {
            bindings: RwLock::new(HashMap::new()),
            parent: Some(Arc::clone(self)),
            policy: self.policy,
        }
    }

    /// The re-binding policy.
    pub fn policy(&self) -> BindPolicy {
        self.policy
    }

    /// Registers a provider under its declared key.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::MalformedKey`] for an empty key or one containing
    ///   whitespace.
    /// - [`ContainerError::AlreadyBound`] under [`BindPolicy::Strict`].
    /// - Any construction error of an eager provider; the binding is
    ///   removed again in that case.
    pub fn bind<P: ServiceProvider>(&self, provider: P) -> ContainerResult<()> {
        let key = provider.name().to_string();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(ContainerError::MalformedKey(key));
        }

        let binding = Arc::new(Binding::new(Arc::new(provider)));

        {
            let mut bindings = self.bindings.write();
            if bindings.contains_key(&key) {
                match self.policy {
                    BindPolicy::Strict => return Err(ContainerError::AlreadyBound(key)),
                    BindPolicy::Overwrite => {
                        warn!(service = %key, "Service re-bound, previous provider replaced");
                    }
                }
            }
            bindings.insert(key.clone(), Arc::clone(&binding));
        }

        debug!(
            service = %key,
            lifetime = ?binding.provider.lifetime(),
            defer = binding.provider.is_defer(),
            "Service bound"
        );

        if !binding.provider.is_defer() {
            if let Err(err) = self.resolve(&key, &binding) {
                let mut bindings = self.bindings.write();
                if bindings
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &binding))
                {
                    bindings.remove(&key);
                }
                return Err(err);
            }
        }

        Ok(())
    }

    /// Returns `true` if `key` is bound here or in a parent.
    pub fn is_bind(&self, key: &str) -> bool {
        self.bindings.read().contains_key(key)
            || self.parent.as_ref().is_some_and(|parent| parent.is_bind(key))
    }

    /// Keys bound directly in this container, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.bindings.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Resolves `key` according to its lifetime.
    ///
    /// # Errors
    ///
    /// [`ContainerError::NotBound`] for unknown keys; otherwise any boot,
    /// construction or cycle error raised while building the instance.
    pub fn make(&self, key: &str) -> ContainerResult<Service> {
        match self.lookup(key) {
            Some(binding) => self.resolve(key, &binding),
            None => match &self.parent {
                Some(parent) => parent.make(key),
                None => Err(ContainerError::NotBound(key.to_string())),
            },
        }
    }

    /// Like [`make`](Self::make), for callers that cannot continue without
    /// the service.
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be resolved.
    pub fn must_make(&self, key: &str) -> Service {
        match self.make(key) {
            Ok(service) => service,
            Err(err) => panic!("required service '{key}' is unavailable: {err}"),
        }
    }

    /// Resolves `key` and downcasts it to capability `T`.
    pub fn make_as<T: ?Sized + 'static>(&self, key: &str) -> ContainerResult<Arc<T>> {
        let service = self.make(key)?;
        service.get::<T>().ok_or_else(|| ContainerError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
            actual: service.capability(),
        })
    }

    /// Like [`make_as`](Self::make_as), panicking on failure.
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be resolved or has another capability.
    pub fn must_make_as<T: ?Sized + 'static>(&self, key: &str) -> Arc<T> {
        match self.make_as::<T>(key) {
            Ok(service) => service,
            Err(err) => panic!("required service '{key}' is unavailable: {err}"),
        }
    }

    /// Builds a fresh instance with explicit constructor parameters.
    ///
    /// `params` override the provider's defaults position by position. The
    /// singleton cache is neither read nor written.
    pub fn make_new(&self, key: &str, params: ServiceParams) -> ContainerResult<Service> {
        match self.lookup(key) {
            Some(binding) => {
                let _frame = StackFrame::enter(key, &binding)?;
                self.construct(key, &binding.provider, Some(params))
            }
            None => match &self.parent {
                Some(parent) => parent.make_new(key, params),
                None => Err(ContainerError::NotBound(key.to_string())),
            },
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<Binding>> {
        self.bindings.read().get(key).cloned()
    }

    fn resolve(&self, key: &str, binding: &Arc<Binding>) -> ContainerResult<Service> {
        if let Some(service) = binding.instance.get() {
            return Ok(service.clone());
        }

        // Checked before taking the build lock, which is not re-entrant.
        let _frame = StackFrame::enter(key, binding)?;
        if binding.provider.lifetime() == Lifetime::Transient {
            return self.construct(key, &binding.provider, None);
        }

        let _building = binding.building.lock();
        // Another thread may have finished while we waited for the lock.
        if let Some(service) = binding.instance.get() {
            return Ok(service.clone());
        }

        let service = self.construct(key, &binding.provider, None)?;
        let _ = binding.instance.set(service.clone());
        trace!(service = %key, "Singleton cached");
        Ok(service)
    }

    fn construct(
        &self,
        key: &str,
        provider: &Arc<dyn ServiceProvider>,
        explicit: Option<ServiceParams>,
    ) -> ContainerResult<Service> {
        provider.boot(self).map_err(|source| ContainerError::Boot {
            key: key.to_string(),
            source,
        })?;

        let defaults = provider.params(self);
        let params = match explicit {
            Some(explicit) => explicit.overlay(defaults),
            None => defaults,
        };

        let service = provider
            .register(self, &params)
            .map_err(|source| ContainerError::construction(key, source))?;
        trace!(service = %key, capability = service.capability(), "Service constructed");
        Ok(service)
    }
}
