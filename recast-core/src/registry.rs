//! Module registry and lifecycle driver.
//!
//! Every long-lived component registers here with a factory, its declared
//! dependencies, and the interface names it exports. Registration order is
//! dependency order: a registration naming an unknown dependency is
//! refused, which keeps the list topological by construction. Startup
//! drives `initialize`/`activate` forward through the list; shutdown
//! drives `deactivate`/`destroy` in reverse, best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Lifecycle states of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Created,
    Initializing,
    Initialized,
    Activating,
    Active,
    Deactivating,
    Deactivated,
    Destroying,
    Destroyed,
    Error,
}

impl ModuleState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
            Self::Deactivated => "deactivated",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
        }
    }

    /// Guarded transitions. `Error` is reachable from anywhere and
    /// terminal; everything else follows the linear machine.
    fn admits(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Created, Self::Initializing)
                | (Self::Initializing, Self::Initialized)
                | (Self::Initialized, Self::Activating)
                | (Self::Activating, Self::Active)
                | (Self::Active, Self::Deactivating)
                | (Self::Deactivating, Self::Deactivated)
                | (Self::Deactivated | Self::Initialized | Self::Created, Self::Destroying)
                | (Self::Destroying, Self::Destroyed)
        )
    }
}

/// Uniform lifecycle contract. All hooks default to no-ops so small
/// modules only implement the phases they care about.
#[async_trait]
pub trait Module: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }
    async fn activate(&self) -> Result<()> {
        Ok(())
    }
    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

pub type ModuleRef = Arc<dyn Module>;

/// Factory invoked lazily on first resolve (every resolve for
/// non-singletons).
pub type ModuleFactory = Box<dyn Fn() -> Result<ModuleRef> + Send + Sync>;

/// Registration metadata for one module.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub dependencies: Vec<String>,
    pub exports: Vec<String>,
    pub singleton: bool,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            exports: Vec::new(),
            singleton: true,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn exports(mut self, exports: &[&str]) -> Self {
        self.exports = exports.iter().map(ToString::to_string).collect();
        self
    }

    /// Factory runs on every resolve; the lifecycle driver skips these.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.singleton = false;
        self
    }
}

/// Status snapshot of one registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub name: String,
    pub state: ModuleState,
    pub dependencies: Vec<String>,
    pub exports: Vec<String>,
}

struct Entry {
    spec: ModuleSpec,
    factory: ModuleFactory,
    instance: Option<ModuleRef>,
    state: ModuleState,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    /// name-or-export -> entry index, rebuilt lazily, cleared on register.
    resolve_cache: HashMap<String, usize>,
}

/// The registry itself. All mutation goes through the internal lock;
/// lifecycle hooks are awaited with the lock released.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: Mutex<Inner>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Re-registering a name fails; naming a dependency
    /// that no earlier registration provides fails, which is what keeps
    /// registration order topological.
    pub fn register(&self, spec: ModuleSpec, factory: ModuleFactory) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.entries.iter().any(|e| e.spec.name == spec.name) {
            return Err(Error::AlreadyExists(format!("module '{}'", spec.name)));
        }
        for dep in &spec.dependencies {
            let provided = inner.entries.iter().any(|e| {
                e.spec.name == *dep || e.spec.exports.iter().any(|x| x == dep)
            });
            if !provided {
                return Err(Error::NotFound(format!(
                    "dependency '{dep}' of module '{}' (register providers first)",
                    spec.name
                )));
            }
        }

        debug!(module = %spec.name, exports = ?spec.exports, "module registered");
        inner.resolve_cache.clear();
        inner.entries.push(Entry {
            spec,
            factory,
            instance: None,
            state: ModuleState::Created,
        });
        Ok(())
    }

    /// Resolve by module name or exported interface name. Singletons are
    /// instantiated once and cached; transients get a fresh instance.
    pub fn resolve(&self, name_or_export: &str) -> Result<ModuleRef> {
        let mut inner = self.inner.lock();

        let idx = match inner.resolve_cache.get(name_or_export) {
            Some(&idx) => idx,
            None => {
                let idx = inner
                    .entries
                    .iter()
                    .position(|e| {
                        e.spec.name == name_or_export
                            || e.spec.exports.iter().any(|x| x == name_or_export)
                    })
                    .ok_or_else(|| {
                        Error::NotFound(format!("module or export '{name_or_export}'"))
                    })?;
                inner
                    .resolve_cache
                    .insert(name_or_export.to_string(), idx);
                idx
            }
        };

        let entry = &mut inner.entries[idx];
        if entry.spec.singleton {
            Self::instantiate(entry)
        } else {
            (entry.factory)()
        }
    }

    /// Every module exporting `export`, in registration order.
    pub fn resolve_all(&self, export: &str) -> Result<Vec<ModuleRef>> {
        let mut inner = self.inner.lock();
        let indices: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.spec.exports.iter().any(|x| x == export))
            .map(|(i, _)| i)
            .collect();

        let mut out = Vec::with_capacity(indices.len());
        for idx in indices {
            let entry = &mut inner.entries[idx];
            if entry.spec.singleton {
                out.push(Self::instantiate(entry)?);
            } else {
                out.push((entry.factory)()?);
            }
        }
        Ok(out)
    }

    /// Drive every singleton through `initialize`, registration order.
    /// The first failure marks the module `Error` and aborts.
    pub async fn initialize_all(&self) -> Result<()> {
        self.drive_forward(Phase::Initialize).await
    }

    /// Drive every singleton through `activate`, registration order.
    pub async fn activate_all(&self) -> Result<()> {
        self.drive_forward(Phase::Activate).await
    }

    /// Reverse-order `deactivate`. Errors are collected, logged, and
    /// returned, never rethrown; every module gets its chance.
    pub async fn deactivate_all(&self) -> Vec<(String, Error)> {
        self.drive_reverse(Phase::Deactivate).await
    }

    /// Reverse-order `destroy`, best-effort like [`Self::deactivate_all`].
    pub async fn destroy_all(&self) -> Vec<(String, Error)> {
        self.drive_reverse(Phase::Destroy).await
    }

    /// Synchronous status snapshot of every registration.
    #[must_use]
    pub fn status(&self) -> Vec<ModuleStatus> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| ModuleStatus {
                name: e.spec.name.clone(),
                state: e.state,
                dependencies: e.spec.dependencies.clone(),
                exports: e.spec.exports.clone(),
            })
            .collect()
    }

    fn instantiate(entry: &mut Entry) -> Result<ModuleRef> {
        if let Some(instance) = &entry.instance {
            return Ok(Arc::clone(instance));
        }
        let instance = (entry.factory)()?;
        entry.instance = Some(Arc::clone(&instance));
        Ok(instance)
    }

    async fn drive_forward(&self, phase: Phase) -> Result<()> {
        let (via, target) = phase.states();
        let count = self.inner.lock().entries.len();
        for idx in 0..count {
            let (name, instance) = {
                let mut inner = self.inner.lock();
                let entry = &mut inner.entries[idx];
                if !entry.spec.singleton {
                    continue;
                }
                if !entry.state.admits(via) {
                    return Err(Error::StateMismatch {
                        module: entry.spec.name.clone(),
                        from: entry.state.as_str(),
                        to: via.as_str(),
                    });
                }
                let instance = match Self::instantiate(entry) {
                    Ok(i) => i,
                    Err(e) => {
                        entry.state = ModuleState::Error;
                        return Err(e);
                    }
                };
                entry.state = via;
                (entry.spec.name.clone(), instance)
            };

            debug!(module = %name, phase = via.as_str(), "lifecycle");
            let result = phase.run(instance.as_ref()).await;

            let mut inner = self.inner.lock();
            let entry = &mut inner.entries[idx];
            match result {
                Ok(()) => entry.state = target,
                Err(e) => {
                    error!(module = %name, phase = via.as_str(), error = %e, "lifecycle failed");
                    entry.state = ModuleState::Error;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn drive_reverse(&self, phase: Phase) -> Vec<(String, Error)> {
        let (via, target) = phase.states();
        let mut failures = Vec::new();
        let count = self.inner.lock().entries.len();
        for idx in (0..count).rev() {
            let step = {
                let mut inner = self.inner.lock();
                let entry = &mut inner.entries[idx];
                if !entry.spec.singleton {
                    continue;
                }
                // A module that was never instantiated has nothing to run.
                if entry.instance.is_none() {
                    if entry.state.admits(via) {
                        entry.state = target;
                    }
                    continue;
                }
                if !entry.state.admits(via) {
                    continue;
                }
                entry.state = via;
                entry
                    .instance
                    .as_ref()
                    .map(|i| (entry.spec.name.clone(), Arc::clone(i)))
            };

            let Some((name, instance)) = step else {
                continue;
            };

            debug!(module = %name, phase = via.as_str(), "lifecycle");
            let result = phase.run(instance.as_ref()).await;

            let mut inner = self.inner.lock();
            let entry = &mut inner.entries[idx];
            match result {
                Ok(()) => entry.state = target,
                Err(e) => {
                    error!(module = %name, phase = via.as_str(), error = %e, "lifecycle failed");
                    entry.state = ModuleState::Error;
                    failures.push((name, e));
                }
            }
        }
        failures
    }
}

/// The four driven lifecycle phases.
#[derive(Clone, Copy)]
enum Phase {
    Initialize,
    Activate,
    Deactivate,
    Destroy,
}

impl Phase {
    /// `(transitional, terminal)` states of this phase.
    const fn states(self) -> (ModuleState, ModuleState) {
        match self {
            Self::Initialize => (ModuleState::Initializing, ModuleState::Initialized),
            Self::Activate => (ModuleState::Activating, ModuleState::Active),
            Self::Deactivate => (ModuleState::Deactivating, ModuleState::Deactivated),
            Self::Destroy => (ModuleState::Destroying, ModuleState::Destroyed),
        }
    }

    async fn run(self, module: &dyn Module) -> Result<()> {
        match self {
            Self::Initialize => module.initialize().await,
            Self::Activate => module.activate().await,
            Self::Deactivate => module.deactivate().await,
            Self::Destroy => module.destroy().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records lifecycle calls into a shared log for ordering assertions.
    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_activate: bool,
    }

    #[async_trait]
    impl Module for Probe {
        async fn initialize(&self) -> Result<()> {
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }
        async fn activate(&self) -> Result<()> {
            if self.fail_on_activate {
                return Err(Error::Internal("boom".into()));
            }
            self.log.lock().push(format!("activate:{}", self.name));
            Ok(())
        }
        async fn deactivate(&self) -> Result<()> {
            self.log.lock().push(format!("deactivate:{}", self.name));
            Ok(())
        }
        async fn destroy(&self) -> Result<()> {
            self.log.lock().push(format!("destroy:{}", self.name));
            Ok(())
        }
    }

    fn probe_factory(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_on_activate: bool,
    ) -> ModuleFactory {
        let log = Arc::clone(log);
        Box::new(move || {
            Ok(Arc::new(Probe {
                name,
                log: Arc::clone(&log),
                fail_on_activate,
            }) as ModuleRef)
        })
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(ModuleSpec::new("config"), probe_factory("config", &log, false))
            .expect("first");
        let err = registry
            .register(ModuleSpec::new("config"), probe_factory("config", &log, false))
            .expect_err("duplicate");
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn unknown_dependency_is_refused() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = registry
            .register(
                ModuleSpec::new("relay").depends_on(&["ingest"]),
                probe_factory("relay", &log, false),
            )
            .expect_err("missing dep");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn resolve_by_export_and_cache_invalidation() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                ModuleSpec::new("driver-a").exports(&["destination-driver"]),
                probe_factory("driver-a", &log, false),
            )
            .expect("register a");

        let first = registry.resolve("destination-driver").expect("resolve");
        // Registering another exporter clears the cache but the first
        // exporter still wins by registration order.
        registry
            .register(
                ModuleSpec::new("driver-b").exports(&["destination-driver"]),
                probe_factory("driver-b", &log, false),
            )
            .expect("register b");
        let again = registry.resolve("destination-driver").expect("resolve");
        assert!(Arc::ptr_eq(&first, &again));

        let all = registry.resolve_all("destination-driver").expect("all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn lifecycle_runs_forward_and_reverse() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["config", "ingest", "relay"] {
            registry
                .register(ModuleSpec::new(name), probe_factory(name, &log, false))
                .expect("register");
        }

        registry.initialize_all().await.expect("init");
        registry.activate_all().await.expect("activate");
        assert!(registry.deactivate_all().await.is_empty());
        assert!(registry.destroy_all().await.is_empty());

        let calls = log.lock().clone();
        assert_eq!(
            calls,
            vec![
                "init:config",
                "init:ingest",
                "init:relay",
                "activate:config",
                "activate:ingest",
                "activate:relay",
                "deactivate:relay",
                "deactivate:ingest",
                "deactivate:config",
                "destroy:relay",
                "destroy:ingest",
                "destroy:config",
            ]
        );
    }

    #[tokio::test]
    async fn activation_failure_aborts_and_marks_error() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(ModuleSpec::new("ok"), probe_factory("ok", &log, false))
            .expect("register");
        registry
            .register(ModuleSpec::new("bad"), probe_factory("bad", &log, true))
            .expect("register");
        registry
            .register(ModuleSpec::new("never"), probe_factory("never", &log, false))
            .expect("register");

        registry.initialize_all().await.expect("init");
        registry.activate_all().await.expect_err("must abort");

        let states: Vec<(String, ModuleState)> = registry
            .status()
            .into_iter()
            .map(|s| (s.name, s.state))
            .collect();
        assert_eq!(states[0].1, ModuleState::Active);
        assert_eq!(states[1].1, ModuleState::Error);
        // Third module never reached activation.
        assert_eq!(states[2].1, ModuleState::Initialized);
    }

    #[tokio::test]
    async fn double_activation_is_a_state_mismatch() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(ModuleSpec::new("only"), probe_factory("only", &log, false))
            .expect("register");
        registry.initialize_all().await.expect("init");
        registry.activate_all().await.expect("activate");

        let err = registry.activate_all().await.expect_err("second activate");
        assert!(matches!(err, Error::StateMismatch { .. }));
        // Guard failure leaves the state untouched.
        assert_eq!(registry.status()[0].state, ModuleState::Active);
    }

    #[tokio::test]
    async fn transients_are_skipped_by_lifecycle_and_fresh_per_resolve() {
        let registry = ModuleRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                ModuleSpec::new("scratch").transient(),
                probe_factory("scratch", &log, false),
            )
            .expect("register");

        registry.initialize_all().await.expect("init");
        assert!(log.lock().is_empty());

        let a = registry.resolve("scratch").expect("a");
        let b = registry.resolve("scratch").expect("b");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
