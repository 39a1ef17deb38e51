use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{
    core::Config,
    error::EngineError,
    events::Bus,
    format::FormatRegistry,
    hooks::{HookSet, Intercept},
    host::{AnyKind, EntityKinds, Host},
    subscribers::{Subscribe, SubscriberSet},
    world::WorldAllocator,
};
use super::{
    cache::InstanceCache,
    engine::{spawn_listener, Engine},
    primary::{self, PrimaryDriver},
};

/// Builder for constructing an [`Engine`] with its collaborators.
pub struct EngineBuilder {
    cfg: Config,
    allocator: Arc<dyn WorldAllocator>,
    host: Arc<dyn Host>,
    kinds: Arc<dyn EntityKinds>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    interceptors: Vec<Arc<dyn Intercept>>,
}

impl EngineBuilder {
    /// Creates a new builder with the given configuration and host adapters.
    pub fn new(cfg: Config, allocator: Arc<dyn WorldAllocator>, host: Arc<dyn Host>) -> Self {
        Self {
            cfg,
            allocator,
            host,
            kinds: Arc::new(AnyKind),
            subscribers: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    /// Sets the resolver used to validate mob entity kinds at load time.
    ///
    /// Defaults to [`AnyKind`], which accepts every non-empty name.
    pub fn with_kinds(mut self, kinds: Arc<dyn EntityKinds>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive engine events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Registers an interceptor before the engine starts.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Intercept>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Builds the engine and returns it with the primary-context driver.
    ///
    /// The host must either call [`PrimaryDriver::drain`] from its main tick or
    /// hand the driver to [`PrimaryDriver::spawn_thread`].
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn build(self) -> Result<(Arc<Engine>, PrimaryDriver), EngineError> {
        self.cfg.validate()?;

        let rt = tokio::runtime::Handle::current();
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let listener_stop = CancellationToken::new();
        let listener = spawn_listener(&bus, subs, listener_stop.clone());

        let hooks = HookSet::new();
        for interceptor in self.interceptors {
            hooks.register(interceptor);
        }
        let (primary, driver) = primary::channel();
        let cache = InstanceCache::new(self.cfg.grid_size);

        let engine = Arc::new_cyclic(|this: &Weak<Engine>| Engine {
            this: this.clone(),
            formats: FormatRegistry::new(self.kinds),
            cfg: self.cfg,
            bus,
            hooks,
            cache,
            allocator: self.allocator,
            host: self.host,
            primary,
            rt,
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            active: RwLock::new(Default::default()),
            players: RwLock::new(Default::default()),
            entities: RwLock::new(Default::default()),
            listener: Mutex::new(Some(listener)),
            listener_stop,
        });
        Ok((engine, driver))
    }
}
