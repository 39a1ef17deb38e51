//! # Instance cache and checkout.
//!
//! Each format keeps a pool of pre-built instances. Worlds are built off the
//! primary context (blocking pool), promoted to `Cached` once the CacheReady
//! interceptors agree, and claimed by checkout with a single compare-and-swap:
//!
//! ```text
//! ensure_warm(format, n)
//!   ├─ retry promotion of Uncached leftovers
//!   └─ build missing:  layout slot ─► spawn_blocking(build_world) ─► pool ─► promote
//!
//! checkout(format, players)
//!   ├─ claim: first Cached with CAS Cached → Activating
//!   │     └─ none: Exhausted ─► CheckoutExhausted
//!   │              BuildOnDemand   ─► build one, claim it
//!   ├─ primary.run(activate)  Start hook ─► Active, players assigned, Start event
//!   └─ refill pool in the background (cache_size > 0)
//! ```
//!
//! ## Rules
//! - Two concurrent checkouts never receive the same instance.
//! - A failed build moves the instance to `Failed` and never into the pool.
//! - Warming for one format is serialized; different formats warm in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};

use crate::error::{EngineError, WorldError};
use crate::events::{Event, EventKind};
use crate::format::Format;
use crate::hooks::{CacheReady, Start};
use crate::host::PlayerId;

use super::config::{CheckoutPolicy, PopulationPolicy};
use super::engine::Engine;
use super::instance::{Instance, InstanceId, InstanceState, RemovalReason};
use super::layout::GridLayout;

/// Result of [`Engine::checkout`].
#[derive(Debug)]
pub enum Checkout {
    /// The instance is active and the players are assigned to it.
    Granted(Arc<Instance>),
    /// No cached instance could be handed out.
    Exhausted,
}

impl Checkout {
    pub fn is_granted(&self) -> bool {
        matches!(self, Checkout::Granted(_))
    }

    pub fn into_instance(self) -> Option<Arc<Instance>> {
        match self {
            Checkout::Granted(instance) => Some(instance),
            Checkout::Exhausted => None,
        }
    }
}

/// Outcome of one [`Engine::ensure_warm`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Cached instances after the pass.
    pub cached: usize,
    /// Worlds built by this pass.
    pub built: usize,
    /// Leftover uncached instances promoted by this pass.
    pub promoted: usize,
    /// Promotions vetoed by an interceptor.
    pub cancelled: usize,
    pub failed: usize,
}

pub(crate) enum Built {
    Cached(Arc<Instance>),
    Cancelled,
    Failed(WorldError),
}

/// Instances of one format that have not been checked out.
pub(crate) struct Pool {
    instances: RwLock<Vec<Arc<Instance>>>,
    warming: tokio::sync::Mutex<()>,
}

impl Pool {
    fn new() -> Self {
        Self {
            instances: RwLock::new(Vec::new()),
            warming: tokio::sync::Mutex::new(()),
        }
    }

    fn count(&self, state: InstanceState) -> usize {
        self.instances
            .read()
            .iter()
            .filter(|i| i.state() == state)
            .count()
    }

    fn in_state(&self, state: InstanceState) -> Vec<Arc<Instance>> {
        self.instances
            .read()
            .iter()
            .filter(|i| i.state() == state)
            .cloned()
            .collect()
    }

    /// Claims the first cached instance.
    fn claim(&self) -> Option<Arc<Instance>> {
        self.instances
            .read()
            .iter()
            .find(|i| i.transition(InstanceState::Cached, InstanceState::Activating))
            .cloned()
    }
}

/// Per-format pools plus the shared paste-origin layout.
pub(crate) struct InstanceCache {
    pools: RwLock<HashMap<String, Arc<Pool>>>,
    pub(crate) layout: Arc<Mutex<GridLayout>>,
}

impl InstanceCache {
    pub(crate) fn new(grid_size: u32) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            layout: Arc::new(Mutex::new(GridLayout::new(grid_size))),
        }
    }

    pub(crate) fn pool(&self, format: &str) -> Arc<Pool> {
        if let Some(pool) = self.pools.read().get(format) {
            return Arc::clone(pool);
        }
        Arc::clone(
            self.pools
                .write()
                .entry(format.to_string())
                .or_insert_with(|| Arc::new(Pool::new())),
        )
    }

    pub(crate) fn claim(&self, format: &str) -> Option<Arc<Instance>> {
        let pool = self.pools.read().get(format).cloned()?;
        pool.claim()
    }

    pub(crate) fn remove(&self, format: &str, id: InstanceId) {
        if let Some(pool) = self.pools.read().get(format) {
            pool.instances.write().retain(|i| i.id() != id);
        }
    }

    pub(crate) fn cached(&self, format: &str) -> Vec<Arc<Instance>> {
        self.pools
            .read()
            .get(format)
            .map(|p| p.in_state(InstanceState::Cached))
            .unwrap_or_default()
    }

    pub(crate) fn all(&self) -> Vec<Arc<Instance>> {
        self.pools
            .read()
            .values()
            .flat_map(|p| p.instances.read().clone())
            .collect()
    }
}

impl Engine {
    /// Makes sure at least `target` instances of `format` are cached.
    pub async fn ensure_warm(&self, format: &str, target: usize) -> Result<WarmReport, EngineError> {
        let format = self.formats.get(format)?;
        let pool = self.cache.pool(&format.id);
        let _warming = pool.warming.lock().await;
        let mut report = WarmReport::default();
        if self.token.is_cancelled() {
            return Ok(report);
        }

        for instance in pool.in_state(InstanceState::Uncached) {
            if self.promote(&instance) {
                report.promoted += 1;
            } else {
                report.cancelled += 1;
            }
        }

        let have = pool.count(InstanceState::Cached) + pool.count(InstanceState::Uncached);
        let missing = target.saturating_sub(have);
        let builds = (0..missing).map(|_| self.build_instance(&format, &pool));
        for built in join_all(builds).await {
            match built {
                Built::Cached(_) => report.built += 1,
                Built::Cancelled => {
                    report.built += 1;
                    report.cancelled += 1;
                }
                Built::Failed(_) => report.failed += 1,
            }
        }

        report.cached = pool.count(InstanceState::Cached);
        tracing::debug!(format = format.id.as_str(), ?report, "cache warmed");
        Ok(report)
    }

    /// Warms every loaded format up to the configured `cache_size`.
    pub async fn warm_all(&self) -> BTreeMap<String, Result<WarmReport, EngineError>> {
        let target = self.cfg.cache_size;
        let ids = self.formats.ids();
        let reports = join_all(ids.iter().map(|id| self.ensure_warm(id, target))).await;
        ids.into_iter().zip(reports).collect()
    }

    /// Hands a cached instance of `format` to `players`.
    ///
    /// At most one caller ever receives a given instance.
    pub async fn checkout(&self, format: &str, players: Vec<PlayerId>) -> Result<Checkout, EngineError> {
        if players.is_empty() {
            return Err(EngineError::NoPlayers);
        }
        let format = self.formats.get(format)?;

        let mut claimed = self.cache.claim(&format.id);
        if claimed.is_none() && self.cfg.checkout == CheckoutPolicy::BuildOnDemand {
            let pool = self.cache.pool(&format.id);
            match self.build_instance(&format, &pool).await {
                Built::Cached(instance) => {
                    if instance.transition(InstanceState::Cached, InstanceState::Activating) {
                        claimed = Some(instance);
                    }
                }
                Built::Cancelled => {}
                Built::Failed(err) => return Err(err.into()),
            }
        }

        let Some(instance) = claimed else {
            tracing::debug!(format = format.id.as_str(), "checkout exhausted");
            self.bus.publish(
                Event::new(EventKind::CheckoutExhausted)
                    .with_format(format.id.as_str())
                    .with_players(&players),
            );
            return Ok(Checkout::Exhausted);
        };

        let Some(engine) = self.this.upgrade() else {
            instance.transition(InstanceState::Activating, InstanceState::Cached);
            return Err(EngineError::PrimaryClosed);
        };
        let target = Arc::clone(&instance);
        let activated = self
            .primary
            .run(move || engine.activate(&target, players))
            .await;

        match activated {
            Ok(true) => {
                self.spawn_refill(&format.id);
                Ok(Checkout::Granted(instance))
            }
            Ok(false) => {
                self.bus.publish(
                    Event::new(EventKind::CheckoutExhausted).with_format(format.id.as_str()),
                );
                Ok(Checkout::Exhausted)
            }
            Err(err) => {
                instance.transition(InstanceState::Activating, InstanceState::Cached);
                Err(err)
            }
        }
    }

    /// Cached instances of `format`, in pool order.
    pub fn cached_instances(&self, format: &str) -> Vec<Arc<Instance>> {
        self.cache.cached(format)
    }

    /// Runs on the primary context with the instance claimed (`Activating`).
    fn activate(&self, instance: &Arc<Instance>, players: Vec<PlayerId>) -> bool {
        let origin = instance.origin();
        let verdict = self.hooks.fire(Start::DELIVERY, "start", |h| {
            h.on_start(&Start {
                instance,
                origin,
                players: &players,
            })
        });
        if verdict.is_cancel() {
            instance.transition(InstanceState::Activating, InstanceState::Cached);
            self.bus.publish(
                Event::new(EventKind::TransitionCancelled)
                    .with_instance(instance.id(), instance.format_id())
                    .with_players(&players)
                    .with_reason("start"),
            );
            return false;
        }
        if !instance.transition(InstanceState::Activating, InstanceState::Active) {
            return false;
        }

        for player in &players {
            self.detach_player(*player);
        }
        instance.inner.lock().players = players.clone();
        {
            let mut index = self.players.write();
            for player in &players {
                index.insert(*player, Arc::clone(instance));
            }
        }
        self.active.write().insert(instance.id(), Arc::clone(instance));
        self.cache.remove(instance.format_id(), instance.id());

        if instance.is_released() {
            self.unindex(instance, &players);
            return false;
        }

        tracing::info!(
            instance = %instance.id(),
            format = instance.format_id(),
            players = players.len(),
            "instance started"
        );
        self.bus.publish(
            Event::new(EventKind::Start)
                .with_instance(instance.id(), instance.format_id())
                .with_location(instance.spawn_point())
                .with_players(&players),
        );

        if self.cfg.population == PopulationPolicy::OnActivation {
            for idx in 0..instance.format().rooms.len() {
                self.populate_room(instance, idx);
            }
        }
        self.evaluate_completion(instance);
        true
    }

    /// Builds one world for `format` and offers the instance to the pool.
    pub(crate) async fn build_instance(&self, format: &Arc<Format>, pool: &Pool) -> Built {
        let (slot, origin) = self.cache.layout.lock().acquire();
        let instance = Arc::new(Instance::new(Arc::clone(format), slot, origin));

        let allocator = Arc::clone(&self.allocator);
        let target = Arc::clone(format);
        let built = self
            .rt
            .spawn_blocking(move || allocator.build_world(&target, origin))
            .await;
        let world = match built {
            Ok(Ok(world)) => world,
            Ok(Err(err)) => {
                self.fail(&instance, &err.as_message(), RemovalReason::BuildFailed);
                return Built::Failed(err);
            }
            Err(join) => {
                let err = WorldError::Build {
                    format: format.id.clone(),
                    reason: join.to_string(),
                };
                self.fail(&instance, &err.as_message(), RemovalReason::BuildFailed);
                return Built::Failed(err);
            }
        };

        instance.attach_world(world);
        if self.token.is_cancelled() {
            self.dispose(&instance, RemovalReason::Shutdown);
            return Built::Cancelled;
        }
        pool.instances.write().push(Arc::clone(&instance));
        if self.promote(&instance) {
            Built::Cached(instance)
        } else {
            Built::Cancelled
        }
    }

    /// Uncached → Cached, unless an interceptor objects.
    fn promote(&self, instance: &Arc<Instance>) -> bool {
        if instance.state() != InstanceState::Uncached {
            return false;
        }
        let origin = instance.origin();
        let verdict = self.hooks.fire(CacheReady::DELIVERY, "cache_ready", |h| {
            h.on_cache_ready(&CacheReady { instance, origin })
        });
        if verdict.is_cancel() {
            self.bus.publish(
                Event::new(EventKind::TransitionCancelled)
                    .with_instance(instance.id(), instance.format_id())
                    .with_reason("cache_ready"),
            );
            return false;
        }
        if !instance.transition(InstanceState::Uncached, InstanceState::Cached) {
            return false;
        }
        self.bus.publish(
            Event::new(EventKind::CacheReady)
                .with_instance(instance.id(), instance.format_id())
                .with_location(origin),
        );
        true
    }

    fn spawn_refill(&self, format: &str) {
        let (Some(target), Some(engine)) = (self.cfg.refill_target(), self.this.upgrade()) else {
            return;
        };
        let format = format.to_string();
        self.tracker.spawn_on(
            async move {
                if let Err(err) = engine.ensure_warm(&format, target).await {
                    tracing::warn!(format = format.as_str(), error = err.as_label(), "cache refill failed");
                }
            },
            &self.rt,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::hooks::{Intercept, Verdict};
    use crate::testkit::{self, drain, wait_state};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_warm_builds_and_caches() {
        let h = testkit::harness(Config {
            cache_size: 2,
            ..Config::default()
        });
        let report = h.engine.ensure_warm("sewer-1", 2).await.unwrap();
        assert_eq!(report.built, 2);
        assert_eq!(report.cached, 2);
        assert_eq!(h.worlds.built(), 2);

        let again = h.engine.ensure_warm("sewer-1", 2).await.unwrap();
        assert_eq!(again.built, 0, "already warm");

        let origins: Vec<_> = h
            .engine
            .cached_instances("sewer-1")
            .iter()
            .map(|i| i.origin())
            .collect();
        assert_ne!(origins[0], origins[1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_party_and_unknown_format() {
        let h = testkit::harness(Config::default());
        let err = h.engine.checkout("sewer-1", Vec::new()).await.unwrap_err();
        assert_eq!(err.as_label(), "engine_no_players");
        let err = h
            .engine
            .checkout("nope", vec![PlayerId::random()])
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "engine_format_not_found");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_checkouts_never_share() {
        let h = testkit::harness(Config {
            cache_size: 0,
            ..Config::default()
        });
        h.engine.ensure_warm("sewer-1", 3).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .checkout("sewer-1", vec![PlayerId::random()])
                    .await
                    .unwrap()
            }));
        }
        let mut granted = Vec::new();
        for t in tasks {
            if let Checkout::Granted(inst) = t.await.unwrap() {
                granted.push(inst.id());
            }
        }
        granted.sort();
        let before = granted.len();
        granted.dedup();
        assert_eq!(before, 3);
        assert_eq!(granted.len(), 3, "each instance granted once");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exhausted_is_announced() {
        let h = testkit::harness(Config {
            cache_size: 0,
            ..Config::default()
        });
        let mut rx = h.engine.subscribe();
        let out = h
            .engine
            .checkout("sewer-1", vec![PlayerId::random()])
            .await
            .unwrap();
        assert!(!out.is_granted());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| e.kind == EventKind::CheckoutExhausted));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refill_after_checkout() {
        let h = testkit::harness(Config {
            cache_size: 1,
            ..Config::default()
        });
        h.engine.ensure_warm("sewer-1", 1).await.unwrap();
        let granted = h
            .engine
            .checkout("sewer-1", vec![PlayerId::random()])
            .await
            .unwrap();
        assert!(granted.is_granted());

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while h.engine.cached_instances("sewer-1").is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.engine.cached_instances("sewer-1").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_build_on_demand() {
        let h = testkit::harness(Config {
            cache_size: 0,
            checkout: CheckoutPolicy::BuildOnDemand,
            ..Config::default()
        });
        let out = h
            .engine
            .checkout("sewer-1", vec![PlayerId::random()])
            .await
            .unwrap();
        let inst = out.into_instance().expect("built on demand");
        assert_eq!(inst.state(), InstanceState::Active);

        h.worlds.fail_builds(true);
        let err = h
            .engine
            .checkout("sewer-1", vec![PlayerId::random()])
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "world_build");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_build_never_enters_pool() {
        let h = testkit::harness(Config {
            cache_size: 0,
            ..Config::default()
        });
        let mut rx = h.engine.subscribe();
        h.worlds.fail_builds(true);
        let report = h.engine.ensure_warm("sewer-1", 2).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.cached, 0);
        assert!(h.engine.cached_instances("sewer-1").is_empty());

        let failed = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind == EventKind::InstanceFailed)
            .count();
        assert_eq!(failed, 2);

        h.worlds.fail_builds(false);
        let report = h.engine.ensure_warm("sewer-1", 1).await.unwrap();
        assert_eq!(report.cached, 1);
    }

    struct Gate(Arc<AtomicBool>, &'static str);

    impl Intercept for Gate {
        fn on_cache_ready(&self, _ev: &CacheReady<'_>) -> Verdict {
            self.verdict("cache_ready")
        }

        fn on_start(&self, _ev: &Start<'_>) -> Verdict {
            self.verdict("start")
        }
    }

    impl Gate {
        fn verdict(&self, what: &str) -> Verdict {
            if self.1 == what && self.0.load(Ordering::SeqCst) {
                Verdict::Cancel
            } else {
                Verdict::Continue
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_cache_ready_is_retried() {
        let hold = Arc::new(AtomicBool::new(true));
        let h = testkit::harness_with(
            Config {
                cache_size: 0,
                ..Config::default()
            },
            |b| b.with_interceptor(Arc::new(Gate(hold.clone(), "cache_ready"))),
        );
        let report = h.engine.ensure_warm("sewer-1", 1).await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.cached, 0);

        let again = h.engine.ensure_warm("sewer-1", 1).await.unwrap();
        assert_eq!(again.built, 0, "the uncached instance is retried, not rebuilt");

        hold.store(false, Ordering::SeqCst);
        let report = h.engine.ensure_warm("sewer-1", 1).await.unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(report.cached, 1);
        assert_eq!(h.worlds.built(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_start_returns_instance_to_pool() {
        let hold = Arc::new(AtomicBool::new(true));
        let h = testkit::harness_with(
            Config {
                cache_size: 0,
                ..Config::default()
            },
            |b| b.with_interceptor(Arc::new(Gate(hold.clone(), "start"))),
        );
        h.engine.ensure_warm("sewer-1", 1).await.unwrap();
        let player = PlayerId::random();

        let out = h.engine.checkout("sewer-1", vec![player]).await.unwrap();
        assert!(!out.is_granted());
        let cached = h.engine.cached_instances("sewer-1");
        assert_eq!(cached.len(), 1);
        assert!(cached[0].players().is_empty());
        assert!(h.engine.current_instance(player).is_none());

        hold.store(false, Ordering::SeqCst);
        let inst = h
            .engine
            .checkout("sewer-1", vec![player])
            .await
            .unwrap()
            .into_instance()
            .expect("granted on retry");
        assert_eq!(inst.id(), cached[0].id());
        assert_eq!(inst.players(), vec![player]);
        wait_state(&inst, InstanceState::Active).await;
    }
}
