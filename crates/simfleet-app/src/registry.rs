//! Engine registry
//!
//! Holds the engine pool in slot order. Iteration `index` is backed by slot
//! `index % engine_count`. Every engine sits behind its own async mutex: the
//! guard returned by [`EngineRegistry::before`] is held until
//! [`EngineRegistry::after`], so two iterations sharing a device never
//! overlap.
//!
//! Boot and teardown are partition-scoped and driven by
//! [`EngineLifecycleListener`](crate::listener::EngineLifecycleListener)
//! through [`boot_slots`](EngineRegistry::boot_slots) and
//! [`teardown_slots`](EngineRegistry::teardown_slots).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::{Mutex, OwnedMutexGuard};

use simfleet_core::prelude::*;
use simfleet_core::{BatchIndices, EngineDescriptor, EngineState, IterationContext, Platform};
use simfleet_daemon::{Engine, EngineEnv, ProcessExecutor, ProcessRunner};

use crate::config::PortSettings;

/// Reject descriptor lists naming the same device twice
pub fn ensure_distinct_devices<'a>(
    descriptors: impl IntoIterator<Item = &'a EngineDescriptor>,
) -> Result<()> {
    let mut seen: HashMap<(Platform, &str), usize> = HashMap::new();
    for (slot, descriptor) in descriptors.into_iter().enumerate() {
        let key = (descriptor.platform, descriptor.device_identity.trim());
        if let Some(first) = seen.insert(key, slot) {
            return Err(Error::config_invalid(format!(
                "engines[{}] and engines[{}] both use {} device {}",
                first, slot, descriptor.platform, descriptor.device_identity
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Session Driver
// ─────────────────────────────────────────────────────────────────

/// What the automation driver and test bodies get to see of an engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInfo {
    pub slot: usize,
    pub platform: Platform,
    pub device: String,
    pub state: EngineState,
    pub port: Option<u16>,
    pub serial: Option<String>,
    pub capabilities: BTreeMap<String, serde_json::Value>,
}

/// External automation driver operating on a booted engine
pub trait SessionDriver: Send + Sync {
    /// Install/launch the app under test before an iteration
    fn launch_app<'a>(&'a self, engine: &'a EngineInfo) -> BoxFuture<'a, Result<()>>;

    /// Reset the app after an iteration
    fn reset_app<'a>(&'a self, engine: &'a EngineInfo) -> BoxFuture<'a, Result<()>>;

    fn is_ready<'a>(&'a self, engine: &'a EngineInfo) -> BoxFuture<'a, Result<bool>>;
}

/// Driver for suites that manage the app themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDriver;

impl SessionDriver for NoopDriver {
    fn launch_app<'a>(&'a self, _engine: &'a EngineInfo) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn reset_app<'a>(&'a self, _engine: &'a EngineInfo) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn is_ready<'a>(&'a self, _engine: &'a EngineInfo) -> BoxFuture<'a, Result<bool>> {
        future::ready(Ok(true)).boxed()
    }
}

// ─────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────

/// Exclusive access to one engine for the duration of an iteration
pub struct SlotGuard<R = ProcessExecutor> {
    engine: OwnedMutexGuard<Engine<R>>,
    info: EngineInfo,
}

impl<R> SlotGuard<R> {
    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    pub fn engine(&self) -> &Engine<R> {
        &self.engine
    }
}

/// Ordered engine pool plus the session driver acting on it
pub struct EngineRegistry<R = ProcessExecutor> {
    engines: Vec<Arc<Mutex<Engine<R>>>>,
    driver: Arc<dyn SessionDriver>,
}

impl<R> std::fmt::Debug for EngineRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engines.len())
            .finish()
    }
}

impl<R> EngineRegistry<R>
where
    R: ProcessRunner + Send + Sync + 'static,
{
    /// Build a registry over `engines` in slot order.
    ///
    /// Two engines may not drive the same device: a duplicate
    /// `(platform, device)` pair is `ConfigInvalid`.
    pub fn new(engines: Vec<Engine<R>>, driver: Arc<dyn SessionDriver>) -> Result<Self> {
        ensure_distinct_devices(engines.iter().map(Engine::descriptor))?;
        Ok(Self {
            engines: engines
                .into_iter()
                .map(|e| Arc::new(Mutex::new(e)))
                .collect(),
            driver,
        })
    }

    /// Build one engine per descriptor, each probing its platform's port range
    pub fn from_descriptors(
        descriptors: &[EngineDescriptor],
        ports: &PortSettings,
        env: &EngineEnv<R>,
        driver: Arc<dyn SessionDriver>,
    ) -> Result<Self> {
        let engines = descriptors
            .iter()
            .map(|d| Engine::new(d.clone(), ports.for_platform(d.platform), env.clone()))
            .collect();
        Self::new(engines, driver)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Slot backing iteration `index`
    pub fn slot_for(&self, index: usize) -> Result<usize> {
        if self.engines.is_empty() {
            return Err(Error::config("no engines configured"));
        }
        Ok(index % self.engines.len())
    }

    /// Distinct slots backing the indices of `batch`, ascending
    pub fn slots_for(&self, batch: &BatchIndices) -> Result<Vec<usize>> {
        let mut slots = batch
            .iter()
            .map(|index| self.slot_for(index))
            .collect::<Result<Vec<_>>>()?;
        slots.sort_unstable();
        slots.dedup();
        Ok(slots)
    }

    fn engine(&self, slot: usize) -> Result<&Arc<Mutex<Engine<R>>>> {
        self.engines.get(slot).ok_or(Error::EngineNotFound { slot })
    }

    fn info_for(slot: usize, engine: &Engine<R>) -> EngineInfo {
        let descriptor = engine.descriptor();
        EngineInfo {
            slot,
            platform: descriptor.platform,
            device: descriptor.device_identity.clone(),
            state: engine.state(),
            port: engine.port(),
            serial: engine.serial(),
            capabilities: descriptor.capabilities.clone(),
        }
    }

    /// Current view of the engine at `slot`
    pub async fn info(&self, slot: usize) -> Result<EngineInfo> {
        let engine = self.engine(slot)?.lock().await;
        Ok(Self::info_for(slot, &engine))
    }

    pub async fn states(&self) -> Vec<EngineState> {
        let mut states = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            states.push(engine.lock().await.state());
        }
        states
    }

    /// Start-of-iteration hook.
    ///
    /// Locks the engine at `ctx.slot` and has the driver launch the app on it.
    /// The engine must already be `Ready`; booting belongs to the partition
    /// (see [`EngineLifecycleListener`](crate::EngineLifecycleListener)).
    /// The engine stays locked until the guard is handed to [`after`](Self::after).
    pub async fn before(&self, ctx: IterationContext) -> Result<SlotGuard<R>> {
        let engine = Arc::clone(self.engine(ctx.slot)?).lock_owned().await;
        let info = Self::info_for(ctx.slot, &engine);
        if info.state != EngineState::Ready {
            return Err(Error::EngineState {
                device: info.device,
                expected: EngineState::Ready.to_string(),
                actual: info.state.to_string(),
            });
        }
        trace!(
            "before index {} (repetition {}) on {}",
            ctx.index,
            ctx.repetition,
            info.device
        );

        self.driver.launch_app(&info).await?;
        if !self.driver.is_ready(&info).await? {
            return Err(Error::driver(format!(
                "session on {} not ready after app launch",
                info.device
            )));
        }

        Ok(SlotGuard { engine, info })
    }

    /// End-of-iteration hook: reset the app, then release the engine
    pub async fn after(&self, guard: SlotGuard<R>, ctx: IterationContext) -> Result<()> {
        trace!("after index {} on {}", ctx.index, guard.info.device);
        let result = self.driver.reset_app(&guard.info).await;
        drop(guard);
        result
    }

    /// Boot every listed slot that is not running yet.
    ///
    /// `Stopped` engines are reset first. A settings failure is logged and the
    /// engine is kept. Boot failures stop at the first error.
    pub async fn boot_slots(&self, slots: &[usize]) -> Result<()> {
        for &slot in slots {
            let mut engine = self.engine(slot)?.lock().await;

            if engine.state() == EngineState::Stopped {
                engine.reset()?;
            }
            if engine.state() != EngineState::Idle {
                debug!("Slot {} already {}", slot, engine.state());
                continue;
            }

            engine.boot().await?;
            if let Err(e) = engine.apply_settings().await {
                warn!("Continuing without settings on slot {}: {}", slot, e);
            }
        }
        Ok(())
    }

    /// Tear down and reset every listed slot.
    ///
    /// Every slot is visited even when some fail; the first error is returned.
    pub async fn teardown_slots(&self, slots: &[usize]) -> Result<()> {
        let mut first_error = None;

        for &slot in slots {
            let engine = match self.engine(slot) {
                Ok(engine) => engine,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            let mut engine = engine.lock().await;

            if let Err(e) = engine.teardown().await {
                warn!("Teardown of slot {} failed: {}", slot, e);
                first_error.get_or_insert(e);
            }
            if let Err(e) = engine.reset() {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn teardown_all(&self) -> Result<()> {
        let slots: Vec<usize> = (0..self.engines.len()).collect();
        self.teardown_slots(&slots).await
    }
}
