//! Shape-keyed engine cache with a per-key build gate.
//!
//! `Ready` lookups take only the read lock. A miss goes through the key's
//! gate: the first caller builds while later callers for the same key wait
//! on the gate's condvar, then look again. A failed build leaves the key
//! unbuilt, so a waiter that wakes to a miss becomes the next builder.
//! Gates live only while a key has callers in flight; a builder that
//! unwinds out of `build` leaves its idle gate behind until the key's next
//! build completes.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock};

use log::debug;

use crate::accelerator::BuildError;
use crate::profiling;
use crate::shape_key::ShapeKey;

use super::{BuildFailure, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unbuilt,
    Building,
    Ready,
}

/// A ready engine plus what the runtime tracks alongside it.
pub(crate) struct CachedEngine<E> {
    pub(crate) engine: E,
    /// Engine bytes, once known. Set at load time or on first persist.
    pub(crate) persisted: OnceLock<Arc<[u8]>>,
    /// Held for the duration of a call when the accelerator cannot run one
    /// engine concurrently.
    pub(crate) exec_lock: Mutex<()>,
}

impl<E> CachedEngine<E> {
    fn new(engine: E, persisted: Option<Arc<[u8]>>) -> Self {
        let slot = OnceLock::new();
        if let Some(bytes) = persisted {
            let _ = slot.set(bytes);
        }
        Self {
            engine,
            persisted: slot,
            exec_lock: Mutex::new(()),
        }
    }
}

#[derive(Default)]
struct BuildGate {
    building: Mutex<bool>,
    done: Condvar,
}

/// Clears the gate and wakes waiters on every exit from a build, including
/// unwinding out of the builder.
struct GateRelease<'a> {
    gate: &'a BuildGate,
}

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        let mut building = self
            .gate
            .building
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *building = false;
        self.gate.done.notify_all();
    }
}

pub(crate) struct EngineCache<E> {
    ready: RwLock<HashMap<ShapeKey, Arc<CachedEngine<E>>>>,
    gates: Mutex<HashMap<ShapeKey, Arc<BuildGate>>>,
}

impl<E> Default for EngineCache<E> {
    fn default() -> Self {
        Self {
            ready: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<E> EngineCache<E> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, key: &ShapeKey) -> Result<Option<Arc<CachedEngine<E>>>, RuntimeError> {
        let ready = self
            .ready
            .read()
            .map_err(|_| RuntimeError::Poisoned("engine cache"))?;
        Ok(ready.get(key).cloned())
    }

    /// Marks `key` ready without building, for engines restored from a store.
    pub(crate) fn insert_ready(
        &self,
        key: ShapeKey,
        engine: E,
        persisted: Option<Arc<[u8]>>,
    ) -> Result<Arc<CachedEngine<E>>, RuntimeError> {
        let cached = Arc::new(CachedEngine::new(engine, persisted));
        self.ready
            .write()
            .map_err(|_| RuntimeError::Poisoned("engine cache"))?
            .insert(key, Arc::clone(&cached));
        Ok(cached)
    }

    pub(crate) fn state(&self, key: &ShapeKey) -> Result<EngineState, RuntimeError> {
        if self.lookup(key)?.is_some() {
            return Ok(EngineState::Ready);
        }
        let gate = self
            .gates
            .lock()
            .map_err(|_| RuntimeError::Poisoned("engine build gates"))?
            .get(key)
            .cloned();
        let building = match gate {
            Some(gate) => *gate
                .building
                .lock()
                .map_err(|_| RuntimeError::Poisoned("engine build gate"))?,
            None => false,
        };
        Ok(if building {
            EngineState::Building
        } else {
            EngineState::Unbuilt
        })
    }

    pub(crate) fn ready_entries(&self) -> Result<Vec<(ShapeKey, Arc<CachedEngine<E>>)>, RuntimeError> {
        let ready = self
            .ready
            .read()
            .map_err(|_| RuntimeError::Poisoned("engine cache"))?;
        let mut entries = ready
            .iter()
            .map(|(key, cached)| (key.clone(), Arc::clone(cached)))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Returns the ready engine for `key`, running `build` if this caller is
    /// the one to move the key from unbuilt to building.
    pub(crate) fn get_or_build<F>(
        &self,
        key: &ShapeKey,
        mut build: F,
    ) -> Result<Arc<CachedEngine<E>>, RuntimeError>
    where
        F: FnMut() -> Result<E, BuildError>,
    {
        loop {
            if let Some(hit) = self.lookup(key)? {
                profiling::cache_event("trt_offload.engine_hit");
                debug!("engine cache hit for {key}");
                return Ok(hit);
            }

            let gate = {
                let mut gates = self
                    .gates
                    .lock()
                    .map_err(|_| RuntimeError::Poisoned("engine build gates"))?;
                Arc::clone(gates.entry(key.clone()).or_default())
            };

            {
                let mut building = gate
                    .building
                    .lock()
                    .map_err(|_| RuntimeError::Poisoned("engine build gate"))?;
                if *building {
                    profiling::cache_event("trt_offload.engine_wait");
                    debug!("waiting on in-flight engine build for {key}");
                    while *building {
                        building = gate
                            .done
                            .wait(building)
                            .map_err(|_| RuntimeError::Poisoned("engine build gate"))?;
                    }
                    continue;
                }
                // A build may have finished between the lookup and taking the gate.
                if let Some(hit) = self.lookup(key)? {
                    return Ok(hit);
                }
                *building = true;
            }

            profiling::cache_event("trt_offload.engine_miss");
            let release = GateRelease { gate: &gate };
            let engine = match build() {
                Ok(engine) => engine,
                Err(source) => {
                    drop(release);
                    self.retire_gate(key, &gate, false);
                    return Err(RuntimeError::Build(BuildFailure {
                        shape_key: key.clone(),
                        source,
                    }));
                }
            };
            let cached = self.insert_ready(key.clone(), engine, None)?;
            drop(release);
            self.retire_gate(key, &gate, true);
            return Ok(cached);
        }
    }

    /// Drops the gate for `key` once the builder is done with it. After a
    /// failure the gate stays while woken waiters still hold it, and the
    /// last of them to fail removes it.
    fn retire_gate(&self, key: &ShapeKey, gate: &Arc<BuildGate>, ready: bool) {
        let Ok(mut gates) = self.gates.lock() else {
            return;
        };
        let current = gates.get(key).is_some_and(|held| Arc::ptr_eq(held, gate));
        // One reference in the map plus the builder's own.
        if current && (ready || Arc::strong_count(gate) == 2) {
            gates.remove(key);
        }
    }
}
