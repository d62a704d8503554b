//! Lightweight counters for cache traffic and engine builds.
//!
//! Active only with the `profiler` feature; every entry point compiles to a
//! no-op otherwise.

#[cfg(feature = "profiler")]
use std::collections::BTreeMap;
#[cfg(feature = "profiler")]
use std::sync::{Mutex, OnceLock};
#[cfg(feature = "profiler")]
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    Cache,
    Compile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub kind: EventKind,
    pub name: &'static str,
    pub calls: u64,
    pub total_nanos: u128,
}

#[cfg(feature = "profiler")]
type Table = BTreeMap<(EventKind, &'static str), (u64, u128)>;

#[cfg(feature = "profiler")]
fn table() -> &'static Mutex<Table> {
    static TABLE: OnceLock<Mutex<Table>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

#[cfg(feature = "profiler")]
fn record(kind: EventKind, name: &'static str, nanos: u128) {
    if let Ok(mut table) = table().lock() {
        let slot = table.entry((kind, name)).or_insert((0, 0));
        slot.0 += 1;
        slot.1 += nanos;
    }
}

#[inline(always)]
pub fn cache_event(name: &'static str) {
    #[cfg(feature = "profiler")]
    {
        record(EventKind::Cache, name, 0);
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
    }
}

/// Times the enclosing scope under `name` until the guard drops.
pub struct ScopeGuard {
    #[cfg(feature = "profiler")]
    name: &'static str,
    #[cfg(feature = "profiler")]
    start: Instant,
}

#[inline(always)]
pub fn compile_scope(name: &'static str) -> ScopeGuard {
    #[cfg(feature = "profiler")]
    {
        ScopeGuard {
            name,
            start: Instant::now(),
        }
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
        ScopeGuard {}
    }
}

#[cfg(feature = "profiler")]
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        record(EventKind::Compile, self.name, self.start.elapsed().as_nanos());
    }
}

/// Drains the accumulated counters. `None` when profiling is compiled out.
#[cfg(feature = "profiler")]
pub fn take_report() -> Option<Vec<ProfileEntry>> {
    let mut table = table().lock().ok()?;
    let drained = std::mem::take(&mut *table);
    Some(
        drained
            .into_iter()
            .map(|((kind, name), (calls, total_nanos))| ProfileEntry {
                kind,
                name,
                calls,
                total_nanos,
            })
            .collect(),
    )
}

#[cfg(not(feature = "profiler"))]
pub fn take_report() -> Option<Vec<ProfileEntry>> {
    None
}
