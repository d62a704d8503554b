//! Lazy engine runtime.
//!
//! Engines are built on first use per shape key, on the caller's thread,
//! and kept for the lifetime of the runtime. There is no eviction: the cache
//! holds one engine per distinct shape key seen.

mod cache;
mod executor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use thiserror::Error;

use crate::accelerator::{Accelerator, BuildConfig, BuildError, BuildRequest, ExecutionError};
use crate::artifact::{AcceleratorId, ArtifactError, CompiledArtifact, EngineStore, ParamBlob};
use crate::ir::{DType, Graph};
use crate::profiling;
use crate::shape_key::ShapeKey;
use crate::tensor::HostTensor;

use cache::EngineCache;

pub use cache::EngineState;
pub use executor::Executor;

/// A failed engine build. The key stays unbuilt and can be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine build for {shape_key} failed: {source}")]
pub struct BuildFailure {
    pub shape_key: ShapeKey,
    #[source]
    pub source: BuildError,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("artifact graph '{0}' is not tagged for accelerator offload")]
    NotAccepted(String),
    #[error("input mismatch: {0}")]
    InputMismatch(String),
    #[error(transparent)]
    Build(#[from] BuildFailure),
    #[error("engine execution for {shape_key} failed: {source}")]
    Execution {
        shape_key: ShapeKey,
        #[source]
        source: ExecutionError,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("engine for {shape_key} could not be serialized: {source}")]
    EngineEncode {
        shape_key: ShapeKey,
        #[source]
        source: BuildError,
    },
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Runtime module for one compiled artifact.
pub struct LazyEngineRuntime<A: Accelerator> {
    accelerator: Arc<A>,
    accelerator_id: AcceleratorId,
    graph: Graph,
    params: ParamBlob,
    output_dtypes: Vec<DType>,
    config: BuildConfig,
    cache: EngineCache<A::Engine>,
    builds: AtomicU64,
}

impl<A: Accelerator> LazyEngineRuntime<A> {
    /// Loads an artifact. Engines in its store become ready immediately;
    /// any store entry that fails to load fails the whole load.
    pub fn new(
        accelerator: Arc<A>,
        artifact: CompiledArtifact,
        config: BuildConfig,
    ) -> Result<Self, RuntimeError> {
        if !artifact.tag().is_some_and(|tag| tag.routes_to_accelerator()) {
            return Err(RuntimeError::NotAccepted(artifact.graph().entry.name.clone()));
        }
        let accelerator_id = AcceleratorId {
            name: accelerator.name().to_string(),
            version: accelerator.version(),
        };
        let (graph, params, store) = artifact.into_parts();
        let output_dtypes = graph.output_specs().iter().map(|spec| spec.dtype).collect();

        let runtime = Self {
            accelerator,
            accelerator_id,
            graph,
            params,
            output_dtypes,
            config,
            cache: EngineCache::new(),
            builds: AtomicU64::new(0),
        };
        runtime.restore_engines(store)?;
        Ok(runtime)
    }

    fn restore_engines(&self, store: EngineStore) -> Result<(), RuntimeError> {
        let Some(stored) = store.accelerator() else {
            return Ok(());
        };
        if *stored != self.accelerator_id {
            return Err(ArtifactError::AcceleratorMismatch {
                stored: stored.clone(),
                expected: self.accelerator_id.clone(),
            }
            .into());
        }
        for (key, bytes) in store.iter() {
            key.check_against(&self.graph)
                .map_err(|detail| ArtifactError::EngineDecode {
                    shape_key: key.clone(),
                    detail,
                })?;
            let engine = self.accelerator.deserialize_engine(bytes).map_err(|err| {
                ArtifactError::EngineDecode {
                    shape_key: key.clone(),
                    detail: err.to_string(),
                }
            })?;
            self.cache
                .insert_ready(key.clone(), engine, Some(Arc::clone(bytes)))?;
        }
        info!(
            "restored {} persisted engines for '{}' from {} v{}",
            store.len(),
            self.graph.entry.name,
            self.accelerator_id.name,
            self.accelerator_id.version
        );
        Ok(())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn accelerator(&self) -> &A {
        &self.accelerator
    }

    /// Runs the graph, building the engine for this input shape first if
    /// needed. A build in progress for the same shape is waited on, not
    /// duplicated.
    pub fn execute(&self, inputs: &[HostTensor]) -> Result<Vec<HostTensor>, RuntimeError> {
        let key = self.shape_key_for(inputs)?;
        let cached = self.cache.get_or_build(&key, || self.build_engine(&key))?;

        let _serial = if self.accelerator.requires_serialized_execution() {
            Some(
                cached
                    .exec_lock
                    .lock()
                    .map_err(|_| RuntimeError::Poisoned("engine execution"))?,
            )
        } else {
            None
        };
        Executor::new(self.accelerator.as_ref())
            .run(&cached.engine, inputs, &self.output_dtypes)
            .map_err(|source| RuntimeError::Execution {
                shape_key: key,
                source,
            })
    }

    fn shape_key_for(&self, inputs: &[HostTensor]) -> Result<ShapeKey, RuntimeError> {
        let key = ShapeKey::from_inputs(inputs);
        key.check_against(&self.graph)
            .map_err(RuntimeError::InputMismatch)?;
        for (tensor, input) in inputs.iter().zip(&self.graph.inputs) {
            if tensor.dtype() != input.spec.dtype {
                return Err(RuntimeError::InputMismatch(format!(
                    "input '{}' declared as {} but got {}",
                    input.name,
                    input.spec.dtype,
                    tensor.dtype()
                )));
            }
        }
        Ok(key)
    }

    fn build_engine(&self, key: &ShapeKey) -> Result<A::Engine, BuildError> {
        let _scope = profiling::compile_scope("trt_offload.engine_build");
        self.builds.fetch_add(1, Ordering::SeqCst);
        info!(
            "building {} engine for '{}' with input shapes {key}",
            self.accelerator_id.name, self.graph.entry.name
        );
        let started = Instant::now();
        let request = BuildRequest {
            graph: &self.graph,
            params: &self.params,
            shape_key: key,
            config: &self.config,
        };
        let result = self.accelerator.build(&request);
        match &result {
            Ok(_) => info!("engine for {key} built in {:.2?}", started.elapsed()),
            Err(err) => warn!("engine build for {key} failed after {:.2?}: {err}", started.elapsed()),
        }
        result
    }

    pub fn state(&self, key: &ShapeKey) -> Result<EngineState, RuntimeError> {
        self.cache.state(key)
    }

    /// Number of builder invocations, successful or not.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn ready_keys(&self) -> Result<Vec<ShapeKey>, RuntimeError> {
        Ok(self
            .cache
            .ready_entries()?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Snapshot of the artifact with every ready engine in its store.
    pub fn to_artifact(&self) -> Result<CompiledArtifact, RuntimeError> {
        let mut store = EngineStore::new();
        for (key, cached) in self.cache.ready_entries()? {
            let bytes = match cached.persisted.get() {
                Some(bytes) => Arc::clone(bytes),
                None => {
                    let encoded = self
                        .accelerator
                        .serialize_engine(&cached.engine)
                        .map_err(|source| RuntimeError::EngineEncode {
                            shape_key: key.clone(),
                            source,
                        })?;
                    let bytes: Arc<[u8]> = Arc::from(encoded);
                    let _ = cached.persisted.set(Arc::clone(&bytes));
                    bytes
                }
            };
            store.insert(&self.accelerator_id, key, bytes)?;
        }
        Ok(CompiledArtifact::from_parts(
            self.graph.clone(),
            self.params.clone(),
            store,
        ))
    }
}
