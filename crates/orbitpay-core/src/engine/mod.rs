//! The orchestration engine (spec.md C3-C8). Generic over its collaborators
//! the way the teacher's `Service<R>` / `DunningManager<G>` structs are
//! (`services/`, `jobs/dunning_job.rs`), so tests can swap in
//! `InMemoryRepository` + `TestClock` and production wiring can swap in
//! whatever implementations it needs without the engine's logic caring.

pub mod actions;
pub mod callback;
pub mod reconciliation;
pub mod subscription;
pub mod transaction;
pub mod user_view;

use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::registry::Registry;
use crate::repository::Repository;

pub struct Engine<R: Repository, C: Clock> {
    pub(crate) registry: Registry,
    pub(crate) repository: Arc<R>,
    pub(crate) clock: Arc<C>,
    pub(crate) config: EngineConfig,
    /// Single-flight lease per `(provider, loop_name)`, bounding concurrent
    /// reconciliation passes (spec.md §5). Value is the lease's expiry.
    pub(crate) leases: DashMap<(String, String), chrono::DateTime<chrono::Utc>>,
}

impl<R: Repository, C: Clock> Engine<R, C> {
    pub fn new(registry: Registry, repository: Arc<R>, clock: Arc<C>, config: EngineConfig) -> Self {
        Self {
            registry,
            repository,
            clock,
            config,
            leases: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read access to the backing repository, mainly for callers (and
    /// integration tests) that want to inspect persisted state directly
    /// rather than through a projection like [`Engine::get_user`].
    pub fn repository(&self) -> &R {
        self.repository.as_ref()
    }

    /// Read access to the engine's clock, letting a caller driving a
    /// [`crate::clock::TestClock`] advance time between operations.
    pub fn clock(&self) -> &C {
        self.clock.as_ref()
    }
}
