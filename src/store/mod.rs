//! Store interfaces and in-memory implementations
//!
//! Attempt, Progress, and CompletedWalkable records live in append-only,
//! timestamp-ordered logs behind narrow async traits. Durable gateways
//! (SQLite, DHT, anything else) implement these traits externally; the
//! dashmap-backed implementations here serve tests and in-process embedders.
//!
//! "Latest" is always the record with the greatest `TimeId` — the stores
//! never update in place.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::ProgressError;
use crate::model::{Attempt, CompletedWalkable, Progress};

/// Key for a (deployment, element, student) log
type TupleKey = (Uuid, Uuid, Uuid);

/// Append-only access to attempt records
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn persist(&self, attempt: &Attempt) -> Result<(), ProgressError>;

    async fn find_latest(
        &self,
        deployment_id: Uuid,
        element_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<Attempt>, ProgressError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Attempt>, ProgressError>;
}

/// Append-only access to progress records
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn persist(&self, progress: &Progress) -> Result<(), ProgressError>;

    async fn find_latest(
        &self,
        deployment_id: Uuid,
        element_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<Progress>, ProgressError>;
}

/// Append-only access to completed-walkable audit facts
#[async_trait]
pub trait CompletedWalkableStore: Send + Sync {
    async fn persist(&self, walkable: &CompletedWalkable) -> Result<(), ProgressError>;

    /// All completions recorded under the given pathway for the student,
    /// ordered by evaluation time
    async fn find_all(
        &self,
        deployment_id: Uuid,
        change_id: Uuid,
        pathway_id: Uuid,
        student_id: Uuid,
    ) -> Result<Vec<CompletedWalkable>, ProgressError>;
}

/// In-memory attempt log
#[derive(Default)]
pub struct MemoryAttemptStore {
    logs: DashMap<TupleKey, Vec<Attempt>>,
    by_id: DashMap<Uuid, Attempt>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn persist(&self, attempt: &Attempt) -> Result<(), ProgressError> {
        let key = (
            attempt.deployment_id,
            attempt.courseware_element_id,
            attempt.student_id,
        );
        self.logs.entry(key).or_default().push(attempt.clone());
        self.by_id.insert(attempt.id.id, attempt.clone());
        Ok(())
    }

    async fn find_latest(
        &self,
        deployment_id: Uuid,
        element_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<Attempt>, ProgressError> {
        Ok(self
            .logs
            .get(&(deployment_id, element_id, student_id))
            .and_then(|log| log.iter().max_by_key(|a| a.id).cloned()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Attempt>, ProgressError> {
        Ok(self.by_id.get(&id).map(|a| a.clone()))
    }
}

/// In-memory progress log
#[derive(Default)]
pub struct MemoryProgressStore {
    logs: DashMap<TupleKey, Vec<Progress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn persist(&self, progress: &Progress) -> Result<(), ProgressError> {
        let key = (
            progress.deployment_id,
            progress.courseware_element_id,
            progress.student_id,
        );
        self.logs.entry(key).or_default().push(progress.clone());
        Ok(())
    }

    async fn find_latest(
        &self,
        deployment_id: Uuid,
        element_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<Progress>, ProgressError> {
        Ok(self
            .logs
            .get(&(deployment_id, element_id, student_id))
            .and_then(|log| log.iter().max_by_key(|p| p.id).cloned()))
    }
}

/// In-memory completed-walkable log
#[derive(Default)]
pub struct MemoryCompletedWalkableStore {
    // Keyed by (deployment, pathway, student); change filtering happens on read
    logs: DashMap<TupleKey, Vec<CompletedWalkable>>,
}

impl MemoryCompletedWalkableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletedWalkableStore for MemoryCompletedWalkableStore {
    async fn persist(&self, walkable: &CompletedWalkable) -> Result<(), ProgressError> {
        let key = (
            walkable.deployment_id,
            walkable.parent_element_id,
            walkable.student_id,
        );
        self.logs.entry(key).or_default().push(walkable.clone());
        Ok(())
    }

    async fn find_all(
        &self,
        deployment_id: Uuid,
        change_id: Uuid,
        pathway_id: Uuid,
        student_id: Uuid,
    ) -> Result<Vec<CompletedWalkable>, ProgressError> {
        let mut rows: Vec<CompletedWalkable> = self
            .logs
            .get(&(deployment_id, pathway_id, student_id))
            .map(|log| {
                log.iter()
                    .filter(|w| w.change_id == change_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|w| w.evaluated_at);
        Ok(rows)
    }
}
