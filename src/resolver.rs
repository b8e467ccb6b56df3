//! Pathway attempt resolver
//!
//! Decides, per pathway strategy, whether a student's next interaction with
//! an interactive is a continuation of the current attempt or a genuine
//! retry that mints a new ordinal. One shared skeleton plus a per-variant
//! disposition table, dispatched by the pathway's declared type:
//!
//! | Variant  | progress completed | progress incomplete |
//! |----------|--------------------|---------------------|
//! | Linear   | mint value+1       | mint value+1        |
//! | Free     | keep current       | mint value+1        |
//! | Mastery  | keep current       | mint value+1        |
//!
//! Linear flow never revisits a node, so any fresh contact advances the
//! counter. Free and mastery pathways let a student revisit completed work
//! without inflating attempt counts; increments are reserved for retries of
//! incomplete work.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::attempt::AttemptService;
use crate::error::ProgressError;
use crate::model::{Attempt, CoursewareElementType, PathwayType};
use crate::store::ProgressStore;

/// What to do with the current attempt once the latest progress matched it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Return the current attempt unchanged
    Keep,
    /// Mint a new attempt with ordinal current + 1
    Mint,
}

/// Per-variant strategy table
#[derive(Debug, Clone, Copy)]
struct ResolutionTable {
    on_completed: Disposition,
    on_incomplete: Disposition,
}

fn table_for(pathway_type: PathwayType) -> ResolutionTable {
    match pathway_type {
        PathwayType::Linear => ResolutionTable {
            on_completed: Disposition::Mint,
            on_incomplete: Disposition::Mint,
        },
        PathwayType::Free | PathwayType::Mastery => ResolutionTable {
            on_completed: Disposition::Keep,
            on_incomplete: Disposition::Mint,
        },
    }
}

/// Resolves interactive attempts at pathway boundaries
pub struct PathwayAttemptResolver {
    attempts: Arc<AttemptService>,
    progress_store: Arc<dyn ProgressStore>,
}

impl PathwayAttemptResolver {
    pub fn new(attempts: Arc<AttemptService>, progress_store: Arc<dyn ProgressStore>) -> Self {
        Self {
            attempts,
            progress_store,
        }
    }

    /// Resolve the attempt to act on for an interactive under a pathway.
    ///
    /// No progress yet, or progress stale relative to the attempt in hand,
    /// short-circuits to the current attempt without further store calls —
    /// "progress not found" is the common case for a brand-new element, not
    /// an error.
    pub async fn resolve_interactive_attempt(
        &self,
        pathway_type: PathwayType,
        deployment_id: Uuid,
        interactive_id: Uuid,
        student_id: Uuid,
        parent_pathway_attempt: &Attempt,
        current_interactive_attempt: Attempt,
    ) -> Result<Attempt, ProgressError> {
        let latest = self
            .progress_store
            .find_latest(deployment_id, interactive_id, student_id)
            .await?;

        let progress = match latest {
            None => return Ok(current_interactive_attempt),
            Some(p) if p.attempt_id != current_interactive_attempt.id.id => {
                return Ok(current_interactive_attempt)
            }
            Some(p) => p,
        };

        let table = table_for(pathway_type);
        let disposition = if progress.completion.is_completed() {
            table.on_completed
        } else {
            table.on_incomplete
        };

        match disposition {
            Disposition::Keep => Ok(current_interactive_attempt),
            Disposition::Mint => {
                debug!(
                    interactive_id = %interactive_id,
                    student_id = %student_id,
                    pathway_type = ?pathway_type,
                    from_value = current_interactive_attempt.value,
                    "Minting retry attempt"
                );
                self.attempts
                    .new_attempt_with_value(
                        deployment_id,
                        student_id,
                        CoursewareElementType::Interactive,
                        interactive_id,
                        Some(parent_pathway_attempt.id.id),
                        current_interactive_attempt.value + 1,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::model::{Completion, Progress, TimeId};
    use crate::store::{AttemptStore, MemoryAttemptStore, MemoryProgressStore, ProgressStore};

    struct Fixture {
        resolver: PathwayAttemptResolver,
        attempt_store: Arc<MemoryAttemptStore>,
        progress_store: Arc<MemoryProgressStore>,
        deployment_id: Uuid,
        student_id: Uuid,
        interactive_id: Uuid,
        pathway_attempt: Attempt,
        current: Attempt,
    }

    async fn fixture() -> Fixture {
        let attempt_store = Arc::new(MemoryAttemptStore::new());
        let progress_store = Arc::new(MemoryProgressStore::new());
        let attempts = Arc::new(AttemptService::new(
            attempt_store.clone(),
            Arc::new(EventBus::new()),
        ));
        let resolver =
            PathwayAttemptResolver::new(attempts, progress_store.clone() as Arc<dyn ProgressStore>);

        let deployment_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();
        let interactive_id = Uuid::new_v4();
        let pathway_id = Uuid::new_v4();

        let pathway_attempt = Attempt {
            id: TimeId::new(),
            deployment_id,
            student_id,
            courseware_element_id: pathway_id,
            courseware_element_type: CoursewareElementType::Pathway,
            parent_id: None,
            value: 1,
        };
        let current = Attempt {
            id: TimeId::new(),
            deployment_id,
            student_id,
            courseware_element_id: interactive_id,
            courseware_element_type: CoursewareElementType::Interactive,
            parent_id: Some(pathway_attempt.id.id),
            value: 1,
        };
        attempt_store.persist(&pathway_attempt).await.unwrap();
        attempt_store.persist(&current).await.unwrap();

        Fixture {
            resolver,
            attempt_store,
            progress_store,
            deployment_id,
            student_id,
            interactive_id,
            pathway_attempt,
            current,
        }
    }

    fn progress_for(f: &Fixture, attempt_id: Uuid, completion: Completion) -> Progress {
        Progress {
            id: TimeId::new(),
            deployment_id: f.deployment_id,
            change_id: Uuid::new_v4(),
            student_id: f.student_id,
            courseware_element_id: f.interactive_id,
            courseware_element_type: CoursewareElementType::Interactive,
            attempt_id,
            completion,
            evaluation_id: Some(Uuid::new_v4()),
            child_completion_values: Default::default(),
            child_completion_confidences: Default::default(),
        }
    }

    async fn resolve(f: &Fixture, pathway_type: PathwayType) -> Attempt {
        f.resolver
            .resolve_interactive_attempt(
                pathway_type,
                f.deployment_id,
                f.interactive_id,
                f.student_id,
                &f.pathway_attempt,
                f.current.clone(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_progress_returns_current_unchanged_for_all_variants() {
        for pathway_type in [PathwayType::Linear, PathwayType::Free, PathwayType::Mastery] {
            let f = fixture().await;
            let resolved = resolve(&f, pathway_type).await;
            assert_eq!(resolved, f.current, "{:?}", pathway_type);
        }
    }

    #[tokio::test]
    async fn stale_progress_returns_current_unchanged() {
        for pathway_type in [PathwayType::Linear, PathwayType::Free, PathwayType::Mastery] {
            let f = fixture().await;
            // Progress references some other attempt
            let stale = progress_for(&f, Uuid::new_v4(), Completion::completed());
            f.progress_store.persist(&stale).await.unwrap();

            let resolved = resolve(&f, pathway_type).await;
            assert_eq!(resolved, f.current, "{:?}", pathway_type);
        }
    }

    #[tokio::test]
    async fn linear_completed_mints_next_ordinal() {
        let f = fixture().await;
        let done = progress_for(&f, f.current.id.id, Completion::completed());
        f.progress_store.persist(&done).await.unwrap();

        let resolved = resolve(&f, PathwayType::Linear).await;
        assert_eq!(resolved.value, 2);
        assert_eq!(resolved.parent_id, Some(f.pathway_attempt.id.id));
        assert_ne!(resolved.id, f.current.id);
    }

    #[tokio::test]
    async fn free_and_mastery_keep_completed_attempt() {
        for pathway_type in [PathwayType::Free, PathwayType::Mastery] {
            let f = fixture().await;
            let done = progress_for(&f, f.current.id.id, Completion::completed());
            f.progress_store.persist(&done).await.unwrap();

            let resolved = resolve(&f, pathway_type).await;
            assert_eq!(resolved, f.current, "{:?}", pathway_type);

            // No retry attempt was minted
            let latest = f
                .attempt_store
                .find_latest(f.deployment_id, f.interactive_id, f.student_id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(latest.value, 1, "{:?}", pathway_type);
        }
    }

    #[tokio::test]
    async fn incomplete_progress_mints_retry_for_all_variants() {
        for pathway_type in [PathwayType::Linear, PathwayType::Free, PathwayType::Mastery] {
            let f = fixture().await;
            let partial = progress_for(&f, f.current.id.id, Completion::new(0.4, 0.6));
            f.progress_store.persist(&partial).await.unwrap();

            let resolved = resolve(&f, pathway_type).await;
            assert_eq!(resolved.value, 2, "{:?}", pathway_type);
        }
    }
}
