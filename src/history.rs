//! Courseware history recorder
//!
//! Appends completed-walkable facts as a student moves through the tree and
//! reads them back to resume a path (free pathways pick up where the student
//! left off). Facts are written once and never overwritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::attempt::AttemptService;
use crate::error::ProgressError;
use crate::events::{EventBus, ProgressEvent};
use crate::model::{CompletedWalkable, CoursewareElementType, ElementRef};
use crate::store::CompletedWalkableStore;

/// Context of a completed evaluation, as delivered by the dispatch boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub evaluation_id: Uuid,
    pub deployment_id: Uuid,
    pub change_id: Uuid,
    pub element_id: Uuid,
    pub element_attempt_id: Uuid,
    pub parent_element_id: Uuid,
    pub parent_element_type: CoursewareElementType,
    pub parent_element_attempt_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
}

/// Records and reads completed-walkable history
pub struct CoursewareHistoryService {
    store: Arc<dyn CompletedWalkableStore>,
    attempts: Arc<AttemptService>,
    events: Arc<EventBus>,
}

impl CoursewareHistoryService {
    pub fn new(
        store: Arc<dyn CompletedWalkableStore>,
        attempts: Arc<AttemptService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            attempts,
            events,
        }
    }

    /// Record that a student completed a walkable, from an evaluation result
    pub async fn record(
        &self,
        student_id: Uuid,
        result: &EvaluationResult,
        walkable_type: CoursewareElementType,
    ) -> Result<CompletedWalkable, ProgressError> {
        let walkable = CompletedWalkable {
            deployment_id: result.deployment_id,
            change_id: result.change_id,
            student_id,
            parent_element_id: result.parent_element_id,
            parent_element_type: result.parent_element_type,
            parent_element_attempt_id: result.parent_element_attempt_id,
            element_id: result.element_id,
            element_type: walkable_type,
            element_attempt_id: result.element_attempt_id,
            evaluation_id: Some(result.evaluation_id),
            evaluated_at: result.evaluated_at,
        };
        self.persist(walkable).await
    }

    /// Explicit-context overload used by the restart flow, which has no
    /// evaluation to draw from
    #[allow(clippy::too_many_arguments)]
    pub async fn record_walkable(
        &self,
        deployment_id: Uuid,
        change_id: Uuid,
        student_id: Uuid,
        element: ElementRef,
        element_attempt_id: Uuid,
        parent_pathway_id: Uuid,
        parent_element_attempt_id: Uuid,
        evaluation_id: Option<Uuid>,
    ) -> Result<CompletedWalkable, ProgressError> {
        let walkable = CompletedWalkable {
            deployment_id,
            change_id,
            student_id,
            parent_element_id: parent_pathway_id,
            parent_element_type: CoursewareElementType::Pathway,
            parent_element_attempt_id,
            element_id: element.id,
            element_type: element.element_type,
            element_attempt_id,
            evaluation_id,
            evaluated_at: Utc::now(),
        };
        self.persist(walkable).await
    }

    /// Completed walkables under the student's latest attempt at the
    /// pathway, in evaluation order. A pathway with no attempt yet has no
    /// history: the result is empty, not an error.
    pub async fn fetch_history(
        &self,
        deployment_id: Uuid,
        change_id: Uuid,
        pathway_id: Uuid,
        student_id: Uuid,
    ) -> Result<Vec<CompletedWalkable>, ProgressError> {
        let latest_attempt = match self
            .attempts
            .find_latest_attempt(deployment_id, pathway_id, student_id)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) if e.is_not_found() => {
                debug!(pathway_id = %pathway_id, student_id = %student_id, "No pathway attempt yet, empty history");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let all = self
            .store
            .find_all(deployment_id, change_id, pathway_id, student_id)
            .await?;
        Ok(all
            .into_iter()
            .filter(|w| w.parent_element_attempt_id == latest_attempt.id.id)
            .collect())
    }

    async fn persist(
        &self,
        walkable: CompletedWalkable,
    ) -> Result<CompletedWalkable, ProgressError> {
        self.store.persist(&walkable).await?;
        debug!(
            element_id = %walkable.element_id,
            parent_element_id = %walkable.parent_element_id,
            student_id = %walkable.student_id,
            "Recorded completed walkable"
        );
        self.events.emit(ProgressEvent::WalkableCompleted {
            deployment_id: walkable.deployment_id,
            student_id: walkable.student_id,
            element_id: walkable.element_id,
            parent_element_id: walkable.parent_element_id,
        });
        Ok(walkable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attempt, TimeId};
    use crate::store::{AttemptStore, MemoryAttemptStore, MemoryCompletedWalkableStore};

    struct Fixture {
        history: CoursewareHistoryService,
        attempt_store: Arc<MemoryAttemptStore>,
        deployment_id: Uuid,
        change_id: Uuid,
        student_id: Uuid,
        pathway_id: Uuid,
    }

    fn fixture() -> Fixture {
        let attempt_store = Arc::new(MemoryAttemptStore::new());
        let events = Arc::new(EventBus::new());
        let attempts = Arc::new(AttemptService::new(attempt_store.clone(), events.clone()));
        let history = CoursewareHistoryService::new(
            Arc::new(MemoryCompletedWalkableStore::new()),
            attempts,
            events,
        );
        Fixture {
            history,
            attempt_store,
            deployment_id: Uuid::new_v4(),
            change_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            pathway_id: Uuid::new_v4(),
        }
    }

    fn pathway_attempt(f: &Fixture, value: u32) -> Attempt {
        Attempt {
            id: TimeId::new(),
            deployment_id: f.deployment_id,
            student_id: f.student_id,
            courseware_element_id: f.pathway_id,
            courseware_element_type: CoursewareElementType::Pathway,
            parent_id: None,
            value,
        }
    }

    #[tokio::test]
    async fn no_pathway_attempt_yields_empty_history() {
        let f = fixture();
        let history = f
            .history
            .fetch_history(f.deployment_id, f.change_id, f.pathway_id, f.student_id)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_is_scoped_to_latest_pathway_attempt() {
        let f = fixture();
        let old_attempt = pathway_attempt(&f, 1);
        let new_attempt = pathway_attempt(&f, 2);
        f.attempt_store.persist(&old_attempt).await.unwrap();

        // One completion under the old attempt
        f.history
            .record_walkable(
                f.deployment_id,
                f.change_id,
                f.student_id,
                ElementRef::interactive(Uuid::new_v4()),
                Uuid::new_v4(),
                f.pathway_id,
                old_attempt.id.id,
                Some(Uuid::new_v4()),
            )
            .await
            .unwrap();

        f.attempt_store.persist(&new_attempt).await.unwrap();
        let interactive = ElementRef::interactive(Uuid::new_v4());
        let recorded = f
            .history
            .record_walkable(
                f.deployment_id,
                f.change_id,
                f.student_id,
                interactive,
                Uuid::new_v4(),
                f.pathway_id,
                new_attempt.id.id,
                None,
            )
            .await
            .unwrap();

        let history = f
            .history
            .fetch_history(f.deployment_id, f.change_id, f.pathway_id, f.student_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], recorded);
        assert_eq!(history[0].element_id, interactive.id);
    }

    #[tokio::test]
    async fn record_copies_evaluation_context() {
        let f = fixture();
        let attempt = pathway_attempt(&f, 1);
        f.attempt_store.persist(&attempt).await.unwrap();

        let result = EvaluationResult {
            evaluation_id: Uuid::new_v4(),
            deployment_id: f.deployment_id,
            change_id: f.change_id,
            element_id: Uuid::new_v4(),
            element_attempt_id: Uuid::new_v4(),
            parent_element_id: f.pathway_id,
            parent_element_type: CoursewareElementType::Pathway,
            parent_element_attempt_id: attempt.id.id,
            evaluated_at: Utc::now(),
        };
        let recorded = f
            .history
            .record(f.student_id, &result, CoursewareElementType::Interactive)
            .await
            .unwrap();

        assert_eq!(recorded.evaluation_id, Some(result.evaluation_id));
        assert_eq!(recorded.element_type, CoursewareElementType::Interactive);
        assert_eq!(recorded.parent_element_attempt_id, attempt.id.id);
    }
}
