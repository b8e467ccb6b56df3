//! Progress propagation handler
//!
//! Consumes a progress-change event for a child element and walks the
//! ancestry list upward, one level at a time:
//!
//! ```text
//! Received → Resolved(attempt) → Aggregated(progress) → Persisted
//!     → Broadcast → next ancestor | terminal
//! ```
//!
//! The ancestry list arrives once, on the event, from the courseware-tree
//! collaborator (immediate parent first, root activity last); the walk is an
//! explicit loop over it, never recursive event re-entry, so termination and
//! depth are bounded by construction.
//!
//! Redelivery of the same event is safe: each level recomputes the parent's
//! completion from the latest persisted child snapshots rather than
//! accumulating in place, so replaying yields the same aggregate and the
//! chain halts on the first no-change level. An error partway up surfaces to
//! the dispatcher; progress already persisted below stands on its own and is
//! repaired by recomputation, not rollback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::attempt::AttemptService;
use crate::error::ProgressError;
use crate::model::{Attempt, Completion, CoursewareElementType, ElementRef, Progress};
use crate::progress::{CreateProgressInput, ProgressService};
use crate::tree::CoursewareTree;

/// Progression signal carried by an update event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressionSignal {
    InteractiveComplete,
    /// Compound: the interactive completed and its parent pathway completed
    /// with it. The parent pathway's attempt is taken directly from the
    /// child attempt's parent id instead of being re-resolved.
    InteractiveCompleteAndPathwayComplete,
    ActivityComplete,
    ActivityCompleteAndPathwayComplete,
    /// Produced by the restart flow; carries no evaluation
    ActivityRestarted,
}

impl ProgressionSignal {
    /// Whether the signal marks the immediate parent pathway as completing
    /// alongside the child
    pub fn is_pathway_complete(&self) -> bool {
        matches!(
            self,
            ProgressionSignal::InteractiveCompleteAndPathwayComplete
                | ProgressionSignal::ActivityCompleteAndPathwayComplete
        )
    }
}

/// Update-progress event: a child's completion changed, ancestors must
/// re-aggregate. Ancestry runs from the immediate parent up to the root and
/// must never be empty.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub deployment_id: Uuid,
    pub change_id: Uuid,
    pub student_id: Uuid,
    /// The child element whose progress changed
    pub element: ElementRef,
    /// The child's resolved attempt
    pub attempt: Attempt,
    /// The child's new completion
    pub completion: Completion,
    pub signal: ProgressionSignal,
    pub evaluation_id: Option<Uuid>,
    pub ancestry: Vec<ElementRef>,
}

/// Walks ancestry and re-aggregates progress at each level
pub struct ProgressUpdateHandler {
    attempts: Arc<AttemptService>,
    progress: Arc<ProgressService>,
    tree: Arc<dyn CoursewareTree>,
}

impl ProgressUpdateHandler {
    pub fn new(
        attempts: Arc<AttemptService>,
        progress: Arc<ProgressService>,
        tree: Arc<dyn CoursewareTree>,
    ) -> Self {
        Self {
            attempts,
            progress,
            tree,
        }
    }

    /// Handle one propagation chain, returning the progress snapshots
    /// persisted bottom-up. Stops at the root or at the first level whose
    /// aggregate did not change.
    pub async fn handle(&self, event: ProgressUpdate) -> Result<Vec<Progress>, ProgressError> {
        // Fail fast before any store I/O: an empty ancestry means the
        // courseware tree upstream is broken, not a retryable condition
        if event.ancestry.is_empty() {
            warn!(
                element_id = %event.element.id,
                student_id = %event.student_id,
                "Propagation event with empty ancestry"
            );
            return Err(ProgressError::IllegalState(
                "ancestry must not be empty for a progress update".into(),
            ));
        }

        let mut persisted = Vec::with_capacity(event.ancestry.len());
        let mut child = event.element;
        let mut child_attempt = event.attempt.clone();
        let mut child_completion = event.completion;
        // The compound signal binds to the first pathway ancestor only
        let mut compound = event.signal.is_pathway_complete();

        for parent in &event.ancestry {
            let parent_attempt = self
                .resolve_parent_attempt(&event, parent, &child_attempt, compound)
                .await?;
            compound = false;

            // Previous latest aggregate for this parent, if any. Child maps
            // carry over only within the same parent attempt; a fresh
            // attempt starts from empty aggregates.
            let previous = match self
                .progress
                .find_latest(event.deployment_id, parent.id, event.student_id)
                .await
            {
                Ok(p) => Some(p),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            let (mut values, mut confidences) = match &previous {
                Some(p) if p.attempt_id == parent_attempt.id.id => (
                    p.child_completion_values.clone(),
                    p.child_completion_confidences.clone(),
                ),
                _ => (HashMap::new(), HashMap::new()),
            };
            values.insert(child.id, child_completion.value);
            confidences.insert(child.id, child_completion.confidence);

            let roster = self.tree.children(parent.id).await?;
            let completion = self.progress.aggregate(
                parent.element_type,
                parent.pathway_type,
                &roster,
                &values,
                &confidences,
            );

            let unchanged = previous
                .as_ref()
                .map(|p| p.attempt_id == parent_attempt.id.id && p.completion == completion)
                .unwrap_or(false);

            // Persist and broadcast regardless; recomputation is idempotent
            let progress = self
                .progress
                .persist(CreateProgressInput {
                    deployment_id: event.deployment_id,
                    change_id: event.change_id,
                    student_id: event.student_id,
                    courseware_element_id: parent.id,
                    courseware_element_type: parent.element_type,
                    attempt_id: parent_attempt.id.id,
                    completion,
                    evaluation_id: event.evaluation_id,
                    child_completion_values: values,
                    child_completion_confidences: confidences,
                })
                .await?;
            persisted.push(progress);

            if unchanged {
                debug!(
                    parent_id = %parent.id,
                    student_id = %event.student_id,
                    "Aggregate unchanged, halting propagation"
                );
                break;
            }

            child = *parent;
            child_attempt = parent_attempt;
            child_completion = completion;
        }

        Ok(persisted)
    }

    /// Resolve the attempt the parent's new progress will be tagged with.
    ///
    /// Compound pathway-complete signals point at an attempt the evaluation
    /// already holds, so it is fetched by id. Otherwise the parent's latest
    /// attempt is found (or its first one minted) by element identity, with
    /// the child's parent-attempt id as parentage context for a mint.
    async fn resolve_parent_attempt(
        &self,
        event: &ProgressUpdate,
        parent: &ElementRef,
        child_attempt: &Attempt,
        compound: bool,
    ) -> Result<Attempt, ProgressError> {
        if compound && parent.element_type == CoursewareElementType::Pathway {
            let parent_attempt_id = child_attempt.parent_id.ok_or_else(|| {
                ProgressError::IllegalState(
                    "pathway-complete signal without a parent attempt id".into(),
                )
            })?;
            return self.attempts.find_by_id(parent_attempt_id).await;
        }

        self.attempts
            .find_latest_or_new(
                event.deployment_id,
                event.student_id,
                parent.element_type,
                parent.id,
                child_attempt.parent_id,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::model::{PathwayType, TimeId};
    use crate::store::{
        AttemptStore, MemoryAttemptStore, MemoryProgressStore, ProgressStore,
    };
    use crate::tree::MemoryCoursewareTree;

    struct Fixture {
        handler: ProgressUpdateHandler,
        attempt_store: Arc<MemoryAttemptStore>,
        progress_store: Arc<MemoryProgressStore>,
        tree: Arc<MemoryCoursewareTree>,
        deployment_id: Uuid,
        change_id: Uuid,
        student_id: Uuid,
    }

    fn fixture() -> Fixture {
        let attempt_store = Arc::new(MemoryAttemptStore::new());
        let progress_store = Arc::new(MemoryProgressStore::new());
        let tree = Arc::new(MemoryCoursewareTree::new());
        let events = Arc::new(EventBus::new());
        let attempts = Arc::new(AttemptService::new(attempt_store.clone(), events.clone()));
        let progress = Arc::new(ProgressService::new(
            progress_store.clone(),
            events,
            &Config::default(),
        ));
        let handler = ProgressUpdateHandler::new(
            attempts,
            progress,
            tree.clone() as Arc<dyn CoursewareTree>,
        );

        Fixture {
            handler,
            attempt_store,
            progress_store,
            tree,
            deployment_id: Uuid::new_v4(),
            change_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
        }
    }

    fn attempt(
        f: &Fixture,
        element_id: Uuid,
        element_type: CoursewareElementType,
        parent_id: Option<Uuid>,
        value: u32,
    ) -> Attempt {
        Attempt {
            id: TimeId::new(),
            deployment_id: f.deployment_id,
            student_id: f.student_id,
            courseware_element_id: element_id,
            courseware_element_type: element_type,
            parent_id,
            value,
        }
    }

    fn update(
        f: &Fixture,
        element: ElementRef,
        child_attempt: Attempt,
        completion: Completion,
        signal: ProgressionSignal,
        ancestry: Vec<ElementRef>,
    ) -> ProgressUpdate {
        ProgressUpdate {
            deployment_id: f.deployment_id,
            change_id: f.change_id,
            student_id: f.student_id,
            element,
            attempt: child_attempt,
            completion,
            signal,
            evaluation_id: Some(Uuid::new_v4()),
            ancestry,
        }
    }

    #[tokio::test]
    async fn empty_ancestry_fails_fast_without_store_io() {
        let f = fixture();
        let interactive_id = Uuid::new_v4();
        let child_attempt = attempt(
            &f,
            interactive_id,
            CoursewareElementType::Interactive,
            None,
            1,
        );

        let err = f
            .handler
            .handle(update(
                &f,
                ElementRef::interactive(interactive_id),
                child_attempt,
                Completion::completed(),
                ProgressionSignal::InteractiveComplete,
                vec![],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::IllegalState(_)));

        // No progress was persisted anywhere
        let none = f
            .progress_store
            .find_latest(f.deployment_id, interactive_id, f.student_id)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn single_ancestor_terminates_at_root() {
        let f = fixture();
        let activity_id = Uuid::new_v4();
        let interactive_id = Uuid::new_v4();
        f.tree.set_children(activity_id, vec![interactive_id]);

        let activity_attempt = attempt(&f, activity_id, CoursewareElementType::Activity, None, 1);
        f.attempt_store.persist(&activity_attempt).await.unwrap();
        let child_attempt = attempt(
            &f,
            interactive_id,
            CoursewareElementType::Interactive,
            Some(activity_attempt.id.id),
            1,
        );
        f.attempt_store.persist(&child_attempt).await.unwrap();

        let persisted = f
            .handler
            .handle(update(
                &f,
                ElementRef::interactive(interactive_id),
                child_attempt,
                Completion::completed(),
                ProgressionSignal::InteractiveComplete,
                vec![ElementRef::activity(activity_id)],
            ))
            .await
            .unwrap();

        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].courseware_element_id, activity_id);
        assert!(persisted[0].completion.is_completed());
        assert_eq!(persisted[0].attempt_id, activity_attempt.id.id);
    }

    #[tokio::test]
    async fn two_level_chain_aggregates_each_ancestor() {
        let f = fixture();
        let activity_id = Uuid::new_v4();
        let pathway_id = Uuid::new_v4();
        let first_interactive = Uuid::new_v4();
        let second_interactive = Uuid::new_v4();
        f.tree.set_children(activity_id, vec![pathway_id]);
        f.tree
            .set_children(pathway_id, vec![first_interactive, second_interactive]);

        let activity_attempt = attempt(&f, activity_id, CoursewareElementType::Activity, None, 1);
        let pathway_attempt = attempt(
            &f,
            pathway_id,
            CoursewareElementType::Pathway,
            Some(activity_attempt.id.id),
            1,
        );
        let child_attempt = attempt(
            &f,
            first_interactive,
            CoursewareElementType::Interactive,
            Some(pathway_attempt.id.id),
            1,
        );
        for a in [&activity_attempt, &pathway_attempt, &child_attempt] {
            f.attempt_store.persist(a).await.unwrap();
        }

        let ancestry = vec![
            ElementRef::pathway(pathway_id, PathwayType::Linear),
            ElementRef::activity(activity_id),
        ];
        let persisted = f
            .handler
            .handle(update(
                &f,
                ElementRef::interactive(first_interactive),
                child_attempt,
                Completion::completed(),
                ProgressionSignal::InteractiveComplete,
                ancestry,
            ))
            .await
            .unwrap();

        assert_eq!(persisted.len(), 2);
        // Linear pathway: 1 of 2 nodes done
        assert!((persisted[0].completion.value - 0.5).abs() < 1e-9);
        assert_eq!(persisted[0].courseware_element_id, pathway_id);
        // Root activity: mean over its single visited child
        assert_eq!(persisted[1].courseware_element_id, activity_id);
        assert!((persisted[1].completion.value - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn compound_signal_reads_pathway_attempt_by_id() {
        let f = fixture();
        let pathway_id = Uuid::new_v4();
        let interactive_id = Uuid::new_v4();
        f.tree.set_children(pathway_id, vec![interactive_id]);

        let pathway_attempt = attempt(&f, pathway_id, CoursewareElementType::Pathway, None, 3);
        let child_attempt = attempt(
            &f,
            interactive_id,
            CoursewareElementType::Interactive,
            Some(pathway_attempt.id.id),
            1,
        );
        f.attempt_store.persist(&pathway_attempt).await.unwrap();
        f.attempt_store.persist(&child_attempt).await.unwrap();

        // A newer pathway attempt exists, but the compound signal pins the
        // one the evaluation ran under
        let newer = attempt(&f, pathway_id, CoursewareElementType::Pathway, None, 4);
        f.attempt_store.persist(&newer).await.unwrap();

        let persisted = f
            .handler
            .handle(update(
                &f,
                ElementRef::interactive(interactive_id),
                child_attempt,
                Completion::completed(),
                ProgressionSignal::InteractiveCompleteAndPathwayComplete,
                vec![ElementRef::pathway(pathway_id, PathwayType::Free)],
            ))
            .await
            .unwrap();

        assert_eq!(persisted[0].attempt_id, pathway_attempt.id.id);
    }

    #[tokio::test]
    async fn redelivery_does_not_double_count() {
        let f = fixture();
        let activity_id = Uuid::new_v4();
        let interactive_id = Uuid::new_v4();
        let sibling_id = Uuid::new_v4();
        f.tree
            .set_children(activity_id, vec![interactive_id, sibling_id]);

        let activity_attempt = attempt(&f, activity_id, CoursewareElementType::Activity, None, 1);
        f.attempt_store.persist(&activity_attempt).await.unwrap();
        let child_attempt = attempt(
            &f,
            interactive_id,
            CoursewareElementType::Interactive,
            Some(activity_attempt.id.id),
            1,
        );
        f.attempt_store.persist(&child_attempt).await.unwrap();

        let event = update(
            &f,
            ElementRef::interactive(interactive_id),
            child_attempt,
            Completion::completed(),
            ProgressionSignal::InteractiveComplete,
            vec![ElementRef::activity(activity_id)],
        );

        let first = f.handler.handle(event.clone()).await.unwrap();
        let second = f.handler.handle(event).await.unwrap();

        // Recomputation from latest snapshots, not accumulation: the
        // aggregate is identical and the chain halts at the first level
        assert_eq!(first[0].completion, second[0].completion);
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].child_completion_values.len(),
            1,
            "child map must hold one entry per child, not per delivery"
        );
    }
}
