//! Activity restart flow
//!
//! Gives a student a fresh try at an activity: mints the next attempt
//! ordinal, resets descendant student-scope state through the scope gateway,
//! persists a zeroed progress snapshot (no evaluation behind it), and pushes
//! the reset upward through the parent pathway when one exists.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::attempt::AttemptService;
use crate::error::ProgressError;
use crate::events::{EventBus, ProgressEvent};
use crate::model::{Attempt, Completion, CoursewareElementType, ElementRef, Progress};
use crate::progress::{CreateProgressInput, ProgressService};
use crate::propagation::{ProgressUpdate, ProgressUpdateHandler, ProgressionSignal};

/// Student-scope state gateway. Descendant scope data (component states,
/// saved inputs) lives outside this crate; restart only asks for it to be
/// cleared.
#[async_trait]
pub trait StudentScopeGateway: Send + Sync {
    async fn reset_scopes(
        &self,
        deployment_id: Uuid,
        root_element_id: Uuid,
        student_id: Uuid,
    ) -> Result<(), ProgressError>;
}

/// Scope gateway that records reset calls; for tests and embedders with no
/// scope storage
#[derive(Default)]
pub struct NoopScopeGateway {
    calls: std::sync::Mutex<Vec<(Uuid, Uuid, Uuid)>>,
}

impl NoopScopeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StudentScopeGateway for NoopScopeGateway {
    async fn reset_scopes(
        &self,
        deployment_id: Uuid,
        root_element_id: Uuid,
        student_id: Uuid,
    ) -> Result<(), ProgressError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((deployment_id, root_element_id, student_id));
        }
        Ok(())
    }
}

/// Outcome of a restart: the fresh attempt, its zeroed progress, and
/// whatever ancestor snapshots the upward propagation produced
#[derive(Debug, Clone)]
pub struct ActivityRestart {
    pub attempt: Attempt,
    pub progress: Progress,
    pub propagated: Vec<Progress>,
}

/// Restart service
pub struct RestartService {
    attempts: Arc<AttemptService>,
    progress: Arc<ProgressService>,
    handler: Arc<ProgressUpdateHandler>,
    scopes: Arc<dyn StudentScopeGateway>,
    events: Arc<EventBus>,
}

impl RestartService {
    pub fn new(
        attempts: Arc<AttemptService>,
        progress: Arc<ProgressService>,
        handler: Arc<ProgressUpdateHandler>,
        scopes: Arc<dyn StudentScopeGateway>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            attempts,
            progress,
            handler,
            scopes,
            events,
        }
    }

    /// Restart an activity for a student. `ancestry` is the activity's
    /// parents up to the root, empty when the activity is itself the root.
    pub async fn restart_activity(
        &self,
        deployment_id: Uuid,
        change_id: Uuid,
        activity_id: Uuid,
        student_id: Uuid,
        ancestry: &[ElementRef],
    ) -> Result<ActivityRestart, ProgressError> {
        // First contact restarts to ordinal 1; otherwise prior ordinal + 1
        // under the prior attempt's parent
        let (value, parent_id) = match self
            .attempts
            .find_latest_attempt(deployment_id, activity_id, student_id)
            .await
        {
            Ok(prior) => (prior.value + 1, prior.parent_id),
            Err(e) if e.is_not_found() => (1, None),
            Err(e) => return Err(e),
        };

        let attempt = self
            .attempts
            .new_attempt_with_value(
                deployment_id,
                student_id,
                CoursewareElementType::Activity,
                activity_id,
                parent_id,
                value,
            )
            .await?;

        self.scopes
            .reset_scopes(deployment_id, activity_id, student_id)
            .await?;
        debug!(activity_id = %activity_id, student_id = %student_id, "Reset descendant student scopes");

        let progress = self
            .progress
            .persist(CreateProgressInput {
                deployment_id,
                change_id,
                student_id,
                courseware_element_id: activity_id,
                courseware_element_type: CoursewareElementType::Activity,
                attempt_id: attempt.id.id,
                completion: Completion::zero(),
                evaluation_id: None,
                child_completion_values: Default::default(),
                child_completion_confidences: Default::default(),
            })
            .await?;

        let propagated = if ancestry.is_empty() {
            Vec::new()
        } else {
            self.handler
                .handle(ProgressUpdate {
                    deployment_id,
                    change_id,
                    student_id,
                    element: ElementRef::activity(activity_id),
                    attempt: attempt.clone(),
                    completion: progress.completion,
                    signal: ProgressionSignal::ActivityRestarted,
                    evaluation_id: None,
                    ancestry: ancestry.to_vec(),
                })
                .await?
        };

        info!(
            activity_id = %activity_id,
            student_id = %student_id,
            value = attempt.value,
            "Restarted activity"
        );
        self.events.emit(ProgressEvent::ActivityRestarted {
            deployment_id,
            student_id,
            activity_id,
            attempt_id: attempt.id.id,
            value: attempt.value,
        });

        Ok(ActivityRestart {
            attempt,
            progress,
            propagated,
        })
    }
}
