//! Progress service - computes and persists progress snapshots
//!
//! Wraps the progress store with lookup semantics (`ProgressNotFound` is a
//! recoverable signal, not a fault), identifier assignment on persist, event
//! emission, and the per-strategy aggregation rules used when a parent node
//! re-derives its completion from its children:
//!
//! - Activity: arithmetic mean over the children walked so far
//! - Linear pathway: ordinal position — sum of child fractions over the
//!   pathway roster size
//! - Free pathway: mean over visited children
//! - Mastery pathway: value = share of the roster whose confidence clears
//!   the mastery threshold; confidence = Bayesian knowledge-tracing estimate
//!   folded over the visited children, not a mean

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::{BktParams, Config};
use crate::error::ProgressError;
use crate::events::{EventBus, ProgressEvent};
use crate::model::{Completion, CoursewareElementType, PathwayType, Progress, TimeId};
use crate::store::ProgressStore;

/// Input for creating a progress snapshot; the service assigns the id
#[derive(Debug, Clone)]
pub struct CreateProgressInput {
    pub deployment_id: Uuid,
    pub change_id: Uuid,
    pub student_id: Uuid,
    pub courseware_element_id: Uuid,
    pub courseware_element_type: CoursewareElementType,
    pub attempt_id: Uuid,
    pub completion: Completion,
    pub evaluation_id: Option<Uuid>,
    pub child_completion_values: HashMap<Uuid, f64>,
    pub child_completion_confidences: HashMap<Uuid, f64>,
}

/// Progress service
pub struct ProgressService {
    store: Arc<dyn ProgressStore>,
    events: Arc<EventBus>,
    mastery_threshold: f64,
    bkt: BktParams,
}

impl ProgressService {
    pub fn new(store: Arc<dyn ProgressStore>, events: Arc<EventBus>, config: &Config) -> Self {
        Self {
            store,
            events,
            mastery_threshold: config.mastery_threshold,
            bkt: config.bkt,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Latest progress for the tuple, `ProgressNotFound` when absent
    pub async fn find_latest(
        &self,
        deployment_id: Uuid,
        element_id: Uuid,
        student_id: Uuid,
    ) -> Result<Progress, ProgressError> {
        self.store
            .find_latest(deployment_id, element_id, student_id)
            .await?
            .ok_or_else(|| ProgressError::ProgressNotFound {
                deployment_id: deployment_id.to_string(),
                element_id: element_id.to_string(),
                student_id: student_id.to_string(),
            })
    }

    /// Latest progress for a linear pathway
    pub async fn find_latest_linear_pathway(
        &self,
        deployment_id: Uuid,
        pathway_id: Uuid,
        student_id: Uuid,
    ) -> Result<Progress, ProgressError> {
        self.find_latest(deployment_id, pathway_id, student_id).await
    }

    /// Latest progress for a free pathway
    pub async fn find_latest_free_pathway(
        &self,
        deployment_id: Uuid,
        pathway_id: Uuid,
        student_id: Uuid,
    ) -> Result<Progress, ProgressError> {
        self.find_latest(deployment_id, pathway_id, student_id).await
    }

    /// Latest progress for a mastery pathway
    pub async fn find_latest_mastery_pathway(
        &self,
        deployment_id: Uuid,
        pathway_id: Uuid,
        student_id: Uuid,
    ) -> Result<Progress, ProgressError> {
        self.find_latest(deployment_id, pathway_id, student_id).await
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Assign an identifier, persist, and broadcast the change
    pub async fn persist(&self, input: CreateProgressInput) -> Result<Progress, ProgressError> {
        let progress = Progress {
            id: TimeId::new(),
            deployment_id: input.deployment_id,
            change_id: input.change_id,
            student_id: input.student_id,
            courseware_element_id: input.courseware_element_id,
            courseware_element_type: input.courseware_element_type,
            attempt_id: input.attempt_id,
            completion: input.completion,
            evaluation_id: input.evaluation_id,
            child_completion_values: input.child_completion_values,
            child_completion_confidences: input.child_completion_confidences,
        };
        self.store.persist(&progress).await?;

        debug!(
            element_id = %progress.courseware_element_id,
            student_id = %progress.student_id,
            value = progress.completion.value,
            confidence = progress.completion.confidence,
            "Persisted progress"
        );
        self.events.emit(ProgressEvent::ProgressChanged {
            deployment_id: progress.deployment_id,
            change_id: progress.change_id,
            student_id: progress.student_id,
            element_id: progress.courseware_element_id,
            element_type: progress.courseware_element_type,
            attempt_id: progress.attempt_id,
            completion: progress.completion,
            evaluation_id: progress.evaluation_id,
        });

        Ok(progress)
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Derive a parent node's completion from its children's latest
    /// completions. `roster` is the parent's full child list in structural
    /// order, from the courseware-tree collaborator; the maps hold the latest
    /// snapshot per child walked so far.
    pub fn aggregate(
        &self,
        parent_type: CoursewareElementType,
        pathway_type: Option<PathwayType>,
        roster: &[Uuid],
        child_values: &HashMap<Uuid, f64>,
        child_confidences: &HashMap<Uuid, f64>,
    ) -> Completion {
        match (parent_type, pathway_type) {
            (CoursewareElementType::Pathway, Some(PathwayType::Linear)) => {
                self.aggregate_linear(roster, child_values, child_confidences)
            }
            (CoursewareElementType::Pathway, Some(PathwayType::Mastery)) => {
                self.aggregate_mastery(roster, child_values, child_confidences)
            }
            // Free pathways and activities both average over visited children
            _ => Self::aggregate_mean(child_values, child_confidences),
        }
    }

    fn aggregate_mean(
        child_values: &HashMap<Uuid, f64>,
        child_confidences: &HashMap<Uuid, f64>,
    ) -> Completion {
        if child_values.is_empty() {
            return Completion::zero();
        }
        let value = child_values.values().sum::<f64>() / child_values.len() as f64;
        let confidence = if child_confidences.is_empty() {
            value
        } else {
            child_confidences.values().sum::<f64>() / child_confidences.len() as f64
        };
        Completion::new(value, confidence)
    }

    /// Ordinal position over the full roster: each child contributes its
    /// fraction, unvisited children contribute nothing
    fn aggregate_linear(
        &self,
        roster: &[Uuid],
        child_values: &HashMap<Uuid, f64>,
        child_confidences: &HashMap<Uuid, f64>,
    ) -> Completion {
        if roster.is_empty() {
            return Self::aggregate_mean(child_values, child_confidences);
        }
        let total = roster.len() as f64;
        let value = roster
            .iter()
            .filter_map(|id| child_values.get(id))
            .sum::<f64>()
            / total;
        let confidence = roster
            .iter()
            .filter_map(|id| child_confidences.get(id))
            .sum::<f64>()
            / total;
        Completion::new(value, confidence)
    }

    /// Mastery-threshold function over children's confidence; pathway
    /// confidence comes from the knowledge-tracing estimate
    fn aggregate_mastery(
        &self,
        roster: &[Uuid],
        child_values: &HashMap<Uuid, f64>,
        child_confidences: &HashMap<Uuid, f64>,
    ) -> Completion {
        if roster.is_empty() {
            return Completion::zero();
        }
        let mastered = roster
            .iter()
            .filter(|id| {
                child_confidences
                    .get(id)
                    .map(|c| *c >= self.mastery_threshold)
                    .unwrap_or(false)
            })
            .count();
        let value = mastered as f64 / roster.len() as f64;

        // Fold one knowledge-tracing update per visited child, in roster
        // order; a completed child counts as a correct observation
        let mut p_known = self.bkt.p_init;
        for id in roster {
            if let Some(v) = child_values.get(id) {
                p_known = bkt_update(p_known, *v >= 1.0, &self.bkt);
            }
        }
        Completion::new(value, p_known)
    }
}

/// One Bayesian knowledge tracing step: condition the mastery estimate on
/// the observation, then apply the learning transition
fn bkt_update(p_known: f64, correct: bool, params: &BktParams) -> f64 {
    let conditioned = if correct {
        let evidence = p_known * (1.0 - params.p_slip) + (1.0 - p_known) * params.p_guess;
        if evidence == 0.0 {
            p_known
        } else {
            p_known * (1.0 - params.p_slip) / evidence
        }
    } else {
        let evidence = p_known * params.p_slip + (1.0 - p_known) * (1.0 - params.p_guess);
        if evidence == 0.0 {
            p_known
        } else {
            p_known * params.p_slip / evidence
        }
    };
    (conditioned + (1.0 - conditioned) * params.p_transit).clamp(0.0, 1.0)
}
