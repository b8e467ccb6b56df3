//! Attempt service - creates and retrieves attempts
//!
//! Wraps the attempt store with input validation, ordinal assignment, and
//! event emission. Attempts are append-only; the service never mutates an
//! existing record.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProgressError;
use crate::events::{EventBus, ProgressEvent};
use crate::model::{Attempt, CoursewareElementType, TimeId};
use crate::store::AttemptStore;

/// Attempt service
pub struct AttemptService {
    store: Arc<dyn AttemptStore>,
    events: Arc<EventBus>,
    /// Serializes the read-ordinal/write-attempt window so two
    /// near-simultaneous evaluations for the same tuple cannot mint
    /// duplicate ordinals.
    mint_lock: Mutex<()>,
}

impl AttemptService {
    /// Create a new attempt service
    pub fn new(store: Arc<dyn AttemptStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            mint_lock: Mutex::new(()),
        }
    }

    /// Most recent attempt for the tuple, `AttemptNotFound` when none exists
    pub async fn find_latest_attempt(
        &self,
        deployment_id: Uuid,
        element_id: Uuid,
        student_id: Uuid,
    ) -> Result<Attempt, ProgressError> {
        validate_ids(&[
            ("deploymentId", deployment_id),
            ("elementId", element_id),
            ("studentId", student_id),
        ])?;

        self.store
            .find_latest(deployment_id, element_id, student_id)
            .await?
            .ok_or_else(|| ProgressError::AttemptNotFound {
                deployment_id: deployment_id.to_string(),
                element_id: element_id.to_string(),
                student_id: student_id.to_string(),
            })
    }

    /// Attempt by id, `AttemptNotFoundById` when absent
    pub async fn find_by_id(&self, id: Uuid) -> Result<Attempt, ProgressError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ProgressError::AttemptNotFoundById(id.to_string()))
    }

    /// Create and persist a first attempt (ordinal 1) at an element
    pub async fn new_attempt(
        &self,
        deployment_id: Uuid,
        student_id: Uuid,
        element_type: CoursewareElementType,
        element_id: Uuid,
        parent_attempt_id: Option<Uuid>,
    ) -> Result<Attempt, ProgressError> {
        self.new_attempt_with_value(
            deployment_id,
            student_id,
            element_type,
            element_id,
            parent_attempt_id,
            1,
        )
        .await
    }

    /// Create and persist a new attempt with an explicit ordinal.
    ///
    /// The mint lock covers the latest-ordinal read and the write: if a
    /// concurrent mint already claimed `value`, the ordinal advances past the
    /// stored latest instead of duplicating it.
    pub async fn new_attempt_with_value(
        &self,
        deployment_id: Uuid,
        student_id: Uuid,
        element_type: CoursewareElementType,
        element_id: Uuid,
        parent_attempt_id: Option<Uuid>,
        value: u32,
    ) -> Result<Attempt, ProgressError> {
        validate_ids(&[
            ("deploymentId", deployment_id),
            ("elementId", element_id),
            ("studentId", student_id),
        ])?;
        if value == 0 {
            return Err(ProgressError::InvalidInput(
                "attempt value must be a positive ordinal".into(),
            ));
        }

        let _guard = self.mint_lock.lock().await;

        let latest = self
            .store
            .find_latest(deployment_id, element_id, student_id)
            .await?;
        let value = match latest {
            Some(ref a) if a.value >= value => a.value + 1,
            _ => value,
        };

        let attempt = Attempt {
            id: TimeId::new(),
            deployment_id,
            student_id,
            courseware_element_id: element_id,
            courseware_element_type: element_type,
            parent_id: parent_attempt_id,
            value,
        };
        self.store.persist(&attempt).await?;

        debug!(
            element_id = %element_id,
            student_id = %student_id,
            value,
            "Minted new attempt"
        );
        self.events.emit(ProgressEvent::AttemptCreated {
            deployment_id,
            student_id,
            element_id,
            element_type,
            attempt_id: attempt.id.id,
            value,
        });

        Ok(attempt)
    }

    /// Latest attempt for the tuple, minting the first one when none exists
    pub async fn find_latest_or_new(
        &self,
        deployment_id: Uuid,
        student_id: Uuid,
        element_type: CoursewareElementType,
        element_id: Uuid,
        parent_attempt_id: Option<Uuid>,
    ) -> Result<Attempt, ProgressError> {
        match self
            .find_latest_attempt(deployment_id, element_id, student_id)
            .await
        {
            Ok(attempt) => Ok(attempt),
            Err(e) if e.is_not_found() => {
                self.new_attempt(
                    deployment_id,
                    student_id,
                    element_type,
                    element_id,
                    parent_attempt_id,
                )
                .await
            }
            Err(e) => Err(e),
        }
    }
}

fn validate_ids(ids: &[(&str, Uuid)]) -> Result<(), ProgressError> {
    for (name, id) in ids {
        if id.is_nil() {
            return Err(ProgressError::InvalidInput(format!(
                "{} is required",
                name
            )));
        }
    }
    Ok(())
}
