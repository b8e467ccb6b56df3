//! Domain model for courseware attempts and progress
//!
//! Courseware elements form a tree (Activity → Pathway → Interactive /
//! Component). Structural parentage is owned by an external courseware-tree
//! collaborator; this crate only receives element references and ancestry
//! lists. Attempts and progress snapshots are append-only: "latest" always
//! means greatest creation time, with the opaque id as tiebreak.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-ordered identifier: an explicit (creation time, opaque id) pair.
///
/// Total order: creation time first, uuid bytes as tiebreak. Two ids created
/// in the same instant still order deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeId {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl TimeId {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        }
    }
}

impl Default for TimeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Ord for TimeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.as_bytes().cmp(other.id.as_bytes()))
    }
}

impl PartialOrd for TimeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Type of a courseware element in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoursewareElementType {
    Activity,
    Pathway,
    Interactive,
    Component,
}

/// Traversal strategy of a pathway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathwayType {
    Linear,
    Free,
    /// Adaptive pathway whose confidence derives from Bayesian knowledge
    /// tracing rather than a simple mean.
    Mastery,
}

/// Reference to a courseware element, as supplied by the courseware-tree
/// collaborator. `pathway_type` is populated only for pathway elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub id: Uuid,
    pub element_type: CoursewareElementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathway_type: Option<PathwayType>,
}

impl ElementRef {
    pub fn activity(id: Uuid) -> Self {
        Self {
            id,
            element_type: CoursewareElementType::Activity,
            pathway_type: None,
        }
    }

    pub fn pathway(id: Uuid, pathway_type: PathwayType) -> Self {
        Self {
            id,
            element_type: CoursewareElementType::Pathway,
            pathway_type: Some(pathway_type),
        }
    }

    pub fn interactive(id: Uuid) -> Self {
        Self {
            id,
            element_type: CoursewareElementType::Interactive,
            pathway_type: None,
        }
    }
}

/// Completion state: value and confidence, both clamped to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub value: f64,
    pub confidence: f64,
}

impl Completion {
    pub fn new(value: f64, confidence: f64) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn zero() -> Self {
        Self {
            value: 0.0,
            confidence: 0.0,
        }
    }

    pub fn completed() -> Self {
        Self {
            value: 1.0,
            confidence: 1.0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.value >= 1.0
    }
}

/// One numbered try at a courseware element by a student.
///
/// Immutable once created, never deleted. For a given (deployment, element,
/// student) tuple, attempts form a strictly increasing ordinal sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: TimeId,
    pub deployment_id: Uuid,
    pub student_id: Uuid,
    pub courseware_element_id: Uuid,
    pub courseware_element_type: CoursewareElementType,
    /// Attempt id of the structural parent, or None at the root activity
    pub parent_id: Option<Uuid>,
    /// Positive ordinal, starts at 1
    pub value: u32,
}

/// Snapshot of completion state for one element, one student, one attempt.
///
/// Append-only; the durable outcome of a leaf evaluation or an ancestor
/// re-aggregation. `evaluation_id` is None when produced by a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub id: TimeId,
    pub deployment_id: Uuid,
    /// Version of the courseware definition this snapshot was taken against
    pub change_id: Uuid,
    pub student_id: Uuid,
    pub courseware_element_id: Uuid,
    pub courseware_element_type: CoursewareElementType,
    pub attempt_id: Uuid,
    pub completion: Completion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<Uuid>,
    /// Latest completion value per child, for aggregate nodes
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub child_completion_values: HashMap<Uuid, f64>,
    /// Latest completion confidence per child, for aggregate nodes
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub child_completion_confidences: HashMap<Uuid, f64>,
}

/// Append-only audit fact that a student completed a walkable under a
/// specific parent/attempt context. Read back to resume a student's path
/// through a free pathway; never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWalkable {
    pub deployment_id: Uuid,
    pub change_id: Uuid,
    pub student_id: Uuid,
    pub parent_element_id: Uuid,
    pub parent_element_type: CoursewareElementType,
    pub parent_element_attempt_id: Uuid,
    pub element_id: Uuid,
    pub element_type: CoursewareElementType,
    pub element_attempt_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<Uuid>,
    pub evaluated_at: DateTime<Utc>,
}
