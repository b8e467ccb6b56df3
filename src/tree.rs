//! Courseware-tree collaborator seam
//!
//! Structural parentage and child rosters are owned by an external
//! courseware-definition service. Propagation only needs the child roster of
//! a parent node to aggregate; everything else arrives on the event itself
//! (ancestry list, element references).

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::ProgressError;

/// Read access to the courseware structure
#[async_trait]
pub trait CoursewareTree: Send + Sync {
    /// Child element ids of a node, in structural order
    async fn children(&self, element_id: Uuid) -> Result<Vec<Uuid>, ProgressError>;
}

/// In-memory courseware structure for tests and embedders
#[derive(Default)]
pub struct MemoryCoursewareTree {
    children: DashMap<Uuid, Vec<Uuid>>,
}

impl MemoryCoursewareTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_children(&self, element_id: Uuid, children: Vec<Uuid>) {
        self.children.insert(element_id, children);
    }
}

#[async_trait]
impl CoursewareTree for MemoryCoursewareTree {
    async fn children(&self, element_id: Uuid) -> Result<Vec<Uuid>, ProgressError> {
        Ok(self
            .children
            .get(&element_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }
}
