//! lamad-progress - attempt resolution and progress propagation core
//!
//! Tracks a student's attempts and progress through a tree-shaped courseware
//! structure (Activity → Pathway → Interactive / Component) and reacts to
//! evaluation outcomes by re-aggregating progress up the tree.
//!
//! ## Architecture
//!
//! ```text
//! Evaluation outcome
//!     ↓
//! PathwayAttemptResolver (reuse attempt or mint a retry, per strategy)
//!     ↓
//! ProgressService (compute + persist the acted-on node's snapshot)
//!     ↓
//! ProgressUpdateHandler (walk ancestry: resolve → aggregate → persist →
//!     broadcast, until the root or a no-change level)
//!     ↓
//! EventBus (score roll-up, competency, grade passback subscribe here)
//! ```
//!
//! Attempt, Progress, and CompletedWalkable records are append-only,
//! timestamp-ordered logs behind narrow async store traits; durable gateways
//! implement the traits outside this crate, and the in-memory stores serve
//! tests and in-process embedders.

pub mod attempt;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod model;
pub mod progress;
pub mod propagation;
pub mod resolver;
pub mod restart;
pub mod store;
pub mod tree;

pub use attempt::AttemptService;
pub use config::{BktParams, Config};
pub use error::ProgressError;
pub use events::{EventBus, ProgressEvent};
pub use history::{CoursewareHistoryService, EvaluationResult};
pub use model::{
    Attempt, CompletedWalkable, Completion, CoursewareElementType, ElementRef, PathwayType,
    Progress, TimeId,
};
pub use progress::{CreateProgressInput, ProgressService};
pub use propagation::{ProgressUpdate, ProgressUpdateHandler, ProgressionSignal};
pub use resolver::PathwayAttemptResolver;
pub use restart::{ActivityRestart, NoopScopeGateway, RestartService, StudentScopeGateway};
pub use store::{
    AttemptStore, CompletedWalkableStore, MemoryAttemptStore, MemoryCompletedWalkableStore,
    MemoryProgressStore, ProgressStore,
};
pub use tree::{CoursewareTree, MemoryCoursewareTree};

use std::sync::Arc;

/// Store handles the service container wires together
pub struct Stores {
    pub attempts: Arc<dyn AttemptStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub walkables: Arc<dyn CompletedWalkableStore>,
    pub tree: Arc<dyn CoursewareTree>,
    pub scopes: Arc<dyn StudentScopeGateway>,
}

impl Stores {
    /// All-in-memory stores, for tests and in-process embedders
    pub fn in_memory() -> Self {
        Self {
            attempts: Arc::new(MemoryAttemptStore::new()),
            progress: Arc::new(MemoryProgressStore::new()),
            walkables: Arc::new(MemoryCompletedWalkableStore::new()),
            tree: Arc::new(MemoryCoursewareTree::new()),
            scopes: Arc::new(NoopScopeGateway::new()),
        }
    }
}

/// Service container for dependency injection
///
/// Holds all services over shared stores and a shared event bus.
pub struct Services {
    pub attempts: Arc<AttemptService>,
    pub resolver: Arc<PathwayAttemptResolver>,
    pub progress: Arc<ProgressService>,
    pub propagation: Arc<ProgressUpdateHandler>,
    pub history: Arc<CoursewareHistoryService>,
    pub restart: Arc<RestartService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services over the given stores
    pub fn new(stores: Stores, config: &Config) -> Self {
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));

        let attempts = Arc::new(AttemptService::new(stores.attempts, events.clone()));
        let resolver = Arc::new(PathwayAttemptResolver::new(
            attempts.clone(),
            stores.progress.clone(),
        ));
        let progress = Arc::new(ProgressService::new(
            stores.progress,
            events.clone(),
            config,
        ));
        let propagation = Arc::new(ProgressUpdateHandler::new(
            attempts.clone(),
            progress.clone(),
            stores.tree,
        ));
        let history = Arc::new(CoursewareHistoryService::new(
            stores.walkables,
            attempts.clone(),
            events.clone(),
        ));
        let restart = Arc::new(RestartService::new(
            attempts.clone(),
            progress.clone(),
            propagation.clone(),
            stores.scopes,
            events.clone(),
        ));

        Self {
            attempts,
            resolver,
            progress,
            propagation,
            history,
            restart,
            events,
        }
    }
}
