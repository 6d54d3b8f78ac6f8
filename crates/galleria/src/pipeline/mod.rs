pub mod finalizer;
pub mod orchestrator;
pub mod tracker;

pub use finalizer::GalleryFinalizer;
pub use orchestrator::{
    AllowAll, ImportOrchestrator, ImportPolicy, ImportRequest, OrchestratorSettings,
    TOTALS_PROGRESS,
};
pub use tracker::{CheckOutcome, CompletionTracker, DISPATCHED_PROGRESS, MAX_RUNNING_PROGRESS};
