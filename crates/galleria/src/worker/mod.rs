//! Conversion of dispatched work units into gallery artifacts.

pub mod convert;
pub mod endpoint;
pub mod unit;

pub use convert::{ConversionWorker, UnitOutcome};
pub use endpoint::TaskEndpoint;
pub use unit::{derive_artifact_id, StagedAttachment, SubmissionWorkUnit};
