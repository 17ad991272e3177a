//! rearag-data: offline reasoning trace construction and validation
//!
//! [`BatchBuilder`] runs the construction loop over a question set and
//! checkpoints traces to JSONL; [`validate_trace`] decides which of them are
//! kept as training data.

pub mod builder;
pub mod clean;
pub mod construct;
pub mod error;
pub mod metrics;
pub mod store;
pub mod validate;

pub use builder::{BatchBuilder, BuildConfig, BuildReport};
pub use clean::{CleanSummary, ValidityEntry, clean_traces};
pub use construct::{ConstructionConfig, ConstructionOutcome, TraceConstructor};
pub use error::{Error, Result};
pub use store::{GroundTruth, QuestionRecord, RecordId, TraceRecord};
pub use validate::{ValidationFailure, Verdict, validate_trace};
