//! Variant discovery through an ordered chain of client identities
//!
//! The backend is opaque and unreliable; [`ExtractionStrategyChain`] tries
//! each configured [`StrategyProfile`](crate::config::StrategyProfile) in
//! order until one yields a non-empty format list.

mod chain;
pub mod diagnostics;
pub mod testing; // Expose for tests (ScriptedBackend)
mod traits;
mod types;
mod ytdlp;

pub use chain::{
    AttemptRecord, ExtractionError, ExtractionFailureKind, ExtractionStrategyChain, Resolution,
};
pub use diagnostics::FailureClass;
pub use traits::{BackendError, ExtractionBackend};
pub use types::{FetchRequest, Variant, VariantSet};
pub use ytdlp::YtDlpBackend;
