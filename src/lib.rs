//! Calmia - Assessment-to-recommendation pipeline for guided therapy sessions
//!
//! Calmia turns a short mental-wellness questionnaire into a personalized
//! therapy recommendation: questions are loaded and decoded, answers are
//! collected and normalized into the model's vocabulary, a remote model
//! predicts a condition and recommends a therapy, and the composed result is
//! cached locally and persisted remotely.
//!
//! ## Modules
//!
//! - **Questionnaire**: [`questions`], [`collector`], [`normalizer`]
//! - **Recommendation**: [`api`], [`fetcher`], [`cache`]
//! - **Session records**: [`responses`], [`feedback`], [`journal`]
//! - **Backends**: [`store`], [`auth`], [`clock`]

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod feedback;
pub mod fetcher;
pub mod journal;
pub mod normalizer;
pub mod pipeline;
pub mod questions;
pub mod responses;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use api::{HttpTherapyApi, TherapyApi};
pub use config::PipelineConfig;
pub use error::{PipelineError, QuestionError, StoreError};
pub use fetcher::{FetchPhase, RecommendationFetcher};
pub use journal::{HistoryEntry, HistoryKind};
pub use normalizer::Normalizer;
pub use pipeline::{AssessmentPipeline, Backends, SessionReport};

/// Number of answers the prediction model is trained on
pub const EXPECTED_QUESTION_COUNT: usize = 15;

/// Calmia version
pub const CALMIA_VERSION: &str = env!("CARGO_PKG_VERSION");
