//! Stored document schemas
//!
//! Decoders that turn loosely-shaped documents from the document store into
//! typed values exactly once, at the boundary. Nothing downstream re-inspects
//! the raw shape.

mod environment;
mod question;

pub use environment::{decode_environment, REQUIRED_ENVIRONMENT_FIELDS};
pub use question::{decode_question, QuestionDocumentReport};
