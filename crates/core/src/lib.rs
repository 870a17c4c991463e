//! Core of the mock-interview coach: question generation, the turn-taking
//! session controller, feedback and scoring, and persistence of finished
//! interviews.

pub mod model;
pub mod oracle;
pub mod prompts;
pub mod questions;
pub mod report;
pub mod resume;
pub mod session;
pub mod speech;
pub mod store;
