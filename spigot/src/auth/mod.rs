//! Request authentication: secret extraction and credential resolution.

pub mod token;

pub use token::{TokenCandidate, extract_candidate, is_secret_shaped, resolve_credential};
