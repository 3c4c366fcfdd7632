pub mod envelope;

pub use envelope::{DispatchFailure, DispatchMetadata, DispatchSuccess};
