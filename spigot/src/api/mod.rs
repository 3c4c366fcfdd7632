//! HTTP surface: request/response models and handlers.

pub mod handlers;
pub mod models;
