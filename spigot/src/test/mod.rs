//! Crate-level integration tests, run over in-memory storage and a scripted
//! engine.

mod dispatch;
mod usage;
