//! Domain services used by session handlers.
//!
//! ARCHITECTURE
//! ============
//! Service modules own shared state and cross-session coordination so the
//! session handler can stay focused on protocol translation.

pub mod approval;
pub mod board;
