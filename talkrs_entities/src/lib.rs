//! Database entities.

pub mod conversation_contexts;
