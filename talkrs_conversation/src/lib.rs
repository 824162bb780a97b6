#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Per-user chat sessions and the token streaming pipeline.
//!
//! A [`ChatSession`] owns one [`ConversationContext`], a set of token
//! budgets and a deadline. It answers questions either in one shot
//! ([`ChatSession::complete`]) or incrementally over a bounded channel
//! ([`ChatSession::complete_stream`]). A [`Coalescer`] drains such a channel
//! into a slow [`talkrs_core::StreamSink`], batching updates in time.

mod coalescer;
mod context;
mod deadline;
mod error;
mod invoker;
mod relay;
mod service;
mod session;

pub use coalescer::{Coalescer, DEFAULT_MIN_UPDATE_INTERVAL};
pub use context::{
    ContextOptions, ConversationContext, DEFAULT_AI_ROLE, DEFAULT_HUMAN_ROLE,
    DEFAULT_MAX_TURN_COUNT,
};
pub use deadline::DeadlineWatcher;
pub use error::ConversationError;
pub use invoker::SAMPLING_TEMPERATURE;
pub use service::ConversationService;
pub use session::{ChatSession, DEFAULT_CHANNEL_CAPACITY, DEFAULT_TIMEOUT, SessionSettings};
