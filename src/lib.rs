//! Email preference / unsubscribe landing pages.
//!
//! A thin presentation layer over a notification backend: recipients land
//! here from an email link, see their current subscription state for one
//! topic or workflow, toggle it off with optional exit-interview feedback,
//! undo within a short grace window, or re-subscribe. All durable state
//! lives behind the [`gateway::Gateway`] seam; the page itself only holds a
//! per-load [`flow::Flow`] state machine.

pub mod api;
pub mod config;
pub mod feedback;
pub mod flow;
pub mod gateway;
pub mod report;
pub mod sessions;
pub mod types;
pub mod undo;
