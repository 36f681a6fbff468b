//! Domain types shared by ingestion, filtering and dispatch.

pub mod event;
pub mod filter;

pub use event::{DetectionEvent, EventLinks, ReviewAggregate, ReviewType, Severity};
