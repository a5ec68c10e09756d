//! HTTP route handlers

pub mod ability;
pub mod events;
pub mod forms;
pub mod refit;
pub mod review;
pub mod select;
pub mod snapshot;
pub mod topics;
