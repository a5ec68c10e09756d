//! Business logic services

pub mod bootstrap;
pub mod engine;
pub mod refit;
