//! External tracker HTTP adapter.

pub mod client;

pub use client::{classify_response, TrackerApiClient, TrackerConfig};
