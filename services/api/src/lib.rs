//! Facetalk API Library Crate
//!
//! A small service that issues signed voice-AI conversation URLs so that
//! clients never hold the voice-AI credential. The binaries are thin
//! wrappers around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
