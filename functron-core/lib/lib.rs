//! `functron` runs short-lived functions inside freshly built container images.
//!
//! # Overview
//!
//! functron accepts a Dockerfile plus a build context, builds a throwaway image, runs it once with
//! the caller's stdin and hands back what the function wrote. It handles:
//! - Safe unpacking of caller supplied tar archives
//! - One-shot build, run and cleanup of temporary images
//! - Reference counting for long lived library images
//! - Persistence and scheduling of library image builds
//!
//! # Modules
//!
//! - [`config`] - Slot configuration read at startup
//! - [`management`] - Image store, image library, build scheduler and invocation pipeline
//! - [`models`] - Image records, build plans and invocation payloads
//! - [`runtime`] - The container runtime seam and its docker implementation
//! - [`utils`] - Archive extraction and temporary name generation

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod management;
pub mod models;
pub mod runtime;
pub mod utils;

pub use error::*;
