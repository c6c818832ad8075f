//! Management of functron images and invocations.
//!
//! This module handles:
//! - Persistence of image records in a SQLite store
//! - Reference counting of built library images
//! - The build scheduler that drives stored images through their lifecycle
//! - The one-shot invocation pipeline
//!
//! The module provides:
//! - [`ImageStore`] for image records and build plans
//! - [`ImageLibrary`] for handles on built images
//! - [`BuildScheduler`] for turning build plans into built and cleaned up images
//! - [`Invoker`] for running a function once in a temporary image

pub mod db;
mod invocation;
mod library;
mod scheduler;
mod store;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use invocation::*;
pub use library::*;
pub use scheduler::*;
pub use store::*;
