//! Utility functions and types.

pub mod archive;
pub mod names;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use archive::*;
pub use names::*;
