//! Configuration types and helpers.

mod functron;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use functron::*;
