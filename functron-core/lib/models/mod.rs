//! Data types shared by the store, the library, the scheduler and the invocation pipeline.

mod build_plan;
mod image;
mod invocation;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use build_plan::*;
pub use image::*;
pub use invocation::*;
