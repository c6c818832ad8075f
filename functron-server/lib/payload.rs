//! Request and response payload definitions for the functron server.
//!
//! This module defines the data structures for:
//! - Image store and library requests
//! - Plain message, listing and handle responses
//! - Error response bodies
//!
//! Invocation requests and responses keep their own wire format and live in
//! [`functron_core::models`]; image records and build plans are served as-is from there too.

use functron_core::models::{ImageHandle, ImageStatus};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types: Requests
//--------------------------------------------------------------------------------------------------

/// Request payload for overwriting an image's status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// The new status
    pub status: ImageStatus,
}

//--------------------------------------------------------------------------------------------------
// Types: Responses
//--------------------------------------------------------------------------------------------------

/// Response with a plain message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularMessageResponse {
    /// The message
    pub message: String,
}

/// Response listing image names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageListResponse {
    /// Image names, in store or runtime order
    pub images: Vec<String>,
}

/// Response for a newly acquired image handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResponse {
    /// The handle to release later
    pub handle: ImageHandle,

    /// The short name of the image the handle refers to
    pub image: String,

    /// How many handles are now held on the image
    pub references: u64,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error kind, e.g. `not_found`
    pub error: String,

    /// Human readable detail
    pub message: String,
}
