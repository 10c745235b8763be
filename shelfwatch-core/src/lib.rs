//! shelfwatch-core: shared types for the shelfwatch feed controller
//!
//! Camera and detection records as the external services report them,
//! the reference frame detection boxes are expressed in, and the
//! controller configuration.

pub mod config;
pub mod error;
pub mod frame;
pub mod types;

pub use config::{ConfigError, ControllerConfig};
pub use error::{Error, Result};
pub use frame::{to_overlay_percent, OverlayRect, ReferenceFrame};
pub use types::{
    BoundingBox, Camera, CameraId, CameraStatus, ConnectivityStatus, Detection,
    DetectionResponse, Snapshot,
};
