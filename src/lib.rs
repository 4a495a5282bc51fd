//! Real-time virtual try-on: camera frames in, body pose out, a 3D garment fitted over it.
//!
//! [`session::TryOnSession`] owns one run of the pipeline: capture ([`video`]), pose estimation
//! ([`pose`]), measurement ([`measurement`]), smoothing ([`tracking`]), placement ([`fit`]) and
//! drawing ([`render`]) of a garment loaded by [`model`].

pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod fit;
pub mod garment;
pub mod measurement;
pub mod model;
pub mod pose;
pub mod render;
pub mod session;
pub mod tracking;
pub mod video;

pub use config::{DeviceClass, TryOnConfig};
pub use error::{Result, TryOnError};
pub use garment::{ClothingCategory, GarmentRecord};
pub use session::{SessionState, SessionStatus, TryOnSession};
