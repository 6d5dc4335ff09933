//! Core type aliases and re-exports

pub use glam::{
    DMat3, DMat4, DVec2, DVec3, DVec4,
    Mat3, Mat4,
    Vec2, Vec3, Vec4,
};

/// Standard Result type for the engine
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
