//! HTTP handlers for generated model routes, custom endpoints and sessions.

pub mod custom;
pub mod entity;
pub mod session;
pub use custom::*;
pub use entity::*;
pub use session::*;
