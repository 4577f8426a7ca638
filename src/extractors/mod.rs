mod access;

pub use access::{AccessLevel, Credential};
