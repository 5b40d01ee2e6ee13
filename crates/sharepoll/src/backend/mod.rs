//! Concrete [`crate::RemoteClient`] backends.

pub mod local;

pub use local::{LocalShare, LocalShareClient, LocalShareFactory};
