//! Data Transfer Objects for worker/server communication
//!
//! Request bodies the worker sends that are not themselves domain entities.

pub mod task;
