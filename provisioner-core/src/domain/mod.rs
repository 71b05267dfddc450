//! Core domain types
//!
//! This module contains the structures exchanged between the control server,
//! the worker, and the plugins it runs. Tasks are produced by the server and
//! are read-only to the worker; results are produced fresh per execution.

pub mod command;
pub mod plugin;
pub mod result;
pub mod task;
