//! Provisioner Core
//!
//! Core types shared by the provisioning worker and its server client.
//!
//! This crate contains:
//! - Domain types: tasks, task results, plugin manifests, command failures
//! - DTOs: request bodies exchanged with the control server
//! - The deep-merge helper used to combine nested result documents

pub mod domain;
pub mod dto;
pub mod merge;
