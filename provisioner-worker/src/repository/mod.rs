//! Repository layer
//!
//! Repositories abstract communication with the control server behind
//! small traits so the poll loop and plugin registration can be tested
//! without a live server. The HTTP implementations delegate to
//! [`provisioner_client::ServerClient`].

mod plugins;
mod tasks;

// Re-export traits
pub use plugins::PluginRepository;
pub use tasks::TaskRepository;

// Re-export implementations
pub use plugins::HttpPluginRepository;
pub use tasks::HttpTaskRepository;
