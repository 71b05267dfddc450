//! Plugin layer
//!
//! - `runtime`: the `Provider` / `Automator` contracts handlers implement
//! - `catalog`: classname to handler factory table
//! - `registry`: manifest discovery, validation and type lookup

pub mod catalog;
pub mod error;
pub mod registry;
pub mod runtime;

pub use catalog::HandlerCatalog;
pub use registry::PluginRegistry;
pub use runtime::PluginEnv;
