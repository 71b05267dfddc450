//! Handler catalog
//!
//! Maps the `classname` a manifest names to a factory building the handler.
//! Each entry is tagged with the capability it implements, which is what the
//! registry checks a declaration against at load time.

use std::collections::HashMap;
use std::sync::Arc;

use provisioner_core::domain::plugin::PluginKind;

use crate::handlers::{ExternalAutomator, ExternalProvider, ShellAutomator};
use crate::plugin::error::PluginError;
use crate::plugin::registry::RegisteredType;
use crate::plugin::runtime::{Automator, Provider};

type ProviderFactory =
    Arc<dyn Fn(&RegisteredType) -> Result<Box<dyn Provider>, PluginError> + Send + Sync>;
type AutomatorFactory =
    Arc<dyn Fn(&RegisteredType) -> Result<Box<dyn Automator>, PluginError> + Send + Sync>;

#[derive(Clone)]
enum HandlerFactory {
    Provider(ProviderFactory),
    Automator(AutomatorFactory),
}

impl HandlerFactory {
    fn kind(&self) -> PluginKind {
        match self {
            Self::Provider(_) => PluginKind::Provider,
            Self::Automator(_) => PluginKind::Automator,
        }
    }
}

/// Table of handler classes available to manifests
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerCatalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with the handlers shipped in this binary
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register_automator(ShellAutomator::CLASSNAME, |registered| {
            Ok(Box::new(ShellAutomator::new(registered)?))
        });
        catalog.register_provider(ExternalProvider::CLASSNAME, |registered| {
            Ok(Box::new(ExternalProvider::new(registered)?))
        });
        catalog.register_automator(ExternalAutomator::CLASSNAME, |registered| {
            Ok(Box::new(ExternalAutomator::new(registered)?))
        });
        catalog
    }

    pub fn register_provider<F>(&mut self, classname: impl Into<String>, factory: F)
    where
        F: Fn(&RegisteredType) -> Result<Box<dyn Provider>, PluginError> + Send + Sync + 'static,
    {
        self.factories
            .insert(classname.into(), HandlerFactory::Provider(Arc::new(factory)));
    }

    pub fn register_automator<F>(&mut self, classname: impl Into<String>, factory: F)
    where
        F: Fn(&RegisteredType) -> Result<Box<dyn Automator>, PluginError> + Send + Sync + 'static,
    {
        self.factories
            .insert(classname.into(), HandlerFactory::Automator(Arc::new(factory)));
    }

    /// Capability implemented by `classname`, if the catalog knows it
    pub fn capability(&self, classname: &str) -> Option<PluginKind> {
        self.factories.get(classname).map(HandlerFactory::kind)
    }

    /// Builds the provider handler for a registered type
    pub fn provider(&self, registered: &RegisteredType) -> Result<Box<dyn Provider>, PluginError> {
        match self.factories.get(registered.classname()) {
            Some(HandlerFactory::Provider(factory)) => factory(registered),
            _ => Err(PluginError::UnknownHandler {
                kind: PluginKind::Provider,
                classname: registered.classname().to_string(),
            }),
        }
    }

    /// Builds the automator handler for a registered type
    pub fn automator(&self, registered: &RegisteredType) -> Result<Box<dyn Automator>, PluginError> {
        match self.factories.get(registered.classname()) {
            Some(HandlerFactory::Automator(factory)) => factory(registered),
            _ => Err(PluginError::UnknownHandler {
                kind: PluginKind::Automator,
                classname: registered.classname().to_string(),
            }),
        }
    }

    /// Registered class names, sorted
    pub fn classnames(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("classnames", &self.classnames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_capabilities() {
        let catalog = HandlerCatalog::builtin();
        assert_eq!(catalog.capability("ShellAutomator"), Some(PluginKind::Automator));
        assert_eq!(catalog.capability("ExternalProvider"), Some(PluginKind::Provider));
        assert_eq!(catalog.capability("ExternalAutomator"), Some(PluginKind::Automator));
        assert_eq!(catalog.capability("ChefSoloAutomator"), None);
    }

    #[test]
    fn test_classnames_are_sorted() {
        let catalog = HandlerCatalog::builtin();
        assert_eq!(
            catalog.classnames(),
            vec!["ExternalAutomator", "ExternalProvider", "ShellAutomator"]
        );
    }
}
