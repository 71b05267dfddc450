//! Plugin manifest types
//!
//! A plugin ships one JSON manifest naming the plugin, the provider and
//! automator type names it implements, and for each declared type a
//! same-named definition block that must carry a `classname`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The two capability sets a plugin type can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Provider,
    Automator,
}

impl PluginKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Automator => "automator",
        }
    }

    /// Name of the type collection, as used in manifests and server URLs
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Provider => "providertypes",
            Self::Automator => "automatortypes",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manifest validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("missing 'name' field")]
    MissingName,

    #[error("declared {kind} type \"{type_name}\" is not defined")]
    UndefinedType { kind: PluginKind, type_name: String },

    #[error("{kind} type \"{type_name}\" does not define an implementor classname")]
    MissingClassname { kind: PluginKind, type_name: String },

    #[error("invalid {kind} type name \"{type_name}\"")]
    InvalidTypeName { kind: PluginKind, type_name: String },

    #[error("{kind} type \"{type_name}\" is declared more than once")]
    DuplicateDeclaration { kind: PluginKind, type_name: String },

    #[error("invalid definition for {kind} type \"{type_name}\": {message}")]
    InvalidDefinition {
        kind: PluginKind,
        type_name: String,
        message: String,
    },
}

/// Raw plugin manifest as found on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub providertypes: Vec<String>,
    #[serde(default)]
    pub automatortypes: Vec<String>,
    /// Type definition blocks keyed by type name, plus any other keys
    #[serde(flatten)]
    pub definitions: Map<String, Value>,
}

impl PluginManifest {
    /// Parses a manifest document
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn declared(&self, kind: PluginKind) -> &[String] {
        match kind {
            PluginKind::Provider => &self.providertypes,
            PluginKind::Automator => &self.automatortypes,
        }
    }

    /// Validates the manifest and returns its name with every declared type
    /// paired with its definition, providers first.
    pub fn validate(&self) -> Result<ValidatedManifest, ManifestError> {
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or(ManifestError::MissingName)?
            .to_string();

        let mut types: Vec<(PluginKind, String, TypeDefinition)> = Vec::new();
        for kind in [PluginKind::Provider, PluginKind::Automator] {
            for type_name in self.declared(kind) {
                if !is_valid_type_name(type_name) {
                    return Err(ManifestError::InvalidTypeName {
                        kind,
                        type_name: type_name.clone(),
                    });
                }
                if types.iter().any(|(k, n, _)| *k == kind && n == type_name) {
                    return Err(ManifestError::DuplicateDeclaration {
                        kind,
                        type_name: type_name.clone(),
                    });
                }
                let definition = self.definition(kind, type_name)?;
                types.push((kind, type_name.clone(), definition));
            }
        }

        Ok(ValidatedManifest { name, types })
    }

    fn definition(&self, kind: PluginKind, type_name: &str) -> Result<TypeDefinition, ManifestError> {
        let block = self
            .definitions
            .get(type_name)
            .ok_or_else(|| ManifestError::UndefinedType {
                kind,
                type_name: type_name.to_string(),
            })?;

        let Some(object) = block.as_object() else {
            return Err(ManifestError::InvalidDefinition {
                kind,
                type_name: type_name.to_string(),
                message: "definition must be an object".to_string(),
            });
        };
        if !object.get("classname").is_some_and(Value::is_string) {
            return Err(ManifestError::MissingClassname {
                kind,
                type_name: type_name.to_string(),
            });
        }

        serde_json::from_value(block.clone()).map_err(|e| ManifestError::InvalidDefinition {
            kind,
            type_name: type_name.to_string(),
            message: e.to_string(),
        })
    }
}

/// A manifest that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedManifest {
    pub name: String,
    pub types: Vec<(PluginKind, String, TypeDefinition)>,
}

/// Definition block for one provider or automator type
///
/// Only `classname` is interpreted by the registry; everything else is
/// handler-specific and is forwarded verbatim when the type is registered
/// with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub classname: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TypeDefinition {
    pub fn new(classname: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Type names become path components of working directories and URLs.
fn is_valid_type_name(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(doc: Value) -> PluginManifest {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_validate_pairs_types_with_definitions() {
        let m = manifest(json!({
            "name": "shell",
            "providertypes": ["static"],
            "automatortypes": ["shell"],
            "static": { "classname": "ExternalProvider", "executable": "bin/static" },
            "shell": { "classname": "ShellAutomator", "parameters": { "ui": {} } }
        }));

        let validated = m.validate().unwrap();
        assert_eq!(validated.name, "shell");
        assert_eq!(validated.types.len(), 2);

        let (kind, name, def) = &validated.types[0];
        assert_eq!(*kind, PluginKind::Provider);
        assert_eq!(name, "static");
        assert_eq!(def.classname, "ExternalProvider");
        assert_eq!(def.field("executable"), Some(&json!("bin/static")));

        let (kind, _, def) = &validated.types[1];
        assert_eq!(*kind, PluginKind::Automator);
        assert_eq!(def.classname, "ShellAutomator");
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let m = manifest(json!({ "automatortypes": [] }));
        assert_eq!(m.validate(), Err(ManifestError::MissingName));
    }

    #[test]
    fn test_undeclared_definition_is_rejected() {
        let m = manifest(json!({ "name": "p", "providertypes": ["aws"] }));
        assert!(matches!(
            m.validate(),
            Err(ManifestError::UndefinedType { kind: PluginKind::Provider, .. })
        ));
    }

    #[test]
    fn test_missing_classname_is_rejected() {
        let m = manifest(json!({
            "name": "p",
            "automatortypes": ["chef"],
            "chef": { "parameters": {} }
        }));
        let err = m.validate().unwrap_err();
        assert!(matches!(err, ManifestError::MissingClassname { .. }));
        assert!(err.to_string().contains("classname"));
    }

    #[test]
    fn test_path_like_type_names_are_rejected() {
        let m = manifest(json!({
            "name": "p",
            "providertypes": ["../etc"],
            "../etc": { "classname": "ExternalProvider" }
        }));
        assert!(matches!(m.validate(), Err(ManifestError::InvalidTypeName { .. })));
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(PluginKind::Provider.collection(), "providertypes");
        assert_eq!(PluginKind::Automator.collection(), "automatortypes");
    }
}
