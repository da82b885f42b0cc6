//! Plugin types for Funcbox
//!
//! This module defines the manifest structures parsed from each plugin's
//! `config.json`, the declared parameter definitions, and the runtime plugin
//! representation.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the manifest file every plugin directory must contain.
pub const MANIFEST_FILE: &str = "config.json";

/// Optional long-form description shown in listings.
pub const INTRO_FILE: &str = "intro.md";

/// Directory holding files that `filename` parameters may refer to.
pub const DATA_DIR: &str = "data";

/// The manifest loaded from a plugin's `config.json` file.
///
/// # Example
///
/// ```json
/// {
///   "description": "Add two integers",
///   "method": "GET",
///   "parameters": [
///     { "name": "a", "type": "integer" },
///     { "name": "b", "type": "integer" }
///   ],
///   "entry": { "builtin": "add" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Public URL. Defaults to `/function/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// HTTP method advertised in listings. Defaults to `GET`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Short human-readable description.
    #[serde(default)]
    pub description: String,

    /// Declared parameter contract. Required for command plugins; builtins
    /// declare their own and use this only for documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParamDef>>,

    /// What runs when the function is called. Absent means the builtin
    /// named after the plugin directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntryPoint>,

    /// Timeout for command plugins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Extra environment for command plugins.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Entry point of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    /// A function compiled into the server, looked up by name.
    Builtin(String),
    /// A command template with `{{param}}` placeholders, run without a shell.
    Command(String),
}

/// Semantic type of a declared parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "number", alias = "double")]
    Float,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
        };
        f.write_str(s)
    }
}

/// One declared parameter in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,

    /// Unannotated parameters are strings.
    #[serde(rename = "type", default)]
    pub kind: ParamKind,

    /// Explicit required flag. When absent, a parameter is required unless
    /// it has a default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamDef {
    /// Whether the caller may omit this parameter.
    pub fn is_optional(&self) -> bool {
        match self.required {
            Some(required) => !required,
            None => self.default.is_some(),
        }
    }
}

/// A loaded plugin directory.
#[derive(Debug, Clone)]
pub struct Plugin {
    /// Directory name; the unique plugin identifier.
    pub name: String,

    /// The parsed manifest.
    pub manifest: PluginManifest,

    /// The directory the plugin was loaded from.
    pub path: PathBuf,

    /// Contents of `intro.md`, if present.
    pub intro: Option<String>,

    /// SHA-256 over the manifest and the command entry file.
    pub fingerprint: String,
}

impl Plugin {
    /// Public URL of this plugin.
    pub fn url(&self) -> String {
        self.manifest
            .url
            .clone()
            .unwrap_or_else(|| route_path(&self.name))
    }

    /// Advertised HTTP method.
    pub fn method(&self) -> &str {
        self.manifest.method.as_deref().unwrap_or("GET")
    }

    /// Long description from `intro.md`, falling back to the manifest.
    pub fn description(&self) -> &str {
        match self.intro.as_deref().map(str::trim) {
            Some(intro) if !intro.is_empty() => intro,
            _ => &self.manifest.description,
        }
    }

    /// Directory that `filename` parameters resolve against.
    pub fn data_dir(&self) -> PathBuf {
        self.path.join(DATA_DIR)
    }
}

/// Route path for a plugin name.
pub fn route_path(name: &str) -> String {
    format!("/function/{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_deserialization_full() {
        let json_str = r#"{
            "url": "/function/word_count",
            "method": "GET",
            "description": "Count words",
            "parameters": [
                { "name": "text", "type": "string", "description": "Input text" },
                { "name": "limit", "type": "int", "default": 10 }
            ],
            "entry": { "command": "./count.sh {{text}} {{limit}}" },
            "timeout_secs": 5,
            "env": { "LANG": "C" }
        }"#;

        let manifest: PluginManifest = serde_json::from_str(json_str).unwrap();
        assert_eq!(manifest.description, "Count words");
        assert_eq!(
            manifest.entry,
            Some(EntryPoint::Command("./count.sh {{text}} {{limit}}".into()))
        );
        let params = manifest.parameters.unwrap();
        assert_eq!(params[0].kind, ParamKind::String);
        assert_eq!(params[1].kind, ParamKind::Integer);
        assert_eq!(params[1].default, Some(json!(10)));
        assert_eq!(manifest.timeout_secs, Some(5));
        assert_eq!(manifest.env.get("LANG").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_manifest_minimal() {
        let manifest: PluginManifest = serde_json::from_str("{}").unwrap();
        assert!(manifest.entry.is_none());
        assert!(manifest.parameters.is_none());
        assert!(manifest.description.is_empty());
    }

    #[test]
    fn test_builtin_entry() {
        let manifest: PluginManifest =
            serde_json::from_str(r#"{"entry": {"builtin": "calculate"}}"#).unwrap();
        assert_eq!(manifest.entry, Some(EntryPoint::Builtin("calculate".into())));
    }

    #[test]
    fn test_param_kind_aliases() {
        let def: ParamDef = serde_json::from_str(r#"{"name": "x", "type": "number"}"#).unwrap();
        assert_eq!(def.kind, ParamKind::Float);
        let def: ParamDef = serde_json::from_str(r#"{"name": "x", "type": "str"}"#).unwrap();
        assert_eq!(def.kind, ParamKind::String);
    }

    #[test]
    fn test_unannotated_param_is_string() {
        let def: ParamDef = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(def.kind, ParamKind::String);
        assert!(!def.is_optional());
    }

    #[test]
    fn test_unknown_param_kind_rejected() {
        let result: std::result::Result<ParamDef, _> =
            serde_json::from_str(r#"{"name": "x", "type": "datetime"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_param_optionality() {
        let with_default: ParamDef =
            serde_json::from_str(r#"{"name": "op", "default": "add"}"#).unwrap();
        assert!(with_default.is_optional());

        let explicit_optional: ParamDef =
            serde_json::from_str(r#"{"name": "op", "required": false}"#).unwrap();
        assert!(explicit_optional.is_optional());

        let forced_required: ParamDef =
            serde_json::from_str(r#"{"name": "op", "required": true, "default": 1}"#).unwrap();
        assert!(!forced_required.is_optional());
    }

    #[test]
    fn test_plugin_url_and_description_fallbacks() {
        let mut plugin = Plugin {
            name: "echo_message".into(),
            manifest: PluginManifest {
                description: "Echo".into(),
                ..Default::default()
            },
            path: PathBuf::from("/srv/apps/echo_message"),
            intro: Some("   ".into()),
            fingerprint: String::new(),
        };
        assert_eq!(plugin.url(), "/function/echo_message");
        assert_eq!(plugin.method(), "GET");
        assert_eq!(plugin.description(), "Echo");

        plugin.intro = Some("# Echo\nRepeats a message.\n".into());
        assert_eq!(plugin.description(), "# Echo\nRepeats a message.");
        assert_eq!(plugin.data_dir(), PathBuf::from("/srv/apps/echo_message/data"));
    }
}
