//! Parameter contracts
//!
//! A contract is the ordered list of parameters a function accepts. Command
//! plugins declare it in `config.json`; builtins declare it in code. Either
//! way it is data, so nothing here inspects a callable at runtime.

use serde::Serialize;
use serde_json::Value;

use super::function::Function;
use super::types::{ParamDef, ParamKind};

/// Parameter name that marks a function as reading a plugin data file.
pub const FILENAME_PARAM: &str = "filename";

/// One parameter of a contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    /// Whether the caller may omit it.
    pub optional: bool,
    /// The value applied when omitted, if the function declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    pub fn required(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, default: Value) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: true,
            default: Some(default),
            description: None,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

impl From<&ParamDef> for Parameter {
    fn from(def: &ParamDef) -> Self {
        Self {
            name: def.name.clone(),
            kind: def.kind,
            optional: def.is_optional(),
            default: def.default.clone(),
            description: def.description.clone(),
        }
    }
}

/// Ordered parameter list of a function.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterContract {
    params: Vec<Parameter>,
}

impl ParameterContract {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self { params }
    }

    /// Contract built from manifest parameter definitions, in order.
    pub fn from_defs(defs: &[ParamDef]) -> Self {
        Self::new(defs.iter().map(Parameter::from).collect())
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Names of the parameters a caller must supply.
    pub fn required_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| !p.optional)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Whether the function takes a `filename` parameter.
    pub fn takes_filename(&self) -> bool {
        self.get(FILENAME_PARAM).is_some()
    }
}

/// Produce the parameter contract of a loaded function.
///
/// Computed on every call so that a reloaded plugin is never described by a
/// stale contract.
pub fn introspect(function: &dyn Function) -> ParameterContract {
    function.contract()
}
