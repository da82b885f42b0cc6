//! Query-string coercion
//!
//! Converts raw `name -> string` request parameters into typed arguments
//! following a function's parameter contract. Walks the contract in
//! declaration order; unknown raw parameters are ignored.

use std::collections::HashMap;

use serde_json::{Number, Value};
use thiserror::Error;

use crate::error::FuncboxError;

use super::contract::{Parameter, ParameterContract};
use super::types::ParamKind;

/// A request that does not satisfy a contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("Missing required parameter: {name}")]
    MissingRequiredParameter { name: String },

    #[error("Invalid value for parameter {name}: '{raw_value}' is not a valid {expected}")]
    InvalidParameterValue {
        name: String,
        raw_value: String,
        expected: ParamKind,
    },
}

impl From<CoercionError> for FuncboxError {
    fn from(err: CoercionError) -> Self {
        match err {
            CoercionError::MissingRequiredParameter { name } => {
                FuncboxError::MissingParameter { name }
            }
            CoercionError::InvalidParameterValue {
                name, raw_value, ..
            } => FuncboxError::InvalidParameter {
                name,
                value: raw_value,
            },
        }
    }
}

/// Typed call arguments in contract order. Omitted optional parameters are
/// absent so the function's own default applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument. Builder-style, used mainly by tests and the CLI.
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &str, value: Value) {
        self.values.push((name.to_string(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    /// Float view; integers widen.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Arguments as a JSON object, for passing to external processes.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Coerce raw request parameters against a contract.
///
/// For each declared parameter, in order:
/// 1. present: convert to the declared kind, failing with
///    `InvalidParameterValue` when the text does not parse;
/// 2. absent and required: fail with `MissingRequiredParameter`;
/// 3. absent and optional: skip.
pub fn coerce(
    contract: &ParameterContract,
    raw: &HashMap<String, String>,
) -> Result<Arguments, CoercionError> {
    let mut args = Arguments::new();

    for param in contract.params() {
        match raw.get(&param.name) {
            Some(raw_value) => {
                let value = convert(param, raw_value)?;
                args.push(&param.name, value);
            }
            None if !param.optional => {
                return Err(CoercionError::MissingRequiredParameter {
                    name: param.name.clone(),
                });
            }
            None => {}
        }
    }

    Ok(args)
}

fn convert(param: &Parameter, raw_value: &str) -> Result<Value, CoercionError> {
    let invalid = || CoercionError::InvalidParameterValue {
        name: param.name.clone(),
        raw_value: raw_value.to_string(),
        expected: param.kind,
    };

    match param.kind {
        ParamKind::String => Ok(Value::String(raw_value.to_string())),
        ParamKind::Integer => raw_value
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        ParamKind::Float => raw_value
            .trim()
            .parse::<f64>()
            .ok()
            // NaN and infinities have no JSON representation
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn add_contract() -> ParameterContract {
        ParameterContract::new(vec![
            Parameter::required("a", ParamKind::Integer),
            Parameter::required("b", ParamKind::Integer),
        ])
    }

    fn calculate_contract() -> ParameterContract {
        ParameterContract::new(vec![
            Parameter::required("num1", ParamKind::Float),
            Parameter::required("num2", ParamKind::Float),
            Parameter::optional("operation", ParamKind::String, json!("add")),
        ])
    }

    #[test]
    fn test_integer_values_become_integers() {
        let args = coerce(&add_contract(), &raw(&[("a", "3"), ("b", "-4")])).unwrap();
        assert_eq!(args.get("a"), Some(&json!(3)));
        assert_eq!(args.get_i64("b"), Some(-4));
        assert!(args.get("a").unwrap().is_i64());
    }

    #[test]
    fn test_integer_tolerates_surrounding_whitespace() {
        let args = coerce(&add_contract(), &raw(&[("a", " 7 "), ("b", "+1")])).unwrap();
        assert_eq!(args.get_i64("a"), Some(7));
        assert_eq!(args.get_i64("b"), Some(1));
    }

    #[test]
    fn test_float_values_become_floats() {
        let args = coerce(&calculate_contract(), &raw(&[("num1", "2.5"), ("num2", "4")])).unwrap();
        assert_eq!(args.get_f64("num1"), Some(2.5));
        assert_eq!(args.get_f64("num2"), Some(4.0));
        assert!(args.get("num2").unwrap().is_f64());
    }

    #[test]
    fn test_string_passes_through_unchanged() {
        let contract =
            ParameterContract::new(vec![Parameter::required("message", ParamKind::String)]);
        let args = coerce(&contract, &raw(&[("message", "  hi there ")])).unwrap();
        assert_eq!(args.get_str("message"), Some("  hi there "));
    }

    #[test]
    fn test_missing_required_names_parameter() {
        let err = coerce(&add_contract(), &raw(&[("a", "2")])).unwrap_err();
        assert_eq!(
            err,
            CoercionError::MissingRequiredParameter { name: "b".into() }
        );
    }

    #[test]
    fn test_first_missing_in_declaration_order_is_reported() {
        let err = coerce(&add_contract(), &raw(&[])).unwrap_err();
        assert_eq!(
            err,
            CoercionError::MissingRequiredParameter { name: "a".into() }
        );
    }

    #[test]
    fn test_non_numeric_integer_rejected_with_value() {
        let err = coerce(&add_contract(), &raw(&[("a", "two"), ("b", "3")])).unwrap_err();
        match err {
            CoercionError::InvalidParameterValue {
                name, raw_value, ..
            } => {
                assert_eq!(name, "a");
                assert_eq!(raw_value, "two");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decimal_for_integer_rejected() {
        assert!(coerce(&add_contract(), &raw(&[("a", "2.5"), ("b", "1")])).is_err());
    }

    #[test]
    fn test_non_finite_float_rejected() {
        for bad in ["nan", "inf", "-infinity", "abc", ""] {
            let err = coerce(&calculate_contract(), &raw(&[("num1", bad), ("num2", "1")]));
            assert!(err.is_err(), "expected {:?} to be rejected", bad);
        }
    }

    #[test]
    fn test_optional_parameters_are_omitted() {
        let args = coerce(&calculate_contract(), &raw(&[("num1", "1"), ("num2", "2")])).unwrap();
        assert_eq!(args.len(), 2);
        assert!(args.get("operation").is_none());
    }

    #[test]
    fn test_all_optional_contract_accepts_empty_query() {
        let contract = ParameterContract::new(vec![
            Parameter::optional("x", ParamKind::Integer, json!(1)),
            Parameter::optional("y", ParamKind::String, json!("y")),
        ]);
        let args = coerce(&contract, &HashMap::new()).unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn test_unknown_parameters_ignored_and_order_follows_contract() {
        let args = coerce(
            &calculate_contract(),
            &raw(&[
                ("operation", "multiply"),
                ("extra", "ignored"),
                ("num2", "3"),
                ("num1", "2"),
            ]),
        )
        .unwrap();
        let names: Vec<&str> = args.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["num1", "num2", "operation"]);
        assert!(args.get("extra").is_none());
    }

    #[test]
    fn test_conversion_into_funcbox_error() {
        let err: FuncboxError = CoercionError::InvalidParameterValue {
            name: "a".into(),
            raw_value: "x".into(),
            expected: ParamKind::Integer,
        }
        .into();
        assert!(matches!(err, FuncboxError::InvalidParameter { ref name, ref value } if name == "a" && value == "x"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_arguments_to_json() {
        let args = Arguments::new().with("a", json!(1)).with("b", json!("x"));
        assert_eq!(args.to_json(), json!({"a": 1, "b": "x"}));
    }
}
