//! Configuration validation against a schema block
//!
//! Runs before any network call: required attributes, deprecations and every
//! [`Validator`] attached to an attribute, recursing into nested attributes.

use crate::schema::{Diagnostic, NestedAttributes, NestingMode, SchemaBlock, Validator};
use base64::Engine;
use regex::Regex;
use serde_json::{Map, Value};

/// Validate a configuration object, returning every problem found
pub fn validate_config(block: &SchemaBlock, config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if let Some(object) = config.as_object() {
        validate_object(block, object, &mut Vec::new(), &mut diagnostics);
    }
    diagnostics
}

fn is_set(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

fn validate_object(
    block: &SchemaBlock,
    object: &Map<String, Value>,
    path: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut names: Vec<&String> = block.attributes.keys().collect();
    names.sort();

    for name in names {
        let attr = &block.attributes[name];
        path.push(name.clone());

        match object.get(name).filter(|v| !v.is_null()) {
            None if attr.required => diagnostics.push(
                Diagnostic::error("Missing required argument")
                    .with_detail(&format!(
                        "The argument {:?} is required, but no definition was found.",
                        name
                    ))
                    .with_attribute(path.clone()),
            ),
            None => {}
            Some(value) => {
                if let Some(message) = &attr.deprecation_message {
                    diagnostics.push(
                        Diagnostic::warning("Attribute Deprecated")
                            .with_detail(message)
                            .with_attribute(path.clone()),
                    );
                }
                for validator in &attr.validators {
                    if let Some(diag) = check(validator, name, value, object) {
                        diagnostics.push(diag.with_attribute(path.clone()));
                    }
                }
                if let Some(nested) = &attr.nested {
                    validate_nested(nested, value, path, diagnostics);
                }
            }
        }

        path.pop();
    }
}

fn validate_nested(
    nested: &NestedAttributes,
    value: &Value,
    path: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (nested.nesting_mode, value) {
        (NestingMode::Single, Value::Object(object)) => {
            validate_object(&nested.block, object, path, diagnostics)
        }
        (NestingMode::List | NestingMode::Set, Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if let Value::Object(object) = item {
                    path.push(index.to_string());
                    validate_object(&nested.block, object, path, diagnostics);
                    path.pop();
                }
            }
        }
        (NestingMode::Map, Value::Object(entries)) => {
            for (key, item) in entries {
                if let Value::Object(object) = item {
                    path.push(key.clone());
                    validate_object(&nested.block, object, path, diagnostics);
                    path.pop();
                }
            }
        }
        _ => diagnostics.push(
            Diagnostic::error("Incorrect attribute value type")
                .with_detail(&format!("expected {:?} nesting", nested.nesting_mode))
                .with_attribute(path.clone()),
        ),
    }
}

fn check(
    validator: &Validator,
    name: &str,
    value: &Value,
    siblings: &Map<String, Value>,
) -> Option<Diagnostic> {
    match validator {
        Validator::OneOf { values } => {
            let got = value.as_str()?;
            if values.iter().any(|v| v == got) {
                return None;
            }
            Some(
                Diagnostic::error("Invalid Attribute Value Match").with_detail(&format!(
                    "Attribute {} value must be one of: {:?}, got: {:?}",
                    name, values, got
                )),
            )
        }
        Validator::ConflictsWith { attributes } => {
            let conflict = attributes.iter().find(|a| is_set(siblings.get(*a)))?;
            Some(
                Diagnostic::error("Invalid Attribute Combination").with_detail(&format!(
                    "Attribute {:?} cannot be specified when {:?} is specified",
                    conflict, name
                )),
            )
        }
        Validator::AlsoRequires { attributes } => {
            let missing = attributes.iter().find(|a| !is_set(siblings.get(*a)))?;
            Some(
                Diagnostic::error("Invalid Attribute Combination").with_detail(&format!(
                    "Attribute {:?} must be specified when {:?} is specified",
                    missing, name
                )),
            )
        }
        Validator::Matches { pattern, message } => {
            let got = value.as_str()?;
            match Regex::new(pattern) {
                Ok(re) if re.is_match(got) => None,
                Ok(_) => Some(
                    Diagnostic::error("Invalid Attribute Value Match")
                        .with_detail(&format!("{}, got: {:?}", message, got)),
                ),
                Err(e) => Some(invalid_pattern(pattern, &e)),
            }
        }
        Validator::MapKeysMatch { pattern, message } => {
            let keys = value.as_object()?;
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => return Some(invalid_pattern(pattern, &e)),
            };
            let bad = keys.keys().find(|k| !re.is_match(k))?;
            Some(
                Diagnostic::error("Invalid Attribute Value Match")
                    .with_detail(&format!("{}, got key: {:?}", message, bad)),
            )
        }
        Validator::Between { min, max } => {
            let got = value.as_i64()?;
            if (*min..=*max).contains(&got) {
                return None;
            }
            Some(
                Diagnostic::error("Invalid Attribute Value").with_detail(&format!(
                    "Attribute {} value must be between {} and {}, got: {}",
                    name, min, max, got
                )),
            )
        }
        Validator::AtLeast { min } => {
            let got = value.as_i64()?;
            if got >= *min {
                return None;
            }
            Some(
                Diagnostic::error("Invalid Attribute Value").with_detail(&format!(
                    "Attribute {} value must be at least {}, got: {}",
                    name, min, got
                )),
            )
        }
        Validator::Base64 { max_bytes } => {
            let encoded = value.as_str()?;
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(decoded) if decoded.len() <= *max_bytes => None,
                Ok(decoded) => Some(
                    Diagnostic::error("Invalid Attribute Value").with_detail(&format!(
                        "Attribute {} must decode to at most {} bytes, got {} bytes",
                        name,
                        max_bytes,
                        decoded.len()
                    )),
                ),
                Err(e) => Some(
                    Diagnostic::error("Invalid Attribute Value")
                        .with_detail(&format!("Attribute {} must be base64 encoded: {}", name, e)),
                ),
            }
        }
    }
}

fn invalid_pattern(pattern: &str, err: &regex::Error) -> Diagnostic {
    Diagnostic::error("Invalid validator pattern").with_detail(&format!("{:?}: {}", pattern, err))
}
