//! Validation of mapped values against compiled JSON Schema validators

use std::collections::BTreeMap;
use std::fmt;

use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};

use super::SchemaError;

/// One constraint a value failed
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Dotted path of the offending value ("" for the whole object)
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Join issues into one human readable reason
pub fn describe(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}

/// Validators compiled once per schema: one for the whole entity, one per property
pub(crate) struct SchemaValidators {
    entity: Validator,
    fields: BTreeMap<String, Validator>,
}

impl SchemaValidators {
    /// Compile the normalized document and every property subschema
    pub(crate) fn compile(document: &Value, properties: &Map<String, Value>) -> Result<Self, SchemaError> {
        let entity = compile_node(document).map_err(SchemaError::Invalid)?;

        let mut fields = BTreeMap::new();
        for (name, schema) in properties {
            let validator =
                compile_node(schema).map_err(|e| SchemaError::Invalid(format!("property '{}': {}", name, e)))?;
            fields.insert(name.clone(), validator);
        }

        Ok(Self { entity, fields })
    }

    /// Check one property value; unknown properties pass
    pub(crate) fn check_field(&self, name: &str, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        match self.fields.get(name) {
            Some(validator) => collect(validator, value, name),
            None => Ok(()),
        }
    }

    /// Check a complete object, `required` and `anyOf` included
    pub(crate) fn check_entity(&self, object: &Value) -> Result<(), Vec<ValidationIssue>> {
        collect(&self.entity, object, "")
    }
}

impl fmt::Debug for SchemaValidators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidators")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn compile_node(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft7)
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| e.to_string())
}

fn collect(validator: &Validator, value: &Value, base: &str) -> Result<(), Vec<ValidationIssue>> {
    let issues: Vec<_> = validator
        .iter_errors(value)
        .map(|error| ValidationIssue::new(dotted_path(base, &error.instance_path.to_string()), error.to_string()))
        .collect();
    if issues.is_empty() { Ok(()) } else { Err(issues) }
}

/// Turn a JSON pointer (`/address/0/street`) into `base.address[0].street`
fn dotted_path(base: &str, pointer: &str) -> String {
    let mut path = base.to_string();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.parse::<usize>().is_ok() {
            path.push_str(&format!("[{}]", segment));
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }
    path
}
