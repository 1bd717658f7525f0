//! Field map + normalized schema to per-field extractors

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use super::expr::{FieldMap, SourceExpression};
use super::extract::{ConcatToken, Extractor};
use super::sanitize::strip_unsafe;
use crate::schema::{NormalizedSchema, PropertySchema, SchemaType};

/// Destination names whose `oneOf` schema describes a GeoJSON geometry
const GEOMETRY_FIELDS: &[&str] = &["location", "geometry"];

/// A map key the compiler could not turn into an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedKey {
    pub name: String,
    pub reason: String,
}

/// The compiled entity-name source
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySource {
    pub extractor: Extractor,

    /// Every token was a literal: the value is a prefix, completed by the row ordinal
    pub is_id_prefix: bool,
}

/// Extractors for every mappable destination field
#[derive(Debug, Clone, Default)]
pub struct CompiledMap {
    pub fields: BTreeMap<String, Extractor>,
    pub identity: Option<IdentitySource>,
    pub dropped: Vec<DroppedKey>,
}

/// What a destination property expects, as far as extraction is concerned
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Geometry(&'a PropertySchema),
    Object(&'a PropertySchema),
    Array,
    Number,
    Boolean,
    DateTime,
    Text,
    Any,
}

impl<'a> Target<'a> {
    fn of(name: &str, schema: &'a PropertySchema) -> Self {
        if GEOMETRY_FIELDS.contains(&name) && !schema.one_of.is_empty() {
            return Target::Geometry(schema);
        }
        match schema.primary_type() {
            Some(SchemaType::Object) => Target::Object(schema),
            Some(SchemaType::Array) => Target::Array,
            Some(SchemaType::Number | SchemaType::Integer) => Target::Number,
            Some(SchemaType::Boolean) => Target::Boolean,
            Some(SchemaType::String) if schema.is_date_time() => Target::DateTime,
            Some(SchemaType::String) => Target::Text,
            Some(SchemaType::Null) | None => Target::Any,
        }
    }
}

/// Compile a field map against a normalized schema
///
/// Keys that cannot be compiled are dropped and reported, never fatal.
pub fn compile(map: &FieldMap, schema: &NormalizedSchema) -> CompiledMap {
    debug!(fields = map.fields.len(), entity_type = %schema.entity_type(), "compile: called");
    let mut compiled = CompiledMap::default();

    for (name, reason) in &map.unparsable {
        compiled.dropped.push(DroppedKey {
            name: name.clone(),
            reason: reason.clone(),
        });
    }

    for (name, expr) in &map.fields {
        let Some(property) = schema.property(name) else {
            debug!(%name, "compile: key not in schema");
            compiled.dropped.push(DroppedKey {
                name: name.clone(),
                reason: format!("'{}' is not a property of {}", name, schema.entity_type()),
            });
            continue;
        };
        match compile_field(name, expr, property) {
            Ok(extractor) => {
                compiled.fields.insert(name.clone(), extractor);
            }
            Err(reason) => {
                debug!(%name, %reason, "compile: dropping key");
                compiled.dropped.push(DroppedKey {
                    name: name.clone(),
                    reason,
                });
            }
        }
    }

    if let Some(expr) = &map.identity {
        match compile_identity(expr) {
            Ok(identity) => compiled.identity = identity,
            Err(reason) => compiled.dropped.push(DroppedKey {
                name: "<identity>".to_string(),
                reason,
            }),
        }
    }

    info!(
        compiled = compiled.fields.len(),
        dropped = compiled.dropped.len(),
        identity = compiled.identity.is_some(),
        "Field map compiled"
    );
    compiled
}

/// Pick the extractor for one (schema type, source expression) pair
fn compile_field(name: &str, expr: &SourceExpression, property: &PropertySchema) -> Result<Extractor, String> {
    use SourceExpression as S;

    let target = Target::of(name, property);
    let expr = match target {
        Target::Number | Target::Text | Target::DateTime | Target::Boolean => expr.clone().into_scalar(),
        _ => expr.clone(),
    };

    match (target, expr) {
        (Target::Geometry(schema), S::GeometryPair { geometry_type, lat, lon }) => {
            let variants = schema.variant_type_names();
            if variants.iter().any(|v| *v == geometry_type) {
                Ok(Extractor::Geometry { geometry_type, lat, lon })
            } else {
                Err(format!(
                    "geometry type '{}' is not one of [{}]",
                    geometry_type,
                    variants.join(", ")
                ))
            }
        }
        (Target::Geometry(_), S::FieldPath(path)) if GEOMETRY_FIELDS.contains(&path.as_str()) => {
            Ok(Extractor::Lookup(path))
        }
        (Target::Geometry(_), other) => Err(format!("unsupported geometry source ({})", other.kind())),

        (Target::Object(schema), S::Object(fields)) => compile_object(fields, schema),
        (Target::Object(_), S::FieldPath(path)) => Ok(Extractor::Lookup(path)),

        (Target::Array, S::ArrayLiteral(items)) => items
            .into_iter()
            .map(|item| match item {
                S::Literal(text) => Ok(Extractor::Constant(Value::String(strip_unsafe(&text)))),
                S::FieldPath(path) => Ok(Extractor::Lookup(path)),
                other => Err(format!("unsupported array item ({})", other.kind())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Extractor::Array),
        (Target::Array, S::FieldPath(path)) => Ok(Extractor::Lookup(path)),

        (Target::Number, inner @ (S::FieldPath(_) | S::Literal(_) | S::Concat(_))) => {
            Ok(Extractor::Number(Box::new(scalar(inner)?)))
        }
        (Target::Boolean, inner @ (S::FieldPath(_) | S::Literal(_) | S::Concat(_))) => {
            Ok(Extractor::Boolean(Box::new(scalar(inner)?)))
        }
        (Target::DateTime, inner @ (S::FieldPath(_) | S::Literal(_) | S::Concat(_))) => {
            Ok(Extractor::DateTime(Box::new(scalar(inner)?)))
        }
        (Target::Text, inner @ (S::FieldPath(_) | S::Literal(_) | S::Concat(_))) => scalar(inner),

        (Target::Any, S::ArrayLiteral(items)) => compile_field(
            name,
            &S::ArrayLiteral(items),
            &PropertySchema {
                types: vec![SchemaType::Array],
                ..Default::default()
            },
        ),
        (Target::Any, S::Object(fields)) => compile_object(fields, property),
        (Target::Any, inner @ (S::FieldPath(_) | S::Literal(_) | S::Concat(_))) => scalar(inner),

        (_, other) => Err(format!("{} source cannot fill this property", other.kind())),
    }
}

/// Literal, lookup or concatenation
fn scalar(expr: SourceExpression) -> Result<Extractor, String> {
    match expr {
        SourceExpression::Literal(text) => Ok(Extractor::Constant(Value::String(strip_unsafe(&text)))),
        SourceExpression::FieldPath(path) => Ok(Extractor::Lookup(path)),
        SourceExpression::Concat(tokens) => concat(tokens).map(Extractor::Concat),
        other => Err(format!("{} is not a scalar source", other.kind())),
    }
}

fn concat(tokens: Vec<SourceExpression>) -> Result<Vec<ConcatToken>, String> {
    tokens
        .into_iter()
        .map(|token| match token {
            SourceExpression::Literal(text) => Ok(ConcatToken::Literal(strip_unsafe(&text))),
            SourceExpression::FieldPath(path) => Ok(ConcatToken::Field(path)),
            other => Err(format!("unsupported concatenation token ({})", other.kind())),
        })
        .collect()
}

/// Map subkeys of an object property; subkeys the schema lacks are dropped
fn compile_object(
    fields: BTreeMap<String, SourceExpression>,
    schema: &PropertySchema,
) -> Result<Extractor, String> {
    let mut extractors = BTreeMap::new();
    for (key, sub_expr) in fields {
        let sub_schema = match schema.properties.get(&key) {
            Some(sub) => sub.clone(),
            None if schema.properties.is_empty() => PropertySchema::default(),
            None => {
                debug!(%key, "compile_object: subkey not in schema");
                continue;
            }
        };
        match compile_field(&key, &sub_expr, &sub_schema) {
            Ok(extractor) => {
                extractors.insert(key, extractor);
            }
            Err(reason) => debug!(%key, %reason, "compile_object: dropping subkey"),
        }
    }
    if extractors.is_empty() {
        return Err("no mappable subfields".to_string());
    }
    Ok(Extractor::Object(extractors))
}

/// Identity sources: concatenation, fixed name or lookup
fn compile_identity(expr: &SourceExpression) -> Result<Option<IdentitySource>, String> {
    match expr.clone().into_scalar() {
        SourceExpression::Concat(tokens) if tokens.is_empty() => Ok(None),
        SourceExpression::Concat(tokens) => {
            let is_id_prefix = tokens.iter().all(|t| matches!(t, SourceExpression::Literal(_)));
            Ok(Some(IdentitySource {
                extractor: Extractor::Concat(concat(tokens)?),
                is_id_prefix,
            }))
        }
        SourceExpression::Literal(text) => Ok(Some(IdentitySource {
            extractor: Extractor::Constant(Value::String(strip_unsafe(&text))),
            is_id_prefix: false,
        })),
        SourceExpression::FieldPath(path) => Ok(Some(IdentitySource {
            extractor: Extractor::Lookup(path),
            is_id_prefix: false,
        })),
        other => Err(format!("{} cannot be used as the entity name", other.kind())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::row::FieldPath;
    use serde_json::json;

    fn schema() -> NormalizedSchema {
        NormalizedSchema::from_document(&json!({"allOf": [{"properties": {
            "type": {"type": "string", "enum": ["ParkingSpot"]},
            "name": {"type": "string"},
            "code": {"type": "string"},
            "totalSpots": {"type": "integer"},
            "occupied": {"type": "boolean"},
            "dateModified": {"type": "string", "format": "date-time"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "address": {"type": "object", "properties": {
                "streetAddress": {"type": "string"},
                "postalCode": {"type": "string"}
            }},
            "location": {"oneOf": [
                {"type": "object", "properties": {"type": {"enum": ["Point"]}}},
                {"type": "object", "properties": {"type": {"enum": ["Polygon"]}}}
            ]}
        }}]}))
        .unwrap()
    }

    fn compile_doc(doc: Value) -> CompiledMap {
        let map = FieldMap::from_value(&doc, "entitySourceId").unwrap();
        compile(&map, &schema())
    }

    #[test]
    fn test_unknown_key_dropped() {
        let compiled = compile_doc(json!({"nope": "x", "name": "n"}));
        assert!(compiled.fields.contains_key("name"));
        assert_eq!(compiled.dropped.len(), 1);
        assert_eq!(compiled.dropped[0].name, "nope");
    }

    #[test]
    fn test_scalar_dispatch() {
        let compiled = compile_doc(json!({
            "name": "static:Lot <1>",
            "code": ["static:P-", "a"],
            "totalSpots": "spots",
            "occupied": "busy",
            "dateModified": "updated"
        }));

        assert_eq!(compiled.fields["name"], Extractor::Constant(json!("Lot 1")));
        assert!(matches!(compiled.fields["code"], Extractor::Concat(ref t) if t.len() == 2));
        assert_eq!(
            compiled.fields["totalSpots"],
            Extractor::Number(Box::new(Extractor::Lookup(FieldPath::parse("spots"))))
        );
        assert!(matches!(compiled.fields["occupied"], Extractor::Boolean(_)));
        assert!(matches!(compiled.fields["dateModified"], Extractor::DateTime(_)));
    }

    #[test]
    fn test_numeric_array_coerces_concatenation() {
        let compiled = compile_doc(json!({"totalSpots": ["a", "b"]}));
        let Extractor::Number(inner) = &compiled.fields["totalSpots"] else {
            panic!("expected a number extractor");
        };
        assert!(matches!(**inner, Extractor::Concat(_)));
    }

    #[test]
    fn test_array_destination_keeps_order() {
        let compiled = compile_doc(json!({"tags": ["static:first", "second"]}));
        assert_eq!(
            compiled.fields["tags"],
            Extractor::Array(vec![
                Extractor::Constant(json!("first")),
                Extractor::Lookup(FieldPath::parse("second")),
            ])
        );
    }

    #[test]
    fn test_geometry_pair_variant_checked() {
        let compiled = compile_doc(json!({"location": {"type": "static:Point", "coordinates": ["lat", "lon"]}}));
        assert!(matches!(compiled.fields["location"], Extractor::Geometry { .. }));

        let compiled = compile_doc(json!({"location": {"type": "static:Circle", "coordinates": ["lat", "lon"]}}));
        assert!(compiled.fields.is_empty());
        assert!(compiled.dropped[0].reason.contains("Circle"));
    }

    #[test]
    fn test_geometry_direct_lookup_only_by_name() {
        let compiled = compile_doc(json!({"location": "geometry"}));
        assert_eq!(compiled.fields["location"], Extractor::Lookup(FieldPath::parse("geometry")));

        let compiled = compile_doc(json!({"location": "coords"}));
        assert!(compiled.fields.is_empty());
    }

    #[test]
    fn test_nested_object_drops_unknown_subkeys() {
        let compiled = compile_doc(json!({"address": {"streetAddress": "via", "floor": "piano"}}));
        let Extractor::Object(fields) = &compiled.fields["address"] else {
            panic!("expected an object extractor");
        };
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["streetAddress"]);
    }

    #[test]
    fn test_identity_prefix_only_when_all_static() {
        let compiled = compile_doc(json!({"entitySourceId": ["static:ds"]}));
        assert!(compiled.identity.as_ref().unwrap().is_id_prefix);

        let compiled = compile_doc(json!({"entitySourceId": ["static:ds-", "code"]}));
        assert!(!compiled.identity.as_ref().unwrap().is_id_prefix);

        let compiled = compile_doc(json!({"entitySourceId": "static:fixed"}));
        let identity = compiled.identity.unwrap();
        assert!(!identity.is_id_prefix);
        assert_eq!(identity.extractor, Extractor::Constant(json!("fixed")));
    }

    #[test]
    fn test_identity_not_an_attribute() {
        let compiled = compile_doc(json!({"entitySourceId": "code", "name": "n"}));
        assert!(!compiled.fields.contains_key("entitySourceId"));
        assert!(compiled.identity.is_some());
    }
}
