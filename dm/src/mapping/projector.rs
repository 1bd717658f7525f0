//! Row projection: extract, validate per field, assemble, validate whole

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::compiler::CompiledMap;
use super::entity::ValidatedEntity;
use super::extract::value_text;
use super::row::RawRow;
use crate::identity::IdentityScope;
use crate::schema::{NormalizedSchema, describe};

/// A destination field left out of a row's entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDrop {
    pub field: String,
    pub reason: String,
}

/// A row that failed whole-object validation (RowValidationError)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub row_ordinal: u64,
    pub reason: String,
    pub partial_object: Value,
}

/// Result of projecting one row
#[derive(Debug, Clone)]
pub struct RowProjection {
    /// Fields dropped on the way, even when the row is rejected
    pub dropped: Vec<FieldDrop>,
    pub result: Result<ValidatedEntity, Rejection>,
}

/// Applies a compiled map to rows
///
/// Holds only immutable run-scoped state, so projection is deterministic.
#[derive(Debug, Clone)]
pub struct Projector {
    schema: Arc<NormalizedSchema>,
    compiled: Arc<CompiledMap>,
    scope: IdentityScope,
}

impl Projector {
    pub fn new(schema: Arc<NormalizedSchema>, compiled: Arc<CompiledMap>, scope: IdentityScope) -> Self {
        Self {
            schema,
            compiled,
            scope,
        }
    }

    pub fn schema(&self) -> &NormalizedSchema {
        &self.schema
    }

    /// Project one row into an entity or a rejection
    pub fn project(&self, ordinal: u64, row: &RawRow) -> RowProjection {
        debug!(ordinal, keys = row.len(), "Projector::project: called");
        let mut object = Map::new();
        let mut dropped = Vec::new();

        for (name, extractor) in &self.compiled.fields {
            match extractor.evaluate(row) {
                Ok(Some(value)) => match self.schema.validate_field(name, &value) {
                    Ok(()) => {
                        object.insert(name.clone(), value);
                    }
                    Err(issues) => dropped.push(FieldDrop {
                        field: name.clone(),
                        reason: describe(&issues),
                    }),
                },
                Ok(None) => debug!(ordinal, %name, "Projector::project: field skipped"),
                Err(e) => dropped.push(FieldDrop {
                    field: name.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        for drop in &dropped {
            debug!(ordinal, field = %drop.field, reason = %drop.reason, "Field dropped");
        }

        let (identity_value, is_id_prefix) = match &self.compiled.identity {
            Some(identity) => match identity.extractor.evaluate(row) {
                Ok(value) => (value.as_ref().map(value_text), identity.is_id_prefix),
                Err(e) => {
                    debug!(ordinal, error = %e, "Projector::project: no identity value");
                    (None, identity.is_id_prefix)
                }
            },
            None => (None, false),
        };

        let entity_type = self.schema.entity_type().to_string();
        let id = self
            .scope
            .synthesize(&entity_type, identity_value.as_deref(), is_id_prefix, ordinal);
        object.insert("id".to_string(), Value::String(id));
        object.insert("type".to_string(), Value::String(entity_type));

        let result = match self.schema.validate_entity(&object) {
            Ok(()) => Ok(ValidatedEntity::from_object(object, &self.schema)),
            Err(issues) => {
                let reason = describe(&issues);
                warn!(ordinal, %reason, "Row rejected");
                Err(Rejection {
                    row_ordinal: ordinal,
                    reason,
                    partial_object: Value::Object(object),
                })
            }
        };

        RowProjection { dropped, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldMap, compile};
    use serde_json::json;

    fn schema() -> NormalizedSchema {
        NormalizedSchema::from_document(&json!({
            "required": ["id", "type", "name"],
            "allOf": [{"properties": {
                "id": {"type": "string"},
                "type": {"type": "string", "enum": ["ParkingSpot"]},
                "name": {"type": "string", "minLength": 1},
                "totalSpots": {"type": "integer", "minimum": 0},
                "occupied": {"type": "boolean"},
                "code": {"type": "string"},
                "location": {"oneOf": [
                    {"type": "object", "required": ["type", "coordinates"],
                     "properties": {"type": {"enum": ["Point"]}, "coordinates": {"type": "array", "items": {"type": "number"}}}}
                ]}
            }}]
        }))
        .unwrap()
    }

    fn projector(map: Value) -> Projector {
        let schema = Arc::new(schema());
        let map = FieldMap::from_value(&map, "entitySourceId").unwrap();
        let compiled = Arc::new(compile(&map, &schema));
        let scope = IdentityScope::new("Torino", "Mobility", Some("G".into()))
            .with_source(std::path::Path::new("parkings.csv"));
        Projector::new(schema, compiled, scope)
    }

    fn row(value: Value) -> RawRow {
        match value {
            Value::Object(map) => RawRow::sanitize(map),
            _ => panic!("test rows must be objects"),
        }
    }

    fn full_map() -> Value {
        json!({
            "entitySourceId": "sid",
            "name": "nome",
            "totalSpots": "posti",
            "occupied": "occ",
            "code": ["static:P-", "a", "static:-", "b"],
            "location": {"type": "static:Point", "coordinates": ["lat", "lon"]}
        })
    }

    #[test]
    fn test_full_row_projects() {
        let p = projector(full_map());
        let out = p.project(
            1,
            &row(json!({"sid": "abc 1", "nome": "Lot", "posti": "12", "occ": "TRUE", "a": "X", "b": "Y", "lat": "45", "lon": "7.5"})),
        );

        assert!(out.dropped.is_empty());
        let entity = out.result.unwrap();
        assert_eq!(entity.id, "urn:ngsi-ld:ParkingSpot:Torino:Mobility:G:abc1");
        assert_eq!(entity.entity_type, "ParkingSpot");
        assert_eq!(entity.attributes["totalSpots"].value, json!(12));
        assert_eq!(entity.attributes["occupied"].value, json!(true));
        assert_eq!(entity.attributes["code"].value, json!("P-X-Y"));
        assert_eq!(entity.attributes["location"].attr_type, "geo:json");
        assert!(!entity.attributes.contains_key("sid"));
    }

    #[test]
    fn test_failing_field_is_omitted() {
        let p = projector(full_map());
        let out = p.project(2, &row(json!({"sid": "x", "nome": "Lot", "posti": "many", "occ": "0", "a": "X", "b": "Y", "lat": "45", "lon": "7"})));

        assert_eq!(out.dropped.len(), 1);
        assert_eq!(out.dropped[0].field, "totalSpots");
        let entity = out.result.unwrap();
        assert!(!entity.attributes.contains_key("totalSpots"));
        assert_eq!(entity.attributes["occupied"].value, json!(false));
    }

    #[test]
    fn test_field_failing_schema_is_omitted() {
        let p = projector(full_map());
        let out = p.project(3, &row(json!({"sid": "x", "nome": "Lot", "posti": "-4", "occ": "1", "a": "X", "b": "Y", "lat": "45", "lon": "7"})));

        assert_eq!(out.dropped[0].field, "totalSpots");
        assert!(out.result.is_ok());
    }

    #[test]
    fn test_required_omission_rejects_row() {
        let p = projector(full_map());
        let out = p.project(4, &row(json!({"sid": "x", "nome": "", "posti": "3", "occ": "1", "a": "X", "b": "Y", "lat": "45", "lon": "7"})));

        assert_eq!(out.dropped[0].field, "name");
        let rejection = out.result.unwrap_err();
        assert_eq!(rejection.row_ordinal, 4);
        assert!(rejection.reason.contains("name"));
        assert_eq!(rejection.partial_object["totalSpots"], json!(3));
    }

    #[test]
    fn test_prefix_identity_uses_ordinal() {
        let mut map = full_map();
        map["entitySourceId"] = json!(["static:ds"]);
        let p = projector(map);
        let out = p.project(7, &row(json!({"nome": "Lot"})));
        assert!(out.result.unwrap().id.ends_with("ds-7"));
    }

    #[test]
    fn test_missing_identity_uses_file_name() {
        let p = projector(full_map());
        let out = p.project(5, &row(json!({"nome": "Lot"})));
        assert_eq!(out.result.unwrap().id, "urn:ngsi-ld:ParkingSpot:Torino:Mobility:G:parkings-5");
    }

    #[test]
    fn test_projection_is_deterministic() {
        let p = projector(full_map());
        let r = row(json!({"sid": "k", "nome": "Lot", "posti": "1", "a": "X", "b": "Y", "lat": "1", "lon": "2"}));
        let first = p.project(9, &r).result.unwrap();
        let second = p.project(9, &r).result.unwrap();
        assert_eq!(first, second);
    }
}
