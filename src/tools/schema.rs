//! Parameter-schema derivation for typed tool arguments.
//!
//! The argument struct's [`JsonSchema`] output is normalized into the
//! `{type, description, required}` shape models expect: `$ref`s are inlined,
//! nullable types collapse to their non-null member and are never required.

use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock, RwLock},
};

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};
use tracing::debug;

use super::{errors::ToolError, tool::{FunctionParameters, Property}};

/// Schema and description derived from a tool's argument type.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSchema {
    pub description: String,
    pub parameters: FunctionParameters,
}

type SchemaCache = RwLock<HashMap<TypeId, Arc<DerivedSchema>>>;

fn schema_cache() -> &'static SchemaCache {
    static CACHE: OnceLock<SchemaCache> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Derives the parameter schema for the argument type `A`.
pub fn build_schema<A: JsonSchema>() -> Result<FunctionParameters, ToolError> {
    Ok(derive::<A>()?.parameters)
}

/// Derives `A`'s schema once per callable type `F` and reuses it afterwards.
pub(crate) fn cached_schema<F: 'static, A: JsonSchema>() -> Result<Arc<DerivedSchema>, ToolError> {
    let key = TypeId::of::<F>();
    if let Some(hit) = schema_cache().read().ok().and_then(|c| c.get(&key).cloned()) {
        return Ok(hit);
    }

    let derived = Arc::new(derive::<A>()?);
    let mut cache = schema_cache()
        .write()
        .map_err(|_| ToolError::Schema("schema cache poisoned".into()))?;
    Ok(cache.entry(key).or_insert(derived).clone())
}

fn derive<A: JsonSchema>() -> Result<DerivedSchema, ToolError> {
    let root = serde_json::to_value(schema_for!(A))
        .map_err(|e| ToolError::Schema(format!("failed to serialize schema: {e}")))?;
    let name = A::schema_name();
    debug!(args = %name, "deriving tool schema");

    let definitions = root
        .get("definitions")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let resolver = Resolver { definitions: &definitions };

    let object = resolver.resolve(&root, &name)?;
    if json_type(&object, &name)?.0 != "object" {
        return Err(ToolError::Schema(format!(
            "tool arguments `{name}` must be a struct with named fields"
        )));
    }

    let description = object
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_owned();
    let (properties, required) = resolver.object_fields(&object, &name)?;

    Ok(DerivedSchema {
        description,
        parameters: FunctionParameters {
            param_type: "object".into(),
            properties,
            required,
        },
    })
}

struct Resolver<'a> {
    definitions: &'a Map<String, Value>,
}

impl Resolver<'_> {
    /// Follows `$ref` and single-element `allOf` wrappers, keeping the outer description.
    fn resolve(&self, schema: &Value, path: &str) -> Result<Map<String, Value>, ToolError> {
        let Some(obj) = schema.as_object() else {
            return Err(unsupported(path));
        };

        let target = if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            let key = reference.rsplit('/').next().unwrap_or(reference);
            self.definitions
                .get(key)
                .ok_or_else(|| ToolError::Schema(format!("`{path}` references unknown type `{key}`")))?
        } else if let Some([single]) = obj.get("allOf").and_then(Value::as_array).map(Vec::as_slice) {
            single
        } else {
            return Ok(obj.clone());
        };

        let mut resolved = self.resolve(target, path)?;
        if let Some(desc) = obj.get("description") {
            resolved.insert("description".into(), desc.clone());
        }
        Ok(resolved)
    }

    fn object_fields(
        &self,
        object: &Map<String, Value>,
        path: &str,
    ) -> Result<(BTreeMap<String, Property>, Vec<String>), ToolError> {
        let declared_required: Vec<&str> = object
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        let fields = object.get("properties").and_then(Value::as_object);

        for (field, schema) in fields.into_iter().flatten() {
            let field_path = format!("{path}.{field}");
            let (property, nullable) = self.property(schema, &field_path)?;
            if declared_required.contains(&field.as_str()) && !nullable {
                required.push(field.clone());
            }
            properties.insert(field.clone(), property);
        }

        Ok((properties, required))
    }

    /// Converts one field schema; the flag reports whether `null` is accepted.
    fn property(&self, schema: &Value, path: &str) -> Result<(Property, bool), ToolError> {
        let mut resolved = self.resolve(schema, path)?;

        // Option<T> of a non-primitive: {"anyOf": [{"$ref": ...}, {"type": "null"}]}
        let mut nullable = false;
        if let Some(variants) = resolved.get("anyOf").and_then(Value::as_array).cloned() {
            let (nulls, others): (Vec<_>, Vec<_>) = variants
                .iter()
                .partition(|v| v.get("type").and_then(Value::as_str) == Some("null"));
            let [inner] = others.as_slice() else {
                return Err(unsupported(path));
            };
            nullable = !nulls.is_empty();
            let description = resolved.get("description").cloned();
            resolved = self.resolve(inner, path)?;
            if let Some(desc) = description {
                resolved.insert("description".into(), desc);
            }
        }

        let (kind, type_nullable) = json_type(&resolved, path)?;
        let mut property = Property::new(
            kind,
            resolved
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim(),
        );

        if let Some(values) = resolved.get("enum").and_then(Value::as_array) {
            property.enum_values = Some(values.iter().filter(|v| !v.is_null()).cloned().collect());
        }

        match kind {
            "array" => {
                if let Some(items) = resolved.get("items") {
                    let (item, _) = self.property(items, &format!("{path}[]"))?;
                    property.items = Some(Box::new(item));
                }
            }
            "object" if resolved.contains_key("properties") => {
                let (fields, required) = self.object_fields(&resolved, path)?;
                property.properties = Some(fields);
                property.required = Some(required);
            }
            _ => {}
        }

        Ok((property, nullable || type_nullable))
    }
}

/// Reads the `type` keyword, accepting `["T", "null"]` as nullable `T`.
fn json_type(schema: &Map<String, Value>, path: &str) -> Result<(&'static str, bool), ToolError> {
    let (name, nullable) = match schema.get("type") {
        Some(Value::String(t)) => (t.as_str(), false),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            match names.iter().filter(|t| **t != "null").collect::<Vec<_>>().as_slice() {
                [single] => (**single, nullable),
                _ => return Err(unsupported(path)),
            }
        }
        None if schema.contains_key("enum") => ("string", false),
        _ => return Err(unsupported(path)),
    };

    let kind = match name {
        "string" => "string",
        "integer" => "integer",
        "number" => "number",
        "boolean" => "boolean",
        "array" => "array",
        "object" => "object",
        _ => return Err(unsupported(path)),
    };
    Ok((kind, nullable))
}

fn unsupported(path: &str) -> ToolError {
    ToolError::Schema(format!(
        "`{path}` has no JSON-compatible shape; use a primitive, a collection or a struct deriving JsonSchema"
    ))
}
