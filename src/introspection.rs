//! Fetching and decoding a remote origin's type system through the standard
//! introspection query.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FederationError, Result};
use crate::query_executor::{QueryExecutor, SubgraphRequest};
use crate::schema::{
    DirectiveDef, EnumType, EnumValueDef, FieldDef, InputObjectType, InputValueDef, ObjectType,
    ScalarType, Schema, TypeDef, TypeRef, UnionType,
};

pub const INTROSPECTION_QUERY: &str = r#"query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types {
      ...FullType
    }
    directives {
      name
      description
      locations
      args {
        ...InputValue
      }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args {
      ...InputValue
    }
    type {
      ...TypeRef
    }
    isDeprecated
    deprecationReason
  }
  inputFields {
    ...InputValue
  }
  interfaces {
    ...TypeRef
  }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes {
    ...TypeRef
  }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Kind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: Option<NamedRef>,
    mutation_type: Option<NamedRef>,
    subscription_type: Option<NamedRef>,
    types: Vec<FullType>,
    #[serde(default)]
    directives: Vec<IntrospectedDirective>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullType {
    kind: Kind,
    name: String,
    description: Option<String>,
    fields: Option<Vec<IntrospectedField>>,
    input_fields: Option<Vec<IntrospectedInputValue>>,
    interfaces: Option<Vec<IntrospectedTypeRef>>,
    enum_values: Option<Vec<IntrospectedEnumValue>>,
    possible_types: Option<Vec<IntrospectedTypeRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedField {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<IntrospectedInputValue>,
    #[serde(rename = "type")]
    ty: IntrospectedTypeRef,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedInputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: IntrospectedTypeRef,
    default_value: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedEnumValue {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedDirective {
    name: String,
    description: Option<String>,
    #[serde(default)]
    locations: Vec<String>,
    #[serde(default)]
    args: Vec<IntrospectedInputValue>,
    #[serde(default)]
    is_repeatable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectedTypeRef {
    kind: Kind,
    name: Option<String>,
    of_type: Option<Box<IntrospectedTypeRef>>,
}

impl IntrospectedTypeRef {
    fn to_type_ref(&self) -> Result<TypeRef> {
        let inner = || {
            self.of_type
                .as_deref()
                .ok_or_else(|| malformed("wrapping type without ofType"))?
                .to_type_ref()
        };
        Ok(match self.kind {
            Kind::List => TypeRef::List(Box::new(inner()?)),
            Kind::NonNull => TypeRef::NonNull(Box::new(inner()?)),
            _ => TypeRef::Named(
                self.name
                    .clone()
                    .ok_or_else(|| malformed("named type without a name"))?,
            ),
        })
    }
}

fn malformed(reason: &str) -> FederationError {
    FederationError::SchemaParse(format!("malformed introspection result: {reason}"))
}

fn deprecation(is_deprecated: bool, reason: &Option<String>) -> Option<String> {
    is_deprecated.then(|| {
        reason
            .clone()
            .unwrap_or_else(|| "No longer supported".to_string())
    })
}

fn convert_input_values(
    values: &[IntrospectedInputValue],
) -> Result<indexmap::IndexMap<String, InputValueDef>> {
    values
        .iter()
        .map(|value| {
            let def = InputValueDef {
                name: value.name.clone(),
                description: value.description.clone(),
                value_type: value.ty.to_type_ref()?,
                default_value: value.default_value.clone(),
                deprecation_reason: deprecation(value.is_deprecated, &value.deprecation_reason),
            };
            Ok((value.name.clone(), def))
        })
        .collect()
}

fn convert_type(full: &FullType) -> Result<Option<TypeDef>> {
    let name = full.name.clone();
    let description = full.description.clone();
    let names = |refs: &Option<Vec<IntrospectedTypeRef>>| -> Vec<String> {
        refs.iter()
            .flatten()
            .filter_map(|r| r.name.clone())
            .collect()
    };

    let typedef = match full.kind {
        Kind::Scalar => TypeDef::Scalar(ScalarType { name, description }),
        Kind::Object | Kind::Interface => {
            let mut fields = indexmap::IndexMap::new();
            for field in full.fields.iter().flatten() {
                fields.insert(
                    field.name.clone(),
                    FieldDef {
                        name: field.name.clone(),
                        description: field.description.clone(),
                        arguments: convert_input_values(&field.args)?,
                        field_type: field.ty.to_type_ref()?,
                        deprecation_reason: deprecation(
                            field.is_deprecated,
                            &field.deprecation_reason,
                        ),
                    },
                );
            }
            let object = ObjectType {
                name,
                description,
                interfaces: names(&full.interfaces),
                fields,
            };
            if full.kind == Kind::Object {
                TypeDef::Object(object)
            } else {
                TypeDef::Interface(object)
            }
        }
        Kind::Union => TypeDef::Union(UnionType {
            name,
            description,
            members: names(&full.possible_types),
        }),
        Kind::Enum => TypeDef::Enum(EnumType {
            name,
            description,
            values: full
                .enum_values
                .iter()
                .flatten()
                .map(|value| {
                    let def = EnumValueDef {
                        name: value.name.clone(),
                        description: value.description.clone(),
                        deprecation_reason: deprecation(
                            value.is_deprecated,
                            &value.deprecation_reason,
                        ),
                    };
                    (value.name.clone(), def)
                })
                .collect(),
        }),
        Kind::InputObject => TypeDef::InputObject(InputObjectType {
            name,
            description,
            fields: convert_input_values(full.input_fields.as_deref().unwrap_or_default())?,
        }),
        Kind::List | Kind::NonNull => return Ok(None),
    };
    Ok(Some(typedef))
}

/// Builds a schema from the `data` of an introspection response.
pub fn schema_from_introspection(data: &Value) -> Result<Schema> {
    let raw = data
        .get("__schema")
        .ok_or_else(|| malformed("missing __schema"))?;
    let introspected: IntrospectionSchema =
        serde_json::from_value(raw.clone()).map_err(|e| malformed(&e.to_string()))?;

    let mut schema = Schema {
        query_type: introspected.query_type.map(|r| r.name),
        mutation_type: introspected.mutation_type.map(|r| r.name),
        subscription_type: introspected.subscription_type.map(|r| r.name),
        ..Default::default()
    };

    for full in &introspected.types {
        if full.name.starts_with("__") {
            continue;
        }
        if let Some(typedef) = convert_type(full)? {
            schema.types.insert(full.name.clone(), typedef);
        }
    }

    for directive in &introspected.directives {
        schema.directives.insert(
            directive.name.clone(),
            DirectiveDef {
                name: directive.name.clone(),
                description: directive.description.clone(),
                arguments: convert_input_values(&directive.args)?,
                locations: directive.locations.clone(),
                repeatable: directive.is_repeatable,
            },
        );
    }

    Ok(schema)
}

/// Runs the introspection query against `url` and decodes the result.
pub async fn introspect(
    executor: &dyn QueryExecutor,
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<Schema> {
    debug!(url, "introspecting remote origin");
    let request = SubgraphRequest {
        operation_name: Some("IntrospectionQuery".to_string()),
        query: INTROSPECTION_QUERY.to_string(),
        variables: Map::new(),
    };
    let result = executor.execute(url, headers, &request).await?;
    if !result.response.errors.is_empty() {
        return Err(FederationError::Upstream(result.response.errors));
    }
    let data = result
        .response
        .data
        .ok_or_else(|| malformed("response carries no data"))?;
    schema_from_introspection(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn named(kind: &str, name: &str) -> Value {
        json!({ "kind": kind, "name": name, "ofType": null })
    }

    #[test]
    fn decodes_types_wrappers_and_deprecations() {
        let data = json!({
            "__schema": {
                "queryType": { "name": "Query" },
                "mutationType": null,
                "subscriptionType": null,
                "types": [
                    {
                        "kind": "OBJECT", "name": "Query", "description": null,
                        "fields": [{
                            "name": "users",
                            "description": "All users",
                            "args": [{
                                "name": "first", "description": null,
                                "type": named("SCALAR", "Int"), "defaultValue": "10"
                            }],
                            "type": {
                                "kind": "NON_NULL", "name": null,
                                "ofType": { "kind": "LIST", "name": null, "ofType": named("OBJECT", "User") }
                            },
                            "isDeprecated": false, "deprecationReason": null
                        }],
                        "inputFields": null, "interfaces": [], "enumValues": null, "possibleTypes": null
                    },
                    {
                        "kind": "OBJECT", "name": "User", "description": null,
                        "fields": [{
                            "name": "login", "description": null, "args": [],
                            "type": named("SCALAR", "String"),
                            "isDeprecated": true, "deprecationReason": "use name"
                        }],
                        "inputFields": null, "interfaces": [], "enumValues": null, "possibleTypes": null
                    },
                    { "kind": "SCALAR", "name": "Int", "description": null },
                    { "kind": "SCALAR", "name": "String", "description": null },
                    { "kind": "OBJECT", "name": "__Type", "description": null, "fields": [] }
                ],
                "directives": [{
                    "name": "skip", "description": null, "locations": ["FIELD"],
                    "args": [{ "name": "if", "description": null,
                               "type": { "kind": "NON_NULL", "name": null, "ofType": named("SCALAR", "Boolean") },
                               "defaultValue": null }]
                }]
            }
        });

        let schema = schema_from_introspection(&data).unwrap();
        assert_eq!(schema.query_type.as_deref(), Some("Query"));
        assert!(!schema.types.contains_key("__Type"));

        let users = schema.field("Query", "users").unwrap();
        assert_eq!(users.field_type.to_string(), "[User]!");
        assert_eq!(users.description.as_deref(), Some("All users"));
        assert_eq!(users.arguments["first"].default_value.as_deref(), Some("10"));
        assert_eq!(
            schema.field("User", "login").unwrap().deprecation_reason.as_deref(),
            Some("use name")
        );
        assert_eq!(
            schema.directives["skip"].arguments["if"].value_type.to_string(),
            "Boolean!"
        );
    }

    #[test]
    fn missing_schema_is_reported() {
        let err = schema_from_introspection(&json!({})).unwrap_err();
        assert!(err.to_string().contains("__schema"), "{err}");
    }
}
