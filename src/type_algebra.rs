//! Copying schemas under exclusion filters and merging independently defined
//! schemas into one type map.
//!
//! Merging is strict: two definitions of the same type must be of the same
//! kind, same-named fields and arguments must have structurally equal types,
//! and descriptive attributes (descriptions, defaults, deprecation reasons)
//! must agree whenever both sides set them. Anything else is a
//! [`FederationError::MergeConflict`].

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::{FederationError, Result};
use crate::schema::{
    DirectiveDef, EnumType, EnumValueDef, FieldDef, InputObjectType, InputValueDef, ObjectType,
    ScalarType, Schema, TypeDef, TypeRef, UnionType,
};

/// Parts of a schema to leave out of a copy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Exclusions {
    types: HashSet<String>,
    fields: HashMap<String, HashSet<String>>,
    arguments: HashMap<(String, String), HashSet<String>>,
    directives: HashSet<String>,
    directive_arguments: HashMap<String, HashSet<String>>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds exclusions from dotted paths: `Type`, `Type.field`,
    /// `Type.field.argument`, `@directive` and `@directive.argument`.
    pub fn parse<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exclusions = Exclusions::new();
        for path in paths {
            let path = path.as_ref();
            let parts: Vec<&str> = path.split('.').collect();
            if parts.iter().any(|part| part.is_empty()) {
                return Err(FederationError::Config(format!(
                    "invalid exclusion path `{path}`"
                )));
            }
            match (parts.as_slice(), path.strip_prefix('@')) {
                ([_], Some(directive)) => {
                    exclusions.directives.insert(directive.to_string());
                }
                ([directive, argument], Some(_)) => {
                    exclusions
                        .directive_arguments
                        .entry(directive[1..].to_string())
                        .or_default()
                        .insert(argument.to_string());
                }
                ([type_name], None) => {
                    exclusions.exclude_type(type_name);
                }
                ([type_name, field], None) => {
                    exclusions.exclude_field(type_name, field);
                }
                ([type_name, field, argument], None) => {
                    exclusions.exclude_argument(type_name, field, argument);
                }
                _ => {
                    return Err(FederationError::Config(format!(
                        "invalid exclusion path `{path}`"
                    )));
                }
            }
        }
        Ok(exclusions)
    }

    pub fn exclude_type(&mut self, type_name: &str) -> &mut Self {
        self.types.insert(type_name.to_string());
        self
    }

    pub fn exclude_field(&mut self, type_name: &str, field: &str) -> &mut Self {
        self.fields
            .entry(type_name.to_string())
            .or_default()
            .insert(field.to_string());
        self
    }

    pub fn exclude_argument(&mut self, type_name: &str, field: &str, argument: &str) -> &mut Self {
        self.arguments
            .entry((type_name.to_string(), field.to_string()))
            .or_default()
            .insert(argument.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.fields.is_empty()
            && self.arguments.is_empty()
            && self.directives.is_empty()
            && self.directive_arguments.is_empty()
    }

    fn type_excluded(&self, type_name: &str) -> bool {
        self.types.contains(type_name)
    }

    fn field_excluded(&self, type_name: &str, field: &str) -> bool {
        self.fields
            .get(type_name)
            .is_some_and(|fields| fields.contains(field))
    }

    fn argument_excluded(&self, type_name: &str, field: &str, argument: &str) -> bool {
        self.arguments
            .get(&(type_name.to_string(), field.to_string()))
            .is_some_and(|arguments| arguments.contains(argument))
    }

    fn check_reference(&self, ty: &TypeRef, referenced_by: impl FnOnce() -> String) -> Result<()> {
        let type_name = ty.named_type();
        if self.type_excluded(type_name) {
            return Err(FederationError::ExcludedTypeReferenced {
                type_name: type_name.to_string(),
                referenced_by: referenced_by(),
            });
        }
        Ok(())
    }
}

/// Produces an independent copy of `schema` without the excluded parts.
///
/// Excluding a type while keeping a field or argument that returns it is an
/// error: the field or argument has to be excluded as well. Union members and
/// implemented interfaces that were excluded are silently dropped.
pub fn copy_schema(schema: &Schema, exclusions: &Exclusions) -> Result<Schema> {
    let mut copy = Schema::default();

    for (name, typedef) in &schema.types {
        if exclusions.type_excluded(name) {
            continue;
        }
        let copied = match typedef {
            TypeDef::Scalar(t) => TypeDef::Scalar(t.clone()),
            TypeDef::Object(t) => TypeDef::Object(copy_object(t, exclusions)?),
            TypeDef::Interface(t) => TypeDef::Interface(copy_object(t, exclusions)?),
            TypeDef::Union(t) => TypeDef::Union(UnionType {
                name: t.name.clone(),
                description: t.description.clone(),
                members: t
                    .members
                    .iter()
                    .filter(|member| !exclusions.type_excluded(member))
                    .cloned()
                    .collect(),
            }),
            TypeDef::Enum(t) => TypeDef::Enum(EnumType {
                name: t.name.clone(),
                description: t.description.clone(),
                values: t
                    .values
                    .iter()
                    .filter(|(value_name, _)| !exclusions.field_excluded(name, value_name))
                    .map(|(value_name, value)| (value_name.clone(), value.clone()))
                    .collect(),
            }),
            TypeDef::InputObject(t) => {
                let mut fields = IndexMap::new();
                for (field_name, field) in &t.fields {
                    if exclusions.field_excluded(name, field_name) {
                        continue;
                    }
                    exclusions.check_reference(&field.value_type, || format!("{name}.{field_name}"))?;
                    fields.insert(field_name.clone(), field.clone());
                }
                TypeDef::InputObject(InputObjectType {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    fields,
                })
            }
        };
        copy.types.insert(name.clone(), copied);
    }

    for (name, directive) in &schema.directives {
        if exclusions.directives.contains(name) {
            continue;
        }
        let excluded_arguments = exclusions.directive_arguments.get(name);
        let mut arguments = IndexMap::new();
        for (argument_name, argument) in &directive.arguments {
            if excluded_arguments.is_some_and(|excluded| excluded.contains(argument_name)) {
                continue;
            }
            exclusions.check_reference(&argument.value_type, || format!("@{name}({argument_name}:)"))?;
            arguments.insert(argument_name.clone(), argument.clone());
        }
        copy.directives.insert(
            name.clone(),
            DirectiveDef {
                arguments,
                ..directive.clone()
            },
        );
    }

    let keep_root = |root: &Option<String>| root.clone().filter(|name| !exclusions.type_excluded(name));
    copy.query_type = keep_root(&schema.query_type);
    copy.mutation_type = keep_root(&schema.mutation_type);
    copy.subscription_type = keep_root(&schema.subscription_type);

    Ok(copy)
}

fn copy_object(object: &ObjectType, exclusions: &Exclusions) -> Result<ObjectType> {
    let type_name = &object.name;
    let mut fields = IndexMap::new();
    for (field_name, field) in &object.fields {
        if exclusions.field_excluded(type_name, field_name) {
            continue;
        }
        exclusions.check_reference(&field.field_type, || format!("{type_name}.{field_name}"))?;

        let mut arguments = IndexMap::new();
        for (argument_name, argument) in &field.arguments {
            if exclusions.argument_excluded(type_name, field_name, argument_name) {
                continue;
            }
            exclusions.check_reference(&argument.value_type, || {
                format!("{type_name}.{field_name}({argument_name}:)")
            })?;
            arguments.insert(argument_name.clone(), argument.clone());
        }
        fields.insert(
            field_name.clone(),
            FieldDef {
                arguments,
                ..field.clone()
            },
        );
    }

    Ok(ObjectType {
        name: object.name.clone(),
        description: object.description.clone(),
        interfaces: object
            .interfaces
            .iter()
            .filter(|interface| !exclusions.type_excluded(interface))
            .cloned()
            .collect(),
        fields,
    })
}

/// Merges two schemas key by key into a new schema.
pub fn merge_schemas(first: &Schema, second: &Schema) -> Result<Schema> {
    let mut merged = Schema::default();

    for (name, typedef) in &first.types {
        let typedef = match second.types.get(name) {
            Some(other) => merge_types(typedef, other)?,
            None => typedef.clone(),
        };
        merged.types.insert(name.clone(), typedef);
    }
    for (name, typedef) in &second.types {
        if !first.types.contains_key(name) {
            merged.types.insert(name.clone(), typedef.clone());
        }
    }

    for (name, directive) in &first.directives {
        let directive = match second.directives.get(name) {
            Some(other) => merge_directives(directive, other)?,
            None => directive.clone(),
        };
        merged.directives.insert(name.clone(), directive);
    }
    for (name, directive) in &second.directives {
        if !first.directives.contains_key(name) {
            merged.directives.insert(name.clone(), directive.clone());
        }
    }

    merged.query_type = merge_attribute("schema", "query type", &first.query_type, &second.query_type)?;
    merged.mutation_type = merge_attribute(
        "schema",
        "mutation type",
        &first.mutation_type,
        &second.mutation_type,
    )?;
    merged.subscription_type = merge_attribute(
        "schema",
        "subscription type",
        &first.subscription_type,
        &second.subscription_type,
    )?;

    Ok(merged)
}

fn merge_types(first: &TypeDef, second: &TypeDef) -> Result<TypeDef> {
    let name = first.name();
    let description = merge_attribute(
        name,
        "description",
        &first.description().map(str::to_string),
        &second.description().map(str::to_string),
    )?;

    Ok(match (first, second) {
        (TypeDef::Scalar(a), TypeDef::Scalar(_)) => TypeDef::Scalar(ScalarType {
            name: a.name.clone(),
            description,
        }),
        (TypeDef::Object(a), TypeDef::Object(b)) => {
            TypeDef::Object(merge_objects(a, b, description)?)
        }
        (TypeDef::Interface(a), TypeDef::Interface(b)) => {
            TypeDef::Interface(merge_objects(a, b, description)?)
        }
        (TypeDef::Union(a), TypeDef::Union(b)) => TypeDef::Union(UnionType {
            name: a.name.clone(),
            description,
            members: union_names(&a.members, &b.members),
        }),
        (TypeDef::Enum(a), TypeDef::Enum(b)) => {
            let mut values = a.values.clone();
            for (value_name, value) in &b.values {
                let merged = match a.values.get(value_name) {
                    Some(existing) => merge_enum_values(name, existing, value)?,
                    None => value.clone(),
                };
                values.insert(value_name.clone(), merged);
            }
            TypeDef::Enum(EnumType {
                name: a.name.clone(),
                description,
                values,
            })
        }
        (TypeDef::InputObject(a), TypeDef::InputObject(b)) => {
            TypeDef::InputObject(InputObjectType {
                name: a.name.clone(),
                description,
                fields: merge_input_values(name, &a.fields, &b.fields)?,
            })
        }
        _ => {
            return Err(FederationError::conflict(
                name,
                format!("defined as {} and as {}", first.kind(), second.kind()),
            ));
        }
    })
}

fn merge_objects(a: &ObjectType, b: &ObjectType, description: Option<String>) -> Result<ObjectType> {
    let mut fields = a.fields.clone();
    for (field_name, field) in &b.fields {
        let merged = match a.fields.get(field_name) {
            Some(existing) => merge_fields(&a.name, existing, field)?,
            None => field.clone(),
        };
        fields.insert(field_name.clone(), merged);
    }

    Ok(ObjectType {
        name: a.name.clone(),
        description,
        interfaces: union_names(&a.interfaces, &b.interfaces),
        fields,
    })
}

fn merge_fields(type_name: &str, a: &FieldDef, b: &FieldDef) -> Result<FieldDef> {
    let location = format!("{type_name}.{}", a.name);
    if a.field_type != b.field_type {
        return Err(FederationError::conflict(
            location,
            format!("type `{}` differs from `{}`", a.field_type, b.field_type),
        ));
    }

    Ok(FieldDef {
        name: a.name.clone(),
        description: merge_attribute(&location, "description", &a.description, &b.description)?,
        arguments: merge_input_values(&location, &a.arguments, &b.arguments)?,
        field_type: a.field_type.clone(),
        deprecation_reason: merge_attribute(
            &location,
            "deprecation reason",
            &a.deprecation_reason,
            &b.deprecation_reason,
        )?,
    })
}

fn merge_input_values(
    owner: &str,
    a: &IndexMap<String, InputValueDef>,
    b: &IndexMap<String, InputValueDef>,
) -> Result<IndexMap<String, InputValueDef>> {
    let mut merged = a.clone();
    for (name, value) in b {
        let Some(existing) = a.get(name) else {
            merged.insert(name.clone(), value.clone());
            continue;
        };
        let location = format!("{owner}({name}:)");
        if existing.value_type != value.value_type {
            return Err(FederationError::conflict(
                location,
                format!(
                    "type `{}` differs from `{}`",
                    existing.value_type, value.value_type
                ),
            ));
        }
        let value = InputValueDef {
            name: name.clone(),
            description: merge_attribute(&location, "description", &existing.description, &value.description)?,
            value_type: existing.value_type.clone(),
            default_value: merge_attribute(
                &location,
                "default value",
                &existing.default_value,
                &value.default_value,
            )?,
            deprecation_reason: merge_attribute(
                &location,
                "deprecation reason",
                &existing.deprecation_reason,
                &value.deprecation_reason,
            )?,
        };
        merged.insert(name.clone(), value);
    }
    Ok(merged)
}

fn merge_enum_values(enum_name: &str, a: &EnumValueDef, b: &EnumValueDef) -> Result<EnumValueDef> {
    let location = format!("{enum_name}.{}", a.name);
    Ok(EnumValueDef {
        name: a.name.clone(),
        description: merge_attribute(&location, "description", &a.description, &b.description)?,
        deprecation_reason: merge_attribute(
            &location,
            "deprecation reason",
            &a.deprecation_reason,
            &b.deprecation_reason,
        )?,
    })
}

fn merge_directives(a: &DirectiveDef, b: &DirectiveDef) -> Result<DirectiveDef> {
    let location = format!("@{}", a.name);
    if a.repeatable != b.repeatable {
        return Err(FederationError::conflict(location, "repeatable differs"));
    }
    Ok(DirectiveDef {
        name: a.name.clone(),
        description: merge_attribute(&location, "description", &a.description, &b.description)?,
        arguments: merge_input_values(&location, &a.arguments, &b.arguments)?,
        locations: union_names(&a.locations, &b.locations),
        repeatable: a.repeatable,
    })
}

/// Either side may leave an attribute unset; when both set it they must agree.
fn merge_attribute(
    location: &str,
    attribute: &str,
    a: &Option<String>,
    b: &Option<String>,
) -> Result<Option<String>> {
    match (a, b) {
        (Some(a), Some(b)) if a != b => Err(FederationError::conflict(
            location,
            format!("{attribute} {a:?} differs from {b:?}"),
        )),
        (Some(_), _) => Ok(a.clone()),
        (None, _) => Ok(b.clone()),
    }
}

fn union_names(a: &[String], b: &[String]) -> Vec<String> {
    let mut names = a.to_vec();
    for name in b {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema(sdl: &str) -> Schema {
        Schema::parse(sdl).unwrap()
    }

    #[test]
    fn merge_of_disjoint_schemas_is_the_union() {
        let a = schema("type Query { a: A } type A { id: ID }");
        let b = schema("type B { name: String }");
        let merged = merge_schemas(&a, &b).unwrap();

        let names: Vec<_> = merged.types.keys().map(String::as_str).collect();
        assert_eq!(names, ["Int", "Float", "String", "Boolean", "ID", "Query", "A", "B"]);
        assert_eq!(merged.types["A"], a.types["A"]);
        assert_eq!(merged.types["B"], b.types["B"]);
        assert_eq!(merged.query_type.as_deref(), Some("Query"));
    }

    #[test]
    fn identical_shared_types_do_not_duplicate_fields() {
        let a = schema("type Query { x: Int } type Shared { id: ID name: String }");
        let b = schema("type Shared { id: ID name: String }");
        let merged = merge_schemas(&a, &b).unwrap();
        assert_eq!(merged.types["Shared"].fields().unwrap().len(), 2);
    }

    #[test]
    fn field_sets_and_interfaces_are_unioned() {
        let a = schema("interface Node { id: ID } type User implements Node { id: ID }");
        let b = schema("interface Named { name: String } type User implements Named { name: String }");
        let merged = merge_schemas(&a, &b).unwrap();
        let TypeDef::Object(user) = &merged.types["User"] else {
            panic!("User should be an object");
        };
        assert_eq!(user.interfaces, ["Node", "Named"]);
        assert_eq!(user.fields.keys().collect::<Vec<_>>(), ["id", "name"]);
    }

    #[test]
    fn conflicting_descriptions_are_rejected() {
        let a = schema(r#"type T { "one" f: Int }"#);
        let b = schema(r#"type T { "two" f: Int }"#);
        let err = merge_schemas(&a, &b).unwrap_err();
        assert!(matches!(err, FederationError::MergeConflict { ref location, .. } if location == "T.f"), "{err}");
    }

    #[test]
    fn a_single_description_wins() {
        let a = schema("type T { f: Int }");
        let b = schema(r#"type T { "documented" f: Int }"#);
        let merged = merge_schemas(&a, &b).unwrap();
        assert_eq!(
            merged.field("T", "f").unwrap().description.as_deref(),
            Some("documented")
        );
    }

    #[test]
    fn field_type_mismatch_is_rejected() {
        let a = schema("type T { f: [Int!] }");
        let b = schema("type T { f: [Int] }");
        assert!(matches!(
            merge_schemas(&a, &b),
            Err(FederationError::MergeConflict { .. })
        ));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let a = schema("type T { f: Int }");
        let b = schema("interface T { f: Int }");
        let err = merge_schemas(&a, &b).unwrap_err();
        assert!(err.to_string().contains("object"), "{err}");
    }

    #[test]
    fn argument_defaults_must_agree() {
        let a = schema("type Query { f(n: Int = 1): Int }");
        let b = schema("type Query { f(n: Int = 2): Int }");
        assert!(merge_schemas(&a, &b).is_err());

        let c = schema("type Query { f(n: Int, m: String): Int }");
        let merged = merge_schemas(&a, &c).unwrap();
        let arguments = &merged.field("Query", "f").unwrap().arguments;
        assert_eq!(arguments["n"].default_value.as_deref(), Some("1"));
        assert!(arguments.contains_key("m"));
    }

    #[test]
    fn union_members_and_enum_values_are_unioned() {
        let a = schema("type A { id: ID } union U = A enum E { X }");
        let b = schema("type B { id: ID } union U = B enum E { Y }");
        let merged = merge_schemas(&a, &b).unwrap();
        let TypeDef::Union(union) = &merged.types["U"] else {
            panic!("U should be a union");
        };
        assert_eq!(union.members, ["A", "B"]);
        let TypeDef::Enum(e) = &merged.types["E"] else {
            panic!("E should be an enum");
        };
        assert_eq!(e.values.keys().collect::<Vec<_>>(), ["X", "Y"]);
    }

    const EXCLUDABLE: &str = r#"
        type Query {
          user(filter: Filter): User
          secret: Secret
          count(filter: Filter): Int
        }
        type User { id: ID }
        type Secret { value: String }
        input Filter { id: ID }
        union Anything = User | Secret
    "#;

    #[test]
    fn copy_rejects_excluded_type_still_referenced() {
        let source = schema(EXCLUDABLE);
        let exclusions = Exclusions::parse(["Secret"]).unwrap();
        let err = copy_schema(&source, &exclusions).unwrap_err();
        assert!(matches!(
            err,
            FederationError::ExcludedTypeReferenced { ref type_name, ref referenced_by }
                if type_name == "Secret" && referenced_by == "Query.secret"
        ));
    }

    #[test]
    fn copy_honours_type_field_and_argument_exclusions() {
        let source = schema(EXCLUDABLE);
        let exclusions =
            Exclusions::parse(["Secret", "Query.secret", "Filter", "Query.user.filter", "Query.count"])
                .unwrap();
        let copy = copy_schema(&source, &exclusions).unwrap();
        copy.validate().unwrap();

        assert!(!copy.types.contains_key("Secret"));
        assert!(!copy.types.contains_key("Filter"));
        let query = copy.types["Query"].fields().unwrap();
        assert_eq!(query.keys().collect::<Vec<_>>(), ["user"]);
        assert!(query["user"].arguments.is_empty());
        let TypeDef::Union(anything) = &copy.types["Anything"] else {
            panic!("Anything should be a union");
        };
        assert_eq!(anything.members, ["User"]);
        // The source is untouched.
        assert!(source.field("Query", "user").unwrap().arguments.contains_key("filter"));
    }

    #[test]
    fn copy_rejects_excluded_argument_type() {
        let source = schema(EXCLUDABLE);
        let exclusions = Exclusions::parse(["Filter", "Query.count"]).unwrap();
        let err = copy_schema(&source, &exclusions).unwrap_err();
        assert!(err.to_string().contains("Query.user(filter:)"), "{err}");
    }

    #[test]
    fn copy_excludes_directive_arguments() {
        let source = schema(
            "directive @tag(name: String, scope: Filter) on FIELD_DEFINITION input Filter { id: ID } type Query { a: Int }",
        );
        let exclusions = Exclusions::parse(["Filter", "@tag.scope"]).unwrap();
        let copy = copy_schema(&source, &exclusions).unwrap();
        assert_eq!(
            copy.directives["tag"].arguments.keys().collect::<Vec<_>>(),
            ["name"]
        );

        let exclusions = Exclusions::parse(["@tag"]).unwrap();
        assert!(copy_schema(&source, &exclusions).unwrap().directives.is_empty());
    }

    #[test]
    fn copy_excludes_enum_values() {
        let source = schema("enum Role { ADMIN USER GUEST } type Query { role: Role }");
        let exclusions = Exclusions::parse(["Role.ADMIN"]).unwrap();
        let copy = copy_schema(&source, &exclusions).unwrap();
        let TypeDef::Enum(role) = &copy.types["Role"] else {
            panic!("Role should be an enum");
        };
        assert_eq!(role.values.keys().collect::<Vec<_>>(), ["USER", "GUEST"]);
    }

    #[test]
    fn exclusion_paths_are_validated() {
        assert!(Exclusions::parse(["A.b.c.d"]).is_err());
        assert!(Exclusions::parse(["A..b"]).is_err());
        assert!(Exclusions::parse(Vec::<String>::new()).unwrap().is_empty());
    }
}
