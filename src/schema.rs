//! Owned, name-indexed model of a GraphQL type system.
//!
//! Types reference each other by name only. Building a schema is therefore a
//! two step affair: every definition is first collected into the `types` map,
//! then [`Schema::validate`] checks that every reference resolves. This is what
//! lets mutually recursive types exist without any deferred construction.

use std::fmt::{self, Display, Formatter, Write};

use graphql_parser::schema::{self as ast, Definition, TypeDefinition, TypeExtension};
use indexmap::IndexMap;

use crate::error::{FederationError, Result};
use crate::operation_printer::print_value;

pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];
pub const BUILTIN_DIRECTIVES: [&str; 4] = ["include", "skip", "deprecated", "specifiedBy"];
const DEFAULT_DEPRECATION_REASON: &str = "No longer supported";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    /// The innermost named type, with every list and non-null wrapper removed.
    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    pub(crate) fn from_ast(ty: &ast::Type<'static, String>) -> Self {
        match ty {
            ast::Type::NamedType(name) => TypeRef::Named(name.clone()),
            ast::Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            ast::Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl Display for TypeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeKind::Scalar => "scalar",
            TypeKind::Object => "object",
            TypeKind::Interface => "interface",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::InputObject => "input object",
        })
    }
}

/// Root operation kinds a schema can designate a type for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootKind {
    Query,
    Mutation,
    Subscription,
}

/// Arguments, input object fields and directive arguments.
///
/// Default values are stored as their literal GraphQL text, which is how
/// introspection reports them.
#[derive(Clone, Debug, PartialEq)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub value_type: TypeRef,
    pub default_value: Option<String>,
    pub deprecation_reason: Option<String>,
}

impl InputValueDef {
    pub fn new(name: impl Into<String>, value_type: TypeRef) -> Self {
        InputValueDef {
            name: name.into(),
            description: None,
            value_type,
            default_value: None,
            deprecation_reason: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: IndexMap<String, InputValueDef>,
    pub field_type: TypeRef,
    pub deprecation_reason: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: TypeRef) -> Self {
        FieldDef {
            name: name.into(),
            description: None,
            arguments: IndexMap::new(),
            field_type,
            deprecation_reason: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub deprecation_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarType {
    pub name: String,
    pub description: Option<String>,
}

/// Shared shape of object and interface types.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectType {
    pub name: String,
    pub description: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: IndexMap<String, FieldDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionType {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub description: Option<String>,
    pub values: IndexMap<String, EnumValueDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InputObjectType {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, InputValueDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeDef {
    Scalar(ScalarType),
    Object(ObjectType),
    Interface(ObjectType),
    Union(UnionType),
    Enum(EnumType),
    InputObject(InputObjectType),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Scalar(t) => &t.name,
            TypeDef::Object(t) | TypeDef::Interface(t) => &t.name,
            TypeDef::Union(t) => &t.name,
            TypeDef::Enum(t) => &t.name,
            TypeDef::InputObject(t) => &t.name,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            TypeDef::Scalar(t) => t.description.as_deref(),
            TypeDef::Object(t) | TypeDef::Interface(t) => t.description.as_deref(),
            TypeDef::Union(t) => t.description.as_deref(),
            TypeDef::Enum(t) => t.description.as_deref(),
            TypeDef::InputObject(t) => t.description.as_deref(),
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            TypeDef::Scalar(_) => TypeKind::Scalar,
            TypeDef::Object(_) => TypeKind::Object,
            TypeDef::Interface(_) => TypeKind::Interface,
            TypeDef::Union(_) => TypeKind::Union,
            TypeDef::Enum(_) => TypeKind::Enum,
            TypeDef::InputObject(_) => TypeKind::InputObject,
        }
    }

    /// Output fields, for object and interface types.
    pub fn fields(&self) -> Option<&IndexMap<String, FieldDef>> {
        match self {
            TypeDef::Object(t) | TypeDef::Interface(t) => Some(&t.fields),
            _ => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut IndexMap<String, FieldDef>> {
        match self {
            TypeDef::Object(t) | TypeDef::Interface(t) => Some(&mut t.fields),
            _ => None,
        }
    }

    fn is_input_type(&self) -> bool {
        matches!(
            self,
            TypeDef::Scalar(_) | TypeDef::Enum(_) | TypeDef::InputObject(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirectiveDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: IndexMap<String, InputValueDef>,
    pub locations: Vec<String>,
    pub repeatable: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    pub types: IndexMap<String, TypeDef>,
    pub directives: IndexMap<String, DirectiveDef>,
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
}

impl Schema {
    /// Parses SDL into a schema. Built-in scalars are always present and the
    /// root types default to `Query`, `Mutation` and `Subscription` when no
    /// `schema { ... }` block names them.
    pub fn parse(sdl: &str) -> Result<Schema> {
        let document = ast::parse_schema::<String>(sdl)
            .map_err(|e| FederationError::SchemaParse(e.to_string()))?
            .into_static();

        let mut schema = Schema::default();
        for name in BUILTIN_SCALARS {
            schema.types.insert(
                name.to_string(),
                TypeDef::Scalar(ScalarType {
                    name: name.to_string(),
                    description: None,
                }),
            );
        }

        let mut explicit_roots = false;
        let mut extensions = Vec::new();
        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(def) => {
                    explicit_roots = true;
                    schema.query_type = def.query.clone();
                    schema.mutation_type = def.mutation.clone();
                    schema.subscription_type = def.subscription.clone();
                }
                Definition::TypeDefinition(def) => {
                    let typedef = convert_type_definition(def)?;
                    schema.types.insert(typedef.name().to_string(), typedef);
                }
                Definition::TypeExtension(ext) => extensions.push(ext),
                Definition::DirectiveDefinition(def) => {
                    let directive = DirectiveDef {
                        name: def.name.clone(),
                        description: def.description.clone(),
                        arguments: convert_input_values(&def.arguments)?,
                        locations: def
                            .locations
                            .iter()
                            .map(|l| l.as_str().to_string())
                            .collect(),
                        repeatable: def.repeatable,
                    };
                    schema.directives.insert(directive.name.clone(), directive);
                }
            }
        }

        for ext in extensions {
            schema.apply_extension(ext)?;
        }

        if !explicit_roots {
            let has_object = |name: &str| matches!(schema.types.get(name), Some(TypeDef::Object(_)));
            schema.query_type = has_object("Query").then(|| "Query".to_string());
            schema.mutation_type = has_object("Mutation").then(|| "Mutation".to_string());
            schema.subscription_type =
                has_object("Subscription").then(|| "Subscription".to_string());
        }

        Ok(schema)
    }

    fn apply_extension(&mut self, ext: &TypeExtension<'static, String>) -> Result<()> {
        let name = match ext {
            TypeExtension::Scalar(e) => &e.name,
            TypeExtension::Object(e) => &e.name,
            TypeExtension::Interface(e) => &e.name,
            TypeExtension::Union(e) => &e.name,
            TypeExtension::Enum(e) => &e.name,
            TypeExtension::InputObject(e) => &e.name,
        };
        let target = self
            .types
            .get_mut(name)
            .ok_or_else(|| FederationError::UnknownType(name.clone()))?;

        match (ext, target) {
            (TypeExtension::Scalar(_), TypeDef::Scalar(_)) => {}
            (TypeExtension::Object(e), TypeDef::Object(t)) => {
                t.interfaces.extend(e.implements_interfaces.iter().cloned());
                t.fields.extend(convert_fields(&e.fields)?);
            }
            (TypeExtension::Interface(e), TypeDef::Interface(t)) => {
                t.interfaces.extend(e.implements_interfaces.iter().cloned());
                t.fields.extend(convert_fields(&e.fields)?);
            }
            (TypeExtension::Union(e), TypeDef::Union(t)) => {
                t.members.extend(e.types.iter().cloned());
            }
            (TypeExtension::Enum(e), TypeDef::Enum(t)) => {
                t.values.extend(convert_enum_values(&e.values));
            }
            (TypeExtension::InputObject(e), TypeDef::InputObject(t)) => {
                t.fields.extend(convert_input_values(&e.fields)?);
            }
            (_, target) => {
                return Err(FederationError::InvalidSchema(format!(
                    "cannot extend {} `{}` with a different kind",
                    target.kind(),
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn root_type(&self, kind: RootKind) -> Option<&str> {
        match kind {
            RootKind::Query => self.query_type.as_deref(),
            RootKind::Mutation => self.mutation_type.as_deref(),
            RootKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.types.get(type_name)?.fields()?.get(field_name)
    }

    /// Checks that every type reference resolves inside this schema and that
    /// each reference points at a type of an acceptable kind.
    pub fn validate(&self) -> Result<()> {
        for root in [&self.query_type, &self.mutation_type, &self.subscription_type]
            .into_iter()
            .flatten()
        {
            match self.types.get(root) {
                Some(TypeDef::Object(_)) => {}
                Some(other) => {
                    return Err(invalid(format!(
                        "root type `{root}` must be an object, found {}",
                        other.kind()
                    )));
                }
                None => return Err(FederationError::UnknownType(root.clone())),
            }
        }

        for typedef in self.types.values() {
            match typedef {
                TypeDef::Scalar(_) | TypeDef::Enum(_) => {}
                TypeDef::Object(t) | TypeDef::Interface(t) => {
                    for interface in &t.interfaces {
                        match self.types.get(interface) {
                            Some(TypeDef::Interface(_)) => {}
                            Some(_) => {
                                return Err(invalid(format!(
                                    "`{}` implements `{interface}` which is not an interface",
                                    t.name
                                )));
                            }
                            None => return Err(FederationError::UnknownType(interface.clone())),
                        }
                    }
                    for field in t.fields.values() {
                        let location = format!("{}.{}", t.name, field.name);
                        self.check_reference(&location, &field.field_type, false)?;
                        for argument in field.arguments.values() {
                            let location = format!("{location}({}:)", argument.name);
                            self.check_reference(&location, &argument.value_type, true)?;
                        }
                    }
                }
                TypeDef::Union(t) => {
                    for member in &t.members {
                        match self.types.get(member) {
                            Some(TypeDef::Object(_)) => {}
                            Some(_) => {
                                return Err(invalid(format!(
                                    "union `{}` member `{member}` is not an object type",
                                    t.name
                                )));
                            }
                            None => return Err(FederationError::UnknownType(member.clone())),
                        }
                    }
                }
                TypeDef::InputObject(t) => {
                    for field in t.fields.values() {
                        let location = format!("{}.{}", t.name, field.name);
                        self.check_reference(&location, &field.value_type, true)?;
                    }
                }
            }
        }

        for directive in self.directives.values() {
            for argument in directive.arguments.values() {
                let location = format!("@{}({}:)", directive.name, argument.name);
                self.check_reference(&location, &argument.value_type, true)?;
            }
        }
        Ok(())
    }

    fn check_reference(&self, location: &str, ty: &TypeRef, input: bool) -> Result<()> {
        let name = ty.named_type();
        let typedef = self.types.get(name).ok_or_else(|| {
            invalid(format!("`{location}` references unknown type `{name}`"))
        })?;
        if input && !typedef.is_input_type() {
            return Err(invalid(format!(
                "`{location}` must be an input type, found {} `{name}`",
                typedef.kind()
            )));
        }
        if !input && matches!(typedef, TypeDef::InputObject(_)) {
            return Err(invalid(format!(
                "`{location}` must be an output type, found input object `{name}`"
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> FederationError {
    FederationError::InvalidSchema(message)
}

fn convert_type_definition(def: &TypeDefinition<'static, String>) -> Result<TypeDef> {
    Ok(match def {
        TypeDefinition::Scalar(t) => TypeDef::Scalar(ScalarType {
            name: t.name.clone(),
            description: t.description.clone(),
        }),
        TypeDefinition::Object(t) => TypeDef::Object(ObjectType {
            name: t.name.clone(),
            description: t.description.clone(),
            interfaces: t.implements_interfaces.clone(),
            fields: convert_fields(&t.fields)?,
        }),
        TypeDefinition::Interface(t) => TypeDef::Interface(ObjectType {
            name: t.name.clone(),
            description: t.description.clone(),
            interfaces: t.implements_interfaces.clone(),
            fields: convert_fields(&t.fields)?,
        }),
        TypeDefinition::Union(t) => TypeDef::Union(UnionType {
            name: t.name.clone(),
            description: t.description.clone(),
            members: t.types.clone(),
        }),
        TypeDefinition::Enum(t) => TypeDef::Enum(EnumType {
            name: t.name.clone(),
            description: t.description.clone(),
            values: convert_enum_values(&t.values),
        }),
        TypeDefinition::InputObject(t) => TypeDef::InputObject(InputObjectType {
            name: t.name.clone(),
            description: t.description.clone(),
            fields: convert_input_values(&t.fields)?,
        }),
    })
}

pub(crate) fn convert_fields(
    fields: &[ast::Field<'static, String>],
) -> Result<IndexMap<String, FieldDef>> {
    fields
        .iter()
        .map(|field| {
            let def = FieldDef {
                name: field.name.clone(),
                description: field.description.clone(),
                arguments: convert_input_values(&field.arguments)?,
                field_type: TypeRef::from_ast(&field.field_type),
                deprecation_reason: deprecation(&field.directives),
            };
            Ok((field.name.clone(), def))
        })
        .collect()
}

fn convert_input_values(
    values: &[ast::InputValue<'static, String>],
) -> Result<IndexMap<String, InputValueDef>> {
    values
        .iter()
        .map(|value| {
            let default_value = value
                .default_value
                .as_ref()
                .map(|v| {
                    let mut out = String::new();
                    print_value(&mut out, v).map(|_| out)
                })
                .transpose()
                .map_err(|_| invalid(format!("cannot print default of `{}`", value.name)))?;
            let def = InputValueDef {
                name: value.name.clone(),
                description: value.description.clone(),
                value_type: TypeRef::from_ast(&value.value_type),
                default_value,
                deprecation_reason: deprecation(&value.directives),
            };
            Ok((value.name.clone(), def))
        })
        .collect()
}

fn convert_enum_values(
    values: &[ast::EnumValue<'static, String>],
) -> IndexMap<String, EnumValueDef> {
    values
        .iter()
        .map(|value| {
            let def = EnumValueDef {
                name: value.name.clone(),
                description: value.description.clone(),
                deprecation_reason: deprecation(&value.directives),
            };
            (value.name.clone(), def)
        })
        .collect()
}

fn deprecation(directives: &[ast::Directive<'static, String>]) -> Option<String> {
    let directive = directives.iter().find(|d| d.name == "deprecated")?;
    let reason = directive
        .arguments
        .iter()
        .find(|(name, _)| name == "reason")
        .and_then(|(_, value)| match value {
            ast::Value::String(reason) => Some(reason.clone()),
            _ => None,
        });
    Some(reason.unwrap_or_else(|| DEFAULT_DEPRECATION_REASON.to_string()))
}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let default_roots = self.query_type.as_deref().is_none_or(|n| n == "Query")
            && self.mutation_type.as_deref().is_none_or(|n| n == "Mutation")
            && self
                .subscription_type
                .as_deref()
                .is_none_or(|n| n == "Subscription");
        let mut blocks = Vec::new();

        if !default_roots {
            let mut block = String::from("schema {\n");
            for (label, root) in [
                ("query", &self.query_type),
                ("mutation", &self.mutation_type),
                ("subscription", &self.subscription_type),
            ] {
                if let Some(root) = root {
                    writeln!(block, "  {label}: {root}")?;
                }
            }
            block.push('}');
            blocks.push(block);
        }

        for directive in self.directives.values() {
            if BUILTIN_DIRECTIVES.contains(&directive.name.as_str()) {
                continue;
            }
            let mut block = String::new();
            write_description(&mut block, directive.description.as_deref(), "")?;
            write!(block, "directive @{}", directive.name)?;
            write_arguments(&mut block, &directive.arguments)?;
            if directive.repeatable {
                block.push_str(" repeatable");
            }
            write!(block, " on {}", directive.locations.join(" | "))?;
            blocks.push(block);
        }

        for typedef in self.types.values() {
            if BUILTIN_SCALARS.contains(&typedef.name()) || typedef.name().starts_with("__") {
                continue;
            }
            let mut block = String::new();
            write_description(&mut block, typedef.description(), "")?;
            match typedef {
                TypeDef::Scalar(t) => write!(block, "scalar {}", t.name)?,
                TypeDef::Object(t) | TypeDef::Interface(t) => {
                    let keyword = if typedef.kind() == TypeKind::Object {
                        "type"
                    } else {
                        "interface"
                    };
                    write!(block, "{keyword} {}", t.name)?;
                    if !t.interfaces.is_empty() {
                        write!(block, " implements {}", t.interfaces.join(" & "))?;
                    }
                    block.push_str(" {\n");
                    for field in t.fields.values() {
                        write_description(&mut block, field.description.as_deref(), "  ")?;
                        write!(block, "  {}", field.name)?;
                        write_arguments(&mut block, &field.arguments)?;
                        write!(block, ": {}", field.field_type)?;
                        write_deprecation(&mut block, field.deprecation_reason.as_deref())?;
                        block.push('\n');
                    }
                    block.push('}');
                }
                TypeDef::Union(t) => {
                    write!(block, "union {} = {}", t.name, t.members.join(" | "))?
                }
                TypeDef::Enum(t) => {
                    writeln!(block, "enum {} {{", t.name)?;
                    for value in t.values.values() {
                        write_description(&mut block, value.description.as_deref(), "  ")?;
                        write!(block, "  {}", value.name)?;
                        write_deprecation(&mut block, value.deprecation_reason.as_deref())?;
                        block.push('\n');
                    }
                    block.push('}');
                }
                TypeDef::InputObject(t) => {
                    writeln!(block, "input {} {{", t.name)?;
                    for field in t.fields.values() {
                        write_description(&mut block, field.description.as_deref(), "  ")?;
                        block.push_str("  ");
                        write_input_value(&mut block, field)?;
                        block.push('\n');
                    }
                    block.push('}');
                }
            }
            blocks.push(block);
        }

        f.write_str(&blocks.join("\n\n"))?;
        f.write_char('\n')
    }
}

fn write_description(out: &mut String, description: Option<&str>, indent: &str) -> fmt::Result {
    if let Some(description) = description {
        if description.contains('\n') {
            writeln!(out, "{indent}\"\"\"")?;
            for line in description.lines() {
                writeln!(out, "{indent}{}", line.replace("\"\"\"", "\\\"\"\""))?;
            }
            writeln!(out, "{indent}\"\"\"")?;
        } else {
            writeln!(out, "{indent}{}", serde_json::Value::from(description))?;
        }
    }
    Ok(())
}

fn write_arguments(out: &mut String, arguments: &IndexMap<String, InputValueDef>) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    out.push('(');
    for (i, argument) in arguments.values().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_input_value(out, argument)?;
    }
    out.push(')');
    Ok(())
}

fn write_input_value(out: &mut String, value: &InputValueDef) -> fmt::Result {
    write!(out, "{}: {}", value.name, value.value_type)?;
    if let Some(default) = &value.default_value {
        write!(out, " = {default}")?;
    }
    write_deprecation(out, value.deprecation_reason.as_deref())
}

fn write_deprecation(out: &mut String, reason: Option<&str>) -> fmt::Result {
    match reason {
        Some(DEFAULT_DEPRECATION_REASON) => out.push_str(" @deprecated"),
        Some(reason) => write!(
            out,
            " @deprecated(reason: {})",
            serde_json::Value::from(reason)
        )?,
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SDL: &str = r#"
        type Query {
          user(id: ID!): User
          search(term: String = "x"): [Result!]!
        }

        interface Node {
          id: ID!
        }

        type User implements Node {
          id: ID!
          "The display name"
          name: String @deprecated(reason: "use fullName")
          friends: [User]
        }

        union Result = User

        enum Role {
          ADMIN
          GUEST @deprecated
        }

        input Filter {
          role: Role = ADMIN
        }

        extend type User {
          role(filter: Filter): Role
        }
    "#;

    #[test]
    fn parses_types_and_extensions() {
        let schema = Schema::parse(SDL).unwrap();
        schema.validate().unwrap();

        assert_eq!(schema.query_type.as_deref(), Some("Query"));
        assert_eq!(schema.mutation_type, None);
        let user = schema.types["User"].fields().unwrap();
        assert_eq!(
            user.keys().collect::<Vec<_>>(),
            ["id", "name", "friends", "role"]
        );
        assert_eq!(user["name"].description.as_deref(), Some("The display name"));
        assert_eq!(
            user["name"].deprecation_reason.as_deref(),
            Some("use fullName")
        );
        assert_eq!(user["friends"].field_type.to_string(), "[User]");
        let search = schema.field("Query", "search").unwrap();
        assert_eq!(search.arguments["term"].default_value.as_deref(), Some("\"x\""));
        assert_eq!(search.field_type.named_type(), "Result");
    }

    #[test]
    fn validate_rejects_dangling_reference() {
        let schema = Schema::parse("type Query { missing: Nowhere }").unwrap();
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("Nowhere"), "{err}");
    }

    #[test]
    fn validate_rejects_non_object_union_member() {
        let schema = Schema::parse("type Query { a: U } union U = Int").unwrap();
        assert!(matches!(
            schema.validate(),
            Err(FederationError::InvalidSchema(_))
        ));
    }

    #[test]
    fn printed_sdl_parses_back_to_the_same_schema() {
        let schema = Schema::parse(SDL).unwrap();
        let printed = schema.to_string();
        assert!(printed.contains("type User implements Node {"), "{printed}");
        assert!(printed.contains("GUEST @deprecated\n"), "{printed}");
        assert_eq!(Schema::parse(&printed).unwrap(), schema);
    }
}
