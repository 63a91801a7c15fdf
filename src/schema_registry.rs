use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{FederationError, Result};
use crate::federation_gateway::CustomRootValue;
use crate::introspection::introspect;
use crate::query_executor::{HeaderPolicy, HttpQueryExecutor, LocalExecutor, QueryExecutor, Upstream};
use crate::schema::{Schema, TypeDef, convert_fields};
use crate::type_algebra::{Exclusions, copy_schema, merge_schemas};
use crate::OriginId;

/// One registered source of truth for part of the merged schema.
#[derive(Clone, Debug)]
pub struct Origin {
    pub id: OriginId,
    pub schema: Schema,
    pub upstream: Upstream,
    pub proxy_errors: bool,
    pub proxy_extensions: bool,
}

impl Origin {
    /// Tag used to attribute errors and extensions to this origin.
    pub fn tag(&self) -> String {
        format!("remote_{}", self.id)
    }
}

/// Options for [`SchemaRegistry::add_remote_schema`].
#[derive(Clone, Debug)]
pub struct RemoteSchemaOptions {
    pub headers: HeaderPolicy,
    pub exclusions: Exclusions,
    pub proxy_errors: bool,
    pub proxy_extensions: bool,
}

impl Default for RemoteSchemaOptions {
    fn default() -> Self {
        RemoteSchemaOptions {
            headers: HeaderPolicy::default(),
            exclusions: Exclusions::default(),
            proxy_errors: true,
            proxy_extensions: true,
        }
    }
}

/// Which origins may serve each field, and the named type each field returns.
#[derive(Clone, Debug, Default)]
pub struct OwnershipIndex {
    owners: HashMap<String, HashMap<String, BTreeSet<OriginId>>>,
    field_types: HashMap<String, HashMap<String, String>>,
}

impl OwnershipIndex {
    pub fn build(origins: &[Origin], merged: &Schema) -> Self {
        let mut index = OwnershipIndex::default();
        for origin in origins {
            for (type_name, typedef) in &origin.schema.types {
                let Some(fields) = typedef.fields() else {
                    continue;
                };
                let owners = index.owners.entry(type_name.clone()).or_default();
                for field_name in fields.keys() {
                    owners
                        .entry(field_name.clone())
                        .or_default()
                        .insert(origin.id);
                }
            }
        }
        for (type_name, typedef) in &merged.types {
            let Some(fields) = typedef.fields() else {
                continue;
            };
            index.field_types.insert(
                type_name.clone(),
                fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.field_type.named_type().to_string()))
                    .collect(),
            );
        }
        index
    }

    pub fn owners(&self, type_name: &str, field: &str) -> Option<&BTreeSet<OriginId>> {
        self.owners.get(type_name)?.get(field)
    }

    pub fn owns(&self, origin: OriginId, type_name: &str, field: &str) -> bool {
        self.owners(type_name, field)
            .is_some_and(|owners| owners.contains(&origin))
    }

    pub fn field_type(&self, type_name: &str, field: &str) -> Option<&str> {
        self.field_types.get(type_name)?.get(field).map(String::as_str)
    }
}

/// Declared `(OwnerType, field) -> key field` relations.
#[derive(Clone, Debug, Default)]
pub struct ForeignKeys(HashMap<(String, String), String>);

impl ForeignKeys {
    pub fn insert(&mut self, type_name: &str, field: &str, key_field: &str) {
        self.0.insert(
            (type_name.to_string(), field.to_string()),
            key_field.to_string(),
        );
    }

    pub fn key_field(&self, type_name: &str, field: &str) -> Option<&str> {
        self.0
            .get(&(type_name.to_string(), field.to_string()))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.0
            .iter()
            .map(|((type_name, field), key)| (type_name.as_str(), field.as_str(), key.as_str()))
    }
}

/// Fields left out of the root split and resolved on demand instead.
#[derive(Clone, Debug, Default)]
pub struct DelayedFields(HashMap<String, HashSet<String>>);

impl DelayedFields {
    pub fn contains(&self, type_name: &str, field: &str) -> bool {
        self.0
            .get(type_name)
            .is_some_and(|fields| fields.contains(field))
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(type_name, fields)| {
            fields
                .iter()
                .map(move |field| (type_name.as_str(), field.as_str()))
        })
    }
}

/// Everything a request needs, built once by [`SchemaRegistry::get_final_schema`]
/// and shared read-only across requests.
#[derive(Debug)]
pub struct FederationConfig {
    pub schema: Schema,
    pub origins: Vec<Origin>,
    pub ownership: OwnershipIndex,
    pub foreign_keys: ForeignKeys,
    pub delayed_fields: DelayedFields,
    pub root_value: Option<CustomRootValue>,
}

impl FederationConfig {
    pub fn origin(&self, id: OriginId) -> Result<&Origin> {
        self.origins.get(id).ok_or(FederationError::UnknownOrigin(id))
    }
}

/// Setup-phase registry of origins and federation rules.
///
/// Every mutation drops the cached [`FederationConfig`], so the next call to
/// [`SchemaRegistry::get_final_schema`] rebuilds the merged schema and indices.
pub struct SchemaRegistry {
    origins: Vec<Origin>,
    foreign_keys: ForeignKeys,
    delayed_fields: DelayedFields,
    root_value: Option<CustomRootValue>,
    executor: Arc<dyn QueryExecutor>,
    federated_schema: Option<Arc<FederationConfig>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(HttpQueryExecutor::new()))
    }

    pub fn with_executor(executor: Arc<dyn QueryExecutor>) -> Self {
        SchemaRegistry {
            origins: Vec::new(),
            foreign_keys: ForeignKeys::default(),
            delayed_fields: DelayedFields::default(),
            root_value: None,
            executor,
            federated_schema: None,
        }
    }

    pub fn executor(&self) -> Arc<dyn QueryExecutor> {
        self.executor.clone()
    }

    fn register(&mut self, schema: Schema, upstream: Upstream, proxy_errors: bool, proxy_extensions: bool) -> OriginId {
        let id = self.origins.len();
        info!(origin = id, upstream = ?upstream, types = schema.types.len(), "registered origin");
        self.origins.push(Origin {
            id,
            schema,
            upstream,
            proxy_errors,
            proxy_extensions,
        });
        self.federated_schema = None;
        id
    }

    /// Registers a schema executed in-process.
    pub fn add_schema<E>(&mut self, schema: &Schema, executor: E) -> Result<OriginId>
    where
        E: LocalExecutor + 'static,
    {
        schema.validate()?;
        let schema = copy_schema(schema, &Exclusions::default())?;
        Ok(self.register(schema, Upstream::Local(Arc::new(executor)), true, true))
    }

    /// Registers a remote origin, fetching its schema through introspection.
    pub async fn add_remote_schema(
        &mut self,
        url: &str,
        options: RemoteSchemaOptions,
    ) -> Result<OriginId> {
        let headers = options.headers.resolve(&Default::default());
        let schema = introspect(self.executor.as_ref(), url, &headers).await?;
        self.add_introspected(url, schema, options)
    }

    /// Registers a remote origin whose SDL is already known.
    pub fn add_remote_schema_with_sdl(
        &mut self,
        url: &str,
        sdl: &str,
        options: RemoteSchemaOptions,
    ) -> Result<OriginId> {
        self.add_introspected(url, Schema::parse(sdl)?, options)
    }

    fn add_introspected(
        &mut self,
        url: &str,
        schema: Schema,
        options: RemoteSchemaOptions,
    ) -> Result<OriginId> {
        let schema = copy_schema(&schema, &options.exclusions)?;
        schema.validate()?;
        let upstream = Upstream::Remote {
            url: url.to_string(),
            headers: options.headers,
        };
        Ok(self.register(
            schema,
            upstream,
            options.proxy_errors,
            options.proxy_extensions,
        ))
    }

    pub fn add_foreign_key(&mut self, type_name: &str, field: &str, key_field: &str) {
        debug!(type_name, field, key_field, "declared foreign key");
        self.foreign_keys.insert(type_name, field, key_field);
        self.federated_schema = None;
    }

    pub fn add_delayed_fields<I, S, F>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (S, F)>,
        S: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        for (type_name, names) in fields {
            self.delayed_fields
                .0
                .entry(type_name.into())
                .or_default()
                .extend(names.into_iter().map(Into::into));
        }
        self.federated_schema = None;
    }

    /// Adds a field, written as an SDL field definition such as
    /// `tags(first: Int): [String!]`, to every origin that defines `type_name`.
    pub fn insert_field(&mut self, type_name: &str, field_signature: &str) -> Result<()> {
        let document = graphql_parser::parse_schema::<String>(&format!(
            "type {type_name} {{ {field_signature} }}"
        ))
        .map_err(|e| FederationError::SchemaParse(e.to_string()))?
        .into_static();
        let fields = match document.definitions.first() {
            Some(graphql_parser::schema::Definition::TypeDefinition(
                graphql_parser::schema::TypeDefinition::Object(object),
            )) => convert_fields(&object.fields)?,
            _ => {
                return Err(FederationError::SchemaParse(format!(
                    "invalid field signature `{field_signature}`"
                )));
            }
        };

        let mut inserted = false;
        for origin in &mut self.origins {
            if let Some(target) = origin
                .schema
                .types
                .get_mut(type_name)
                .and_then(TypeDef::fields_mut)
            {
                target.extend(fields.clone());
                inserted = true;
            }
        }
        if !inserted {
            return Err(FederationError::UnknownType(type_name.to_string()));
        }
        self.federated_schema = None;
        Ok(())
    }

    pub fn set_root_value(&mut self, root_value: CustomRootValue) {
        self.root_value = Some(root_value);
        self.federated_schema = None;
    }

    pub fn get_sub_schema(&self, origin: OriginId) -> Result<&Schema> {
        self.origins
            .get(origin)
            .map(|origin| &origin.schema)
            .ok_or(FederationError::UnknownOrigin(origin))
    }

    /// Builds, or returns the cached, merged schema and request-time indices.
    ///
    /// Every configuration inconsistency surfaces here: merge conflicts,
    /// dangling type references, and foreign keys or delayed fields naming
    /// fields the merged schema does not have.
    pub fn get_final_schema(&mut self) -> Result<Arc<FederationConfig>> {
        if let Some(config) = &self.federated_schema {
            return Ok(config.clone());
        }

        let mut origins = self.origins.iter();
        let first = origins
            .next()
            .ok_or_else(|| FederationError::InvalidSchema("no origin registered".to_string()))?;
        for origin in &self.origins {
            origin.schema.validate()?;
        }
        let merged = origins.try_fold(copy_schema(&first.schema, &Exclusions::default())?, |merged, origin| {
            merge_schemas(&merged, &origin.schema)
        })?;
        merged.validate()?;

        for (type_name, field, key_field) in self.foreign_keys.iter() {
            let definition = merged.field(type_name, field).ok_or_else(|| {
                FederationError::UnknownField {
                    type_name: type_name.to_string(),
                    field_name: field.to_string(),
                }
            })?;
            let target = definition.field_type.named_type();
            if merged.field(target, key_field).is_none() {
                return Err(FederationError::UnknownField {
                    type_name: target.to_string(),
                    field_name: key_field.to_string(),
                });
            }
        }
        for (type_name, field) in self.delayed_fields.iter() {
            if merged.field(type_name, field).is_none() {
                return Err(FederationError::UnknownField {
                    type_name: type_name.to_string(),
                    field_name: field.to_string(),
                });
            }
        }

        let ownership = OwnershipIndex::build(&self.origins, &merged);
        let config = Arc::new(FederationConfig {
            schema: merged,
            origins: self.origins.clone(),
            ownership,
            foreign_keys: self.foreign_keys.clone(),
            delayed_fields: self.delayed_fields.clone(),
            root_value: self.root_value.clone(),
        });
        info!(origins = config.origins.len(), types = config.schema.types.len(), "built merged schema");
        self.federated_schema = Some(config.clone());
        Ok(config)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphQLResponse;
    use crate::query_executor::LocalRequest;
    use pretty_assertions::assert_eq;

    fn noop(_: LocalRequest<'_>) -> GraphQLResponse {
        GraphQLResponse::default()
    }

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        let users = Schema::parse("type Query { user: User } type User { id: ID name: String }").unwrap();
        let orders = Schema::parse(
            "type Query { orders: [Order] } type Order { id: ID buyer: User } type User { id: ID }",
        )
        .unwrap();
        registry.add_schema(&users, noop).unwrap();
        registry.add_schema(&orders, noop).unwrap();
        registry
    }

    #[test]
    fn builds_ownership_and_field_types() {
        let mut registry = registry();
        let config = registry.get_final_schema().unwrap();

        assert_eq!(config.ownership.owners("Query", "user"), Some(&BTreeSet::from([0])));
        assert_eq!(config.ownership.owners("User", "id"), Some(&BTreeSet::from([0, 1])));
        assert!(config.ownership.owns(1, "Order", "buyer"));
        assert!(!config.ownership.owns(1, "User", "name"));
        assert_eq!(config.ownership.field_type("Query", "orders"), Some("Order"));
        assert_eq!(config.origins[1].tag(), "remote_1");
    }

    #[test]
    fn final_schema_is_cached_until_the_registry_changes() {
        let mut registry = registry();
        let first = registry.get_final_schema().unwrap();
        let second = registry.get_final_schema().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.add_foreign_key("Order", "buyer", "id");
        let third = registry.get_final_schema().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.foreign_keys.key_field("Order", "buyer"), Some("id"));
    }

    #[test]
    fn dangling_foreign_keys_are_fatal() {
        let mut registry = registry();
        registry.add_foreign_key("Order", "seller", "id");
        assert!(matches!(
            registry.get_final_schema(),
            Err(FederationError::UnknownField { field_name, .. }) if field_name == "seller"
        ));

        let mut registry = self::registry();
        registry.add_foreign_key("Order", "buyer", "email");
        assert!(registry.get_final_schema().is_err());
    }

    #[test]
    fn unknown_delayed_fields_are_fatal() {
        let mut registry = registry();
        registry.add_delayed_fields([("User", ["nickname"])]);
        assert!(registry.get_final_schema().is_err());
    }

    #[test]
    fn merge_conflicts_surface_when_building() {
        let mut registry = registry();
        let conflicting = Schema::parse("type User { id: String }").unwrap();
        registry.add_schema(&conflicting, noop).unwrap();
        assert!(matches!(
            registry.get_final_schema(),
            Err(FederationError::MergeConflict { .. })
        ));
    }

    #[test]
    fn inserted_fields_are_owned_by_every_defining_origin() {
        let mut registry = registry();
        registry.insert_field("User", "tags(first: Int): [String!]").unwrap();
        let config = registry.get_final_schema().unwrap();

        assert_eq!(config.ownership.owners("User", "tags"), Some(&BTreeSet::from([0, 1])));
        let tags = config.schema.field("User", "tags").unwrap();
        assert_eq!(tags.field_type.to_string(), "[String!]");
        assert!(tags.arguments.contains_key("first"));

        assert!(matches!(
            registry.insert_field("Missing", "x: Int"),
            Err(FederationError::UnknownType(_))
        ));
    }

    #[test]
    fn remote_sdl_origins_apply_exclusions() {
        let mut registry = SchemaRegistry::new();
        let options = RemoteSchemaOptions {
            exclusions: Exclusions::parse(["Query.internal"]).unwrap(),
            proxy_errors: false,
            ..Default::default()
        };
        let id = registry
            .add_remote_schema_with_sdl(
                "http://localhost/graphql",
                "type Query { public: Int internal: Int }",
                options,
            )
            .unwrap();
        let schema = registry.get_sub_schema(id).unwrap();
        assert!(schema.field("Query", "public").is_some());
        assert!(schema.field("Query", "internal").is_none());
        assert!(registry.get_sub_schema(7).is_err());
    }
}
