use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::info;

use crate::OriginId;
use crate::error::{FederationError, Result};
use crate::federation_gateway::FederationGateway;
use crate::query_executor::HeaderPolicy;
use crate::resolvers::{ForeignKeyResolver, ProxyFieldResolver};
use crate::schema::{RootKind, TypeDef};
use crate::schema_registry::{FederationConfig, RemoteSchemaOptions, SchemaRegistry};
use crate::type_algebra::Exclusions;

/// The supergraph file: every subgraph plus the federation rules between them.
#[derive(Debug, Default, Deserialize)]
pub struct SupergraphConfig {
    pub subgraphs: IndexMap<String, SubgraphConfig>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyConfig>,
    #[serde(default)]
    pub delayed_fields: HashMap<String, Vec<String>>,
    /// Template resolvers for fields outside the foreign keys, typically
    /// nested delayed fields.
    #[serde(default)]
    pub field_resolvers: Vec<FieldResolverConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SubgraphConfig {
    pub routing_url: String,
    /// Without a schema file the subgraph is introspected at startup.
    pub schema: Option<SchemaConfig>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Dotted paths: `Type`, `Type.field`, `Type.field.argument`, `@directive`.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "enabled")]
    pub proxy_errors: bool,
    #[serde(default = "enabled")]
    pub proxy_extensions: bool,
}

#[derive(Debug, Deserialize)]
pub struct SchemaConfig {
    pub file: String,
}

#[derive(Debug, Deserialize)]
pub struct ForeignKeyConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub field: String,
    pub key: String,
    /// How the stub is expanded. Without it the key-only object is returned.
    pub resolve: Option<ResolveConfig>,
}

#[derive(Debug, Deserialize)]
pub struct FieldResolverConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub field: String,
    #[serde(flatten)]
    pub resolve: ResolveConfig,
}

#[derive(Debug, Deserialize)]
pub struct ResolveConfig {
    pub subgraph: String,
    /// A named operation with a single `__FIELDS` placeholder.
    pub query: String,
    /// Template variable to parent attribute, when the names differ.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

fn enabled() -> bool {
    true
}

impl SupergraphConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| FederationError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading supergraph config");
        let contents = fs::read_to_string(path)
            .map_err(|e| FederationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }

    /// Registers every subgraph and rule with `registry`. Schema files are
    /// resolved relative to `base_dir`. Returns the origin of each subgraph.
    pub async fn load_into(
        &self,
        base_dir: &Path,
        registry: &mut SchemaRegistry,
    ) -> Result<IndexMap<String, OriginId>> {
        let mut origins = IndexMap::new();
        for (name, subgraph) in &self.subgraphs {
            let options = RemoteSchemaOptions {
                headers: forwarding_headers(subgraph.headers.clone()),
                exclusions: Exclusions::parse(&subgraph.exclude)?,
                proxy_errors: subgraph.proxy_errors,
                proxy_extensions: subgraph.proxy_extensions,
            };
            let origin = match &subgraph.schema {
                Some(schema) => {
                    let sdl = read_schema_file(base_dir, &schema.file)?;
                    registry.add_remote_schema_with_sdl(&subgraph.routing_url, &sdl, options)?
                }
                None => {
                    registry
                        .add_remote_schema(&subgraph.routing_url, options)
                        .await?
                }
            };
            info!(subgraph = %name, origin, url = %subgraph.routing_url, "registered subgraph");
            origins.insert(name.clone(), origin);
        }

        for key in &self.foreign_keys {
            registry.add_foreign_key(&key.type_name, &key.field, &key.key);
        }
        registry.add_delayed_fields(
            self.delayed_fields
                .iter()
                .map(|(type_name, fields)| (type_name.clone(), fields.clone())),
        );
        Ok(origins)
    }

    /// Installs a [`ForeignKeyResolver`] for every foreign key with a `resolve`
    /// section and for every `field_resolvers` entry. Remaining delayed fields
    /// get a [`ProxyFieldResolver`] pointed at the field's first owner, which
    /// must be able to reach the field's type from a root type through fields
    /// it owns.
    pub fn install_resolvers(
        &self,
        mut gateway: FederationGateway,
        origins: &IndexMap<String, OriginId>,
    ) -> Result<FederationGateway> {
        let config = gateway.config().clone();
        let executor = gateway.executor();

        let templates = self
            .foreign_keys
            .iter()
            .filter_map(|key| Some((&key.type_name, &key.field, key.resolve.as_ref()?)))
            .chain(
                self.field_resolvers
                    .iter()
                    .map(|entry| (&entry.type_name, &entry.field, &entry.resolve)),
            );
        for (type_name, field, resolve) in templates {
            let origin = origins.get(&resolve.subgraph).ok_or_else(|| {
                FederationError::Config(format!(
                    "{type_name}.{field} resolves through unknown subgraph `{}`",
                    resolve.subgraph
                ))
            })?;
            let upstream = config.origin(*origin)?.upstream.clone();
            let resolver = resolve.variables.iter().fold(
                ForeignKeyResolver::new(&resolve.query, upstream, executor.clone())?,
                |resolver, (variable, attribute)| resolver.with_variable_mapping(variable, attribute),
            );
            gateway = gateway.with_field_resolver(type_name, field, resolver);
        }

        let mut reachable = HashMap::new();
        for (type_name, fields) in &self.delayed_fields {
            for field in fields {
                let templated = self
                    .field_resolvers
                    .iter()
                    .any(|entry| entry.type_name == *type_name && entry.field == *field);
                if templated {
                    continue;
                }
                let owner = *config
                    .ownership
                    .owners(type_name, field)
                    .and_then(|owners| owners.first())
                    .ok_or_else(|| FederationError::UnknownField {
                        type_name: type_name.clone(),
                        field_name: field.clone(),
                    })?;
                let reached = reachable
                    .entry(owner)
                    .or_insert_with(|| reachable_types(&config, owner));
                if !reached.contains(type_name.as_str()) {
                    let subgraph = match origins.iter().find(|(_, id)| **id == owner) {
                        Some((name, _)) => name.clone(),
                        None => config.origin(owner)?.tag(),
                    };
                    return Err(FederationError::Config(format!(
                        "delayed field {type_name}.{field} is owned by `{subgraph}`, which serves no \
                         path from a root type to {type_name}; add a field_resolvers entry for it"
                    )));
                }
                let upstream = config.origin(owner)?.upstream.clone();
                gateway = gateway.with_field_resolver(
                    type_name,
                    field,
                    ProxyFieldResolver::new(upstream, executor.clone()),
                );
            }
        }
        Ok(gateway)
    }
}

/// Types `origin` reaches from the query and mutation roots through fields it
/// owns. Abstract types reach their possible types.
fn reachable_types(config: &FederationConfig, origin: OriginId) -> HashSet<String> {
    let schema = &config.schema;
    let mut reached = HashSet::new();
    let mut pending: Vec<&str> = [RootKind::Query, RootKind::Mutation]
        .into_iter()
        .filter_map(|kind| schema.root_type(kind))
        .collect();

    while let Some(type_name) = pending.pop() {
        if !reached.insert(type_name.to_string()) {
            continue;
        }
        let Some(typedef) = schema.types.get(type_name) else {
            continue;
        };
        match typedef {
            TypeDef::Union(union) => pending.extend(union.members.iter().map(String::as_str)),
            TypeDef::Interface(_) => {
                pending.extend(schema.types.values().filter_map(|candidate| match candidate {
                    TypeDef::Object(object) if object.interfaces.iter().any(|name| name == type_name) => {
                        Some(object.name.as_str())
                    }
                    _ => None,
                }))
            }
            _ => {}
        }
        if let Some(fields) = typedef.fields() {
            pending.extend(
                fields
                    .iter()
                    .filter(|(field_name, _)| config.ownership.owns(origin, type_name, field_name))
                    .map(|(_, field)| field.field_type.named_type()),
            );
        }
    }
    reached
}

/// Sends the caller's forwarded headers, overridden by the configured ones.
fn forwarding_headers(configured: HashMap<String, String>) -> HeaderPolicy {
    HeaderPolicy::dynamic(move |context| {
        let mut headers = context.headers.clone();
        headers.extend(configured.clone());
        headers
    })
}

fn read_schema_file(base_dir: &Path, file_path: &str) -> Result<String> {
    let full_path = base_dir.join(file_path);
    fs::read_to_string(&full_path)
        .map_err(|e| FederationError::Config(format!("{}: {e}", full_path.display())))
}
