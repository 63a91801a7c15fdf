pub mod ast;
pub mod cache;
mod completion;
pub mod config;
pub mod error;
pub mod federation_gateway;
pub mod introspection;
pub mod operation_printer;
pub mod query_executor;
pub mod query_narrower;
pub mod query_planner;
pub mod resolvers;
pub mod schema;
pub mod schema_registry;
pub mod type_algebra;

pub use cache::{Cache, InMemoryCache};
pub use error::{FederationError, Result};
pub use federation_gateway::{CustomRootValue, FederationGateway, RootResolution, StitchedResult};
pub use query_executor::{HeaderPolicy, HttpQueryExecutor, LocalExecutor, QueryExecutor, Upstream};
pub use query_planner::{QueryFilter, QueryPlan};
pub use resolvers::{FieldResolver, ForeignKeyResolver, ProxyFieldResolver, ResolveInfo};
pub use schema::Schema;
pub use schema_registry::{FederationConfig, RemoteSchemaOptions, SchemaRegistry};
pub use type_algebra::Exclusions;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Stable identifier handed out to each origin at registration time.
pub type OriginId = usize;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

/// Per-request state forwarded to header policies, local executors and
/// custom root values.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: Vec<Value>) -> Self {
        self.path = Some(path);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLResponse {
    pub fn from_data(data: Value) -> Self {
        GraphQLResponse {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        GraphQLResponse {
            errors,
            ..Default::default()
        }
    }
}
