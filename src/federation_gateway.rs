use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ast::{self, Document};
use crate::completion::{Completion, FieldResolvers};
use crate::error::Result;
use crate::query_executor::{FetchResult, QueryExecutor};
use crate::query_narrower::{prune_unused_variables, used_variables};
use crate::query_planner::plan_query;
use crate::resolvers::FieldResolver;
use crate::schema::RootKind;
use crate::schema_registry::{FederationConfig, Origin, SchemaRegistry};
use crate::{GraphQLError, GraphQLRequest, GraphQLResponse, RequestContext};

type SyncRootFn = dyn Fn(&RequestContext) -> Map<String, Value> + Send + Sync;
type AsyncRootFn = dyn Fn(RequestContext) -> BoxFuture<'static, Map<String, Value>> + Send + Sync;

/// Extra root-level values made available to field resolvers. Never
/// overrides data fetched from an origin.
#[derive(Clone)]
pub enum CustomRootValue {
    Static(Map<String, Value>),
    Sync(Arc<SyncRootFn>),
    Async(Arc<AsyncRootFn>),
}

impl CustomRootValue {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> Map<String, Value> + Send + Sync + 'static,
    {
        CustomRootValue::Sync(Arc::new(f))
    }

    pub fn from_async_fn<F>(f: F) -> Self
    where
        F: Fn(RequestContext) -> BoxFuture<'static, Map<String, Value>> + Send + Sync + 'static,
    {
        CustomRootValue::Async(Arc::new(f))
    }

    async fn resolve(&self, context: &RequestContext) -> Map<String, Value> {
        match self {
            CustomRootValue::Static(value) => value.clone(),
            CustomRootValue::Sync(f) => f(context),
            CustomRootValue::Async(f) => f(context.clone()).await,
        }
    }
}

impl fmt::Debug for CustomRootValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomRootValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            CustomRootValue::Sync(_) => f.write_str("Sync(..)"),
            CustomRootValue::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// The merged root value together with the errors and extensions collected
/// from origins. Whoever finishes the response must call
/// [`StitchedResult::apply_to`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StitchedResult {
    pub root_value: Map<String, Value>,
    pub errors: Vec<GraphQLError>,
    pub extensions: Map<String, Value>,
}

impl StitchedResult {
    /// Appends the collected errors and deep-merges the collected extensions
    /// into a finished response.
    pub fn apply_to(self, response: &mut GraphQLResponse) {
        response.errors.extend(self.errors);
        if self.extensions.is_empty() {
            return;
        }
        let extensions = response.extensions.get_or_insert_with(Map::new);
        deep_merge_map(extensions, self.extensions);
    }
}

/// Outcome of the root resolver.
#[derive(Clone, Debug, PartialEq)]
pub enum RootResolution {
    /// No origin returned data and no custom root value is configured.
    Empty,
    Data(Map<String, Value>),
    Stitched(StitchedResult),
}

impl RootResolution {
    /// Splits into the root value and the carrier still to be applied.
    pub fn into_parts(self) -> (Map<String, Value>, Option<StitchedResult>) {
        match self {
            RootResolution::Empty => (Map::new(), None),
            RootResolution::Data(data) => (data, None),
            RootResolution::Stitched(mut stitched) => {
                let root_value = std::mem::take(&mut stitched.root_value);
                (root_value, Some(stitched))
            }
        }
    }
}

/// Per-request side of federation: splits each operation across origins,
/// dispatches the pieces and stitches the results.
pub struct FederationGateway {
    config: Arc<FederationConfig>,
    executor: Arc<dyn QueryExecutor>,
    resolvers: FieldResolvers,
}

impl fmt::Debug for FederationGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationGateway").field("config", &self.config).finish_non_exhaustive()
    }
}

impl FederationGateway {
    pub fn new(config: Arc<FederationConfig>, executor: Arc<dyn QueryExecutor>) -> Self {
        FederationGateway {
            config,
            executor,
            resolvers: HashMap::new(),
        }
    }

    /// Builds the final schema of `registry` and serves it with the
    /// registry's executor.
    pub fn from_registry(registry: &mut SchemaRegistry) -> Result<Self> {
        Ok(Self::new(registry.get_final_schema()?, registry.executor()))
    }

    /// Registers a resolver run by [`FederationGateway::process_request`]
    /// whenever `type_name.field` is selected.
    pub fn with_field_resolver<R>(mut self, type_name: &str, field: &str, resolver: R) -> Self
    where
        R: FieldResolver + 'static,
    {
        self.resolvers
            .insert((type_name.to_string(), field.to_string()), Arc::new(resolver));
        self
    }

    pub fn config(&self) -> &Arc<FederationConfig> {
        &self.config
    }

    pub fn executor(&self) -> Arc<dyn QueryExecutor> {
        self.executor.clone()
    }

    /// Resolves the root of `document`'s selected operation from every origin
    /// that owns part of it.
    ///
    /// Local origins run in place. Remote origins are fetched concurrently and
    /// all of them are awaited, so one failing origin never cancels another.
    pub async fn resolve_root(
        &self,
        context: &RequestContext,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
        document: &Document,
    ) -> Result<RootResolution> {
        let operation = ast::select_operation(document, operation_name)?;
        let operation_name = ast::operation_name(operation);
        let plan = plan_query(&self.config, document, operation)?;
        debug!(origins = plan.entries.len(), "split operation across origins");

        let mut results: Vec<(&Origin, Result<FetchResult>)> = Vec::with_capacity(plan.entries.len());
        let mut remote = Vec::new();
        for mut entry in plan.entries {
            let origin = self.config.origin(entry.origin)?;
            prune_unused_variables(&mut entry.document);
            let used = used_variables(&entry.document);
            let variables: Map<String, Value> = variables
                .iter()
                .filter(|(name, _)| used.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();

            match origin
                .upstream
                .execute_local(&entry.document, operation_name, &variables, context)
            {
                Some(fetched) => results.push((origin, Ok(fetched))),
                None => remote.push((origin, entry.document, variables)),
            }
        }

        let executor = self.executor.as_ref();
        let fetches = remote.into_iter().map(|(origin, document, variables)| async move {
            let fetched = origin
                .upstream
                .fetch(executor, &document, operation_name, variables, context)
                .await;
            (origin, fetched)
        });
        results.extend(join_all(fetches).await);
        results.sort_by_key(|(origin, _)| origin.id);

        let mut stitched = StitchedResult::default();
        for (origin, fetched) in results {
            let response = match fetched {
                Ok(fetched) => {
                    debug!(origin = origin.id, status = ?fetched.status, "origin responded");
                    fetched.response
                }
                Err(error) => {
                    warn!(origin = origin.id, error = %error, "origin fetch failed");
                    GraphQLResponse::from_errors(vec![GraphQLError::new(error.to_string())])
                }
            };
            stitch(origin, response, &mut stitched);
        }

        if let Some(root_value) = &self.config.root_value {
            for (key, value) in root_value.resolve(context).await {
                stitched.root_value.entry(key).or_insert(value);
            }
        }

        Ok(
            if !stitched.errors.is_empty()
                || !stitched.extensions.is_empty()
                || self.config.root_value.is_some()
            {
                RootResolution::Stitched(stitched)
            } else if stitched.root_value.is_empty() {
                RootResolution::Empty
            } else {
                RootResolution::Data(stitched.root_value)
            },
        )
    }

    /// Runs a complete request: resolves the root, projects it onto the
    /// operation while running registered field resolvers, and applies the
    /// stitched errors and extensions.
    pub async fn process_request(
        &self,
        request: GraphQLRequest,
        context: RequestContext,
    ) -> Result<GraphQLResponse> {
        let document = ast::parse_query(&request.query)?;
        let variables = request.variables.unwrap_or_default();
        let operation_name = request.operation_name.as_deref();

        let (root_value, stitched) = self
            .resolve_root(&context, operation_name, &variables, &document)
            .await?
            .into_parts();

        let operation = ast::select_operation(&document, operation_name)?;
        let root_kind = match operation {
            ast::OperationDefinition::Mutation(_) => RootKind::Mutation,
            _ => RootKind::Query,
        };
        let schema = &self.config.schema;
        let root_type = schema.root_type(root_kind).unwrap_or("Query");

        let mut completion = Completion::new(
            schema,
            &self.resolvers,
            &document,
            ast::operation_name(operation),
            &variables,
            &context,
        );
        let data = completion
            .complete_object(
                root_type,
                vec![ast::selection_set(operation)],
                &root_value,
                Vec::new(),
            )
            .await;

        let mut response = GraphQLResponse::from_data(Value::Object(data));
        response.errors = completion.errors;
        if let Some(stitched) = stitched {
            stitched.apply_to(&mut response);
        }
        Ok(response)
    }
}

/// Folds one origin's response into the stitched result, tagging its errors
/// and extensions with the origin.
fn stitch(origin: &Origin, response: GraphQLResponse, stitched: &mut StitchedResult) {
    let tag = origin.tag();
    if let Some(Value::Object(data)) = response.data {
        deep_merge_map(&mut stitched.root_value, data);
    }

    if origin.proxy_errors {
        stitched.errors.extend(response.errors.into_iter().map(|mut error| {
            let mut path = vec![Value::String(tag.clone())];
            path.extend(error.path.take().unwrap_or_default());
            error.path = Some(path);
            error
        }));
    } else if !response.errors.is_empty() {
        debug!(origin = origin.id, count = response.errors.len(), "dropping origin errors");
    }

    if let Some(extensions) = response.extensions {
        if origin.proxy_extensions {
            stitched.extensions.insert(tag, Value::Object(extensions));
        }
    }
}

/// Merges `source` into `target`. Objects merge key by key and lists of equal
/// length merge item by item. Otherwise the existing value wins unless it is
/// `null`.
pub fn deep_merge(target: &mut Value, source: Value) {
    if target.is_null() {
        *target = source;
        return;
    }
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => deep_merge_map(target, source),
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (target, source) in target.iter_mut().zip(source) {
                deep_merge(target, source);
            }
        }
        _ => {}
    }
}

fn deep_merge_map(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}
