//! Field resolvers that forward part of a request to a single origin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graphql_parser::query::Selection;
use serde_json::{Map, Value};
use tracing::debug;

use crate::ast::{self, Document, Field, SelectionSet};
use crate::cache::Cache;
use crate::error::{FederationError, Result};
use crate::operation_printer::print_document;
use crate::query_executor::{QueryExecutor, Upstream};
use crate::query_narrower::{attach_fragments, narrow_operation, used_variables};
use crate::{GraphQLResponse, RequestContext};

/// Marks where a foreign key template receives the requested sub-selection.
pub const FIELDS_PLACEHOLDER: &str = "__FIELDS";

/// What a resolver knows about the field it is resolving.
pub struct ResolveInfo<'a> {
    /// Response path of the field, list indices included.
    pub path: &'a [String],
    pub parent_type: &'a str,
    pub field: &'a Field,
    pub document: &'a Document,
    pub operation_name: Option<&'a str>,
    pub variables: &'a Map<String, Value>,
    pub context: &'a RequestContext,
}

#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(
        &self,
        parent: &Map<String, Value>,
        info: &ResolveInfo<'_>,
        arguments: &Map<String, Value>,
    ) -> Result<Value>;
}

#[derive(Clone)]
struct CacheLayer {
    cache: Arc<dyn Cache>,
    ttl: Option<Duration>,
}

impl CacheLayer {
    async fn get_or_fetch<F>(layer: Option<&Self>, key: impl FnOnce() -> String, fetch: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>>,
    {
        let Some(layer) = layer else {
            return fetch.await;
        };
        let key = key();
        if let Some(value) = layer.cache.get(&key).await {
            debug!(key = %key, "resolver cache hit");
            return Ok(value);
        }
        let value = fetch.await?;
        layer.cache.set(&key, value.clone(), layer.ttl).await;
        Ok(value)
    }
}

/// Expands a key-only stub left by the query planner by re-fetching the full
/// object from the origin that serves it.
///
/// The template is a single named operation containing one `__FIELDS`
/// placeholder, e.g. `query Order($id: ID!) { order(id: $id) { __FIELDS } }`.
/// The placeholder is replaced by the selection of the field being resolved and
/// the value found at the placeholder's position is returned.
pub struct ForeignKeyResolver {
    template: Document,
    operation_name: String,
    result_path: Vec<String>,
    variable_names: Vec<String>,
    variable_mapping: HashMap<String, String>,
    upstream: Upstream,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<CacheLayer>,
}

impl ForeignKeyResolver {
    pub fn new(template: &str, upstream: Upstream, executor: Arc<dyn QueryExecutor>) -> Result<Self> {
        let invalid = |reason: &str| FederationError::InvalidTemplate(reason.to_string());
        let template = ast::parse_query(template).map_err(|e| invalid(&e.to_string()))?;

        if ast::fragments(&template).next().is_some() {
            return Err(invalid("fragments are not allowed"));
        }
        let (operation_name, result_path, variable_names) = {
            let mut operations = ast::operations(&template);
            let (Some(operation), None) = (operations.next(), operations.next()) else {
                return Err(invalid("expected exactly one operation"));
            };
            let operation_name = ast::operation_name(operation)
                .ok_or_else(|| invalid("the operation must be named"))?
                .to_string();

            let mut paths = Vec::new();
            find_placeholders(ast::selection_set(operation), &mut Vec::new(), &mut paths);
            let result_path = match <[_; 1]>::try_from(paths) {
                Ok([path]) => path,
                Err(_) => {
                    return Err(invalid(&format!(
                        "expected exactly one {FIELDS_PLACEHOLDER} placeholder"
                    )));
                }
            };
            let variable_names: Vec<String> = ast::variable_definitions(operation)
                .iter()
                .map(|definition| definition.name.clone())
                .collect();
            (operation_name, result_path, variable_names)
        };

        Ok(ForeignKeyResolver {
            operation_name,
            result_path,
            variable_names,
            template,
            variable_mapping: HashMap::new(),
            upstream,
            executor,
            cache: None,
        })
    }

    /// Reads template variable `variable` from the parent's `attribute`
    /// instead of the attribute with the same name.
    pub fn with_variable_mapping(mut self, variable: &str, attribute: &str) -> Self {
        self.variable_mapping
            .insert(variable.to_string(), attribute.to_string());
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Option<Duration>) -> Self {
        self.cache = Some(CacheLayer { cache, ttl });
        self
    }

    /// The template with the field's selection spliced in, plus every
    /// fragment that selection spreads.
    fn build_document(&self, info: &ResolveInfo<'_>) -> Document {
        let mut document = self.template.clone();
        for operation in document.definitions.iter_mut().filter_map(|definition| match definition {
            ast::Definition::Operation(operation) => Some(operation),
            ast::Definition::Fragment(_) => None,
        }) {
            splice(ast::selection_set_mut(operation), &info.field.selection_set);
        }
        let fragments: HashMap<&str, _> = ast::fragments(info.document)
            .map(|fragment| (fragment.name.as_str(), fragment))
            .collect();
        attach_fragments(&mut document, &fragments);
        document
    }

    fn variables(&self, parent: &Map<String, Value>, info: &ResolveInfo<'_>) -> Map<String, Value> {
        let stub = parent
            .get(ast::response_key(info.field))
            .and_then(Value::as_object);
        self.variable_names
            .iter()
            .filter_map(|name| {
                let attribute = self.variable_mapping.get(name).unwrap_or(name);
                let value = parent
                    .get(attribute)
                    .or_else(|| stub.and_then(|stub| stub.get(attribute)))?;
                Some((name.clone(), value.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl FieldResolver for ForeignKeyResolver {
    async fn resolve(
        &self,
        parent: &Map<String, Value>,
        info: &ResolveInfo<'_>,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let document = self.build_document(info);
        let variables = self.variables(parent, info);
        let key = || cache_key(&document, &variables, arguments);

        let fetch = async {
            let fetched = self
                .upstream
                .fetch(
                    self.executor.as_ref(),
                    &document,
                    Some(self.operation_name.as_str()),
                    variables.clone(),
                    info.context,
                )
                .await?;
            extract(fetched.response, &self.result_path)
        };
        CacheLayer::get_or_fetch(self.cache.as_ref(), key, fetch).await
    }
}

fn find_placeholders(selection_set: &SelectionSet, path: &mut Vec<String>, found: &mut Vec<Vec<String>>) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) if field.name == FIELDS_PLACEHOLDER => found.push(path.clone()),
            Selection::Field(field) => {
                path.push(ast::response_key(field).to_string());
                find_placeholders(&field.selection_set, path, found);
                path.pop();
            }
            Selection::InlineFragment(inline) => find_placeholders(&inline.selection_set, path, found),
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn splice(selection_set: &mut SelectionSet, replacement: &SelectionSet) {
    let mut items = Vec::with_capacity(selection_set.items.len() + replacement.items.len());
    for mut selection in selection_set.items.drain(..) {
        match &mut selection {
            Selection::Field(field) if field.name == FIELDS_PLACEHOLDER => {
                items.extend(replacement.items.iter().cloned());
                continue;
            }
            Selection::Field(field) => splice(&mut field.selection_set, replacement),
            Selection::InlineFragment(inline) => splice(&mut inline.selection_set, replacement),
            Selection::FragmentSpread(_) => {}
        }
        items.push(selection);
    }
    selection_set.items = items;
}

/// Forwards a single field to one origin, narrowing the incoming operation to
/// that field's path.
pub struct ProxyFieldResolver {
    upstream: Upstream,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<CacheLayer>,
}

impl ProxyFieldResolver {
    pub fn new(upstream: Upstream, executor: Arc<dyn QueryExecutor>) -> Self {
        ProxyFieldResolver {
            upstream,
            executor,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Option<Duration>) -> Self {
        self.cache = Some(CacheLayer { cache, ttl });
        self
    }
}

#[async_trait]
impl FieldResolver for ProxyFieldResolver {
    async fn resolve(
        &self,
        _parent: &Map<String, Value>,
        info: &ResolveInfo<'_>,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let operation = ast::select_operation(info.document, info.operation_name)?;
        let document = narrow_operation(info.document, operation, info.path)?;
        let used = used_variables(&document);
        let variables: Map<String, Value> = info
            .variables
            .iter()
            .filter(|(name, _)| used.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let key = || cache_key(&document, &variables, arguments);

        let fetch = async {
            let fetched = self
                .upstream
                .fetch(
                    self.executor.as_ref(),
                    &document,
                    info.operation_name,
                    variables.clone(),
                    info.context,
                )
                .await?;
            extract(fetched.response, info.path)
        };
        CacheLayer::get_or_fetch(self.cache.as_ref(), key, fetch).await
    }
}

fn cache_key(document: &Document, variables: &Map<String, Value>, arguments: &Map<String, Value>) -> String {
    let query = print_document(document).unwrap_or_default();
    format!(
        "{query}:{}:{}",
        Value::Object(variables.clone()),
        Value::Object(arguments.clone())
    )
}

/// Follows `path` into the response data. Numeric segments index into lists.
fn extract(response: GraphQLResponse, path: &[String]) -> Result<Value> {
    if !response.errors.is_empty() {
        return Err(FederationError::Upstream(response.errors));
    }
    let mut value = response.data.unwrap_or_default();
    for segment in path {
        value = match value {
            Value::Object(mut object) => object.remove(segment).unwrap_or_default(),
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(index) if index < items.len() => items.swap_remove(index),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphQLError;
    use crate::cache::InMemoryCache;
    use crate::query_executor::{HttpQueryExecutor, LocalRequest};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEMPLATE: &str = "query Customer($id: ID) { customer(id: $id) { __FIELDS } }";

    fn executor() -> Arc<dyn QueryExecutor> {
        Arc::new(HttpQueryExecutor::new())
    }

    /// A local upstream recording every printed query and variable map.
    fn recording(data: Value) -> (Upstream, Arc<Mutex<Vec<(String, Value)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let upstream = Upstream::Local(Arc::new(move |request: LocalRequest<'_>| {
            log.lock().unwrap().push((
                print_document(request.document).unwrap(),
                Value::Object(request.variables.clone()),
            ));
            GraphQLResponse::from_data(data.clone())
        }));
        (upstream, seen)
    }

    struct Request {
        document: Document,
        path: Vec<String>,
        variables: Map<String, Value>,
        context: RequestContext,
    }

    impl Request {
        fn new(query: &str, path: &[&str]) -> Self {
            Request {
                document: ast::parse_query(query).unwrap(),
                path: path.iter().map(|segment| segment.to_string()).collect(),
                variables: Map::new(),
                context: RequestContext::default(),
            }
        }

        fn field(&self) -> &Field {
            let operation = ast::select_operation(&self.document, None).unwrap();
            let mut selection_set = ast::selection_set(operation);
            let mut field = None;
            for key in self.path.iter().filter(|key| key.parse::<usize>().is_err()) {
                let found = selection_set
                    .items
                    .iter()
                    .find_map(|selection| match selection {
                        Selection::Field(field) if ast::response_key(field) == key => Some(field),
                        _ => None,
                    })
                    .unwrap();
                selection_set = &found.selection_set;
                field = Some(found);
            }
            field.unwrap()
        }

        fn info(&self) -> ResolveInfo<'_> {
            ResolveInfo {
                path: &self.path,
                parent_type: "Order",
                field: self.field(),
                document: &self.document,
                operation_name: None,
                variables: &self.variables,
                context: &self.context,
            }
        }
    }

    #[test]
    fn rejects_malformed_templates() {
        for template in [
            "query { customer { __FIELDS } }",
            "query A { a { __FIELDS } } query B { b { __FIELDS } }",
            "query A { a { ...F } } fragment F on A { __FIELDS }",
            "query A { a { id } }",
            "query A { a { __FIELDS } b { __FIELDS } }",
            "query A {",
        ] {
            let result = ForeignKeyResolver::new(template, Upstream::remote("http://x"), executor());
            assert!(
                matches!(result, Err(FederationError::InvalidTemplate(_))),
                "{template}"
            );
        }
    }

    #[tokio::test]
    async fn splices_selection_and_reads_key_from_stub() {
        let (upstream, seen) = recording(json!({"customer": {"name": "Ada", "orders": [{"id": "1"}]}}));
        let resolver = ForeignKeyResolver::new(TEMPLATE, upstream, executor()).unwrap();

        let request = Request::new(
            "{ orderCreate { order { customer { name ...Orders } } } } fragment Orders on Customer { orders { id } }",
            &["orderCreate", "order", "customer"],
        );
        let parent = json!({"customer": {"id": "c1"}});
        let value = resolver
            .resolve(parent.as_object().unwrap(), &request.info(), &Map::new())
            .await
            .unwrap();

        assert_eq!(value, json!({"name": "Ada", "orders": [{"id": "1"}]}));
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0].0,
            "query Customer($id: ID) {\n  customer(id: $id) {\n    name\n    ...Orders\n  }\n}\n\nfragment Orders on Customer {\n  orders {\n    id\n  }\n}\n"
        );
        assert_eq!(seen[0].1, json!({"id": "c1"}));
    }

    #[tokio::test]
    async fn mapped_variables_come_from_the_parent() {
        let (upstream, seen) = recording(json!({"customer": {"name": "Ada"}}));
        let resolver = ForeignKeyResolver::new(TEMPLATE, upstream, executor())
            .unwrap()
            .with_variable_mapping("id", "customerId");

        let request = Request::new("{ order { customer { name } } }", &["order", "customer"]);
        let parent = json!({"customerId": "c9"});
        resolver
            .resolve(parent.as_object().unwrap(), &request.info(), &Map::new())
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap()[0].1, json!({"id": "c9"}));
    }

    #[tokio::test]
    async fn cached_results_skip_the_upstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let upstream = Upstream::Local(Arc::new(move |_: LocalRequest<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            GraphQLResponse::from_data(json!({"customer": {"name": "Ada"}}))
        }));
        let resolver = ForeignKeyResolver::new(TEMPLATE, upstream, executor())
            .unwrap()
            .with_cache(Arc::new(InMemoryCache::new()), None);

        let request = Request::new("{ order { customer { name } } }", &["order", "customer"]);
        let parent = json!({"customer": {"id": "c1"}});
        for _ in 0..2 {
            let value = resolver
                .resolve(parent.as_object().unwrap(), &request.info(), &Map::new())
                .await
                .unwrap();
            assert_eq!(value, json!({"name": "Ada"}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_errors_fail_the_field() {
        let upstream = Upstream::Local(Arc::new(|_: LocalRequest<'_>| {
            GraphQLResponse::from_errors(vec![GraphQLError::new("no such customer")])
        }));
        let resolver = ForeignKeyResolver::new(TEMPLATE, upstream, executor()).unwrap();
        let request = Request::new("{ order { customer { name } } }", &["order", "customer"]);

        let err = resolver
            .resolve(&Map::new(), &request.info(), &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream returned errors: no such customer");
    }

    #[tokio::test]
    async fn proxy_resolver_narrows_and_follows_list_indices() {
        let (upstream, seen) = recording(json!({"users": [{"name": "a"}, {"name": "b"}]}));
        let resolver = ProxyFieldResolver::new(upstream, executor());

        let mut request = Request::new(
            "query($x: Int, $y: Int) { users(first: $x) { name } other(y: $y) }",
            &["users", "1", "name"],
        );
        request.variables = json!({"x": 2, "y": 3}).as_object().unwrap().clone();
        let value = resolver
            .resolve(&Map::new(), &request.info(), &Map::new())
            .await
            .unwrap();

        assert_eq!(value, json!("b"));
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0].0,
            "query($x: Int) {\n  users(first: $x) {\n    name\n  }\n}\n"
        );
        assert_eq!(seen[0].1, json!({"x": 2}));
    }
}
