//! Turns a stitched root value into response data.
//!
//! The root value is projected onto the operation's selection, honoring
//! aliases, fragments and `@skip`/`@include`. Fields with a registered
//! [`FieldResolver`] are resolved on the way, which is how key-only stubs and
//! delayed fields get their values.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use graphql_parser::query::{Selection, TypeCondition};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::ast::{self, Document, Field, FragmentDefinition, SelectionSet};
use crate::resolvers::{FieldResolver, ResolveInfo};
use crate::schema::{Schema, TypeDef};
use crate::{GraphQLError, RequestContext};

const TYPENAME: &str = "__typename";

/// Field resolvers keyed by `(type name, field name)`.
pub(crate) type FieldResolvers = HashMap<(String, String), Arc<dyn FieldResolver>>;

type GroupedFields<'a> = IndexMap<&'a str, (Vec<&'a Field>, bool)>;

pub(crate) struct Completion<'a> {
    schema: &'a Schema,
    resolvers: &'a FieldResolvers,
    document: &'a Document,
    fragments: HashMap<&'a str, &'a FragmentDefinition>,
    operation_name: Option<&'a str>,
    variables: &'a Map<String, Value>,
    context: &'a RequestContext,
    pub errors: Vec<GraphQLError>,
}

impl<'a> Completion<'a> {
    pub fn new(
        schema: &'a Schema,
        resolvers: &'a FieldResolvers,
        document: &'a Document,
        operation_name: Option<&'a str>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
    ) -> Self {
        Completion {
            schema,
            resolvers,
            document,
            fragments: ast::fragments(document)
                .map(|fragment| (fragment.name.as_str(), fragment))
                .collect(),
            operation_name,
            variables,
            context,
            errors: Vec::new(),
        }
    }

    pub fn complete_object<'f>(
        &'f mut self,
        type_name: &'a str,
        selection_sets: Vec<&'a SelectionSet>,
        source: &'f Map<String, Value>,
        path: Vec<String>,
    ) -> BoxFuture<'f, Map<String, Value>>
    where
        'a: 'f,
    {
        async move {
            let mut grouped = GroupedFields::new();
            let mut visited = HashSet::new();
            for selection_set in selection_sets {
                self.collect_fields(type_name, selection_set, source, true, &mut grouped, &mut visited);
            }

            let mut output = Map::new();
            for (key, (fields, certain)) in grouped {
                let field = fields[0];
                let mut field_path = path.clone();
                field_path.push(key.to_string());

                if field.name == TYPENAME {
                    let concrete = source
                        .get(TYPENAME)
                        .cloned()
                        .unwrap_or_else(|| Value::String(type_name.to_string()));
                    output.insert(key.to_string(), concrete);
                    continue;
                }

                let resolver = self
                    .resolvers
                    .get(&(type_name.to_string(), field.name.clone()))
                    .cloned();
                let value = match resolver {
                    Some(resolver) => self.resolve_field(resolver.as_ref(), type_name, field, source, &field_path).await,
                    None => match source.get(key) {
                        Some(value) => value.clone(),
                        None if certain => Value::Null,
                        None => continue,
                    },
                };

                let schema = self.schema;
                let selection_sets: Vec<&'a SelectionSet> = fields
                    .iter()
                    .map(|&field| &field.selection_set)
                    .filter(|selection_set| !selection_set.items.is_empty())
                    .collect();
                let field_type = schema
                    .field(type_name, &field.name)
                    .map(|definition| definition.field_type.named_type());
                let value = match field_type {
                    Some(field_type) if !selection_sets.is_empty() => {
                        self.complete_value(field_type, selection_sets, &value, field_path)
                            .await
                    }
                    _ => value,
                };
                output.insert(key.to_string(), value);
            }
            output
        }
        .boxed()
    }

    fn complete_value<'f>(
        &'f mut self,
        type_name: &'a str,
        selection_sets: Vec<&'a SelectionSet>,
        value: &'f Value,
        path: Vec<String>,
    ) -> BoxFuture<'f, Value>
    where
        'a: 'f,
    {
        async move {
            match value {
                Value::Object(object) => Value::Object(
                    self.complete_object(type_name, selection_sets, object, path)
                        .await,
                ),
                Value::Array(items) => {
                    let mut completed = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        let mut item_path = path.clone();
                        item_path.push(index.to_string());
                        completed.push(
                            self.complete_value(type_name, selection_sets.clone(), item, item_path)
                                .await,
                        );
                    }
                    Value::Array(completed)
                }
                other => other.clone(),
            }
        }
        .boxed()
    }

    async fn resolve_field(
        &mut self,
        resolver: &dyn FieldResolver,
        type_name: &'a str,
        field: &'a Field,
        source: &Map<String, Value>,
        path: &[String],
    ) -> Value {
        let arguments = ast::arguments_to_json(&field.arguments, self.variables);
        let info = ResolveInfo {
            path,
            parent_type: type_name,
            field,
            document: self.document,
            operation_name: self.operation_name,
            variables: self.variables,
            context: self.context,
        };
        match resolver.resolve(source, &info, &arguments).await {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    type_name,
                    field = %field.name,
                    error = %error,
                    "field resolver failed"
                );
                self.errors
                    .push(GraphQLError::new(error.to_string()).with_path(path_values(path)));
                Value::Null
            }
        }
    }

    /// Groups the selected fields by response key. The flag records whether
    /// the field is known to apply to `source`.
    fn collect_fields(
        &self,
        type_name: &str,
        selection_set: &'a SelectionSet,
        source: &Map<String, Value>,
        certain: bool,
        grouped: &mut GroupedFields<'a>,
        visited: &mut HashSet<&'a str>,
    ) {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    if !ast::is_included(&field.directives, self.variables) {
                        continue;
                    }
                    let entry = grouped
                        .entry(ast::response_key(field))
                        .or_insert_with(|| (Vec::new(), false));
                    entry.0.push(field);
                    entry.1 |= certain;
                }
                Selection::InlineFragment(inline) => {
                    if !ast::is_included(&inline.directives, self.variables) {
                        continue;
                    }
                    let applies = match &inline.type_condition {
                        None => Some(true),
                        Some(TypeCondition::On(condition)) => self.applies(condition, type_name, source),
                    };
                    if let Some(applies) = applies {
                        self.collect_fields(
                            type_name,
                            &inline.selection_set,
                            source,
                            certain && applies,
                            grouped,
                            visited,
                        );
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !ast::is_included(&spread.directives, self.variables)
                        || !visited.insert(spread.fragment_name.as_str())
                    {
                        continue;
                    }
                    let Some(&fragment) = self.fragments.get(spread.fragment_name.as_str()) else {
                        continue;
                    };
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    if let Some(applies) = self.applies(condition, type_name, source) {
                        self.collect_fields(
                            type_name,
                            &fragment.selection_set,
                            source,
                            certain && applies,
                            grouped,
                            visited,
                        );
                    }
                }
            }
        }
    }

    /// Whether a fragment on `condition` applies to `source`. `Some(false)`
    /// means it may apply but the concrete type is unknown.
    fn applies(&self, condition: &str, type_name: &str, source: &Map<String, Value>) -> Option<bool> {
        if condition == type_name || self.is_possible_type(condition, type_name) {
            return Some(true);
        }
        match source.get(TYPENAME).and_then(Value::as_str) {
            Some(concrete) => {
                (concrete == condition || self.is_possible_type(condition, concrete)).then_some(true)
            }
            None => Some(false),
        }
    }

    fn is_possible_type(&self, abstract_type: &str, concrete: &str) -> bool {
        match self.schema.types.get(abstract_type) {
            Some(TypeDef::Union(union)) => union.members.iter().any(|member| member == concrete),
            Some(TypeDef::Interface(_)) => matches!(
                self.schema.types.get(concrete),
                Some(TypeDef::Object(object)) if object.interfaces.iter().any(|name| name == abstract_type)
            ),
            _ => false,
        }
    }
}

fn path_values(path: &[String]) -> Vec<Value> {
    path.iter()
        .map(|segment| match segment.parse::<u64>() {
            Ok(index) => Value::from(index),
            Err(_) => Value::String(segment.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FederationError, Result};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SDL: &str = r#"
        type Query { me: User search: [Result] }
        interface Node { id: ID }
        type User implements Node { id: ID name: String friend: User }
        type Post implements Node { id: ID title: String }
        union Result = User | Post
    "#;

    struct Friend;

    #[async_trait]
    impl FieldResolver for Friend {
        async fn resolve(
            &self,
            parent: &Map<String, Value>,
            info: &ResolveInfo<'_>,
            arguments: &Map<String, Value>,
        ) -> Result<Value> {
            assert_eq!(info.parent_type, "User");
            match arguments.get("fail") {
                Some(Value::Bool(true)) => Err(FederationError::InvalidTemplate("boom".into())),
                _ => Ok(json!({"id": format!("friend-of-{}", parent["id"].as_str().unwrap_or("?")), "name": "Bo"})),
            }
        }
    }

    async fn complete(query: &str, root: Value, resolvers: &FieldResolvers) -> (Value, Vec<GraphQLError>) {
        let schema = Schema::parse(SDL).unwrap();
        let document = ast::parse_query(query).unwrap();
        let operation = ast::select_operation(&document, None).unwrap();
        let variables = Map::new();
        let context = RequestContext::default();
        let mut completion = Completion::new(&schema, resolvers, &document, None, &variables, &context);
        let data = completion
            .complete_object(
                "Query",
                vec![ast::selection_set(operation)],
                root.as_object().unwrap(),
                Vec::new(),
            )
            .await;
        (Value::Object(data), completion.errors)
    }

    #[tokio::test]
    async fn projects_root_value_onto_selection() {
        let (data, errors) = complete(
            "{ __typename who: me { name ...Ids } missing @skip(if: true) absent } fragment Ids on Node { id }",
            json!({"who": {"id": "1", "name": "Ann", "extra": true}, "unrequested": 1}),
            &FieldResolvers::new(),
        )
        .await;
        assert!(errors.is_empty());
        assert_eq!(
            data,
            json!({"__typename": "Query", "who": {"name": "Ann", "id": "1"}, "absent": null})
        );
    }

    #[tokio::test]
    async fn abstract_selections_follow_typename() {
        let (data, _) = complete(
            "{ search { __typename ... on User { name } ... on Post { title } } }",
            json!({"search": [
                {"__typename": "User", "name": "Ann"},
                {"__typename": "Post", "title": "Hi"}
            ]}),
            &FieldResolvers::new(),
        )
        .await;
        assert_eq!(
            data,
            json!({"search": [
                {"__typename": "User", "name": "Ann"},
                {"__typename": "Post", "title": "Hi"}
            ]})
        );
    }

    #[tokio::test]
    async fn registered_resolvers_fill_fields_and_report_errors() {
        let mut resolvers = FieldResolvers::new();
        resolvers.insert(("User".into(), "friend".into()), Arc::new(Friend));

        let (data, errors) = complete(
            "{ me { friend { name } other: friend(fail: true) { name } } }",
            json!({"me": {"id": "1", "friend": {"id": "2"}}}),
            &resolvers,
        )
        .await;

        assert_eq!(data, json!({"me": {"friend": {"name": "Bo"}, "other": null}}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, Some(vec![json!("me"), json!("other")]));
    }
}
