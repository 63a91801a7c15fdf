//! Splits an operation into one sub-operation per origin.
//!
//! For a given origin, [`QueryFilter`] keeps only the fields that origin owns,
//! replaces foreign-key fields with a stub selecting just the key, leaves out
//! delayed fields, and filters fragment definitions the same way. Fragment
//! spreads whose fragment ends up empty are dropped along with the fragment.

use std::collections::{HashMap, HashSet};

use graphql_parser::query::{Selection, TypeCondition};
use tracing::debug;

use crate::OriginId;
use crate::ast::{
    self, Definition, Document, Field, FragmentDefinition, OperationDefinition, SelectionSet,
};
use crate::error::{FederationError, Result};
use crate::query_narrower::collect_spreads;
use crate::schema::RootKind;
use crate::schema_registry::{DelayedFields, FederationConfig, ForeignKeys, OwnershipIndex};

const TYPENAME: &str = "__typename";

/// The per-origin decomposition of one operation, ordered by origin id.
#[derive(Debug, Default)]
pub struct QueryPlan {
    pub entries: Vec<PlanEntry>,
}

/// A sub-operation for one origin: a single operation plus the filtered
/// fragments it spreads.
#[derive(Debug)]
pub struct PlanEntry {
    pub origin: OriginId,
    pub document: Document,
}

pub struct QueryFilter<'a> {
    ownership: &'a OwnershipIndex,
    foreign_keys: &'a ForeignKeys,
    delayed_fields: &'a DelayedFields,
    root_types: HashMap<RootKind, &'a str>,
}

impl<'a> QueryFilter<'a> {
    pub fn new(config: &'a FederationConfig) -> Self {
        let root_types = [RootKind::Query, RootKind::Mutation, RootKind::Subscription]
            .into_iter()
            .filter_map(|kind| Some((kind, config.schema.root_type(kind)?)))
            .collect();
        QueryFilter {
            ownership: &config.ownership,
            foreign_keys: &config.foreign_keys,
            delayed_fields: &config.delayed_fields,
            root_types,
        }
    }

    fn root_type(&self, operation: &OperationDefinition) -> Result<&'a str> {
        let kind = match operation {
            OperationDefinition::SelectionSet(_) | OperationDefinition::Query(_) => RootKind::Query,
            OperationDefinition::Mutation(_) => RootKind::Mutation,
            OperationDefinition::Subscription(_) => {
                return Err(FederationError::UnsupportedOperation("subscription"));
            }
        };
        self.root_types.get(&kind).copied().ok_or_else(|| {
            FederationError::UnsupportedOperation(match kind {
                RootKind::Query => "query",
                RootKind::Mutation => "mutation",
                RootKind::Subscription => "subscription",
            })
        })
    }

    /// Returns the part of `operation` that `origin` can serve, or `None` when
    /// it owns none of the requested root fields.
    pub fn filter(
        &self,
        origin: OriginId,
        document: &Document,
        operation: &OperationDefinition,
    ) -> Result<Option<Document>> {
        let root_type = self.root_type(operation)?;
        let mut filter = OriginFilter {
            filter: self,
            origin,
            fragments: ast::fragments(document)
                .map(|fragment| (fragment.name.as_str(), fragment))
                .collect(),
            filtered: HashMap::new(),
            in_progress: HashSet::new(),
        };

        let selection_set = filter.filter_selection_set(root_type, ast::selection_set(operation));
        if !is_meaningful(&selection_set) {
            return Ok(None);
        }

        let mut sub_operation = operation.clone();
        *ast::selection_set_mut(&mut sub_operation) = selection_set;

        let mut pending = Vec::new();
        collect_spreads(ast::selection_set(&sub_operation), &mut pending);
        let mut definitions = vec![Definition::Operation(sub_operation)];
        let mut attached = HashSet::new();
        while let Some(name) = pending.pop() {
            if !attached.insert(name.clone()) {
                continue;
            }
            if let Some(Some(fragment)) = filter.filtered.remove(name.as_str()) {
                collect_spreads(&fragment.selection_set, &mut pending);
                definitions.push(Definition::Fragment(fragment));
            }
        }

        Ok(Some(Document { definitions }))
    }
}

/// Runs [`QueryFilter::filter`] for every origin and keeps the non-empty results.
pub fn plan_query(
    config: &FederationConfig,
    document: &Document,
    operation: &OperationDefinition,
) -> Result<QueryPlan> {
    let filter = QueryFilter::new(config);
    let mut plan = QueryPlan::default();
    for origin in &config.origins {
        match filter.filter(origin.id, document, operation)? {
            Some(document) => plan.entries.push(PlanEntry {
                origin: origin.id,
                document,
            }),
            None => debug!(origin = origin.id, "origin owns no requested field"),
        }
    }
    Ok(plan)
}

struct OriginFilter<'f, 'a> {
    filter: &'f QueryFilter<'a>,
    origin: OriginId,
    fragments: HashMap<&'f str, &'f FragmentDefinition>,
    filtered: HashMap<&'f str, Option<FragmentDefinition>>,
    in_progress: HashSet<&'f str>,
}

impl<'f> OriginFilter<'f, '_> {
    fn filter_selection_set(&mut self, parent_type: &str, selection_set: &'f SelectionSet) -> SelectionSet {
        let mut items = Vec::with_capacity(selection_set.items.len());
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    if let Some(field) = self.filter_field(parent_type, field) {
                        items.push(Selection::Field(field));
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if self.filter_fragment(&spread.fragment_name) {
                        items.push(selection.clone());
                    }
                }
                Selection::InlineFragment(inline) => {
                    let type_name = match &inline.type_condition {
                        Some(TypeCondition::On(type_name)) => type_name.as_str(),
                        None => parent_type,
                    };
                    let inner = self.filter_selection_set(type_name, &inline.selection_set);
                    if is_meaningful(&inner) {
                        let mut inline = inline.clone();
                        inline.selection_set = inner;
                        items.push(Selection::InlineFragment(inline));
                    }
                }
            }
        }
        SelectionSet {
            span: selection_set.span,
            items,
        }
    }

    fn filter_field(&mut self, parent_type: &str, field: &'f Field) -> Option<Field> {
        if field.name == TYPENAME {
            return Some(field.clone());
        }
        let filter = self.filter;
        if filter.delayed_fields.contains(parent_type, &field.name)
            || !filter.ownership.owns(self.origin, parent_type, &field.name)
        {
            return None;
        }

        if let Some(key_field) = filter.foreign_keys.key_field(parent_type, &field.name) {
            return Some(stub_field(field, key_field));
        }
        if field.selection_set.items.is_empty() {
            return Some(field.clone());
        }

        let field_type = filter.ownership.field_type(parent_type, &field.name)?;
        let selection_set = self.filter_selection_set(field_type, &field.selection_set);
        if is_meaningful(&selection_set) || !is_meaningful(&field.selection_set) {
            let mut field = field.clone();
            field.selection_set = selection_set;
            Some(field)
        } else {
            None
        }
    }

    /// Filters the named fragment once per origin. Returns whether anything
    /// survived.
    fn filter_fragment(&mut self, name: &'f str) -> bool {
        if let Some(result) = self.filtered.get(name) {
            return result.is_some();
        }
        if self.in_progress.contains(name) {
            return true;
        }
        let Some(&fragment) = self.fragments.get(name) else {
            return false;
        };

        self.in_progress.insert(name);
        let TypeCondition::On(type_name) = &fragment.type_condition;
        let selection_set = self.filter_selection_set(type_name, &fragment.selection_set);
        self.in_progress.remove(name);

        let result = is_meaningful(&selection_set).then(|| FragmentDefinition {
            selection_set,
            ..fragment.clone()
        });
        let survived = result.is_some();
        self.filtered.insert(name, result);
        survived
    }
}

/// A selection set contributes something when it selects more than `__typename`.
fn is_meaningful(selection_set: &SelectionSet) -> bool {
    selection_set
        .items
        .iter()
        .any(|selection| !matches!(selection, Selection::Field(field) if field.name == TYPENAME))
}

fn stub_field(field: &Field, key_field: &str) -> Field {
    let mut stub = field.clone();
    stub.selection_set = SelectionSet {
        span: field.selection_set.span,
        items: vec![Selection::Field(Field {
            position: field.position,
            alias: None,
            name: key_field.to_string(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: ast::empty_selection_set(),
        })],
    };
    stub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphQLResponse;
    use crate::ast::{parse_query, select_operation};
    use crate::operation_printer::print_document;
    use crate::query_executor::LocalRequest;
    use crate::schema::Schema;
    use crate::schema_registry::SchemaRegistry;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn noop(_: LocalRequest<'_>) -> GraphQLResponse {
        GraphQLResponse::default()
    }

    fn config(schemas: &[&str], setup: impl FnOnce(&mut SchemaRegistry)) -> Arc<FederationConfig> {
        let mut registry = SchemaRegistry::new();
        for sdl in schemas {
            registry.add_schema(&Schema::parse(sdl).unwrap(), noop).unwrap();
        }
        setup(&mut registry);
        registry.get_final_schema().unwrap()
    }

    fn split(config: &FederationConfig, query: &str) -> Vec<(OriginId, String)> {
        let document = parse_query(query).unwrap();
        let operation = select_operation(&document, None).unwrap();
        plan_query(config, &document, operation)
            .unwrap()
            .entries
            .into_iter()
            .map(|entry| (entry.origin, print_document(&entry.document).unwrap()))
            .collect()
    }

    const COMPLEX: &str = "type Query { complex: Complex } type Complex { id: ID name: String }";
    const OTHER: &str =
        "type Query { otherComplex: Other } type Other { id: ID name: String group: Group } type Group { id: ID }";

    #[test]
    fn disjoint_root_fields_split_into_one_entry_per_origin() {
        let config = config(&[COMPLEX, OTHER], |_| {});
        let plan = split(
            &config,
            "{ complex { id name } otherComplex { id name group { id } } }",
        );
        assert_eq!(
            plan,
            [
                (0, "query {\n  complex {\n    id\n    name\n  }\n}\n".to_string()),
                (
                    1,
                    "query {\n  otherComplex {\n    id\n    name\n    group {\n      id\n    }\n  }\n}\n"
                        .to_string()
                ),
            ]
        );
    }

    #[test]
    fn origins_without_requested_fields_are_skipped() {
        let config = config(&[COMPLEX, OTHER], |_| {});
        let plan = split(&config, "{ __typename complex { id } }");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0, 0);
        assert!(plan[0].1.contains("__typename"));
    }

    #[test]
    fn foreign_keys_are_replaced_by_key_stubs() {
        let orders = "type Mutation { orderCreate: OrderCreate } type OrderCreate { order: Order } type Order { id: ID }";
        let customers = "type Query { customer: Customer } type Order { id: ID customer: Customer } type Customer { id: ID }";
        let config = config(&[orders, customers], |registry| {
            registry.add_foreign_key("OrderCreate", "order", "id");
        });

        let document = parse_query("mutation { orderCreate { order { id customer { id } } } }").unwrap();
        let operation = select_operation(&document, None).unwrap();
        let plan = plan_query(&config, &document, operation).unwrap();

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(
            print_document(&plan.entries[0].document).unwrap(),
            "mutation {\n  orderCreate {\n    order {\n      id\n    }\n  }\n}\n"
        );
    }

    #[test]
    fn delayed_fields_are_left_out() {
        let config = config(&[COMPLEX, OTHER], |registry| {
            registry.add_delayed_fields([("Complex", ["name"])]);
        });
        let plan = split(&config, "{ complex { id name } }");
        assert_eq!(plan, [(0, "query {\n  complex {\n    id\n  }\n}\n".to_string())]);
    }

    #[test]
    fn fragments_are_filtered_per_origin() {
        let config = config(&[COMPLEX, OTHER], |_| {});
        let plan = split(
            &config,
            r#"query Both($g: Boolean) {
                 ...RootParts
                 otherComplex { ...OtherParts group @include(if: $g) { id } }
               }
               fragment RootParts on Query { complex { id } }
               fragment OtherParts on Other { name }
               fragment Unused on Complex { name }"#,
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan[0].1,
            "query Both($g: Boolean) {\n  ...RootParts\n}\n\nfragment RootParts on Query {\n  complex {\n    id\n  }\n}\n"
        );
        assert!(plan[1].1.contains("...OtherParts"), "{}", plan[1].1);
        assert!(plan[1].1.contains("fragment OtherParts on Other"), "{}", plan[1].1);
        assert!(!plan[1].1.contains("RootParts"), "{}", plan[1].1);
        assert!(!plan[1].1.contains("Unused"), "{}", plan[1].1);
    }

    #[test]
    fn shared_types_split_nested_fields_by_owner() {
        let users = "type Query { me: User } type User { id: ID name: String }";
        let profiles = "type Query { me: User } type User { id: ID avatar: String }";
        let config = config(&[users, profiles], |_| {});
        let plan = split(&config, "{ me { name avatar } }");
        assert_eq!(
            plan,
            [
                (0, "query {\n  me {\n    name\n  }\n}\n".to_string()),
                (1, "query {\n  me {\n    avatar\n  }\n}\n".to_string()),
            ]
        );
    }

    #[test]
    fn inline_fragments_use_their_type_condition() {
        let search = "type Query { search: [Result] } union Result = Book | Film type Book { title: String } type Film { length: Int }";
        let config = config(&[search], |_| {});
        let plan = split(
            &config,
            "{ search { __typename ... on Book { title } ... on Film { length } } }",
        );
        assert_eq!(plan.len(), 1);
        assert!(plan[0].1.contains("... on Book {\n      title"), "{}", plan[0].1);
        assert!(plan[0].1.contains("... on Film {\n      length"), "{}", plan[0].1);
    }

    #[test]
    fn subscriptions_are_rejected() {
        let config = config(&[COMPLEX], |_| {});
        let document = parse_query("subscription { complex { id } }").unwrap();
        let operation = select_operation(&document, None).unwrap();
        assert!(matches!(
            plan_query(&config, &document, operation),
            Err(FederationError::UnsupportedOperation("subscription"))
        ));
    }
}
