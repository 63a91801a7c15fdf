//! Owned aliases over the `graphql-parser` query AST.
//!
//! Every document handled by the gateway is parsed with `String` text so it can
//! outlive the request body it came from.

use graphql_parser::{Pos, query};
use serde_json::{Map, Number};

use crate::error::{FederationError, Result};

pub type Document = query::Document<'static, String>;
pub type Definition = query::Definition<'static, String>;
pub type OperationDefinition = query::OperationDefinition<'static, String>;
pub type FragmentDefinition = query::FragmentDefinition<'static, String>;
pub type VariableDefinition = query::VariableDefinition<'static, String>;
pub type SelectionSet = query::SelectionSet<'static, String>;
pub type Selection = query::Selection<'static, String>;
pub type Field = query::Field<'static, String>;
pub type FragmentSpread = query::FragmentSpread<'static, String>;
pub type InlineFragment = query::InlineFragment<'static, String>;
pub type Directive = query::Directive<'static, String>;
pub type Value = query::Value<'static, String>;
pub type Type = query::Type<'static, String>;

/// Position attached to nodes the gateway synthesizes.
pub const SYNTHETIC_POS: Pos = Pos { line: 0, column: 0 };

pub fn empty_selection_set() -> SelectionSet {
    SelectionSet {
        span: (SYNTHETIC_POS, SYNTHETIC_POS),
        items: Vec::new(),
    }
}

pub fn parse_query(query: &str) -> Result<Document> {
    query::parse_query::<String>(query)
        .map(|document| document.into_static())
        .map_err(|e| FederationError::QueryParse(e.to_string()))
}

/// The key a field is reported under in a response: its alias, or its name.
pub fn response_key(field: &Field) -> &str {
    field.alias.as_deref().unwrap_or(&field.name)
}

pub fn operation_name(operation: &OperationDefinition) -> Option<&str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

pub fn selection_set(operation: &OperationDefinition) -> &SelectionSet {
    match operation {
        OperationDefinition::SelectionSet(set) => set,
        OperationDefinition::Query(q) => &q.selection_set,
        OperationDefinition::Mutation(m) => &m.selection_set,
        OperationDefinition::Subscription(s) => &s.selection_set,
    }
}

pub fn selection_set_mut(operation: &mut OperationDefinition) -> &mut SelectionSet {
    match operation {
        OperationDefinition::SelectionSet(set) => set,
        OperationDefinition::Query(q) => &mut q.selection_set,
        OperationDefinition::Mutation(m) => &mut m.selection_set,
        OperationDefinition::Subscription(s) => &mut s.selection_set,
    }
}

pub fn variable_definitions(operation: &OperationDefinition) -> &[VariableDefinition] {
    match operation {
        OperationDefinition::SelectionSet(_) => &[],
        OperationDefinition::Query(q) => &q.variable_definitions,
        OperationDefinition::Mutation(m) => &m.variable_definitions,
        OperationDefinition::Subscription(s) => &s.variable_definitions,
    }
}

/// Keeps only the variable definitions whose name satisfies `keep`.
pub fn retain_variables(operation: &mut OperationDefinition, keep: impl Fn(&str) -> bool) {
    let definitions = match operation {
        OperationDefinition::SelectionSet(_) => return,
        OperationDefinition::Query(q) => &mut q.variable_definitions,
        OperationDefinition::Mutation(m) => &mut m.variable_definitions,
        OperationDefinition::Subscription(s) => &mut s.variable_definitions,
    };
    definitions.retain(|definition| keep(&definition.name));
}

pub fn operations(document: &Document) -> impl Iterator<Item = &OperationDefinition> {
    document.definitions.iter().filter_map(|definition| match definition {
        Definition::Operation(operation) => Some(operation),
        Definition::Fragment(_) => None,
    })
}

pub fn fragments(document: &Document) -> impl Iterator<Item = &FragmentDefinition> {
    document.definitions.iter().filter_map(|definition| match definition {
        Definition::Fragment(fragment) => Some(fragment),
        Definition::Operation(_) => None,
    })
}

/// Picks the operation a request targets.
///
/// A named request must match exactly one operation; two operations sharing
/// the name are ambiguous. An unnamed request is only valid when the document
/// holds a single operation.
pub fn select_operation<'a>(
    document: &'a Document,
    name: Option<&str>,
) -> Result<&'a OperationDefinition> {
    let mut candidates = operations(document)
        .filter(|operation| name.is_none_or(|name| operation_name(operation) == Some(name)));
    let operation = candidates.next().ok_or_else(|| match name {
        Some(name) => FederationError::OperationNotFound(name.to_string()),
        None => FederationError::MissingOperation,
    })?;
    if candidates.next().is_some() {
        return Err(FederationError::AmbiguousOperation);
    }
    Ok(operation)
}

/// Converts an argument literal to JSON, substituting variables. Unknown
/// variables become `null`.
pub fn value_to_json(value: &Value, variables: &Map<String, serde_json::Value>) -> serde_json::Value {
    match value {
        Value::Variable(name) => variables.get(name).cloned().unwrap_or_default(),
        Value::Int(number) => number
            .as_i64()
            .map(serde_json::Value::from)
            .unwrap_or_default(),
        Value::Float(float) => Number::from_f64(*float)
            .map(serde_json::Value::Number)
            .unwrap_or_default(),
        Value::String(string) => serde_json::Value::String(string.clone()),
        Value::Boolean(boolean) => serde_json::Value::Bool(*boolean),
        Value::Null => serde_json::Value::Null,
        Value::Enum(name) => serde_json::Value::String(name.clone()),
        Value::List(items) => items
            .iter()
            .map(|item| value_to_json(item, variables))
            .collect(),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), value_to_json(value, variables)))
                .collect(),
        ),
    }
}

pub fn arguments_to_json(
    arguments: &[(String, Value)],
    variables: &Map<String, serde_json::Value>,
) -> Map<String, serde_json::Value> {
    arguments
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value, variables)))
        .collect()
}

/// Evaluates `@skip` and `@include` against the request variables.
pub fn is_included(directives: &[Directive], variables: &Map<String, serde_json::Value>) -> bool {
    directives.iter().all(|directive| {
        let condition = directive
            .arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| value_to_json(value, variables))
            .and_then(|value| value.as_bool());
        match (directive.name.as_str(), condition) {
            ("skip", Some(skip)) => !skip,
            ("include", Some(include)) => include,
            _ => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_arguments_and_directive_conditions() {
        let document =
            parse_query(r#"query($id: ID, $on: Boolean) { a(id: $id, tags: [A, "b"], n: 1.5, o: {x: null}) @include(if: $on) }"#)
                .unwrap();
        let Some(Selection::Field(field)) = selection_set(operations(&document).next().unwrap())
            .items
            .first()
        else {
            panic!("expected a field");
        };
        let variables = json!({"id": "7", "on": false});
        let variables = variables.as_object().unwrap();

        assert_eq!(
            serde_json::Value::Object(arguments_to_json(&field.arguments, variables)),
            json!({"id": "7", "tags": ["A", "b"], "n": 1.5, "o": {"x": null}})
        );
        assert!(!is_included(&field.directives, variables));
        assert!(is_included(&field.directives, &Map::new()));
    }

    #[test]
    fn selects_named_and_single_operations() {
        let document = parse_query("query A { a } query B { b }").unwrap();
        let operation = select_operation(&document, Some("B")).unwrap();
        assert_eq!(operation_name(operation), Some("B"));

        assert!(matches!(
            select_operation(&document, None),
            Err(FederationError::AmbiguousOperation)
        ));
        assert!(matches!(
            select_operation(&document, Some("C")),
            Err(FederationError::OperationNotFound(name)) if name == "C"
        ));

        let document = parse_query("{ a }").unwrap();
        assert!(select_operation(&document, None).is_ok());

        let document = parse_query("fragment F on Query { a }").unwrap();
        assert!(matches!(
            select_operation(&document, None),
            Err(FederationError::MissingOperation)
        ));
    }

    #[test]
    fn duplicate_operation_names_are_ambiguous() {
        let document = parse_query("query A { a } query A { b } query B { c }").unwrap();
        assert!(matches!(
            select_operation(&document, Some("A")),
            Err(FederationError::AmbiguousOperation)
        ));
        assert!(select_operation(&document, Some("B")).is_ok());
    }
}
