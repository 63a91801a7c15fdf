//! Cuts an operation down to the single field a resolver is responsible for.
//!
//! Given the response path of a field, the narrowed operation keeps the chain
//! of fields leading to it (and any inline fragment or fragment spread on the
//! way, rewritten as inline fragments so type conditions survive), attaches the
//! field's original selection set unchanged, and drops every variable
//! definition the narrowed tree no longer references.

use std::collections::{BTreeSet, HashMap, HashSet};

use graphql_parser::query::{Selection, TypeCondition};

use crate::ast::{
    self, Definition, Document, Field, FragmentDefinition, InlineFragment, OperationDefinition,
    SelectionSet, Value,
};
use crate::error::{FederationError, Result};

enum Step<'a> {
    Field(&'a Field),
    Fragment {
        type_condition: Option<TypeCondition<'static, String>>,
        directives: &'a [ast::Directive],
    },
}

/// Narrows `operation` to the field found at `path`.
///
/// Path segments are response keys. Numeric segments, which index into lists,
/// are skipped.
pub fn narrow_operation<S: AsRef<str>>(
    document: &Document,
    operation: &OperationDefinition,
    path: &[S],
) -> Result<Document> {
    let fragments: HashMap<&str, &FragmentDefinition> = ast::fragments(document)
        .map(|fragment| (fragment.name.as_str(), fragment))
        .collect();
    let keys: Vec<&str> = path
        .iter()
        .map(AsRef::as_ref)
        .filter(|segment| segment.parse::<usize>().is_err())
        .collect();
    let not_found = || FederationError::PathNotFound(keys.join("."));
    if keys.is_empty() {
        return Err(not_found());
    }

    let mut steps = Vec::new();
    let mut selection_set = ast::selection_set(operation);
    for key in &keys {
        let mut visited = HashSet::new();
        let found = find_field(selection_set, key, &fragments, &mut visited, &mut steps);
        let Some(field) = found else {
            return Err(not_found());
        };
        selection_set = &field.selection_set;
    }

    let mut narrowed = operation.clone();
    ast::selection_set_mut(&mut narrowed).items = vec![rebuild(&steps)];

    let mut document = Document {
        definitions: vec![Definition::Operation(narrowed)],
    };
    attach_fragments(&mut document, &fragments);
    prune_unused_variables(&mut document);
    Ok(document)
}

/// Looks for the field with response key `key`, looking through inline
/// fragments and fragment spreads. Every step taken is pushed onto `steps`.
fn find_field<'a>(
    selection_set: &'a SelectionSet,
    key: &str,
    fragments: &HashMap<&str, &'a FragmentDefinition>,
    visited: &mut HashSet<String>,
    steps: &mut Vec<Step<'a>>,
) -> Option<&'a Field> {
    for selection in &selection_set.items {
        if let Selection::Field(field) = selection {
            if ast::response_key(field) == key {
                steps.push(Step::Field(field));
                return Some(field);
            }
        }
    }

    for selection in &selection_set.items {
        let (type_condition, directives, inner) = match selection {
            Selection::Field(_) => continue,
            Selection::InlineFragment(inline) => (
                inline.type_condition.clone(),
                &inline.directives[..],
                &inline.selection_set,
            ),
            Selection::FragmentSpread(spread) => {
                let Some(&fragment) = fragments.get(spread.fragment_name.as_str()) else {
                    continue;
                };
                if !visited.insert(fragment.name.clone()) {
                    continue;
                }
                (
                    Some(fragment.type_condition.clone()),
                    &spread.directives[..],
                    &fragment.selection_set,
                )
            }
        };
        let depth = steps.len();
        steps.push(Step::Fragment {
            type_condition,
            directives,
        });
        if let Some(field) = find_field(inner, key, fragments, visited, steps) {
            return Some(field);
        }
        steps.truncate(depth);
    }
    None
}

fn rebuild(steps: &[Step<'_>]) -> ast::Selection {
    let (first, rest) = match steps.split_first() {
        Some(split) => split,
        None => unreachable!("a narrowed path always holds at least one field"),
    };
    match first {
        Step::Field(field) if rest.is_empty() => Selection::Field((*field).clone()),
        Step::Field(field) => {
            let mut field = (*field).clone();
            field.selection_set.items = vec![rebuild(rest)];
            Selection::Field(field)
        }
        Step::Fragment {
            type_condition,
            directives,
        } => Selection::InlineFragment(InlineFragment {
            position: ast::SYNTHETIC_POS,
            type_condition: type_condition.clone(),
            directives: directives.to_vec(),
            selection_set: SelectionSet {
                items: vec![rebuild(rest)],
                ..ast::empty_selection_set()
            },
        }),
    }
}

/// Appends every fragment transitively spread by `document`'s operations.
pub(crate) fn attach_fragments(
    document: &mut Document,
    fragments: &HashMap<&str, &FragmentDefinition>,
) {
    let mut pending: Vec<String> = Vec::new();
    for operation in ast::operations(document) {
        collect_spreads(ast::selection_set(operation), &mut pending);
    }

    let mut attached = HashSet::new();
    while let Some(name) = pending.pop() {
        if !attached.insert(name.clone()) {
            continue;
        }
        if let Some(fragment) = fragments.get(name.as_str()) {
            collect_spreads(&fragment.selection_set, &mut pending);
            document
                .definitions
                .push(Definition::Fragment((*fragment).clone()));
        }
    }
}

pub(crate) fn collect_spreads(selection_set: &SelectionSet, names: &mut Vec<String>) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => collect_spreads(&field.selection_set, names),
            Selection::FragmentSpread(spread) => names.push(spread.fragment_name.clone()),
            Selection::InlineFragment(inline) => collect_spreads(&inline.selection_set, names),
        }
    }
}

/// Names of every variable referenced anywhere in `document`'s selections,
/// including arguments of directives.
pub fn used_variables(document: &Document) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    for definition in &document.definitions {
        let selection_set = match definition {
            Definition::Operation(operation) => ast::selection_set(operation),
            Definition::Fragment(fragment) => &fragment.selection_set,
        };
        collect_variables(selection_set, &mut used);
    }
    used
}

/// Removes variable definitions that nothing in `document` references.
pub fn prune_unused_variables(document: &mut Document) {
    let used = used_variables(document);
    for definition in &mut document.definitions {
        if let Definition::Operation(operation) = definition {
            ast::retain_variables(operation, |name| used.contains(name));
        }
    }
}

fn collect_variables(selection_set: &SelectionSet, used: &mut BTreeSet<String>) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_value_variables(value, used);
                }
                collect_directive_variables(&field.directives, used);
                collect_variables(&field.selection_set, used);
            }
            Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, used);
            }
            Selection::InlineFragment(inline) => {
                collect_directive_variables(&inline.directives, used);
                collect_variables(&inline.selection_set, used);
            }
        }
    }
}

fn collect_directive_variables(directives: &[ast::Directive], used: &mut BTreeSet<String>) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            collect_value_variables(value, used);
        }
    }
}

fn collect_value_variables(value: &Value, used: &mut BTreeSet<String>) {
    match value {
        Value::Variable(name) => {
            used.insert(name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_value_variables(item, used);
            }
        }
        Value::Object(fields) => {
            for item in fields.values() {
                collect_value_variables(item, used);
            }
        }
        _ => {}
    }
}
