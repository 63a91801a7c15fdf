//! Canonical query text for operations and fragments.
//!
//! The output uses a fixed two-space indentation and keeps selections and
//! arguments in document order, so a given tree always prints the same text.
//! That makes the printed form usable both as an upstream request body and as
//! a cache fingerprint.

use std::fmt::{self, Write};

use graphql_parser::query::{OperationDefinition, Selection, TypeCondition};

use crate::ast::{
    self, Directive, Document, FragmentDefinition, SelectionSet, Type, Value, VariableDefinition,
};
use crate::error::{FederationError, Result};

const INDENT: &str = "  ";

/// Prints every operation and fragment of `document`, separated by a blank line.
pub fn print_document(document: &Document) -> Result<String> {
    let mut blocks = Vec::with_capacity(document.definitions.len());
    for definition in &document.definitions {
        blocks.push(match definition {
            ast::Definition::Operation(operation) => print_operation(operation)?,
            ast::Definition::Fragment(fragment) => print_fragment(fragment)?,
        });
    }
    Ok(blocks.join("\n"))
}

pub fn print_operation(operation: &ast::OperationDefinition) -> Result<String> {
    let (keyword, name, variables, directives) = match operation {
        OperationDefinition::SelectionSet(_) => ("query", None, &[][..], &[][..]),
        OperationDefinition::Query(q) => (
            "query",
            q.name.as_deref(),
            &q.variable_definitions[..],
            &q.directives[..],
        ),
        OperationDefinition::Mutation(m) => (
            "mutation",
            m.name.as_deref(),
            &m.variable_definitions[..],
            &m.directives[..],
        ),
        OperationDefinition::Subscription(s) => (
            "subscription",
            s.name.as_deref(),
            &s.variable_definitions[..],
            &s.directives[..],
        ),
    };
    if !directives.is_empty() {
        return Err(FederationError::UnsupportedDirectives(
            name.unwrap_or("<anonymous>").to_string(),
        ));
    }

    let mut out = String::from(keyword);
    if let Some(name) = name {
        out.push(' ');
        out.push_str(name);
    }
    write_variable_definitions(&mut out, variables)
        .and_then(|_| {
            out.push(' ');
            write_selection_set(&mut out, ast::selection_set(operation), 0)
        })
        .map_err(|_| unprintable("operation"))?;
    out.push('\n');
    Ok(out)
}

pub fn print_fragment(fragment: &FragmentDefinition) -> Result<String> {
    let TypeCondition::On(type_name) = &fragment.type_condition;
    let mut out = format!("fragment {} on {}", fragment.name, type_name);
    write_directives(&mut out, &fragment.directives)
        .and_then(|_| {
            out.push(' ');
            write_selection_set(&mut out, &fragment.selection_set, 0)
        })
        .map_err(|_| unprintable("fragment"))?;
    out.push('\n');
    Ok(out)
}

fn unprintable(what: &str) -> FederationError {
    FederationError::QueryParse(format!("{what} contains an unprintable value"))
}

fn write_variable_definitions(out: &mut String, variables: &[VariableDefinition]) -> fmt::Result {
    if variables.is_empty() {
        return Ok(());
    }
    out.push('(');
    for (i, variable) in variables.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "${}: ", variable.name)?;
        write_type(out, &variable.var_type)?;
        if let Some(default) = &variable.default_value {
            out.push_str(" = ");
            print_value(out, default)?;
        }
    }
    out.push(')');
    Ok(())
}

fn write_type(out: &mut String, ty: &Type) -> fmt::Result {
    match ty {
        Type::NamedType(name) => out.push_str(name),
        Type::ListType(inner) => {
            out.push('[');
            write_type(out, inner)?;
            out.push(']');
        }
        Type::NonNullType(inner) => {
            write_type(out, inner)?;
            out.push('!');
        }
    }
    Ok(())
}

fn write_selection_set(out: &mut String, selection_set: &SelectionSet, depth: usize) -> fmt::Result {
    out.push_str("{\n");
    for selection in &selection_set.items {
        write_indent(out, depth + 1);
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    write!(out, "{alias}: ")?;
                }
                out.push_str(&field.name);
                write_arguments(out, &field.arguments)?;
                write_directives(out, &field.directives)?;
                if !field.selection_set.items.is_empty() {
                    out.push(' ');
                    write_selection_set(out, &field.selection_set, depth + 1)?;
                }
            }
            Selection::FragmentSpread(spread) => {
                write!(out, "...{}", spread.fragment_name)?;
                write_directives(out, &spread.directives)?;
            }
            Selection::InlineFragment(inline) => {
                out.push_str("...");
                if let Some(TypeCondition::On(type_name)) = &inline.type_condition {
                    write!(out, " on {type_name}")?;
                }
                write_directives(out, &inline.directives)?;
                out.push(' ');
                write_selection_set(out, &inline.selection_set, depth + 1)?;
            }
        }
        out.push('\n');
    }
    write_indent(out, depth);
    out.push('}');
    Ok(())
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_arguments(out: &mut String, arguments: &[(String, Value)]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    out.push('(');
    for (i, (name, value)) in arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{name}: ")?;
        print_value(out, value)?;
    }
    out.push(')');
    Ok(())
}

fn write_directives(out: &mut String, directives: &[Directive]) -> fmt::Result {
    for directive in directives {
        write!(out, " @{}", directive.name)?;
        write_arguments(out, &directive.arguments)?;
    }
    Ok(())
}

/// Writes a value literal in GraphQL syntax.
pub fn print_value<W: Write>(out: &mut W, value: &Value) -> fmt::Result {
    match value {
        Value::Variable(name) => write!(out, "${name}"),
        Value::Int(number) => match number.as_i64() {
            Some(n) => write!(out, "{n}"),
            None => Err(fmt::Error),
        },
        Value::Float(number) => write!(out, "{number:?}"),
        Value::String(string) => write!(out, "{}", serde_json::Value::from(string.as_str())),
        Value::Boolean(true) => out.write_str("true"),
        Value::Boolean(false) => out.write_str("false"),
        Value::Null => out.write_str("null"),
        Value::Enum(name) => out.write_str(name),
        Value::List(items) => {
            out.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                print_value(out, item)?;
            }
            out.write_char(']')
        }
        Value::Object(fields) => {
            out.write_char('{')?;
            for (i, (name, item)) in fields.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write!(out, "{name}: ")?;
                print_value(out, item)?;
            }
            out.write_char('}')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_query, select_operation};
    use pretty_assertions::assert_eq;

    fn print(query: &str) -> String {
        let document = parse_query(query).unwrap();
        print_document(&document).unwrap()
    }

    #[test]
    fn prints_operation_header_and_nested_selections() {
        let printed = print(
            "query Get($id: ID!, $n: [Int!] = [1, 2]) { u: user(id: $id) { name friends(first: $n) { id } } }",
        );
        assert_eq!(
            printed,
            "query Get($id: ID!, $n: [Int!] = [1, 2]) {\n  u: user(id: $id) {\n    name\n    friends(first: $n) {\n      id\n    }\n  }\n}\n"
        );
    }

    #[test]
    fn prints_literal_values() {
        let printed = print(
            r#"mutation { set(a: true, b: false, c: null, d: RED, e: 1.5, f: -3, g: "say \"hi\"", h: {x: 1, y: [A]}) }"#,
        );
        assert_eq!(
            printed,
            "mutation {\n  set(a: true, b: false, c: null, d: RED, e: 1.5, f: -3, g: \"say \\\"hi\\\"\", h: {x: 1, y: [A]})\n}\n"
        );
    }

    #[test]
    fn multiline_strings_survive_a_reparse() {
        let text = "  indented\n    \"quoted\"\n\ttab\n\n";
        let document = parse_query(&format!(
            "{{ note(text: {}) }}",
            serde_json::Value::from(text)
        ))
        .unwrap();
        let printed = print_document(&document).unwrap();
        assert!(!printed.contains("\"\"\""), "{printed}");

        let reparsed = parse_query(&printed).unwrap();
        let operation = select_operation(&reparsed, None).unwrap();
        let Selection::Field(field) = &ast::selection_set(operation).items[0] else {
            panic!("expected a field");
        };
        assert_eq!(field.arguments[0].1, Value::String(text.to_string()));
    }

    #[test]
    fn block_strings_are_sent_as_their_parsed_value() {
        let printed = print("{ note(text: \"\"\"\n    line one\n      line two\n\"\"\") }");
        assert!(printed.contains(r#"note(text: "line one\n  line two")"#), "{printed}");
    }

    #[test]
    fn prints_fragments_and_spreads() {
        let printed = print(
            "query { node { ...Parts ... on User { name } } } fragment Parts on Node { id }",
        );
        assert_eq!(
            printed,
            "query {\n  node {\n    ...Parts\n    ... on User {\n      name\n    }\n  }\n}\n\nfragment Parts on Node {\n  id\n}\n"
        );
    }

    #[test]
    fn operation_directives_are_rejected() {
        let document = parse_query("query Cached @cached { a }").unwrap();
        let operation = select_operation(&document, None).unwrap();
        assert!(matches!(
            print_operation(operation),
            Err(FederationError::UnsupportedDirectives(name)) if name == "Cached"
        ));
    }
}
