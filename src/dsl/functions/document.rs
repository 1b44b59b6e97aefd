//! Queries into JSON and XML documents passed as strings.

use serde_json_path::JsonPath;
use sxd_document::dom::{ChildOfElement, Element};
use sxd_xpath::nodeset::Node;

use super::to_text;
use crate::variant::Variant;

/// Document, path and optional default, each converted to a string.
fn document_args(args: &[Variant]) -> Result<(String, String, Option<String>), String> {
    let document = to_text(&args[0]).map_err(|_| "invalid first parameter".to_string())?;
    let path = to_text(&args[1]).map_err(|_| "invalid second parameter".to_string())?;
    let default = args
        .get(2)
        .map(|arg| to_text(arg).map_err(|_| "invalid third parameter".to_string()))
        .transpose()?;
    Ok((document, path, default))
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `jsonpath(json, path[, default])`. A single match yields the matched value
/// (strings unquoted, anything else as JSON text); several matches yield a
/// JSON array. An empty result falls back to `default`.
pub(crate) fn jsonpath(args: &[Variant]) -> Result<Variant, String> {
    let (json, path, default) = document_args(args)?;

    let document: serde_json::Value = serde_json::from_str(&json)
        .map_err(|err| format!("cannot parse as a valid JSON object: {}", err))?;
    let path = JsonPath::parse(&path)
        .map_err(|err| format!("cannot parse JSONPath \"{}\": {}", path, err))?;

    let nodes = path.query(&document).all();
    let text = match nodes.as_slice() {
        [] => None,
        [single] => Some(json_text(single)),
        many => Some(serde_json::Value::Array(many.iter().map(|v| (*v).clone()).collect()).to_string()),
    };

    match (text, default) {
        (Some(text), _) => Ok(Variant::Str(text)),
        (None, Some(default)) => Ok(Variant::Str(default)),
        (None, None) => Err("jsonpath returned no value".to_string()),
    }
}

fn escape_xml(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn qualified_name(local: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

fn write_element(element: Element<'_>, out: &mut String) {
    let name = qualified_name(element.name().local_part(), element.preferred_prefix());
    out.push('<');
    out.push_str(&name);
    for attribute in element.attributes() {
        out.push(' ');
        out.push_str(&qualified_name(
            attribute.name().local_part(),
            attribute.preferred_prefix(),
        ));
        out.push_str("=\"");
        escape_xml(attribute.value(), out);
        out.push('"');
    }

    let children = element.children();
    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in children {
        match child {
            ChildOfElement::Element(child) => write_element(child, out),
            ChildOfElement::Text(text) => escape_xml(text.text(), out),
            ChildOfElement::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment.text());
                out.push_str("-->");
            }
            ChildOfElement::ProcessingInstruction(pi) => {
                out.push_str("<?");
                out.push_str(pi.target());
                if let Some(value) = pi.value() {
                    out.push(' ');
                    out.push_str(value);
                }
                out.push_str("?>");
            }
        }
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

/// Elements render as markup, every other node as its string value.
fn node_text(node: Node<'_>, out: &mut String) {
    match node {
        Node::Element(element) => write_element(element, out),
        other => out.push_str(&other.string_value()),
    }
}

/// `xmlxpath(xml, xpath[, default])`. Node sets are concatenated in document
/// order, booleans render as `1`/`0`. An empty node set falls back to
/// `default`.
pub(crate) fn xmlxpath(args: &[Variant]) -> Result<Variant, String> {
    let (xml, path, default) = document_args(args)?;

    let package =
        sxd_document::parser::parse(&xml).map_err(|_| "cannot parse xml value".to_string())?;
    let document = package.as_document();
    let value = sxd_xpath::evaluate_xpath(&document, &path)
        .map_err(|err| format!("cannot evaluate xpath \"{}\": {}", path, err))?;

    let text = match value {
        sxd_xpath::Value::Nodeset(nodes) => {
            let nodes = nodes.document_order();
            if nodes.is_empty() {
                None
            } else {
                let mut out = String::new();
                for node in nodes {
                    node_text(node, &mut out);
                }
                Some(out)
            }
        }
        sxd_xpath::Value::Boolean(value) => Some(if value { "1" } else { "0" }.to_string()),
        sxd_xpath::Value::Number(value) => Some(Variant::Double(value).value_desc()),
        sxd_xpath::Value::String(value) => Some(value),
    };

    match (text, default) {
        (Some(text), _) => Ok(Variant::Str(text)),
        (None, Some(default)) => Ok(Variant::Str(default)),
        (None, None) => Err("XML xpath returned empty nodeset".to_string()),
    }
}
