// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decoding of transition arguments into structured configuration.
//!
//! Transition requests carry an ordered list of string key/value pairs.
//! Three key shapes exist:
//!
//! - plain keys, injected as strings at their (possibly dotted) path;
//! - `chans.<channel>.<property>` keys, where a fixed set of properties is
//!   typed as integers (proxy variant);
//! - `__ptree__:<ini|json|xml>:<attachKey>` keys, whose value is an embedded
//!   document parsed per the named syntax and attached at `<attachKey>`.
//!
//! Decoding is pure: no I/O, and a malformed typed-subtree entry is dropped
//! with a warning rather than failing the surrounding transition.

use occ_protocol::control_proto::ConfigEntry;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Structured configuration tree handed to the task's configure hook.
pub type PropertyTree = Value;

/// Prefix of keys that carry an embedded document.
pub const PTREE_PREFIX: &str = "__ptree__:";

/// Channel properties injected as integers when they appear under `chans.`.
pub const CHANNEL_INT_PROPERTIES: &[&str] = &[
    "rateLogging",
    "rcvBufSize",
    "sndBufSize",
    "linger",
    "rcvKernelSize",
    "sndKernelSize",
];

/// Errors produced while decoding typed-subtree entries.
#[derive(Debug, Clone, Error)]
pub enum PropertyError {
    /// A `__ptree__:` key had the wrong shape, an unknown syntax, or an
    /// unparsable payload. The entry is dropped.
    #[error("malformed typed key {key}: {reason}")]
    MalformedTypedKey {
        /// The offending key.
        key: String,
        /// What went wrong.
        reason: String,
    },
}

/// A single property injection for the device property interface.
#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    /// Full property path.
    pub key: String,
    /// Typed value.
    pub value: PropertyValue,
}

/// Value types accepted by the device property interface.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Plain string property.
    String(String),
    /// Integer-typed channel property.
    Int(i32),
    /// Structured subtree from a `__ptree__:` entry.
    Tree(Value),
}

/// Decode an argument list into a property tree (embedded variant).
///
/// Entries are applied in order; a later entry at the same path wins.
pub fn decode_tree(entries: &[ConfigEntry]) -> PropertyTree {
    let mut root = Map::new();
    for entry in entries {
        if entry.key.starts_with(PTREE_PREFIX) {
            match parse_embedded_document(&entry.key, &entry.value) {
                Ok((attach_key, tree)) => put_dotted(&mut root, &attach_key, tree),
                Err(e) => warn!("dropping configuration entry: {e}"),
            }
        } else {
            put_dotted(&mut root, &entry.key, Value::String(entry.value.clone()));
        }
    }
    Value::Object(root)
}

/// Decode a single argument into a typed injection (proxy variant).
///
/// Channel keys keep their full `chans.<channel>.<property>` path.
pub fn decode_entry(key: &str, value: &str) -> Result<Injection, PropertyError> {
    if let Some(rest) = key.strip_prefix("chans.") {
        let property = rest.rsplit('.').next().unwrap_or(rest);
        if CHANNEL_INT_PROPERTIES.contains(&property) {
            // Unparsable integers degrade to string injection.
            if let Ok(int_value) = value.parse::<i32>() {
                return Ok(Injection {
                    key: key.to_string(),
                    value: PropertyValue::Int(int_value),
                });
            }
        }
        return Ok(Injection {
            key: key.to_string(),
            value: PropertyValue::String(value.to_string()),
        });
    }

    if key.starts_with(PTREE_PREFIX) {
        let (attach_key, tree) = parse_embedded_document(key, value)?;
        return Ok(Injection {
            key: attach_key,
            value: PropertyValue::Tree(tree),
        });
    }

    Ok(Injection {
        key: key.to_string(),
        value: PropertyValue::String(value.to_string()),
    })
}

/// Parse a `__ptree__:<syntax>:<attachKey>` entry into its attach key and
/// document tree.
pub fn parse_embedded_document(key: &str, value: &str) -> Result<(String, Value), PropertyError> {
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() != 3 {
        return Err(PropertyError::MalformedTypedKey {
            key: key.to_string(),
            reason: "expected __ptree__:<syntax>:<attachKey>".to_string(),
        });
    }

    let syntax = parts[1];
    let attach_key = parts[2].to_string();

    let tree = match syntax {
        "json" => serde_json::from_str(value).map_err(|e| PropertyError::MalformedTypedKey {
            key: key.to_string(),
            reason: format!("json: {e}"),
        })?,
        "ini" => parse_ini_document(value).map_err(|reason| PropertyError::MalformedTypedKey {
            key: key.to_string(),
            reason: format!("ini: {reason}"),
        })?,
        "xml" => parse_xml_document(value).map_err(|reason| PropertyError::MalformedTypedKey {
            key: key.to_string(),
            reason: format!("xml: {reason}"),
        })?,
        other => {
            return Err(PropertyError::MalformedTypedKey {
                key: key.to_string(),
                reason: format!("unknown syntax {other}"),
            });
        }
    };

    Ok((attach_key, tree))
}

/// Run number carried in the arguments (`runNumber` key, base 10).
///
/// Returns 0 when the key is absent or its value has no leading digits.
pub fn run_number(entries: &[ConfigEntry]) -> u32 {
    let Some(raw) = entries
        .iter()
        .filter(|e| e.key == "runNumber")
        .next_back()
        .map(|e| e.value.as_str())
    else {
        return 0;
    };
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Insert a value at a dotted path, creating intermediate objects.
fn put_dotted(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = slot.as_object_mut().unwrap();
    }
}

fn parse_ini_document(input: &str) -> Result<Value, String> {
    let document = ini::Ini::load_from_str(input).map_err(|e| e.to_string())?;

    let mut root = Map::new();
    for (section, properties) in document.iter() {
        match section {
            // Keys outside any section live at the top level.
            None => {
                for (k, v) in properties.iter() {
                    root.insert(k.to_string(), Value::String(v.to_string()));
                }
            }
            Some(name) => {
                let mut child = Map::new();
                for (k, v) in properties.iter() {
                    child.insert(k.to_string(), Value::String(v.to_string()));
                }
                root.insert(name.to_string(), Value::Object(child));
            }
        }
    }
    Ok(Value::Object(root))
}

/// XML elements map to nested objects, text content to string values and
/// attributes to an `<xmlattr>` child object. Duplicate sibling element
/// names keep the last occurrence.
fn parse_xml_document(input: &str) -> Result<Value, String> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    #[derive(Default)]
    struct Node {
        children: Map<String, Value>,
        attrs: Map<String, Value>,
        text: String,
    }

    fn finish(node: Node) -> Value {
        if node.children.is_empty() && node.attrs.is_empty() {
            return Value::String(node.text);
        }
        let mut object = node.children;
        if !node.attrs.is_empty() {
            object.insert("<xmlattr>".to_string(), Value::Object(node.attrs));
        }
        Value::Object(object)
    }

    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    fn element_node(start: &quick_xml::events::BytesStart<'_>) -> Result<(String, Node), String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
        let mut node = Node::default();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let attr_name = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let attr_value = attr.unescape_value().map_err(|e| e.to_string())?;
            node.attrs
                .insert(attr_name, Value::String(attr_value.to_string()));
        }
        Ok((name, node))
    }

    let mut root = Node::default();
    let mut stack: Vec<(String, Node)> = Vec::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => {
                stack.push(element_node(&start)?);
            }
            Event::Empty(start) => {
                // Self-closing elements produce no End event.
                let (name, node) = element_node(&start)?;
                let value = finish(node);
                match stack.last_mut() {
                    Some((_, parent)) => {
                        parent.children.insert(name, value);
                    }
                    None => {
                        root.children.insert(name, value);
                    }
                }
            }
            Event::Text(text) => {
                let content = text.unescape().map_err(|e| e.to_string())?;
                match stack.last_mut() {
                    Some((_, node)) => node.text.push_str(&content),
                    None => root.text.push_str(&content),
                }
            }
            Event::End(_) => {
                let (name, node) = stack.pop().ok_or("unbalanced closing tag")?;
                let value = finish(node);
                match stack.last_mut() {
                    Some((_, parent)) => {
                        parent.children.insert(name, value);
                    }
                    None => {
                        root.children.insert(name, value);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unclosed element".to_string());
    }
    Ok(Value::Object(root.children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, value: &str) -> ConfigEntry {
        ConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_decode_tree_plain_keys() {
        let tree = decode_tree(&[entry("runNumber", "42"), entry("roc.enabled", "true")]);
        assert_eq!(tree["runNumber"], json!("42"));
        assert_eq!(tree["roc"]["enabled"], json!("true"));
    }

    #[test]
    fn test_decode_tree_last_entry_wins() {
        let tree = decode_tree(&[entry("k", "first"), entry("k", "second")]);
        assert_eq!(tree["k"], json!("second"));
    }

    #[test]
    fn test_decode_tree_json_subtree() {
        let tree = decode_tree(&[entry("__ptree__:json:cfg", r#"{"a": {"b": "c"}}"#)]);
        assert_eq!(tree["cfg"]["a"]["b"], json!("c"));
    }

    #[test]
    fn test_decode_tree_drops_malformed_subtree() {
        let tree = decode_tree(&[
            entry("__ptree__:json:bad", "{not json"),
            entry("kept", "yes"),
        ]);
        assert!(tree.get("bad").is_none());
        assert_eq!(tree["kept"], json!("yes"));
    }

    #[test]
    fn test_parse_embedded_document_shapes() {
        assert!(parse_embedded_document("__ptree__:json", "{}").is_err());
        assert!(parse_embedded_document("__ptree__:yaml:k", "a: b").is_err());
        let (key, tree) = parse_embedded_document("__ptree__:json:k", r#"{"x": 1}"#).unwrap();
        assert_eq!(key, "k");
        assert_eq!(tree["x"], json!(1));
    }

    #[test]
    fn test_parse_ini_subtree() {
        let input = "top=level\n[section]\nkey=value\nother=2\n";
        let (key, tree) = parse_embedded_document("__ptree__:ini:cfg", input).unwrap();
        assert_eq!(key, "cfg");
        assert_eq!(tree["top"], json!("level"));
        assert_eq!(tree["section"]["key"], json!("value"));
        assert_eq!(tree["section"]["other"], json!("2"));
    }

    #[test]
    fn test_parse_xml_subtree() {
        let input = "<root><name>reader</name><port rate=\"5\">6001</port></root>";
        let (_, tree) = parse_embedded_document("__ptree__:xml:cfg", input).unwrap();
        assert_eq!(tree["root"]["name"], json!("reader"));
        assert_eq!(tree["root"]["port"]["<xmlattr>"]["rate"], json!("5"));
    }

    #[test]
    fn test_parse_xml_malformed() {
        assert!(parse_embedded_document("__ptree__:xml:cfg", "<a><b></a>").is_err());
    }

    #[test]
    fn test_decode_entry_channel_int() {
        let injection = decode_entry("chans.data.rateLogging", "60").unwrap();
        assert_eq!(injection.key, "chans.data.rateLogging");
        assert_eq!(injection.value, PropertyValue::Int(60));
    }

    #[test]
    fn test_decode_entry_channel_int_fallback_to_string() {
        let injection = decode_entry("chans.data.rcvBufSize", "lots").unwrap();
        assert_eq!(injection.value, PropertyValue::String("lots".to_string()));
    }

    #[test]
    fn test_decode_entry_channel_string_property() {
        let injection = decode_entry("chans.data.transport", "zeromq").unwrap();
        assert_eq!(injection.key, "chans.data.transport");
        assert_eq!(
            injection.value,
            PropertyValue::String("zeromq".to_string())
        );
    }

    #[test]
    fn test_decode_entry_plain() {
        let injection = decode_entry("severity", "debug").unwrap();
        assert_eq!(injection.value, PropertyValue::String("debug".to_string()));
    }

    #[test]
    fn test_decode_entry_ptree() {
        let injection = decode_entry("__ptree__:json:cfg", r#"{"a": "b"}"#).unwrap();
        assert_eq!(injection.key, "cfg");
        assert!(matches!(injection.value, PropertyValue::Tree(_)));
    }

    #[test]
    fn test_decode_entry_malformed_ptree() {
        assert!(decode_entry("__ptree__:json:cfg", "{oops").is_err());
    }

    #[test]
    fn test_run_number() {
        assert_eq!(run_number(&[entry("runNumber", "42")]), 42);
        assert_eq!(run_number(&[entry("runNumber", "17abc")]), 17);
        assert_eq!(run_number(&[entry("runNumber", "abc")]), 0);
        assert_eq!(run_number(&[entry("other", "42")]), 0);
        assert_eq!(run_number(&[]), 0);
        // Last occurrence wins, as in the decoded tree.
        assert_eq!(
            run_number(&[entry("runNumber", "1"), entry("runNumber", "2")]),
            2
        );
    }
}
