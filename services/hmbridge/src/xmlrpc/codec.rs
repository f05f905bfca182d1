//! XML-RPC marshalling
//!
//! Decoding goes through `roxmltree`; encoding writes the (small) document
//! directly. The controller declares ISO-8859-1 for its requests, so bodies that
//! are not valid UTF-8 are decoded byte-per-char.

use base64::Engine;
use roxmltree::{Document, Node};

use super::{Fault, RpcError, Value};

/// Decoded `methodCall`
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

/// Decode a request or response body to text
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // ISO-8859-1 maps every byte to the code point of the same value
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn strip_declaration(text: &str) -> &str {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}

fn parse_document(text: &str) -> Result<Document<'_>, RpcError> {
    Document::parse(strip_declaration(text)).map_err(|e| RpcError::codec(e.to_string()))
}

fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    child_elements(node).find(|n| n.tag_name().name() == name)
}

fn text_of(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn parse_value(node: Node<'_, '_>) -> Result<Value, RpcError> {
    let Some(typed) = child_elements(node).next() else {
        return Ok(Value::String(text_of(node)));
    };

    let text = text_of(typed);
    match typed.tag_name().name() {
        "i4" | "int" | "i8" => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| RpcError::codec(format!("invalid integer '{}': {}", text, e))),
        "boolean" => match text.trim() {
            "1" | "true" => Ok(Value::Boolean(true)),
            "0" | "false" => Ok(Value::Boolean(false)),
            other => Err(RpcError::codec(format!("invalid boolean '{}'", other))),
        },
        "double" => text
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| RpcError::codec(format!("invalid double '{}': {}", text, e))),
        "string" => Ok(Value::String(text)),
        "dateTime.iso8601" => Ok(Value::DateTime(text.trim().to_string())),
        "base64" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map(Value::Base64)
                .map_err(|e| RpcError::codec(format!("invalid base64: {}", e)))
        },
        "array" => {
            let data = child(typed, "data").ok_or_else(|| RpcError::codec("array without data"))?;
            child_elements(data)
                .filter(|n| n.tag_name().name() == "value")
                .map(parse_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        },
        "struct" => {
            let mut members = Vec::new();
            for member in child_elements(typed).filter(|n| n.tag_name().name() == "member") {
                let name = child(member, "name")
                    .map(text_of)
                    .ok_or_else(|| RpcError::codec("struct member without name"))?;
                let value = match child(member, "value") {
                    Some(v) => parse_value(v)?,
                    None => Value::Nil,
                };
                members.push((name, value));
            }
            Ok(Value::Struct(members))
        },
        "nil" => Ok(Value::Nil),
        other => Err(RpcError::codec(format!("unsupported value type <{}>", other))),
    }
}

fn parse_params(node: Option<Node<'_, '_>>) -> Result<Vec<Value>, RpcError> {
    let Some(params) = node else {
        return Ok(Vec::new());
    };
    child_elements(params)
        .filter(|n| n.tag_name().name() == "param")
        .map(|param| match child(param, "value") {
            Some(value) => parse_value(value),
            None => Ok(Value::Nil),
        })
        .collect()
}

/// Decode a `methodCall` document
pub fn decode_call(text: &str) -> Result<MethodCall, RpcError> {
    let doc = parse_document(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "methodCall" {
        return Err(RpcError::codec(format!(
            "expected <methodCall>, found <{}>",
            root.tag_name().name()
        )));
    }

    let method = child(root, "methodName")
        .map(|n| text_of(n).trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| RpcError::codec("methodCall without methodName"))?;
    let params = parse_params(child(root, "params"))?;

    Ok(MethodCall { method, params })
}

/// Decode a `methodResponse` document, a fault reply becomes `RpcError::Fault`
pub fn decode_response(text: &str) -> Result<Value, RpcError> {
    let doc = parse_document(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "methodResponse" {
        return Err(RpcError::codec(format!(
            "expected <methodResponse>, found <{}>",
            root.tag_name().name()
        )));
    }

    if let Some(fault) = child(root, "fault") {
        let value = child(fault, "value")
            .map(parse_value)
            .transpose()?
            .unwrap_or(Value::Nil);
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(RpcError::fault(code, message));
    }

    Ok(parse_params(child(root, "params"))?
        .into_iter()
        .next()
        .unwrap_or(Value::Nil))
}

fn escape(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
}

fn write_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            let tag = if i32::try_from(*i).is_ok() { "i4" } else { "i8" };
            out.push_str(&format!("<{tag}>{i}</{tag}>"));
        },
        Value::Boolean(b) => {
            out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" });
        },
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::String(s) => {
            out.push_str("<string>");
            escape(s, out);
            out.push_str("</string>");
        },
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            escape(s, out);
            out.push_str("</dateTime.iso8601>");
        },
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&base64::engine::general_purpose::STANDARD.encode(bytes));
            out.push_str("</base64>");
        },
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(item, out);
            }
            out.push_str("</data></array>");
        },
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                escape(name, out);
                out.push_str("</name>");
                write_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        },
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

const DECLARATION: &str = r#"<?xml version="1.0"?>"#;

/// Encode a `methodCall` document
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from(DECLARATION);
    out.push_str("<methodCall><methodName>");
    escape(method, &mut out);
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Encode a successful `methodResponse`
pub fn encode_response(value: &Value) -> String {
    let mut out = String::from(DECLARATION);
    out.push_str("<methodResponse><params><param>");
    write_value(value, &mut out);
    out.push_str("</param></params></methodResponse>");
    out
}

/// Encode a fault `methodResponse`
pub fn encode_fault(fault: &Fault) -> String {
    let body = Value::Struct(vec![
        ("faultCode".to_string(), Value::Int(fault.code)),
        ("faultString".to_string(), Value::String(fault.message.clone())),
    ]);
    let mut out = String::from(DECLARATION);
    out.push_str("<methodResponse><fault>");
    write_value(&body, &mut out);
    out.push_str("</fault></methodResponse>");
    out
}
