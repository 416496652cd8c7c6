//! Response classification
//!
//! Turns a finished [`Response`] into a [`TypedResult`] for the [`Shape`]
//! the caller asked for. There is no coercion between shapes: a JSON array
//! requested as an object is an error.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value};

use crate::error::ErrorInfo;
use crate::response::Response;

/// Expected shape of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A JSON object
    Object,
    /// A JSON array
    Array,
    /// UTF-8 text (HTML, plain text, ...)
    Text,
    /// A caller-declared type decoded with serde
    Model,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Object => "object",
            Shape::Array => "array",
            Shape::Text => "string",
            Shape::Model => "model",
        };
        f.write_str(name)
    }
}

/// Successfully classified body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<M = Value> {
    Object(JsonMap<String, Value>),
    Array(Vec<Value>),
    Text(String),
    Model(M),
    /// A 204/205 response requested as [`Shape::Model`]
    NoContent,
}

impl<M> Payload<M> {
    pub fn as_object(&self) -> Option<&JsonMap<String, Value>> {
        match self {
            Payload::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Payload::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_model(self) -> Option<M> {
        match self {
            Payload::Model(model) => Some(model),
            _ => None,
        }
    }
}

/// Result delivered to completion callbacks
pub type TypedResult<M = Value> = std::result::Result<Payload<M>, ErrorInfo>;

/// Classify a response against the expected shape
pub fn classify<M>(response: &Response, shape: Shape) -> TypedResult<M>
where
    M: DeserializeOwned,
{
    let status = response.status();

    if response.is_no_content() {
        return Ok(no_content(shape));
    }

    let body = match response.body() {
        Some(body) => body,
        None => {
            return Err(ErrorInfo::parsing(format!(
                "no data: {} responded {} with an empty body",
                response.url(),
                status
            ))
            .with_status(status));
        }
    };

    match shape {
        Shape::Object => match parse_json(body, status)? {
            Value::Object(map) => Ok(Payload::Object(map)),
            other => Err(invalid_type(shape, json_type_name(&other), status)),
        },
        Shape::Array => match parse_json(body, status)? {
            Value::Array(items) => Ok(Payload::Array(items)),
            other => Err(invalid_type(shape, json_type_name(&other), status)),
        },
        Shape::Text => match std::str::from_utf8(body) {
            Ok(text) => Ok(Payload::Text(text.to_string())),
            Err(e) => Err(invalid_type(shape, "non UTF-8 data", status).with_cause(e)),
        },
        Shape::Model => serde_json::from_slice::<M>(body)
            .map(Payload::Model)
            .map_err(|e| ErrorInfo::parsing(e.to_string()).with_status(status).with_cause(e)),
    }
}

fn no_content<M>(shape: Shape) -> Payload<M> {
    match shape {
        Shape::Object => Payload::Object(JsonMap::new()),
        Shape::Array => Payload::Array(Vec::new()),
        Shape::Text => Payload::Text("success".to_string()),
        Shape::Model => Payload::NoContent,
    }
}

fn parse_json(body: &[u8], status: u16) -> std::result::Result<Value, ErrorInfo> {
    serde_json::from_slice(body)
        .map_err(|e| ErrorInfo::parsing(e.to_string()).with_status(status).with_cause(e))
}

fn invalid_type(expected: Shape, found: &str, status: u16) -> ErrorInfo {
    ErrorInfo::parsing(format!("invalid type: expected {}, found {}", expected, found)).with_status(status)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
