//! Parameter encoding
//!
//! Turns a parameter map (or an ordered list that allows duplicate keys)
//! into a query string, a URL-encoded body, a JSON body or form-data parts,
//! depending on the request's [`HttpMethod`] and [`Encoding`].

use std::collections::HashSet;
use std::fmt;

use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map as JsonMap, Value};
use url::Url;

use crate::error::{Error, Result};
use crate::multipart::MultipartBuilder;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const URL_ENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Characters left as-is in query values: the host-allowed set minus the
/// pair delimiters `&`, `=` and `+`
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b';')
    .remove(b':')
    .remove(b'[')
    .remove(b']');

/// HTTP methods supported by the request builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Method name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether URL-default parameters go into the query string rather than the body
    pub fn encodes_in_url(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How request parameters are serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// Query string for GET/DELETE, URL-encoded body for POST/PUT/PATCH
    #[default]
    Url,
    /// JSON body
    Json,
    /// multipart/form-data body
    FormData,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Url => "URL Default/Query Encoding",
            Encoding::Json => "JSON Body Encoding",
            Encoding::FormData => "Form-data Encoding",
        };
        f.write_str(name)
    }
}

/// Request parameters
///
/// `Map` keys are unique. `List` keeps insertion order and allows the same
/// key more than once, e.g. `tag[]=a&tag[]=b`.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameters {
    Map(JsonMap<String, Value>),
    List(Vec<(String, Value)>),
}

impl Parameters {
    /// Create an empty ordered list
    pub fn list() -> Self {
        Parameters::List(Vec::new())
    }

    /// Append a pair to a list, or insert into a map
    pub fn push(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self {
            Parameters::Map(map) => {
                map.insert(key.into(), value.into());
            }
            Parameters::List(pairs) => pairs.push((key.into(), value.into())),
        }
        self
    }

    pub fn len(&self) -> usize {
        match self {
            Parameters::Map(map) => map.len(),
            Parameters::List(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pairs sorted by key; equal keys keep their original order
    pub fn sorted_pairs(&self) -> Vec<(&str, &Value)> {
        let mut pairs: Vec<(&str, &Value)> = match self {
            Parameters::Map(map) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            Parameters::List(pairs) => pairs.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        };
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
    }

    /// Convert to a JSON object, rejecting duplicate keys
    pub fn to_json_object(&self) -> Result<JsonMap<String, Value>> {
        match self {
            Parameters::Map(map) => Ok(map.clone()),
            Parameters::List(pairs) => {
                let mut seen = HashSet::new();
                let mut map = JsonMap::new();
                for (key, value) in pairs {
                    if !seen.insert(key.as_str()) {
                        return Err(Error::DuplicateKeys(key.clone()));
                    }
                    map.insert(key.clone(), value.clone());
                }
                Ok(map)
            }
        }
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters::Map(JsonMap::new())
    }
}

impl From<JsonMap<String, Value>> for Parameters {
    fn from(map: JsonMap<String, Value>) -> Self {
        Parameters::Map(map)
    }
}

impl<K, V> From<Vec<(K, V)>> for Parameters
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Parameters::List(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .sorted_pairs()
            .into_iter()
            .map(|(k, v)| format!("{}:{}", k, render_value(v)))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Render a parameter value as text
///
/// Booleans become `"1"`/`"0"`. Strings are used verbatim, `null` is empty,
/// and everything else uses its JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build a URL query `key=value&key2=value2` with keys sorted and values percent-encoded
///
/// A space becomes `%20`. Keys are left raw so `field[]` survives.
pub fn query_string(params: &Parameters) -> String {
    join_pairs(params, |rendered| utf8_percent_encode(rendered, QUERY_VALUE).to_string())
}

/// Build an `application/x-www-form-urlencoded` body; a space becomes `+`
pub fn form_body(params: &Parameters) -> String {
    join_pairs(params, |rendered| {
        url::form_urlencoded::byte_serialize(rendered.as_bytes()).collect()
    })
}

fn join_pairs<F>(params: &Parameters, encode_value: F) -> String
where
    F: Fn(&str) -> String,
{
    params
        .sorted_pairs()
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, encode_value(&render_value(value))))
        .collect::<Vec<_>>()
        .join("&")
}

/// Output of [`encode`]: what the encoder changed on the request
#[derive(Debug, Default)]
pub struct Encoded {
    /// Body bytes, if the encoding produced one
    pub body: Option<Vec<u8>>,
}

/// Encode `params` into `url`, `headers` and a body
///
/// `Content-Type` is only set when the caller has not already provided one.
/// Form-data fields are appended to `multipart`; the caller finishes it.
pub fn encode(
    params: &Parameters,
    method: HttpMethod,
    encoding: Encoding,
    url: &mut Url,
    headers: &mut HeaderMap,
    multipart: &mut MultipartBuilder,
) -> Result<Encoded> {
    match encoding {
        Encoding::Url if method.encodes_in_url() => {
            if !params.is_empty() {
                url.set_query(Some(&query_string(params)));
            }
            // GET/DELETE keep the JSON content type even though there is no body
            set_default_content_type(headers, JSON_CONTENT_TYPE)?;
            Ok(Encoded::default())
        }
        Encoding::Url => {
            set_default_content_type(headers, URL_ENCODED_CONTENT_TYPE)?;
            Ok(Encoded {
                body: Some(form_body(params).into_bytes()),
            })
        }
        Encoding::Json => {
            let object = params.to_json_object()?;
            let body = serde_json::to_vec_pretty(&Value::Object(object))?;
            set_default_content_type(headers, JSON_CONTENT_TYPE)?;
            Ok(Encoded { body: Some(body) })
        }
        Encoding::FormData => {
            for (key, value) in params.sorted_pairs() {
                multipart.add_field(key, render_value(value));
            }
            set_default_content_type(headers, &multipart.content_type())?;
            Ok(Encoded::default())
        }
    }
}

pub(crate) fn set_default_content_type(headers: &mut HeaderMap, value: &str) -> Result<()> {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(value)?);
    }
    Ok(())
}
