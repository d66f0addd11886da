//! `application/x-www-form-urlencoded` body support.
//!
//! Arrays use the bracket convention (`tags[]=a&tags[]=b`) and nested objects
//! use bracketed keys (`user[name]=x`), matching what common form parsers on
//! the server side expect. A top-level array is keyed by index (`0=a&1=b`).
//! Bare scalars have no form representation and are sent as JSON.

use serde_json::Value;
use url::form_urlencoded;

use crate::http::{Body, Headers, HttpMethod, HttpRequest};
use crate::options::FORM_CONTENT_TYPE;

/// Whether `request` must have its JSON body re-encoded as a form.
///
/// The content type comes from the request's own headers, falling back to
/// the client defaults. GET requests, requests without a body and bodies
/// holding a bare number, boolean or null never qualify.
pub fn should_encode_form(request: &HttpRequest, defaults: &Headers) -> bool {
    if request.method == HttpMethod::Get {
        return false;
    }
    if !matches!(
        request.body,
        Some(Body::Json(Value::Object(_) | Value::Array(_) | Value::String(_)))
    ) {
        return false;
    }
    let content_type = request
        .headers
        .get("content-type")
        .or_else(|| defaults.get("content-type"));
    content_type.is_some_and(|ct| ct.eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}

/// Re-encode the request body as a form when required.
pub fn apply_form_encoding(mut request: HttpRequest, defaults: &Headers) -> HttpRequest {
    if should_encode_form(&request, defaults) {
        if let Some(Body::Json(value)) = request.body.take() {
            request.body = Some(Body::Form(encode_form(&value)));
        }
    }
    request
}

/// Form-encode a JSON value. Strings are taken as already encoded; other
/// scalars become their plain text.
pub fn encode_form(value: &Value) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                append(&mut serializer, key, value);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                append(&mut serializer, &index.to_string(), item);
            }
        }
        Value::String(s) => return s.clone(),
        Value::Null => return String::new(),
        Value::Bool(_) | Value::Number(_) => return value.to_string(),
    }
    serializer.finish()
}

fn append(serializer: &mut form_urlencoded::Serializer<'_, String>, key: &str, value: &Value) {
    match value {
        Value::Null => {
            serializer.append_pair(key, "");
        }
        Value::Bool(b) => {
            serializer.append_pair(key, &b.to_string());
        }
        Value::Number(n) => {
            serializer.append_pair(key, &n.to_string());
        }
        Value::String(s) => {
            serializer.append_pair(key, s);
        }
        Value::Array(items) => {
            let key = format!("{key}[]");
            for item in items {
                append(serializer, &key, item);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                append(serializer, &format!("{key}[{sub}]"), item);
            }
        }
    }
}
