//! Per-request argument assembly.
//!
//! Runs once per request against the route's [`BindingProfile`]:
//! extract body or query data, keep only named parameters, overlay path
//! parameters, inject the request, then check required parameters.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::BadRequest;
use crate::request::Request;
use crate::signature::{BindingProfile, REQUEST_PARAM};

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Arguments assembled for one handler call.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Map<String, Value>,
    request: Option<Request>,
    shadowed: Vec<String>,
}

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// String argument. Form, query and path values are always strings.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Whether `name` was bound, counting the injected request.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name) || (name == REQUEST_PARAM && self.request.is_some())
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Keys whose extracted value was replaced by a path parameter.
    pub fn shadowed(&self) -> &[String] {
        &self.shadowed
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Bound names, the request included.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        if self.request.is_some() {
            names.push(REQUEST_PARAM);
        }
        names
    }

    /// Decodes the bound values into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.values.clone()))
    }
}

/// Builds the argument set for `request` according to `profile`.
pub fn bind(profile: &BindingProfile, request: Request) -> Result<Arguments, BadRequest> {
    let mut values = Map::new();
    if profile.needs_request_data() {
        if let Some(mut extracted) = extract(&request)? {
            if !profile.accepts_var_keyword && !profile.named.is_empty() {
                extracted.retain(|key, _| profile.named.iter().any(|name| name == key));
            }
            values = extracted;
        }
    }

    let mut shadowed = Vec::new();
    for (key, value) in request.match_info() {
        if values.contains_key(key) {
            warn!("Duplicate arg name in named arg and kw args: {key}");
            shadowed.push(key.clone());
        }
        values.insert(key.clone(), Value::String(value.clone()));
    }

    let arguments = Arguments {
        values,
        request: profile.accepts_request.then_some(request),
        shadowed,
    };
    if let Some(missing) = profile
        .required
        .iter()
        .find(|name| !arguments.contains(name))
    {
        return Err(BadRequest::missing_argument(missing));
    }
    info!("call with args: {:?}", arguments.names());
    Ok(arguments)
}

/// Reads the body or query string. `None` when the method carries neither
/// or no query string was sent.
fn extract(request: &Request) -> Result<Option<Map<String, Value>>, BadRequest> {
    let method = request.method();
    if method.carries_body() {
        let content_type = request
            .content_type()
            .ok_or_else(BadRequest::missing_content_type)?;
        let media_type = request.media_type().unwrap_or_default();
        let body = request.body();
        // Prefix match: `application/json-patch+json` binds as JSON.
        return if media_type.starts_with(JSON) {
            parse_json(body).map(Some)
        } else if media_type.starts_with(FORM) {
            Ok(Some(parse_pairs(body)))
        } else if media_type.starts_with(MULTIPART) {
            parse_multipart(body, content_type).map(Some)
        } else {
            Err(BadRequest::unsupported_content_type(&media_type))
        };
    }
    if method.carries_query() {
        return Ok(request
            .query_string()
            .map(|query| parse_pairs(query.as_bytes())));
    }
    Ok(None)
}

/// An empty body is not an object either.
fn parse_json(body: &[u8]) -> Result<Map<String, Value>, BadRequest> {
    if body.trim_ascii().is_empty() {
        return Err(BadRequest::json_not_object());
    }
    match serde_json::from_slice::<Value>(body).map_err(BadRequest::invalid_json)? {
        Value::Object(map) => Ok(map),
        _ => Err(BadRequest::json_not_object()),
    }
}

/// Url-encoded pairs. Blank values are kept; the first value per key wins.
fn parse_pairs(input: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(input) {
        if !map.contains_key(&*key) {
            map.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    map
}

/// Value of `key` among the `;`-separated parameters of a header.
fn header_param(header: &str, key: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case(key)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Text fields of a multipart body. File parts are skipped.
fn parse_multipart(body: &[u8], content_type: &str) -> Result<Map<String, Value>, BadRequest> {
    let boundary = header_param(content_type, "boundary")
        .filter(|boundary| !boundary.is_empty())
        .ok_or_else(|| BadRequest::new("Missing multipart boundary"))?;
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(body);

    let mut map = Map::new();
    for part in text.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        let part = part.strip_prefix("\r\n").unwrap_or(part);
        let Some((head, value)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let Some(disposition) = head.split("\r\n").find(|line| {
            line.get(..20)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("content-disposition:"))
        }) else {
            continue;
        };
        if header_param(disposition, "filename").is_some() {
            continue;
        }
        let Some(name) = header_param(disposition, "name") else {
            continue;
        };
        let value = value.strip_suffix("\r\n").unwrap_or(value);
        if !map.contains_key(&name) {
            map.insert(name, Value::String(value.to_string()));
        }
    }
    Ok(map)
}
