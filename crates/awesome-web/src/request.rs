//! Framework-neutral request and response values.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::error::HandlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Arguments come from the request body.
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// Arguments come from the query string.
    pub fn carries_query(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown HTTP method `{0}`")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
    match_info: BTreeMap<String, String>,
}

impl Request {
    /// `target` is a path with an optional `?query` suffix.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            headers: Vec::new(),
            body: Bytes::new(),
            match_info: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    pub fn with_form<'a>(self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`. Empty strings count as absent.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref().filter(|query| !query.is_empty())
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Content type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        self.content_type().map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Path parameters captured by the matched route.
    pub fn match_info(&self) -> &BTreeMap<String, String> {
        &self.match_info
    }

    pub fn set_match_info(&mut self, params: BTreeMap<String, String>) {
        self.match_info = params;
    }
}

/// Successful handler output.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    pub fn json(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::json(serde_json::to_value(value)?))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_splits_path_and_query() {
        let request = Request::new(Method::Get, "/api/blogs?page=2");
        assert_eq!(request.path(), "/api/blogs");
        assert_eq!(request.query_string(), Some("page=2"));
        assert_eq!(Request::new(Method::Get, "/x?").query_string(), None);
    }

    #[test]
    fn media_type_ignores_case_and_parameters() {
        let request = Request::new(Method::Post, "/")
            .with_header("content-type", "Application/JSON; charset=utf-8");
        assert_eq!(request.media_type().as_deref(), Some("application/json"));
        assert_eq!(
            request.content_type(),
            Some("Application/JSON; charset=utf-8")
        );
    }

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!("patch".parse::<Method>(), Ok(Method::Patch));
        assert!("TRACE".parse::<Method>().is_err());
        assert!(Method::Put.carries_body());
        assert!(Method::Delete.carries_query());
    }
}
