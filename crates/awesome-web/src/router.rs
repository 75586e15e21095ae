//! Route table and dispatch.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde_json::json;
use tracing::{debug, info};

use crate::binder::{Arguments, bind};
use crate::error::{ApiError, BadRequest, DispatchError, HandlerError, RegistrationError};
use crate::request::{Method, Request, Response};
use crate::signature::{BindingProfile, Signature};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, HandlerError>> + Send>>;

/// An async request handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, args: Arguments) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn call(&self, args: Arguments) -> HandlerFuture {
        Box::pin(self(args))
    }
}

/// A handler with its declared parameters and, once routed, its method and
/// path.
pub struct Endpoint {
    name: String,
    method: Option<Method>,
    path: Option<String>,
    signature: Signature,
    handler: Arc<dyn Handler>,
}

impl Endpoint {
    /// An endpoint without route metadata; see [`Endpoint::route`].
    pub fn new(name: impl Into<String>, signature: Signature, handler: impl Handler) -> Self {
        Self {
            name: name.into(),
            method: None,
            path: None,
            signature,
            handler: Arc::new(handler),
        }
    }

    pub fn get(
        path: impl Into<String>,
        name: impl Into<String>,
        signature: Signature,
        handler: impl Handler,
    ) -> Self {
        Self::new(name, signature, handler).route(Method::Get, path)
    }

    pub fn post(
        path: impl Into<String>,
        name: impl Into<String>,
        signature: Signature,
        handler: impl Handler,
    ) -> Self {
        Self::new(name, signature, handler).route(Method::Post, path)
    }

    pub fn route(mut self, method: Method, path: impl Into<String>) -> Self {
        self.method = Some(method);
        self.path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_pattern(path: &str) -> Result<Vec<Segment>, RegistrationError> {
    if !path.starts_with('/') {
        return Err(RegistrationError::InvalidPath(path.to_string()));
    }
    path.split('/')
        .skip(1)
        .map(|segment| match segment.strip_prefix('{') {
            Some(rest) => match rest.strip_suffix('}') {
                Some(name) if !name.is_empty() && !name.contains(['{', '}']) => {
                    Ok(Segment::Param(name.to_string()))
                }
                _ => Err(RegistrationError::InvalidPath(path.to_string())),
            },
            None if segment.contains(['{', '}']) => {
                Err(RegistrationError::InvalidPath(path.to_string()))
            }
            None => Ok(Segment::Literal(segment.to_string())),
        })
        .collect()
}

struct Route {
    method: Method,
    path: String,
    segments: Vec<Segment>,
    name: String,
    profile: BindingProfile,
    handler: Arc<dyn Handler>,
}

impl Route {
    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = path.split('/').skip(1).collect();
        if !path.starts_with('/') || parts.len() != self.segments.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    let value = percent_decode_str(part).decode_utf8_lossy().into_owned();
                    params.insert(name.clone(), value);
                }
            }
        }
        Some(params)
    }
}

/// Outcome of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Handler(Response),
    BadRequest(BadRequest),
    ApiError(ApiError),
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Self::Handler(response) => response.status,
            Self::BadRequest(_) => 400,
            // Structured errors are regular JSON payloads for API clients.
            Self::ApiError(_) => 200,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Handler(response) => response.body.clone(),
            Self::BadRequest(err) => json!({ "message": err.message() }),
            Self::ApiError(err) => json!({
                "error": err.error,
                "data": err.data,
                "message": err.message,
            }),
        }
    }
}

/// Registered routes. Registration analyzes each handler once; dispatch only
/// binds and calls.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, endpoint: Endpoint) -> Result<(), RegistrationError> {
        let Endpoint {
            name,
            method,
            path,
            signature,
            handler,
        } = endpoint;
        let (Some(method), Some(path)) = (method, path) else {
            return Err(RegistrationError::MissingRoute(name));
        };
        let segments = parse_pattern(&path)?;
        if self
            .routes
            .iter()
            .any(|route| route.method == method && route.segments == segments)
        {
            return Err(RegistrationError::DuplicateRoute { method, path });
        }
        let profile = BindingProfile::analyze(&name, &signature)?;
        info!("add route {method} {path} => {name}{signature}");
        self.routes.push(Route {
            method,
            path,
            segments,
            name,
            profile,
            handler,
        });
        Ok(())
    }

    /// Registers every endpoint, stopping at the first invalid one.
    pub fn add_routes(
        &mut self,
        endpoints: impl IntoIterator<Item = Endpoint>,
    ) -> Result<(), RegistrationError> {
        endpoints
            .into_iter()
            .try_for_each(|endpoint| self.add_route(endpoint))
    }

    /// `(method, path)` of every route, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> {
        self.routes
            .iter()
            .map(|route| (route.method, route.path.as_str()))
    }

    pub async fn dispatch(&self, mut request: Request) -> Result<Reply, DispatchError> {
        let mut path_matched = false;
        let mut found = None;
        for route in &self.routes {
            if let Some(params) = route.matches(request.path()) {
                path_matched = true;
                if route.method == request.method() {
                    found = Some((route, params));
                    break;
                }
            }
        }
        let Some((route, params)) = found else {
            return Err(if path_matched {
                DispatchError::MethodNotAllowed {
                    method: request.method(),
                    path: request.path().to_string(),
                }
            } else {
                DispatchError::NotFound(request.path().to_string())
            });
        };

        debug!("dispatch {} {} => {}", request.method(), request.path(), route.name);
        request.set_match_info(params);
        let args = match bind(&route.profile, request) {
            Ok(args) => args,
            Err(err) => return Ok(Reply::BadRequest(err)),
        };
        match route.handler.call(args).await {
            Ok(response) => Ok(Reply::Handler(response)),
            Err(HandlerError::Api(err)) => Ok(Reply::ApiError(err)),
            Err(other) => Err(DispatchError::Handler(other)),
        }
    }
}
