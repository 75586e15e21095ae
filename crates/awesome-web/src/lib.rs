//! Request dispatch for async JSON handlers.
//!
//! Each handler is registered with a [`Signature`] describing its parameters.
//! The router turns that into a [`BindingProfile`] once, and per request the
//! binder assembles [`Arguments`] from path parameters, the query string or
//! the body before calling the handler.

pub mod binder;
pub mod error;
pub mod page;
pub mod request;
pub mod router;
pub mod signature;

pub use binder::{Arguments, bind};
pub use error::{ApiError, BadRequest, DispatchError, HandlerError, RegistrationError};
pub use page::{Page, get_page_index};
pub use request::{Method, Request, Response, UnknownMethod};
pub use router::{Endpoint, Handler, HandlerFuture, Reply, Router};
pub use signature::{BindingProfile, ParamKind, Signature};
