//! Handler parameter shapes and the binding profile derived from them.

use std::fmt;

use tracing::debug;

use crate::error::RegistrationError;

/// Name under which the request object is passed to a handler.
pub const REQUEST_PARAM: &str = "request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Filled from path parameters.
    Positional,
    /// The raw request object.
    Request,
    VarPositional,
    /// Named parameter supplied from request data.
    KeywordOnly { required: bool },
    /// Accepts any extra key.
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

/// Declared parameters of a handler, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn positional(self, name: impl Into<String>) -> Self {
        self.push(name, ParamKind::Positional)
    }

    pub fn request(self) -> Self {
        self.push(REQUEST_PARAM, ParamKind::Request)
    }

    pub fn var_positional(self, name: impl Into<String>) -> Self {
        self.push(name, ParamKind::VarPositional)
    }

    /// Required named parameter.
    pub fn keyword(self, name: impl Into<String>) -> Self {
        self.push(name, ParamKind::KeywordOnly { required: true })
    }

    /// Named parameter with a default.
    pub fn optional(self, name: impl Into<String>) -> Self {
        self.push(name, ParamKind::KeywordOnly { required: false })
    }

    pub fn var_keyword(self, name: impl Into<String>) -> Self {
        self.push(name, ParamKind::VarKeyword)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let mut keyword_marker = false;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match param.kind {
                ParamKind::Positional | ParamKind::Request => f.write_str(&param.name)?,
                ParamKind::VarPositional => {
                    keyword_marker = true;
                    write!(f, "*{}", param.name)?;
                }
                ParamKind::KeywordOnly { required } => {
                    if !keyword_marker {
                        keyword_marker = true;
                        f.write_str("*, ")?;
                    }
                    f.write_str(&param.name)?;
                    if !required {
                        f.write_str("=None")?;
                    }
                }
                ParamKind::VarKeyword => write!(f, "**{}", param.name)?,
            }
        }
        f.write_str(")")
    }
}

/// How to assemble a handler's arguments. Computed once per route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingProfile {
    pub accepts_request: bool,
    pub accepts_var_keyword: bool,
    /// Named parameters in declaration order.
    pub named: Vec<String>,
    /// Named parameters without a default, in declaration order.
    pub required: Vec<String>,
}

impl BindingProfile {
    /// Classifies `signature`. A request parameter may only be followed by
    /// variadic or named parameters.
    pub fn analyze(handler: &str, signature: &Signature) -> Result<Self, RegistrationError> {
        let mut profile = Self::default();
        for param in signature.params() {
            match param.kind {
                ParamKind::Request | ParamKind::Positional if profile.accepts_request => {
                    return Err(RegistrationError::RequestNotLast {
                        handler: handler.to_string(),
                        signature: signature.to_string(),
                    });
                }
                ParamKind::Request => profile.accepts_request = true,
                ParamKind::Positional | ParamKind::VarPositional => {}
                ParamKind::KeywordOnly { required } => {
                    profile.named.push(param.name.clone());
                    if required {
                        profile.required.push(param.name.clone());
                    }
                }
                ParamKind::VarKeyword => profile.accepts_var_keyword = true,
            }
        }
        debug!("binding profile for {handler}{signature}: {profile:?}");
        Ok(profile)
    }

    /// Whether the body or query string must be read at all.
    pub fn needs_request_data(&self) -> bool {
        self.accepts_var_keyword || !self.named.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_required_parameters_keep_order() {
        let signature = Signature::new()
            .keyword("name")
            .optional("page")
            .keyword("content");
        let profile = BindingProfile::analyze("api_create_blog", &signature).expect("profile");
        assert_eq!(profile.named, ["name", "page", "content"]);
        assert_eq!(profile.required, ["name", "content"]);
        assert!(!profile.accepts_request);
        assert!(profile.needs_request_data());
    }

    #[test]
    fn request_may_precede_variadics_and_named() {
        let signature = Signature::new()
            .positional("id")
            .request()
            .var_positional("args")
            .keyword("name")
            .var_keyword("kw");
        let profile = BindingProfile::analyze("handler", &signature).expect("profile");
        assert!(profile.accepts_request);
        assert!(profile.accepts_var_keyword);
    }

    #[test]
    fn positional_after_request_is_rejected() {
        let signature = Signature::new().request().positional("id");
        let err = BindingProfile::analyze("get_blog", &signature).unwrap_err();
        assert_eq!(
            err.to_string(),
            "request parameter must be the last named parameter in function: get_blog(request, id)"
        );
    }

    #[test]
    fn path_only_handlers_skip_request_data() {
        let profile =
            BindingProfile::analyze("index", &Signature::new().positional("id")).expect("profile");
        assert!(!profile.needs_request_data());
    }

    #[test]
    fn signature_renders_like_a_parameter_list() {
        let signature = Signature::new().request().keyword("email").optional("page");
        assert_eq!(signature.to_string(), "(request, *, email, page=None)");
    }
}
