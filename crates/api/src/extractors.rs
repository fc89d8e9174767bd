//! Request extractors.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the operator identity, set by the upstream auth layer.
pub const OPERATOR_HEADER: &str = "x-operator-id";

/// The operator acting on the request, if the auth layer identified one.
#[derive(Debug, Clone, Default)]
pub struct Operator(pub Option<String>);

impl Operator {
    /// The operator ID, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let operator = parts
            .headers
            .get(OPERATOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        Ok(Self(operator))
    }
}
