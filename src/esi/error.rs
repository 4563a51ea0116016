//! Errors raised while composing a page.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EsiError {
    /// Unbalanced or unexpected directive tags.
    #[error("Malformed ESI markup: {0}")]
    Structural(String),

    #[error("<esi:{element}> requires the '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Non-2xx answer for an include.
    #[error("Fragment {url} unavailable: backend answered {status}")]
    FragmentUnavailable {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("Fragment '{name}' not found in {url}")]
    FragmentNotFound { url: String, name: String },

    #[error("Too many redirects (more than {max}) fetching {url}")]
    TooManyRedirects { url: String, max: usize },

    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Include depth limit of {0} exceeded")]
    DepthExceeded(usize),
}

impl EsiError {
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        EsiError::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure comes from a backend fetch.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            EsiError::FragmentUnavailable { .. }
                | EsiError::FragmentNotFound { .. }
                | EsiError::TooManyRedirects { .. }
        )
    }

    /// Status of the error page served for an unhandled failure.
    pub fn status(&self) -> StatusCode {
        if self.is_fetch_error() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_page_status() {
        let unavailable = EsiError::FragmentUnavailable {
            url: "http://a/x".into(),
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert_eq!(unavailable.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(EsiError::DepthExceeded(3).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            EsiError::Structural("unclosed".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages_name_the_failure() {
        let err = EsiError::MissingAttribute {
            element: "include",
            attribute: "src",
        };
        assert_eq!(err.to_string(), "<esi:include> requires the 'src' attribute");
        assert!(EsiError::UnknownProvider("shop".into()).to_string().contains("shop"));
    }
}
