//! Variable substitution in attribute values and `<esi:vars>` bodies.
//!
//! Supported forms: `$PROVIDER({name})`, `$(NAME)` and `$(NAME{key})`.
//! Unknown variables expand to nothing; an unknown provider is an error.

use crate::config::BackendMap;
use crate::esi::error::EsiError;
use crate::http::request::IncomingRequest;

const LEGACY_PROVIDER: &str = "$PROVIDER({";

/// Variable source for one request.
#[derive(Debug, Clone, Copy)]
pub struct Variables<'a> {
    backends: &'a BackendMap,
    request: &'a IncomingRequest,
}

impl<'a> Variables<'a> {
    pub fn new(backends: &'a BackendMap, request: &'a IncomingRequest) -> Self {
        Self { backends, request }
    }

    /// Value of one variable.
    pub fn lookup(&self, name: &str, key: Option<&str>) -> Result<String, EsiError> {
        let value = match (name, key) {
            ("PROVIDER", Some(provider)) => self
                .backends
                .base_for_template(provider)
                .map(str::to_string)
                .ok_or_else(|| EsiError::UnknownProvider(provider.to_string()))?,
            ("QUERY_STRING", None) => self.request.query_string().to_string(),
            ("QUERY_STRING", Some(param)) => self.request.query_param(param).unwrap_or_default(),
            ("HTTP_HOST", None) => self.header("host"),
            ("HTTP_USER_AGENT", None) => self.header("user-agent"),
            ("HTTP_REFERER", None) => self.header("referer"),
            ("HTTP_COOKIE", None) => self.header("cookie"),
            ("HTTP_COOKIE", Some(cookie)) => self.request.cookie(cookie).unwrap_or_default().to_string(),
            ("HTTP_ACCEPT_LANGUAGE", Some(lang)) => self.request.accepts_language(lang).to_string(),
            _ => {
                tracing::trace!(variable = name, "Unknown ESI variable");
                String::new()
            }
        };
        Ok(value)
    }

    fn header(&self, name: &str) -> String {
        self.request.header(name).unwrap_or_default().to_string()
    }

    /// Expand every variable in `template`.
    pub fn substitute(&self, template: &str) -> Result<String, EsiError> {
        if !template.contains('$') {
            return Ok(template.to_string());
        }
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(at) = rest.find('$') {
            out.push_str(&rest[..at]);
            rest = &rest[at..];

            if let Some(after) = rest.strip_prefix(LEGACY_PROVIDER) {
                if let Some(end) = after.find("})") {
                    out.push_str(&self.lookup("PROVIDER", Some(&after[..end]))?);
                    rest = &after[end + 2..];
                    continue;
                }
            } else if rest.starts_with("$(") {
                if let Some((name, key, len)) = parse_reference(rest) {
                    out.push_str(&self.lookup(name, key)?);
                    rest = &rest[len..];
                    continue;
                }
            }
            out.push('$');
            rest = &rest[1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Parse `$(NAME)` or `$(NAME{key})` at the start of `s`.
/// Returns the name, the key and the length consumed.
pub(crate) fn parse_reference(s: &str) -> Option<(&str, Option<&str>, usize)> {
    let body = s.strip_prefix("$(")?;
    let name_len = body.find(|c: char| c == '{' || c == ')')?;
    let name = &body[..name_len];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let after_name = &body[name_len..];
    if let Some(keyed) = after_name.strip_prefix('{') {
        let key_len = keyed.find('}')?;
        let key = &keyed[..key_len];
        keyed[key_len + 1..].strip_prefix(')')?;
        Some((name, Some(key), 2 + name_len + 1 + key_len + 2))
    } else {
        Some((name, None, 2 + name_len + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> BackendMap {
        BackendMap::from_pairs([("mock", "http://mock.local/"), ("shop", "http://shop.local/base")]).unwrap()
    }

    fn request() -> IncomingRequest {
        IncomingRequest::get("http://localhost/test?queryparameter1=test&queryparameter2=test2")
            .with_header("cookie", "session=abc; theme=dark")
            .with_header("accept-language", "en-US,fr;q=0.5")
            .with_header("host", "www.example.com")
    }

    fn substitute(template: &str) -> Result<String, EsiError> {
        let backends = backends();
        let request = request();
        Variables::new(&backends, &request).substitute(template)
    }

    #[test]
    fn test_provider_forms() {
        assert_eq!(substitute("$PROVIDER({mock})/test").unwrap(), "http://mock.local/test");
        assert_eq!(substitute("$(PROVIDER{shop})/cart").unwrap(), "http://shop.local/base/cart");
        assert!(matches!(
            substitute("$(PROVIDER{missing})/x"),
            Err(EsiError::UnknownProvider(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_query_string_variables() {
        assert_eq!(
            substitute("/test?$(QUERY_STRING)").unwrap(),
            "/test?queryparameter1=test&queryparameter2=test2"
        );
        assert_eq!(substitute("/$(QUERY_STRING{queryparameter2})").unwrap(), "/test2");
        assert_eq!(substitute("/$(QUERY_STRING{absent})").unwrap(), "/");
    }

    #[test]
    fn test_header_variables() {
        assert_eq!(substitute("$(HTTP_HOST)").unwrap(), "www.example.com");
        assert_eq!(substitute("$(HTTP_COOKIE{theme})").unwrap(), "dark");
        assert_eq!(substitute("$(HTTP_ACCEPT_LANGUAGE{fr})").unwrap(), "true");
        assert_eq!(substitute("$(HTTP_ACCEPT_LANGUAGE{de})").unwrap(), "false");
    }

    #[test]
    fn test_unknown_and_malformed_are_harmless() {
        assert_eq!(substitute("a$(NOPE)b").unwrap(), "ab");
        assert_eq!(substitute("cost: $5 $(unterminated").unwrap(), "cost: $5 $(unterminated");
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("$(HTTP_HOST) rest"), Some(("HTTP_HOST", None, 12)));
        assert_eq!(parse_reference("$(QUERY_STRING{a})"), Some(("QUERY_STRING", Some("a"), 18)));
        assert_eq!(parse_reference("$(bad name)"), None);
    }
}
