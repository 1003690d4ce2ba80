//! Static header injection from `[[headers]]` config.
//!
//! Rules are checked once when the interceptor is built, so a bad config
//! fails at startup instead of being skipped on every request.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::{Error, Interceptor, Result};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Adds the configured headers to every request, skip-listed auth
/// endpoints included. `Authorization` is reserved for the session and is
/// refused at construction.
pub struct StaticHeaders {
    headers: HeaderMap,
}

impl StaticHeaders {
    /// Later rules replace earlier ones with the same name.
    pub fn new(rules: &[HeaderInjection]) -> Result<Self> {
        let mut headers = HeaderMap::with_capacity(rules.len());
        for rule in rules {
            let name = HeaderName::from_bytes(rule.name.as_bytes())
                .map_err(|e| Error::InvalidHeader(format!("{:?}: {e}", rule.name)))?;
            if name == AUTHORIZATION {
                return Err(Error::InvalidHeader(
                    "authorization is set from the session and cannot be configured".into(),
                ));
            }
            let value = HeaderValue::from_str(&rule.value)
                .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
            headers.insert(name, value);
        }
        debug!(count = headers.len(), "static headers ready");
        Ok(Self { headers })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl Interceptor for StaticHeaders {
    fn id(&self) -> &str {
        "static-headers"
    }

    fn prepare_request(&self, _path: &str, headers: &mut HeaderMap) -> Result<()> {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, value: &str) -> HeaderInjection {
        HeaderInjection {
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn config_is_rejected_when_it_names_authorization() {
        for name in ["authorization", "Authorization", "AUTHORIZATION"] {
            let err = StaticHeaders::new(&[rule(name, "Bearer static")])
                .err()
                .unwrap();
            assert!(matches!(err, Error::InvalidHeader(msg) if msg.contains("session")));
        }
    }

    #[test]
    fn malformed_rules_fail_construction() {
        assert!(matches!(
            StaticHeaders::new(&[rule("x client", "v")]),
            Err(Error::InvalidHeader(_))
        ));
        assert!(matches!(
            StaticHeaders::new(&[rule("x-client", "line\nbreak")]),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn last_rule_for_a_name_wins() {
        let statics =
            StaticHeaders::new(&[rule("x-client", "first"), rule("X-Client", "second")]).unwrap();

        let mut headers = HeaderMap::new();
        statics.prepare_request("/me", &mut headers).unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-client").unwrap(), "second");
    }

    #[test]
    fn same_headers_on_every_path() {
        let statics = StaticHeaders::new(&[rule("x-client-version", "1.0.0")]).unwrap();

        for path in ["/me", "/auth/login", "/auth/callback?code=abc"] {
            let mut headers = HeaderMap::new();
            statics.prepare_request(path, &mut headers).unwrap();
            assert_eq!(headers.get("x-client-version").unwrap(), "1.0.0", "{path}");
        }
    }

    #[test]
    fn no_rules_is_a_noop() {
        let statics = StaticHeaders::new(&[]).unwrap();
        assert!(statics.is_empty());

        let mut headers = HeaderMap::new();
        statics.prepare_request("/me", &mut headers).unwrap();
        assert!(headers.is_empty());
    }
}
