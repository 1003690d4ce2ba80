//! Canned GET responses served while demo mode is on.
//!
//! A fixture file is a JSON object mapping request paths to response
//! bodies:
//!
//! ```json
//! { "/me": { "id": "demo-user", "display_name": "Demo Listener" } }
//! ```
//!
//! Query strings are ignored when matching.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct DemoFixtures {
    responses: HashMap<String, Value>,
}

impl DemoFixtures {
    /// Fixtures shipped with the client: a demo profile only.
    pub fn builtin() -> Self {
        let mut fixtures = Self::default();
        fixtures.insert(
            "/me",
            serde_json::json!({
                "id": "demo-user",
                "display_name": "Demo Listener",
                "email": "demo@example.com"
            }),
        );
        fixtures
    }

    /// Load fixtures from a JSON file, layered over the builtin set.
    pub fn from_file(path: &Path) -> common::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let loaded: HashMap<String, Value> = serde_json::from_str(&raw)?;

        let mut fixtures = Self::builtin();
        info!(path = %path.display(), count = loaded.len(), "loaded demo fixtures");
        fixtures.responses.extend(loaded);
        Ok(fixtures)
    }

    pub fn insert(&mut self, path: impl Into<String>, body: Value) {
        self.responses.insert(path.into(), body);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = path.split('?').next().unwrap_or(path);
        self.responses.get(path)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_has_demo_profile() {
        let fixtures = DemoFixtures::builtin();
        assert_eq!(fixtures.get("/me").unwrap()["id"], "demo-user");
    }

    #[test]
    fn lookup_ignores_query() {
        let mut fixtures = DemoFixtures::default();
        fixtures.insert("/me/top/tracks", serde_json::json!({"items": []}));
        assert!(fixtures.get("/me/top/tracks?time_range=short_term").is_some());
        assert!(fixtures.get("/me/top/artists").is_none());
    }

    #[test]
    fn file_overrides_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"/me": {{"id": "custom"}}, "/me/playlists": {{"items": [1, 2]}}}}"#
        )
        .unwrap();

        let fixtures = DemoFixtures::from_file(file.path()).unwrap();
        assert_eq!(fixtures.len(), 2);
        assert_eq!(fixtures.get("/me").unwrap()["id"], "custom");
        assert_eq!(fixtures.get("/me/playlists").unwrap()["items"][1], 2);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2").unwrap();
        assert!(DemoFixtures::from_file(file.path()).is_err());
    }
}
