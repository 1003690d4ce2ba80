//! Location and navigation seam
//!
//! Stands in for the browser's `window.location` and history API. A full
//! page navigation (`assign`) abandons the current page; `replace` rewrites
//! the address bar without navigating (used to drop the OAuth `code`
//! parameter once it has been consumed).

use std::sync::Mutex;

use url::Url;

use crate::sync::MutexExt;

pub trait Navigator: Send + Sync {
    /// The current location.
    fn current_url(&self) -> Url;

    /// Full-page navigation. Code running after this call is on a page the
    /// user has already left.
    fn assign(&self, url: &Url);

    /// Rewrite the current history entry without navigating.
    fn replace(&self, url: &Url);

    /// Path component of the current location.
    fn current_path(&self) -> String {
        self.current_url().path().to_owned()
    }
}

/// In-process navigator that records every full-page navigation.
///
/// Used by the CLI (which prints where the user should go) and by tests.
#[derive(Debug)]
pub struct MemoryNavigator {
    current: Mutex<Url>,
    assigned: Mutex<Vec<Url>>,
}

impl MemoryNavigator {
    pub fn new(start: Url) -> Self {
        Self {
            current: Mutex::new(start),
            assigned: Mutex::new(Vec::new()),
        }
    }

    /// Every URL passed to `assign`, oldest first.
    pub fn assigned(&self) -> Vec<Url> {
        self.assigned.lock_or_recover().clone()
    }

    /// The most recent full-page navigation, if any.
    pub fn last_assigned(&self) -> Option<Url> {
        self.assigned.lock_or_recover().last().cloned()
    }

    /// Simulate the user landing on `url` (e.g. the provider redirecting back).
    pub fn visit(&self, url: Url) {
        *self.current.lock_or_recover() = url;
    }
}

impl Navigator for MemoryNavigator {
    fn current_url(&self) -> Url {
        self.current.lock_or_recover().clone()
    }

    fn assign(&self, url: &Url) {
        self.assigned.lock_or_recover().push(url.clone());
        *self.current.lock_or_recover() = url.clone();
    }

    fn replace(&self, url: &Url) {
        *self.current.lock_or_recover() = url.clone();
    }
}
