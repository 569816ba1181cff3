//! Process-wide breakpoint set.
//!
//! Keyed by `(file, line)` with 1-based lines. Writes go through the pilot;
//! engine threads read it directly through a shared read lock, since
//! `HasBreakpoint` runs on every executed line.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// One breakpoint location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Breakpoint {
    /// Script URL or file name.
    pub url: String,
    /// 1-based line.
    pub line: u32,
}

/// The set of active breakpoints.
#[derive(Debug, Default)]
pub struct BreakpointSet {
    entries: BTreeSet<Breakpoint>,
}

impl BreakpointSet {
    /// Adds `url:line`; returns whether it was new.
    pub fn insert(&mut self, url: &str, line: u32) -> bool {
        self.entries.insert(Breakpoint {
            url: url.to_owned(),
            line,
        })
    }

    /// Removes `url:line`; returns whether it existed.
    pub fn remove(&mut self, url: &str, line: u32) -> bool {
        self.entries.remove(&Breakpoint {
            url: url.to_owned(),
            line,
        })
    }

    /// Whether `url:line` is set.
    #[must_use]
    pub fn contains(&self, url: &str, line: u32) -> bool {
        self.entries.contains(&Breakpoint {
            url: url.to_owned(),
            line,
        })
    }

    /// Drops every breakpoint.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no breakpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All breakpoints in `(url, line)` order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.iter()
    }
}

/// Shared handle on the breakpoint set.
#[derive(Debug, Clone, Default)]
pub struct SharedBreakpoints(Arc<RwLock<BreakpointSet>>);

impl SharedBreakpoints {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `url:line` is set.
    #[must_use]
    pub fn contains(&self, url: &str, line: u32) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url, line)
    }

    /// Lines with a breakpoint in `url`.
    #[must_use]
    pub fn lines_of(&self, url: &str) -> Vec<u32> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|bp| bp.url == url)
            .map(|bp| bp.line)
            .collect()
    }

    /// Runs `f` with write access.
    pub fn update<R>(&self, f: impl FnOnce(&mut BreakpointSet) -> R) -> R {
        f(&mut self.0.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether there are no breakpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a.js", 12)]
    #[test_case("dir/with:colon.js", 1)]
    #[test_case("", 0; "degenerate key")]
    fn set_then_remove_leaves_nothing(url: &str, line: u32) {
        let shared = SharedBreakpoints::new();
        assert!(shared.update(|set| set.insert(url, line)));
        assert!(shared.contains(url, line));
        assert!(!shared.contains(url, line + 1));
        assert!(shared.update(|set| set.remove(url, line)));
        assert!(!shared.contains(url, line));
        assert!(shared.is_empty());
    }

    #[test]
    fn inserting_twice_is_idempotent() {
        let mut set = BreakpointSet::default();
        assert!(set.insert("a.js", 3));
        assert!(!set.insert("a.js", 3));
        assert_eq!(set.len(), 1);
        assert!(set.remove("a.js", 3));
        assert!(!set.remove("a.js", 3));
    }
}
