//! Parser registry: extension -> (version, extractor) table.
//!
//! Built once per process and handed to every component that needs it
//! (decision engine, pipeline, watcher). No global/static instance: the
//! Lifecycle State Machine owns it and passes it by reference, per
//! spec.md §3's ownership rule against ambient singletons.

use std::collections::HashMap;

use super::{DocumentParser, HtmlParser, MarkdownParser, PlainTextParser};

/// Registry of document parsers, keyed by file extension.
pub struct ParserRegistry {
    versions: HashMap<&'static str, u32>,
    parsers: HashMap<&'static str, Box<dyn DocumentParser>>,
    /// Parser versions known to have produced broken output for a given
    /// extension, re-queued by `sweep_for_upgrades` regardless of the
    /// normal 24h failure-retry window.
    broken: HashMap<&'static str, Vec<u32>>,
}

impl ParserRegistry {
    /// Build the registry with every supported extension registered.
    pub fn new() -> Self {
        let mut parsers: HashMap<&'static str, Box<dyn DocumentParser>> = HashMap::new();
        parsers.insert("txt", Box::new(PlainTextParser));
        parsers.insert("md", Box::new(MarkdownParser));
        parsers.insert("mdx", Box::new(MarkdownParser));
        parsers.insert("html", Box::new(HtmlParser));
        parsers.insert("htm", Box::new(HtmlParser));

        Self {
            versions: super::default_versions(),
            parsers,
            broken: HashMap::new(),
        }
    }

    /// Extractor registered for `ext`, if any.
    pub fn parser(&self, ext: &str) -> Option<&dyn DocumentParser> {
        self.parsers.get(ext).map(std::convert::AsRef::as_ref)
    }

    /// Current parser version for `ext`.
    pub fn version(&self, ext: &str) -> Option<u32> {
        self.versions.get(ext).copied()
    }

    /// Parser generations known to have been broken for `ext`. Empty by
    /// default; extensions can be registered via
    /// [`ParserRegistry::mark_broken_version`].
    pub fn broken_versions(&self, ext: &str) -> &[u32] {
        self.broken.get(ext).map_or(&[], Vec::as_slice)
    }

    /// Record that `version` of `ext`'s parser is known to have produced
    /// broken output, so historical failures on that version are
    /// re-queued unconditionally by `sweep_for_upgrades`.
    pub fn mark_broken_version(&mut self, ext: &'static str, version: u32) {
        self.broken.entry(ext).or_default().push(version);
    }

    /// Every registered extension.
    pub fn extensions(&self) -> Vec<&'static str> {
        self.versions.keys().copied().collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_default_extensions() {
        let reg = ParserRegistry::new();
        assert!(reg.parser("txt").is_some());
        assert!(reg.parser("md").is_some());
        assert!(reg.parser("html").is_some());
        assert!(reg.parser("zzz").is_none());
    }

    #[test]
    fn version_bump_is_visible() {
        let mut reg = ParserRegistry::new();
        assert_eq!(reg.version("txt"), Some(1));
        reg.versions.insert("txt", 2);
        assert_eq!(reg.version("txt"), Some(2));
    }
}
