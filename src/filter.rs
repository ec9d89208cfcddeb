//! Namespace filtering for instrumentation
//!
//! Decides whether a namespace-qualified type name (e.g. `shop.order.OrderService`)
//! should have its units rewritten. Supports:
//! - Exclude prefixes (checked first, always win)
//! - Include prefixes (empty = include everything not excluded)
//! - Comma-separated prefix lists: `shop.,billing.`

use std::collections::BTreeSet;

/// Prefixes excluded unless the caller removes them explicitly: the tracer's own
/// namespace (so hooks are never hooked) and the host standard library.
pub const DEFAULT_EXCLUDES: &[&str] = &["rastreo.", "std.", "core.", "alloc."];

/// Name filter that determines which types to instrument
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl NameFilter {
    /// Create a filter that instruments every name
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter with the default exclude list and no include restriction
    pub fn with_default_excludes() -> Self {
        Self::new(
            std::iter::empty::<&str>(),
            DEFAULT_EXCLUDES.iter().copied(),
        )
    }

    /// Build a filter from explicit include and exclude prefix lists
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            include: clean(include),
            exclude: clean(exclude),
        }
    }

    /// Parse a comma-separated prefix list (`"shop.,billing."`)
    pub fn parse_prefix_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Add include prefixes
    pub fn include<S: Into<String>>(mut self, prefixes: impl IntoIterator<Item = S>) -> Self {
        self.include.extend(clean(prefixes));
        self
    }

    /// Add exclude prefixes
    pub fn exclude<S: Into<String>>(mut self, prefixes: impl IntoIterator<Item = S>) -> Self {
        self.exclude.extend(clean(prefixes));
        self
    }

    /// Check if a type should be instrumented
    pub fn should_trace(&self, type_name: &str) -> bool {
        if self.exclude.iter().any(|p| type_name.starts_with(p.as_str())) {
            return false;
        }

        // No include list = trace everything not excluded
        self.include.is_empty() || self.include.iter().any(|p| type_name.starts_with(p.as_str()))
    }

    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(String::as_str)
    }

    pub fn excludes(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(String::as_str)
    }
}

fn clean<S: Into<String>>(prefixes: impl IntoIterator<Item = S>) -> BTreeSet<String> {
    prefixes
        .into_iter()
        .map(Into::into)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_all_traces_everything() {
        let filter = NameFilter::all();
        assert!(filter.should_trace("shop.OrderService"));
        assert!(filter.should_trace("std.vec.Vec"));
        assert!(filter.should_trace("anything"));
    }

    #[test]
    fn test_default_excludes_own_namespace() {
        let filter = NameFilter::with_default_excludes();
        assert!(!filter.should_trace("rastreo.Recorder"));
        assert!(!filter.should_trace("std.collections.HashMap"));
        assert!(!filter.should_trace("core.option.Option"));
        assert!(filter.should_trace("shop.OrderService"));
    }

    #[test]
    fn test_include_restricts() {
        let filter = NameFilter::new(["shop.", "billing."], DEFAULT_EXCLUDES.iter().copied());
        assert!(filter.should_trace("shop.OrderService"));
        assert!(filter.should_trace("billing.Invoice"));
        assert!(!filter.should_trace("inventory.Stock"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = NameFilter::new(["shop."], ["shop.internal."]);
        assert!(filter.should_trace("shop.OrderService"));
        assert!(!filter.should_trace("shop.internal.Cache"));
    }

    #[test]
    fn test_parse_prefix_list_whitespace_handling() {
        let prefixes = NameFilter::parse_prefix_list("shop., billing. ,,");
        assert_eq!(prefixes, vec!["shop.", "billing."]);
    }

    #[test]
    fn test_builder_extends_lists() {
        let filter = NameFilter::with_default_excludes()
            .include(["shop."])
            .exclude(["shop.gen."]);
        assert_eq!(filter.includes().collect::<Vec<_>>(), vec!["shop."]);
        assert!(filter.excludes().any(|p| p == "shop.gen."));
        assert!(filter.excludes().any(|p| p == "rastreo."));
        assert!(!filter.should_trace("shop.gen.Proto"));
    }

    #[test]
    fn test_empty_prefixes_ignored() {
        let filter = NameFilter::new([""], ["  "]);
        assert!(filter.should_trace("shop.OrderService"));
    }
}
