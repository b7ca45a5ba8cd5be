//! First-match-wins rule table

use tracing::trace;

use super::rule::{ResourceRule, StrategyKind};

/// Ordered list of resource rules plus the fallback rule
///
/// Rules are scanned in declaration order and the first match wins, so
/// specific patterns must be declared before broad ones.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<ResourceRule>,
    default_rule: ResourceRule,
}

impl PolicyTable {
    /// Build a table whose unmatched requests go network-first into `default_partition`
    pub fn new(rules: Vec<ResourceRule>, default_partition: &str) -> Self {
        Self {
            rules,
            default_rule: ResourceRule::new("**", StrategyKind::NetworkFirst, default_partition),
        }
    }

    pub fn rules(&self) -> &[ResourceRule] {
        &self.rules
    }

    pub fn default_rule(&self) -> &ResourceRule {
        &self.default_rule
    }

    /// Find the rule governing `path`; never fails
    pub fn find(&self, path: &str) -> &ResourceRule {
        match self.rules.iter().find(|rule| rule.pattern.matches(path)) {
            Some(rule) => {
                trace!("{} matched rule {}", path, rule.pattern.as_str());
                rule
            }
            None => {
                trace!("{} matched no rule, using default", path);
                &self.default_rule
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PolicyTable {
        PolicyTable::new(
            vec![
                ResourceRule::new("/api/health", StrategyKind::NetworkOnly, "api"),
                ResourceRule::new("/api/**", StrategyKind::NetworkFirst, "api"),
                ResourceRule::new("/assets/**", StrategyKind::CacheFirst, "static"),
                ResourceRule::new("**", StrategyKind::StaleWhileRevalidate, "dynamic"),
            ],
            "dynamic",
        )
    }

    #[test]
    fn test_first_declared_rule_wins() {
        let table = table();
        assert_eq!(table.find("/api/health").strategy, StrategyKind::NetworkOnly);
        assert_eq!(table.find("/api/tasks").strategy, StrategyKind::NetworkFirst);
        assert_eq!(table.find("/assets/app.js").partition, "static");
        assert_eq!(table.find("/settings").strategy, StrategyKind::StaleWhileRevalidate);
    }

    #[test]
    fn test_reordering_changes_precedence() {
        let table = PolicyTable::new(
            vec![
                ResourceRule::new("/api/**", StrategyKind::NetworkFirst, "api"),
                ResourceRule::new("/api/health", StrategyKind::NetworkOnly, "api"),
            ],
            "dynamic",
        );
        assert_eq!(table.find("/api/health").strategy, StrategyKind::NetworkFirst);
    }

    #[test]
    fn test_unmatched_falls_back_to_default() {
        let table = PolicyTable::new(
            vec![ResourceRule::new("/assets/**", StrategyKind::CacheFirst, "static")],
            "pages",
        );
        let rule = table.find("/about");
        assert_eq!(rule.strategy, StrategyKind::NetworkFirst);
        assert_eq!(rule.partition, "pages");
        assert!(rule.max_entries.is_none());
    }
}
