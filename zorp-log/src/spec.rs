//! Parses the `glob:level[,glob:level]*` log-spec grammar into an ordered
//! list of (pattern, threshold) pairs. The first pattern (in spec order)
//! that matches a tag wins; tags matching nothing fall back to the global
//! verbosity.

use crate::glob::glob_match;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSpec {
    rules: Vec<(String, u32)>,
    default_level: u32,
}

impl LogSpec {
    pub fn new(default_level: u32) -> Self {
        Self {
            rules: Vec::new(),
            default_level,
        }
    }

    /// Parses `"core.*:3,http.req:7"` style specs. An empty string is a
    /// valid spec with no per-tag overrides.
    pub fn parse(spec: &str, default_level: u32) -> Result<Self, String> {
        let mut rules = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (pattern, level) = entry
                .rsplit_once(':')
                .ok_or_else(|| format!("missing ':' in log-spec entry {entry:?}"))?;
            let level: u32 = level
                .parse()
                .map_err(|_| format!("invalid verbosity level in {entry:?}"))?;
            if pattern.is_empty() {
                return Err(format!("empty tag glob in {entry:?}"));
            }
            rules.push((pattern.to_string(), level));
        }
        Ok(Self {
            rules,
            default_level,
        })
    }

    pub fn resolve(&self, tag: &str) -> u32 {
        for (pattern, level) in &self.rules {
            if glob_match(pattern, tag) {
                return *level;
            }
        }
        self.default_level
    }

    pub fn default_level(&self) -> u32 {
        self.default_level
    }

    pub fn set_default_level(&mut self, level: u32) {
        self.default_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_tag_falls_back_to_default() {
        let spec = LogSpec::parse("core.*:5", 2).unwrap();
        assert_eq!(spec.resolve("http.request"), 2);
        assert_eq!(spec.resolve("core.error"), 5);
    }

    #[test]
    fn first_matching_rule_wins() {
        let spec = LogSpec::parse("core.error:1,core.*:5", 2).unwrap();
        assert_eq!(spec.resolve("core.error"), 1);
        assert_eq!(spec.resolve("core.warn"), 5);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(LogSpec::parse("core.error", 0).is_err());
        assert!(LogSpec::parse("core.error:x", 0).is_err());
    }
}
