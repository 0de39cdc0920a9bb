//! Forced results from the configuration
//!
//! Tests whose id matches one of these rules are not executed at all.

use regex::Regex;

use super::Verdict;
use crate::common::config::TestOverride;
use crate::common::{Error, Result};

#[derive(Debug)]
struct Rule {
    pattern: Regex,
    reason: String,
}

fn compile(pairs: &[(String, String)]) -> Result<Vec<Rule>> {
    pairs
        .iter()
        .map(|(pattern, reason)| {
            Ok(Rule {
                pattern: Regex::new(pattern).map_err(|e| Error::invalid_regex(pattern, &e))?,
                reason: reason.clone(),
            })
        })
        .collect()
}

fn first_match<'a>(rules: &'a [Rule], id: &str) -> Option<&'a str> {
    rules
        .iter()
        .find(|r| r.pattern.is_match(id))
        .map(|r| r.reason.as_str())
}

/// Ignore, force-fail and force-pass rules, in configuration order
#[derive(Debug, Default)]
pub struct OverrideRules {
    ignore: Vec<Rule>,
    force_fail: Vec<Rule>,
    force_pass: Vec<Rule>,
}

impl OverrideRules {
    pub fn compile(overrides: &TestOverride) -> Result<Self> {
        Ok(Self {
            ignore: compile(&overrides.ignore)?,
            force_fail: compile(&overrides.forcefail)?,
            force_pass: compile(&overrides.forcepass)?,
        })
    }

    pub fn forced_ignore(&self, id: &str) -> Option<&str> {
        first_match(&self.ignore, id)
    }

    pub fn forced_fail(&self, id: &str) -> Option<&str> {
        first_match(&self.force_fail, id)
    }

    pub fn forced_pass(&self, id: &str) -> Option<&str> {
        first_match(&self.force_pass, id)
    }

    /// Forced verdict for a test id, with the configured reason
    ///
    /// When several categories match, ignore wins over force-fail, which
    /// wins over force-pass.
    pub fn overridden(&self, id: &str) -> Option<(Verdict, &str)> {
        if let Some(reason) = self.forced_ignore(id) {
            return Some((Verdict::Ignored, reason));
        }
        if let Some(reason) = self.forced_fail(id) {
            return Some((Verdict::ForceFail, reason));
        }
        self.forced_pass(id).map(|reason| (Verdict::ForcePass, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_precedence_is_ignore_fail_pass() {
        let rules = OverrideRules::compile(&TestOverride {
            ignore: pairs(&[("^920400-1$", "ignored")]),
            forcefail: pairs(&[("^920", "broken")]),
            forcepass: pairs(&[("-1$", "flaky")]),
            ..TestOverride::default()
        })
        .unwrap();

        assert_eq!(rules.overridden("920400-1"), Some((Verdict::Ignored, "ignored")));
        assert_eq!(rules.overridden("920100-1"), Some((Verdict::ForceFail, "broken")));
        assert_eq!(rules.overridden("930100-1"), Some((Verdict::ForcePass, "flaky")));
        assert_eq!(rules.overridden("930100-2"), None);
    }

    #[test]
    fn test_first_matching_rule_gives_the_reason() {
        let rules = OverrideRules::compile(&TestOverride {
            ignore: pairs(&[("^941", "first"), ("941100", "second")]),
            ..TestOverride::default()
        })
        .unwrap();
        assert_eq!(rules.forced_ignore("941100-3"), Some("first"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = OverrideRules::compile(&TestOverride {
            forcepass: pairs(&[("(unclosed", "oops")]),
            ..TestOverride::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRegex { .. }));
    }
}
