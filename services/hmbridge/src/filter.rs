//! Datapoint filter
//!
//! Decides per datapoint name whether an event reaches the bus. Patterns are
//! unanchored regular expressions, compiled once at startup.

use regex::Regex;

use crate::error::Result;

/// Compiled whitelist/blacklist
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
}

fn compile<I, S>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| Regex::new(p.as_ref()).map_err(Into::into))
        .collect()
}

impl FilterSet {
    pub fn new<I, S>(whitelist: I, blacklist: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            whitelist: compile(whitelist)?,
            blacklist: compile(blacklist)?,
        })
    }

    /// Build from space-separated pattern lists, e.g. `"^PRESS_ ^BRIGHTNESS$"`
    pub fn from_lists(whitelist: Option<&str>, blacklist: Option<&str>) -> Result<Self> {
        Self::new(
            whitelist.unwrap_or_default().split_whitespace(),
            blacklist.unwrap_or_default().split_whitespace(),
        )
    }

    /// Blacklist always wins; an empty whitelist admits everything else
    pub fn should_forward(&self, datapoint: &str) -> bool {
        if self.blacklist.iter().any(|rx| rx.is_match(datapoint)) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.iter().any(|rx| rx.is_match(datapoint))
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_empty_filter_forwards_everything() {
        let filter = FilterSet::default();
        assert!(filter.should_forward("PRESS_SHORT"));
        assert!(filter.should_forward(""));
    }

    #[test]
    fn test_whitelist_only() {
        let filter = FilterSet::from_lists(Some("^PRESS_ ^BRIGHTNESS$"), None).unwrap();
        assert!(filter.should_forward("PRESS_SHORT"));
        assert!(filter.should_forward("BRIGHTNESS"));
        assert!(!filter.should_forward("ACTUAL_BRIGHTNESS"));
        assert!(!filter.should_forward("LEVEL"));
    }

    #[test]
    fn test_blacklist_beats_whitelist() {
        let filter = FilterSet::from_lists(Some("^PRESS_"), Some("_LONG$")).unwrap();
        assert!(filter.should_forward("PRESS_SHORT"));
        assert!(!filter.should_forward("PRESS_LONG"));
    }

    #[test]
    fn test_blacklist_only() {
        let filter = FilterSet::from_lists(None, Some("^PARTY_")).unwrap();
        assert!(!filter.should_forward("PARTY_MODE"));
        assert!(filter.should_forward("SET_POINT_TEMPERATURE"));
    }

    #[test]
    fn test_repeated_spaces_do_not_add_match_all_pattern() {
        let filter = FilterSet::from_lists(Some("  ^LEVEL$   "), None).unwrap();
        assert_eq!(filter.whitelist_len(), 1);
        assert!(!filter.should_forward("STATE"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = FilterSet::from_lists(Some("^PRESS_("), None).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigError(_)));
    }
}
