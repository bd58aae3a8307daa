//! Mount option strings (`upperdir=/u,lowerdir=/l,workdir=/w`).

use indexmap::IndexMap;
use std::fmt;

/// Parsed `key[=value]` option list.
///
/// Keys keep first-seen order; a repeated key keeps its position and takes
/// the last value. Empty keys are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    entries: IndexMap<String, Option<String>>,
}

impl MountOptions {
    pub fn parse(data: &str) -> Self {
        let mut entries = IndexMap::new();
        for item in data.split(',') {
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.to_string())),
                None => (item.trim(), None),
            };
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_string(), value);
        }
        Self { entries }
    }

    /// Value of `key`. Flag-style keys without `=` yield `Some("")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(|v| v.as_deref().unwrap_or(""))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match value {
                Some(v) => write!(f, "{key}={v}")?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overlay_options() {
        let opts = MountOptions::parse("upperdir=/u,lowerdir=/l,workdir=/w");
        assert_eq!(opts.get("upperdir"), Some("/u"));
        assert_eq!(opts.get("lowerdir"), Some("/l"));
        assert_eq!(opts.get("workdir"), Some("/w"));
        assert_eq!(opts.len(), 3);
    }

    #[test]
    fn test_duplicates_last_wins_and_empty_ignored() {
        let opts = MountOptions::parse("a=1,,=x,a=2,ro");
        assert_eq!(opts.get("a"), Some("2"));
        assert_eq!(opts.get("ro"), Some(""));
        assert!(!opts.contains(""));
        assert_eq!(opts.to_string(), "a=2,ro");
    }

    #[test]
    fn test_empty_string() {
        assert!(MountOptions::parse("").is_empty());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let opts = MountOptions::parse("context=a=b");
        assert_eq!(opts.get("context"), Some("a=b"));
    }
}
