//! Fluent Bit configuration sections
//!
//! User-provided filters and outputs are free-form `key value` blocks. They
//! are parsed into a [`Section`] for validation and re-rendered with the
//! generated `match` key and uniform alignment.

use std::fmt::Write;

/// One `[INPUT]`/`[FILTER]`/`[OUTPUT]` block as ordered key/value pairs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, String)>,
}

impl Section {
    /// Empty section
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a free-form block; blank lines and `#` comments are skipped
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut section = Self::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                return Err(format!("configuration line '{}' has no value", line));
            };
            section.push(key.to_lowercase(), value.trim());
        }
        Ok(section)
    }

    /// Append a key; keys are compared case-insensitively
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Builder-style [`Section::push`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// True when `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop every occurrence of `key`
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// Render under `header` (e.g. `FILTER`). `name` comes first, then
    /// `match`, then the remaining keys sorted.
    pub fn render(&self, header: &str) -> String {
        let rank = |k: &str| match k {
            "name" => 0,
            "match" => 1,
            _ => 2,
        };
        let mut entries: Vec<&(String, String)> = self.entries.iter().collect();
        entries.sort_by(|a, b| rank(&a.0).cmp(&rank(&b.0)).then_with(|| a.0.cmp(&b.0)));

        let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let mut out = format!("[{}]\n", header);
        for (key, value) in entries {
            let _ = writeln!(out, "    {:<width$} {}", key, value, width = width);
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_lowercases_keys() {
        let section = Section::parse(
            r#"
            # drop noisy lines
            Name   grep
            Regex  log aa
            "#,
        )
        .unwrap();
        assert_eq!(section.get("name"), Some("grep"));
        assert_eq!(section.get("REGEX"), Some("log aa"));
        assert!(!section.contains("match"));
    }

    #[test]
    fn key_without_value_is_an_error() {
        let err = Section::parse("name").unwrap_err();
        assert!(err.contains("'name'"));
    }

    #[test]
    fn render_puts_name_and_match_first() {
        let rendered = Section::new()
            .with("record", "cluster_identifier ${KUBERNETES_SERVICE_HOST}")
            .with("match", "foo.*")
            .with("name", "record_modifier")
            .render("FILTER");
        assert_eq!(
            rendered,
            "[FILTER]\n    name   record_modifier\n    match  foo.*\n    record cluster_identifier ${KUBERNETES_SERVICE_HOST}\n\n"
        );
    }
}
