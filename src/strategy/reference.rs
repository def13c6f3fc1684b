//! Reference tokens linking sources, attributes and tables.
//!
//! Connector fields embed `${source::<key>}` tokens to pull in another
//! source's result and `${attribute::<name>}` tokens to pull in the current
//! monitor's attributes. Scanning for these tokens is a preprocessing pass:
//! the dependency resolver consumes the scan, execution consumes the
//! replacement.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn source_ref_regex() -> &'static Regex {
    static SOURCE_REF: OnceLock<Regex> = OnceLock::new();
    SOURCE_REF.get_or_init(|| {
        Regex::new(r"\$\{source::([^\s\}]+)\}").expect("failed to compile source ref regex")
    })
}

fn attribute_ref_regex() -> &'static Regex {
    static ATTRIBUTE_REF: OnceLock<Regex> = OnceLock::new();
    ATTRIBUTE_REF.get_or_init(|| {
        Regex::new(r"\$\{attribute::([^\s\}]+)\}").expect("failed to compile attribute ref regex")
    })
}

/// All source keys referenced in a text, in order of first appearance.
pub fn source_refs(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in source_ref_regex().captures_iter(text) {
        let key = caps[1].to_string();
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen
}

/// When the whole text is exactly one source reference, its key.
///
/// Fields like `copy.from` or a join operand either name one table or carry
/// an inline literal; this distinguishes the two.
pub fn as_source_ref(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let caps = source_ref_regex().captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Replace every `${source::...}` token using the resolver.
///
/// A key the resolver cannot serve stays in place untouched, so a later log
/// line shows exactly which reference went unresolved.
pub fn replace_source_refs(text: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    source_ref_regex()
        .replace_all(text, |caps: &Captures| {
            resolve(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Replace every `${attribute::...}` token from the given attribute map,
/// leaving unknown names in place.
pub fn replace_attribute_refs(text: &str, attributes: &BTreeMap<String, String>) -> String {
    attribute_ref_regex()
        .replace_all(text, |caps: &Captures| {
            attributes
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// True when the text contains at least one reference token of either kind.
pub fn has_reference_tokens(text: &str) -> bool {
    source_ref_regex().is_match(text) || attribute_ref_regex().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_refs_in_order_deduplicated() {
        let text = "join ${source::pre.b} with ${source::pre.a} and ${source::pre.b}";
        assert_eq!(source_refs(text), vec!["pre.b", "pre.a"]);
    }

    #[test]
    fn test_source_refs_none() {
        assert!(source_refs("plain text; no tokens").is_empty());
    }

    #[test]
    fn test_as_source_ref_full_match_only() {
        assert_eq!(
            as_source_ref("${source::monitors.disk.discovery.sources.ids}"),
            Some("monitors.disk.discovery.sources.ids")
        );
        assert_eq!(as_source_ref("  ${source::pre.a}  "), Some("pre.a"));
        assert!(as_source_ref("prefix ${source::pre.a}").is_none());
        assert!(as_source_ref("a;b;").is_none());
    }

    #[test]
    fn test_replace_source_refs() {
        let replaced = replace_source_refs("x=${source::pre.a};y=${source::pre.b}", |key| {
            (key == "pre.a").then(|| "VALUE".to_string())
        });
        assert_eq!(replaced, "x=VALUE;y=${source::pre.b}");
    }

    #[test]
    fn test_replace_attribute_refs() {
        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), "disk-0".to_string());

        let replaced = replace_attribute_refs(
            "select ${attribute::id} ${attribute::missing}",
            &attributes,
        );
        assert_eq!(replaced, "select disk-0 ${attribute::missing}");
    }

    #[test]
    fn test_has_reference_tokens() {
        assert!(has_reference_tokens("${source::pre.a}"));
        assert!(has_reference_tokens("${attribute::id}"));
        assert!(!has_reference_tokens("${env::HOME} and $1"));
    }
}
