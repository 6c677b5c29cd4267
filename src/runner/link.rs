//! Finding the link a parent page points at.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static START_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)((?:\s[^>]*)?)/?>").unwrap());

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+)))?"#).unwrap()
});

static SELECTOR_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([a-zA-Z][a-zA-Z0-9-]*|\*)?((?:[.#][\w-]+|\[[\w-]+(?:[~^$*]?=["']?[^"'\]]*["']?)?\])*)$"#)
        .unwrap()
});

static SELECTOR_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.([\w-]+)|#([\w-]+)|\[([\w-]+)(?:([~^$*]?)=["']?([^"'\]]*)["']?)?\]"#).unwrap()
});

/// Extract the `href` of the first element in `body` matching `selector`.
pub trait LinkResolver: Send + Sync {
    fn resolve(&self, body: &str, selector: &str) -> Option<String>;
}

impl<F> LinkResolver for F
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, body: &str, selector: &str) -> Option<String> {
        self(body, selector)
    }
}

/// Regex-based resolver for simple selectors: a tag name and/or any number
/// of `.class`, `#id` and `[attr]` / `[attr=value]` qualifiers. For a
/// descendant selector (`nav a.next`) only the last compound is matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSelectorResolver;

#[derive(Debug, PartialEq)]
enum Qualifier {
    Class(String),
    Id(String),
    Attr {
        name: String,
        op: String,
        value: Option<String>,
    },
}

#[derive(Debug, PartialEq)]
struct CompoundSelector {
    tag: Option<String>,
    qualifiers: Vec<Qualifier>,
}

fn parse_selector(selector: &str) -> Option<CompoundSelector> {
    let last = selector.split_whitespace().last()?;
    let caps = SELECTOR_PART.captures(last)?;
    let tag = caps
        .get(1)
        .map(|m| m.as_str().to_ascii_lowercase())
        .filter(|t| t != "*");

    let qualifiers = SELECTOR_QUALIFIER
        .captures_iter(caps.get(2).map_or("", |m| m.as_str()))
        .map(|q| {
            if let Some(class) = q.get(1) {
                Qualifier::Class(class.as_str().to_string())
            } else if let Some(id) = q.get(2) {
                Qualifier::Id(id.as_str().to_string())
            } else {
                Qualifier::Attr {
                    name: q.get(3).map_or("", |m| m.as_str()).to_ascii_lowercase(),
                    op: q.get(4).map_or("", |m| m.as_str()).to_string(),
                    value: q.get(5).map(|m| m.as_str().to_string()),
                }
            }
        })
        .collect();

    Some(CompoundSelector { tag, qualifiers })
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((name, value.to_string()))
        })
        .collect()
}

impl CompoundSelector {
    fn matches(&self, tag: &str, attrs: &HashMap<String, String>) -> bool {
        if let Some(expected) = &self.tag {
            if !tag.eq_ignore_ascii_case(expected) {
                return false;
            }
        }
        self.qualifiers.iter().all(|q| match q {
            Qualifier::Class(class) => attrs
                .get("class")
                .is_some_and(|c| c.split_whitespace().any(|c| c == class)),
            Qualifier::Id(id) => attrs.get("id").is_some_and(|v| v == id),
            Qualifier::Attr { name, op, value } => match (attrs.get(name), value) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => match op.as_str() {
                    "^" => actual.starts_with(expected.as_str()),
                    "$" => actual.ends_with(expected.as_str()),
                    "*" => actual.contains(expected.as_str()),
                    "~" => actual.split_whitespace().any(|w| w == expected),
                    _ => actual == expected,
                },
            },
        })
    }
}

impl LinkResolver for SimpleSelectorResolver {
    fn resolve(&self, body: &str, selector: &str) -> Option<String> {
        let Some(compound) = parse_selector(selector) else {
            debug!("Unsupported selector: {}", selector);
            return None;
        };

        let href = START_TAG.captures_iter(body).find_map(|caps| {
            let tag = caps.get(1)?.as_str();
            let attrs = parse_attributes(caps.get(2).map_or("", |m| m.as_str()));
            // First matching element decides, with or without an href.
            compound
                .matches(tag, &attrs)
                .then(|| attrs.get("href").cloned())
        })?;

        debug!("using {} found a href of {:?}", selector, href);
        href.filter(|h| !h.is_empty())
    }
}
