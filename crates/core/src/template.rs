//! Template resolution and randomized variations
//!
//! A template is a JSON object whose string leaves may enumerate
//! alternatives separated by `|`. Resolving a template picks one
//! alternative per leaf and renders a plain-text description, either
//! through the format string stored under [`FORMAT_KEY`] or as a generic
//! `key: value` listing.

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

/// Separates mutually exclusive options inside one field
pub const ALTERNATIVES_SEPARATOR: char = '|';

/// Reserved top-level key holding a `{dotted.path}` format string
pub const FORMAT_KEY: &str = "_format";

/// Returned by [`generic_description`] when nothing could be described
pub const EMPTY_TEMPLATE: &str = "Empty template";

/// Returned by [`create_description`] when resolution fails
pub const DESCRIPTION_ERROR: &str = "Error creating description";

pub type Template = Map<String, Value>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("'_format' must be a string, found {0}")]
    FormatNotString(&'static str),

    #[error("Unclosed placeholder at byte {0} of format string")]
    UnclosedPlaceholder(usize),
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static EMPTY_PARENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\s*\)").unwrap());
static REPEATED_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*,)+").unwrap());
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*$").unwrap());
static LEADING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*,").unwrap());
static COMMA_PERIOD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*\.").unwrap());

/// Split a field into its trimmed, non-empty alternatives.
pub fn alternatives(value: &str) -> Vec<&str> {
    value
        .split(ALTERNATIVES_SEPARATOR)
        .map(str::trim)
        .filter(|opt| !opt.is_empty())
        .collect()
}

/// Resolve a string field: one random alternative if it has any, the
/// trimmed string otherwise.
pub fn resolve_str<R: Rng + ?Sized>(value: &str, rng: &mut R) -> String {
    if !value.contains(ALTERNATIVES_SEPARATOR) {
        return value.trim().to_string();
    }

    alternatives(value)
        .choose(rng)
        .map(|opt| opt.to_string())
        .unwrap_or_default()
}

/// Resolve a template value. Non-string values are returned unchanged.
pub fn resolve_value<R: Rng + ?Sized>(value: &Value, rng: &mut R) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, rng)),
        other => other.clone(),
    }
}

/// Follow a dotted path through nested objects and resolve the leaf.
///
/// Missing segments, or a segment that walks into a non-object, resolve
/// to an empty string. Numbers and booleans render as their JSON text.
pub fn resolve_path<R: Rng + ?Sized>(template: &Template, dotted_path: &str, rng: &mut R) -> String {
    let mut current: Option<&Value> = None;

    for segment in dotted_path.trim().split('.') {
        let next = match current {
            None => template.get(segment),
            Some(Value::Object(map)) => map.get(segment),
            Some(_) => return String::new(),
        };

        match next {
            Some(value) => current = Some(value),
            None => return String::new(),
        }
    }

    match current.map(|leaf| resolve_value(leaf, rng)) {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Substitute `{dotted.path}` placeholders and tidy the punctuation that
/// empty substitutions leave behind.
pub fn format_description<R: Rng + ?Sized>(
    template: &Template,
    format: &str,
    rng: &mut R,
) -> Result<String, TemplateError> {
    let mut substituted = String::with_capacity(format.len());
    let mut rest = format;
    let mut offset = 0;

    while let Some(open) = rest.find('{') {
        substituted.push_str(&rest[..open]);

        let after_open = &rest[open + 1..];
        let close = after_open
            .find('}')
            .ok_or(TemplateError::UnclosedPlaceholder(offset + open))?;

        substituted.push_str(&resolve_path(template, &after_open[..close], rng));

        let consumed = open + 1 + close + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    substituted.push_str(rest);

    Ok(cleanup_description(&substituted))
}

/// Punctuation cleanup after substitution. Passes run in this order:
/// later ones rely on repeated separators already being collapsed.
fn cleanup_description(text: &str) -> String {
    let text = WHITESPACE.replace_all(text, " ");
    let text = EMPTY_PARENS.replace_all(&text, "");
    let text = REPEATED_COMMA.replace_all(&text, ",");
    let text = TRAILING_COMMA.replace_all(&text, "");
    let text = LEADING_COMMA.replace_all(&text, "");
    let text = COMMA_PERIOD.replace_all(&text, ".");
    text.trim().to_string()
}

/// Describe a template as `dotted.key: value` parts, in field order.
pub fn generic_description<R: Rng + ?Sized>(template: &Template, rng: &mut R) -> String {
    fn walk<R: Rng + ?Sized>(
        map: &Template,
        prefix: &mut Vec<String>,
        parts: &mut Vec<String>,
        rng: &mut R,
    ) {
        for (key, value) in map {
            if prefix.is_empty() && key == FORMAT_KEY {
                continue;
            }

            match value {
                Value::String(s) => {
                    let resolved = resolve_str(s, rng);
                    if !resolved.is_empty() {
                        let path = if prefix.is_empty() {
                            key.clone()
                        } else {
                            format!("{}.{}", prefix.join("."), key)
                        };
                        parts.push(format!("{}: {}", path, resolved));
                    }
                }
                Value::Object(nested) => {
                    prefix.push(key.clone());
                    walk(nested, prefix, parts, rng);
                    prefix.pop();
                }
                _ => {}
            }
        }
    }

    let mut parts = Vec::new();
    walk(template, &mut Vec::new(), &mut parts, rng);

    if parts.is_empty() {
        EMPTY_TEMPLATE.to_string()
    } else {
        parts.join(", ")
    }
}

/// Build the description for one template.
///
/// Never fails: resolution errors are logged and replaced by
/// [`DESCRIPTION_ERROR`].
pub fn create_description<R: Rng + ?Sized>(template: &Template, rng: &mut R) -> String {
    let result = match template.get(FORMAT_KEY) {
        Some(Value::String(format)) => format_description(template, format, rng),
        Some(other) => Err(TemplateError::FormatNotString(json_kind(other))),
        None => return generic_description(template, rng),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("Error creating prompt description: {}", e);
        DESCRIPTION_ERROR.to_string()
    })
}

/// Canned enrichment used when no language model could expand `description`
pub fn fallback_prompt(description: &str) -> String {
    const ENRICHMENT: &[&str] = &[
        "golden hour lighting with warm tones",
        "centered composition with rule of thirds",
        "serene and peaceful atmosphere",
        "fine details, high resolution, 8k quality",
        "Natural skin tones, realistic textures, soft shadows, slight bokeh effect in background, photographic quality",
    ];

    let mut prompt = description.trim().trim_end_matches('.').to_string();
    for part in ENRICHMENT {
        prompt.push_str(". ");
        prompt.push_str(part);
    }
    prompt.push('.');
    prompt
}

/// Produce `n` templates: the original first, then `n - 1` variants with
/// one alternative drawn per multi-option field. `n == 0` yields nothing.
pub fn generate_variations<R: Rng + ?Sized>(template: &Template, n: usize, rng: &mut R) -> Vec<Template> {
    if n == 0 {
        return Vec::new();
    }

    let mut variations = Vec::with_capacity(n);
    variations.push(template.clone());

    for _ in 1..n {
        variations.push(vary(template, true, rng));
    }

    tracing::debug!(
        "Created {} variations with random attribute selections",
        variations.len()
    );
    variations
}

fn vary<R: Rng + ?Sized>(map: &Template, top_level: bool, rng: &mut R) -> Template {
    let mut variation = Map::with_capacity(map.len());

    for (key, value) in map {
        let picked = match value {
            _ if top_level && key == FORMAT_KEY => value.clone(),
            Value::String(s) if s.contains(ALTERNATIVES_SEPARATOR) => {
                match alternatives(s).choose(rng) {
                    Some(opt) => Value::String(opt.to_string()),
                    None => value.clone(),
                }
            }
            Value::Object(nested) => Value::Object(vary(nested, false, rng)),
            other => other.clone(),
        };
        variation.insert(key.clone(), picked);
    }

    variation
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn template(value: Value) -> Template {
        match value {
            Value::Object(map) => map,
            _ => panic!("test template must be an object"),
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_fallback_prompt_keeps_description() {
        let out = fallback_prompt("A cat on a roof.");
        assert!(out.starts_with("A cat on a roof. golden hour lighting"));
        assert!(out.contains("8k quality"));
        assert!(out.ends_with("photographic quality."));
    }

    #[test]
    fn test_resolve_single_value() {
        assert_eq!(resolve_str("summer", &mut rng()), "summer");
        assert_eq!(resolve_str("  summer  ", &mut rng()), "summer");
        assert_eq!(resolve_str("", &mut rng()), "");
    }

    #[test]
    fn test_resolve_picks_one_trimmed_option() {
        let mut rng = rng();
        for _ in 0..50 {
            let picked = resolve_str(" summer | autumn | winter ", &mut rng);
            assert!(["summer", "autumn", "winter"].contains(&picked.as_str()));
        }
    }

    #[test]
    fn test_resolve_only_separators_is_empty() {
        assert_eq!(resolve_str(" | |", &mut rng()), "");
    }

    #[test]
    fn test_resolve_value_passes_non_strings_through() {
        assert_eq!(resolve_value(&json!(123), &mut rng()), json!(123));
        assert_eq!(resolve_value(&json!(["a", "b"]), &mut rng()), json!(["a", "b"]));
        assert_eq!(resolve_value(&Value::Null, &mut rng()), Value::Null);
    }

    #[test]
    fn test_resolve_path_walks_any_depth() {
        let t = template(json!({
            "subject": {"face": {"eyes": {"color": "green"}}},
            "age": 30,
        }));
        assert_eq!(resolve_path(&t, "subject.face.eyes.color", &mut rng()), "green");
        assert_eq!(resolve_path(&t, "age", &mut rng()), "30");
    }

    #[test]
    fn test_resolve_path_missing_or_non_map() {
        let t = template(json!({"subject": {"type": "cat"}, "style": "oil"}));
        assert_eq!(resolve_path(&t, "subject.age", &mut rng()), "");
        assert_eq!(resolve_path(&t, "style.brush", &mut rng()), "");
        assert_eq!(resolve_path(&t, "nothing", &mut rng()), "");
        assert_eq!(resolve_path(&t, "subject", &mut rng()), "");
    }

    #[test]
    fn test_format_description_cleans_empty_parens() {
        let t = template(json!({"a": "x"}));
        let out = format_description(&t, "Val: {a} ({missing})", &mut rng()).unwrap();
        assert_eq!(out, "Val: x");
    }

    #[test]
    fn test_format_description_collapses_orphan_commas() {
        let t = template(json!({"a": "x", "b": ""}));
        let out = format_description(&t, "{a}, {b}, {c}.", &mut rng()).unwrap();
        assert_eq!(out, "x.");

        let out = format_description(&t, "{missing}, a cat,", &mut rng()).unwrap();
        assert_eq!(out, "a cat");
    }

    #[test]
    fn test_format_description_collapses_whitespace() {
        let t = template(json!({"subject": {"type": "dog|dog"}}));
        let out = format_description(&t, "A   {subject.type}\n in  the park", &mut rng()).unwrap();
        assert_eq!(out, "A dog in the park");
    }

    #[test]
    fn test_format_description_unclosed_placeholder() {
        let t = template(json!({"a": "x"}));
        let err = format_description(&t, "Val: {a", &mut rng()).unwrap_err();
        assert!(matches!(err, TemplateError::UnclosedPlaceholder(5)));
    }

    #[test]
    fn test_generic_description_uses_dotted_keys() {
        let t = template(json!({
            "subject": {"type": "cat", "age": ""},
            "style": "oil painting",
            "count": 3,
        }));
        assert_eq!(
            generic_description(&t, &mut rng()),
            "subject.type: cat, style: oil painting"
        );
    }

    #[test]
    fn test_generic_description_skips_format_key() {
        let t = template(json!({"_format": "{style}", "style": "ink"}));
        assert_eq!(generic_description(&t, &mut rng()), "style: ink");
    }

    #[test]
    fn test_generic_description_empty_template() {
        assert_eq!(generic_description(&Template::new(), &mut rng()), EMPTY_TEMPLATE);
        let t = template(json!({"subject": {}, "style": " "}));
        assert_eq!(generic_description(&t, &mut rng()), EMPTY_TEMPLATE);
    }

    #[test]
    fn test_create_description_dispatch() {
        let with_format = template(json!({
            "_format": "A {subject.type} in {environment}",
            "subject": {"type": "person"},
            "environment": "park",
        }));
        assert_eq!(create_description(&with_format, &mut rng()), "A person in park");

        let without = template(json!({"environment": "park"}));
        assert_eq!(create_description(&without, &mut rng()), "environment: park");
    }

    #[test]
    fn test_create_description_error_sentinel() {
        let t = template(json!({"_format": 12}));
        assert_eq!(create_description(&t, &mut rng()), DESCRIPTION_ERROR);

        let t = template(json!({"_format": "{broken"}));
        assert_eq!(create_description(&t, &mut rng()), DESCRIPTION_ERROR);
    }

    #[test]
    fn test_variations_count_and_original_first() {
        let t = template(json!({
            "subject": {"type": "person|animal"},
            "environment": "indoor|outdoor",
        }));
        let variations = generate_variations(&t, 5, &mut rng());
        assert_eq!(variations.len(), 5);
        assert_eq!(variations[0], t);
    }

    #[test]
    fn test_variations_zero_and_one() {
        let t = template(json!({"environment": "indoor|outdoor"}));
        assert!(generate_variations(&t, 0, &mut rng()).is_empty());

        let single = generate_variations(&t, 1, &mut rng());
        assert_eq!(single, vec![t]);
    }

    #[test]
    fn test_variations_keep_fixed_fields() {
        let t = template(json!({
            "_format": "A {subject.type} | {style}",
            "subject": {"type": "person|animal", "age": "young"},
            "style": "realistic",
            "seed": 42,
        }));

        for variation in generate_variations(&t, 6, &mut rng()) {
            assert_eq!(variation["style"], json!("realistic"));
            assert_eq!(variation["seed"], json!(42));
            assert_eq!(variation["subject"]["age"], json!("young"));
            assert_eq!(variation[FORMAT_KEY], t[FORMAT_KEY]);
        }
    }

    #[test]
    fn test_variations_pick_within_each_nested_field() {
        let t = template(json!({
            "subject": {"type": "person|animal", "age": "young | old"},
            "clothing": {"top": "shirt|coat"},
            "lighting": "soft|hard",
        }));

        for variation in generate_variations(&t, 10, &mut rng()).iter().skip(1) {
            let subject = &variation["subject"];
            assert!(["person", "animal"].contains(&subject["type"].as_str().unwrap()));
            assert!(["young", "old"].contains(&subject["age"].as_str().unwrap()));
            assert!(["shirt", "coat"].contains(&variation["clothing"]["top"].as_str().unwrap()));
            assert!(["soft", "hard"].contains(&variation["lighting"].as_str().unwrap()));
        }
    }

    #[test]
    fn test_variations_do_not_mutate_input() {
        let t = template(json!({"environment": "indoor|outdoor"}));
        let before = t.clone();
        let _ = generate_variations(&t, 4, &mut rng());
        assert_eq!(t, before);
    }
}
