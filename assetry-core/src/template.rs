//! Template formatter.
//!
//! Resolves `{name}`, `{name.attr}`, `{name[0]}` and `{name[key]}` placeholders
//! against bound arguments. In partial mode unresolved placeholders are kept,
//! with mapping-key hops flattened (`{metadata[customer]}` becomes
//! `{metadata_customer_}`), so the output is again a valid template.
//! A later full pass resolves the flattened form through an alias derived from
//! the same mapping argument.

use std::collections::BTreeMap;

use tracing::debug;

use crate::arguments::BoundArguments;
use crate::error::Error;
use crate::parse::{escape_braces, normalize_key, parse_template, Accessor, Placeholder, TemplateSegment};
use crate::value::Value;

/// Maximum depth of re-resolving substituted values that are templates themselves.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Keys visible to a template.
#[derive(Debug, Clone, Default)]
pub struct FormatArguments {
    values: Vec<(String, Value)>,
    aliases: BTreeMap<String, Value>,
}

impl FormatArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound arguments plus the arguments bound on nested asset values.
    /// Direct bindings take precedence over the nested ones.
    pub fn from_bound(bound: &BoundArguments) -> Self {
        let mut arguments = FormatArguments::new();
        for (name, value) in bound.iter() {
            arguments.insert(name, value.clone());
        }
        let mut pending = bound
            .iter()
            .filter_map(|(_, v)| v.as_asset().cloned())
            .collect::<Vec<_>>();
        while let Some(asset) = pending.pop() {
            for (name, value) in asset.bound_arguments().iter() {
                if let Some(nested) = value.as_asset() {
                    pending.push(nested.clone());
                }
                arguments.insert_fallback(name, value.clone());
            }
        }
        arguments
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.add_aliases(name, &value, 0);
        if let Some(entry) = self.values.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.values.push((name.to_owned(), value));
        }
    }

    pub fn insert_fallback(&mut self, name: &str, value: Value) {
        if !self.contains(name) {
            self.insert(name, value);
        }
    }

    fn add_aliases(&mut self, prefix: &str, value: &Value, depth: usize) {
        if depth > 4 {
            return;
        }
        if let Value::Object(map) = value {
            for (key, item) in map {
                let alias = format!("{}_{}_", prefix, normalize_key(key));
                self.add_aliases(&alias, item, depth + 1);
                self.aliases.insert(alias, item.clone());
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(n, _)| n == name)
    }

    /// Direct key first, then a flattened mapping-key alias.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.aliases.get(name))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.values.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub struct TemplateFormatter<'a> {
    arguments: &'a FormatArguments,
}

impl<'a> TemplateFormatter<'a> {
    pub fn new(arguments: &'a FormatArguments) -> Self {
        TemplateFormatter { arguments }
    }

    /// Format a template. `None` passes through unchanged.
    ///
    /// With `allow_partial` a placeholder whose key is not bound is left in the
    /// output. Without it the missing key is a `MissingTemplateKey` error.
    /// Failures of `.attr`, `[n]` or `[key]` on a bound value are reported in
    /// both modes.
    pub fn format(&self, template: Option<&str>, allow_partial: bool) -> Result<Option<String>, Error> {
        match template {
            None => Ok(None),
            Some(template) => self.format_text(template, allow_partial, 0).map(Some),
        }
    }

    fn format_text(&self, template: &str, allow_partial: bool, depth: usize) -> Result<String, Error> {
        let parsed = parse_template(template)?;
        let mut result = String::with_capacity(template.len());
        for segment in parsed.segments {
            match segment {
                TemplateSegment::Literal(text) => {
                    if allow_partial {
                        result.push_str(&escape_braces(&text));
                    } else {
                        result.push_str(&text);
                    }
                }
                TemplateSegment::Placeholder(placeholder) => {
                    match self.arguments.get(&placeholder.name) {
                        Some(value) => {
                            let value = evaluate(value, &placeholder)?;
                            let text = value.render();
                            result.push_str(&self.expand_nested(&text, allow_partial, depth)?);
                        }
                        None if allow_partial => {
                            result.push('{');
                            result.push_str(&placeholder.normalized());
                            result.push('}');
                        }
                        None => {
                            return Err(Error::missing_template_key(
                                &placeholder.name,
                                &self.arguments.keys(),
                            )
                            .with_position(&placeholder.position))
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// Substituted text that is itself a template is resolved again.
    fn expand_nested(&self, text: &str, allow_partial: bool, depth: usize) -> Result<String, Error> {
        let plain = || {
            if allow_partial {
                escape_braces(text)
            } else {
                text.to_owned()
            }
        };
        if !text.contains('{') {
            return Ok(plain());
        }
        match parse_template(text) {
            Ok(nested) if nested.has_placeholders() => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(Error::template_resolution_error(
                        text,
                        "nested placeholders exceed the maximum depth",
                    ));
                }
                debug!(template = text, depth, "resolving nested template");
                self.format_text(text, allow_partial, depth + 1)
            }
            _ => Ok(plain()),
        }
    }
}

fn evaluate(value: &Value, placeholder: &Placeholder) -> Result<Value, Error> {
    let mut current = value.clone();
    for accessor in &placeholder.accessors {
        let next = match accessor {
            Accessor::Attribute(name) => current.attribute(name),
            Accessor::Index(i) => current.index(*i),
            Accessor::Key(key) => current.key(key),
        };
        current = next.map_err(|message| {
            Error::template_resolution_error(&placeholder.encode(), &message)
                .with_position(&placeholder.position)
        })?;
    }
    Ok(current)
}

/// Format a template against bound arguments.
pub fn format_template(
    template: Option<&str>,
    bound: &BoundArguments,
    allow_partial: bool,
) -> Result<Option<String>, Error> {
    let arguments = FormatArguments::from_bound(bound);
    TemplateFormatter::new(&arguments).format(template, allow_partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;

    fn bound(items: &[(&str, Value)]) -> BoundArguments {
        let mut b = BoundArguments::new();
        for (k, v) in items {
            b.insert(k, v.clone());
        }
        b
    }

    #[test]
    fn none_template() -> Result<(), Error> {
        assert_eq!(format_template(None, &BoundArguments::new(), false)?, None);
        Ok(())
    }

    #[test]
    fn full_resolution() -> Result<(), Error> {
        let b = bound(&[("customer", "acme".into()), ("endpoint", "orders".into())]);
        let path = format_template(Some("{customer}/{endpoint}.parquet"), &b, false)?;
        assert_eq!(path.as_deref(), Some("acme/orders.parquet"));
        Ok(())
    }

    #[test]
    fn partial_keeps_missing() -> Result<(), Error> {
        let b = bound(&[("customer", "acme".into())]);
        let path = format_template(Some("{customer}/{endpoint}.parquet"), &b, true)?;
        assert_eq!(path.as_deref(), Some("acme/{endpoint}.parquet"));
        Ok(())
    }

    #[test]
    fn missing_key_message() {
        let b = bound(&[("customer", "acme".into())]);
        let e = format_template(Some("{customer}/{endpoint}.parquet"), &b, false).unwrap_err();
        assert_eq!(e.error_type, ErrorType::MissingTemplateKey);
        assert!(e.message.contains("Missing format key 'endpoint'"));
        assert!(e.message.contains("Available keys: customer"));
    }

    #[test]
    fn mapping_key_normalization() -> Result<(), Error> {
        let partial = format_template(Some("{metadata[customer]}/{day}"), &bound(&[("day", 3.into())]), true)?;
        assert_eq!(partial.as_deref(), Some("{metadata_customer_}/3"));

        let metadata = Value::object([("customer", "acme")]);
        let b = bound(&[("metadata", metadata)]);
        let full = format_template(partial.as_deref(), &b, false)?;
        assert_eq!(full.as_deref(), Some("acme/3"));
        let direct = format_template(Some("{metadata[customer]}/3"), &b, false)?;
        assert_eq!(direct, full);
        Ok(())
    }

    #[test]
    fn index_and_attribute_access() -> Result<(), Error> {
        let b = bound(&[
            ("regions", Value::array(["north", "south"])),
            ("cfg", Value::object([("name", "daily")])),
        ]);
        let text = format_template(Some("{regions[1]}/{cfg.name}"), &b, false)?;
        assert_eq!(text.as_deref(), Some("south/daily"));
        Ok(())
    }

    #[test]
    fn nested_failures_propagate() {
        let b = bound(&[("regions", Value::array(["north"])), ("cfg", Value::object([("a", 1)]))]);
        for template in ["{regions[4]}", "{cfg[b]}", "{cfg.b}", "{regions.x}"] {
            for partial in [true, false] {
                let e = format_template(Some(template), &b, partial).unwrap_err();
                assert_eq!(e.error_type, ErrorType::TemplateResolutionError, "{}", template);
            }
        }
    }

    #[test]
    fn nested_placeholders_resolved() -> Result<(), Error> {
        let b = bound(&[("path", "{suffix}".into()), ("suffix", "final".into())]);
        assert_eq!(format_template(Some("{path}"), &b, false)?.as_deref(), Some("final"));
        Ok(())
    }

    #[test]
    fn self_reference_is_bounded() {
        let b = bound(&[("path", "{path}".into())]);
        let e = format_template(Some("{path}"), &b, false).unwrap_err();
        assert_eq!(e.error_type, ErrorType::TemplateResolutionError);
    }

    #[test]
    fn escaped_braces() -> Result<(), Error> {
        let b = bound(&[("x", "1".into())]);
        assert_eq!(format_template(Some("{{x}}={x}"), &b, false)?.as_deref(), Some("{x}=1"));
        assert_eq!(format_template(Some("{{x}}={y}"), &b, true)?.as_deref(), Some("{{x}}={y}"));
        Ok(())
    }
}
