//! Template grammar.
//!
//! ```text
//! template    := (escape | placeholder | literal)*
//! escape      := "{{" | "}}"
//! placeholder := "{" identifier accessor* "}"
//! accessor    := "." identifier | "[" integer "]" | "[" quoted "]" | "[" bare-key "]"
//! ```
//! The parser produces an access path per placeholder. Evaluation happens in
//! [crate::template].

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1};
use nom::combinator::{opt, recognize};
use nom::multi::many0;
use nom::{IResult, Parser};
use nom_locate::LocatedSpan;

use crate::error::{Error, Position};

type Span<'a> = LocatedSpan<&'a str>;

impl<'a> From<Span<'a>> for Position {
    fn from(span: Span<'a>) -> Position {
        Position {
            offset: span.location_offset(),
            line: span.location_line(),
            column: span.get_utf8_column(),
        }
    }
}

/// One hop of an access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// `.name`
    Attribute(String),
    /// `[3]` or `[-1]`
    Index(i64),
    /// `[key]`, `['key']` or `["key"]`
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub accessors: Vec<Accessor>,
    pub position: Position,
}

impl Placeholder {
    pub fn new(name: &str) -> Self {
        Placeholder {
            name: name.to_owned(),
            accessors: Vec::new(),
            position: Position::unknown(),
        }
    }

    pub fn with_accessor(mut self, accessor: Accessor) -> Self {
        self.accessors.push(accessor);
        self
    }

    pub fn has_keys(&self) -> bool {
        self.accessors.iter().any(|a| matches!(a, Accessor::Key(_)))
    }

    /// Placeholder text without braces, e.g. `metadata['customer id'].x`.
    pub fn encode(&self) -> String {
        let mut text = self.name.clone();
        for accessor in &self.accessors {
            match accessor {
                Accessor::Attribute(name) => {
                    text.push('.');
                    text.push_str(name);
                }
                Accessor::Index(i) => text.push_str(&format!("[{}]", i)),
                Accessor::Key(key) => {
                    if is_bare_key(key) {
                        text.push_str(&format!("[{}]", key));
                    } else if key.contains('\'') {
                        text.push_str(&format!("[\"{}\"]", key));
                    } else {
                        text.push_str(&format!("['{}']", key));
                    }
                }
            }
        }
        text
    }

    /// Placeholder text with mapping-key hops flattened into the identifier,
    /// e.g. `metadata[customer]` becomes `metadata_customer_`.
    pub fn normalized(&self) -> String {
        let mut text = self.name.clone();
        for accessor in &self.accessors {
            match accessor {
                Accessor::Attribute(name) => {
                    text.push('.');
                    text.push_str(name);
                }
                Accessor::Index(i) => text.push_str(&format!("[{}]", i)),
                Accessor::Key(key) => {
                    text.push('_');
                    text.push_str(&normalize_key(key));
                    text.push('_');
                }
            }
        }
        text
    }
}

/// Replace characters that can't appear in an identifier by `_`.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn is_bare_key(key: &str) -> bool {
    !key.is_empty()
        && !key.parse::<i64>().is_ok()
        && key.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Parsed template string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

impl Template {
    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Placeholder(p) => Some(p),
            _ => None,
        })
    }

    pub fn has_placeholders(&self) -> bool {
        self.placeholders().next().is_some()
    }

    /// Template text; literal braces are escaped again.
    pub fn encode(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                TemplateSegment::Literal(text) => escape_braces(text),
                TemplateSegment::Placeholder(p) => format!("{{{}}}", p.encode()),
            })
            .collect()
    }
}

pub fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

fn identifier(text: Span) -> IResult<Span, String> {
    let (text, a) = take_while1(|c: char| c.is_alphabetic() || c == '_').parse(text)?;
    let (text, b) = take_while(|c: char| c.is_alphanumeric() || c == '_').parse(text)?;
    Ok((text, format!("{}{}", a.fragment(), b.fragment())))
}

fn attribute_accessor(text: Span) -> IResult<Span, Accessor> {
    let (text, _) = char('.').parse(text)?;
    let (text, name) = identifier(text)?;
    Ok((text, Accessor::Attribute(name)))
}

fn index_accessor(text: Span) -> IResult<Span, Accessor> {
    let (text, _) = char('[').parse(text)?;
    let (rest, number) = recognize((opt(char('-')), digit1)).parse(text)?;
    let (rest, _) = char(']').parse(rest)?;
    match number.fragment().parse::<i64>() {
        Ok(i) => Ok((rest, Accessor::Index(i))),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            text,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn quoted_key_accessor(text: Span) -> IResult<Span, Accessor> {
    let (text, _) = char('[').parse(text)?;
    let (text, key) = alt((
        (char('\''), take_while(|c: char| c != '\''), char('\'')),
        (char('"'), take_while(|c: char| c != '"'), char('"')),
    ))
    .parse(text)?;
    let (text, _) = char(']').parse(text)?;
    Ok((text, Accessor::Key(key.1.fragment().to_string())))
}

fn bare_key_accessor(text: Span) -> IResult<Span, Accessor> {
    let (text, _) = char('[').parse(text)?;
    let (text, key) =
        take_while1(|c: char| c != ']' && c != '[' && c != '{' && c != '}').parse(text)?;
    let (text, _) = char(']').parse(text)?;
    Ok((text, Accessor::Key(key.fragment().to_string())))
}

fn accessor(text: Span) -> IResult<Span, Accessor> {
    alt((
        attribute_accessor,
        index_accessor,
        quoted_key_accessor,
        bare_key_accessor,
    ))
    .parse(text)
}

fn placeholder(text: Span) -> IResult<Span, TemplateSegment> {
    let position: Position = text.into();
    let (text, _) = char('{').parse(text)?;
    let (text, name) = identifier(text)?;
    let (text, accessors) = many0(accessor).parse(text)?;
    let (text, _) = char('}').parse(text)?;
    Ok((
        text,
        TemplateSegment::Placeholder(Placeholder {
            name,
            accessors,
            position,
        }),
    ))
}

fn escaped_brace(text: Span) -> IResult<Span, TemplateSegment> {
    let (text, escaped) = alt((tag("{{"), tag("}}"))).parse(text)?;
    Ok((
        text,
        TemplateSegment::Literal(escaped.fragment()[..1].to_string()),
    ))
}

fn literal(text: Span) -> IResult<Span, TemplateSegment> {
    let (text, a) = take_while1(|c: char| c != '{' && c != '}').parse(text)?;
    Ok((text, TemplateSegment::Literal(a.fragment().to_string())))
}

fn segment(text: Span) -> IResult<Span, TemplateSegment> {
    alt((escaped_brace, placeholder, literal)).parse(text)
}

/// Parse a template string.
pub fn parse_template(template: &str) -> Result<Template, Error> {
    let text = Span::new(template);
    let (rest, segments) = match many0(segment).parse(text) {
        Ok(parsed) => parsed,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let position: Position = e.input.into();
            return Err(Error::template_parse_error(
                template,
                "invalid placeholder",
                &position,
            ));
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(Error::template_parse_error(
                template,
                "incomplete template",
                &Position::unknown(),
            ))
        }
    };
    if !rest.fragment().is_empty() {
        let position: Position = rest.into();
        let message = if rest.fragment().starts_with('}') {
            "single '}' encountered"
        } else {
            "invalid or unclosed placeholder"
        };
        return Err(Error::template_parse_error(template, message, &position));
    }

    let mut merged: Vec<TemplateSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match (merged.last_mut(), segment) {
            (Some(TemplateSegment::Literal(previous)), TemplateSegment::Literal(text)) => {
                previous.push_str(&text)
            }
            (_, segment) => merged.push(segment),
        }
    }
    Ok(Template { segments: merged })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_placeholder(template: &str) -> Placeholder {
        let parsed = parse_template(template).unwrap();
        let placeholder = parsed.placeholders().next().unwrap().clone();
        placeholder
    }

    #[test]
    fn parse_literal_and_keys() -> Result<(), Error> {
        let t = parse_template("{customer}/{endpoint}.parquet")?;
        assert_eq!(t.segments.len(), 4);
        assert_eq!(
            t.placeholders().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["customer", "endpoint"]
        );
        assert_eq!(t.encode(), "{customer}/{endpoint}.parquet");
        Ok(())
    }

    #[test]
    fn parse_access_paths() {
        let p = only_placeholder("x/{child.path}");
        assert_eq!(p.accessors, vec![Accessor::Attribute("path".to_owned())]);

        let p = only_placeholder("{items[-1]}");
        assert_eq!(p.accessors, vec![Accessor::Index(-1)]);

        let p = only_placeholder("{metadata[customer]}");
        assert_eq!(p.accessors, vec![Accessor::Key("customer".to_owned())]);

        let p = only_placeholder("{metadata['customer id'].name[0]}");
        assert_eq!(
            p.accessors,
            vec![
                Accessor::Key("customer id".to_owned()),
                Accessor::Attribute("name".to_owned()),
                Accessor::Index(0)
            ]
        );
        assert_eq!(p.encode(), "metadata['customer id'].name[0]");
        assert_eq!(p.normalized(), "metadata_customer_id_.name[0]");
    }

    #[test]
    fn parse_escapes() -> Result<(), Error> {
        let t = parse_template("{{literal}} {x}")?;
        assert_eq!(t.segments[0], TemplateSegment::Literal("{literal} ".to_owned()));
        assert_eq!(t.encode(), "{{literal}} {x}");
        Ok(())
    }

    #[test]
    fn non_identifier_keys_encode_quoted() {
        assert_eq!(only_placeholder("{metadata[customer_1]}").encode(), "metadata[customer_1]");
        for (template, encoded, key) in [
            ("{metadata[customer id]}", "metadata['customer id']", "customer id"),
            ("{metadata[eu-west]}", "metadata['eu-west']", "eu-west"),
            ("{metadata['42']}", "metadata['42']", "42"),
        ] {
            let p = only_placeholder(template);
            assert_eq!(p.encode(), encoded);
            let reparsed = only_placeholder(&format!("{{{}}}", p.encode()));
            assert_eq!(reparsed.accessors, vec![Accessor::Key(key.to_owned())]);
        }
    }

    #[test]
    fn parse_errors() {
        for bad in ["{unclosed", "close}", "{1abc}", "{a.}", "{}"] {
            let e = parse_template(bad).unwrap_err();
            assert_eq!(e.error_type, crate::error::ErrorType::TemplateParseError, "{}", bad);
        }
    }

    #[test]
    fn error_position() {
        let e = parse_template("abc/{x").unwrap_err();
        assert_eq!(e.position.offset, 4);
    }
}
