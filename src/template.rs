//! Template Rendering
//!
//! Narrow `{{ name }}` placeholder substitution used for target names,
//! collection names, filter/date/value expressions and display aliases.
//!
//! - Placeholders are dot-separated paths into nested mappings
//!   (`{{grafana.host}}`).
//! - Missing keys render as an empty string, never an error.
//! - Values are substituted verbatim; nothing is HTML-escaped.
//!
//! Placeholder paths are identifier segments: `[A-Za-z_][A-Za-z0-9_]*`
//! followed by any number of `.segment` parts, where a segment may also be an
//! array index. Anything else between `{{` and `}}` (Mustache sections,
//! triple braces, spaces inside a path) is a [`TemplateError`], as is an
//! unclosed `{{` or an empty placeholder.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, recognize, rest, verify},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Variable bindings a template is rendered against
pub type Bindings = Map<String, Value>;

/// Template syntax errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A `{{` without a matching `}}`
    #[error("unclosed placeholder at offset {offset} in template '{template}'")]
    Unclosed { template: String, offset: usize },

    /// `{{}}` or `{{   }}`
    #[error("empty placeholder at offset {offset} in template '{template}'")]
    EmptyPlaceholder { template: String, offset: usize },

    /// Placeholder text that is not a dotted path
    #[error("invalid placeholder '{placeholder}' at offset {offset} in template '{template}'")]
    InvalidPlaceholder {
        template: String,
        offset: usize,
        placeholder: String,
    },
}

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Vec<String>),
}

/// A parsed template, ready to be rendered any number of times
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();

        let segments = match segments(&source) {
            Ok(("", segments)) => segments,
            Ok((remaining, _)) => {
                return Err(syntax_error(&source, source.len() - remaining.len()))
            }
            Err(_) => return Err(syntax_error(&source, 0)),
        };

        Ok(Self { source, segments })
    }

    /// The original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check if the template contains no placeholders
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render against the given bindings
    pub fn render(&self, bindings: &Bindings) -> String {
        let mut out = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(path) => {
                    if let Some(value) = lookup(bindings, path) {
                        write_value(&mut out, value);
                    }
                }
            }
        }

        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================
// Parser
// ============================================

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `name` or `name.part.0`
fn path(input: &str) -> IResult<&str, Vec<String>> {
    let head = recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ));
    let tail = many0(preceded(char('.'), take_while1(is_ident_char)));

    map(pair(head, tail), |(first, parts): (&str, Vec<&str>)| {
        std::iter::once(first).chain(parts).map(String::from).collect()
    })(input)
}

/// `{{ path }}`
fn placeholder(input: &str) -> IResult<&str, Vec<String>> {
    delimited(tag("{{"), delimited(multispace0, path, multispace0), tag("}}"))(input)
}

/// Text up to the next `{{`, or the rest of the input
fn literal(input: &str) -> IResult<&str, &str> {
    verify(alt((take_until("{{"), rest)), |text: &str| !text.is_empty())(input)
}

/// Stops at the first `{{` that does not open a valid placeholder
fn segments(input: &str) -> IResult<&str, Vec<Segment>> {
    many0(alt((
        map(placeholder, Segment::Placeholder),
        map(literal, |text: &str| Segment::Literal(text.to_string())),
    )))(input)
}

/// Describe the malformed placeholder opening at `offset`
fn syntax_error(template: &str, offset: usize) -> TemplateError {
    let inner = template.get(offset + 2..).unwrap_or_default();

    match inner.find("}}").map(|end| inner[..end].trim()) {
        None => TemplateError::Unclosed {
            template: template.to_string(),
            offset,
        },
        Some("") => TemplateError::EmptyPlaceholder {
            template: template.to_string(),
            offset,
        },
        Some(text) => TemplateError::InvalidPlaceholder {
            template: template.to_string(),
            offset,
            placeholder: text.to_string(),
        },
    }
}

/// Parse and render a template in one step
pub fn render(template: &str, bindings: &Bindings) -> Result<String, TemplateError> {
    Ok(Template::parse(template)?.render(bindings))
}

/// Resolve a dotted path into nested bindings
fn lookup<'a>(bindings: &'a Bindings, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = bindings.get(first)?;

    for part in rest {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Append the textual form of a value
fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
        }
        Value::Object(_) => out.push_str(&value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(value: Value) -> Bindings {
        match value {
            Value::Object(map) => map,
            _ => panic!("bindings must be an object"),
        }
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let vars = bindings(json!({"a": "x"}));
        assert_eq!(render("{{a}}-{{b}}", &vars).unwrap(), "x-");
    }

    #[test]
    fn test_nested_path() {
        let vars = bindings(json!({"grafana": {"host": "db-1"}, "n": 3}));
        assert_eq!(
            render("host == '{{ grafana.host }}' LIMIT {{n}}", &vars).unwrap(),
            "host == 'db-1' LIMIT 3"
        );
        assert_eq!(render("{{grafana.missing.deeper}}", &vars).unwrap(), "");
    }

    #[test]
    fn test_value_forms() {
        let vars = bindings(json!({
            "flag": true,
            "none": null,
            "list": ["a", 1, false],
            "obj": {"k": "v"}
        }));

        assert_eq!(render("{{flag}}", &vars).unwrap(), "true");
        assert_eq!(render("[{{none}}]", &vars).unwrap(), "[]");
        assert_eq!(render("{{list}}", &vars).unwrap(), "a,1,false");
        assert_eq!(render("{{list.1}}", &vars).unwrap(), "1");
        assert_eq!(render("{{obj}}", &vars).unwrap(), r#"{"k":"v"}"#);
    }

    #[test]
    fn test_no_html_escaping() {
        let vars = bindings(json!({"expr": "a < b && c > \"d\""}));
        assert_eq!(render("{{expr}}", &vars).unwrap(), "a < b && c > \"d\"");
    }

    #[test]
    fn test_syntax_errors() {
        let vars = Bindings::new();

        assert!(matches!(
            render("abc {{open", &vars),
            Err(TemplateError::Unclosed { offset: 4, .. })
        ));
        assert!(matches!(
            render("x{{  }}", &vars),
            Err(TemplateError::EmptyPlaceholder { offset: 1, .. })
        ));
        // A lone closing brace pair is plain text
        assert_eq!(render("a }} b", &vars).unwrap(), "a }} b");
    }

    #[test]
    fn test_mustache_sections_rejected() {
        let vars = bindings(json!({"x": "VAL"}));

        assert!(matches!(
            render("{{{x}}}", &vars),
            Err(TemplateError::InvalidPlaceholder { offset: 0, ref placeholder, .. }) if placeholder == "{x"
        ));
        assert!(matches!(
            render("pre {{#x}}a{{/x}}", &vars),
            Err(TemplateError::InvalidPlaceholder { offset: 4, ref placeholder, .. }) if placeholder == "#x"
        ));
        assert!(matches!(
            render("{{x}} {{^x}}none{{/x}}", &vars),
            Err(TemplateError::InvalidPlaceholder { offset: 6, .. })
        ));
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let vars = bindings(json!({"a": "x", "b": "y"}));

        for template in ["{{a b}}", "{{a-b}}", "{{a.}}", "{{.a}}", "{{1a}}", "{{a..b}}"] {
            assert!(
                matches!(render(template, &vars), Err(TemplateError::InvalidPlaceholder { offset: 0, .. })),
                "{} should be rejected",
                template
            );
        }

        let template = Template::parse("{{ _private.list.0 }}-{{b}}").unwrap();
        assert_eq!(template.render(&vars), "-y");
    }

    #[test]
    fn test_parse_once_render_many() {
        let template = Template::parse("{{x1}}.{{aggregation}}").unwrap();
        assert!(!template.is_literal());
        assert_eq!(template.source(), "{{x1}}.{{aggregation}}");

        let a = bindings(json!({"x1": "cpu", "aggregation": "MAX"}));
        let b = bindings(json!({"x1": "mem", "aggregation": "SUM"}));
        assert_eq!(template.render(&a), "cpu.MAX");
        assert_eq!(template.render(&b), "mem.SUM");

        assert!(Template::parse("plain").unwrap().is_literal());
    }
}
