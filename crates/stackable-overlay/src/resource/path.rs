use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, de};
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu, ensure};

use crate::error::{ClassifyError, ErrorKind};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("field path must not be empty"))]
    Empty,

    #[snafu(display("field path {path:?} contains an empty segment"))]
    EmptySegment { path: String },

    #[snafu(display("field path {path:?} contains an unterminated bracket"))]
    UnterminatedBracket { path: String },

    #[snafu(display("field path {path:?} contains the invalid bracket expression {expression:?}"))]
    InvalidBracket { path: String, expression: String },

    #[snafu(display("field path {path:?} expects a sequence before [{key}={value}]"))]
    NotASequence {
        path: String,
        key: String,
        value: String,
    },

    #[snafu(display("field path {path:?} matches no element with {key}={value}"))]
    NoMatchingElement {
        path: String,
        key: String,
        value: String,
    },
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidPath
    }
}

/// A single step of a [`FieldPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// A mapping key, written as `name` or `["name.with.dots"]`.
    Field(String),

    /// A sequence index, written as `[0]`.
    Index(usize),

    /// The first sequence element whose `key` equals `value`, written as
    /// `[name=web]`.
    Match { key: String, value: String },
}

/// A path into the nested fields of a document.
///
/// ```
/// # use stackable_overlay::resource::{FieldPath, Segment};
/// let path: FieldPath = "spec.template.spec.containers[name=web].ports[0]".parse().unwrap();
/// assert_eq!(path.segments().len(), 6);
/// assert_eq!(path.segments()[5], Segment::Index(0));
///
/// let label: FieldPath = r#"metadata.labels["app.kubernetes.io/name"]"#.parse().unwrap();
/// assert_eq!(
///     label.segments()[2],
///     Segment::Field("app.kubernetes.io/name".to_owned())
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Looks up the value this path addresses in `root`.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        walk(&self.segments, root)
    }

    /// Like [`FieldPath::get`], starting at a mapping.
    pub fn get_in<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        match self.segments.split_first()? {
            (Segment::Field(field), rest) => walk(rest, root.get(field)?),
            _ => None,
        }
    }

    /// Translates this path into an RFC 6901 JSON pointer for `document`.
    ///
    /// Only [`Segment::Match`] needs the document: the matching element is
    /// looked up and replaced by its index. Plain fields and indices are
    /// translated even if they don't exist (yet), so the pointer can be the
    /// target of an `add` operation.
    pub fn to_pointer(&self, document: &Value) -> Result<String> {
        let mut pointer = String::new();
        let mut current = Some(document);

        for segment in &self.segments {
            let token = match segment {
                Segment::Field(field) => {
                    current = current.and_then(|value| value.get(field.as_str()));
                    escape_pointer_token(field)
                }
                Segment::Index(index) => {
                    current = current.and_then(|value| value.get(*index));
                    index.to_string()
                }
                Segment::Match { key, value } => {
                    let items = current.and_then(Value::as_array).context(NotASequenceSnafu {
                        path: self.to_string(),
                        key,
                        value,
                    })?;
                    let index = position_of_match(items, key, value).context(
                        NoMatchingElementSnafu {
                            path: self.to_string(),
                            key,
                            value,
                        },
                    )?;
                    current = items.get(index);
                    index.to_string()
                }
            };

            pointer.push('/');
            pointer.push_str(&token);
        }

        Ok(pointer)
    }
}

fn walk<'a>(segments: &[Segment], mut current: &'a Value) -> Option<&'a Value> {
    for segment in segments {
        current = match segment {
            Segment::Field(field) => current.get(field.as_str())?,
            Segment::Index(index) => current.get(*index)?,
            Segment::Match { key, value } => {
                let items = current.as_array()?;
                items.get(position_of_match(items, key, value)?)?
            }
        };
    }
    Some(current)
}

fn position_of_match(items: &[Value], key: &str, expected: &str) -> Option<usize> {
    items.iter().position(|item| match item.get(key) {
        Some(Value::String(found)) => found == expected,
        Some(found @ (Value::Number(_) | Value::Bool(_))) => found.to_string() == expected,
        _ => false,
    })
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        ensure!(!input.is_empty(), EmptySnafu);

        let mut segments = Vec::new();
        let mut rest = input;
        let mut after_dot = false;

        loop {
            if let Some(after_bracket) = rest.strip_prefix('[') {
                ensure!(!after_dot, EmptySegmentSnafu { path: input });

                let (expression, remainder) =
                    split_bracket(after_bracket).context(UnterminatedBracketSnafu { path: input })?;
                segments.push(parse_bracket(input, expression)?);
                rest = remainder;
            } else {
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                ensure!(end > 0, EmptySegmentSnafu { path: input });

                segments.push(Segment::Field(rest[..end].to_owned()));
                rest = &rest[end..];
            }

            if rest.is_empty() {
                break;
            }

            if let Some(after) = rest.strip_prefix('.') {
                ensure!(!after.is_empty(), EmptySegmentSnafu { path: input });
                rest = after;
                after_dot = true;
            } else if rest.starts_with('[') {
                after_dot = false;
            } else {
                // Only reachable directly after a closing bracket, e.g. `a[0]b`
                return InvalidBracketSnafu {
                    path: input,
                    expression: rest,
                }
                .fail();
            }
        }

        Ok(Self { segments })
    }
}

/// Splits `expression]remainder` into its two parts. Quoted expressions may
/// contain brackets themselves.
fn split_bracket(after_bracket: &str) -> Option<(&str, &str)> {
    let end = if let Some(quoted) = after_bracket.strip_prefix('"') {
        quoted.find("\"]")? + 2
    } else {
        after_bracket.find(']')?
    };

    Some((&after_bracket[..end], &after_bracket[end + 1..]))
}

fn parse_bracket(path: &str, expression: &str) -> Result<Segment> {
    if let Some(field) = expression
        .strip_prefix('"')
        .and_then(|quoted| quoted.strip_suffix('"'))
    {
        return Ok(Segment::Field(field.to_owned()));
    }

    if !expression.is_empty() && expression.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(index) = expression.parse() {
            return Ok(Segment::Index(index));
        }
    }

    match expression.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(Segment::Match {
            key: key.to_owned(),
            value: value.to_owned(),
        }),
        _ => InvalidBracketSnafu { path, expression }.fail(),
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Field(field)
                    if field.is_empty() || field.contains(['.', '[', ']', '"']) =>
                {
                    write!(f, "[\"{field}\"]")?
                }
                Segment::Field(field) if index == 0 => write!(f, "{field}")?,
                Segment::Field(field) => write!(f, ".{field}")?,
                Segment::Index(i) => write!(f, "[{i}]")?,
                Segment::Match { key, value } => write!(f, "[{key}={value}]")?,
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let input = String::deserialize(deserializer)?;
        input.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn field(name: &str) -> Segment {
        Segment::Field(name.to_owned())
    }

    #[rstest]
    #[case("spec", vec![field("spec")])]
    #[case("spec.replicas", vec![field("spec"), field("replicas")])]
    #[case("items[3]", vec![field("items"), Segment::Index(3)])]
    #[case("[0].name", vec![Segment::Index(0), field("name")])]
    #[case(
        "containers[name=web].image",
        vec![
            field("containers"),
            Segment::Match { key: "name".to_owned(), value: "web".to_owned() },
            field("image"),
        ]
    )]
    #[case(
        r#"metadata.labels["app.kubernetes.io/name"]"#,
        vec![field("metadata"), field("labels"), field("app.kubernetes.io/name")]
    )]
    #[case("a[0][1]", vec![field("a"), Segment::Index(0), Segment::Index(1)])]
    fn parse_valid(#[case] input: &str, #[case] expected: Vec<Segment>) {
        let path: FieldPath = input.parse().expect("path is valid");
        assert_eq!(path.segments(), expected);
        assert_eq!(path.to_string(), input);
    }

    #[rstest]
    #[case("", Error::Empty)]
    #[case("spec..replicas", Error::EmptySegment { path: "spec..replicas".to_owned() })]
    #[case("spec.", Error::EmptySegment { path: "spec.".to_owned() })]
    #[case(".spec", Error::EmptySegment { path: ".spec".to_owned() })]
    #[case("spec.[0]", Error::EmptySegment { path: "spec.[0]".to_owned() })]
    #[case("items[0", Error::UnterminatedBracket { path: "items[0".to_owned() })]
    #[case(
        "items[]",
        Error::InvalidBracket { path: "items[]".to_owned(), expression: String::new() }
    )]
    #[case(
        "items[0]name",
        Error::InvalidBracket { path: "items[0]name".to_owned(), expression: "name".to_owned() }
    )]
    fn parse_invalid(#[case] input: &str, #[case] expected: Error) {
        assert_eq!(input.parse::<FieldPath>(), Err(expected));
    }

    #[test]
    fn get_walks_fields_indices_and_matches() {
        let document = json!({
            "spec": {
                "containers": [
                    {"name": "sidecar", "image": "envoy"},
                    {"name": "web", "image": "nginx", "ports": [{"containerPort": 8080}]},
                ]
            }
        });

        let image: FieldPath = "spec.containers[name=web].image".parse().unwrap();
        assert_eq!(image.get(&document), Some(&json!("nginx")));

        let port: FieldPath = "spec.containers[1].ports[containerPort=8080]".parse().unwrap();
        assert_eq!(port.get(&document), Some(&json!({"containerPort": 8080})));

        let missing: FieldPath = "spec.containers[name=db].image".parse().unwrap();
        assert_eq!(missing.get(&document), None);
    }

    #[test]
    fn to_pointer_resolves_matches_and_escapes() {
        let document = json!({
            "metadata": {"labels": {}},
            "spec": {"containers": [{"name": "sidecar"}, {"name": "web"}]}
        });

        let image: FieldPath = "spec.containers[name=web].image".parse().unwrap();
        assert_eq!(
            image.to_pointer(&document).unwrap(),
            "/spec/containers/1/image"
        );

        let label: FieldPath = r#"metadata.labels["app.kubernetes.io/name"]"#.parse().unwrap();
        assert_eq!(
            label.to_pointer(&document).unwrap(),
            "/metadata/labels/app.kubernetes.io~1name"
        );

        let missing: FieldPath = "spec.containers[name=db].image".parse().unwrap();
        assert_eq!(
            missing.to_pointer(&document),
            Err(Error::NoMatchingElement {
                path: "spec.containers[name=db].image".to_owned(),
                key: "name".to_owned(),
                value: "db".to_owned(),
            })
        );
    }
}
