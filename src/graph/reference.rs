//! `${kind.name.output}` reference expressions.
//!
//! References may make up a whole string attribute or be embedded inside a
//! longer string. `$${` produces a literal `${`.

use std::fmt;

use crate::config::{AttributeValue, Attributes, ResourceAddress, ResourceKind};

/// A parsed reference to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Referenced resource.
    pub target: ResourceAddress,
    /// Output name on the referenced resource.
    pub output: String,
}

/// A reference expression that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceError {
    /// The offending text.
    pub expression: String,
    /// Why it was rejected.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Reference(Reference),
}

impl Reference {
    /// Parses the inside of `${...}`, e.g. `backend_service.web.id`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the expression has three non-empty dot-separated
    /// parts and a known kind.
    pub fn parse(expression: &str) -> Result<Self, ReferenceError> {
        let invalid = |reason: String| ReferenceError {
            expression: format!("${{{expression}}}"),
            reason,
        };

        let parts: Vec<&str> = expression.trim().split('.').collect();
        let [kind, name, output] = parts.as_slice() else {
            return Err(invalid(String::from("expected ${TYPE.NAME.OUTPUT}")));
        };
        if name.is_empty() || output.is_empty() {
            return Err(invalid(String::from("empty name or output")));
        }
        let kind: ResourceKind = kind.parse().map_err(invalid)?;

        Ok(Self {
            target: ResourceAddress::new(kind, *name),
            output: (*output).to_string(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.output)
    }
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.expression, self.reason)
    }
}

/// Splits a string into literal and reference segments.
fn tokenize(input: &str) -> Result<Vec<Segment>, ReferenceError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = input;

    while let Some(pos) = rest.find("${") {
        if pos > 0 && rest.as_bytes()[pos - 1] == b'$' {
            literal.push_str(&rest[..pos - 1]);
            literal.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }

        literal.push_str(&rest[..pos]);
        let body = &rest[pos + 2..];
        let end = body.find('}').ok_or_else(|| ReferenceError {
            expression: rest[pos..].to_string(),
            reason: String::from("unterminated reference"),
        })?;
        let reference = Reference::parse(&body[..end])?;

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Reference(reference));
        rest = &body[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Collects every reference found in an attribute map, in key order.
///
/// # Errors
///
/// Returns the first malformed expression.
pub fn collect_references(attributes: &Attributes) -> Result<Vec<Reference>, ReferenceError> {
    let mut found = Vec::new();
    for value in attributes.values() {
        collect_from_value(value, &mut found)?;
    }
    Ok(found)
}

fn collect_from_value(
    value: &AttributeValue,
    found: &mut Vec<Reference>,
) -> Result<(), ReferenceError> {
    match value {
        AttributeValue::String(s) => {
            for segment in tokenize(s)? {
                if let Segment::Reference(reference) = segment {
                    found.push(reference);
                }
            }
        }
        AttributeValue::List(items) => {
            for item in items {
                collect_from_value(item, found)?;
            }
        }
        AttributeValue::Block(block) => {
            for item in block.values() {
                collect_from_value(item, found)?;
            }
        }
        AttributeValue::Null
        | AttributeValue::Bool(_)
        | AttributeValue::Integer(_)
        | AttributeValue::Float(_) => {}
    }
    Ok(())
}

/// Replaces every reference with the value returned by `resolve`.
///
/// A string that is exactly one reference takes the output's value as-is;
/// embedded references are rendered as text.
///
/// # Errors
///
/// Returns the text of the first reference that is malformed or that
/// `resolve` cannot answer.
pub fn interpolate<F>(attributes: &Attributes, resolve: F) -> Result<Attributes, String>
where
    F: Fn(&Reference) -> Option<AttributeValue>,
{
    attributes
        .iter()
        .map(|(key, value)| Ok((key.clone(), interpolate_value(value, &resolve)?)))
        .collect()
}

fn interpolate_value<F>(value: &AttributeValue, resolve: &F) -> Result<AttributeValue, String>
where
    F: Fn(&Reference) -> Option<AttributeValue>,
{
    match value {
        AttributeValue::String(s) => {
            let segments = tokenize(s).map_err(|e| e.expression)?;
            if let [Segment::Reference(reference)] = segments.as_slice() {
                return resolve(reference).ok_or_else(|| reference.to_string());
            }

            let mut rendered = String::new();
            for segment in segments {
                match segment {
                    Segment::Literal(text) => rendered.push_str(&text),
                    Segment::Reference(reference) => {
                        let resolved = resolve(&reference).ok_or_else(|| reference.to_string())?;
                        rendered.push_str(&resolved.to_string());
                    }
                }
            }
            Ok(AttributeValue::String(rendered))
        }
        AttributeValue::List(items) => items
            .iter()
            .map(|item| interpolate_value(item, resolve))
            .collect::<Result<Vec<_>, _>>()
            .map(AttributeValue::List),
        AttributeValue::Block(block) => block
            .iter()
            .map(|(key, item)| Ok((key.clone(), interpolate_value(item, resolve)?)))
            .collect::<Result<_, String>>()
            .map(AttributeValue::Block),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_reference() {
        let reference = Reference::parse("backend_service.web.id").unwrap();
        assert_eq!(reference.target.kind, ResourceKind::BackendService);
        assert_eq!(reference.target.name, "web");
        assert_eq!(reference.output, "id");
        assert_eq!(reference.to_string(), "${backend_service.web.id}");
    }

    #[test]
    fn test_parse_reference_rejects_bad_shapes() {
        assert!(Reference::parse("backend_service.web").is_err());
        assert!(Reference::parse("backend_service..id").is_err());
        assert!(Reference::parse("nope.web.id").is_err());
        assert!(Reference::parse("url_map.a.b.c").is_err());
    }

    #[test]
    fn test_collect_nested_references() {
        let attributes = attrs(&[
            (
                "backends",
                AttributeValue::List(vec![AttributeValue::Block(
                    [(
                        String::from("group"),
                        AttributeValue::from("${network_endpoint_group.web.id}"),
                    )]
                    .into_iter()
                    .collect(),
                )]),
            ),
            (
                "description",
                AttributeValue::from("edge for ${global_address.web.address} and $${literal}"),
            ),
        ]);

        let found = collect_references(&attributes).unwrap();
        let targets: Vec<String> = found.iter().map(|r| r.target.to_string()).collect();
        assert_eq!(targets, vec!["network_endpoint_group.web", "global_address.web"]);
    }

    #[test]
    fn test_unterminated_reference() {
        let attributes = attrs(&[("target", AttributeValue::from("${url_map.web.id"))]);
        let err = collect_references(&attributes).unwrap_err();
        assert_eq!(err.reason, "unterminated reference");
    }

    #[test]
    fn test_interpolate_whole_and_embedded() {
        let attributes = attrs(&[
            ("port", AttributeValue::from("${global_address.web.port}")),
            ("url", AttributeValue::from("https://${global_address.web.address}/")),
            ("escaped", AttributeValue::from("$${keep}")),
            ("ttl", AttributeValue::Integer(300)),
        ]);

        let resolved = interpolate(&attributes, |reference| match reference.output.as_str() {
            "port" => Some(AttributeValue::Integer(443)),
            "address" => Some(AttributeValue::from("203.0.113.10")),
            _ => None,
        })
        .unwrap();

        assert_eq!(resolved["port"], AttributeValue::Integer(443));
        assert_eq!(resolved["url"], AttributeValue::from("https://203.0.113.10/"));
        assert_eq!(resolved["escaped"], AttributeValue::from("${keep}"));
        assert_eq!(resolved["ttl"], AttributeValue::Integer(300));
    }

    #[test]
    fn test_interpolate_missing_output() {
        let attributes = attrs(&[("target", AttributeValue::from("${url_map.web.self_link}"))]);
        let err = interpolate(&attributes, |_| None).unwrap_err();
        assert_eq!(err, "${url_map.web.self_link}");
    }
}
