//! Resource declaration types.
//!
//! A declaration is a `(kind, name)` key plus a free-form attribute map. The
//! engine treats attribute payloads as opaque except for the `${...}`
//! references embedded in string values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Attribute map of a resource. Ordered so hashing and serialization are canonical.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDeclaration {
    /// Resource kind.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Name, unique within its kind.
    pub name: String,
    /// Declared attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit dependencies as `kind.name` addresses.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Kinds of resources the engine knows how to order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Serverless or zonal network endpoint group.
    NetworkEndpointGroup,
    /// Backend service, optionally CDN-enabled.
    BackendService,
    /// URL map with host and path rules.
    UrlMap,
    /// Target HTTP proxy.
    TargetHttpProxy,
    /// Target HTTPS proxy.
    TargetHttpsProxy,
    /// Reserved global IP address.
    GlobalAddress,
    /// Global forwarding rule.
    ForwardingRule,
    /// Managed TLS certificate.
    ManagedCertificate,
    /// DNS record set.
    DnsRecordSet,
}

/// A declared attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// String, possibly containing references.
    String(String),
    /// List of values.
    List(Vec<AttributeValue>),
    /// Nested block.
    Block(BTreeMap<String, AttributeValue>),
}

/// Unique key of a resource: `kind.name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
}

impl ResourceKind {
    /// All known kinds.
    pub const ALL: [Self; 9] = [
        Self::NetworkEndpointGroup,
        Self::BackendService,
        Self::UrlMap,
        Self::TargetHttpProxy,
        Self::TargetHttpsProxy,
        Self::GlobalAddress,
        Self::ForwardingRule,
        Self::ManagedCertificate,
        Self::DnsRecordSet,
    ];

    /// Returns the snake_case tag used in configuration and references.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkEndpointGroup => "network_endpoint_group",
            Self::BackendService => "backend_service",
            Self::UrlMap => "url_map",
            Self::TargetHttpProxy => "target_http_proxy",
            Self::TargetHttpsProxy => "target_https_proxy",
            Self::GlobalAddress => "global_address",
            Self::ForwardingRule => "forwarding_rule",
            Self::ManagedCertificate => "managed_certificate",
            Self::DnsRecordSet => "dns_record_set",
        }
    }

    /// Attributes that must be present for this kind.
    #[must_use]
    pub const fn required_attributes(self) -> &'static [&'static str] {
        match self {
            Self::NetworkEndpointGroup => &["network_endpoint_type"],
            Self::BackendService => &["backends"],
            Self::UrlMap => &["default_service"],
            Self::TargetHttpProxy => &["url_map"],
            Self::TargetHttpsProxy => &["url_map", "ssl_certificates"],
            Self::GlobalAddress => &[],
            Self::ForwardingRule => &["target", "port_range"],
            Self::ManagedCertificate => &["domains"],
            Self::DnsRecordSet => &["dns_name", "record_type", "ttl", "rrdatas"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource type '{s}'"))
    }
}

impl ResourceAddress {
    /// Creates a new address.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parses an address like `backend_service.web`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `kind.name` with a known kind.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid address '{s}', expected TYPE.NAME"))?;
        if name.is_empty() || name.contains('.') {
            return Err(format!("invalid address '{s}', expected TYPE.NAME"));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

impl ResourceDeclaration {
    /// Returns this declaration's address.
    #[must_use]
    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(self.kind, self.name.clone())
    }
}

impl AttributeValue {
    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true for null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns false if any float in the value is NaN or infinite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(x) => x.is_finite(),
            Self::List(items) => items.iter().all(Self::is_finite),
            Self::Block(fields) => fields.values().all(Self::is_finite),
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::String(_) => true,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(_) | Self::Block(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
