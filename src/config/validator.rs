//! Configuration validation for declaration files.
//!
//! This module checks a parsed configuration before any graph is built,
//! collecting every error and warning it can find in one pass.

use crate::error::{ConfigError, EdgeweaveError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::resource::{AttributeValue, ResourceAddress, ResourceDeclaration, ResourceKind};
use super::spec::{ApplyConfig, DeployConfig, ProviderConfig, ProviderKind, StateBackend};

/// DNS record types accepted in `dns_record_set.record_type`.
const DNS_RECORD_TYPES: &[&str] = &["A", "AAAA", "CNAME", "TXT", "MX", "NS", "CAA", "SRV"];

/// Accepted `network_endpoint_group.network_endpoint_type` values.
const ENDPOINT_TYPES: &[&str] = &[
    "SERVERLESS",
    "GCE_VM_IP_PORT",
    "INTERNET_FQDN_PORT",
    "INTERNET_IP_PORT",
];

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(EdgeweaveError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects all errors and warnings without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_apply(&config.apply, &mut result);
        Self::validate_resources(&config.resources, &mut result);
        Self::validate_guardrails(config, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(config: &DeployConfig, result: &mut ValidationResult) {
        let project = &config.project;
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    /// Validates state configuration.
    fn validate_state(config: &DeployConfig, result: &mut ValidationResult) {
        let state = &config.state;
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_deref().is_none_or(str::is_empty) {
                    result.error("state.bucket", "S3 bucket name is required when using S3 backend");
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.kind == ProviderKind::Http {
            match provider.endpoint.as_deref() {
                None | Some("") => {
                    result.error("provider.endpoint", "An endpoint is required for the http provider");
                }
                Some(endpoint)
                    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
                {
                    result.error(
                        "provider.endpoint",
                        format!("Endpoint '{endpoint}' must start with http:// or https://"),
                    );
                }
                Some(endpoint) if endpoint.starts_with("http://") => {
                    result.warnings.push(format!(
                        "provider.endpoint: '{endpoint}' is not using TLS"
                    ));
                }
                Some(_) => {}
            }
        }

        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    /// Validates apply tuning.
    fn validate_apply(apply: &ApplyConfig, result: &mut ValidationResult) {
        if apply.parallelism == 0 {
            result.error("apply.parallelism", "Parallelism must be at least 1");
        } else if apply.parallelism > 64 {
            result.warnings.push(format!(
                "apply.parallelism: {} concurrent provider calls may trip rate limits",
                apply.parallelism
            ));
        }

        let retry = &apply.retry;
        if retry.max_attempts == 0 {
            result.error("apply.retry.max_attempts", "At least one attempt is required");
        }
        if retry.multiplier < 1.0 {
            result.error("apply.retry.multiplier", "Backoff multiplier must be >= 1.0");
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            result.error(
                "apply.retry.initial_delay_ms",
                "Initial delay cannot exceed max_delay_ms",
            );
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(resources: &[ResourceDeclaration], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        let mut seen = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");
            let address = resource.address();

            if !seen.insert(address.clone()) {
                result.error(format!("{prefix}.name"), format!("Duplicate resource: {address}"));
            }

            if !is_valid_resource_name(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must start with a lowercase letter and contain only lowercase alphanumerics, '-' or '_'.",
                        resource.name
                    ),
                );
            }

            for required in resource.kind.required_attributes() {
                let missing = resource
                    .attributes
                    .get(*required)
                    .is_none_or(AttributeValue::is_null);
                if missing {
                    result.error(
                        format!("{prefix}.attributes.{required}"),
                        format!("{address} requires attribute '{required}'"),
                    );
                }
            }

            for (key, value) in &resource.attributes {
                if !value.is_finite() {
                    result.error(
                        format!("{prefix}.attributes.{key}"),
                        format!("{address}: attribute '{key}' must not contain NaN or infinity"),
                    );
                }
            }

            for (j, dep) in resource.depends_on.iter().enumerate() {
                if let Err(e) = ResourceAddress::parse(dep) {
                    result.error(format!("{prefix}.depends_on[{j}]"), e);
                }
            }

            Self::validate_kind_attributes(resource, &prefix, result);
        }
    }

    /// Kind-specific attribute checks.
    fn validate_kind_attributes(
        resource: &ResourceDeclaration,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let attrs = &resource.attributes;
        match resource.kind {
            ResourceKind::DnsRecordSet => {
                if let Some(record_type) = literal_str(attrs.get("record_type")) {
                    if !DNS_RECORD_TYPES.contains(&record_type) {
                        result.error(
                            format!("{prefix}.attributes.record_type"),
                            format!("Unsupported DNS record type '{record_type}'"),
                        );
                    }
                }
                match attrs.get("ttl") {
                    Some(AttributeValue::Integer(ttl)) if *ttl <= 0 => {
                        result.error(format!("{prefix}.attributes.ttl"), "TTL must be positive");
                    }
                    Some(AttributeValue::Integer(ttl)) if *ttl < 60 => {
                        result.warnings.push(format!(
                            "{prefix}.attributes.ttl: TTL of {ttl}s will cause heavy resolver traffic"
                        ));
                    }
                    Some(AttributeValue::Integer(_)) | None => {}
                    Some(value) if !is_reference(value) => {
                        result.error(format!("{prefix}.attributes.ttl"), "TTL must be an integer");
                    }
                    Some(_) => {}
                }
                if let Some(AttributeValue::List(rrdatas)) = attrs.get("rrdatas") {
                    if rrdatas.is_empty() {
                        result.error(
                            format!("{prefix}.attributes.rrdatas"),
                            "A record set needs at least one value",
                        );
                    }
                }
                if let Some(dns_name) = literal_str(attrs.get("dns_name")) {
                    if !dns_name.ends_with('.') {
                        result.warnings.push(format!(
                            "{prefix}.attributes.dns_name: '{dns_name}' is not fully qualified (missing trailing '.')"
                        ));
                    }
                }
            }
            ResourceKind::ForwardingRule => {
                if let Some(value) = attrs.get("port_range") {
                    if !is_reference(value) {
                        if let Err(e) = parse_port_range(value) {
                            result.error(format!("{prefix}.attributes.port_range"), e);
                        }
                    }
                }
            }
            ResourceKind::ManagedCertificate => match attrs.get("domains") {
                Some(AttributeValue::List(domains)) if domains.is_empty() => {
                    result.error(
                        format!("{prefix}.attributes.domains"),
                        "A managed certificate needs at least one domain",
                    );
                }
                Some(AttributeValue::List(domains)) => {
                    for (i, domain) in domains.iter().enumerate() {
                        if domain.as_str().is_some_and(|d| d.starts_with("*.")) {
                            result.error(
                                format!("{prefix}.attributes.domains[{i}]"),
                                "Managed certificates do not support wildcard domains",
                            );
                        }
                    }
                }
                Some(value) if !is_reference(value) => {
                    result.error(
                        format!("{prefix}.attributes.domains"),
                        "domains must be a list",
                    );
                }
                _ => {}
            },
            ResourceKind::BackendService => {
                if let Some(AttributeValue::List(backends)) = attrs.get("backends") {
                    if backends.is_empty() {
                        result.error(
                            format!("{prefix}.attributes.backends"),
                            "A backend service needs at least one backend",
                        );
                    }
                }
                let cdn_enabled = attrs
                    .get("enable_cdn")
                    .and_then(AttributeValue::as_bool)
                    .unwrap_or(false);
                if attrs.contains_key("cdn_policy") && !cdn_enabled {
                    result.warnings.push(format!(
                        "{prefix}.attributes.cdn_policy has no effect unless enable_cdn is true"
                    ));
                }
            }
            ResourceKind::NetworkEndpointGroup => {
                if let Some(endpoint_type) = literal_str(attrs.get("network_endpoint_type")) {
                    if !ENDPOINT_TYPES.contains(&endpoint_type) {
                        result.error(
                            format!("{prefix}.attributes.network_endpoint_type"),
                            format!("Unsupported endpoint type '{endpoint_type}'"),
                        );
                    }
                }
                if let Some(port) = attrs.get("default_port").and_then(AttributeValue::as_i64) {
                    if !(1..=65535).contains(&port) {
                        result.error(
                            format!("{prefix}.attributes.default_port"),
                            format!("Port {port} is out of range"),
                        );
                    }
                }
            }
            ResourceKind::UrlMap
            | ResourceKind::TargetHttpProxy
            | ResourceKind::TargetHttpsProxy
            | ResourceKind::GlobalAddress => {}
        }
    }

    /// Validates guardrails configuration.
    fn validate_guardrails(config: &DeployConfig, result: &mut ValidationResult) {
        if let Some(guardrails) = &config.guardrails {
            let declared: HashSet<ResourceAddress> =
                config.resource_addresses().into_iter().collect();
            for address in &guardrails.prevent_destroy {
                if !declared.contains(address) {
                    result.warnings.push(format!(
                        "guardrails.prevent_destroy: {address} is not declared"
                    ));
                }
            }
        }
    }
}

/// Returns the string if the value is a literal string without references.
fn literal_str(value: Option<&AttributeValue>) -> Option<&str> {
    value
        .and_then(AttributeValue::as_str)
        .filter(|s| !s.contains("${"))
}

/// Returns true if the value is a string carrying a reference.
fn is_reference(value: &AttributeValue) -> bool {
    value.as_str().is_some_and(|s| s.contains("${"))
}

/// Parses `443`, `"443"` or `"8000-8080"` into an inclusive port range.
fn parse_port_range(value: &AttributeValue) -> std::result::Result<(u16, u16), String> {
    let parse_port = |s: &str| {
        s.trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| format!("Invalid port '{s}'"))
    };

    match value {
        AttributeValue::Integer(port) => u16::try_from(*port)
            .ok()
            .filter(|p| *p > 0)
            .map(|p| (p, p))
            .ok_or_else(|| format!("Port {port} is out of range")),
        AttributeValue::String(s) => {
            let (low, high) = match s.split_once('-') {
                Some((low, high)) => (parse_port(low)?, parse_port(high)?),
                None => {
                    let port = parse_port(s)?;
                    (port, port)
                }
            };
            if low > high {
                return Err(format!("Port range '{s}' is reversed"));
            }
            Ok((low, high))
        }
        _ => Err(String::from("port_range must be a port or a 'LOW-HIGH' string")),
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Resource names additionally allow underscores.
fn is_valid_resource_name(name: &str) -> bool {
    is_valid_name(&name.replace('_', "-"))
}

impl ValidationResult {
    /// Records an error.
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("shop-edge"));
        assert!(is_valid_name("edge-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Shop-Edge"));
        assert!(!is_valid_name("123-edge"));
        assert!(!is_valid_name("shop_edge"));
        assert!(!is_valid_name("edge-"));
        assert!(!is_valid_name("shop--edge"));
        assert!(is_valid_resource_name("shop_edge"));
    }

    #[test]
    fn test_port_range_parsing() {
        assert_eq!(parse_port_range(&AttributeValue::from("443")), Ok((443, 443)));
        assert_eq!(parse_port_range(&AttributeValue::from("80-8080")), Ok((80, 8080)));
        assert_eq!(parse_port_range(&AttributeValue::Integer(80)), Ok((80, 80)));
        assert!(parse_port_range(&AttributeValue::from("9000-80")).is_err());
        assert!(parse_port_range(&AttributeValue::from("0")).is_err());
        assert!(parse_port_range(&AttributeValue::Integer(70_000)).is_err());
    }

    #[test]
    fn test_missing_required_attribute() {
        let config = parse(
            r"
project:
  name: shop-edge
resources:
  - type: url_map
    name: web
    attributes: {}
",
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("default_service"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_dns_record_checks() {
        let config = parse(
            r#"
project:
  name: shop-edge
resources:
  - type: dns_record_set
    name: apex
    attributes:
      dns_name: shop.example.com
      record_type: PTR
      ttl: 30
      rrdatas: []
"#,
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"resources[0].attributes.record_type"));
        assert!(fields.contains(&"resources[0].attributes.rrdatas"));
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn test_references_skip_type_checks() {
        let config = parse(
            r#"
project:
  name: shop-edge
resources:
  - type: global_address
    name: web
  - type: dns_record_set
    name: apex
    attributes:
      dns_name: shop.example.com.
      record_type: A
      ttl: 300
      rrdatas: ["${global_address.web.address}"]
  - type: forwarding_rule
    name: https
    attributes:
      target: "${global_address.web.id}"
      port_range: "${global_address.web.port}"
"#,
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.is_valid(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn test_duplicate_and_wildcard() {
        let config = parse(
            r#"
project:
  name: shop-edge
resources:
  - type: managed_certificate
    name: shop
    attributes:
      domains: ["*.example.com"]
  - type: managed_certificate
    name: shop
    attributes:
      domains: ["shop.example.com"]
"#,
        );
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let config = parse(
            r"
project:
  name: shop-edge
resources:
  - type: global_address
    name: web
    attributes:
      weights: [1.5, .nan]
      scale: .inf
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["resources[0].attributes.scale", "resources[0].attributes.weights"]
        );
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let config = parse(
            r"
project:
  name: shop-edge
provider:
  kind: http
apply:
  parallelism: 0
",
        );
        let result = ConfigValidator::new().check(&config);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["provider.endpoint", "apply.parallelism"]);
    }
}
