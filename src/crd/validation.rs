//! Semantic validation of EndpointPolicy specs
//!
//! Every violation is collected (not fail-fast) in a fixed order: appRef,
//! gatewayRef, the endpoint list, duplicate ids, then each endpoint. Schema
//! constraints normally enforced at admission are re-checked here so a spec
//! that bypassed admission still cannot reach the builders.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use super::policy::{
    AppReference, EndpointPolicySpec, EndpointSpec, EndpointType, GatewayReference, HpaSpec,
    ResourceSpec, Strategy, ENDPOINT_ID_PATTERN,
};
use super::quantity::validate_quantity;

const MAX_PORT: i32 = 65535;
const MAX_LABEL_LEN: usize = 63;

/// Path to a field inside the policy, e.g. `spec.endpoints[1].id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    /// Root path
    pub fn new(root: &str) -> Self {
        Self(root.to_string())
    }

    /// Path of a named child field
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}.{}", self.0, name))
    }

    /// Path of a list element
    pub fn index(&self, i: usize) -> Self {
        Self(format!("{}[{}]", self.0, i))
    }

    /// Path as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What is wrong with a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldErrorKind {
    /// Field must be set
    Required(String),
    /// Field is set to a value that is not allowed
    Invalid {
        /// Offending value
        value: Value,
        /// Why it is not allowed
        message: String,
    },
    /// Value must be unique within its list
    Duplicate(Value),
    /// Value is outside a closed set
    NotSupported {
        /// Offending value
        value: Value,
        /// Accepted values
        supported: Vec<&'static str>,
    },
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// Field the error applies to
    pub path: FieldPath,
    /// What is wrong with it
    pub kind: FieldErrorKind,
}

impl FieldError {
    /// Required field is missing
    pub fn required(path: FieldPath, message: impl Into<String>) -> Self {
        Self {
            path,
            kind: FieldErrorKind::Required(message.into()),
        }
    }

    /// Field value is not allowed
    pub fn invalid(path: FieldPath, value: impl Into<Value>, message: impl Into<String>) -> Self {
        Self {
            path,
            kind: FieldErrorKind::Invalid {
                value: value.into(),
                message: message.into(),
            },
        }
    }

    /// Field value repeats an earlier one
    pub fn duplicate(path: FieldPath, value: impl Into<Value>) -> Self {
        Self {
            path,
            kind: FieldErrorKind::Duplicate(value.into()),
        }
    }

    /// Field value is outside a closed set
    pub fn not_supported(
        path: FieldPath,
        value: impl Into<Value>,
        supported: &[&'static str],
    ) -> Self {
        Self {
            path,
            kind: FieldErrorKind::NotSupported {
                value: value.into(),
                supported: supported.to_vec(),
            },
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldErrorKind::Required(msg) => write!(f, "{}: Required value: {}", self.path, msg),
            FieldErrorKind::Invalid { value, message } => {
                write!(f, "{}: Invalid value: {}: {}", self.path, value, message)
            }
            FieldErrorKind::Duplicate(value) => {
                write!(f, "{}: Duplicate value: {}", self.path, value)
            }
            FieldErrorKind::NotSupported { value, supported } => {
                let supported = supported
                    .iter()
                    .map(|s| format!("\"{s}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "{}: Unsupported value: {}: supported values: {}",
                    self.path, value, supported
                )
            }
        }
    }
}

/// Ordered list of validation failures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Errors in the order they were found
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// True when nothing failed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failures
    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [single] => write!(f, "{single}"),
            many => {
                let joined = many
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "[{joined}]")
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

impl EndpointPolicySpec {
    /// Validate the spec, returning every violation found
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::default();
        let path = FieldPath::new("spec");

        validate_app_ref(&self.app_ref, &path.child("appRef"), &mut errs);
        validate_gateway_ref(&self.gateway_ref, &path.child("gatewayRef"), &mut errs);
        validate_endpoints(&self.endpoints, &path.child("endpoints"), &mut errs);

        errs.into_result()
    }
}

fn validate_app_ref(app: &AppReference, path: &FieldPath, errs: &mut ValidationErrors) {
    if app.name.is_empty() {
        errs.push(FieldError::required(path.child("name"), "application name is required"));
    }
    if app.image.is_empty() {
        errs.push(FieldError::required(path.child("image"), "container image is required"));
    }
    validate_port(app.port, &path.child("port"), errs);
    validate_port(app.container_port, &path.child("containerPort"), errs);
}

fn validate_port(port: Option<i32>, path: &FieldPath, errs: &mut ValidationErrors) {
    match port {
        Some(p) if p < 0 => errs.push(FieldError::invalid(path.clone(), p, "must be a positive integer")),
        Some(p) if p > MAX_PORT => errs.push(FieldError::invalid(
            path.clone(),
            p,
            format!("must be at most {MAX_PORT}"),
        )),
        _ => {}
    }
}

fn validate_gateway_ref(gateway: &GatewayReference, path: &FieldPath, errs: &mut ValidationErrors) {
    if gateway.name.is_empty() {
        errs.push(FieldError::required(path.child("name"), "gateway name is required"));
    }
}

fn validate_endpoints(endpoints: &[EndpointSpec], path: &FieldPath, errs: &mut ValidationErrors) {
    if endpoints.is_empty() {
        errs.push(FieldError::required(path.clone(), "at least one endpoint is required"));
        return;
    }

    let mut seen = HashSet::new();
    for (i, ep) in endpoints.iter().enumerate() {
        if !seen.insert(ep.id.as_str()) {
            errs.push(FieldError::duplicate(path.index(i).child("id"), ep.id.as_str()));
        }
    }

    for (i, ep) in endpoints.iter().enumerate() {
        validate_endpoint(ep, &path.index(i), errs);
    }
}

fn validate_endpoint(ep: &EndpointSpec, path: &FieldPath, errs: &mut ValidationErrors) {
    if ep.id.is_empty() {
        errs.push(FieldError::required(path.child("id"), "endpoint id is required"));
    } else if !is_dns_label(&ep.id) {
        errs.push(FieldError::invalid(
            path.child("id"),
            ep.id.as_str(),
            format!(
                "must be no more than {MAX_LABEL_LEN} characters and match '{ENDPOINT_ID_PATTERN}'"
            ),
        ));
    }

    validate_match(ep, path, errs);

    match ep.strategy {
        Strategy::Primary => {}
        Strategy::Canary => {
            if let Some(weight) = ep.canary_weight {
                if !(1..=100).contains(&weight) {
                    errs.push(FieldError::invalid(
                        path.child("canaryWeight"),
                        weight,
                        "must be between 1 and 100",
                    ));
                }
            }
        }
        Strategy::Unknown => errs.push(FieldError::not_supported(
            path.child("strategy"),
            Strategy::Unknown.as_str(),
            &["primary", "canary"],
        )),
    }

    if let Some(replicas) = ep.replicas {
        if replicas < 1 {
            errs.push(FieldError::invalid(path.child("replicas"), replicas, "must be at least 1"));
        }
    }

    if let Some(resources) = &ep.resources {
        validate_resources(resources, &path.child("resources"), errs);
    }

    if let Some(hpa) = &ep.hpa {
        validate_hpa(hpa, &path.child("hpa"), errs);
    }
}

/// `^[a-z0-9]([-a-z0-9]*[a-z0-9])?$`, at most 63 characters
fn is_dns_label(value: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    value.len() <= MAX_LABEL_LEN
        && value.starts_with(alnum)
        && value.ends_with(alnum)
        && value.chars().all(|c| alnum(c) || c == '-')
}

fn validate_match(ep: &EndpointSpec, path: &FieldPath, errs: &mut ValidationErrors) {
    let path_match = path.child("match");
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

    match ep.type_ {
        EndpointType::Http => {
            if !present(&ep.match_.path) {
                errs.push(FieldError::required(
                    path_match.child("path"),
                    "path is required for HTTP endpoints",
                ));
            }
        }
        EndpointType::Grpc => {
            if !present(&ep.match_.service) {
                errs.push(FieldError::required(
                    path_match.child("service"),
                    "service is required for gRPC endpoints",
                ));
            }
            if !present(&ep.match_.method) {
                errs.push(FieldError::required(
                    path_match.child("method"),
                    "method is required for gRPC endpoints",
                ));
            }
        }
        EndpointType::Unknown => errs.push(FieldError::not_supported(
            path.child("type"),
            EndpointType::Unknown.as_str(),
            &["http", "grpc"],
        )),
    }
}

fn validate_resources(resources: &ResourceSpec, path: &FieldPath, errs: &mut ValidationErrors) {
    let fields = [
        ("cpuLimit", &resources.cpu_limit),
        ("cpuRequest", &resources.cpu_request),
        ("memLimit", &resources.mem_limit),
        ("memRequest", &resources.mem_request),
    ];

    for (name, value) in fields {
        let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Err(e) = validate_quantity(value) {
            errs.push(FieldError::invalid(
                path.child(name),
                value,
                format!("invalid resource quantity: {e}"),
            ));
        }
    }
}

fn validate_hpa(hpa: &HpaSpec, path: &FieldPath, errs: &mut ValidationErrors) {
    if hpa.min < 1 {
        errs.push(FieldError::invalid(path.child("min"), hpa.min, "must be at least 1"));
    }
    if hpa.max < 1 {
        errs.push(FieldError::invalid(path.child("max"), hpa.max, "must be at least 1"));
    }
    if hpa.max < hpa.min {
        errs.push(FieldError::invalid(
            path.child("max"),
            hpa.max,
            "must be greater than or equal to min",
        ));
    }

    for (name, target) in [("cpuTarget", hpa.cpu_target), ("memoryTarget", hpa.memory_target)] {
        if let Some(t) = target {
            if !(1..=100).contains(&t) {
                errs.push(FieldError::invalid(path.child(name), t, "must be between 1 and 100"));
            }
        }
    }

    if hpa.cpu_target.is_none() && hpa.memory_target.is_none() {
        errs.push(FieldError::required(
            path.clone(),
            "at least one of cpuTarget or memoryTarget is required",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::policy::MatchSpec;

    fn http_endpoint(id: &str) -> EndpointSpec {
        EndpointSpec {
            id: id.to_string(),
            match_: MatchSpec {
                path: Some(format!("/api/{id}")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn valid_spec() -> EndpointPolicySpec {
        EndpointPolicySpec {
            app_ref: AppReference {
                name: "my-app".to_string(),
                image: "my-app:v1".to_string(),
                ..Default::default()
            },
            gateway_ref: GatewayReference {
                name: "main-gateway".to_string(),
                ..Default::default()
            },
            endpoints: vec![http_endpoint("lookup")],
        }
    }

    fn paths(errs: &ValidationErrors) -> Vec<&str> {
        errs.errors().iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(valid_spec().validate().is_ok());
    }

    /// Story: a policy without a gateway name is rejected at gatewayRef.name
    #[test]
    fn story_missing_gateway_name() {
        let mut spec = valid_spec();
        spec.gateway_ref.name.clear();

        let errs = spec.validate().unwrap_err();
        assert_eq!(paths(&errs), vec!["spec.gatewayRef.name"]);
        assert_eq!(
            errs.to_string(),
            "spec.gatewayRef.name: Required value: gateway name is required"
        );
    }

    /// Story: two endpoints with the same id are rejected at the second index
    ///
    /// Ids key both child names and garbage collection, so they must never
    /// collide within a policy.
    #[test]
    fn story_duplicate_endpoint_ids() {
        let mut spec = valid_spec();
        spec.endpoints = vec![http_endpoint("dup"), http_endpoint("dup")];

        let errs = spec.validate().unwrap_err();
        assert_eq!(paths(&errs), vec!["spec.endpoints[1].id"]);
        assert_eq!(
            errs.to_string(),
            "spec.endpoints[1].id: Duplicate value: \"dup\""
        );
    }

    /// Story: every violation is reported at once, in a fixed order
    #[test]
    fn story_all_violations_accumulate_in_order() {
        let spec = EndpointPolicySpec {
            app_ref: AppReference {
                port: Some(-1),
                ..Default::default()
            },
            gateway_ref: GatewayReference::default(),
            endpoints: vec![],
        };

        let errs = spec.validate().unwrap_err();
        assert_eq!(
            paths(&errs),
            vec![
                "spec.appRef.name",
                "spec.appRef.image",
                "spec.appRef.port",
                "spec.gatewayRef.name",
                "spec.endpoints",
            ]
        );
        let rendered = errs.to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.contains("spec.appRef.port: Invalid value: -1: must be a positive integer"));
        assert!(rendered.contains("spec.endpoints: Required value: at least one endpoint is required"));
    }

    #[test]
    fn test_grpc_requires_service_and_method() {
        let mut spec = valid_spec();
        spec.endpoints[0].type_ = EndpointType::Grpc;
        spec.endpoints[0].match_ = MatchSpec::default();

        let errs = spec.validate().unwrap_err();
        assert_eq!(
            paths(&errs),
            vec![
                "spec.endpoints[0].match.service",
                "spec.endpoints[0].match.method"
            ]
        );
    }

    #[test]
    fn test_http_requires_path() {
        let mut spec = valid_spec();
        spec.endpoints[0].match_.path = Some(String::new());

        let errs = spec.validate().unwrap_err();
        assert_eq!(paths(&errs), vec!["spec.endpoints[0].match.path"]);
    }

    #[test]
    fn test_replicas_must_be_positive() {
        let mut spec = valid_spec();
        spec.endpoints[0].replicas = Some(0);

        let errs = spec.validate().unwrap_err();
        assert_eq!(paths(&errs), vec!["spec.endpoints[0].replicas"]);
    }

    #[test]
    fn test_invalid_resource_quantity() {
        let mut spec = valid_spec();
        spec.endpoints[0].resources = Some(ResourceSpec {
            cpu_limit: Some("invalid".to_string()),
            mem_request: Some("256Mi".to_string()),
            ..Default::default()
        });

        let errs = spec.validate().unwrap_err();
        assert_eq!(paths(&errs), vec!["spec.endpoints[0].resources.cpuLimit"]);
        assert!(errs.to_string().contains("invalid resource quantity"));
    }

    /// Story: an autoscaler needs sane bounds and at least one target
    #[test]
    fn story_hpa_bounds_and_targets() {
        let mut spec = valid_spec();
        spec.endpoints[0].hpa = Some(HpaSpec {
            min: 5,
            max: 2,
            cpu_target: None,
            memory_target: None,
        });

        let errs = spec.validate().unwrap_err();
        assert_eq!(
            paths(&errs),
            vec!["spec.endpoints[0].hpa.max", "spec.endpoints[0].hpa"]
        );
        assert!(errs.to_string().contains("must be greater than or equal to min"));
        assert!(errs
            .to_string()
            .contains("at least one of cpuTarget or memoryTarget is required"));
    }

    #[test]
    fn test_hpa_min_and_max_at_least_one() {
        let mut spec = valid_spec();
        spec.endpoints[0].hpa = Some(HpaSpec {
            min: 0,
            max: 0,
            cpu_target: Some(70),
            memory_target: None,
        });

        let errs = spec.validate().unwrap_err();
        assert_eq!(
            paths(&errs),
            vec!["spec.endpoints[0].hpa.min", "spec.endpoints[0].hpa.max"]
        );
    }

    /// Story: strategies and types outside the schema are rejected, not defaulted
    #[test]
    fn story_unknown_strategy_and_type_are_unsupported() {
        let mut spec = valid_spec();
        spec.endpoints[0].strategy = Strategy::Unknown;
        spec.endpoints[0].type_ = EndpointType::Unknown;

        let errs = spec.validate().unwrap_err();
        assert_eq!(
            paths(&errs),
            vec!["spec.endpoints[0].type", "spec.endpoints[0].strategy"]
        );
        assert!(errs
            .to_string()
            .contains("Unsupported value: \"unknown\": supported values: \"primary\", \"canary\""));
    }

    #[test]
    fn test_schema_ranges_are_rechecked() {
        let mut spec = valid_spec();
        spec.app_ref.port = Some(70000);
        spec.endpoints[0].strategy = Strategy::Canary;
        spec.endpoints[0].canary_weight = Some(0);
        spec.endpoints[0].hpa = Some(HpaSpec {
            min: 1,
            max: 2,
            cpu_target: Some(150),
            memory_target: None,
        });

        let errs = spec.validate().unwrap_err();
        assert_eq!(
            paths(&errs),
            vec![
                "spec.appRef.port",
                "spec.endpoints[0].canaryWeight",
                "spec.endpoints[0].hpa.cpuTarget",
            ]
        );
    }

    #[test]
    fn test_empty_id_is_required() {
        let mut spec = valid_spec();
        spec.endpoints[0].id.clear();

        let errs = spec.validate().unwrap_err();
        assert_eq!(paths(&errs), vec!["spec.endpoints[0].id"]);
    }

    /// Story: an id that cannot become a child name is rejected up front
    ///
    /// Uppercase letters, underscores, leading or trailing dashes and ids
    /// longer than a label value would all fail later at the API server,
    /// one child at a time.
    #[test]
    fn story_endpoint_id_must_be_dns_label() {
        let too_long = "a".repeat(64);
        for bad in ["Lookup_1", "-lookup", "lookup-", "look.up", too_long.as_str()] {
            let mut spec = valid_spec();
            spec.endpoints[0].id = bad.to_string();

            let errs = spec.validate().unwrap_err();
            assert_eq!(paths(&errs), vec!["spec.endpoints[0].id"], "{bad}");
            assert!(errs.to_string().contains("Invalid value"), "{bad}");
        }

        let longest = "a".repeat(63);
        for good in ["a", "lookup", "v2-lookup", "0", longest.as_str()] {
            let mut spec = valid_spec();
            spec.endpoints[0].id = good.to_string();
            spec.endpoints[0].match_.path = Some("/x".to_string());
            assert!(spec.validate().is_ok(), "{good}");
        }
    }
}
