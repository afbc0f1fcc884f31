//! Declarative YAML test definitions
//!
//! The raw document shape carries one optional key per test kind; parsing
//! validates it into a tagged [`TestKind`] so that ambiguous or empty
//! definitions are rejected once, up front, and the executors only ever see
//! a well-formed definition.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A fully validated test definition, ready for dispatch.
#[derive(Debug, Clone)]
pub struct TestDefinition {
    pub name: Option<String>,
    pub source: Source,
    pub expect: Option<Expect>,
    pub set_vars: SetVars,
    pub retries: u32,
    pub kind: TestKind,
}

/// The four test kinds, validated from the raw one-key-per-kind document.
#[derive(Debug, Clone)]
pub enum TestKind {
    Http(HttpTest),
    Command(CommandTest),
    Wait(WaitTest),
    BodyComparison(BodyComparisonTest),
}

impl TestKind {
    pub fn name(&self) -> &'static str {
        match self {
            TestKind::Http(_) => "http",
            TestKind::Command(_) => "command",
            TestKind::Wait(_) => "wait",
            TestKind::BodyComparison(_) => "bodyComparison",
        }
    }
}

impl TestDefinition {
    /// Display label for logs and outcomes.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("unnamed {} test", self.kind.name()))
    }
}

/// Raw deserialization target, one optional key per test kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTestDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub expect: Option<Expect>,
    #[serde(default, alias = "capture")]
    pub set_vars: Option<SetVars>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub http: Option<HttpTest>,
    #[serde(default)]
    pub command: Option<CommandTest>,
    #[serde(default)]
    pub wait: Option<WaitTest>,
    #[serde(default)]
    pub body_comparison: Option<BodyComparisonTest>,
}

impl TryFrom<RawTestDefinition> for TestDefinition {
    type Error = Error;

    fn try_from(raw: RawTestDefinition) -> Result<Self> {
        let mut present: Vec<&'static str> = Vec::new();
        if raw.http.is_some() {
            present.push("http");
        }
        if raw.command.is_some() {
            present.push("command");
        }
        if raw.wait.is_some() {
            present.push("wait");
        }
        if raw.body_comparison.is_some() {
            present.push("bodyComparison");
        }

        let kind = match present.as_slice() {
            [] => {
                return Err(Error::InvalidDefinition(format!(
                    "unknown test kind: definition '{}' has none of http, command, wait, bodyComparison",
                    raw.name.as_deref().unwrap_or("<unnamed>")
                )))
            }
            [_] => {
                if let Some(http) = raw.http {
                    TestKind::Http(http)
                } else if let Some(command) = raw.command {
                    TestKind::Command(command)
                } else if let Some(wait) = raw.wait {
                    TestKind::Wait(wait)
                } else if let Some(body_comparison) = raw.body_comparison {
                    TestKind::BodyComparison(body_comparison)
                } else {
                    unreachable!("exactly one kind key was counted")
                }
            }
            multiple => {
                return Err(Error::InvalidDefinition(format!(
                    "ambiguous test kind: definition '{}' mixes {}",
                    raw.name.as_deref().unwrap_or("<unnamed>"),
                    multiple.join(" and ")
                )))
            }
        };

        let source = raw.source.unwrap_or_default();
        source.validate()?;

        let set_vars = raw.set_vars.unwrap_or_default();
        let definition = TestDefinition {
            name: raw.name,
            source,
            expect: raw.expect,
            set_vars,
            retries: raw.retries,
            kind,
        };
        definition.validate()?;
        Ok(definition)
    }
}

impl TestDefinition {
    fn validate(&self) -> Result<()> {
        let label = self.label();

        if let Some(expect) = &self.expect {
            expect.validate(&label)?;
            match &self.kind {
                TestKind::Http(_) => {
                    if expect.has_command_fields() {
                        return Err(Error::InvalidDefinition(format!(
                            "'{label}': exitCode/stdout/stderr/jsonPath expectations are not valid for an http test"
                        )));
                    }
                }
                TestKind::Command(_) => {
                    if expect.has_http_fields() {
                        return Err(Error::InvalidDefinition(format!(
                            "'{label}': statusCode/body/header expectations are not valid for a command test"
                        )));
                    }
                }
                TestKind::Wait(_) | TestKind::BodyComparison(_) => {
                    return Err(Error::InvalidDefinition(format!(
                        "'{label}': an expect block is not valid for a {} test",
                        self.kind.name()
                    )));
                }
            }
        }

        if !self.set_vars.is_empty() {
            match &self.kind {
                // Extraction only runs after a passing validation.
                TestKind::Http(_) | TestKind::Command(_) if self.expect.is_none() => {
                    return Err(Error::InvalidDefinition(format!(
                        "'{label}': setVars requires an expect block"
                    )));
                }
                TestKind::BodyComparison(_) => {
                    return Err(Error::InvalidDefinition(format!(
                        "'{label}': setVars is not valid for a bodyComparison test"
                    )));
                }
                TestKind::Wait(wait) => {
                    let wants_value = self
                        .set_vars
                        .iter()
                        .any(|(_, rule)| matches!(rule, ExtractionRule::Value));
                    if wants_value && wait.json_path.is_none() {
                        return Err(Error::InvalidDefinition(format!(
                            "'{label}': the 'value' capture requires the wait test to set jsonPath"
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Where a test executes: on this machine, or relative to a pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    Local(LocalSource),
    Pod(PodSource),
}

impl Default for Source {
    fn default() -> Self {
        Source::Local(LocalSource::default())
    }
}

impl Source {
    pub fn validate(&self) -> Result<()> {
        match self {
            Source::Local(_) => Ok(()),
            Source::Pod(pod) => {
                if pod.use_port_forward && pod.use_pod_exec {
                    return Err(Error::InvalidDefinition(
                        "usePortForward and usePodExec are mutually exclusive".into(),
                    ));
                }
                pod.selector.validate()
            }
        }
    }
}

/// Local source; the optional selector is only consulted for service URL
/// auto-discovery when an http test omits its url.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSource {
    #[serde(default)]
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSource {
    pub selector: Selector,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub use_port_forward: bool,
    #[serde(default)]
    pub use_pod_exec: bool,
}

/// A Kubernetes resource locator: kind plus name-or-labels, namespace and
/// optional kubeconfig context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub kind: String,
    pub metadata: SelectorMetadata,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorMetadata {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(Error::InvalidDefinition("selector kind must not be empty".into()));
        }
        match (&self.metadata.name, self.metadata.labels.is_empty()) {
            (Some(_), false) => Err(Error::InvalidDefinition(
                "selector must use metadata.name or metadata.labels, not both".into(),
            )),
            (None, true) => Err(Error::InvalidDefinition(
                "selector requires metadata.name or a non-empty metadata.labels".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn is_pod_kind(&self) -> bool {
        self.kind.eq_ignore_ascii_case("pod")
    }

    /// kubectl-style `key=value,key=value` label selector.
    pub fn label_selector(&self) -> String {
        self.metadata
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Human-readable locator for error messages.
    pub fn describe(&self) -> String {
        let target = match &self.metadata.name {
            Some(name) => format!("{}/{}", self.kind.to_ascii_lowercase(), name),
            None => format!("{} [{}]", self.kind.to_ascii_lowercase(), self.label_selector()),
        };
        match &self.metadata.namespace {
            Some(ns) => format!("{target} in {ns}"),
            None => target,
        }
    }
}

/// Port reference: explicit number or a named service port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpTest {
    pub url: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub skip_ssl_verification: bool,
    pub max_redirects: u32,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub scheme: Option<String>,
    pub port: Option<PortRef>,
    pub timeout_seconds: Option<u64>,
    /// Image for the ephemeral debug container strategy.
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTest {
    pub cmd: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub parse_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitTest {
    pub selector: Selector,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub json_path_expectation: Option<Comparison>,
    #[serde(default = "default_wait_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_wait_interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_wait_timeout() -> u64 {
    60
}

fn default_wait_interval() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyComparisonTest {
    pub first: ComparisonRequest,
    pub second: ComparisonRequest,
    #[serde(default)]
    pub delay_seconds: Option<u64>,
    #[serde(default)]
    pub remove_json_paths: Vec<String>,
}

/// One side of a body comparison: an HTTP request with its own source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRequest {
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(flatten)]
    pub request: HttpTest,
}

/// The expectation comparators. The set is closed at parse time, so an
/// unknown comparator is a configuration error before any test runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparator {
    Equals,
    Contains,
    Matches,
    Exists,
    GreaterThan,
    LessThan,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Equals => "equals",
            Comparator::Contains => "contains",
            Comparator::Matches => "matches",
            Comparator::Exists => "exists",
            Comparator::GreaterThan => "greaterThan",
            Comparator::LessThan => "lessThan",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison: comparator, optional expected value, final-result
/// negation, and word-boundary matching for `contains`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub comparator: Comparator,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub matchword: bool,
}

impl Comparison {
    pub fn new(comparator: Comparator, value: serde_json::Value) -> Self {
        Self {
            comparator,
            value: Some(value),
            negate: false,
            matchword: false,
        }
    }
}

/// An expectation leaf: either a full comparison object or a bare scalar
/// shorthand whose comparator depends on the field it appears under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expectation {
    Full(Comparison),
    Literal(serde_json::Value),
}

impl Expectation {
    pub fn to_comparison(&self, shorthand: Comparator) -> Comparison {
        match self {
            Expectation::Full(comparison) => comparison.clone(),
            Expectation::Literal(value) => Comparison::new(shorthand, value.clone()),
        }
    }

    /// The untagged fallback would silently swallow an object with a bogus
    /// comparator as a literal; reject that shape here.
    fn validate(&self, label: &str, field: &str) -> Result<()> {
        if let Expectation::Literal(serde_json::Value::Object(map)) = self {
            if let Some(comparator) = map.get("comparator") {
                return Err(Error::InvalidDefinition(format!(
                    "'{label}': unknown comparator {comparator} in {field} expectation"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Expect {
    pub status_code: Option<Expectation>,
    pub body_contains: Option<Expectation>,
    pub body_regex: Option<Expectation>,
    pub body_json_path: Vec<JsonPathExpectation>,
    pub headers: Vec<HeaderExpectation>,
    pub exit_code: Option<Expectation>,
    pub stdout: Option<Expectation>,
    pub stderr: Option<Expectation>,
    pub json_path: Vec<JsonPathExpectation>,
}

impl Expect {
    pub fn has_http_fields(&self) -> bool {
        self.status_code.is_some()
            || self.body_contains.is_some()
            || self.body_regex.is_some()
            || !self.body_json_path.is_empty()
            || !self.headers.is_empty()
    }

    pub fn has_command_fields(&self) -> bool {
        self.exit_code.is_some()
            || self.stdout.is_some()
            || self.stderr.is_some()
            || !self.json_path.is_empty()
    }

    fn validate(&self, label: &str) -> Result<()> {
        for (field, expectation) in [
            ("statusCode", &self.status_code),
            ("bodyContains", &self.body_contains),
            ("bodyRegex", &self.body_regex),
            ("exitCode", &self.exit_code),
            ("stdout", &self.stdout),
            ("stderr", &self.stderr),
        ] {
            if let Some(expectation) = expectation {
                expectation.validate(label, field)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonPathExpectation {
    pub path: String,
    #[serde(flatten)]
    pub comparison: Comparison,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderExpectation {
    pub name: String,
    #[serde(flatten)]
    pub comparison: Comparison,
}

/// One value-extraction rule. The map form (`{jsonPath: "$.id"}`) and the
/// bare string form (`statusCode`) both parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionRule {
    JsonPath(String),
    Header(String),
    StatusCode,
    Body,
    Stdout,
    Stderr,
    ExitCode,
    Value,
    Regex(RegexRule),
}

impl ExtractionRule {
    pub fn name(&self) -> &'static str {
        match self {
            ExtractionRule::JsonPath(_) => "jsonPath",
            ExtractionRule::Header(_) => "header",
            ExtractionRule::StatusCode => "statusCode",
            ExtractionRule::Body => "body",
            ExtractionRule::Stdout => "stdout",
            ExtractionRule::Stderr => "stderr",
            ExtractionRule::ExitCode => "exitCode",
            ExtractionRule::Value => "value",
            ExtractionRule::Regex(_) => "regex",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexRule {
    pub pattern: String,
    #[serde(default)]
    pub group: Option<usize>,
    #[serde(default)]
    pub source: Option<RegexSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegexSource {
    Stdout,
    Stderr,
    Body,
}

/// Ordered `name -> rule` capture block. Document order matters: rules run
/// in order and a failure aborts the rest of the block.
#[derive(Debug, Clone, Default)]
pub struct SetVars(Vec<(String, ExtractionRule)>);

impl SetVars {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ExtractionRule)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ExtractionRule)> for SetVars {
    fn from_iter<T: IntoIterator<Item = (String, ExtractionRule)>>(iter: T) -> Self {
        SetVars(iter.into_iter().collect())
    }
}

impl Serialize for SetVars {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, rule) in &self.0 {
            map.serialize_entry(name, rule)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SetVars {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SetVarsVisitor;

        impl<'de> Visitor<'de> for SetVarsVisitor {
            type Value = SetVars;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variable names to extraction rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, rule)) = access.next_entry::<String, ExtractionRule>()? {
                    entries.push((name, rule));
                }
                Ok(SetVars(entries))
            }
        }

        deserializer.deserialize_map(SetVarsVisitor)
    }
}

/// Parse a batch of test definitions from a YAML string. Accepts a single
/// definition, an ordered sequence, or a `tests:` wrapper around one.
pub fn from_yaml(yaml: &str) -> Result<Vec<TestDefinition>> {
    let document: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let raw_list: Vec<RawTestDefinition> = match document {
        serde_yaml::Value::Sequence(_) => serde_yaml::from_value(document)?,
        serde_yaml::Value::Mapping(mut mapping) => match mapping.remove("tests") {
            Some(tests) => serde_yaml::from_value(tests)?,
            None => vec![serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))?],
        },
        other => {
            return Err(Error::InvalidDefinition(format!(
                "expected a test definition or a list of them, got {}",
                yaml_kind(&other)
            )))
        }
    };

    raw_list.into_iter().map(TestDefinition::try_from).collect()
}

/// Parse a batch of test definitions from a YAML file.
pub fn from_file(path: &Path) -> Result<Vec<TestDefinition>> {
    let content = std::fs::read_to_string(path)?;
    from_yaml(&content)
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a bool",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_http_test() {
        let yaml = r#"
name: health-endpoint
http:
  url: http://localhost:8080
  path: /health
expect:
  statusCode: 200
  bodyContains: ok
setVars:
  HEALTH_BODY:
    jsonPath: "$.status"
"#;
        let defs = from_yaml(yaml).unwrap();
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.label(), "health-endpoint");
        assert!(matches!(def.kind, TestKind::Http(_)));
        assert!(matches!(def.source, Source::Local(_)));
        assert_eq!(def.set_vars.len(), 1);
    }

    #[test]
    fn parse_sequence_and_tests_wrapper() {
        let sequence = r#"
- name: one
  command:
    cmd: "true"
  expect:
    exitCode: 0
- name: two
  command:
    cmd: "true"
  expect:
    exitCode: 0
"#;
        assert_eq!(from_yaml(sequence).unwrap().len(), 2);

        let wrapped = r#"
tests:
  - name: one
    command:
      cmd: "true"
    expect:
      exitCode: 0
"#;
        assert_eq!(from_yaml(wrapped).unwrap().len(), 1);
    }

    #[test]
    fn reject_missing_and_ambiguous_kinds() {
        let missing = "name: nothing\n";
        let err = from_yaml(missing).unwrap_err();
        assert!(err.to_string().contains("unknown test kind"), "{err}");
        assert!(err.is_config());

        let ambiguous = r#"
name: both
http:
  url: http://localhost
command:
  cmd: "true"
"#;
        let err = from_yaml(ambiguous).unwrap_err();
        assert!(err.to_string().contains("ambiguous test kind"), "{err}");
    }

    #[test]
    fn reject_set_vars_without_expect() {
        let yaml = r#"
name: capture-only
command:
  cmd: echo hi
setVars:
  OUT: stdout
"#;
        let err = from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("setVars requires an expect block"), "{err}");
    }

    #[test]
    fn capture_is_an_alias_for_set_vars() {
        let yaml = r#"
name: alias
command:
  cmd: echo hi
expect:
  exitCode: 0
capture:
  OUT: stdout
"#;
        let defs = from_yaml(yaml).unwrap();
        assert_eq!(defs[0].set_vars.len(), 1);
    }

    #[test]
    fn selector_requires_name_xor_labels() {
        let both = r#"
name: bad-selector
source:
  type: pod
  selector:
    kind: Pod
    metadata:
      namespace: default
      name: web-0
      labels:
        app: web
http:
  path: /health
"#;
        assert!(from_yaml(both).is_err());

        let neither = r#"
name: bad-selector
source:
  type: pod
  selector:
    kind: Pod
    metadata:
      namespace: default
http:
  path: /health
"#;
        assert!(from_yaml(neither).is_err());
    }

    #[test]
    fn transport_hints_are_mutually_exclusive() {
        let yaml = r#"
name: bad-hints
source:
  type: pod
  selector:
    kind: Pod
    metadata:
      name: web-0
  usePortForward: true
  usePodExec: true
http:
  path: /health
"#;
        let err = from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"), "{err}");
    }

    #[test]
    fn expectation_shorthand_and_full_forms() {
        let yaml = r#"
name: forms
http:
  url: http://localhost
expect:
  statusCode:
    comparator: lessThan
    value: 400
  bodyContains: ready
"#;
        let defs = from_yaml(yaml).unwrap();
        let expect = defs[0].expect.as_ref().unwrap();
        let status = expect
            .status_code
            .as_ref()
            .unwrap()
            .to_comparison(Comparator::Equals);
        assert_eq!(status.comparator, Comparator::LessThan);
        let contains = expect
            .body_contains
            .as_ref()
            .unwrap()
            .to_comparison(Comparator::Contains);
        assert_eq!(contains.comparator, Comparator::Contains);
        assert_eq!(contains.value, Some(serde_json::json!("ready")));
    }

    #[test]
    fn unknown_comparator_is_rejected() {
        let yaml = r#"
name: bogus
http:
  url: http://localhost
expect:
  statusCode:
    comparator: approximatelyEquals
    value: 200
"#;
        let err = from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown comparator"), "{err}");
    }

    #[test]
    fn kind_specific_expectations_are_enforced() {
        let yaml = r#"
name: wrong-shape
command:
  cmd: echo hi
expect:
  statusCode: 200
"#;
        let err = from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("not valid for a command test"), "{err}");
    }

    #[test]
    fn extraction_rule_forms() {
        let yaml = r#"
name: captures
command:
  cmd: echo hi
  parseJson: true
expect:
  exitCode: 0
setVars:
  RAW: stdout
  CODE: exitCode
  ID:
    jsonPath: "$.id"
  TOKEN:
    regex:
      pattern: "token=(\\w+)"
      group: 1
      source: stderr
"#;
        let defs = from_yaml(yaml).unwrap();
        let rules: Vec<&str> = defs[0].set_vars.iter().map(|(_, r)| r.name()).collect();
        assert_eq!(rules, vec!["stdout", "exitCode", "jsonPath", "regex"]);
    }

    #[test]
    fn set_vars_preserves_document_order() {
        let yaml = r#"
name: ordered
command:
  cmd: echo hi
expect:
  exitCode: 0
setVars:
  ZULU: stdout
  ALPHA: stderr
  MIKE: exitCode
"#;
        let defs = from_yaml(yaml).unwrap();
        let names: Vec<&str> = defs[0].set_vars.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["ZULU", "ALPHA", "MIKE"]);
    }

    #[test]
    fn wait_defaults_and_value_capture_guard() {
        let yaml = r#"
name: wait-for-ready
wait:
  selector:
    kind: Deployment
    metadata:
      namespace: default
      name: web
  jsonPath: "$.status.readyReplicas"
"#;
        let defs = from_yaml(yaml).unwrap();
        if let TestKind::Wait(wait) = &defs[0].kind {
            assert_eq!(wait.timeout_seconds, 60);
            assert_eq!(wait.interval_seconds, 2);
            assert!(wait.max_retries.is_none());
        } else {
            panic!("expected a wait test");
        }

        let no_path = r#"
name: wait-capture
wait:
  selector:
    kind: Deployment
    metadata:
      name: web
setVars:
  REPLICAS: value
"#;
        let err = from_yaml(no_path).unwrap_err();
        assert!(err.to_string().contains("requires the wait test to set jsonPath"), "{err}");
    }

    #[test]
    fn body_comparison_parses_with_sources() {
        let yaml = r#"
name: canary-vs-stable
bodyComparison:
  first:
    url: http://stable.example.com
    path: /api/items
  second:
    source:
      type: pod
      selector:
        kind: Pod
        metadata:
          namespace: default
          labels:
            app: canary
    path: /api/items
  removeJsonPaths:
    - "$.timestamp"
"#;
        let defs = from_yaml(yaml).unwrap();
        if let TestKind::BodyComparison(cmp) = &defs[0].kind {
            assert_eq!(cmp.remove_json_paths, vec!["$.timestamp"]);
            assert!(cmp.first.source.is_none());
            assert!(matches!(cmp.second.source, Some(Source::Pod(_))));
        } else {
            panic!("expected a bodyComparison test");
        }
    }
}
