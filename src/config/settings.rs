//! Settings loading and validation.
//!
//! Two sources, same keys:
//! - environment variables (`OPENAI_API_KEY`, `MCP_SERVERS`, `MAX_ITERATIONS`, ...)
//! - a YAML file with the keys in snake_case (`mcp_servers` as a list)
//!
//! `${VAR}` and `${VAR:-default}` placeholders are interpolated in the YAML
//! file and in `MCP_SERVERS`, which is how services receive their tokens.
//! Documents are parsed first and only string values are interpolated, so a
//! substituted value is never read as syntax.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::errors::ConfigError;
use crate::inference::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::inference::InferenceConfig;
use crate::mcp_client::{RegistryOptions, ServiceConfig};

/// Environment variable naming a YAML config file.
pub const CONFIG_PATH_ENV: &str = "APPRENTICE_CONFIG";

const DEFAULT_MAX_ITERATIONS: u32 = 15;
const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

// ─── Settings ────────────────────────────────────────────────────────────────

/// Validated, immutable run configuration.
#[derive(Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub mcp_servers: Vec<ServiceConfig>,
    /// Code-host organization new issues are created under.
    pub github_org: Option<String>,
    /// Default assignee for created issues.
    pub github_assignee: Option<String>,
    pub github_token: Option<String>,
    pub jira_url: Option<String>,
    pub jira_username: Option<String>,
    pub jira_api_token: Option<String>,
    pub max_iterations: u32,
    pub log_level: String,
    pub init_timeout: Duration,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub llm_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            openai_model: DEFAULT_MODEL.to_string(),
            mcp_servers: Vec::new(),
            github_org: None,
            github_assignee: None,
            github_token: None,
            jira_url: None,
            jira_username: None,
            jira_api_token: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            init_timeout: Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }
}

fn redact(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("mcp_servers", &self.mcp_servers)
            .field("github_org", &self.github_org)
            .field("github_assignee", &self.github_assignee)
            .field("github_token", &redact(&self.github_token))
            .field("jira_url", &self.jira_url)
            .field("jira_username", &self.jira_username)
            .field("jira_api_token", &redact(&self.jira_api_token))
            .field("max_iterations", &self.max_iterations)
            .field("log_level", &self.log_level)
            .field("init_timeout", &self.init_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("llm_timeout", &self.llm_timeout)
            .finish()
    }
}

impl Settings {
    /// Load from the YAML file at `path`, else from the file named by
    /// `APPRENTICE_CONFIG`, else from environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty());

        match (path, env_path) {
            (Some(path), _) => Self::from_yaml_file(path),
            (None, Some(env_path)) => Self::from_yaml_file(Path::new(&env_path)),
            (None, None) => Self::from_env(),
        }
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mcp_servers = match get("MCP_SERVERS") {
            Some(raw) => {
                let parse_error = |e: serde_json::Error| ConfigError::Parse {
                    source_name: "MCP_SERVERS".into(),
                    reason: e.to_string(),
                };
                let mut doc: serde_json::Value =
                    serde_json::from_str(&raw).map_err(parse_error)?;
                interpolate_json(&mut doc, &lookup);
                serde_json::from_value::<Vec<ServiceConfig>>(doc).map_err(parse_error)?
            }
            None => Vec::new(),
        };

        let raw = RawSettings {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            openai_model: get("OPENAI_MODEL"),
            mcp_servers,
            github_org: get("GITHUB_ORG"),
            github_assignee: get("GITHUB_ASSIGNEE"),
            github_token: get("GITHUB_TOKEN"),
            jira_url: get("JIRA_URL"),
            jira_username: get("JIRA_USERNAME"),
            jira_api_token: get("JIRA_API_TOKEN"),
            max_iterations: parse_number("MAX_ITERATIONS", get("MAX_ITERATIONS"))?,
            log_level: get("LOG_LEVEL"),
            init_timeout_secs: parse_number("INIT_TIMEOUT_SECS", get("INIT_TIMEOUT_SECS"))?,
            connect_timeout_secs: parse_number(
                "CONNECT_TIMEOUT_SECS",
                get("CONNECT_TIMEOUT_SECS"),
            )?,
            call_timeout_secs: parse_number("CALL_TIMEOUT_SECS", get("CALL_TIMEOUT_SECS"))?,
            llm_timeout_secs: parse_number("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"))?,
        };

        raw.validate()
    }

    /// Read and parse a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loading config file");
        Self::from_yaml_str(&raw, |key| std::env::var(key).ok())
    }

    /// Parse a YAML document, then interpolate placeholders in its string
    /// values via `lookup`.
    pub fn from_yaml_str<F>(yaml: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_error = |e: serde_yaml::Error| ConfigError::Parse {
            source_name: "config file".into(),
            reason: e.to_string(),
        };
        let mut doc: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;
        interpolate_yaml(&mut doc, &lookup);
        let raw: RawSettings = serde_yaml::from_value(doc).map_err(parse_error)?;
        raw.validate()
    }

    /// The API key, required when talking to the hosted OpenAI endpoint.
    pub fn require_openai_api_key(&self) -> Result<Option<&str>, ConfigError> {
        match self.openai_api_key.as_deref() {
            Some(key) => Ok(Some(key)),
            None if self.openai_base_url == DEFAULT_BASE_URL => Err(ConfigError::MissingKey {
                key: "OPENAI_API_KEY".into(),
            }),
            None => Ok(None),
        }
    }

    /// Parameters for the chat-completions client.
    pub fn inference_config(&self) -> Result<InferenceConfig, ConfigError> {
        let api_key = self.require_openai_api_key()?.map(str::to_string);
        Ok(InferenceConfig {
            base_url: self.openai_base_url.clone(),
            api_key,
            model: self.openai_model.clone(),
            temperature: 0.0,
            max_tokens: None,
            request_timeout: self.llm_timeout,
        })
    }

    /// Time limits for the capability registry.
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            init_timeout: self.init_timeout,
            call_timeout: self.call_timeout,
        }
    }
}

// ─── Raw Form ────────────────────────────────────────────────────────────────

/// Unvalidated settings, shared by both sources.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    openai_api_key: Option<String>,
    #[serde(default)]
    openai_base_url: Option<String>,
    #[serde(default)]
    openai_model: Option<String>,
    #[serde(default)]
    mcp_servers: Vec<ServiceConfig>,
    #[serde(default)]
    github_org: Option<String>,
    #[serde(default)]
    github_assignee: Option<String>,
    #[serde(default)]
    github_token: Option<String>,
    #[serde(default)]
    jira_url: Option<String>,
    #[serde(default)]
    jira_username: Option<String>,
    #[serde(default)]
    jira_api_token: Option<String>,
    #[serde(default, deserialize_with = "loose_number")]
    max_iterations: Option<u32>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default, deserialize_with = "loose_number")]
    init_timeout_secs: Option<u64>,
    #[serde(default, deserialize_with = "loose_number")]
    connect_timeout_secs: Option<u64>,
    #[serde(default, deserialize_with = "loose_number")]
    call_timeout_secs: Option<u64>,
    #[serde(default, deserialize_with = "loose_number")]
    llm_timeout_secs: Option<u64>,
}

impl RawSettings {
    fn validate(self) -> Result<Settings, ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid {
                    key: "mcp_servers".into(),
                    reason: format!("duplicate service name '{}'", server.name),
                });
            }
        }

        let defaults = Settings::default();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        Ok(Settings {
            openai_api_key: non_empty(self.openai_api_key),
            openai_base_url: non_empty(self.openai_base_url).unwrap_or(defaults.openai_base_url),
            openai_model: non_empty(self.openai_model).unwrap_or(defaults.openai_model),
            mcp_servers: self.mcp_servers,
            github_org: non_empty(self.github_org),
            github_assignee: non_empty(self.github_assignee),
            github_token: non_empty(self.github_token),
            jira_url: non_empty(self.jira_url),
            jira_username: non_empty(self.jira_username),
            jira_api_token: non_empty(self.jira_api_token),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            log_level: non_empty(self.log_level).unwrap_or(defaults.log_level),
            init_timeout: positive_secs("init_timeout_secs", self.init_timeout_secs)?
                .unwrap_or(defaults.init_timeout),
            connect_timeout: positive_secs("connect_timeout_secs", self.connect_timeout_secs)?
                .unwrap_or(defaults.connect_timeout),
            call_timeout: positive_secs("call_timeout_secs", self.call_timeout_secs)?
                .unwrap_or(defaults.call_timeout),
            llm_timeout: positive_secs("llm_timeout_secs", self.llm_timeout_secs)?
                .unwrap_or(defaults.llm_timeout),
        })
    }
}

/// Accept a number, or a string holding one. Interpolated values arrive as
/// strings; an empty one counts as unset.
fn loose_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + std::str::FromStr,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose<T> {
        Number(T),
        Text(String),
    }

    match Option::<Loose<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Loose::Number(n)) => Ok(Some(n)),
        Some(Loose::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Loose::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("'{text}': {e}"))),
    }
}

fn parse_number<T>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("'{v}': {e}"),
            })
        })
        .transpose()
}

fn positive_secs(key: &str, secs: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    match secs {
        Some(0) => Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: "must be greater than zero".into(),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string using `lookup`.
pub fn interpolate_env_vars<F>(input: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_expr.push(c);
            }
            if closed {
                result.push_str(&resolve_var_expr(&var_expr, lookup));
            } else {
                // Unterminated placeholder: keep it verbatim.
                result.push_str("${");
                result.push_str(&var_expr);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Interpolate every string value of a parsed JSON document. Keys are left alone.
fn interpolate_json<F>(value: &mut serde_json::Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_json::Value::String(s) => *s = interpolate_env_vars(s, lookup),
        serde_json::Value::Array(items) => {
            items.iter_mut().for_each(|v| interpolate_json(v, lookup))
        }
        serde_json::Value::Object(map) => {
            map.values_mut().for_each(|v| interpolate_json(v, lookup))
        }
        _ => {}
    }
}

/// Interpolate every string value of a parsed YAML document. Keys are left alone.
fn interpolate_yaml<F>(value: &mut serde_yaml::Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_yaml::Value::String(s) => *s = interpolate_env_vars(s, lookup),
        serde_yaml::Value::Sequence(items) => {
            items.iter_mut().for_each(|v| interpolate_yaml(v, lookup))
        }
        serde_yaml::Value::Mapping(map) => {
            map.values_mut().for_each(|v| interpolate_yaml(v, lookup))
        }
        serde_yaml::Value::Tagged(tagged) => interpolate_yaml(&mut tagged.value, lookup),
        _ => {}
    }
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr<F>(expr: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        lookup(var_name)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default))
    } else {
        lookup(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use crate::mcp_client::LaunchSpec;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        let lookup = lookup_from(&[]);
        let result = interpolate_env_vars("url: ${JIRA_URL:-http://localhost:8080}", &lookup);
        assert_eq!(result, "url: http://localhost:8080");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        let lookup = lookup_from(&[("GITHUB_TOKEN", "ghp_123")]);
        let result = interpolate_env_vars("token=${GITHUB_TOKEN}", &lookup);
        assert_eq!(result, "token=ghp_123");
    }

    #[test]
    fn test_interpolate_missing_without_default_is_empty() {
        let lookup = lookup_from(&[]);
        assert_eq!(interpolate_env_vars("[${NOPE}]", &lookup), "[]");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let lookup = lookup_from(&[]);
        assert_eq!(interpolate_env_vars("$HOME stays", &lookup), "$HOME stays");
        assert_eq!(interpolate_env_vars("open ${BRACE", &lookup), "open ${BRACE");
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/mcp"), format!("{}/mcp", home.display()));
        }
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn test_from_lookup_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.max_iterations, 15);
        assert_eq!(settings.log_level, "INFO");
        assert_eq!(settings.openai_model, "gpt-4o-mini");
        assert!(settings.mcp_servers.is_empty());
        assert_eq!(settings.init_timeout, Duration::from_secs(60));
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_lookup_parses_servers_with_interpolation() {
        let servers = r#"[
            {"name": "jira", "command": "npx", "args": ["-y", "jira-mcp"],
             "env": {"JIRA_API_TOKEN": "${JIRA_API_TOKEN}"}},
            {"name": "github", "type": "http", "url": "http://localhost:3001/mcp"}
        ]"#;
        let settings = Settings::from_lookup(lookup_from(&[
            ("MCP_SERVERS", servers),
            ("JIRA_API_TOKEN", "jira-secret"),
            ("MAX_ITERATIONS", "7"),
            ("GITHUB_ORG", "acme"),
        ]))
        .unwrap();

        assert_eq!(settings.max_iterations, 7);
        assert_eq!(settings.github_org.as_deref(), Some("acme"));
        assert_eq!(settings.mcp_servers.len(), 2);
        match &settings.mcp_servers[0].launch {
            LaunchSpec::Stdio { env, .. } => {
                assert_eq!(env.get("JIRA_API_TOKEN").map(String::as_str), Some("jira-secret"));
            }
            other => panic!("expected stdio, got {other:?}"),
        }
        assert_eq!(settings.mcp_servers[1].launch.kind(), "http");
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = Settings::from_lookup(lookup_from(&[("MAX_ITERATIONS", "lots")])).unwrap_err();
        match err {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "MAX_ITERATIONS"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err =
            Settings::from_lookup(lookup_from(&[("CALL_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_servers_json_rejected() {
        let err = Settings::from_lookup(lookup_from(&[("MCP_SERVERS", "{not json")])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_duplicate_service_names_rejected() {
        let servers = r#"[{"name": "jira", "command": "a"}, {"name": "jira", "command": "b"}]"#;
        let err = Settings::from_lookup(lookup_from(&[("MCP_SERVERS", servers)])).unwrap_err();
        assert!(err.to_string().contains("duplicate service name 'jira'"));
    }

    #[test]
    fn test_from_yaml_str() {
        let yaml = r#"
openai_model: gpt-4o
max_iterations: 5
github_assignee: ${ASSIGNEE:-octocat}
mcp_servers:
  - name: jira
    command: jira-mcp
    env:
      JIRA_URL: ${JIRA_URL}
  - name: github
    type: streamable-http
    url: http://localhost:3001/mcp
    headers:
      Authorization: Bearer ${GITHUB_TOKEN}
"#;
        let settings = Settings::from_yaml_str(
            yaml,
            lookup_from(&[("JIRA_URL", "https://acme.atlassian.net"), ("GITHUB_TOKEN", "ghp_x")]),
        )
        .unwrap();
        assert_eq!(settings.openai_model, "gpt-4o");
        assert_eq!(settings.max_iterations, 5);
        assert_eq!(settings.github_assignee.as_deref(), Some("octocat"));
        match &settings.mcp_servers[1].launch {
            LaunchSpec::Http { headers, .. } => {
                assert_eq!(headers["Authorization"], "Bearer ghp_x");
            }
            other => panic!("expected http, got {other:?}"),
        }
    }

    #[test]
    fn test_servers_secret_with_json_metacharacters() {
        let servers = r#"[{"name": "jira", "command": "jira-mcp",
                           "env": {"JIRA_API_TOKEN": "${JIRA_API_TOKEN}"}}]"#;
        let secret = r#"ab"c\d"#;
        let settings = Settings::from_lookup(lookup_from(&[
            ("MCP_SERVERS", servers),
            ("JIRA_API_TOKEN", secret),
        ]))
        .unwrap();

        match &settings.mcp_servers[0].launch {
            LaunchSpec::Stdio { env, .. } => {
                assert_eq!(env.get("JIRA_API_TOKEN").map(String::as_str), Some(secret));
            }
            other => panic!("expected stdio, got {other:?}"),
        }
    }

    #[test]
    fn test_yaml_secret_with_metacharacters() {
        let yaml = r#"
jira_api_token: ${JIRA_API_TOKEN}
max_iterations: ${MAX_ITERATIONS:-4}
call_timeout_secs: ${CALL_TIMEOUT_SECS}
mcp_servers:
  - name: github
    type: http
    url: http://localhost:3001/mcp
    headers:
      Authorization: Bearer ${GITHUB_TOKEN}
"#;
        let secret = "ab\"c\\d: #x\n- y";
        let settings = Settings::from_yaml_str(
            yaml,
            lookup_from(&[("JIRA_API_TOKEN", secret), ("GITHUB_TOKEN", secret)]),
        )
        .unwrap();

        assert_eq!(settings.jira_api_token.as_deref(), Some(secret));
        assert_eq!(settings.max_iterations, 4);
        assert_eq!(settings.call_timeout, Duration::from_secs(60));
        match &settings.mcp_servers[0].launch {
            LaunchSpec::Http { headers, .. } => {
                assert_eq!(headers["Authorization"], format!("Bearer {secret}"));
            }
            other => panic!("expected http, got {other:?}"),
        }
    }

    #[test]
    fn test_yaml_non_numeric_interpolation_rejected() {
        let err = Settings::from_yaml_str(
            "max_iterations: ${MAX_ITERATIONS}\n",
            lookup_from(&[("MAX_ITERATIONS", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_yaml_unknown_key_rejected() {
        let err = Settings::from_yaml_str("max_iteration: 3\n", lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations: 3").unwrap();
        writeln!(file, "log_level: DEBUG").unwrap();
        let settings = Settings::from_yaml_file(file.path()).unwrap();
        assert_eq!(settings.max_iterations, 3);
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::from_yaml_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-live-secret"),
            ("GITHUB_TOKEN", "ghp_secret"),
            ("JIRA_API_TOKEN", "jira-secret"),
        ]))
        .unwrap();
        let printed = format!("{settings:?}");
        assert!(!printed.contains("sk-live-secret"));
        assert!(!printed.contains("ghp_secret"));
        assert!(!printed.contains("jira-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_api_key_required_for_hosted_endpoint() {
        let hosted = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert!(matches!(
            hosted.inference_config(),
            Err(ConfigError::MissingKey { .. })
        ));

        let local = Settings::from_lookup(lookup_from(&[(
            "OPENAI_BASE_URL",
            "http://localhost:11434/v1",
        )]))
        .unwrap();
        let cfg = local.inference_config().unwrap();
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
    }
}
