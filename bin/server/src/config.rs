//! Centralized server configuration.
//!
//! Settings come from an optional `appsettings` file (JSON, TOML, YAML, ...),
//! an optional `appsettings.<environment>` file, and environment variables
//! using `__` as the section separator, later sources overriding earlier
//! ones.
//!
//! Keys are case- and separator-insensitive: `OIDC:ClientId`,
//! `oidc.client_id` and `OIDC__CLIENT_ID` all name the same setting. Every
//! source is wrapped in [`NormalizedKeys`], which lowercases each path
//! segment and drops everything that is not a letter or digit. Both `.` and
//! `:` separate sections, in source keys as well as in nested table keys.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use config::{Config, ConfigError as SourceError, File, Map, Source, Value, ValueKind};
use lantern_identity::{ConfigError, Key, ProviderConfiguration, ScopeSet};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Base name of the settings files.
const SETTINGS_FILE: &str = "appsettings";

/// Callback route, appended to the public URL when no redirect URI is set.
const CALLBACK_PATH: &str = "/auth/callback";

/// Smallest accepted session key, in bytes.
const MIN_KEY_BYTES: usize = 64;

/// Accepted session lifetimes, in minutes (up to 30 days).
const SESSION_MINUTES: RangeInclusive<i64> = 1..=43_200;

/// Accepted provider call timeouts, in seconds.
const TIMEOUT_SECONDS: RangeInclusive<u64> = 1..=300;

/// Accepted clock skew, in seconds.
const CLOCK_SKEW_SECONDS: RangeInclusive<i64> = 0..=3_600;

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Environment {
    /// Error pages include diagnostic detail.
    Development,
    #[default]
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl FromStr for Environment {
    type Err = ServerConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ServerConfigError::InvalidValue {
                key: "environment",
                details: format!("unknown environment '{s}'"),
            }),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = ServerConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Errors from loading the server configuration.
#[derive(Debug)]
pub enum ServerConfigError {
    /// A settings source could not be read or deserialized.
    Source { details: String },
    /// A server setting has an unusable value.
    InvalidValue { key: &'static str, details: String },
    /// The identity provider settings are incomplete.
    Provider(ConfigError),
}

impl fmt::Display for ServerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { details } => write!(f, "failed to read settings: {details}"),
            Self::InvalidValue { key, details } => write!(f, "invalid setting {key}: {details}"),
            Self::Provider(e) => write!(f, "identity provider settings: {e}"),
        }
    }
}

impl std::error::Error for ServerConfigError {}

impl From<SourceError> for ServerConfigError {
    fn from(e: SourceError) -> Self {
        Self::Source {
            details: e.to_string(),
        }
    }
}

/// Server configuration composed from the library configs.
#[derive(Clone)]
pub struct ServerConfig {
    pub environment: Environment,
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// Externally visible base URL, used for redirects back to the app.
    pub public_url: String,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
    pub session: SessionConfig,
    /// Key sealing session cookies.
    pub session_key: Key,
    pub provider: ProviderConfiguration,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("environment", &self.environment)
            .field("bind_addr", &self.bind_addr)
            .field("public_url", &self.public_url)
            .field("static_dir", &self.static_dir)
            .field("session", &self.session)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in minutes; renewed while the user is active.
    #[serde(default = "default_session_duration_minutes", rename = "durationminutes")]
    pub duration_minutes: i64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies", rename = "securecookies")]
    pub secure_cookies: bool,

    #[serde(default = "default_cookie_name", rename = "cookiename")]
    pub cookie_name: String,

    /// Base64-encoded key of at least 64 bytes.
    #[serde(default)]
    key: Option<String>,
}

fn default_session_duration_minutes() -> i64 {
    60
}

fn default_secure_cookies() -> bool {
    true
}

fn default_cookie_name() -> String {
    lantern_identity::session::DEFAULT_COOKIE_NAME.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            secure_cookies: default_secure_cookies(),
            cookie_name: default_cookie_name(),
            key: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duration_minutes)
    }

    fn check(&self) -> Result<(), ServerConfigError> {
        check_range("session.duration_minutes", self.duration_minutes, &SESSION_MINUTES)
    }

    fn resolve_key(&self) -> Result<Key, ServerConfigError> {
        let Some(encoded) = self.key.as_deref().filter(|k| !k.trim().is_empty()) else {
            warn!("no session key configured; generated a random key, sessions will not survive a restart");
            return Ok(Key::generate());
        };

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ServerConfigError::InvalidValue {
                key: "session.key",
                details: e.to_string(),
            })?;
        if bytes.len() < MIN_KEY_BYTES {
            return Err(ServerConfigError::InvalidValue {
                key: "session.key",
                details: format!("need at least {MIN_KEY_BYTES} bytes, got {}", bytes.len()),
            });
        }
        Key::try_from(bytes.as_slice()).map_err(|e| ServerConfigError::InvalidValue {
            key: "session.key",
            details: e.to_string(),
        })
    }
}

/// `oidc` section as it appears in the settings sources.
#[derive(Debug, Default, Deserialize)]
struct OidcSection {
    #[serde(default)]
    authority: Option<String>,
    #[serde(default, rename = "clientid")]
    client_id: Option<String>,
    #[serde(default, rename = "clientsecret")]
    client_secret: Option<String>,
    #[serde(default, rename = "redirecturi")]
    redirect_uri: Option<String>,
    #[serde(default)]
    scopes: Option<ScopeList>,
    #[serde(default, rename = "nameclaim")]
    name_claim: Option<String>,
    #[serde(default, rename = "roleclaim")]
    role_claim: Option<String>,
    #[serde(default, rename = "userinfoclaims")]
    user_info_claims: Option<bool>,
    #[serde(default, rename = "timeoutseconds")]
    timeout_seconds: Option<u64>,
    #[serde(default, rename = "clockskewseconds")]
    clock_skew_seconds: Option<i64>,
}

/// Scopes as a list (files) or a delimited string (environment).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeList {
    List(Vec<String>),
    Joined(String),
}

impl From<ScopeList> for ScopeSet {
    fn from(list: ScopeList) -> Self {
        match list {
            ScopeList::List(scopes) => ScopeSet::new(scopes),
            ScopeList::Joined(raw) => ScopeSet::parse(&raw),
        }
    }
}

impl OidcSection {
    fn check(&self) -> Result<(), ServerConfigError> {
        if let Some(seconds) = self.timeout_seconds {
            check_range("oidc.timeout_seconds", seconds, &TIMEOUT_SECONDS)?;
        }
        if let Some(seconds) = self.clock_skew_seconds {
            check_range("oidc.clock_skew_seconds", seconds, &CLOCK_SKEW_SECONDS)?;
        }
        Ok(())
    }

    fn into_provider(self, public_url: &str) -> Result<ProviderConfiguration, ConfigError> {
        let redirect_uri = self
            .redirect_uri
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| format!("{}{CALLBACK_PATH}", public_url.trim_end_matches('/')));

        let mut builder = ProviderConfiguration::builder(
            self.authority.unwrap_or_default(),
            self.client_id.unwrap_or_default(),
            self.client_secret.unwrap_or_default(),
            redirect_uri,
        );
        if let Some(scopes) = self.scopes {
            builder = builder.scopes(scopes.into());
        }
        if let Some(claim) = self.name_claim {
            builder = builder.name_claim(claim);
        }
        if let Some(claim) = self.role_claim {
            builder = builder.role_claim(claim);
        }
        if let Some(enabled) = self.user_info_claims {
            builder = builder.user_info_claims(enabled);
        }
        if let Some(seconds) = self.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(seconds));
        }
        if let Some(seconds) = self.clock_skew_seconds {
            builder = builder.clock_skew(chrono::Duration::seconds(seconds));
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    #[serde(default)]
    environment: Environment,
    #[serde(default = "default_bind_addr", rename = "bindaddr")]
    bind_addr: SocketAddr,
    #[serde(default = "default_public_url", rename = "publicurl")]
    public_url: String,
    #[serde(default = "default_static_dir", rename = "staticdir")]
    static_dir: PathBuf,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    oidc: OidcSection,
}

fn check_range<T>(
    key: &'static str,
    value: T,
    range: &RangeInclusive<T>,
) -> Result<(), ServerConfigError>
where
    T: PartialOrd + fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ServerConfigError::InvalidValue {
            key,
            details: format!(
                "{value} is outside {}..={}",
                range.start(),
                range.end()
            ),
        })
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_public_url() -> String {
    "https://localhost:5001".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

impl ServerConfig {
    /// Loads configuration from the working directory and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> lantern_core::Result<Self, ServerConfigError> {
        Self::load_from(Path::new("."), None)
    }

    /// Loads configuration from `dir`, with `vars` standing in for the
    /// process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load_from(
        dir: &Path,
        vars: Option<Map<String, String>>,
    ) -> lantern_core::Result<Self, ServerConfigError> {
        Ok(Self::resolve(dir, vars)?)
    }

    fn resolve(dir: &Path, vars: Option<Map<String, String>>) -> Result<Self, ServerConfigError> {
        let base = dir.join(SETTINGS_FILE);
        let environment_source = || {
            NormalizedKeys::new(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .source(vars.clone()),
            )
        };

        // The environment picks the overlay file, so resolve it first.
        let base_layer = Config::builder()
            .add_source(NormalizedKeys::new(File::from(base.clone()).required(false)))
            .add_source(environment_source())
            .build()?;
        let environment = match base_layer.get_string("environment") {
            Ok(value) => value.parse::<Environment>()?,
            Err(_) => Environment::default(),
        };

        let overlay = dir.join(format!("{SETTINGS_FILE}.{environment}"));
        let raw: RawServerConfig = Config::builder()
            .add_source(NormalizedKeys::new(File::from(base).required(false)))
            .add_source(NormalizedKeys::new(File::from(overlay).required(false)))
            .add_source(environment_source())
            .build()?
            .try_deserialize()?;

        raw.session.check()?;
        raw.oidc.check()?;
        let session_key = raw.session.resolve_key()?;
        let provider = raw
            .oidc
            .into_provider(&raw.public_url)
            .map_err(ServerConfigError::Provider)?;

        Ok(Self {
            environment: raw.environment,
            bind_addr: raw.bind_addr,
            public_url: raw.public_url,
            static_dir: raw.static_dir,
            session: raw.session,
            session_key,
            provider,
        })
    }
}

/// Wraps a settings source so its keys follow the case- and
/// separator-insensitive policy.
#[derive(Debug, Clone)]
pub struct NormalizedKeys<S> {
    inner: S,
}

impl<S> NormalizedKeys<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Source for NormalizedKeys<S>
where
    S: Source + Clone + Send + Sync + 'static,
{
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, SourceError> {
        Ok(normalize_table(self.inner.collect()?))
    }
}

/// Splits a key into normalized section segments.
fn split_key(key: &str) -> Vec<String> {
    key.split(['.', ':']).map(normalize_segment).collect()
}

fn normalize_table(table: Map<String, Value>) -> Map<String, Value> {
    let mut normalized = Map::new();
    for (key, value) in table {
        let segments = split_key(&key);
        if segments.iter().any(String::is_empty) {
            continue;
        }
        insert_nested(&mut normalized, &segments, normalize_value(value));
    }
    normalized
}

/// Places `value` at `segments`, merging with tables already there.
fn insert_nested(table: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        let existing = table.get_mut(first).and_then(|v| match &mut v.kind {
            ValueKind::Table(existing) => Some(existing),
            _ => None,
        });
        match existing {
            Some(existing) if matches!(value.kind, ValueKind::Table(_)) => {
                if let ValueKind::Table(incoming) = value.kind {
                    for (key, inner) in incoming {
                        insert_nested(existing, &[key], inner);
                    }
                }
            }
            _ => {
                table.insert(first.clone(), value);
            }
        }
        return;
    }

    let entry = table
        .entry(first.clone())
        .or_insert_with(|| Value::new(None, ValueKind::Table(Map::new())));
    if !matches!(entry.kind, ValueKind::Table(_)) {
        entry.kind = ValueKind::Table(Map::new());
    }
    if let ValueKind::Table(inner) = &mut entry.kind {
        insert_nested(inner, rest, value);
    }
}

/// Lowercases a key segment and drops separators such as `_`, `-` and `:`.
fn normalize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn normalize_value(mut value: Value) -> Value {
    value.kind = match value.kind {
        ValueKind::Table(table) => ValueKind::Table(normalize_table(table)),
        ValueKind::Array(items) => {
            ValueKind::Array(items.into_iter().map(normalize_value).collect())
        }
        other => other,
    };
    value
}
