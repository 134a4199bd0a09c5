//! Configuration module for Shield Guard.
//!
//! Loads the security configuration from files and environment variables.

use std::collections::HashMap;

use config::{Config as ConfigLoader, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::domain::ConfiguredUser;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Firewalls in matching order.
    #[serde(default)]
    pub firewalls: Vec<FirewallConfig>,
    #[serde(default)]
    pub access_decision_manager: AccessDecisionManagerConfig,
    #[serde(default)]
    pub access_control: Vec<AccessControlRule>,
    /// Role to the roles it implies.
    #[serde(default)]
    pub role_hierarchy: HashMap<String, Vec<String>>,
    /// Users of the built-in `in_memory` provider.
    #[serde(default)]
    pub users: Vec<ConfiguredUser>,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
    #[serde(default)]
    pub api_keys: Vec<ConfiguredApiKey>,
    #[serde(default)]
    pub session: SessionConfig,
    /// Headers a trusted front server uses to pass server variables.
    #[serde(default)]
    pub trusted_headers: Vec<TrustedHeaderConfig>,
}

/// Server configuration for the demo binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Session storage of the middleware.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle seconds before a session is dropped.
    #[serde(default = "default_session_ttl")]
    pub ttl: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: default_session_ttl(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Copies request header `header` into server variable `variable`.
///
/// Only configure headers the front server always sets or strips, clients
/// could forge them otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustedHeaderConfig {
    pub header: String,
    pub variable: String,
}

/// One protected zone.
#[derive(Debug, Clone, Deserialize)]
pub struct FirewallConfig {
    pub name: String,
    /// Regex over the request path, absent matches every request.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Restrict matching to these methods.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub stateless: bool,
    #[serde(default)]
    pub lazy: bool,
    /// User provider id, the `in_memory` provider when absent.
    #[serde(default)]
    pub provider: Option<String>,
    /// Authenticator key or entry point service id.
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default = "default_true")]
    pub erase_credentials: bool,
    #[serde(default = "default_true")]
    pub hide_user_not_found: bool,
    /// Badge kinds every passport of this firewall must carry.
    #[serde(default)]
    pub required_badges: Vec<String>,
    /// User checker service id.
    #[serde(default)]
    pub user_checker: Option<String>,
    /// CSRF token manager service id, session-backed tokens when absent.
    #[serde(default)]
    pub csrf_token_manager: Option<String>,
    #[serde(default)]
    pub http_basic: Option<HttpBasicConfig>,
    #[serde(default)]
    pub form_login: Option<FormLoginConfig>,
    #[serde(default)]
    pub json_login: Option<JsonLoginConfig>,
    #[serde(default)]
    pub access_token: Option<AccessTokenConfig>,
    #[serde(default)]
    pub x509: Option<X509Config>,
    #[serde(default)]
    pub remote_user: Option<RemoteUserConfig>,
    #[serde(default)]
    pub remember_me: Option<RememberMeConfig>,
    #[serde(default)]
    pub login_link: Option<LoginLinkConfig>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub logout: Option<LogoutConfig>,
    #[serde(default)]
    pub switch_user: Option<SwitchUserConfig>,
    /// Authenticator service ids.
    #[serde(default)]
    pub custom_authenticators: Vec<String>,
}

impl FirewallConfig {
    /// A firewall matching every request, without authenticators.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: None,
            methods: Vec::new(),
            stateless: false,
            lazy: false,
            provider: None,
            entry_point: None,
            erase_credentials: true,
            hide_user_not_found: true,
            required_badges: Vec::new(),
            user_checker: None,
            csrf_token_manager: None,
            http_basic: None,
            form_login: None,
            json_login: None,
            access_token: None,
            x509: None,
            remote_user: None,
            remember_me: None,
            login_link: None,
            anonymous: false,
            logout: None,
            switch_user: None,
            custom_authenticators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpBasicConfig {
    #[serde(default = "default_realm")]
    pub realm: String,
}

impl Default for HttpBasicConfig {
    fn default() -> Self {
        Self {
            realm: default_realm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormLoginConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_check_path")]
    pub check_path: String,
    #[serde(default = "default_username_parameter")]
    pub username_parameter: String,
    #[serde(default = "default_password_parameter")]
    pub password_parameter: String,
    #[serde(default = "default_csrf_parameter")]
    pub csrf_parameter: String,
    #[serde(default = "default_csrf_token_id")]
    pub csrf_token_id: String,
    #[serde(default)]
    pub enable_csrf: bool,
    #[serde(default = "default_true")]
    pub post_only: bool,
    #[serde(default = "default_target_path")]
    pub default_target_path: String,
    #[serde(default)]
    pub always_use_default_target_path: bool,
    /// Redirect target on failure, the login path when absent.
    #[serde(default)]
    pub failure_path: Option<String>,
}

impl Default for FormLoginConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            check_path: default_check_path(),
            username_parameter: default_username_parameter(),
            password_parameter: default_password_parameter(),
            csrf_parameter: default_csrf_parameter(),
            csrf_token_id: default_csrf_token_id(),
            enable_csrf: false,
            post_only: true,
            default_target_path: default_target_path(),
            always_use_default_target_path: false,
            failure_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonLoginConfig {
    /// Restrict to this path; any JSON request is a candidate otherwise.
    #[serde(default)]
    pub check_path: Option<String>,
    /// Dotted path of the username in the body.
    #[serde(default = "default_username_path")]
    pub username_path: String,
    #[serde(default = "default_password_path")]
    pub password_path: String,
}

impl Default for JsonLoginConfig {
    fn default() -> Self {
        Self {
            check_path: None,
            username_path: default_username_path(),
            password_path: default_password_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenConfig {
    /// `jwt`, `api_key` or a registered token handler service id.
    pub token_handler: String,
    /// `header`, `query_string` or `request_body`, tried in order.
    #[serde(default = "default_extractors")]
    pub extractors: Vec<String>,
    #[serde(default)]
    pub realm: Option<String>,
    /// Provider overriding loaders that token handlers mark as fallback.
    #[serde(default)]
    pub user_provider: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct X509Config {
    #[serde(default = "default_x509_user")]
    pub user: String,
    #[serde(default = "default_x509_credentials")]
    pub credentials: String,
    #[serde(default = "default_x509_identifier")]
    pub user_identifier: String,
}

impl Default for X509Config {
    fn default() -> Self {
        Self {
            user: default_x509_user(),
            credentials: default_x509_credentials(),
            user_identifier: default_x509_identifier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUserConfig {
    #[serde(default = "default_remote_user")]
    pub user: String,
}

impl Default for RemoteUserConfig {
    fn default() -> Self {
        Self {
            user: default_remote_user(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RememberMeConfig {
    pub secret: String,
    /// Cookie lifetime in seconds.
    #[serde(default = "default_remember_me_lifetime")]
    pub lifetime: i64,
    #[serde(default = "default_remember_me_name")]
    pub name: String,
    #[serde(default = "default_remember_me_parameter")]
    pub remember_me_parameter: String,
    #[serde(default)]
    pub always_remember_me: bool,
    /// Persistent token storage: `in_memory` or a registered service id.
    /// Signed cookies are used when unset.
    #[serde(default)]
    pub token_provider: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginLinkConfig {
    #[serde(default = "default_login_link_check_path")]
    pub check_path: String,
    pub secret: String,
    /// Link lifetime in seconds.
    #[serde(default = "default_login_link_lifetime")]
    pub lifetime: i64,
    #[serde(default = "default_target_path")]
    pub default_target_path: String,
    #[serde(default = "default_login_path")]
    pub failure_path: String,
    /// How often one link may be consumed, unlimited when unset.
    #[serde(default)]
    pub max_uses: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutConfig {
    #[serde(default = "default_logout_path")]
    pub path: String,
    #[serde(default = "default_target_path")]
    pub target: String,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            path: default_logout_path(),
            target: default_target_path(),
        }
    }
}

/// Impersonation through a query parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchUserConfig {
    #[serde(default = "default_switch_user_parameter")]
    pub parameter: String,
    /// Attribute the impersonator must be granted.
    #[serde(default = "default_switch_user_role")]
    pub role: String,
}

impl Default for SwitchUserConfig {
    fn default() -> Self {
        Self {
            parameter: default_switch_user_parameter(),
            role: default_switch_user_role(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessDecisionManagerConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Replaces the whole manager.
    #[serde(default)]
    pub service: Option<String>,
    /// Replaces the named strategy.
    #[serde(default)]
    pub strategy_service: Option<String>,
    #[serde(default)]
    pub allow_if_all_abstain: bool,
    #[serde(default = "default_true")]
    pub allow_if_equal_granted_denied: bool,
    #[serde(default)]
    pub strategy_resolvers: Vec<String>,
}

impl Default for AccessDecisionManagerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            service: None,
            strategy_service: None,
            allow_if_all_abstain: false,
            allow_if_equal_granted_denied: true,
            strategy_resolvers: Vec::new(),
        }
    }
}

/// Roles required for paths matching `path`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessControlRule {
    pub path: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Claim holding the user identifier.
    #[serde(default = "default_identifier_claim")]
    pub identifier_claim: String,
}

/// API key configuration from config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfiguredApiKey {
    /// Unique ID for the key.
    pub id: String,
    /// The actual API key value.
    pub key: String,
    /// Client the key authenticates as.
    pub client_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_realm() -> String {
    "Secured Area".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_check_path() -> String {
    "/login_check".to_string()
}

fn default_username_parameter() -> String {
    "_username".to_string()
}

fn default_password_parameter() -> String {
    "_password".to_string()
}

fn default_csrf_parameter() -> String {
    "_csrf_token".to_string()
}

fn default_csrf_token_id() -> String {
    "authenticate".to_string()
}

fn default_target_path() -> String {
    "/".to_string()
}

fn default_username_path() -> String {
    "username".to_string()
}

fn default_password_path() -> String {
    "password".to_string()
}

fn default_extractors() -> Vec<String> {
    vec!["header".to_string()]
}

fn default_x509_user() -> String {
    "SSL_CLIENT_S_DN_Email".to_string()
}

fn default_x509_credentials() -> String {
    "SSL_CLIENT_S_DN".to_string()
}

fn default_x509_identifier() -> String {
    "emailAddress".to_string()
}

fn default_remote_user() -> String {
    "REMOTE_USER".to_string()
}

fn default_remember_me_lifetime() -> i64 {
    31_536_000
}

fn default_remember_me_name() -> String {
    "REMEMBERME".to_string()
}

fn default_remember_me_parameter() -> String {
    "_remember_me".to_string()
}

fn default_login_link_check_path() -> String {
    "/login_check".to_string()
}

fn default_login_link_lifetime() -> i64 {
    600
}

fn default_logout_path() -> String {
    "/logout".to_string()
}

fn default_switch_user_parameter() -> String {
    "_switch_user".to_string()
}

fn default_switch_user_role() -> String {
    "ROLE_ALLOWED_TO_SWITCH".to_string()
}

fn default_session_ttl() -> u64 {
    1800
}

fn default_max_sessions() -> u64 {
    10_000
}

fn default_strategy() -> String {
    "affirmative".to_string()
}

fn default_issuer() -> String {
    "shield-guard".to_string()
}

fn default_identifier_claim() -> String {
    "sub".to_string()
}

impl SecurityConfig {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SHIELD_*)
    /// 2. config/local.* (if exists)
    /// 3. config/default.* (if exists)
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SHIELD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Parse a YAML document, without files or environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        ConfigLoader::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }

    pub fn firewall(&self, name: &str) -> Option<&FirewallConfig> {
        self.firewalls.iter().find(|f| f.name == name)
    }
}
