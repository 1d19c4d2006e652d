//! Connection settings resolution.
//!
//! Scripts describe connections as ordered `(key, value)` lists. This module
//! validates those lists and layers them into a [`ConnectionConfig`]:
//!
//! 1. brand default port (applied lazily by [`ConnectionConfig::port`])
//! 2. externally supplied defaults (CLI / environment)
//! 3. a previous configuration being adjusted
//! 4. the explicit settings list
//!
//! Later layers win. Nothing is applied unless the whole list is valid.

use crate::config::{DEFAULT_AUTO_DISCONNECT, DEFAULT_MAX_CONNECTIONS};
use crate::db::dialect::{Brand, Dialect};
use crate::db::pool::Fingerprint;
use crate::error::{SqlError, SqlResult};
use crate::models::Value;
use serde::Serialize;
use std::str::FromStr;

/// A single `(key, value)` setting as supplied by a script.
pub type Setting = (String, Value);

/// Which key set a settings list is parsed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsMode {
    /// A single connection owned by one context.
    Explicit,
    /// A pooling policy; accepts `maxconnections` and `autodisconnect`.
    Pooled,
}

/// Fully resolved connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    /// 0 means "use the dialect default"
    pub port: u16,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub schema: String,
    pub brand: Brand,
    pub pooled: bool,
    /// Only meaningful when `pooled`
    pub max_connections: u32,
    /// Only meaningful when `pooled`: return the connection to the pool once a
    /// statement's results have been consumed.
    pub auto_disconnect: bool,
}

impl ConnectionConfig {
    pub fn dialect(&self) -> &'static Dialect {
        self.brand.dialect()
    }

    /// Effective port: the configured one, or the brand default when 0.
    pub fn port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else {
            self.dialect().default_port()
        }
    }

    /// Driver URL including credentials.
    pub fn url(&self) -> SqlResult<String> {
        self.dialect().build_url(self)
    }

    /// Get a display-safe version of the URL (credentials masked).
    pub fn masked_url(&self) -> String {
        self.dialect().masked_url(self)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Recognized setting keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingKey {
    Host,
    Port,
    Username,
    Password,
    Schema,
    Brand,
    MaxConnections,
    AutoDisconnect,
}

impl SettingKey {
    fn parse(key: &str, mode: SettingsMode) -> SqlResult<Self> {
        let parsed = match key.trim().to_ascii_lowercase().as_str() {
            "host" => Self::Host,
            "port" => Self::Port,
            "username" | "user" => Self::Username,
            "password" => Self::Password,
            "schema" => Self::Schema,
            "brand" => Self::Brand,
            "maxconnections" if mode == SettingsMode::Pooled => Self::MaxConnections,
            "autodisconnect" if mode == SettingsMode::Pooled => Self::AutoDisconnect,
            _ => return Err(SqlError::unknown_key(key)),
        };
        Ok(parsed)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Port => "port",
            Self::Username => "username",
            Self::Password => "password",
            Self::Schema => "schema",
            Self::Brand => "brand",
            Self::MaxConnections => "maxconnections",
            Self::AutoDisconnect => "autodisconnect",
        }
    }
}

/// A partial configuration: one layer of settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsLayer {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    schema: Option<String>,
    brand: Option<Brand>,
    pooled: Option<bool>,
    max_connections: Option<u32>,
    auto_disconnect: Option<bool>,
}

impl SettingsLayer {
    /// Validate a settings list into a layer. Duplicate keys: last one wins.
    pub fn parse(mode: SettingsMode, pairs: &[Setting]) -> SqlResult<Self> {
        let mut layer = Self::default();
        for (key, value) in pairs {
            let key = SettingKey::parse(key, mode)?;
            match key {
                SettingKey::Host => layer.host = Some(required_text(key, value)?),
                SettingKey::Port => layer.port = Some(parse_port(value)?),
                SettingKey::Username => layer.username = Some(required_text(key, value)?),
                SettingKey::Password => layer.password = Some(text(key, value)?),
                SettingKey::Schema => layer.schema = Some(required_text(key, value)?),
                SettingKey::Brand => {
                    let name = required_text(key, value)?;
                    let brand = Brand::from_str(&name).map_err(|_| {
                        SqlError::invalid_value(key.name(), format!("unknown brand '{}'", name))
                    })?;
                    layer.brand = Some(brand);
                }
                SettingKey::MaxConnections => {
                    layer.max_connections = Some(parse_max_connections(value)?)
                }
                SettingKey::AutoDisconnect => {
                    layer.auto_disconnect = Some(value.as_bool().ok_or_else(|| {
                        SqlError::invalid_value(key.name(), "expected true or false")
                    })?)
                }
            }
        }
        Ok(layer)
    }

    /// Parse `key=value` strings, as given on the command line.
    pub fn parse_assignments<S: AsRef<str>>(assignments: &[S]) -> SqlResult<Self> {
        let pairs = assignments
            .iter()
            .map(|s| {
                let s = s.as_ref();
                s.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), Value::from(v.trim())))
                    .ok_or_else(|| SqlError::invalid_value(s, "expected key=value"))
            })
            .collect::<SqlResult<Vec<_>>>()?;
        Self::parse(SettingsMode::Pooled, &pairs)
    }

    /// A layer that reproduces an existing configuration exactly.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            host: Some(config.host.clone()),
            port: Some(config.port),
            username: Some(config.username.clone()),
            password: Some(config.password.clone()),
            schema: Some(config.schema.clone()),
            brand: Some(config.brand),
            pooled: Some(config.pooled),
            max_connections: Some(config.max_connections),
            auto_disconnect: Some(config.auto_disconnect),
        }
    }

    /// The endpoint part of a configuration: where to connect and as whom.
    /// Pooling fields stay unset so a lower layer decides them.
    pub fn endpoint_of(config: &ConnectionConfig) -> Self {
        Self {
            host: Some(config.host.clone()),
            port: Some(config.port),
            username: Some(config.username.clone()),
            password: Some(config.password.clone()),
            schema: Some(config.schema.clone()),
            brand: Some(config.brand),
            ..Self::default()
        }
    }

    /// Stack `over` on top of `self`; fields set in `over` win.
    pub fn merge(self, over: SettingsLayer) -> SettingsLayer {
        SettingsLayer {
            host: over.host.or(self.host),
            port: over.port.or(self.port),
            username: over.username.or(self.username),
            password: over.password.or(self.password),
            schema: over.schema.or(self.schema),
            brand: over.brand.or(self.brand),
            pooled: over.pooled.or(self.pooled),
            max_connections: over.max_connections.or(self.max_connections),
            auto_disconnect: over.auto_disconnect.or(self.auto_disconnect),
        }
    }

    /// Check mandatory keys and produce a configuration.
    pub fn resolve(self, mode: SettingsMode) -> SqlResult<ConnectionConfig> {
        let host = self.host.ok_or_else(|| SqlError::missing_key("host"))?;
        let username = self.username.ok_or_else(|| SqlError::missing_key("user"))?;
        let schema = self.schema.ok_or_else(|| SqlError::missing_key("schema"))?;
        let brand = self.brand.ok_or_else(|| SqlError::missing_key("brand"))?;
        let pooled = match mode {
            SettingsMode::Pooled => true,
            SettingsMode::Explicit => self.pooled.unwrap_or(false),
        };

        Ok(ConnectionConfig {
            host,
            port: self.port.unwrap_or(0),
            username,
            password: self.password.unwrap_or_default(),
            schema,
            brand,
            pooled,
            max_connections: self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            auto_disconnect: self.auto_disconnect.unwrap_or(DEFAULT_AUTO_DISCONNECT),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse a settings list on top of `base` and resolve it.
pub fn parse_settings(
    mode: SettingsMode,
    pairs: &[Setting],
    base: &SettingsLayer,
) -> SqlResult<ConnectionConfig> {
    let layer = SettingsLayer::parse(mode, pairs)?;
    base.clone().merge(layer).resolve(mode)
}

fn text(key: SettingKey, value: &Value) -> SqlResult<String> {
    value
        .as_text()
        .ok_or_else(|| SqlError::invalid_value(key.name(), "expected a string"))
}

fn required_text(key: SettingKey, value: &Value) -> SqlResult<String> {
    let s = text(key, value)?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(SqlError::invalid_value(key.name(), "cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn parse_port(value: &Value) -> SqlResult<u16> {
    let n = value
        .as_f64()
        .ok_or_else(|| SqlError::invalid_value("port", "expected a number"))?;
    if n.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&n) {
        return Err(SqlError::invalid_value(
            "port",
            format!("{} is not a valid port", n),
        ));
    }
    Ok(n as u16)
}

fn parse_max_connections(value: &Value) -> SqlResult<u32> {
    let n = value
        .as_f64()
        .ok_or_else(|| SqlError::invalid_value("maxconnections", "expected a number"))?;
    if n.fract() != 0.0 || n < 1.0 || n > f64::from(u32::MAX) {
        return Err(SqlError::invalid_value(
            "maxconnections",
            "must be a positive whole number",
        ));
    }
    Ok(n as u32)
}
