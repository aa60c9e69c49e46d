//! Connection options.
//!
//! A connection string is a list of `key=value` pairs separated by `;`.
//! Keys are case-insensitive and resolved through a synonym table, so
//! `Server`, `Host` and `DataSource` all set the same option. Unknown keys
//! are ignored. Values may be wrapped in single or double quotes, which
//! allows `;` inside a value.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use fb_pool::PoolConfig;
use fb_protocol::{AttachParams, Charset};
use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::transaction::IsolationLevel;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3050;

/// Whether to reach the server over the network or load it in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerType {
    /// Remote server reached over the network.
    #[default]
    Default,
    /// In-process embedded server.
    Embedded,
}

impl ServerType {
    fn code(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Embedded => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    DataSource,
    Port,
    Database,
    User,
    Password,
    Role,
    Dialect,
    Charset,
    Pooling,
    ConnectionLifetime,
    MinPoolSize,
    MaxPoolSize,
    ConnectionTimeout,
    PacketSize,
    FetchSize,
    ServerType,
    IsolationLevel,
}

static SYNONYMS: Lazy<HashMap<&'static str, Key>> = Lazy::new(|| {
    HashMap::from([
        ("data source", Key::DataSource),
        ("datasource", Key::DataSource),
        ("server", Key::DataSource),
        ("host", Key::DataSource),
        ("port number", Key::Port),
        ("port", Key::Port),
        ("database", Key::Database),
        ("initial catalog", Key::Database),
        ("user id", Key::User),
        ("user", Key::User),
        ("uid", Key::User),
        ("user name", Key::User),
        ("password", Key::Password),
        ("pwd", Key::Password),
        ("role name", Key::Role),
        ("role", Key::Role),
        ("dialect", Key::Dialect),
        ("sql dialect", Key::Dialect),
        ("charset", Key::Charset),
        ("character set", Key::Charset),
        ("pooling", Key::Pooling),
        ("connection lifetime", Key::ConnectionLifetime),
        ("min pool size", Key::MinPoolSize),
        ("max pool size", Key::MaxPoolSize),
        ("connection timeout", Key::ConnectionTimeout),
        ("timeout", Key::ConnectionTimeout),
        ("connect timeout", Key::ConnectionTimeout),
        ("packet size", Key::PacketSize),
        ("fetch size", Key::FetchSize),
        ("server type", Key::ServerType),
        ("servertype", Key::ServerType),
        ("isolation level", Key::IsolationLevel),
    ])
});

/// Validated configuration of a session and of the pool that serves it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    data_source: String,
    port: u16,
    database: String,
    user: String,
    password: String,
    role: String,
    dialect: u8,
    charset: Charset,
    pooling: bool,
    connection_lifetime: Duration,
    min_pool_size: u32,
    max_pool_size: u32,
    connection_timeout: Duration,
    packet_size: u32,
    fetch_size: u32,
    server_type: ServerType,
    isolation_level: IsolationLevel,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            role: String::new(),
            dialect: 3,
            charset: Charset::NONE,
            pooling: true,
            connection_lifetime: Duration::ZERO,
            min_pool_size: 0,
            max_pool_size: 100,
            connection_timeout: Duration::from_secs(15),
            packet_size: 8192,
            fetch_size: 200,
            server_type: ServerType::Default,
            isolation_level: IsolationLevel::ReadCommitted,
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a connection string.
    ///
    /// ```text
    /// DataSource=localhost;Database=/var/db/employee.fdb;User=SYSDBA;Password=masterkey
    /// ```
    pub fn parse(conn_str: &str) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in split_pairs(conn_str)? {
            let normalized = key.trim().to_ascii_lowercase();
            match SYNONYMS.get(normalized.as_str()) {
                Some(&key) => options.apply(key, &value)?,
                None => {
                    tracing::debug!(key = %normalized, "ignoring unknown connection string option");
                }
            }
        }
        options.decompose_database()?;
        options.validate()?;
        Ok(options)
    }

    fn apply(&mut self, key: Key, value: &str) -> Result<()> {
        match key {
            Key::DataSource => self.data_source = value.to_owned(),
            Key::Port => self.port = parse_number(value, "port number")?,
            Key::Database => self.database = value.to_owned(),
            Key::User => self.user = value.to_owned(),
            Key::Password => self.password = value.to_owned(),
            Key::Role => self.role = value.to_owned(),
            Key::Dialect => self.dialect = parse_number(value, "dialect")?,
            Key::Charset => {
                self.charset = Charset::from_name(value)
                    .ok_or_else(|| Error::Configuration(format!("unknown charset: {value}")))?;
            }
            Key::Pooling => self.pooling = parse_bool(value, "pooling")?,
            Key::ConnectionLifetime => {
                self.connection_lifetime =
                    Duration::from_secs(parse_number(value, "connection lifetime")?);
            }
            Key::MinPoolSize => self.min_pool_size = parse_number(value, "min pool size")?,
            Key::MaxPoolSize => self.max_pool_size = parse_number(value, "max pool size")?,
            Key::ConnectionTimeout => {
                self.connection_timeout =
                    Duration::from_secs(parse_number(value, "connection timeout")?);
            }
            Key::PacketSize => self.packet_size = parse_number(value, "packet size")?,
            Key::FetchSize => self.fetch_size = parse_number(value, "fetch size")?,
            Key::ServerType => {
                self.server_type = match parse_number::<u8>(value, "server type")? {
                    0 => ServerType::Default,
                    1 => ServerType::Embedded,
                    other => {
                        return Err(Error::Configuration(format!(
                            "server type must be 0 or 1, got {other}"
                        )));
                    }
                };
            }
            Key::IsolationLevel => {
                self.isolation_level = IsolationLevel::parse(value).ok_or_else(|| {
                    Error::Configuration(format!("unknown isolation level: {value}"))
                })?;
            }
        }
        Ok(())
    }

    /// Split a `host/port:path` or `//host[:port]/path` database value into
    /// its parts.
    fn decompose_database(&mut self) -> Result<()> {
        if let Some((host, port, path)) = split_locator(&self.database)? {
            self.data_source = host;
            if let Some(port) = port {
                self.port = port;
            }
            self.database = path;
        }
        Ok(())
    }

    /// Validate the options as a unit, reporting the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(Error::Configuration(message.to_owned()));

        if self.user.is_empty() {
            return fail("user id is required");
        }
        if self.password.is_empty() {
            return fail("password is required");
        }
        if self.database.is_empty() {
            return fail("database is required");
        }
        if self.data_source.is_empty() && self.server_type != ServerType::Embedded {
            return fail("data source is required for a network server");
        }
        if self.port == 0 {
            return fail("port number must be non-zero");
        }
        if !(1..=3).contains(&self.dialect) {
            return fail("dialect must be 1, 2 or 3");
        }
        if !(512..=32767).contains(&self.packet_size) {
            return fail("packet size must be between 512 and 32767");
        }
        if self.max_pool_size == 0 {
            return fail("max pool size must be greater than zero");
        }
        if self.min_pool_size > self.max_pool_size {
            return fail("min pool size must not exceed max pool size");
        }
        if self.fetch_size == 0 {
            return fail("fetch size must be greater than zero");
        }
        Ok(())
    }

    /// Canonical form of the options.
    ///
    /// Strings that differ only in key synonyms, key case, ordering or
    /// whitespace produce the same canonical form.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.render(&self.password)
    }

    /// Key of the pool serving these options. The password is replaced by
    /// a digest so keys are safe to log.
    #[must_use]
    pub fn pool_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.password.hash(&mut hasher);
        self.render(&format!("#{:016x}", hasher.finish()))
    }

    fn render(&self, password: &str) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "data source={};port number={};database={};user id={};password={};role name={};\
             dialect={};charset={};pooling={};connection lifetime={};min pool size={};\
             max pool size={};connection timeout={};packet size={};fetch size={};\
             server type={};isolation level={}",
            quote(&self.data_source),
            self.port,
            quote(&self.database),
            quote(&self.user),
            quote(password),
            quote(&self.role),
            self.dialect,
            self.charset,
            self.pooling,
            self.connection_lifetime.as_secs(),
            self.min_pool_size,
            self.max_pool_size,
            self.connection_timeout.as_secs(),
            self.packet_size,
            self.fetch_size,
            self.server_type.code(),
            self.isolation_level,
        );
        out
    }

    /// Pool configuration derived from these options.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .min_connections(self.min_pool_size)
            .max_connections(self.max_pool_size)
            .connection_lifetime(self.connection_lifetime)
            .acquire_timeout(self.connection_timeout)
    }

    /// Attach parameters derived from these options.
    #[must_use]
    pub fn attach_params(&self) -> AttachParams {
        AttachParams {
            host: self.data_source.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            role: self.role.clone(),
            charset: self.charset,
            dialect: self.dialect,
            packet_size: self.packet_size,
            embedded: self.server_type == ServerType::Embedded,
        }
    }

    /// Server host.
    #[must_use]
    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Server port.
    #[must_use]
    pub fn port_number(&self) -> u16 {
        self.port
    }

    /// Database path or alias.
    #[must_use]
    pub fn database_path(&self) -> &str {
        &self.database
    }

    /// User name.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user
    }

    /// SQL role.
    #[must_use]
    pub fn role_name(&self) -> &str {
        &self.role
    }

    /// SQL dialect.
    #[must_use]
    pub fn sql_dialect(&self) -> u8 {
        self.dialect
    }

    /// Connection character set.
    #[must_use]
    pub fn character_set(&self) -> Charset {
        self.charset
    }

    /// Whether sessions draw connections from a pool.
    #[must_use]
    pub fn is_pooling(&self) -> bool {
        self.pooling
    }

    /// Idle lifetime of pooled connections.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.connection_lifetime
    }

    /// Minimum pool size.
    #[must_use]
    pub fn min_pool(&self) -> u32 {
        self.min_pool_size
    }

    /// Maximum pool size.
    #[must_use]
    pub fn max_pool(&self) -> u32 {
        self.max_pool_size
    }

    /// Time to wait for a connection.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Rows fetched per round trip.
    #[must_use]
    pub fn fetch_batch(&self) -> u32 {
        self.fetch_size
    }

    /// Server type.
    #[must_use]
    pub fn server(&self) -> ServerType {
        self.server_type
    }

    /// Default isolation level for implicit and explicit transactions.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Set the server host.
    #[must_use]
    pub fn data_source_host(mut self, host: impl Into<String>) -> Self {
        self.data_source = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database path or alias.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the user and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the SQL role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the SQL dialect.
    #[must_use]
    pub fn dialect(mut self, dialect: u8) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the connection character set.
    #[must_use]
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn pooling(mut self, pooling: bool) -> Self {
        self.pooling = pooling;
        self
    }

    /// Set the idle lifetime of pooled connections.
    #[must_use]
    pub fn connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = lifetime;
        self
    }

    /// Set the pool bounds.
    #[must_use]
    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the network packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the fetch batch size.
    #[must_use]
    pub fn fetch_size(mut self, size: u32) -> Self {
        self.fetch_size = size;
        self
    }

    /// Set the server type.
    #[must_use]
    pub fn server_type(mut self, server_type: ServerType) -> Self {
        self.server_type = server_type;
        self
    }

    /// Set the default isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("data_source", &self.data_source)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("dialect", &self.dialect)
            .field("charset", &self.charset)
            .field("pooling", &self.pooling)
            .field("connection_lifetime", &self.connection_lifetime)
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("connection_timeout", &self.connection_timeout)
            .field("packet_size", &self.packet_size)
            .field("fetch_size", &self.fetch_size)
            .field("server_type", &self.server_type)
            .field("isolation_level", &self.isolation_level)
            .finish()
    }
}

impl std::str::FromStr for ConnectionOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a connection string into raw key/value pairs.
fn split_pairs(conn_str: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = conn_str.chars().peekable();

    loop {
        let mut key = String::new();
        let mut has_value = false;
        for c in chars.by_ref() {
            match c {
                '=' => {
                    has_value = true;
                    break;
                }
                ';' if key.trim().is_empty() => key.clear(),
                ';' => {
                    return Err(Error::Configuration(format!(
                        "invalid key-value: {}",
                        key.trim()
                    )));
                }
                _ => key.push(c),
            }
        }
        if !has_value {
            if key.trim().is_empty() {
                return Ok(pairs);
            }
            return Err(Error::Configuration(format!(
                "invalid key-value: {}",
                key.trim()
            )));
        }
        if key.trim().is_empty() {
            return Err(Error::Configuration("empty key in connection string".into()));
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('\'' | '"')) => {
                chars.next();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(Error::Configuration(format!(
                        "unterminated quoted value for {}",
                        key.trim()
                    )));
                }
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    if !c.is_whitespace() {
                        return Err(Error::Configuration(format!(
                            "unexpected text after quoted value for {}",
                            key.trim()
                        )));
                    }
                }
            }
            _ => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value = value.trim().to_owned();
            }
        }

        pairs.push((key, value));
    }
}

type Locator = (String, Option<u16>, String);

/// Decompose `host/port:path`, `host:path` and `//host[:port]/path`.
fn split_locator(database: &str) -> Result<Option<Locator>> {
    let parse_port = |port: &str| -> Result<u16> {
        port.parse()
            .map_err(|_| Error::Configuration(format!("invalid port in database: {port}")))
    };

    if let Some(rest) = database.strip_prefix("//") {
        let Some((authority, path)) = rest.split_once('/') else {
            return Err(Error::Configuration(format!(
                "database locator has no path: {database}"
            )));
        };
        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, Some(parse_port(port)?)),
            None => (authority, None),
        };
        return Ok(Some((host.to_owned(), port, path.to_owned())));
    }

    // A drive letter is part of a local path, not a host.
    let bytes = database.as_bytes();
    if bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || matches!(bytes[2], b'\\' | b'/'))
    {
        return Ok(None);
    }

    let Some((authority, path)) = database.split_once(':') else {
        return Ok(None);
    };
    if authority.is_empty() || path.is_empty() {
        return Ok(None);
    }
    let (host, port) = match authority.split_once('/') {
        Some((host, port)) => (host, Some(parse_port(port)?)),
        None => (authority, None),
    };
    Ok(Some((host.to_owned(), port, path.to_owned())))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid {what}: {value}")))
}

fn parse_bool(value: &str, what: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Configuration(format!("invalid {what}: {value}"))),
    }
}

fn quote(value: &str) -> String {
    if value.contains(';') || value.contains('=') || value.trim() != value {
        format!("\"{value}\"")
    } else {
        value.to_owned()
    }
}
