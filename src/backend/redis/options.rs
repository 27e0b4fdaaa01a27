//! Connection identifier parsing for the RESP client.
//!
//! Two spellings are accepted:
//!
//! - URL form: `redis://[[user]:password@]host[:port][/database]`
//! - option-list form: `host[:port][,password=..][,user=..][,defaultDatabase=N]
//!   [,connectTimeout=MS][,syncTimeout=MS]`

use crate::core::error::{SinkError, SinkResult};
use std::time::Duration;

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for the replies of one exchange.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed RESP connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database used by handles that do not request one.
    pub default_database: u32,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl RedisOptions {
    /// Options for `host:port` with everything else defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            default_database: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Parse a connection identifier.
    pub fn parse(connection_id: &str) -> SinkResult<Self> {
        let trimmed = connection_id.trim();
        if trimmed.is_empty() {
            return Err(SinkError::configuration("connection identifier is empty"));
        }

        match trimmed.strip_prefix("redis://") {
            Some(rest) => Self::parse_url(rest),
            None => Self::parse_option_list(trimmed),
        }
    }

    /// Socket address string for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn parse_url(rest: &str) -> SinkResult<Self> {
        let (userinfo, location) = match rest.rsplit_once('@') {
            Some((userinfo, location)) => (Some(userinfo), location),
            None => (None, rest),
        };

        let (endpoint, database) = match location.split_once('/') {
            Some((endpoint, "")) => (endpoint, None),
            Some((endpoint, db)) => (endpoint, Some(parse_database(db)?)),
            None => (location, None),
        };

        let mut options = parse_endpoint(endpoint)?;
        if let Some(database) = database {
            options.default_database = database;
        }

        if let Some(userinfo) = userinfo {
            let (user, password) = match userinfo.split_once(':') {
                Some((user, password)) => (user, password),
                None => ("", userinfo),
            };
            if !user.is_empty() {
                options.username = Some(user.to_string());
            }
            if !password.is_empty() {
                options.password = Some(password.to_string());
            }
        }

        Ok(options)
    }

    fn parse_option_list(list: &str) -> SinkResult<Self> {
        let mut parts = list.split(',').map(str::trim).filter(|p| !p.is_empty());
        let endpoint = parts
            .next()
            .ok_or_else(|| SinkError::configuration("connection identifier has no endpoint"))?;
        let mut options = parse_endpoint(endpoint)?;

        for part in parts {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                SinkError::configuration(format!("malformed connection option '{}'", part))
            })?;
            match name.trim() {
                "password" => options.password = Some(value.to_string()),
                "user" => options.username = Some(value.to_string()),
                "defaultDatabase" => options.default_database = parse_database(value)?,
                "connectTimeout" => options.connect_timeout = parse_millis(name, value)?,
                "syncTimeout" | "responseTimeout" => {
                    options.response_timeout = parse_millis(name, value)?
                }
                "ssl" if value.eq_ignore_ascii_case("true") => {
                    return Err(SinkError::configuration(
                        "TLS connections are not supported by the built-in client",
                    ));
                }
                other => {
                    tracing::debug!(option = other, "ignoring unknown connection option");
                }
            }
        }

        Ok(options)
    }
}

fn parse_endpoint(endpoint: &str) -> SinkResult<RedisOptions> {
    let invalid = || SinkError::configuration(format!("invalid endpoint '{}'", endpoint));

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        // [ipv6]:port
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(invalid()),
        }
    } else {
        match endpoint.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (endpoint, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };

    Ok(RedisOptions::new(host, port))
}

fn parse_database(value: &str) -> SinkResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| SinkError::configuration(format!("invalid database index '{}'", value)))
}

fn parse_millis(name: &str, value: &str) -> SinkResult<Duration> {
    value
        .trim()
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| SinkError::configuration(format!("invalid {} '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let options = RedisOptions::parse("localhost:3679").unwrap();
        assert_eq!(options, RedisOptions::new("localhost", 3679));
        assert_eq!(options.addr(), "localhost:3679");

        let options = RedisOptions::parse("cache.internal").unwrap();
        assert_eq!(options.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_url() {
        let options = RedisOptions::parse("redis://:secret@10.0.0.5:6380/4").unwrap();
        assert_eq!(options.host, "10.0.0.5");
        assert_eq!(options.port, 6380);
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.username, None);
        assert_eq!(options.default_database, 4);

        let options = RedisOptions::parse("redis://app:pw@host").unwrap();
        assert_eq!(options.username.as_deref(), Some("app"));
        assert_eq!(options.password.as_deref(), Some("pw"));
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.default_database, 0);
    }

    #[test]
    fn test_parse_option_list() {
        let options = RedisOptions::parse(
            "myredis.example.com:6380,password=abc,defaultDatabase=2,connectTimeout=250,abortConnect=false",
        )
        .unwrap();
        assert_eq!(options.host, "myredis.example.com");
        assert_eq!(options.password.as_deref(), Some("abc"));
        assert_eq!(options.default_database, 2);
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_ipv6() {
        let options = RedisOptions::parse("[::1]:7000").unwrap();
        assert_eq!(options.host, "::1");
        assert_eq!(options.port, 7000);
        assert_eq!(options.addr(), "[::1]:7000");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(RedisOptions::parse("").is_err());
        assert!(RedisOptions::parse("host:port").is_err());
        assert!(RedisOptions::parse("redis://host/abc").is_err());
        assert!(RedisOptions::parse("host,password").is_err());
        assert!(RedisOptions::parse("host,ssl=true").is_err());
        assert!(RedisOptions::parse(":6379").is_err());
    }
}
