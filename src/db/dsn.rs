//! DSN handling.
//!
//! Two jobs:
//! - [`parse_addr`] derives the `host:port` identity used to name breakers.
//! - [`driver_url`] turns a Go-driver style DSN
//!   (`user:pass@tcp(host:port)/db?k=v`) into the URL form the sqlx driver expects.
//!
//! URL-form DSNs (`mysql://`, `postgres://`, `sqlite:`) are accepted as-is.

use crate::error::{DbError, DbResult};
use tracing::debug;
use url::Url;

const MYSQL_DEFAULT_PORT: u16 = 3306;
const POSTGRES_DEFAULT_PORT: u16 = 5432;

const TCP_MARKER: &str = "tcp(";
const UNIX_MARKER: &str = "unix(";

/// Extract the normalized `host:port` of a DSN.
///
/// The last `@` before the `tcp(` marker separates the credentials, so passwords may
/// contain `@`. Returns an empty string when the DSN does not have the expected shape;
/// callers treat that as "no usable breaker key".
pub fn parse_addr(dsn: &str) -> String {
    if is_url_form(dsn) {
        return url_addr(dsn).unwrap_or_default();
    }
    go_dsn_addr(dsn).unwrap_or_default()
}

fn go_dsn_addr(dsn: &str) -> Option<String> {
    let start = match dsn.rfind(&format!("@{TCP_MARKER}")) {
        Some(at) => at + 1 + TCP_MARKER.len(),
        None if dsn.starts_with(TCP_MARKER) => TCP_MARKER.len(),
        None => return None,
    };
    let len = dsn[start..].find(')')?;
    normalize_host_port(&dsn[start..start + len], MYSQL_DEFAULT_PORT)
}

fn url_addr(dsn: &str) -> Option<String> {
    let url = Url::parse(dsn).ok()?;
    let default_port = match url.scheme() {
        "mysql" | "mariadb" => MYSQL_DEFAULT_PORT,
        "postgres" | "postgresql" => POSTGRES_DEFAULT_PORT,
        _ => return None,
    };
    let host = url.host_str().filter(|h| !h.is_empty())?;
    let port = url.port().unwrap_or(default_port);
    Some(format!("{host}:{port}"))
}

/// Validate `host[:port]` and add the default port when missing.
fn normalize_host_port(addr: &str, default_port: u16) -> Option<String> {
    let addr = addr.trim();
    if addr.is_empty() || addr.contains(['@', '/', ' ']) {
        return None;
    }
    // Bracketed IPv6: [::1] or [::1]:3306
    if let Some(rest) = addr.strip_prefix('[') {
        let close = rest.find(']')?;
        return match &rest[close + 1..] {
            "" => Some(format!("{addr}:{default_port}")),
            port => port
                .strip_prefix(':')
                .filter(|p| p.parse::<u16>().is_ok())
                .map(|_| addr.to_string()),
        };
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Some(addr.to_string())
        }
        Some(_) => None,
        None => Some(format!("{addr}:{default_port}")),
    }
}

fn is_url_form(dsn: &str) -> bool {
    let lower = dsn.trim_start().to_ascii_lowercase();
    ["mysql://", "mariadb://", "postgres://", "postgresql://", "sqlite:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Convert a DSN into the URL handed to the driver.
///
/// Query parameters pass through untouched except `charset`, which the Go driver
/// accepts as a fallback list (`utf8mb4,utf8`) and sqlx takes as a single value.
pub fn driver_url(dsn: &str) -> DbResult<String> {
    let dsn = dsn.trim();
    if is_url_form(dsn) {
        return Ok(dsn.to_string());
    }

    let invalid = |reason: &str| {
        DbError::invalid_input(format!(
            "Invalid DSN ({reason}); expected user:password@tcp(host:port)/database?params"
        ))
    };

    let (body, params) = match dsn.split_once('?') {
        Some((body, params)) => (body, Some(params)),
        None => (dsn, None),
    };
    let slash = body.rfind('/').ok_or_else(|| invalid("missing /database"))?;
    let (head, database) = (&body[..slash], &body[slash + 1..]);

    let (credentials, net) = match head.rfind('@') {
        Some(at) => (Some(&head[..at]), &head[at + 1..]),
        None => (None, head),
    };

    let mut socket = None;
    let addr = if let Some(inner) = net.strip_prefix(TCP_MARKER) {
        let inner = inner.strip_suffix(')').ok_or_else(|| invalid("unclosed tcp("))?;
        normalize_host_port(inner, MYSQL_DEFAULT_PORT)
            .ok_or_else(|| invalid("bad host:port"))?
    } else if let Some(inner) = net.strip_prefix(UNIX_MARKER) {
        let path = inner.strip_suffix(')').ok_or_else(|| invalid("unclosed unix("))?;
        socket = Some(path.to_string());
        format!("localhost:{MYSQL_DEFAULT_PORT}")
    } else if net.is_empty() {
        format!("127.0.0.1:{MYSQL_DEFAULT_PORT}")
    } else {
        return Err(invalid("unsupported network, use tcp(...) or unix(...)"));
    };

    let mut url = Url::parse(&format!("mysql://{addr}/"))
        .map_err(|e| invalid(&format!("bad address: {e}")))?;
    if let Some(credentials) = credentials {
        let (user, password) = match credentials.split_once(':') {
            Some((user, password)) => (user, Some(password)),
            None => (credentials, None),
        };
        url.set_username(user)
            .map_err(|_| invalid("username not accepted"))?;
        url.set_password(password)
            .map_err(|_| invalid("password not accepted"))?;
    }
    url.set_path(database);

    let mut pairs: Vec<(String, String)> = params
        .map(|p| {
            url::form_urlencoded::parse(p.as_bytes())
                .into_owned()
                .map(|(k, v)| {
                    if k == "charset" {
                        let first = v.split(',').next().unwrap_or_default().to_string();
                        (k, first)
                    } else {
                        (k, v)
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if let Some(socket) = socket {
        pairs.push(("socket".to_string(), socket));
    }
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }

    debug!(addr = %addr, database = %database, "Translated DSN to driver URL");
    Ok(url.to_string())
}
