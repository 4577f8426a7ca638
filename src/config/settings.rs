//! Process-level API settings, read from `AUTOREST_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_PATH: &str = "/api";
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;
pub const DEFAULT_PAGE_LENGTH: u64 = 100;
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 30;
pub const DEFAULT_AUTH_HEADER: &str = "X-API-KEY";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiSettings {
    pub base_path: String,
    /// Hard cap on `_pagelength`.
    pub max_page_size: u64,
    pub default_page_length: u64,
    /// Idle time after which a session is rolled back and discarded.
    pub session_timeout: Duration,
    /// Request header carrying the caller's numeric access level.
    pub auth_header: String,
    pub body_limit_bytes: usize,
    pub title: String,
    pub version: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_path: DEFAULT_BASE_PATH.into(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            default_page_length: DEFAULT_PAGE_LENGTH,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_MINUTES * 60),
            auth_header: DEFAULT_AUTH_HEADER.into(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            title: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl ApiSettings {
    /// Defaults overridden by `AUTOREST_BASE_PATH`, `AUTOREST_MAX_PAGE_SIZE`,
    /// `AUTOREST_DEFAULT_PAGE_LENGTH`, `AUTOREST_SESSION_TIMEOUT_MINUTES`, `AUTOREST_AUTH_HEADER`
    /// and `AUTOREST_BODY_LIMIT_BYTES`. Unparsable values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = ApiSettings::default();
        if let Some(path) = lookup("AUTOREST_BASE_PATH") {
            settings.base_path = path;
        }
        if let Some(header) = lookup("AUTOREST_AUTH_HEADER").filter(|h| !h.trim().is_empty()) {
            settings.auth_header = header;
        }
        settings.max_page_size = parse_or(&lookup, "AUTOREST_MAX_PAGE_SIZE", settings.max_page_size);
        settings.default_page_length = parse_or(&lookup, "AUTOREST_DEFAULT_PAGE_LENGTH", settings.default_page_length);
        let minutes = parse_or(&lookup, "AUTOREST_SESSION_TIMEOUT_MINUTES", DEFAULT_SESSION_TIMEOUT_MINUTES);
        settings.session_timeout = Duration::from_secs(minutes * 60);
        settings.body_limit_bytes = parse_or(&lookup, "AUTOREST_BODY_LIMIT_BYTES", settings.body_limit_bytes);
        settings
    }

    /// Base path without a trailing slash; empty when mounted at the root.
    pub fn mount_path(&self) -> &str {
        self.base_path.trim_end_matches('/')
    }

    pub fn session_timeout_minutes(&self) -> u64 {
        self.session_timeout.as_secs() / 60
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable setting");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let s = ApiSettings::default();
        assert_eq!(s.mount_path(), "/api");
        assert_eq!(s.max_page_size, 1000);
        assert_eq!(s.session_timeout_minutes(), 30);
        assert_eq!(s.auth_header, "X-API-KEY");
    }

    #[test]
    fn overrides_and_bad_values() {
        let env: HashMap<&str, &str> = [
            ("AUTOREST_BASE_PATH", "/v2/"),
            ("AUTOREST_MAX_PAGE_SIZE", "50"),
            ("AUTOREST_SESSION_TIMEOUT_MINUTES", "soon"),
        ]
        .into_iter()
        .collect();
        let s = ApiSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.mount_path(), "/v2");
        assert_eq!(s.max_page_size, 50);
        assert_eq!(s.session_timeout_minutes(), 30);
    }
}
