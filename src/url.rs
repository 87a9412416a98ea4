//! Minimal parsing of fetcher URLs (`apt://hello;param=value`).

use std::collections::BTreeMap;

use crate::error::{FetchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchUrl {
    raw: String,
    scheme: String,
    /// Everything after `scheme://`, without `;` parameters.
    location: String,
    host: String,
    params: BTreeMap<String, String>,
}

impl FetchUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' separator"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(invalid("malformed scheme"));
        }

        let mut parts = rest.split(';');
        let location = parts.next().unwrap_or_default().trim();
        if location.is_empty() {
            return Err(invalid("empty location"));
        }

        let mut params = BTreeMap::new();
        for param in parts.filter(|p| !p.is_empty()) {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| invalid("parameter without '='"))?;
            params.insert(key.to_string(), value.to_string());
        }

        let host = location
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        // The host becomes a storage directory name.
        if matches!(host.trim(), "" | "." | "..") {
            return Err(invalid("host must name a package"));
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
            host,
            params,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for FetchUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_package() {
        let url = FetchUrl::parse("apt://hello").unwrap();
        assert_eq!(url.scheme(), "apt");
        assert_eq!(url.location(), "hello");
        assert_eq!(url.host(), "hello");
    }

    #[test]
    fn test_parse_pinned_version_and_params() {
        let url = FetchUrl::parse("apt://hello=2.10-3;unpack=0").unwrap();
        assert_eq!(url.location(), "hello=2.10-3");
        assert_eq!(url.host(), "hello=2.10-3");
        assert_eq!(url.param("unpack"), Some("0"));
        assert_eq!(url.to_string(), "apt://hello=2.10-3;unpack=0");
    }

    #[test]
    fn test_rejects_hosts_that_escape_storage_dir() {
        for raw in ["apt://..", "apt://.", "apt://../hello", "apt:///hello", "apt://..;unpack=0"] {
            let err = FetchUrl::parse(raw).unwrap_err();
            assert!(matches!(err, FetchError::InvalidUrl { .. }), "{raw}");
        }
        assert_eq!(FetchUrl::parse("apt://..hello").unwrap().host(), "..hello");
    }

    #[test]
    fn test_rejects_malformed_urls() {
        for raw in ["hello", "://hello", "apt://", "apt://hello;novalue"] {
            let err = FetchUrl::parse(raw).unwrap_err();
            assert!(matches!(err, FetchError::InvalidUrl { .. }), "{raw}");
        }
    }
}
