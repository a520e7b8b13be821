//! Policy entities
//!
//! An entity is either a registrable domain or the "all entities" sentinel
//! that holds global defaults.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::{Host, Url};

use crate::error::SettingsError;
use crate::Result;

/// Storage name of the global-default entity
pub const ALL_ENTITIES: &str = "_ALL_DOMAINS_";

const MAX_DOMAIN_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    /// Global defaults; an explicit `false` here wins over every domain
    All,
    Domain(String),
}

impl Entity {
    /// Validate and normalize a domain entity
    pub fn domain(name: &str) -> Result<Self> {
        let normalized = name.trim().trim_end_matches('.').to_ascii_lowercase();

        if normalized.is_empty() || normalized.len() > MAX_DOMAIN_LEN {
            return Err(SettingsError::InvalidEntity(name.to_string()));
        }

        let labels_ok = normalized.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        });

        if !labels_ok {
            return Err(SettingsError::InvalidEntity(name.to_string()));
        }

        Ok(Entity::Domain(normalized))
    }

    /// Parse either the sentinel or a domain
    pub fn parse(name: &str) -> Result<Self> {
        if name == ALL_ENTITIES {
            Ok(Entity::All)
        } else {
            Self::domain(name)
        }
    }

    /// Registrable domain of a URL, if it has a host
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        match parsed.host()? {
            Host::Domain(host) => Self::domain(registrable_domain(host)).ok(),
            Host::Ipv4(addr) => Some(Entity::Domain(addr.to_string())),
            Host::Ipv6(addr) => Some(Entity::Domain(addr.to_string().replace(':', "-"))),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Entity::All)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Entity::All => ALL_ENTITIES,
            Entity::Domain(name) => name,
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Entity {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Entity::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Registrable domain of a host per the public suffix list; hosts that are
/// themselves a public suffix (or single-label names) stay as they are
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    psl::domain_str(host).unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_normalized() {
        assert_eq!(
            Entity::domain(" Example.COM. ").unwrap(),
            Entity::Domain("example.com".to_string())
        );
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(Entity::domain("").is_err());
        assert!(Entity::domain("exa mple.com").is_err());
        assert!(Entity::domain("example..com").is_err());
        assert!(Entity::domain("example.com:8080").is_err());
        assert!(Entity::domain(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(Entity::parse(ALL_ENTITIES).unwrap(), Entity::All);
        assert_eq!(Entity::All.to_string(), ALL_ENTITIES);
    }

    #[test]
    fn test_from_url() {
        assert_eq!(
            Entity::from_url("https://news.example.com/a?b=c"),
            Some(Entity::Domain("example.com".to_string()))
        );
        assert_eq!(
            Entity::from_url("https://www.bbc.co.uk/news"),
            Some(Entity::Domain("bbc.co.uk".to_string()))
        );
        assert_eq!(
            Entity::from_url("http://127.0.0.1:8000/"),
            Some(Entity::Domain("127.0.0.1".to_string()))
        );
        assert_eq!(
            Entity::from_url("http://localhost:3000/"),
            Some(Entity::Domain("localhost".to_string()))
        );
        assert_eq!(Entity::from_url("about:blank"), None);
        assert_eq!(Entity::from_url("not a url"), None);
    }

    #[test]
    fn test_from_url_uses_public_suffixes() {
        for (url, expected) in [
            ("https://www.foo.io/", "foo.io"),
            ("https://shop.abc.de/", "abc.de"),
            ("https://app.x.ai/", "x.ai"),
            ("https://a.b.co.uk/", "b.co.uk"),
            ("https://deep.nested.example.com.au/", "example.com.au"),
        ] {
            assert_eq!(
                Entity::from_url(url),
                Some(Entity::Domain(expected.to_string())),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_registrable_domain_of_bare_suffix() {
        assert_eq!(registrable_domain("co.uk"), "co.uk");
        assert_eq!(registrable_domain("example.com."), "example.com");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Entity::All).unwrap();
        assert_eq!(json, format!("\"{}\"", ALL_ENTITIES));
        let back: Entity = serde_json::from_str("\"example.org\"").unwrap();
        assert_eq!(back, Entity::Domain("example.org".to_string()));
        assert!(serde_json::from_str::<Entity>("\"bad domain\"").is_err());
    }
}
