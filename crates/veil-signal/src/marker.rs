//! Response marker
//!
//! The disabled-capability list travels to a top-level document as a cookie
//! appended to its response. The receiving context reads it once and
//! immediately expires it, so neither page scripts nor the server see it.

use serde::{Deserialize, Serialize};

use veil_settings::Capability;

pub const MARKER_NAME: &str = "__veil_disabled";

const MARKER_ATTRIBUTES: &str = "Secure; SameSite=None; Path=/; Partitioned";
const EXPIRED: &str = "Expires=Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    disabled: Vec<Capability>,
}

impl Marker {
    pub fn new<I: IntoIterator<Item = Capability>>(disabled: I) -> Self {
        let mut disabled: Vec<Capability> = disabled.into_iter().collect();
        disabled.sort();
        disabled.dedup();
        Self { disabled }
    }

    pub fn disabled(&self) -> &[Capability] {
        &self.disabled
    }

    pub fn into_disabled(self) -> Vec<Capability> {
        self.disabled
    }

    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty()
    }

    /// `name=value` pair
    pub fn cookie_pair(&self) -> String {
        let names: Vec<&str> = self.disabled.iter().map(|c| c.as_str()).collect();
        format!("{}={}", MARKER_NAME, names.join(","))
    }

    /// Full `Set-Cookie` header value
    pub fn set_cookie_value(&self) -> String {
        format!("{}; {}", self.cookie_pair(), MARKER_ATTRIBUTES)
    }

    /// Parse a `Set-Cookie` header value produced by [`Marker::set_cookie_value`]
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        Self::parse_pair(pair)
    }

    /// Read the marker from either a `Set-Cookie` value or a cookie string
    pub fn parse(input: &str) -> Option<Self> {
        Self::from_cookie_string(input)
    }

    /// Find the marker in a `Cookie`-style string (`a=1; b=2`). The last
    /// occurrence wins.
    pub fn from_cookie_string(cookies: &str) -> Option<Self> {
        cookies
            .split(';')
            .filter_map(|pair| Self::parse_pair(pair.trim()))
            .last()
    }

    fn parse_pair(pair: &str) -> Option<Self> {
        let (name, value) = pair.split_once('=')?;
        if name.trim() != MARKER_NAME {
            return None;
        }

        let disabled = value
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| match name.parse::<Capability>() {
                Ok(capability) => Some(capability),
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring unknown capability in marker");
                    None
                }
            });

        Some(Self::new(disabled))
    }

    /// Cookie directive that erases the marker after it has been read
    pub fn erase_directive() -> String {
        format!("{}=; {}; {}", MARKER_NAME, MARKER_ATTRIBUTES, EXPIRED)
    }
}
