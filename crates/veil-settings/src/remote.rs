//! Remotely published setting exceptions
//!
//! A small JSON document lists, per domain, capabilities known to break the
//! site. Those capabilities resolve to disabled for the domain unless the
//! user has stored an explicit value.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::capability::Capability;
use crate::entity::Entity;
use crate::Result;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Wire format of the remote document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub version: String,
    #[serde(default)]
    pub setting_exceptions: HashMap<String, Vec<String>>,
}

/// Validated snapshot of the remote document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteExceptions {
    version: Option<String>,
    disabled: BTreeMap<Entity, BTreeSet<Capability>>,
}

impl RemoteExceptions {
    pub fn from_config(config: &RemoteConfig) -> Self {
        let mut disabled: BTreeMap<Entity, BTreeSet<Capability>> = BTreeMap::new();

        for (domain, capabilities) in &config.setting_exceptions {
            let entity = match Entity::domain(domain) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::warn!(domain = %domain, error = %e, "Skipping remote exception");
                    continue;
                }
            };

            for name in capabilities {
                match name.parse::<Capability>() {
                    Ok(capability) => {
                        disabled.entry(entity.clone()).or_default().insert(capability);
                    }
                    Err(e) => {
                        tracing::warn!(domain = %domain, error = %e, "Skipping remote exception");
                    }
                }
            }
        }

        Self {
            version: Some(config.version.clone()),
            disabled,
        }
    }

    pub fn parse(json: &str) -> Result<Self> {
        let config: RemoteConfig = serde_json::from_str(json)?;
        Ok(Self::from_config(&config))
    }

    pub fn is_disabled(&self, entity: &Entity, capability: Capability) -> bool {
        self.disabled
            .get(entity)
            .is_some_and(|set| set.contains(&capability))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Entity, Capability)> + '_ {
        self.disabled
            .iter()
            .flat_map(|(entity, set)| set.iter().map(move |c| (entity, *c)))
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.disabled.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty()
    }
}

/// Fetches the remote document, caching it for `ttl`
pub struct RemoteConfigClient {
    url: String,
    http: reqwest::Client,
    ttl: Duration,
    cached: Mutex<Option<(Instant, RemoteExceptions)>>,
}

impl RemoteConfigClient {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cached snapshot if still fresh, otherwise a new fetch
    pub async fn latest(&self) -> Result<RemoteExceptions> {
        if let Some((fetched_at, snapshot)) = self.cached.lock().as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.fetch().await?;
        *self.cached.lock() = Some((Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    async fn fetch(&self) -> Result<RemoteExceptions> {
        let config: RemoteConfig = self
            .http
            .get(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let snapshot = RemoteExceptions::from_config(&config);

        tracing::info!(
            url = %self.url,
            version = %config.version,
            exceptions = snapshot.len(),
            "Fetched remote setting exceptions"
        );

        Ok(snapshot)
    }
}
