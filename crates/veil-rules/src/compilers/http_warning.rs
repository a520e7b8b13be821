//! HTTPS-only navigation rules
//!
//! Top-level `http://` navigations are upgraded to `https://`. Hosts whose
//! secure load failed get a warning page instead, unless the user chose to
//! continue, in which case plain HTTP is allowed for them. The host lists
//! live for the session and are re-rendered into rules on every change.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use url::Url;

use veil_settings::RuleCategory;

use crate::engine::RuleEngine;
use crate::ids::IdRegistry;
use crate::rule::{priority_for, ResourceKind, Rule, RuleAction, RuleCondition, RuleId};
use crate::Result;

pub(crate) const UPGRADE_QUALIFIER: &str = "standardHttpUpgradeRule";
pub(crate) const WARNING_QUALIFIER: &str = "specialHttpWarningRule";
pub(crate) const ALLOW_QUALIFIER: &str = "specialHttpAllowRule";

const PLAIN_HTTP_PATTERN: &str = "^http://.*";

#[derive(Default)]
struct HostLists {
    warned: BTreeSet<String>,
    allowed: BTreeSet<String>,
}

pub struct HttpWarningCompiler {
    ids: Arc<IdRegistry>,
    warning_page: String,
    hosts: Mutex<HostLists>,
}

impl HttpWarningCompiler {
    /// `warning_page` receives the original URL as its `url` query parameter
    pub fn new(ids: Arc<IdRegistry>, warning_page: impl Into<String>) -> Self {
        Self {
            ids,
            warning_page: warning_page.into(),
            hosts: Mutex::new(HostLists::default()),
        }
    }

    fn id(&self, qualifier: &str) -> RuleId {
        self.ids.id_for(RuleCategory::HttpWarning, qualifier)
    }

    pub fn rule_ids(&self) -> Vec<RuleId> {
        vec![
            self.id(UPGRADE_QUALIFIER),
            self.id(WARNING_QUALIFIER),
            self.id(ALLOW_QUALIFIER),
        ]
    }

    fn plain_http(request_domains: Option<Vec<String>>) -> RuleCondition {
        RuleCondition {
            regex_filter: Some(PLAIN_HTTP_PATTERN.to_string()),
            request_domains,
            ..RuleCondition::for_kinds(&[ResourceKind::MainFrame])
        }
    }

    /// Current rules. The warning and allow rules are omitted while their
    /// host lists are empty.
    pub fn rules(&self) -> Vec<Rule> {
        let base = priority_for(RuleCategory::HttpWarning);
        let hosts = self.hosts.lock();

        let mut rules = vec![Rule {
            id: self.id(UPGRADE_QUALIFIER),
            priority: base,
            action: RuleAction::UpgradeScheme,
            condition: Self::plain_http(None),
        }];

        if !hosts.warned.is_empty() {
            rules.push(Rule {
                id: self.id(WARNING_QUALIFIER),
                priority: base + 1,
                action: RuleAction::Redirect {
                    transform: None,
                    regex_substitution: Some(format!("{}?url=\\0", self.warning_page)),
                },
                condition: Self::plain_http(Some(hosts.warned.iter().cloned().collect())),
            });
        }

        if !hosts.allowed.is_empty() {
            rules.push(Rule {
                id: self.id(ALLOW_QUALIFIER),
                priority: base + 2,
                action: RuleAction::Allow,
                condition: Self::plain_http(Some(hosts.allowed.iter().cloned().collect())),
            });
        }

        rules
    }

    pub fn warned_hosts(&self) -> Vec<String> {
        self.hosts.lock().warned.iter().cloned().collect()
    }

    pub fn allowed_hosts(&self) -> Vec<String> {
        self.hosts.lock().allowed.iter().cloned().collect()
    }

    /// A secure top-level load failed with a TLS error or a downgrade
    /// redirect. Returns `false` for URLs that are not `https://`.
    pub async fn on_secure_load_failed(&self, engine: &dyn RuleEngine, url: &str) -> Result<bool> {
        let Some(host) = host_of(url, "https") else {
            return Ok(false);
        };

        let added = self.hosts.lock().warned.insert(host.clone());
        if added {
            tracing::info!(host = %host, "Warning before plain HTTP loads");
            self.install(engine).await?;
        }
        Ok(true)
    }

    /// The user continued to a host over plain HTTP (`protection_enabled`
    /// false) or withdrew that choice. Returns `false` when the URL has no host.
    pub async fn set_exception(
        &self,
        engine: &dyn RuleEngine,
        url: &str,
        protection_enabled: bool,
    ) -> Result<bool> {
        let Some(host) = host_of(url, "") else {
            return Ok(false);
        };

        let changed = {
            let mut hosts = self.hosts.lock();
            if protection_enabled {
                hosts.allowed.remove(&host)
            } else {
                hosts.allowed.insert(host.clone())
            }
        };

        if changed {
            tracing::info!(host = %host, protection_enabled, "HTTP exception updated");
            self.install(engine).await?;
        }
        Ok(true)
    }

    /// Forget both host lists without touching the engine
    pub fn reset(&self) {
        let mut hosts = self.hosts.lock();
        hosts.warned.clear();
        hosts.allowed.clear();
    }

    async fn install(&self, engine: &dyn RuleEngine) -> Result<()> {
        engine
            .install_rules(&self.rule_ids(), &self.rules())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to install HTTP warning rules");
                e
            })?;
        Ok(())
    }
}

/// Lowercased host of `url`, optionally requiring a scheme
fn host_of(url: &str, scheme: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !scheme.is_empty() && parsed.scheme() != scheme {
        return None;
    }
    parsed.host_str().map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use crate::error::EngineError;

    const PAGE: &str = "chrome-extension://veil/http-warning.html";

    fn setup() -> (HttpWarningCompiler, InMemoryEngine) {
        (
            HttpWarningCompiler::new(Arc::new(IdRegistry::new()), PAGE),
            InMemoryEngine::new(),
        )
    }

    #[test]
    fn test_only_upgrade_rule_by_default() {
        let (compiler, _engine) = setup();
        let rules = compiler.rules();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, RuleAction::UpgradeScheme);
        assert_eq!(rules[0].priority, 3);
        assert_eq!(rules[0].condition.regex_filter.as_deref(), Some("^http://.*"));
        assert_eq!(
            rules[0].condition.resource_kinds,
            Some(vec![ResourceKind::MainFrame])
        );
    }

    #[tokio::test]
    async fn test_failed_secure_load_adds_warning() {
        let (compiler, engine) = setup();

        assert!(compiler
            .on_secure_load_failed(&engine, "https://Legacy.example.org/login")
            .await
            .unwrap());
        assert!(!compiler
            .on_secure_load_failed(&engine, "http://plain.example.org/")
            .await
            .unwrap());

        let warning = engine.get(compiler.id(WARNING_QUALIFIER)).unwrap();
        assert_eq!(warning.priority, 4);
        assert_eq!(
            warning.condition.request_domains,
            Some(vec!["legacy.example.org".to_string()])
        );
        assert_eq!(
            warning.action,
            RuleAction::Redirect {
                transform: None,
                regex_substitution: Some(format!("{}?url=\\0", PAGE)),
            }
        );
        assert!(engine.get(compiler.id(UPGRADE_QUALIFIER)).is_some());
        assert!(engine.get(compiler.id(ALLOW_QUALIFIER)).is_none());
    }

    #[tokio::test]
    async fn test_exception_round_trip() {
        let (compiler, engine) = setup();
        compiler
            .on_secure_load_failed(&engine, "https://legacy.example.org/")
            .await
            .unwrap();

        compiler
            .set_exception(&engine, "http://legacy.example.org/page", false)
            .await
            .unwrap();
        let allow = engine.get(compiler.id(ALLOW_QUALIFIER)).unwrap();
        assert_eq!(allow.priority, 5);
        assert_eq!(allow.action, RuleAction::Allow);
        assert_eq!(compiler.allowed_hosts(), vec!["legacy.example.org"]);

        compiler
            .set_exception(&engine, "http://legacy.example.org/page", true)
            .await
            .unwrap();
        assert!(engine.get(compiler.id(ALLOW_QUALIFIER)).is_none());
        assert_eq!(compiler.warned_hosts(), vec!["legacy.example.org"]);
    }

    #[tokio::test]
    async fn test_repeat_failure_installs_once() {
        let (compiler, engine) = setup();
        for _ in 0..3 {
            compiler
                .on_secure_load_failed(&engine, "https://legacy.example.org/")
                .await
                .unwrap();
        }
        assert_eq!(engine.install_calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_url_ignored() {
        let (compiler, engine) = setup();
        assert!(!compiler.set_exception(&engine, "not a url", false).await.unwrap());
        assert!(!compiler.on_secure_load_failed(&engine, "about:blank").await.unwrap());
        assert_eq!(engine.install_calls(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_surfaces() {
        let (compiler, engine) = setup();
        engine.fail_next_install(EngineError::Unavailable("restarting".into()));
        assert!(compiler
            .on_secure_load_failed(&engine, "https://legacy.example.org/")
            .await
            .is_err());
    }
}
