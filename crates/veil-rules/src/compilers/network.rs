//! Network rules
//!
//! Traffic-level protections applied to every request, except on pages under
//! an excluded top entity. A capability may need several sibling rules; the
//! siblings share one exclusion list.

use async_trait::async_trait;
use std::sync::Arc;

use veil_settings::{Capability, Entity, RuleCategory};

use crate::compilers::{Resolution, RuleCompiler};
use crate::engine::RuleEngine;
use crate::ids::IdRegistry;
use crate::list::include_in_list;
use crate::rule::{
    priority_for, HeaderMatch, HeaderOp, QueryTransform, ResourceKind, Rule, RuleAction,
    RuleCondition, RuleId, RuleUpdate,
};
use crate::Result;

pub const USER_AGENT_FULL_VERSION_LIST: &str =
    r#"Google Chrome;v="141.0.0.0", Not?A_Brand;v="8.0.0.0", Chromium;v="141.0.0.0""#;
pub const USER_AGENT_FULL_VERSION: &str = "141.0.0.0";

const TRACKING_PARAMETERS: [&str; 23] = [
    "__hsfp",
    "__hssc",
    "__hstc",
    "__s",
    "_hsenc",
    "_openstat",
    "dclid",
    "fbclid",
    "gclid",
    "hsCtaTracking",
    "mc_eid",
    "mkt_tok",
    "ml_subscriber",
    "ml_subscriber_hash",
    "msclkid",
    "oly_anon_id",
    "oly_enc_id",
    "rb_clickid",
    "s_cid",
    "vero_conv",
    "vero_id",
    "wickedid",
    "yclid",
];

const STRICT_REFERRER_POLICIES: [&str; 4] = ["no-referrer", "origin", "same-origin", "strict-origin"];

fn request_headers(ops: Vec<HeaderOp>) -> RuleAction {
    RuleAction::ModifyHeaders {
        request_headers: ops,
        response_headers: Vec::new(),
    }
}

fn remove_request_headers(headers: &[&str]) -> RuleAction {
    request_headers(headers.iter().map(|h| HeaderOp::remove(*h)).collect())
}

fn set_response_header(header: &str, value: &str) -> RuleAction {
    RuleAction::ModifyHeaders {
        request_headers: Vec::new(),
        response_headers: vec![HeaderOp::set(header, value)],
    }
}

/// Action and extra condition of each sibling rule
fn sibling_templates(capability: Capability, accept_language: &str) -> Vec<(RuleAction, RuleCondition)> {
    let plain = |action| vec![(action, RuleCondition::default())];

    match capability {
        Capability::Gpc => plain(request_headers(vec![HeaderOp::set("Sec-GPC", "1")])),
        Capability::Useragent => plain(request_headers(vec![
            HeaderOp::set("Sec-CH-UA-Full-Version-List", USER_AGENT_FULL_VERSION_LIST),
            HeaderOp::set("Sec-CH-UA-Full-Version", USER_AGENT_FULL_VERSION),
        ])),
        Capability::QueryParameters => plain(RuleAction::Redirect {
            transform: Some(QueryTransform {
                remove_params: TRACKING_PARAMETERS.iter().map(|p| p.to_string()).collect(),
            }),
            regex_substitution: None,
        }),
        Capability::Network => plain(remove_request_headers(&[
            "Downlink",
            "ECT",
            "RTT",
            "Save-Data",
            "Sec-CH-ECT",
        ])),
        Capability::Screen => plain(remove_request_headers(&[
            "DPR",
            "Sec-CH-Viewport-Height",
            "Sec-CH-Viewport-Width",
            "Sec-CH-DPR",
            "Viewport-Width",
        ])),
        Capability::Display => plain(remove_request_headers(&[
            "Sec-CH-Prefers-Color-Scheme",
            "Sec-CH-Prefers-Reduced-Motion",
            "Sec-CH-Prefers-Reduced-Transparency",
        ])),
        Capability::Language => plain(request_headers(vec![HeaderOp::set(
            "Accept-Language",
            accept_language,
        )])),
        Capability::Memory => plain(remove_request_headers(&["Device-Memory", "Sec-CH-Device-Memory"])),
        Capability::ReferrerPolicy => vec![
            (
                set_response_header("referrer-policy", "strict-origin-when-cross-origin"),
                RuleCondition {
                    excluded_response_headers: Some(vec![HeaderMatch::new(
                        "referrer-policy",
                        &STRICT_REFERRER_POLICIES,
                    )]),
                    ..Default::default()
                },
            ),
            (
                set_response_header("referrer-policy", "strict-origin"),
                RuleCondition {
                    response_headers: Some(vec![HeaderMatch::new("referrer-policy", &["origin"])]),
                    ..Default::default()
                },
            ),
        ],
        _ => Vec::new(),
    }
}

/// Registry qualifiers of a capability's siblings: the capability name, or
/// the name suffixed with the sibling index when there are several.
pub(crate) fn sibling_qualifiers(capability: Capability) -> Vec<String> {
    let count = sibling_templates(capability, "").len();
    match count {
        0 => Vec::new(),
        1 => vec![capability.as_str().to_string()],
        n => (0..n).map(|i| format!("{}{}", capability.as_str(), i)).collect(),
    }
}

pub struct NetworkCompiler {
    ids: Arc<IdRegistry>,
    accept_language: String,
}

impl NetworkCompiler {
    pub fn new(ids: Arc<IdRegistry>, accept_language: impl Into<String>) -> Self {
        Self {
            ids,
            accept_language: accept_language.into(),
        }
    }

    fn sibling_ids(&self, capability: Capability) -> Vec<RuleId> {
        sibling_qualifiers(capability)
            .iter()
            .map(|q| self.ids.id_for(RuleCategory::Network, q))
            .collect()
    }

    /// Fresh sibling rules with no exclusions
    pub fn templates(&self, capability: Capability) -> Vec<Rule> {
        self.sibling_ids(capability)
            .into_iter()
            .zip(sibling_templates(capability, &self.accept_language))
            .map(|(id, (action, condition))| Rule {
                id,
                priority: priority_for(RuleCategory::Network),
                action,
                condition: RuleCondition {
                    resource_kinds: Some(ResourceKind::ALL.to_vec()),
                    ..condition
                },
            })
            .collect()
    }
}

#[async_trait]
impl RuleCompiler for NetworkCompiler {
    fn category(&self) -> RuleCategory {
        RuleCategory::Network
    }

    fn rule_ids(&self, _entity: &Entity, capability: Capability) -> Vec<RuleId> {
        self.sibling_ids(capability)
    }

    async fn compile(
        &self,
        engine: &dyn RuleEngine,
        resolution: &Resolution,
    ) -> Result<Option<RuleUpdate>> {
        let ids = self.sibling_ids(resolution.capability);
        if ids.is_empty() {
            return Ok(None);
        }

        if !resolution.global {
            return Ok(Some(RuleUpdate::new(ids, Vec::new())));
        }

        let installed = engine.query_rules(&ids).await?;
        let shared_excluded = installed
            .first()
            .and_then(|rule| rule.condition.excluded_top_entities.clone());

        let mut rules: Vec<Rule> = self
            .templates(resolution.capability)
            .into_iter()
            .map(|template| {
                match installed.iter().find(|rule| rule.id == template.id) {
                    Some(rule) => rule.clone(),
                    None => Rule {
                        condition: RuleCondition {
                            excluded_top_entities: shared_excluded.clone(),
                            ..template.condition
                        },
                        ..template
                    },
                }
            })
            .collect();

        if let Entity::Domain(domain) = &resolution.entity {
            for rule in &mut rules {
                rule.condition.excluded_top_entities = include_in_list(
                    rule.condition.excluded_top_entities.take(),
                    domain,
                    !resolution.value,
                );
            }
        }

        Ok(Some(RuleUpdate::new(ids, rules)))
    }

    fn default_rules(&self) -> Vec<Rule> {
        Capability::in_category(RuleCategory::Network)
            .flat_map(|capability| self.templates(capability))
            .collect()
    }
}
