//! Declarative rule model
//!
//! Rules are consumed by an external evaluation engine. Only the fields the
//! compilers produce are modelled.

use serde::{Deserialize, Serialize};

use veil_settings::RuleCategory;
use veil_signal::ContextId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority of statically installed rules
pub const STATIC_PRIORITY: u32 = 1;

/// Fixed priority band of a category. Higher wins.
pub fn priority_for(category: RuleCategory) -> u32 {
    match category {
        RuleCategory::Allow | RuleCategory::ContextException | RuleCategory::HttpWarning => 3,
        RuleCategory::Network => 4,
        RuleCategory::MasterSwitch => 6,
        RuleCategory::Content => 7,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    Webtransport,
    Webbundle,
    Other,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 15] = [
        ResourceKind::MainFrame,
        ResourceKind::SubFrame,
        ResourceKind::Stylesheet,
        ResourceKind::Script,
        ResourceKind::Image,
        ResourceKind::Font,
        ResourceKind::Object,
        ResourceKind::Xmlhttprequest,
        ResourceKind::Ping,
        ResourceKind::CspReport,
        ResourceKind::Media,
        ResourceKind::Websocket,
        ResourceKind::Webtransport,
        ResourceKind::Webbundle,
        ResourceKind::Other,
    ];

    /// Document loads only
    pub const DOCUMENTS: [ResourceKind; 2] = [ResourceKind::MainFrame, ResourceKind::SubFrame];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderOperation {
    Set,
    Remove,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderOp {
    pub header: String,
    pub operation: HeaderOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl HeaderOp {
    pub fn set(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            operation: HeaderOperation::Set,
            value: Some(value.into()),
        }
    }

    pub fn remove(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            operation: HeaderOperation::Remove,
            value: None,
        }
    }

    pub fn append(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            operation: HeaderOperation::Append,
            value: Some(value.into()),
        }
    }
}

/// Response header match: header present with one of `values`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub header: String,
    pub values: Vec<String>,
}

impl HeaderMatch {
    pub fn new(header: impl Into<String>, values: &[&str]) -> Self {
        Self {
            header: header.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTransform {
    pub remove_params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    Block,
    Allow,
    #[serde(rename_all = "camelCase")]
    ModifyHeaders {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        request_headers: Vec<HeaderOp>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        response_headers: Vec<HeaderOp>,
    },
    #[serde(rename_all = "camelCase")]
    Redirect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<QueryTransform>,
        /// Target with `\0` standing for the whole `regex_filter` match
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex_substitution: Option<String>,
    },
    UpgradeScheme,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_entities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_top_entities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_ids: Option<Vec<ContextId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_kinds: Option<Vec<ResourceKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    /// Request hosts the rule is limited to, subdomains included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HeaderMatch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_response_headers: Option<Vec<HeaderMatch>>,
}

impl RuleCondition {
    pub fn for_kinds(kinds: &[ResourceKind]) -> Self {
        Self {
            resource_kinds: Some(kinds.to_vec()),
            ..Default::default()
        }
    }

    /// Context ids referenced by the condition
    pub fn context_ids(&self) -> &[ContextId] {
        self.context_ids.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl Rule {
    /// Value of the first appended/set response header with this name
    pub fn response_header_value(&self, header: &str) -> Option<&str> {
        match &self.action {
            RuleAction::ModifyHeaders {
                response_headers, ..
            } => response_headers
                .iter()
                .find(|op| op.header.eq_ignore_ascii_case(header))
                .and_then(|op| op.value.as_deref()),
            _ => None,
        }
    }
}

/// Atomic change set: remove `remove_ids`, then add `add_rules`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub remove_ids: Vec<RuleId>,
    pub add_rules: Vec<Rule>,
}

impl RuleUpdate {
    pub fn new(remove_ids: Vec<RuleId>, add_rules: Vec<Rule>) -> Self {
        Self {
            remove_ids,
            add_rules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remove_ids.is_empty() && self.add_rules.is_empty()
    }
}
