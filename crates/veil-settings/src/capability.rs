//! Capability catalogue
//!
//! Every protection feature has an independent enable/disable state and
//! declares, statically, which rule categories enforce it:
//!
//! | Category          | Enforced by                                  |
//! | Content           | in-page patches, signalled per response      |
//! | Network           | request/response header and URL rewriting    |
//! | Allow             | blocker exceptions for opted-out sites       |
//! | MasterSwitch      | global allow override for opted-out sites    |
//! | ContextException  | blocker exceptions keyed by top-level context |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Ads,
    Audio,
    Battery,
    Cpu,
    Device,
    Disk,
    Display,
    Fonts,
    Gpc,
    Gpu,
    Iframe,
    Keyboard,
    Language,
    MasterSwitch,
    Math,
    Memory,
    Network,
    QueryParameters,
    ReferrerPolicy,
    Screen,
    ServiceWorker,
    SharedStorage,
    Timer,
    Timezone,
    Touch,
    Useragent,
    WindowName,
    Worker,
}

/// Rule categories, each owning a priority band and a compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Content,
    Network,
    Allow,
    MasterSwitch,
    ContextException,
    /// Session rules for HTTPS-only navigation; no capability maps here
    HttpWarning,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Content => "content_rule",
            RuleCategory::Network => "network_rule",
            RuleCategory::Allow => "allow_rule",
            RuleCategory::MasterSwitch => "master_switch",
            RuleCategory::ContextException => "context_exception",
            RuleCategory::HttpWarning => "http_warnings",
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const CONTENT: &[RuleCategory] = &[RuleCategory::Content];
const NETWORK: &[RuleCategory] = &[RuleCategory::Network];
const CONTENT_AND_NETWORK: &[RuleCategory] = &[RuleCategory::Content, RuleCategory::Network];
const BLOCKER: &[RuleCategory] = &[RuleCategory::Allow, RuleCategory::ContextException];
const MASTER: &[RuleCategory] = &[RuleCategory::MasterSwitch, RuleCategory::Content];

impl Capability {
    pub const ALL: [Capability; 28] = [
        Capability::Ads,
        Capability::Audio,
        Capability::Battery,
        Capability::Cpu,
        Capability::Device,
        Capability::Disk,
        Capability::Display,
        Capability::Fonts,
        Capability::Gpc,
        Capability::Gpu,
        Capability::Iframe,
        Capability::Keyboard,
        Capability::Language,
        Capability::MasterSwitch,
        Capability::Math,
        Capability::Memory,
        Capability::Network,
        Capability::QueryParameters,
        Capability::ReferrerPolicy,
        Capability::Screen,
        Capability::ServiceWorker,
        Capability::SharedStorage,
        Capability::Timer,
        Capability::Timezone,
        Capability::Touch,
        Capability::Useragent,
        Capability::WindowName,
        Capability::Worker,
    ];

    /// Rule categories this capability participates in
    pub fn categories(&self) -> &'static [RuleCategory] {
        match self {
            Capability::Ads => BLOCKER,
            Capability::MasterSwitch => MASTER,
            Capability::Display
            | Capability::Gpc
            | Capability::Language
            | Capability::Memory
            | Capability::Screen
            | Capability::Useragent => CONTENT_AND_NETWORK,
            Capability::Network | Capability::QueryParameters | Capability::ReferrerPolicy => {
                NETWORK
            }
            _ => CONTENT,
        }
    }

    pub fn participates_in(&self, category: RuleCategory) -> bool {
        self.categories().contains(&category)
    }

    /// Whether the capability needs enforcement inside the page
    pub fn is_in_context(&self) -> bool {
        self.participates_in(RuleCategory::Content)
    }

    /// Capabilities participating in a category, in catalogue order
    pub fn in_category(category: RuleCategory) -> impl Iterator<Item = Capability> {
        Self::ALL
            .into_iter()
            .filter(move |c| c.participates_in(category))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Ads => "ads",
            Capability::Audio => "audio",
            Capability::Battery => "battery",
            Capability::Cpu => "cpu",
            Capability::Device => "device",
            Capability::Disk => "disk",
            Capability::Display => "display",
            Capability::Fonts => "fonts",
            Capability::Gpc => "gpc",
            Capability::Gpu => "gpu",
            Capability::Iframe => "iframe",
            Capability::Keyboard => "keyboard",
            Capability::Language => "language",
            Capability::MasterSwitch => "masterSwitch",
            Capability::Math => "math",
            Capability::Memory => "memory",
            Capability::Network => "network",
            Capability::QueryParameters => "queryParameters",
            Capability::ReferrerPolicy => "referrerPolicy",
            Capability::Screen => "screen",
            Capability::ServiceWorker => "serviceWorker",
            Capability::SharedStorage => "sharedStorage",
            Capability::Timer => "timer",
            Capability::Timezone => "timezone",
            Capability::Touch => "touch",
            Capability::Useragent => "useragent",
            Capability::WindowName => "windowName",
            Capability::Worker => "worker",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(capability.as_str().parse::<Capability>(), Ok(capability));
        }
        assert!("masterswitch".parse::<Capability>().is_err());
    }

    #[test]
    fn test_serde_names_match_storage_names() {
        let json = serde_json::to_string(&Capability::QueryParameters).unwrap();
        assert_eq!(json, "\"queryParameters\"");
    }

    #[test]
    fn test_participation() {
        assert!(Capability::Gpc.participates_in(RuleCategory::Network));
        assert!(Capability::Gpc.is_in_context());
        assert!(!Capability::QueryParameters.is_in_context());
        assert!(!Capability::Ads.is_in_context());
        assert!(Capability::Ads.participates_in(RuleCategory::ContextException));
        assert!(Capability::MasterSwitch.participates_in(RuleCategory::MasterSwitch));
        assert_eq!(
            Capability::Math.categories(),
            [RuleCategory::Content].as_slice()
        );
        assert!(Capability::ALL
            .iter()
            .all(|c| !c.participates_in(RuleCategory::HttpWarning)));
    }

    #[test]
    fn test_catalogue_is_sorted_by_name() {
        let names: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
