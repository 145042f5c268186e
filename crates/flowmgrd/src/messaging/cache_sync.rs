//! Cache sync request and result messages.

use flow_types::{Cookie, SwitchId};
use serde::{Deserialize, Serialize};

/// What to do about rules that disagree with the flow cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncCacheAction {
    /// Report only.
    #[default]
    None,
    /// Reinstall missing rules and remove stale ones.
    SynchronizeCache,
    /// Mark flows with missing rules as down.
    InvalidateCache,
}

/// Rule cookies currently installed on one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRules {
    pub switch_id: SwitchId,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCacheSyncRequest {
    #[serde(default)]
    pub sync_cache: SyncCacheAction,
    #[serde(default)]
    pub switch_rules: Vec<SwitchRules>,
}

/// One rule found on a switch, or expected there.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub switch_id: SwitchId,
    pub cookie: Cookie,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCacheSyncResults {
    /// Expected on the switch but not reported.
    pub missing_rules: Vec<RuleRef>,
    /// Belongs to a known flow that no longer crosses the switch.
    pub stale_rules: Vec<RuleRef>,
    /// Matches no known flow.
    pub unknown_rules: Vec<RuleRef>,
    /// Flows queued for reinstall/removal.
    pub synchronized_flows: Vec<String>,
    /// Flows marked down.
    pub invalidated_flows: Vec<String>,
}
