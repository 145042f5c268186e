//! Reconciliation of switch rule dumps against the flow store.
//!
//! Planning is a pure function over a store snapshot. Corrections are not
//! applied here: each affected flow gets a [`SyncAction`] that the daemon
//! routes to the flow's own partition, so they are ordered with every other
//! request for that flow.

use crate::config::FeatureToggles;
use crate::messaging::{FlowCacheSyncRequest, FlowCacheSyncResults, RuleRef, SyncCacheAction};
use flow_types::{Cookie, Direction, FlowPair, SwitchId};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One directional rule of a flow on one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    pub direction: Direction,
    pub switch_id: SwitchId,
}

/// Correction applied to one stored flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Reinstall rules on some switches and remove them from others.
    Resync {
        install: Vec<RuleTarget>,
        remove: Vec<RuleTarget>,
    },
    /// Rules are missing and the flow is no longer trusted.
    MarkDown { missing: Vec<RuleTarget> },
}

/// Outcome of planning a cache sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub results: FlowCacheSyncResults,
    /// Per-flow corrections, ordered by flow id.
    pub directives: Vec<(String, SyncAction)>,
}

#[derive(Default)]
struct Corrections {
    install: Vec<RuleTarget>,
    remove: Vec<RuleTarget>,
}

/// Compares reported switch rules against the stored flows.
pub fn plan(
    snapshot: &[FlowPair],
    request: &FlowCacheSyncRequest,
    toggles: &FeatureToggles,
) -> SyncPlan {
    let mut by_cookie: HashMap<Cookie, (&str, Direction, HashSet<SwitchId>)> = HashMap::new();
    for pair in snapshot {
        for (direction, flow) in pair.halves() {
            let switches = flow.rule_switches().into_iter().collect();
            by_cookie.insert(flow.cookie, (pair.flow_id(), direction, switches));
        }
    }

    let mut results = FlowCacheSyncResults::default();
    let mut corrections: BTreeMap<String, Corrections> = BTreeMap::new();

    for dump in &request.switch_rules {
        let reported: HashSet<Cookie> = dump.cookies.iter().copied().collect();

        for (cookie, (flow_id, direction, switches)) in &by_cookie {
            if switches.contains(&dump.switch_id) && !reported.contains(cookie) {
                results.missing_rules.push(RuleRef {
                    flow_id: Some(flow_id.to_string()),
                    switch_id: dump.switch_id.clone(),
                    cookie: *cookie,
                });
                corrections
                    .entry(flow_id.to_string())
                    .or_default()
                    .install
                    .push(RuleTarget {
                        direction: *direction,
                        switch_id: dump.switch_id.clone(),
                    });
            }
        }

        for cookie in &reported {
            if cookie.is_default_rule() {
                continue;
            }
            match by_cookie.get(cookie) {
                Some((flow_id, direction, switches)) => {
                    if !switches.contains(&dump.switch_id) {
                        results.stale_rules.push(RuleRef {
                            flow_id: Some(flow_id.to_string()),
                            switch_id: dump.switch_id.clone(),
                            cookie: *cookie,
                        });
                        corrections
                            .entry(flow_id.to_string())
                            .or_default()
                            .remove
                            .push(RuleTarget {
                                direction: *direction,
                                switch_id: dump.switch_id.clone(),
                            });
                    }
                }
                None => results.unknown_rules.push(RuleRef {
                    flow_id: None,
                    switch_id: dump.switch_id.clone(),
                    cookie: *cookie,
                }),
            }
        }
    }

    results.missing_rules.sort();
    results.stale_rules.sort();
    results.unknown_rules.sort();

    let mut directives = Vec::new();
    match request.sync_cache {
        SyncCacheAction::None => {}
        SyncCacheAction::SynchronizeCache if !toggles.sync_rules => {
            warn!("Rule synchronization is disabled, reporting only");
        }
        SyncCacheAction::SynchronizeCache => {
            for (flow_id, found) in corrections {
                results.synchronized_flows.push(flow_id.clone());
                directives.push((
                    flow_id,
                    SyncAction::Resync {
                        install: found.install,
                        remove: found.remove,
                    },
                ));
            }
        }
        SyncCacheAction::InvalidateCache => {
            for (flow_id, found) in corrections {
                if found.install.is_empty() {
                    continue;
                }
                results.invalidated_flows.push(flow_id.clone());
                directives.push((
                    flow_id,
                    SyncAction::MarkDown {
                        missing: found.install,
                    },
                ));
            }
        }
    }

    info!(
        "Cache sync: {} missing, {} stale, {} unknown rule(s), {} correction(s)",
        results.missing_rules.len(),
        results.stale_rules.len(),
        results.unknown_rules.len(),
        directives.len()
    );
    SyncPlan {
        results,
        directives,
    }
}

/// Reinstalls every rule a reconnected switch should carry.
pub fn reflow(snapshot: &[FlowPair], switch_id: &SwitchId) -> Vec<(String, SyncAction)> {
    snapshot
        .iter()
        .filter_map(|pair| {
            let install: Vec<RuleTarget> = pair
                .halves()
                .into_iter()
                .filter(|(_, flow)| flow.contains_switch(switch_id))
                .map(|(direction, _)| RuleTarget {
                    direction,
                    switch_id: switch_id.clone(),
                })
                .collect();
            (!install.is_empty()).then(|| {
                (
                    pair.flow_id().to_string(),
                    SyncAction::Resync {
                        install,
                        remove: Vec::new(),
                    },
                )
            })
        })
        .collect()
}
