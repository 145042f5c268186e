//! Flow records and flow paths.

use crate::cookie::{Cookie, Direction};
use crate::switch::SwitchId;
use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a stored flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    /// Resources allocated, no rules requested yet.
    #[default]
    Allocated,
    /// Rules requested, waiting for switch acknowledgements.
    InProgress,
    /// All rules installed.
    Up,
    /// Rules known to be missing or failed.
    Down,
    /// Loaded into the cache without being installed by this instance.
    Cached,
    /// A new path is being installed.
    Rerouting,
    /// Removed from the network.
    Deleted,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::Allocated => "ALLOCATED",
            FlowState::InProgress => "IN_PROGRESS",
            FlowState::Up => "UP",
            FlowState::Down => "DOWN",
            FlowState::Cached => "CACHED",
            FlowState::Rerouting => "REROUTING",
            FlowState::Deleted => "DELETED",
        };
        write!(f, "{}", s)
    }
}

/// One port on a flow path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathNode {
    pub switch_id: SwitchId,
    pub port_no: u32,
    #[serde(default)]
    pub seq_id: u32,
}

impl PathNode {
    pub fn new(switch_id: SwitchId, port_no: u32, seq_id: u32) -> Self {
        Self {
            switch_id,
            port_no,
            seq_id,
        }
    }
}

/// Ordered list of ports a flow traverses between switches.
///
/// Nodes come in ISL pairs: `[src:out, next:in, next:out, ..., dst:in]`.
/// An empty path belongs to a one-switch flow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathInfo {
    #[serde(default)]
    pub latency_ns: u64,
    #[serde(default)]
    pub path: Vec<PathNode>,
}

impl PathInfo {
    pub fn new(path: Vec<PathNode>) -> Self {
        Self {
            latency_ns: 0,
            path,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Returns the same path walked from the other end, renumbered.
    pub fn reversed(&self) -> PathInfo {
        let path = self
            .path
            .iter()
            .rev()
            .enumerate()
            .map(|(seq, node)| PathNode::new(node.switch_id.clone(), node.port_no, seq as u32))
            .collect();
        PathInfo {
            latency_ns: self.latency_ns,
            path,
        }
    }

    /// Returns the switches on the path in traversal order, without repeats.
    pub fn switches(&self) -> Vec<SwitchId> {
        let mut switches: Vec<SwitchId> = Vec::new();
        for node in &self.path {
            if switches.last() != Some(&node.switch_id) {
                switches.push(node.switch_id.clone());
            }
        }
        switches
    }

    /// Checks the path shape against the flow endpoints.
    pub fn validate(&self, src: &SwitchId, dst: &SwitchId) -> Result<(), TypeError> {
        if self.path.is_empty() {
            if src == dst {
                return Ok(());
            }
            return Err(TypeError::invalid_argument(format!(
                "empty path between different switches {} and {}",
                src, dst
            )));
        }
        if self.path.len() % 2 != 0 {
            return Err(TypeError::invalid_argument(format!(
                "path has odd number of nodes: {}",
                self.path.len()
            )));
        }
        let first = &self.path[0].switch_id;
        let last = &self.path[self.path.len() - 1].switch_id;
        if first != src || last != dst {
            return Err(TypeError::invalid_argument(format!(
                "path {} -> {} does not connect {} -> {}",
                first, last, src, dst
            )));
        }
        // Inner nodes pair up as (in, out) on the same transit switch.
        for pair in self.path[1..self.path.len() - 1].chunks(2) {
            if pair[0].switch_id != pair[1].switch_id {
                return Err(TypeError::invalid_argument(format!(
                    "path enters {} but leaves {}",
                    pair[0].switch_id, pair[1].switch_id
                )));
            }
        }
        Ok(())
    }
}

/// One directional flow record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: String,
    #[serde(default)]
    pub bandwidth: i64,
    #[serde(default)]
    pub ignore_bandwidth: bool,
    #[serde(default)]
    pub cookie: Cookie,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(rename = "src_switch", default, skip_serializing_if = "Option::is_none")]
    pub source_switch: Option<SwitchId>,
    #[serde(rename = "dst_switch", default, skip_serializing_if = "Option::is_none")]
    pub destination_switch: Option<SwitchId>,
    #[serde(rename = "src_port", default)]
    pub source_port: u32,
    #[serde(rename = "dst_port", default)]
    pub destination_port: u32,
    #[serde(rename = "src_vlan", default)]
    pub source_vlan: u16,
    #[serde(rename = "dst_vlan", default)]
    pub destination_vlan: u16,
    #[serde(default)]
    pub meter_id: u32,
    #[serde(default)]
    pub transit_vlan: u16,
    #[serde(rename = "flowpath", default)]
    pub flow_path: PathInfo,
    #[serde(default)]
    pub state: FlowState,
}

impl Flow {
    /// Creates an empty flow record with the given id.
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            ..Default::default()
        }
    }

    /// Returns true if both endpoints are on the same switch.
    ///
    /// Two absent endpoints count as the same switch; exactly one absent
    /// endpoint does not.
    pub fn is_one_switch_flow(&self) -> bool {
        match (&self.source_switch, &self.destination_switch) {
            (Some(src), Some(dst)) => src == dst,
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns the correlation key shared with the opposite direction.
    pub fn flagless_cookie(&self) -> u32 {
        self.cookie.flagless()
    }

    /// Returns the direction encoded in the cookie.
    pub fn direction(&self) -> Result<Direction, TypeError> {
        self.cookie.direction()
    }

    pub fn is_forward(&self) -> Result<bool, TypeError> {
        self.cookie.is_forward()
    }

    pub fn is_reverse(&self) -> Result<bool, TypeError> {
        self.cookie.is_reverse()
    }

    /// Returns true if the switch is on the flow path or is an endpoint.
    pub fn contains_switch(&self, switch_id: &SwitchId) -> bool {
        self.rule_switches().iter().any(|s| s == switch_id)
    }

    /// Returns every switch that carries a rule for this flow, ingress first.
    pub fn rule_switches(&self) -> Vec<SwitchId> {
        let mut switches: Vec<SwitchId> = Vec::new();
        let candidates = self
            .source_switch
            .iter()
            .cloned()
            .chain(self.flow_path.switches())
            .chain(self.destination_switch.iter().cloned());
        for switch in candidates {
            if !switches.contains(&switch) {
                switches.push(switch);
            }
        }
        switches
    }

    /// Returns the endpoints, failing if either is unset.
    pub fn endpoints(&self) -> Result<(&SwitchId, &SwitchId), TypeError> {
        match (&self.source_switch, &self.destination_switch) {
            (Some(src), Some(dst)) => Ok((src, dst)),
            _ => Err(TypeError::invalid_argument(format!(
                "flow {} must have both src_switch and dst_switch",
                self.flow_id
            ))),
        }
    }

    /// Builds the opposite-direction record: endpoints swapped, path reversed.
    pub fn mirrored(&self, cookie: Cookie, meter_id: u32, transit_vlan: u16) -> Flow {
        Flow {
            flow_id: self.flow_id.clone(),
            bandwidth: self.bandwidth,
            ignore_bandwidth: self.ignore_bandwidth,
            cookie,
            description: self.description.clone(),
            last_updated: self.last_updated.clone(),
            source_switch: self.destination_switch.clone(),
            destination_switch: self.source_switch.clone(),
            source_port: self.destination_port,
            destination_port: self.source_port,
            source_vlan: self.destination_vlan,
            destination_vlan: self.source_vlan,
            meter_id,
            transit_vlan,
            flow_path: self.flow_path.reversed(),
            state: self.state,
        }
    }
}
