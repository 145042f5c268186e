//! Path computation over a fixed set of links.

use super::{PathComputer, PathRequest};
use crate::config::IslConfig;
use crate::error::{FlowError, FlowResult};
use async_trait::async_trait;
use flow_types::{PathInfo, PathNode, SwitchId};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone)]
struct Link {
    src_port: u32,
    dst: SwitchId,
    dst_port: u32,
    latency: u64,
    available_bandwidth: Option<i64>,
}

/// Shortest-hop path computer over configured inter-switch links.
///
/// Links are usable in both directions. Used by the standalone daemon in
/// place of the external path computation service.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    adjacency: BTreeMap<SwitchId, Vec<Link>>,
}

impl StaticTopology {
    pub fn new(isls: &[IslConfig]) -> Self {
        let mut adjacency: BTreeMap<SwitchId, Vec<Link>> = BTreeMap::new();
        for isl in isls {
            adjacency
                .entry(isl.source_switch.clone())
                .or_default()
                .push(Link {
                    src_port: isl.src_port,
                    dst: isl.target_switch.clone(),
                    dst_port: isl.dst_port,
                    latency: isl.latency,
                    available_bandwidth: isl.available_bandwidth,
                });
            adjacency
                .entry(isl.target_switch.clone())
                .or_default()
                .push(Link {
                    src_port: isl.dst_port,
                    dst: isl.source_switch.clone(),
                    dst_port: isl.src_port,
                    latency: isl.latency,
                    available_bandwidth: isl.available_bandwidth,
                });
        }
        Self { adjacency }
    }

    pub fn link_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum::<usize>() / 2
    }

    /// Breadth-first search honoring the bandwidth constraint.
    pub fn find_path(&self, request: &PathRequest) -> FlowResult<PathInfo> {
        if request.src_switch == request.dst_switch {
            return Ok(PathInfo::default());
        }

        let fits = |link: &Link| match (request.bandwidth, link.available_bandwidth) {
            (Some(needed), Some(available)) => available >= needed,
            _ => true,
        };

        let mut previous: HashMap<&SwitchId, (&SwitchId, &Link)> = HashMap::new();
        let mut queue = VecDeque::from([&request.src_switch]);
        while let Some(current) = queue.pop_front() {
            if current == &request.dst_switch {
                break;
            }
            for link in self.adjacency.get(current).into_iter().flatten() {
                if !fits(link) || link.dst == request.src_switch || previous.contains_key(&link.dst) {
                    continue;
                }
                previous.insert(&link.dst, (current, link));
                queue.push_back(&link.dst);
            }
        }

        if !previous.contains_key(&request.dst_switch) {
            return Err(FlowError::path_computation(
                &request.flow_id,
                format!(
                    "no path from {} to {}{}",
                    request.src_switch,
                    request.dst_switch,
                    request
                        .bandwidth
                        .map(|b| format!(" with bandwidth {}", b))
                        .unwrap_or_default()
                ),
            ));
        }

        let mut hops = Vec::new();
        let mut cursor = &request.dst_switch;
        while let Some((from, link)) = previous.get(cursor) {
            hops.push((*from, *link));
            cursor = *from;
        }
        hops.reverse();

        let mut latency_ns = 0;
        let mut path = Vec::with_capacity(hops.len() * 2);
        for (from, link) in hops {
            latency_ns += link.latency;
            let seq = path.len() as u32;
            path.push(PathNode::new(from.clone(), link.src_port, seq));
            path.push(PathNode::new(link.dst.clone(), link.dst_port, seq + 1));
        }
        Ok(PathInfo { latency_ns, path })
    }
}

#[async_trait]
impl PathComputer for StaticTopology {
    async fn compute(&self, request: PathRequest) -> FlowResult<PathInfo> {
        self.find_path(&request)
    }
}
