//! In-memory flow store.

use super::FlowRepository;
use crate::error::{FlowError, FlowResult};
use flow_types::{BidirectionalFlow, Flow, FlowPair};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Flow store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<BTreeMap<String, FlowPair>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store preloaded with existing flows.
    pub fn with_flows(pairs: impl IntoIterator<Item = FlowPair>) -> Self {
        let flows = pairs
            .into_iter()
            .map(|pair| (pair.flow_id().to_string(), pair))
            .collect();
        Self {
            flows: RwLock::new(flows),
        }
    }

    /// Creates a store from directional records, two per flow id in any
    /// order.
    ///
    /// Every record must name both endpoints and carry a path that connects
    /// them.
    pub fn from_records(records: impl IntoIterator<Item = Flow>) -> FlowResult<Self> {
        let mut pending: BTreeMap<String, BidirectionalFlow> = BTreeMap::new();
        for record in records {
            let flow_id = record.flow_id.clone();
            let (src, dst) = record
                .endpoints()
                .map_err(|e| FlowError::from(e).for_flow(&flow_id))?;
            record
                .flow_path
                .validate(src, dst)
                .map_err(|e| FlowError::from(e).for_flow(&flow_id))?;
            pending
                .entry(flow_id.clone())
                .or_insert_with(|| BidirectionalFlow::new(flow_id.clone()))
                .add(record)
                .map_err(|e| FlowError::from(e).for_flow(&flow_id))?;
        }
        let pairs = pending
            .into_values()
            .map(|pair| pair.finalize().map_err(FlowError::from))
            .collect::<FlowResult<Vec<_>>>()?;
        Ok(Self::with_flows(pairs))
    }

    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }
}

impl FlowRepository for InMemoryFlowStore {
    fn get(&self, flow_id: &str) -> Option<FlowPair> {
        self.flows.read().get(flow_id).cloned()
    }

    fn put(&self, pair: FlowPair) {
        self.flows.write().insert(pair.flow_id().to_string(), pair);
    }

    fn remove(&self, flow_id: &str) -> Option<FlowPair> {
        self.flows.write().remove(flow_id)
    }

    fn contains(&self, flow_id: &str) -> bool {
        self.flows.read().contains_key(flow_id)
    }

    fn snapshot(&self) -> Vec<FlowPair> {
        self.flows.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use flow_types::{Cookie, Direction, PathInfo, PathNode, SwitchId};
    use pretty_assertions::assert_eq;

    fn sw(id: &str) -> SwitchId {
        SwitchId::new(id).unwrap()
    }

    fn pair(flow_id: &str) -> FlowPair {
        let mut forward = Flow::new(flow_id);
        forward.source_switch = Some(sw("sw1"));
        forward.destination_switch = Some(sw("sw2"));
        forward.cookie = Cookie::encode(1, Direction::Forward);
        forward.flow_path = PathInfo::new(vec![
            PathNode::new(sw("sw1"), 1, 0),
            PathNode::new(sw("sw2"), 2, 1),
        ]);
        let reverse = forward.mirrored(Cookie::encode(1, Direction::Reverse), 0, 0);
        FlowPair::new(forward, reverse)
    }

    #[test]
    fn test_put_get_remove() {
        let store = InMemoryFlowStore::new();
        store.put(pair("f1"));
        assert!(store.contains("f1"));
        assert_eq!(store.get("f1").unwrap().flow_id(), "f1");
        assert_eq!(store.remove("f1").unwrap().flow_id(), "f1");
        assert!(store.get("f1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_ordered() {
        let store = InMemoryFlowStore::with_flows(vec![pair("b"), pair("a")]);
        let ids: Vec<String> = store
            .snapshot()
            .iter()
            .map(|p| p.flow_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        // The snapshot is a copy.
        store.remove("a");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_from_records_pairs_halves() {
        let p1 = pair("f1");
        let p2 = pair("f2");
        let records = vec![
            p2.reverse.clone(),
            p1.forward.clone(),
            p2.forward.clone(),
            p1.reverse.clone(),
        ];
        let store = InMemoryFlowStore::from_records(records).unwrap();
        assert_eq!(store.get("f1").unwrap(), p1);
        assert_eq!(store.get("f2").unwrap(), p2);
    }

    #[test]
    fn test_from_records_rejects_bad_pairs() {
        let p1 = pair("f1");
        let err = InMemoryFlowStore::from_records(vec![p1.forward.clone()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompletePair);

        let err = InMemoryFlowStore::from_records(vec![p1.forward.clone(), p1.forward.clone()])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDirection);
    }

    #[test]
    fn test_from_records_rejects_bad_path() {
        let mut p1 = pair("f1");
        p1.forward.flow_path = PathInfo::new(vec![PathNode::new(sw("sw1"), 3, 0)]);
        let err = InMemoryFlowStore::from_records(vec![p1.forward, p1.reverse]).unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidArgument { flow_id: Some(ref id), .. } if id == "f1"
        ));

        let mut p2 = pair("f2");
        p2.reverse.destination_switch = None;
        let err = InMemoryFlowStore::from_records(vec![p2.forward, p2.reverse]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
