//! Forward/reverse flow assembly.

use crate::cookie::Direction;
use crate::flow::{Flow, FlowState};
use crate::TypeError;
use serde::{Deserialize, Serialize};

/// Forward and reverse halves of one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPair {
    pub forward: Flow,
    pub reverse: Flow,
}

impl FlowPair {
    pub fn new(forward: Flow, reverse: Flow) -> Self {
        Self { forward, reverse }
    }

    pub fn flow_id(&self) -> &str {
        &self.forward.flow_id
    }

    /// State of the pair, taken from the forward half.
    pub fn state(&self) -> FlowState {
        self.forward.state
    }

    pub fn set_state(&mut self, state: FlowState) {
        self.forward.state = state;
        self.reverse.state = state;
    }

    pub fn get(&self, direction: Direction) -> &Flow {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    /// Both halves, forward first.
    pub fn halves(&self) -> [(Direction, &Flow); 2] {
        [
            (Direction::Forward, &self.forward),
            (Direction::Reverse, &self.reverse),
        ]
    }
}

/// Collects the two halves of a flow arriving independently.
///
/// Each half is classified by its cookie, so the records may arrive in any
/// order. One `BidirectionalFlow` is used per flow id.
#[derive(Debug, Clone)]
pub struct BidirectionalFlow {
    flow_id: String,
    forward: Option<Flow>,
    reverse: Option<Flow>,
}

impl BidirectionalFlow {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            forward: None,
            reverse: None,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Adds one half.
    ///
    /// # Errors
    ///
    /// Fails if the flow belongs to another flow id, carries an invalid
    /// cookie, or its direction is already filled.
    pub fn add(&mut self, flow: Flow) -> Result<(), TypeError> {
        if flow.flow_id != self.flow_id {
            return Err(TypeError::invalid_argument(format!(
                "flow {} does not belong to pair {}",
                flow.flow_id, self.flow_id
            )));
        }
        let direction = flow.direction()?;
        let slot = match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        };
        if slot.is_some() {
            return Err(TypeError::DuplicateDirection {
                flow_id: self.flow_id.clone(),
                direction,
            });
        }
        *slot = Some(flow);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.forward.is_some() && self.reverse.is_some()
    }

    /// Returns the assembled pair.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::IncompletePair`] naming every missing half.
    pub fn finalize(self) -> Result<FlowPair, TypeError> {
        match (self.forward, self.reverse) {
            (Some(forward), Some(reverse)) => Ok(FlowPair::new(forward, reverse)),
            (forward, reverse) => {
                let mut missing = Vec::new();
                if forward.is_none() {
                    missing.push(Direction::Forward);
                }
                if reverse.is_none() {
                    missing.push(Direction::Reverse);
                }
                Err(TypeError::IncompletePair {
                    flow_id: self.flow_id,
                    missing,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::Cookie;
    use pretty_assertions::assert_eq;

    fn half(flow_id: &str, direction: Direction) -> Flow {
        let mut flow = Flow::new(flow_id);
        flow.cookie = Cookie::encode(5, direction);
        flow.bandwidth = 1000;
        flow
    }

    #[test]
    fn test_pair_any_order() {
        let forward = half("f1", Direction::Forward);
        let reverse = half("f1", Direction::Reverse);

        let mut pairer = BidirectionalFlow::new("f1");
        pairer.add(reverse.clone()).unwrap();
        assert!(!pairer.is_complete());
        pairer.add(forward.clone()).unwrap();

        let pair = pairer.finalize().unwrap();
        assert_eq!(pair.forward, forward);
        assert_eq!(pair.reverse, reverse);
    }

    #[test]
    fn test_duplicate_direction() {
        let mut pairer = BidirectionalFlow::new("f1");
        pairer.add(half("f1", Direction::Forward)).unwrap();
        let err = pairer.add(half("f1", Direction::Forward)).unwrap_err();
        assert_eq!(
            err,
            TypeError::DuplicateDirection {
                flow_id: "f1".to_string(),
                direction: Direction::Forward,
            }
        );
        assert_eq!(err.to_string(), "the flow(f1) for forward is already set");
    }

    #[test]
    fn test_incomplete() {
        let err = BidirectionalFlow::new("f1").finalize().unwrap_err();
        assert_eq!(
            err,
            TypeError::IncompletePair {
                flow_id: "f1".to_string(),
                missing: vec![Direction::Forward, Direction::Reverse],
            }
        );

        let mut pairer = BidirectionalFlow::new("f1");
        pairer.add(half("f1", Direction::Forward)).unwrap();
        assert!(pairer
            .finalize()
            .unwrap_err()
            .to_string()
            .ends_with("reverse is missing"));
    }

    #[test]
    fn test_foreign_flow_rejected() {
        let mut pairer = BidirectionalFlow::new("f1");
        assert!(matches!(
            pairer.add(half("f2", Direction::Forward)),
            Err(TypeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_cookie_rejected() {
        let mut flow = Flow::new("f1");
        flow.cookie = Cookie::new(Cookie::FORWARD_FLAG | Cookie::REVERSE_FLAG);
        let mut pairer = BidirectionalFlow::new("f1");
        assert!(matches!(pairer.add(flow), Err(TypeError::InvalidCookie(_))));
    }

    #[test]
    fn test_set_state() {
        let mut pair = FlowPair::new(half("f1", Direction::Forward), half("f1", Direction::Reverse));
        pair.set_state(FlowState::Up);
        assert_eq!(pair.state(), FlowState::Up);
        assert_eq!(pair.reverse.state, FlowState::Up);
    }
}
