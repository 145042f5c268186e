//! Common types for the flow manager control plane.
//!
//! This crate provides the type-safe building blocks shared by the flow
//! orchestration components:
//!
//! - [`Cookie`]: 64-bit rule cookie with direction flags
//! - [`Flow`]: one directional flow record
//! - [`FlowPair`] / [`BidirectionalFlow`]: forward + reverse assembly
//! - [`SwitchCommand`]: per-switch install/remove commands
//! - [`VlanId`] / [`OutputVlanType`]: VLAN validation rules
//! - [`SwitchId`]: datapath identifier of a switch

mod command;
mod cookie;
mod flow;
mod pair;
mod switch;
mod vlan;

pub use command::{
    CommandKind, EgressParams, IngressParams, InstallFlow, InstallKind, OneSwitchParams,
    RemoveFlow, SwitchCommand,
};
pub use cookie::{Cookie, Direction};
pub use flow::{Flow, FlowState, PathInfo, PathNode};
pub use pair::{BidirectionalFlow, FlowPair};
pub use switch::SwitchId;
pub use vlan::{OutputVlanType, VlanId};

/// Error type for flow type construction and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("invalid cookie flags combination in {0:#018x}: marked as forward and reverse at the same time")]
    InvalidCookie(u64),

    #[error("invalid VLAN ID: {0} (must be 0-4095)")]
    InvalidVlanId(i64),

    #[error("invalid switch id: {0:?}")]
    InvalidSwitchId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("the flow({flow_id}) for {direction} is already set")]
    DuplicateDirection { flow_id: String, direction: Direction },

    #[error("flow pair {flow_id} is incomplete: {}", describe_missing(.missing))]
    IncompletePair {
        flow_id: String,
        missing: Vec<Direction>,
    },
}

impl TypeError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        TypeError::InvalidArgument(message.into())
    }
}

fn describe_missing(missing: &[Direction]) -> String {
    missing
        .iter()
        .map(|d| format!("{} is missing", d))
        .collect::<Vec<_>>()
        .join(" and ")
}
