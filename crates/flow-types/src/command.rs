//! Per-switch rule commands.
//!
//! Every install command shares a common envelope (flow name, switch, ports,
//! transit VLAN) and carries a variant payload selected by the `command`
//! tag. Payloads validate themselves at construction, including when they
//! are decoded from JSON.

use crate::cookie::Cookie;
use crate::switch::SwitchId;
use crate::vlan::{OutputVlanType, VlanId};
use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ingress rule payload: match the customer VLAN, meter, push the transit tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIngressParams")]
pub struct IngressParams {
    pub input_vlan_id: u16,
    pub output_vlan_type: OutputVlanType,
    pub bandwidth: i64,
    pub meter_id: u32,
}

#[derive(Deserialize)]
struct RawIngressParams {
    #[serde(default)]
    input_vlan_id: Option<i64>,
    #[serde(default)]
    output_vlan_type: Option<OutputVlanType>,
    #[serde(default)]
    bandwidth: Option<i64>,
    #[serde(default)]
    meter_id: Option<i64>,
}

impl TryFrom<RawIngressParams> for IngressParams {
    type Error = TypeError;

    fn try_from(raw: RawIngressParams) -> Result<Self, Self::Error> {
        IngressParams::new(
            raw.input_vlan_id,
            raw.output_vlan_type,
            raw.bandwidth,
            raw.meter_id,
        )
    }
}

impl IngressParams {
    /// Builds an ingress payload.
    ///
    /// A missing input VLAN means untagged. Checks run in field order and
    /// the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the input VLAN is out of range, the output VLAN
    /// type is missing or does not fit the input VLAN, or bandwidth or meter
    /// id are missing or negative.
    pub fn new(
        input_vlan_id: Option<i64>,
        output_vlan_type: Option<OutputVlanType>,
        bandwidth: Option<i64>,
        meter_id: Option<i64>,
    ) -> Result<Self, TypeError> {
        let input_vlan = VlanId::new(input_vlan_id.unwrap_or(0))?.as_u16();

        let output_vlan_type = output_vlan_type
            .ok_or_else(|| TypeError::invalid_argument("need to set output_vlan_type"))?;
        if !output_vlan_type.is_valid_for_input(input_vlan) {
            return Err(TypeError::invalid_argument(format!(
                "invalid combination of output_vlan_type {} and input_vlan_id {}",
                output_vlan_type, input_vlan
            )));
        }

        let bandwidth = match bandwidth {
            None => return Err(TypeError::invalid_argument("need to set bandwidth")),
            Some(b) if b < 0 => {
                return Err(TypeError::invalid_argument(format!(
                    "need to set non negative bandwidth, got {}",
                    b
                )))
            }
            Some(b) => b,
        };

        let meter_id = match meter_id {
            None => return Err(TypeError::invalid_argument("need to set meter_id")),
            Some(m) => u32::try_from(m).map_err(|_| {
                TypeError::invalid_argument(format!("need to set non negative meter_id, got {}", m))
            })?,
        };

        Ok(Self {
            input_vlan_id: input_vlan,
            output_vlan_type,
            bandwidth,
            meter_id,
        })
    }
}

/// Egress rule payload: strip the transit tag, restore the customer VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEgressParams")]
pub struct EgressParams {
    pub output_vlan_id: u16,
    pub output_vlan_type: OutputVlanType,
}

#[derive(Deserialize)]
struct RawEgressParams {
    #[serde(default)]
    output_vlan_id: Option<i64>,
    #[serde(default)]
    output_vlan_type: Option<OutputVlanType>,
}

impl TryFrom<RawEgressParams> for EgressParams {
    type Error = TypeError;

    fn try_from(raw: RawEgressParams) -> Result<Self, Self::Error> {
        EgressParams::new(raw.output_vlan_id, raw.output_vlan_type)
    }
}

impl EgressParams {
    pub fn new(
        output_vlan_id: Option<i64>,
        output_vlan_type: Option<OutputVlanType>,
    ) -> Result<Self, TypeError> {
        let output_vlan = VlanId::new(output_vlan_id.unwrap_or(0))?.as_u16();
        let output_vlan_type = output_vlan_type
            .ok_or_else(|| TypeError::invalid_argument("need to set output_vlan_type"))?;
        if !output_vlan_type.is_valid_for_output(output_vlan) {
            return Err(TypeError::invalid_argument(format!(
                "invalid combination of output_vlan_type {} and output_vlan_id {}",
                output_vlan_type, output_vlan
            )));
        }
        Ok(Self {
            output_vlan_id: output_vlan,
            output_vlan_type,
        })
    }
}

/// Rule payload for a flow that enters and leaves on the same switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOneSwitchParams")]
pub struct OneSwitchParams {
    pub input_vlan_id: u16,
    pub output_vlan_id: u16,
    pub output_vlan_type: OutputVlanType,
    pub bandwidth: i64,
    pub meter_id: u32,
}

#[derive(Deserialize)]
struct RawOneSwitchParams {
    #[serde(default)]
    input_vlan_id: Option<i64>,
    #[serde(default)]
    output_vlan_id: Option<i64>,
    #[serde(default)]
    output_vlan_type: Option<OutputVlanType>,
    #[serde(default)]
    bandwidth: Option<i64>,
    #[serde(default)]
    meter_id: Option<i64>,
}

impl TryFrom<RawOneSwitchParams> for OneSwitchParams {
    type Error = TypeError;

    fn try_from(raw: RawOneSwitchParams) -> Result<Self, Self::Error> {
        let ingress = IngressParams::new(
            raw.input_vlan_id,
            raw.output_vlan_type,
            raw.bandwidth,
            raw.meter_id,
        )?;
        let output_vlan = VlanId::new(raw.output_vlan_id.unwrap_or(0))?.as_u16();
        OneSwitchParams::new(ingress, output_vlan)
    }
}

impl OneSwitchParams {
    /// Extends validated ingress parameters with the output VLAN.
    ///
    /// The rewrite must be the one that turns the input VLAN into the output
    /// VLAN.
    pub fn new(ingress: IngressParams, output_vlan_id: u16) -> Result<Self, TypeError> {
        VlanId::validate(output_vlan_id)?;
        let expected = OutputVlanType::between(ingress.input_vlan_id, output_vlan_id);
        if ingress.output_vlan_type != expected {
            return Err(TypeError::invalid_argument(format!(
                "output_vlan_type {} does not turn vlan {} into vlan {}",
                ingress.output_vlan_type, ingress.input_vlan_id, output_vlan_id
            )));
        }
        Ok(Self {
            input_vlan_id: ingress.input_vlan_id,
            output_vlan_id,
            output_vlan_type: ingress.output_vlan_type,
            bandwidth: ingress.bandwidth,
            meter_id: ingress.meter_id,
        })
    }
}

/// Variant part of an install command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum InstallKind {
    Ingress(IngressParams),
    Transit,
    Egress(EgressParams),
    OneSwitch(OneSwitchParams),
}

impl InstallKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstallKind::Ingress(_) => "ingress",
            InstallKind::Transit => "transit",
            InstallKind::Egress(_) => "egress",
            InstallKind::OneSwitch(_) => "one_switch",
        }
    }

    /// Meter attached to the rule, if the rule meters traffic.
    pub fn meter_id(&self) -> Option<u32> {
        match self {
            InstallKind::Ingress(p) => Some(p.meter_id),
            InstallKind::OneSwitch(p) => Some(p.meter_id),
            InstallKind::Transit | InstallKind::Egress(_) => None,
        }
    }
}

/// Install one rule of a flow on one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFlow {
    pub flow_name: String,
    pub switch_id: SwitchId,
    pub cookie: Cookie,
    pub input_port: u32,
    pub output_port: u32,
    #[serde(default)]
    pub transit_vlan_id: u16,
    #[serde(flatten)]
    pub kind: InstallKind,
}

/// Remove one rule of a flow from one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveFlow {
    pub flow_name: String,
    pub switch_id: SwitchId,
    pub cookie: Cookie,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Install,
    Remove,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Install => write!(f, "install"),
            CommandKind::Remove => write!(f, "remove"),
        }
    }
}

/// A command addressed to one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchCommand {
    Install(InstallFlow),
    Remove(RemoveFlow),
}

impl SwitchCommand {
    pub fn switch_id(&self) -> &SwitchId {
        match self {
            SwitchCommand::Install(c) => &c.switch_id,
            SwitchCommand::Remove(c) => &c.switch_id,
        }
    }

    pub fn cookie(&self) -> Cookie {
        match self {
            SwitchCommand::Install(c) => c.cookie,
            SwitchCommand::Remove(c) => c.cookie,
        }
    }

    pub fn flow_name(&self) -> &str {
        match self {
            SwitchCommand::Install(c) => &c.flow_name,
            SwitchCommand::Remove(c) => &c.flow_name,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            SwitchCommand::Install(_) => CommandKind::Install,
            SwitchCommand::Remove(_) => CommandKind::Remove,
        }
    }
}
