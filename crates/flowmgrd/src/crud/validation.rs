//! Request validation run before any resource or transaction is touched.

use crate::error::{FlowError, FlowResult};
use flow_types::{Cookie, Flow, VlanId};

/// Checks a CREATE or UPDATE payload.
pub fn validate_flow(flow: &Flow) -> FlowResult<()> {
    if flow.flow_id.trim().is_empty() {
        return Err(FlowError::InvalidArgument {
            flow_id: None,
            message: "flow_id must not be empty".to_string(),
        });
    }
    let id = flow.flow_id.as_str();

    if flow.bandwidth < 0 {
        return Err(FlowError::invalid_argument(
            id,
            format!("bandwidth must be non-negative, got {}", flow.bandwidth),
        ));
    }
    for vlan in [flow.source_vlan, flow.destination_vlan] {
        VlanId::validate(vlan).map_err(|e| FlowError::from(e).for_flow(id))?;
    }

    flow.endpoints().map_err(|e| FlowError::from(e).for_flow(id))?;
    if flow.source_port == 0 || flow.destination_port == 0 {
        return Err(FlowError::invalid_argument(
            id,
            "src_port and dst_port must be set",
        ));
    }
    if flow.is_one_switch_flow()
        && flow.source_port == flow.destination_port
        && flow.source_vlan == flow.destination_vlan
    {
        return Err(FlowError::invalid_argument(
            id,
            "one-switch flow must differ in port or vlan between endpoints",
        ));
    }

    if flow.cookie != Cookie::default() {
        flow.cookie
            .decode()
            .map_err(|e| FlowError::from(e).for_flow(id))?;
    }
    Ok(())
}

/// True when the change needs new rules on the switches.
pub fn topology_changed(old: &Flow, new: &Flow) -> bool {
    old.source_switch != new.source_switch
        || old.destination_switch != new.destination_switch
        || old.source_port != new.source_port
        || old.destination_port != new.destination_port
        || old.source_vlan != new.source_vlan
        || old.destination_vlan != new.destination_vlan
        || old.bandwidth != new.bandwidth
        || old.ignore_bandwidth != new.ignore_bandwidth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use flow_types::SwitchId;
    use pretty_assertions::assert_eq;

    fn valid() -> Flow {
        let mut flow = Flow::new("f1");
        flow.source_switch = Some(SwitchId::new("sw1").unwrap());
        flow.destination_switch = Some(SwitchId::new("sw2").unwrap());
        flow.source_port = 1;
        flow.destination_port = 2;
        flow.bandwidth = 1000;
        flow
    }

    #[test]
    fn test_valid_flow() {
        assert!(validate_flow(&valid()).is_ok());
    }

    #[test]
    fn test_rejections() {
        let mut empty = valid();
        empty.flow_id = " ".to_string();
        assert_eq!(validate_flow(&empty).unwrap_err().kind(), ErrorKind::InvalidArgument);

        let mut negative = valid();
        negative.bandwidth = -1;
        assert_eq!(
            validate_flow(&negative).unwrap_err().flow_id(),
            Some("f1")
        );

        let mut vlan = valid();
        vlan.source_vlan = 4096;
        assert!(validate_flow(&vlan).is_err());

        let mut no_dst = valid();
        no_dst.destination_switch = None;
        assert!(validate_flow(&no_dst).is_err());

        let mut no_port = valid();
        no_port.destination_port = 0;
        assert!(validate_flow(&no_port).is_err());

        let mut both_flags = valid();
        both_flags.cookie = Cookie::new(0x6000_0000_0000_0001);
        assert!(validate_flow(&both_flags).is_err());
    }

    #[test]
    fn test_one_switch_needs_distinct_endpoints() {
        let mut flow = valid();
        flow.destination_switch = flow.source_switch.clone();
        flow.destination_port = 1;
        assert!(validate_flow(&flow).is_err());

        flow.destination_vlan = 20;
        assert!(validate_flow(&flow).is_ok());
    }

    #[test]
    fn test_topology_changed() {
        let old = valid();
        let mut new = old.clone();
        new.description = "renamed".to_string();
        assert!(!topology_changed(&old, &new));

        new.bandwidth = 2000;
        assert!(topology_changed(&old, &new));
    }
}
