//! Translation of a directional flow into per-switch commands.
//!
//! A flow over the path `[src:out, sw2:in, sw2:out, ..., dst:in]` gets an
//! ingress rule on the source switch, one transit rule per intermediate
//! switch and an egress rule on the destination switch. A one-switch flow
//! gets a single rule.

use crate::error::{FlowError, FlowResult};
use flow_types::{
    EgressParams, Flow, IngressParams, InstallFlow, InstallKind, OneSwitchParams, OutputVlanType,
    RemoveFlow, SwitchCommand, SwitchId,
};

/// Install commands for every rule of the flow, ingress first.
pub fn install_commands(flow: &Flow) -> FlowResult<Vec<SwitchCommand>> {
    let (src, dst) = flow.endpoints()?;
    let ingress = |output_vlan_type: OutputVlanType| {
        IngressParams::new(
            Some(i64::from(flow.source_vlan)),
            Some(output_vlan_type),
            Some(flow.bandwidth),
            Some(i64::from(flow.meter_id)),
        )
    };

    flow.flow_path
        .validate(src, dst)
        .map_err(|err| FlowError::invalid_argument(&flow.flow_id, err.to_string()))?;

    if flow.flow_path.is_empty() {
        let rewrite = OutputVlanType::between(flow.source_vlan, flow.destination_vlan);
        let params = OneSwitchParams::new(ingress(rewrite)?, flow.destination_vlan)?;
        return Ok(vec![install(
            flow,
            src,
            flow.source_port,
            flow.destination_port,
            InstallKind::OneSwitch(params),
        )]);
    }

    let path = &flow.flow_path.path;
    let first = &path[0];
    let last = &path[path.len() - 1];
    let mut commands = Vec::with_capacity(path.len() / 2 + 1);

    let push_or_replace = if flow.source_vlan == 0 {
        OutputVlanType::Push
    } else {
        OutputVlanType::Replace
    };
    commands.push(install(
        flow,
        src,
        flow.source_port,
        first.port_no,
        InstallKind::Ingress(ingress(push_or_replace)?),
    ));

    for hop in path[1..path.len() - 1].chunks(2) {
        if let [inbound, outbound] = hop {
            commands.push(install(
                flow,
                &inbound.switch_id,
                inbound.port_no,
                outbound.port_no,
                InstallKind::Transit,
            ));
        }
    }

    let pop_or_replace = if flow.destination_vlan == 0 {
        OutputVlanType::Pop
    } else {
        OutputVlanType::Replace
    };
    let egress = EgressParams::new(Some(i64::from(flow.destination_vlan)), Some(pop_or_replace))?;
    commands.push(install(
        flow,
        dst,
        last.port_no,
        flow.destination_port,
        InstallKind::Egress(egress),
    ));

    Ok(commands)
}

fn install(
    flow: &Flow,
    switch_id: &SwitchId,
    input_port: u32,
    output_port: u32,
    kind: InstallKind,
) -> SwitchCommand {
    SwitchCommand::Install(InstallFlow {
        flow_name: flow.flow_id.clone(),
        switch_id: switch_id.clone(),
        cookie: flow.cookie,
        input_port,
        output_port,
        transit_vlan_id: flow.transit_vlan,
        kind,
    })
}

/// Remove commands matching [`install_commands`] rule for rule.
pub fn remove_commands(flow: &Flow) -> FlowResult<Vec<SwitchCommand>> {
    Ok(install_commands(flow)?
        .into_iter()
        .map(|command| match command {
            SwitchCommand::Install(rule) => SwitchCommand::Remove(RemoveFlow {
                flow_name: rule.flow_name,
                switch_id: rule.switch_id,
                cookie: rule.cookie,
                meter_id: rule.kind.meter_id(),
            }),
            remove => remove,
        })
        .collect())
}

/// Remove command for the flow's rule on a switch off its current path.
pub fn remove_on(flow: &Flow, switch_id: &SwitchId) -> SwitchCommand {
    SwitchCommand::Remove(RemoveFlow {
        flow_name: flow.flow_id.clone(),
        switch_id: switch_id.clone(),
        cookie: flow.cookie,
        meter_id: None,
    })
}
