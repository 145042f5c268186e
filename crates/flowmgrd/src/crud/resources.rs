//! Cookie, meter and transit VLAN allocation.

use crate::config::ResourceConfig;
use crate::error::{FlowError, FlowResult};
use flow_orch_common::IdPool;
use flow_types::FlowPair;
use log::warn;
use parking_lot::Mutex;

/// Ids held by one flow pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    pub cookie: u32,
    pub forward_meter: u32,
    pub reverse_meter: u32,
    /// 0 for one-switch flows.
    pub forward_vlan: u16,
    pub reverse_vlan: u16,
}

impl Allocation {
    /// Ids recorded on a stored pair.
    pub fn of_pair(pair: &FlowPair) -> Self {
        Self {
            cookie: pair.forward.flagless_cookie(),
            forward_meter: pair.forward.meter_id,
            reverse_meter: pair.reverse.meter_id,
            forward_vlan: pair.forward.transit_vlan,
            reverse_vlan: pair.reverse.transit_vlan,
        }
    }
}

#[derive(Debug)]
struct Pools {
    cookies: IdPool,
    meters: IdPool,
    vlans: IdPool,
}

/// Id pools shared by every worker.
#[derive(Debug)]
pub struct ResourcePool {
    pools: Mutex<Pools>,
}

impl ResourcePool {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            pools: Mutex::new(Pools {
                cookies: IdPool::new("cookie", config.cookie_min, config.cookie_max),
                meters: IdPool::new("meter", config.meter_min, config.meter_max),
                vlans: IdPool::new(
                    "transit vlan",
                    u32::from(config.transit_vlan_min),
                    u32::from(config.transit_vlan_max),
                ),
            }),
        }
    }

    /// Allocates a full set of ids for a new pair.
    ///
    /// Nothing stays allocated if any pool runs dry.
    pub fn allocate(&self, one_switch: bool) -> FlowResult<Allocation> {
        let mut pools = self.pools.lock();
        let cookie = pools.cookies.allocate()?;
        let mut allocation = Allocation {
            cookie,
            ..Allocation::default()
        };
        if let Err(err) = Self::fill(&mut pools, &mut allocation, one_switch) {
            Self::release_locked(&mut pools, &allocation);
            return Err(err);
        }
        Ok(allocation)
    }

    fn fill(pools: &mut Pools, allocation: &mut Allocation, one_switch: bool) -> FlowResult<()> {
        allocation.forward_meter = pools.meters.allocate()?;
        allocation.reverse_meter = pools.meters.allocate()?;
        if !one_switch {
            allocation.forward_vlan = Self::vlan(pools.vlans.allocate()?)?;
            allocation.reverse_vlan = Self::vlan(pools.vlans.allocate()?)?;
        }
        Ok(())
    }

    fn vlan(id: u32) -> FlowResult<u16> {
        u16::try_from(id).map_err(|_| FlowError::internal(format!("transit vlan {} out of range", id)))
    }

    /// Returns every id of the allocation to its pool.
    pub fn release(&self, allocation: &Allocation) {
        let mut pools = self.pools.lock();
        Self::release_locked(&mut pools, allocation);
    }

    fn release_locked(pools: &mut Pools, allocation: &Allocation) {
        Self::release_id(&mut pools.cookies, allocation.cookie);
        Self::release_id(&mut pools.meters, allocation.forward_meter);
        Self::release_id(&mut pools.meters, allocation.reverse_meter);
        Self::release_id(&mut pools.vlans, u32::from(allocation.forward_vlan));
        Self::release_id(&mut pools.vlans, u32::from(allocation.reverse_vlan));
    }

    fn release_id(pool: &mut IdPool, id: u32) {
        if id == 0 {
            return;
        }
        if let Err(err) = pool.release(id) {
            warn!("Failed to release resource: {}", err);
        }
    }

    /// Marks the ids of an already stored pair as used, e.g. at startup.
    pub fn reserve_existing(&self, pair: &FlowPair) {
        let allocation = Allocation::of_pair(pair);
        let mut pools = self.pools.lock();
        let flow_id = pair.flow_id();
        Self::reserve_id(&mut pools.cookies, allocation.cookie, flow_id);
        Self::reserve_id(&mut pools.meters, allocation.forward_meter, flow_id);
        Self::reserve_id(&mut pools.meters, allocation.reverse_meter, flow_id);
        Self::reserve_id(&mut pools.vlans, u32::from(allocation.forward_vlan), flow_id);
        Self::reserve_id(&mut pools.vlans, u32::from(allocation.reverse_vlan), flow_id);
    }

    fn reserve_id(pool: &mut IdPool, id: u32, flow_id: &str) {
        if id == 0 {
            return;
        }
        if let Err(err) = pool.reserve(id) {
            warn!("Flow {}: cannot reserve stored resource: {}", flow_id, err);
        }
    }

    /// Ids in use as (cookies, meters, transit vlans).
    pub fn usage(&self) -> (usize, usize, usize) {
        let pools = self.pools.lock();
        (pools.cookies.len(), pools.meters.len(), pools.vlans.len())
    }
}
