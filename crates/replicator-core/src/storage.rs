//! Storage ledger: per-resource on-hand quantities with volume and weight caps.
//!
//! Unit volumes and weights are precomputed into arrays indexed by
//! [`ResourceId`], so every reserve/release is O(1) arithmetic. Quantities are
//! `f64` and may be fractional.

use crate::id::ResourceId;
use crate::registry::Registry;
use std::collections::HashMap;

/// Slack for floating-point release checks.
const QTY_EPSILON: f64 = 1e-9;

/// Capacity limits for the storage system. Both default to unlimited when
/// storage limits are disabled.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StorageCaps {
    pub max_volume_m3: f64,
    pub max_weight_t: f64,
}

impl StorageCaps {
    pub const UNLIMITED: StorageCaps = StorageCaps {
        max_volume_m3: f64::INFINITY,
        max_weight_t: f64::INFINITY,
    };
}

/// The quantity ledger plus running volume/weight totals.
#[derive(Debug, Clone)]
pub struct StorageLedger {
    on_hand: HashMap<ResourceId, f64>,
    /// Unit volume per resource, indexed by id.
    unit_volume: Vec<f64>,
    /// Unit weight per resource, indexed by id.
    unit_weight: Vec<f64>,
    total_volume_m3: f64,
    total_weight_t: f64,
    caps: StorageCaps,
}

impl StorageLedger {
    pub fn new(registry: &Registry, caps: StorageCaps) -> Self {
        let mut unit_volume = Vec::with_capacity(registry.resource_count());
        let mut unit_weight = Vec::with_capacity(registry.resource_count());
        for id in registry.resource_ids() {
            let def = registry.resource(id).expect("id from registry iterator");
            unit_volume.push(def.volume_per_unit_m3);
            unit_weight.push(def.weight_per_unit_t());
        }
        Self {
            on_hand: HashMap::new(),
            unit_volume,
            unit_weight,
            total_volume_m3: 0.0,
            total_weight_t: 0.0,
            caps,
        }
    }

    /// Add `qty` units of `resource` iff volume and weight stay within caps.
    /// On success the ledger is updated immediately.
    pub fn reserve(&mut self, resource: ResourceId, qty: f64) -> bool {
        if qty <= 0.0 {
            return true;
        }
        let dv = self.unit_volume[resource.0 as usize] * qty;
        let dw = self.unit_weight[resource.0 as usize] * qty;
        if self.total_volume_m3 + dv > self.caps.max_volume_m3
            || self.total_weight_t + dw > self.caps.max_weight_t
        {
            return false;
        }
        *self.on_hand.entry(resource).or_insert(0.0) += qty;
        self.total_volume_m3 += dv;
        self.total_weight_t += dw;
        true
    }

    /// Remove `qty` units. Rejects a release that would go negative.
    pub fn release(&mut self, resource: ResourceId, qty: f64) -> bool {
        if qty <= 0.0 {
            return true;
        }
        let Some(held) = self.on_hand.get_mut(&resource) else {
            return false;
        };
        if *held + QTY_EPSILON < qty {
            return false;
        }
        let taken = qty.min(*held);
        *held -= taken;
        self.total_volume_m3 =
            (self.total_volume_m3 - self.unit_volume[resource.0 as usize] * taken).max(0.0);
        self.total_weight_t =
            (self.total_weight_t - self.unit_weight[resource.0 as usize] * taken).max(0.0);
        if *held <= 0.0 {
            self.on_hand.remove(&resource);
        }
        true
    }

    /// Whether at least `qty` units are on hand.
    pub fn has(&self, resource: ResourceId, qty: f64) -> bool {
        self.quantity(resource) + QTY_EPSILON >= qty
    }

    pub fn quantity(&self, resource: ResourceId) -> f64 {
        self.on_hand.get(&resource).copied().unwrap_or(0.0)
    }

    pub fn total_volume_m3(&self) -> f64 {
        self.total_volume_m3
    }

    pub fn total_weight_t(&self) -> f64 {
        self.total_weight_t
    }

    pub fn caps(&self) -> StorageCaps {
        self.caps
    }

    /// Shallow snapshot of the quantity map, for subsystem tick contexts.
    pub fn snapshot(&self) -> HashMap<ResourceId, f64> {
        self.on_hand.clone()
    }

    /// Iterate the on-hand quantities.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, f64)> + '_ {
        self.on_hand.iter().map(|(id, qty)| (*id, *qty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModuleTypeDef, RegistryBuilder, ResourceDef};

    fn registry() -> Registry {
        let mut b = RegistryBuilder::new();
        b.register_resource(ResourceDef::bulk("ore", 4.0, 0.5)); // 2 t/unit
        b.register_resource(ResourceDef::bulk("plate", 8.0, 0.25)); // 2 t/unit
        b.register_resource(ResourceDef::software("firmware"));
        b.register_module_type(ModuleTypeDef::basic("asm"));
        b.build().unwrap()
    }

    fn ore() -> ResourceId {
        ResourceId(0)
    }

    fn firmware() -> ResourceId {
        ResourceId(2)
    }

    #[test]
    fn reserve_updates_totals() {
        let reg = registry();
        let mut s = StorageLedger::new(&reg, StorageCaps::UNLIMITED);
        assert!(s.reserve(ore(), 4.0));
        assert_eq!(s.quantity(ore()), 4.0);
        assert!((s.total_volume_m3() - 2.0).abs() < 1e-12);
        assert!((s.total_weight_t() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn reserve_rejects_over_volume_cap() {
        let reg = registry();
        let caps = StorageCaps {
            max_volume_m3: 1.0,
            max_weight_t: f64::INFINITY,
        };
        let mut s = StorageLedger::new(&reg, caps);
        assert!(s.reserve(ore(), 2.0)); // exactly 1.0 m3
        assert!(!s.reserve(ore(), 0.1));
        // Ledger unchanged by the failed reserve.
        assert_eq!(s.quantity(ore()), 2.0);
    }

    #[test]
    fn reserve_rejects_over_weight_cap() {
        let reg = registry();
        let caps = StorageCaps {
            max_volume_m3: f64::INFINITY,
            max_weight_t: 4.0,
        };
        let mut s = StorageLedger::new(&reg, caps);
        assert!(s.reserve(ore(), 2.0)); // 4 t
        assert!(!s.reserve(ore(), 1.0));
    }

    #[test]
    fn release_rejects_negative_balance() {
        let reg = registry();
        let mut s = StorageLedger::new(&reg, StorageCaps::UNLIMITED);
        s.reserve(ore(), 1.0);
        assert!(!s.release(ore(), 2.0));
        assert_eq!(s.quantity(ore()), 1.0);
        assert!(s.release(ore(), 1.0));
        assert_eq!(s.quantity(ore()), 0.0);
    }

    #[test]
    fn release_unknown_resource_rejected() {
        let reg = registry();
        let mut s = StorageLedger::new(&reg, StorageCaps::UNLIMITED);
        assert!(!s.release(ore(), 0.5));
    }

    #[test]
    fn software_occupies_no_space() {
        let reg = registry();
        let caps = StorageCaps {
            max_volume_m3: 0.0,
            max_weight_t: 0.0,
        };
        let mut s = StorageLedger::new(&reg, caps);
        assert!(s.reserve(firmware(), 1.0));
        assert_eq!(s.quantity(firmware()), 1.0);
        assert_eq!(s.total_volume_m3(), 0.0);
    }

    #[test]
    fn fractional_quantities_round_trip() {
        let reg = registry();
        let mut s = StorageLedger::new(&reg, StorageCaps::UNLIMITED);
        s.reserve(ore(), 0.3);
        s.reserve(ore(), 0.3);
        s.reserve(ore(), 0.4);
        assert!(s.has(ore(), 1.0));
        assert!(s.release(ore(), 1.0));
        assert!(s.quantity(ore()).abs() < 1e-9);
    }

    #[test]
    fn snapshot_is_shallow_copy() {
        let reg = registry();
        let mut s = StorageLedger::new(&reg, StorageCaps::UNLIMITED);
        s.reserve(ore(), 2.0);
        let snap = s.snapshot();
        s.release(ore(), 2.0);
        assert_eq!(snap[&ore()], 2.0);
        assert_eq!(s.quantity(ore()), 0.0);
    }
}
