//! Growth and bookkeeping of shader visible descriptor heaps.
//!
//! The host's main CBV/SRV/UAV heap is created a bit larger than requested. The added tail, starting at
//! the requested size, belongs to the engine and holds the bindless textures. Heaps are never forgotten
//! until [shutdown](crate::Engine::shutdown), since the driver doesn't tell us when one is destroyed.

use crate::{config::BindlessConfig, object::ObjectId};
use parking_lot::RwLock;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorHeapType(pub u32);

impl DescriptorHeapType {
    pub const CBV_SRV_UAV: Self = Self(0);
    pub const SAMPLER: Self = Self(1);
    pub const RTV: Self = Self(2);
    pub const DSV: Self = Self(3);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DescriptorHeapFlags(pub u32);

impl DescriptorHeapFlags {
    pub const NONE: Self = Self(0);
    pub const SHADER_VISIBLE: Self = Self(1);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

///Mirror of `D3D12_DESCRIPTOR_HEAP_DESC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapDesc {
    pub heap_type: DescriptorHeapType,
    pub num_descriptors: u32,
    pub flags: DescriptorHeapFlags,
    pub node_mask: u32,
}

impl HeapDesc {
    pub fn is_srv_capable(&self) -> bool {
        self.heap_type == DescriptorHeapType::CBV_SRV_UAV
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapGrowth {
    ///Descriptor count the host asked for.
    pub requested: u32,
    ///Descriptor count the heap is created with.
    pub num_descriptors: u32,
    ///First descriptor owned by the engine.
    pub base_offset: u32,
    ///Number of descriptors owned by the engine.
    pub budget: u32,
}

///Decision for a heap that is about to be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapPlan {
    ///Not a CBV/SRV/UAV heap.
    Untracked,
    ///CBV/SRV/UAV heap that keeps its size. Still counts as "SRV capable" when bound.
    Track,
    Grow(HeapGrowth),
}

impl HeapPlan {
    ///Descriptor count the driver should see for a host request of `requested`.
    pub fn num_descriptors(&self, requested: u32) -> u32 {
        match self {
            HeapPlan::Grow(growth) => growth.num_descriptors,
            _ => requested,
        }
    }

    pub fn is_tracked(&self) -> bool {
        !matches!(self, HeapPlan::Untracked)
    }
}

///Decides whether `desc` is the host's main heap and how far it is grown.
///
/// Depends only on the requested size, so planning the same request twice never grows twice.
pub fn plan_heap(desc: &HeapDesc, config: &BindlessConfig) -> HeapPlan {
    if !desc.is_srv_capable() {
        return HeapPlan::Untracked;
    }

    if !desc.flags.contains(DescriptorHeapFlags::SHADER_VISIBLE)
        || desc.num_descriptors < config.main_heap_threshold
    {
        return HeapPlan::Track;
    }

    let requested = desc.num_descriptors;
    let wanted = config.heap_budget();
    let budget = if requested as u64 + wanted as u64 > config.max_descriptors as u64 {
        config.max_descriptors.saturating_sub(requested)
    } else {
        wanted
    };

    if budget == 0 {
        #[cfg(feature = "logging")]
        log::warn!(
            "Main heap of {} descriptors leaves no room below the ceiling of {}, bindless disabled for it",
            requested,
            config.max_descriptors
        );
        return HeapPlan::Track;
    }

    if budget < wanted {
        #[cfg(feature = "logging")]
        log::warn!(
            "Main heap clamped to {} descriptors, only {} of {} bindless descriptors available",
            config.max_descriptors,
            budget,
            wanted
        );
    }

    HeapPlan::Grow(HeapGrowth {
        requested,
        num_descriptors: requested + budget,
        base_offset: requested,
        budget,
    })
}

///A grown heap, as far as redirection and descriptor writes need it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookedHeap {
    pub heap: ObjectId,
    pub cpu_start: usize,
    pub gpu_start: u64,
    pub base_offset: u32,
    pub budget: u32,
}

impl HookedHeap {
    ///True if `slot`, relative to the engine owned region, is inside the budget.
    pub fn contains_slot(&self, slot: i64) -> bool {
        slot >= 0 && slot < self.budget as i64
    }

    ///True if the `len` slots starting at `first` all lie inside the budget.
    pub fn contains_window(&self, first: i64, len: u32) -> bool {
        first >= 0 && first + len as i64 <= self.budget as i64
    }

    fn descriptor_offset(&self, increment: u32, slot: i64) -> i64 {
        increment as i64 * (self.base_offset as i64 + slot)
    }

    ///CPU handle of the engine owned `slot`.
    pub fn cpu_address(&self, increment: u32, slot: i64) -> usize {
        self.cpu_start
            .wrapping_add_signed(self.descriptor_offset(increment, slot) as isize)
    }

    ///GPU handle of the engine owned `slot`.
    pub fn gpu_address(&self, increment: u32, slot: i64) -> u64 {
        self.gpu_start
            .wrapping_add_signed(self.descriptor_offset(increment, slot))
    }
}

///Outcome of [HeapRegistry::resolve_bound].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundHeaps {
    ///1-based index into the hooked list, 0 if none of the heaps is hooked.
    pub assigned: u32,
    ///Heap list to forward if the engine had to add its heap, `None` to forward the host's list.
    pub extended: Option<SmallVec<[ObjectId; 4]>>,
}

///Process wide list of CBV/SRV/UAV heaps, and the subset that was grown.
#[derive(Default)]
pub struct HeapRegistry {
    srv: RwLock<Vec<ObjectId>>,
    hooked: RwLock<Vec<HookedHeap>>,
}

impl HeapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    ///Records a created heap according to `plan`.
    pub fn record(&self, plan: &HeapPlan, heap: ObjectId, cpu_start: usize, gpu_start: u64) {
        if !plan.is_tracked() || heap.is_null() {
            return;
        }

        self.srv.write().push(heap);

        if let HeapPlan::Grow(growth) = plan {
            let mut hooked = self.hooked.write();
            hooked.push(HookedHeap {
                heap,
                cpu_start,
                gpu_start,
                base_offset: growth.base_offset,
                budget: growth.budget,
            });

            #[cfg(feature = "logging")]
            log::info!(
                "Hooked descriptor heap #{} at {:#x}: {} descriptors, bindless region {}..{}",
                hooked.len(),
                heap.0,
                growth.num_descriptors,
                growth.base_offset,
                growth.base_offset + growth.budget
            );
        }
    }

    pub fn has_hooked(&self) -> bool {
        !self.hooked.read().is_empty()
    }

    pub fn hooked_count(&self) -> usize {
        self.hooked.read().len()
    }

    ///Hooked heap for a 1-based `assigned` index.
    pub fn hooked(&self, assigned: u32) -> Option<HookedHeap> {
        let idx = (assigned as usize).checked_sub(1)?;
        self.hooked.read().get(idx).copied()
    }

    pub fn hooked_heaps(&self) -> Vec<HookedHeap> {
        self.hooked.read().clone()
    }

    pub fn is_srv_heap(&self, heap: ObjectId) -> bool {
        self.srv.read().contains(&heap)
    }

    ///Finds the hooked heap among `heaps`. If no CBV/SRV/UAV heap is bound at all, the first hooked heap
    /// is added so the bindless table is always resident.
    ///
    /// Must only be called with a non-empty hooked list.
    pub fn resolve_bound(&self, heaps: &[ObjectId]) -> BoundHeaps {
        let srv = self.srv.read();
        let hooked = self.hooked.read();

        let mut assigned = 0;
        let mut has_srv = false;
        for heap in heaps.iter().filter(|h| !h.is_null()) {
            if srv.contains(heap) {
                has_srv = true;
            }
            if let Some(idx) = hooked.iter().position(|h| h.heap == *heap) {
                assigned = idx as u32 + 1;
            }
        }

        if assigned == 0 && !has_srv {
            if let Some(first) = hooked.first() {
                let mut extended: SmallVec<[ObjectId; 4]> = heaps.iter().copied().collect();
                extended.push(first.heap);
                return BoundHeaps {
                    assigned: 1,
                    extended: Some(extended),
                };
            }
        }

        BoundHeaps {
            assigned,
            extended: None,
        }
    }

    pub fn clear(&self) {
        self.srv.write().clear();
        self.hooked.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_heap(num_descriptors: u32) -> HeapDesc {
        HeapDesc {
            heap_type: DescriptorHeapType::CBV_SRV_UAV,
            num_descriptors,
            flags: DescriptorHeapFlags::SHADER_VISIBLE,
            node_mask: 0,
        }
    }

    #[test]
    fn main_heap_is_grown() {
        let plan = plan_heap(&main_heap(300_000), &BindlessConfig::default());
        assert_eq!(
            plan,
            HeapPlan::Grow(HeapGrowth {
                requested: 300_000,
                num_descriptors: 316_384,
                base_offset: 300_000,
                budget: 16_384,
            })
        );
        assert_eq!(plan.num_descriptors(300_000), 316_384);
    }

    #[test]
    fn threshold_is_inclusive() {
        let cfg = BindlessConfig::default();
        assert!(matches!(
            plan_heap(&main_heap(cfg.main_heap_threshold), &cfg),
            HeapPlan::Grow(_)
        ));
        assert_eq!(
            plan_heap(&main_heap(cfg.main_heap_threshold - 1), &cfg),
            HeapPlan::Track
        );
    }

    #[test]
    fn planning_is_stable() {
        let cfg = BindlessConfig::default();
        let desc = main_heap(400_000);
        let first = plan_heap(&desc, &cfg);
        let second = plan_heap(&desc, &cfg);
        assert_eq!(first, second);
        assert_eq!(first.num_descriptors(desc.num_descriptors), 416_384);
    }

    #[test]
    fn ceiling_clamps_budget() {
        let cfg = BindlessConfig::default();
        let HeapPlan::Grow(growth) = plan_heap(&main_heap(990_000), &cfg) else {
            panic!("expected growth");
        };
        assert_eq!(growth.num_descriptors, 1_000_000);
        assert_eq!(growth.base_offset, 990_000);
        assert_eq!(growth.budget, 10_000);

        assert_eq!(plan_heap(&main_heap(1_000_000), &cfg), HeapPlan::Track);
        assert_eq!(plan_heap(&main_heap(1_200_000), &cfg), HeapPlan::Track);
    }

    #[test]
    fn other_heaps_pass() {
        let cfg = BindlessConfig::default();
        let mut desc = main_heap(300_000);
        desc.heap_type = DescriptorHeapType::SAMPLER;
        assert_eq!(plan_heap(&desc, &cfg), HeapPlan::Untracked);
        assert_eq!(plan_heap(&desc, &cfg).num_descriptors(300_000), 300_000);

        let mut desc = main_heap(300_000);
        desc.flags = DescriptorHeapFlags::NONE;
        assert_eq!(plan_heap(&desc, &cfg), HeapPlan::Track);
    }

    #[test]
    fn addresses_step_by_increment() {
        let heap = HookedHeap {
            heap: ObjectId(1),
            cpu_start: 0x1000,
            gpu_start: 0x10_0000,
            base_offset: 100,
            budget: 16,
        };
        assert_eq!(heap.cpu_address(32, 0), 0x1000 + 32 * 100);
        assert_eq!(heap.gpu_address(32, 3), 0x10_0000 + 32 * 103);
        for slot in 0..15 {
            assert_eq!(heap.gpu_address(32, slot + 1) - heap.gpu_address(32, slot), 32);
        }
        assert!(heap.contains_slot(15));
        assert!(!heap.contains_slot(16));
        assert!(!heap.contains_slot(-1));

        assert!(heap.contains_window(0, 16));
        assert!(heap.contains_window(12, 4));
        assert!(!heap.contains_window(13, 4));
        assert!(!heap.contains_window(-1, 4));
    }

    #[test]
    fn registry_tracks_and_resolves() {
        let cfg = BindlessConfig::default();
        let reg = HeapRegistry::new();

        let small = ObjectId(0x10);
        reg.record(&plan_heap(&main_heap(1024), &cfg), small, 0, 0);
        assert!(!reg.has_hooked());
        assert!(reg.is_srv_heap(small));

        let main = ObjectId(0x20);
        reg.record(&plan_heap(&main_heap(300_000), &cfg), main, 0x1000, 0x2000);
        assert_eq!(reg.hooked_count(), 1);
        assert_eq!(reg.hooked(1).unwrap().base_offset, 300_000);
        assert_eq!(reg.hooked(0), None);
        assert_eq!(reg.hooked(2), None);

        //Host binds the main heap itself.
        let bound = reg.resolve_bound(&[ObjectId(0x99), main]);
        assert_eq!(bound.assigned, 1);
        assert_eq!(bound.extended, None);

        //Another SRV heap is bound, nothing is added.
        let bound = reg.resolve_bound(&[small]);
        assert_eq!(bound.assigned, 0);
        assert_eq!(bound.extended, None);

        //Only a sampler heap, the hooked heap is appended.
        let sampler = ObjectId(0x30);
        let bound = reg.resolve_bound(&[sampler]);
        assert_eq!(bound.assigned, 1);
        assert_eq!(bound.extended.unwrap().as_slice(), &[sampler, main]);

        reg.clear();
        assert!(!reg.has_hooked());
        assert!(!reg.is_srv_heap(small));
    }
}
