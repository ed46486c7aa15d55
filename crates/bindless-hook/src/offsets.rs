//! Dispatch table offsets of every entry point the engine replaces.
//!
//! The slots are the declaration order of the COM interfaces (`IUnknown` → `ID3D12Object` → ...). They are
//! independent of any live object. The D3D12 backend checks them against the `windows` crate's vtable
//! structs, so a wrong entry fails the build there instead of patching a random function.

use std::sync::OnceLock;

///Interface whose dispatch table is patched. Each kind is hooked at most once per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Device,
    GraphicsCommandList,
}

impl InterfaceKind {
    pub const COUNT: usize = 2;

    pub const fn index(self) -> usize {
        self as usize
    }
}

///Entry points that are replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookTarget {
    CreateGraphicsPipelineState,
    CreateComputePipelineState,
    CreateDescriptorHeap,
    CreateRootSignature,

    Reset,
    SetDescriptorHeaps,
    SetComputeRootSignature,
    SetGraphicsRootSignature,
    SetComputeRootDescriptorTable,
    SetGraphicsRootDescriptorTable,
}

impl HookTarget {
    pub const COUNT: usize = 10;

    pub const ALL: [HookTarget; Self::COUNT] = [
        HookTarget::CreateGraphicsPipelineState,
        HookTarget::CreateComputePipelineState,
        HookTarget::CreateDescriptorHeap,
        HookTarget::CreateRootSignature,
        HookTarget::Reset,
        HookTarget::SetDescriptorHeaps,
        HookTarget::SetComputeRootSignature,
        HookTarget::SetGraphicsRootSignature,
        HookTarget::SetComputeRootDescriptorTable,
        HookTarget::SetGraphicsRootDescriptorTable,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn interface(self) -> InterfaceKind {
        match self {
            HookTarget::CreateGraphicsPipelineState
            | HookTarget::CreateComputePipelineState
            | HookTarget::CreateDescriptorHeap
            | HookTarget::CreateRootSignature => InterfaceKind::Device,
            _ => InterfaceKind::GraphicsCommandList,
        }
    }

    ///Index of the function pointer within the interface's dispatch table.
    pub const fn slot(self) -> usize {
        match self {
            //IUnknown(3) + ID3D12Object(4) + GetNodeCount, CreateCommandQueue, CreateCommandAllocator
            HookTarget::CreateGraphicsPipelineState => 10,
            HookTarget::CreateComputePipelineState => 11,
            HookTarget::CreateDescriptorHeap => 14,
            HookTarget::CreateRootSignature => 16,
            //IUnknown(3) + ID3D12Object(4) + ID3D12DeviceChild(1) + ID3D12CommandList(1) + Close
            HookTarget::Reset => 10,
            HookTarget::SetDescriptorHeaps => 28,
            HookTarget::SetComputeRootSignature => 29,
            HookTarget::SetGraphicsRootSignature => 30,
            HookTarget::SetComputeRootDescriptorTable => 31,
            HookTarget::SetGraphicsRootDescriptorTable => 32,
        }
    }

    ///Byte offset of the slot from the start of the dispatch table.
    pub const fn byte_offset(self) -> usize {
        self.slot() * core::mem::size_of::<usize>()
    }

    pub const fn name(self) -> &'static str {
        match self {
            HookTarget::CreateGraphicsPipelineState => "CreateGraphicsPipelineState",
            HookTarget::CreateComputePipelineState => "CreateComputePipelineState",
            HookTarget::CreateDescriptorHeap => "CreateDescriptorHeap",
            HookTarget::CreateRootSignature => "CreateRootSignature",
            HookTarget::Reset => "Reset",
            HookTarget::SetDescriptorHeaps => "SetDescriptorHeaps",
            HookTarget::SetComputeRootSignature => "SetComputeRootSignature",
            HookTarget::SetGraphicsRootSignature => "SetGraphicsRootSignature",
            HookTarget::SetComputeRootDescriptorTable => "SetComputeRootDescriptorTable",
            HookTarget::SetGraphicsRootDescriptorTable => "SetGraphicsRootDescriptorTable",
        }
    }
}

///Resolved byte offsets, one per [HookTarget].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetTable {
    offsets: [usize; HookTarget::COUNT],
}

static OFFSETS: OnceLock<OffsetTable> = OnceLock::new();

impl OffsetTable {
    ///Builds the table from the declaration order in [HookTarget::slot].
    pub const fn from_slots() -> Self {
        let mut offsets = [0; HookTarget::COUNT];
        let mut i = 0;
        while i < HookTarget::COUNT {
            offsets[i] = HookTarget::ALL[i].byte_offset();
            i += 1;
        }
        OffsetTable { offsets }
    }

    ///Builds the table from a resolver, usually `offset_of!` on the interface's vtable struct.
    pub fn from_resolver(mut resolve: impl FnMut(HookTarget) -> usize) -> Self {
        let mut offsets = [0; HookTarget::COUNT];
        for target in HookTarget::ALL {
            offsets[target.index()] = resolve(target);
        }
        OffsetTable { offsets }
    }

    ///Installs `table` as the process wide table. The first call wins, later calls return the table
    /// that is already installed.
    pub fn install(table: OffsetTable) -> &'static OffsetTable {
        OFFSETS.get_or_init(|| table)
    }

    ///Process wide table. Falls back to [from_slots](Self::from_slots) if nothing was installed.
    pub fn get() -> &'static OffsetTable {
        OFFSETS.get_or_init(Self::from_slots)
    }

    pub fn offset(&self, target: HookTarget) -> usize {
        self.offsets[target.index()]
    }

    ///Returns every target whose offset differs from `other`.
    pub fn mismatches(&self, other: &OffsetTable) -> Vec<HookTarget> {
        HookTarget::ALL
            .into_iter()
            .filter(|t| self.offset(*t) != other.offset(*t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_matches_index() {
        for (i, target) in HookTarget::ALL.iter().enumerate() {
            assert_eq!(target.index(), i, "{} out of order", target.name());
        }
    }

    #[test]
    fn offsets_are_pointer_scaled() {
        let table = OffsetTable::from_slots();
        let word = core::mem::size_of::<usize>();
        assert_eq!(table.offset(HookTarget::CreateDescriptorHeap), 14 * word);
        assert_eq!(table.offset(HookTarget::SetDescriptorHeaps), 28 * word);
        assert_eq!(table.offset(HookTarget::Reset), 10 * word);
    }

    #[test]
    fn slots_are_unique_per_interface() {
        for a in HookTarget::ALL {
            for b in HookTarget::ALL {
                if a != b && a.interface() == b.interface() {
                    assert_ne!(a.slot(), b.slot(), "{} / {}", a.name(), b.name());
                }
            }
        }
    }

    #[test]
    fn resolver_mismatch_is_reported() {
        let slots = OffsetTable::from_slots();
        let shifted = OffsetTable::from_resolver(|t| match t {
            HookTarget::Reset => t.byte_offset() + 8,
            _ => t.byte_offset(),
        });
        assert_eq!(slots.mismatches(&shifted), vec![HookTarget::Reset]);
        assert!(slots.mismatches(&OffsetTable::from_slots()).is_empty());
    }
}
