//! Dispatch table offsets taken from the `windows` crate's vtable layouts.

use bindless_hook::offsets::{HookTarget, OffsetTable};
use core::mem::offset_of;
use windows::Win32::Graphics::Direct3D12::{ID3D12Device_Vtbl, ID3D12GraphicsCommandList_Vtbl};

const fn vtable_offset(target: HookTarget) -> usize {
    match target {
        HookTarget::CreateGraphicsPipelineState => {
            offset_of!(ID3D12Device_Vtbl, CreateGraphicsPipelineState)
        }
        HookTarget::CreateComputePipelineState => {
            offset_of!(ID3D12Device_Vtbl, CreateComputePipelineState)
        }
        HookTarget::CreateDescriptorHeap => offset_of!(ID3D12Device_Vtbl, CreateDescriptorHeap),
        HookTarget::CreateRootSignature => offset_of!(ID3D12Device_Vtbl, CreateRootSignature),
        HookTarget::Reset => offset_of!(ID3D12GraphicsCommandList_Vtbl, Reset),
        HookTarget::SetDescriptorHeaps => {
            offset_of!(ID3D12GraphicsCommandList_Vtbl, SetDescriptorHeaps)
        }
        HookTarget::SetComputeRootSignature => {
            offset_of!(ID3D12GraphicsCommandList_Vtbl, SetComputeRootSignature)
        }
        HookTarget::SetGraphicsRootSignature => {
            offset_of!(ID3D12GraphicsCommandList_Vtbl, SetGraphicsRootSignature)
        }
        HookTarget::SetComputeRootDescriptorTable => {
            offset_of!(ID3D12GraphicsCommandList_Vtbl, SetComputeRootDescriptorTable)
        }
        HookTarget::SetGraphicsRootDescriptorTable => {
            offset_of!(ID3D12GraphicsCommandList_Vtbl, SetGraphicsRootDescriptorTable)
        }
    }
}

const fn slots_match_vtables() -> bool {
    let mut i = 0;
    while i < HookTarget::COUNT {
        let target = HookTarget::ALL[i];
        if vtable_offset(target) != target.byte_offset() {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(
    slots_match_vtables(),
    "hook slots disagree with the D3D12 vtable layout"
);

///Offsets resolved from the vtable structs.
pub fn vtable_offsets() -> OffsetTable {
    OffsetTable::from_resolver(vtable_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtables_match_slots() {
        assert!(vtable_offsets().mismatches(&OffsetTable::from_slots()).is_empty());
    }
}
