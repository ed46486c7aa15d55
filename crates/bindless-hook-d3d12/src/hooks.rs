//! Replacement entry points patched into the device and command list dispatch tables.
//!
//! Each replacement asks the [Engine] what to do and then calls the driver's original function, which
//! [HOOKS] published before the slot was swapped. None of them ever turns a driver success into a failure.

use crate::{codec::D3D12LayoutCodec, error::D3D12HookError, object::D3D12Object};
use bindless_hook::{
    Engine,
    dispatch::HookRegistry,
    heap::{DescriptorHeapFlags, DescriptorHeapType, HeapDesc},
    layout::LayoutPlan,
    object::ObjectId,
    offsets::{HookTarget, InterfaceKind, OffsetTable},
    state::PipelineKind,
};
use smallvec::SmallVec;
use std::{ffi::c_void, slice, sync::LazyLock};
use windows::{
    Win32::{Foundation::E_FAIL, Graphics::Direct3D12::*},
    core::{GUID, HRESULT, Interface},
};

pub(crate) static ENGINE: LazyLock<Engine> = LazyLock::new(Engine::default);
pub(crate) static HOOKS: HookRegistry = HookRegistry::new();

type CreateRootSignatureFn = unsafe extern "system" fn(
    *mut c_void,
    u32,
    *const c_void,
    usize,
    *const GUID,
    *mut *mut c_void,
) -> HRESULT;
type CreateDescriptorHeapFn = unsafe extern "system" fn(
    *mut c_void,
    *const D3D12_DESCRIPTOR_HEAP_DESC,
    *const GUID,
    *mut *mut c_void,
) -> HRESULT;
type CreateGraphicsPipelineStateFn = unsafe extern "system" fn(
    *mut c_void,
    *const D3D12_GRAPHICS_PIPELINE_STATE_DESC,
    *const GUID,
    *mut *mut c_void,
) -> HRESULT;
type CreateComputePipelineStateFn = unsafe extern "system" fn(
    *mut c_void,
    *const D3D12_COMPUTE_PIPELINE_STATE_DESC,
    *const GUID,
    *mut *mut c_void,
) -> HRESULT;
type ResetFn = unsafe extern "system" fn(*mut c_void, *mut c_void, *mut c_void) -> HRESULT;
type SetDescriptorHeapsFn = unsafe extern "system" fn(*mut c_void, u32, *const *mut c_void);
type SetRootSignatureFn = unsafe extern "system" fn(*mut c_void, *mut c_void);
type SetRootDescriptorTableFn =
    unsafe extern "system" fn(*mut c_void, u32, D3D12_GPU_DESCRIPTOR_HANDLE);

///Driver function that was replaced for `target`.
///
/// `F` must be the function pointer type of `target`'s slot.
unsafe fn original<F: Copy>(target: HookTarget) -> Option<F> {
    debug_assert_eq!(core::mem::size_of::<F>(), core::mem::size_of::<usize>());
    HOOKS
        .original(target)
        .map(|ptr| unsafe { core::mem::transmute_copy::<usize, F>(&ptr) })
}

fn missing_original(target: HookTarget) {
    #[cfg(feature = "logging")]
    log::error!("No original function for {}", target.name());
    #[cfg(not(feature = "logging"))]
    let _ = target;
}

//Device

unsafe extern "system" fn forget_root_signature(object: *mut c_void) {
    if ENGINE.forget_layout(ObjectId::from_ptr(object)).is_some() {
        #[cfg(feature = "logging")]
        log::trace!("Root signature {:#x} destroyed", object as usize);
    }
}

unsafe extern "system" fn create_root_signature(
    this: *mut c_void,
    node_mask: u32,
    blob: *const c_void,
    blob_len: usize,
    riid: *const GUID,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(create) =
        (unsafe { original::<CreateRootSignatureFn>(HookTarget::CreateRootSignature) })
    else {
        missing_original(HookTarget::CreateRootSignature);
        return E_FAIL;
    };

    if blob.is_null() || blob_len == 0 || out.is_null() {
        return unsafe { create(this, node_mask, blob, blob_len, riid, out) };
    }

    let host_blob = unsafe { slice::from_raw_parts(blob as *const u8, blob_len) };
    let (new_blob, metadata) = match ENGINE.plan_root_signature(&D3D12LayoutCodec, host_blob) {
        LayoutPlan::Original => {
            return unsafe { create(this, node_mask, blob, blob_len, riid, out) };
        }
        LayoutPlan::Rewritten { blob, metadata } => (blob, metadata),
    };

    let hr = unsafe {
        create(
            this,
            node_mask,
            new_blob.as_ptr() as *const c_void,
            new_blob.len(),
            riid,
            out,
        )
    };
    if hr.is_err() {
        #[cfg(feature = "logging")]
        log::warn!("Driver rejected rewritten root signature: {:?}", hr);
        return hr;
    }

    let raw = unsafe { *out };
    let Some(root_signature) = (unsafe { D3D12Object::from_raw(&raw) }) else {
        return hr;
    };

    if let Err(e) = ENGINE.attach_layout(&root_signature, metadata) {
        #[cfg(feature = "logging")]
        log::error!("{}, aborting", e);
        #[cfg(not(feature = "logging"))]
        let _ = e;
        std::process::abort();
    }

    if !root_signature.on_destroy(forget_root_signature) {
        #[cfg(feature = "logging")]
        log::debug!(
            "Root signature {:#x} has no destruction notifier, registry entry stays",
            raw as usize
        );
    }

    hr
}

unsafe extern "system" fn create_descriptor_heap(
    this: *mut c_void,
    desc: *const D3D12_DESCRIPTOR_HEAP_DESC,
    riid: *const GUID,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(create) =
        (unsafe { original::<CreateDescriptorHeapFn>(HookTarget::CreateDescriptorHeap) })
    else {
        missing_original(HookTarget::CreateDescriptorHeap);
        return E_FAIL;
    };

    let Some(host_desc) = (unsafe { desc.as_ref() }) else {
        return unsafe { create(this, desc, riid, out) };
    };

    let heap_desc = HeapDesc {
        heap_type: DescriptorHeapType(host_desc.Type.0 as u32),
        num_descriptors: host_desc.NumDescriptors,
        flags: DescriptorHeapFlags(host_desc.Flags.0 as u32),
        node_mask: host_desc.NodeMask,
    };
    let plan = ENGINE.plan_descriptor_heap(&heap_desc);
    if !plan.is_tracked() || out.is_null() {
        return unsafe { create(this, desc, riid, out) };
    }

    //The host's description stays untouched, the driver gets a grown copy.
    let mut grown = *host_desc;
    grown.NumDescriptors = plan.num_descriptors(host_desc.NumDescriptors);

    let hr = unsafe { create(this, &grown, riid, out) };
    if hr.is_err() {
        return hr;
    }

    let raw = unsafe { *out };
    let Some(heap) = (unsafe { ID3D12DescriptorHeap::from_raw_borrowed(&raw) }) else {
        return hr;
    };

    let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr;
    let gpu_start = if heap_desc.flags.contains(DescriptorHeapFlags::SHADER_VISIBLE) {
        unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr
    } else {
        0
    };
    ENGINE.record_descriptor_heap(&plan, ObjectId::from_ptr(raw), cpu_start, gpu_start);

    hr
}

unsafe fn propagate_layout(root_signature: Option<&ID3D12RootSignature>, out: *mut *mut c_void) {
    let Some(root_signature) = root_signature.map(|rs| D3D12Object::new(rs)) else {
        return;
    };
    let raw = unsafe { *out };
    if let Some(pipeline) = unsafe { D3D12Object::from_raw(&raw) } {
        ENGINE.propagate_to_pipeline(Some(&root_signature), &pipeline);
    }
}

unsafe extern "system" fn create_graphics_pipeline_state(
    this: *mut c_void,
    desc: *const D3D12_GRAPHICS_PIPELINE_STATE_DESC,
    riid: *const GUID,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(create) = (unsafe {
        original::<CreateGraphicsPipelineStateFn>(HookTarget::CreateGraphicsPipelineState)
    }) else {
        missing_original(HookTarget::CreateGraphicsPipelineState);
        return E_FAIL;
    };

    let hr = unsafe { create(this, desc, riid, out) };
    if hr.is_ok() && !out.is_null() {
        if let Some(desc) = unsafe { desc.as_ref() } {
            unsafe { propagate_layout(desc.pRootSignature.as_ref(), out) };
        }
    }
    hr
}

unsafe extern "system" fn create_compute_pipeline_state(
    this: *mut c_void,
    desc: *const D3D12_COMPUTE_PIPELINE_STATE_DESC,
    riid: *const GUID,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(create) = (unsafe {
        original::<CreateComputePipelineStateFn>(HookTarget::CreateComputePipelineState)
    }) else {
        missing_original(HookTarget::CreateComputePipelineState);
        return E_FAIL;
    };

    let hr = unsafe { create(this, desc, riid, out) };
    if hr.is_ok() && !out.is_null() {
        if let Some(desc) = unsafe { desc.as_ref() } {
            unsafe { propagate_layout(desc.pRootSignature.as_ref(), out) };
        }
    }
    hr
}

//Command list

unsafe extern "system" fn reset(
    this: *mut c_void,
    allocator: *mut c_void,
    initial_state: *mut c_void,
) -> HRESULT {
    let Some(forward) = (unsafe { original::<ResetFn>(HookTarget::Reset) }) else {
        missing_original(HookTarget::Reset);
        return E_FAIL;
    };

    if let Some(list) = unsafe { D3D12Object::from_raw(&this) } {
        ENGINE.reset_command_list(&list);
    }
    unsafe { forward(this, allocator, initial_state) }
}

unsafe extern "system" fn set_descriptor_heaps(
    this: *mut c_void,
    count: u32,
    heaps: *const *mut c_void,
) {
    let Some(forward) =
        (unsafe { original::<SetDescriptorHeapsFn>(HookTarget::SetDescriptorHeaps) })
    else {
        missing_original(HookTarget::SetDescriptorHeaps);
        return;
    };

    let Some(list) = (unsafe { D3D12Object::from_raw(&this) }) else {
        return unsafe { forward(this, count, heaps) };
    };

    let host: &[*mut c_void] = if heaps.is_null() || count == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(heaps, count as usize) }
    };
    let ids: SmallVec<[ObjectId; 4]> = host.iter().map(|h| ObjectId::from_ptr(*h)).collect();

    match ENGINE.set_descriptor_heaps(&list, &ids) {
        Some(extended) => {
            let raw: SmallVec<[*mut c_void; 4]> =
                extended.iter().map(|id| id.0 as *mut c_void).collect();
            unsafe { forward(this, raw.len() as u32, raw.as_ptr()) }
        }
        None => unsafe { forward(this, count, heaps) },
    }
}

unsafe fn bind_root_signature(this: *mut c_void, kind: PipelineKind, root_signature: *mut c_void) {
    let Some(list) = (unsafe { D3D12Object::from_raw(&this) }) else {
        return;
    };
    let root_signature = unsafe { D3D12Object::from_raw(&root_signature) };
    ENGINE.set_root_signature(&list, kind, root_signature.as_ref());
}

unsafe extern "system" fn set_compute_root_signature(this: *mut c_void, root_signature: *mut c_void) {
    let Some(forward) =
        (unsafe { original::<SetRootSignatureFn>(HookTarget::SetComputeRootSignature) })
    else {
        missing_original(HookTarget::SetComputeRootSignature);
        return;
    };

    unsafe { bind_root_signature(this, PipelineKind::Compute, root_signature) };
    unsafe { forward(this, root_signature) }
}

unsafe extern "system" fn set_graphics_root_signature(
    this: *mut c_void,
    root_signature: *mut c_void,
) {
    let Some(forward) =
        (unsafe { original::<SetRootSignatureFn>(HookTarget::SetGraphicsRootSignature) })
    else {
        missing_original(HookTarget::SetGraphicsRootSignature);
        return;
    };

    unsafe { bind_root_signature(this, PipelineKind::Graphics, root_signature) };
    unsafe { forward(this, root_signature) }
}

///Forwards the host's table, then binds the bindless table if the engine asks for it.
unsafe fn bind_table(
    forward: SetRootDescriptorTableFn,
    this: *mut c_void,
    kind: PipelineKind,
    root_index: u32,
    descriptor: D3D12_GPU_DESCRIPTOR_HANDLE,
) {
    unsafe { forward(this, root_index, descriptor) };

    let Some(list) = (unsafe { D3D12Object::from_raw(&this) }) else {
        return;
    };
    if let Some(redirect) = ENGINE.set_root_descriptor_table(&list, kind, root_index) {
        unsafe {
            forward(
                this,
                redirect.root_index,
                D3D12_GPU_DESCRIPTOR_HANDLE {
                    ptr: redirect.gpu_descriptor,
                },
            )
        };
    }
}

unsafe extern "system" fn set_compute_root_descriptor_table(
    this: *mut c_void,
    root_index: u32,
    descriptor: D3D12_GPU_DESCRIPTOR_HANDLE,
) {
    let Some(forward) = (unsafe {
        original::<SetRootDescriptorTableFn>(HookTarget::SetComputeRootDescriptorTable)
    }) else {
        missing_original(HookTarget::SetComputeRootDescriptorTable);
        return;
    };
    unsafe { bind_table(forward, this, PipelineKind::Compute, root_index, descriptor) }
}

unsafe extern "system" fn set_graphics_root_descriptor_table(
    this: *mut c_void,
    root_index: u32,
    descriptor: D3D12_GPU_DESCRIPTOR_HANDLE,
) {
    let Some(forward) = (unsafe {
        original::<SetRootDescriptorTableFn>(HookTarget::SetGraphicsRootDescriptorTable)
    }) else {
        missing_original(HookTarget::SetGraphicsRootDescriptorTable);
        return;
    };
    unsafe { bind_table(forward, this, PipelineKind::Graphics, root_index, descriptor) }
}

//Installation

///Installs every replacement in `targets`. A failing slot is logged and skipped, the first error is
/// returned after all slots were tried.
fn install_all(
    object: *mut c_void,
    targets: &[(HookTarget, usize)],
    offsets: &OffsetTable,
) -> Result<(), D3D12HookError> {
    let mut first_error = None;
    for (target, replacement) in targets {
        if let Err(e) = unsafe { HOOKS.install(object, *target, *replacement, offsets) } {
            #[cfg(feature = "logging")]
            log::error!("Could not hook {}: {}", target.name(), e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

///Patches the device's creation entry points. Only the first device is hooked.
pub(crate) fn hook_device(device: &ID3D12Device, offsets: &OffsetTable) -> Result<(), D3D12HookError> {
    if !HOOKS.claim(InterfaceKind::Device) {
        #[cfg(feature = "logging")]
        log::debug!("Device hooks already installed");
        return Ok(());
    }

    let targets = [
        (
            HookTarget::CreateRootSignature,
            create_root_signature as CreateRootSignatureFn as usize,
        ),
        (
            HookTarget::CreateDescriptorHeap,
            create_descriptor_heap as CreateDescriptorHeapFn as usize,
        ),
        (
            HookTarget::CreateGraphicsPipelineState,
            create_graphics_pipeline_state as CreateGraphicsPipelineStateFn as usize,
        ),
        (
            HookTarget::CreateComputePipelineState,
            create_compute_pipeline_state as CreateComputePipelineStateFn as usize,
        ),
    ];
    install_all(device.as_raw(), &targets, offsets)
}

///Patches the command list entry points. The dispatch table is reached through a throwaway direct
/// command list, which is released again once its table is patched.
pub(crate) fn hook_command_list(
    device: &ID3D12Device,
    offsets: &OffsetTable,
) -> Result<(), D3D12HookError> {
    if HOOKS.is_claimed(InterfaceKind::GraphicsCommandList) {
        #[cfg(feature = "logging")]
        log::debug!("Command list hooks already installed");
        return Ok(());
    }

    let allocator: ID3D12CommandAllocator =
        unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;
    let list: ID3D12GraphicsCommandList =
        unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None) }?;

    if !HOOKS.claim(InterfaceKind::GraphicsCommandList) {
        return Ok(());
    }

    let targets = [
        (HookTarget::Reset, reset as ResetFn as usize),
        (
            HookTarget::SetDescriptorHeaps,
            set_descriptor_heaps as SetDescriptorHeapsFn as usize,
        ),
        (
            HookTarget::SetComputeRootSignature,
            set_compute_root_signature as SetRootSignatureFn as usize,
        ),
        (
            HookTarget::SetGraphicsRootSignature,
            set_graphics_root_signature as SetRootSignatureFn as usize,
        ),
        (
            HookTarget::SetComputeRootDescriptorTable,
            set_compute_root_descriptor_table as SetRootDescriptorTableFn as usize,
        ),
        (
            HookTarget::SetGraphicsRootDescriptorTable,
            set_graphics_root_descriptor_table as SetRootDescriptorTableFn as usize,
        ),
    ];
    let res = install_all(list.as_raw(), &targets, offsets);

    //NOTE: a fresh list is open, close it before it is released.
    let _ = unsafe { list.Close() };
    res
}
