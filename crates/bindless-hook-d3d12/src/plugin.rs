//! C ABI of the plugin. The host calls these from its render thread.

use crate::{
    error::D3D12HookError,
    hooks::{ENGINE, hook_command_list, hook_device},
    vtable::vtable_offsets,
    writer::D3D12DescriptorWriter,
};
use bindless_hook::{offsets::OffsetTable, texture::BindlessTexture};
use parking_lot::Mutex;
use std::{ffi::c_void, slice};
use windows::{Win32::Graphics::Direct3D12::*, core::Interface};

///Render event id that sets the frame offset to the event's data pointer value.
pub const SET_FRAME_OFFSET_EVENT: i32 = 2147473649;

struct DeviceHandle(ID3D12Device);
//NOTE: only used for descriptor creation, which D3D12 allows from any thread.
unsafe impl Send for DeviceHandle {}

static DEVICE: Mutex<Option<DeviceHandle>> = Mutex::new(None);

unsafe fn device_ready(raw: *mut c_void) -> Result<(), D3D12HookError> {
    let device =
        unsafe { ID3D12Device::from_raw_borrowed(&raw) }.ok_or(D3D12HookError::NullDevice)?;
    let offsets = OffsetTable::install(vtable_offsets());

    //Failed hooks degrade to pass-through, the remaining setup still runs.
    if let Err(e) = hook_device(device, offsets) {
        #[cfg(feature = "logging")]
        log::error!("Device hooks incomplete: {}", e);
        #[cfg(not(feature = "logging"))]
        let _ = e;
    }

    let increment =
        unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV) };

    if let Err(e) = hook_command_list(device, offsets) {
        #[cfg(feature = "logging")]
        log::error!("Command list hooks incomplete: {}", e);
        #[cfg(not(feature = "logging"))]
        let _ = e;
    }

    ENGINE.device_ready(increment);
    *DEVICE.lock() = Some(DeviceHandle(device.clone()));
    Ok(())
}

///Hands the host's device to the plugin. Installs the hooks on first use. Returns 1 on success.
///
/// # Safety
/// `device` must be null or a live `ID3D12Device`.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn bindless_device_ready(device: *mut c_void) -> i32 {
    match unsafe { device_ready(device) } {
        Ok(()) => 1,
        Err(e) => {
            #[cfg(feature = "logging")]
            log::error!("Bindless setup failed: {}", e);
            #[cfg(not(feature = "logging"))]
            let _ = e;
            0
        }
    }
}

///Releases the device and every tracked object. Hooks stay installed and forward unchanged.
#[unsafe(no_mangle)]
pub extern "system" fn bindless_shutdown() {
    ENGINE.shutdown();
    DEVICE.lock().take();
}

#[unsafe(no_mangle)]
pub extern "system" fn bindless_set_frame_offset(offset: i32) {
    ENGINE.set_frame_offset(offset);
}

///Writes `count` texture records, starting at bindless slot `offset` of the current frame window.
/// Returns 1 if the write went through, 0 otherwise. An empty batch succeeds once the engine is ready.
///
/// # Safety
/// `textures` must point to `count` records. It may be null if `count` is 0.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn bindless_set_textures(
    offset: i32,
    count: u32,
    textures: *const BindlessTexture,
) -> i32 {
    let textures = unsafe { texture_slice(textures, count) };

    let device = DEVICE.lock();
    let Some(DeviceHandle(device)) = device.as_ref() else {
        #[cfg(feature = "logging")]
        log::error!("bindless_set_textures called without a device");
        return 0;
    };

    match ENGINE.set_bindless_textures(&D3D12DescriptorWriter::new(device), offset, textures) {
        Ok(_written) => 1,
        Err(e) => {
            #[cfg(feature = "logging")]
            log::error!("Could not write bindless textures: {}", e);
            #[cfg(not(feature = "logging"))]
            let _ = e;
            0
        }
    }
}

///Null or zero length input reads as an empty batch.
unsafe fn texture_slice<'a>(textures: *const BindlessTexture, count: u32) -> &'a [BindlessTexture] {
    if textures.is_null() || count == 0 {
        return &[];
    }
    unsafe { slice::from_raw_parts(textures, count as usize) }
}

unsafe extern "system" fn on_render_event(event: i32, data: *mut c_void) {
    if event == SET_FRAME_OFFSET_EVENT {
        //The offset travels in the pointer value itself.
        ENGINE.set_frame_offset(data as isize as i32);
    }
}

///Callback the host issues render events through.
#[unsafe(no_mangle)]
pub extern "system" fn bindless_render_event_func() -> unsafe extern "system" fn(i32, *mut c_void) {
    on_render_event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_texture_lists() {
        let textures = [BindlessTexture::none(); 2];
        assert!(unsafe { texture_slice(core::ptr::null(), 4) }.is_empty());
        assert!(unsafe { texture_slice(textures.as_ptr(), 0) }.is_empty());
        assert_eq!(unsafe { texture_slice(textures.as_ptr(), 2) }.len(), 2);

        //Without a device an empty batch fails like any other.
        assert_eq!(unsafe { bindless_set_textures(0, 0, core::ptr::null()) }, 0);
    }

    #[test]
    fn null_device_fails() {
        assert_eq!(unsafe { bindless_device_ready(core::ptr::null_mut()) }, 0);
    }

    #[test]
    fn render_event_sets_frame_offset() {
        let callback = bindless_render_event_func();
        unsafe { callback(SET_FRAME_OFFSET_EVENT, 8192 as *mut c_void) };
        assert_eq!(ENGINE.frame_offset(), 8192);

        unsafe { callback(1, 4096 as *mut c_void) };
        assert_eq!(ENGINE.frame_offset(), 8192);

        bindless_set_frame_offset(0);
        assert_eq!(ENGINE.frame_offset(), 0);
    }
}
