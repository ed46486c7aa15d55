use bindless_hook::texture::{DescriptorWriter, Format, ResourceInfo, TextureViewDesc};
use std::ffi::c_void;
use windows::{
    Win32::Graphics::{Direct3D12::*, Dxgi::Common::DXGI_FORMAT},
    core::Interface,
};

///Writes texture views through the host's device.
pub struct D3D12DescriptorWriter<'a> {
    device: &'a ID3D12Device,
}

impl<'a> D3D12DescriptorWriter<'a> {
    pub fn new(device: &'a ID3D12Device) -> Self {
        D3D12DescriptorWriter { device }
    }
}

impl DescriptorWriter for D3D12DescriptorWriter<'_> {
    fn resource_info(&self, handle: u64) -> Option<ResourceInfo> {
        let raw = handle as usize as *mut c_void;
        //The host hands us `ID3D12Resource*` values it owns.
        let resource = unsafe { ID3D12Resource::from_raw_borrowed(&raw) }?;
        let desc = unsafe { resource.GetDesc() };
        if desc.Dimension != D3D12_RESOURCE_DIMENSION_TEXTURE2D {
            return None;
        }

        Some(ResourceInfo {
            format: Format(desc.Format.0 as u32),
            mip_levels: desc.MipLevels,
        })
    }

    fn create_srv(&self, resource: Option<u64>, view: &TextureViewDesc, cpu_handle: usize) {
        let raw = resource
            .map(|handle| handle as usize as *mut c_void)
            .unwrap_or(core::ptr::null_mut());
        let resource = unsafe { ID3D12Resource::from_raw_borrowed(&raw) };

        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT(view.format.0 as i32),
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: TextureViewDesc::DEFAULT_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: view.most_detailed_mip,
                    MipLevels: view.mip_levels,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };

        unsafe {
            self.device.CreateShaderResourceView(
                resource,
                Some(&desc as *const D3D12_SHADER_RESOURCE_VIEW_DESC),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: cpu_handle },
            )
        };
    }
}
