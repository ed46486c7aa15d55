//! Texture records handed in by the host and the shader resource views built from them.

use bytemuck::{Pod, Zeroable};

///Kind byte of a [BindlessTexture].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TextureKind {
    ///Writes a null view into the slot.
    None = 0,
    ///`handle` is an `ID3D12Resource*`.
    Resource = 1,
    ///`handle` is an already created view. Not supported on D3D12.
    RawView = 2,
}

impl TextureKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TextureKind::None),
            1 => Some(TextureKind::Resource),
            2 => Some(TextureKind::RawView),
            _ => None,
        }
    }
}

///One entry of the host's texture list. Shared with the host as a 16 byte record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct BindlessTexture {
    pub handle: u64,
    pub kind: u8,
    pub min_mip: u8,
    ///[BindlessTexture::ALL_MIPS] selects every mip from `min_mip` on.
    pub max_mip: u8,
    ///Raw `DXGI_FORMAT` override, 0 to derive the format from the resource.
    pub format_override: u8,
    pub reserved: u32,
}

impl BindlessTexture {
    pub const ALL_MIPS: u8 = 255;

    pub fn none() -> Self {
        Self::default()
    }

    pub fn resource(handle: u64) -> Self {
        BindlessTexture {
            handle,
            kind: TextureKind::Resource as u8,
            min_mip: 0,
            max_mip: Self::ALL_MIPS,
            format_override: 0,
            reserved: 0,
        }
    }

    pub fn kind(&self) -> Option<TextureKind> {
        TextureKind::from_raw(self.kind)
    }
}

///Raw `DXGI_FORMAT` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Format(pub u32);

impl Format {
    pub const UNKNOWN: Self = Self(0);
    pub const R8G8B8A8_UNORM: Self = Self(28);
    pub const R8G8B8A8_UNORM_SRGB: Self = Self(29);

    ///Maps a typeless format to the typed format a texture view of it uses. Typed formats are
    /// returned unchanged.
    pub const fn typed(self) -> Self {
        let typed = match self.0 {
            1 => 4,   //R32G32B32A32_TYPELESS -> UINT
            5 => 8,   //R32G32B32_TYPELESS -> UINT
            9 => 11,  //R16G16B16A16_TYPELESS -> UNORM
            15 => 17, //R32G32_TYPELESS -> UINT
            19 => 22, //R32G8X24_TYPELESS -> X32_TYPELESS_G8X24_UINT
            23 => 24, //R10G10B10A2_TYPELESS -> UNORM
            27 => 28, //R8G8B8A8_TYPELESS -> UNORM
            33 => 35, //R16G16_TYPELESS -> UNORM
            39 => 42, //R32_TYPELESS -> UINT
            44 => 46, //R24G8_TYPELESS -> R24_UNORM_X8_TYPELESS
            48 => 49, //R8G8_TYPELESS -> UNORM
            53 => 56, //R16_TYPELESS -> UNORM
            60 => 61, //R8_TYPELESS -> UNORM
            70 => 71, //BC1_TYPELESS -> UNORM
            73 => 74, //BC2
            76 => 77, //BC3
            79 => 80, //BC4
            82 => 83, //BC5
            90 => 91, //B8G8R8A8_TYPELESS -> UNORM_SRGB
            92 => 93, //B8G8R8X8_TYPELESS -> UNORM_SRGB
            94 => 95, //BC6H_TYPELESS -> UF16
            97 => 98, //BC7
            other => other,
        };
        Format(typed)
    }
}

///What the driver reports about a texture resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub format: Format,
    pub mip_levels: u16,
}

///Texture2D shader resource view with the default component mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureViewDesc {
    pub format: Format,
    pub most_detailed_mip: u32,
    pub mip_levels: u32,
}

impl TextureViewDesc {
    ///`D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING`
    pub const DEFAULT_COMPONENT_MAPPING: u32 = 0x1688;

    ///View written for empty slots.
    pub const fn null() -> Self {
        TextureViewDesc {
            format: Format::R8G8B8A8_UNORM_SRGB,
            most_detailed_mip: 0,
            mip_levels: 1,
        }
    }

    pub fn for_resource(texture: &BindlessTexture, resource: &ResourceInfo) -> Self {
        let format = if texture.format_override != 0 {
            Format(texture.format_override as u32)
        } else {
            resource.format.typed()
        };

        let min = texture.min_mip as u32;
        let mip_levels = if texture.max_mip == BindlessTexture::ALL_MIPS {
            (resource.mip_levels as u32).saturating_sub(min)
        } else {
            (texture.max_mip as u32).saturating_sub(min)
        };

        TextureViewDesc {
            format,
            most_detailed_mip: min,
            mip_levels: mip_levels.max(1),
        }
    }
}

///Creates shader resource views on behalf of [Engine::set_bindless_textures](crate::Engine::set_bindless_textures).
pub trait DescriptorWriter {
    ///Describes the resource behind `handle`, `None` if it isn't a texture.
    fn resource_info(&self, handle: u64) -> Option<ResourceInfo>;

    ///Writes a view of `resource` (or a null view) to the CPU descriptor handle `cpu_handle`.
    fn create_srv(&self, resource: Option<u64>, view: &TextureViewDesc, cpu_handle: usize);
}
