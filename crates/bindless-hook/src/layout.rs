//! Owned model of a root signature (the D3D12 binding layout), and the rewrite that splices the bindless
//! table into it.
//!
//! The model mirrors `D3D12_ROOT_SIGNATURE_DESC` (version 1.0) field by field. Raw enum values are kept as
//! newtypes, so values the engine doesn't care about survive a decode/encode cycle unchanged.

use crate::error::LayoutError;

mod rewrite;
pub use rewrite::{LayoutPlan, PassReason, Rewrite, RewriteMetadata, plan, rewrite};

#[cfg(test)]
pub(crate) use rewrite::tests as test_support;

///Marks a range that starts right after the previous range of the table.
pub const DESCRIPTOR_RANGE_OFFSET_APPEND: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorRangeType(pub u32);

impl DescriptorRangeType {
    pub const SRV: Self = Self(0);
    pub const UAV: Self = Self(1);
    pub const CBV: Self = Self(2);
    pub const SAMPLER: Self = Self(3);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderVisibility(pub u32);

impl ShaderVisibility {
    pub const ALL: Self = Self(0);
    pub const VERTEX: Self = Self(1);
    pub const HULL: Self = Self(2);
    pub const DOMAIN: Self = Self(3);
    pub const GEOMETRY: Self = Self(4);
    pub const PIXEL: Self = Self(5);
    pub const AMPLIFICATION: Self = Self(6);
    pub const MESH: Self = Self(7);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub range_type: DescriptorRangeType,
    pub num_descriptors: u32,
    pub base_shader_register: u32,
    pub register_space: u32,
    pub offset_in_descriptors_from_table_start: u32,
}

impl DescriptorRange {
    ///One past the last register of the range. Unbounded ranges (`u32::MAX` descriptors) end at `u64`
    /// values beyond any register.
    pub fn register_end(&self) -> u64 {
        self.base_shader_register as u64 + self.num_descriptors as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootDescriptor {
    pub shader_register: u32,
    pub register_space: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootConstants {
    pub shader_register: u32,
    pub register_space: u32,
    pub num_32bit_values: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootParameterKind {
    DescriptorTable(Vec<DescriptorRange>),
    Constants(RootConstants),
    Cbv(RootDescriptor),
    Srv(RootDescriptor),
    Uav(RootDescriptor),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootParameter {
    pub kind: RootParameterKind,
    pub visibility: ShaderVisibility,
}

impl RootParameter {
    pub fn descriptor_table(&self) -> Option<&[DescriptorRange]> {
        match &self.kind {
            RootParameterKind::DescriptorTable(ranges) => Some(ranges),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticSampler {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: u32,
    pub border_color: u32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub shader_register: u32,
    pub register_space: u32,
    pub visibility: ShaderVisibility,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RootSignatureDesc {
    pub flags: u32,
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
}

impl RootSignatureDesc {
    pub fn descriptor_table_count(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| p.descriptor_table().is_some())
            .count()
    }

    ///Number of ranges of the largest descriptor table.
    pub fn max_table_ranges(&self) -> usize {
        self.parameters
            .iter()
            .filter_map(|p| p.descriptor_table())
            .map(|ranges| ranges.len())
            .max()
            .unwrap_or(0)
    }
}

///Translates between serialized root signature blobs and [RootSignatureDesc].
///
/// Implemented by the backend on top of the driver's (de)serializer.
pub trait LayoutCodec {
    ///Decodes `blob` into an owned description. The result must not borrow from driver owned memory.
    fn decode(&self, blob: &[u8]) -> Result<RootSignatureDesc, LayoutError>;
    fn encode(&self, desc: &RootSignatureDesc) -> Result<Vec<u8>, LayoutError>;
}
