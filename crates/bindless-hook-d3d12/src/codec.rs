//! Root signature (de)serialization through the D3D12 runtime.

use bindless_hook::{
    LayoutError,
    layout::{
        DescriptorRange, DescriptorRangeType, LayoutCodec, RootConstants, RootDescriptor,
        RootParameter, RootParameterKind, RootSignatureDesc, ShaderVisibility, StaticSampler,
    },
};
use std::{ffi::c_void, slice};
use windows::Win32::Graphics::{Direct3D::ID3DBlob, Direct3D12::*};

///Codec backed by `D3D12CreateRootSignatureDeserializer` and `D3D12SerializeRootSignature` (version 1.0).
pub struct D3D12LayoutCodec;

unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(ptr, len as usize) }
    }
}

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    let (ptr, len) = unsafe { (blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) };
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { slice::from_raw_parts(ptr, len) }.to_vec()
}

fn blob_message(blob: Option<&ID3DBlob>) -> String {
    match blob {
        Some(blob) => String::from_utf8_lossy(&blob_bytes(blob))
            .trim_end_matches('\0')
            .trim()
            .to_owned(),
        None => String::from("no error message"),
    }
}

fn decode_range(range: &D3D12_DESCRIPTOR_RANGE) -> DescriptorRange {
    DescriptorRange {
        range_type: DescriptorRangeType(range.RangeType.0 as u32),
        num_descriptors: range.NumDescriptors,
        base_shader_register: range.BaseShaderRegister,
        register_space: range.RegisterSpace,
        offset_in_descriptors_from_table_start: range.OffsetInDescriptorsFromTableStart,
    }
}

unsafe fn decode_parameter(param: &D3D12_ROOT_PARAMETER) -> Result<RootParameter, LayoutError> {
    let kind = match param.ParameterType {
        D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE => {
            let table = unsafe { &param.Anonymous.DescriptorTable };
            let ranges =
                unsafe { raw_slice(table.pDescriptorRanges, table.NumDescriptorRanges) };
            RootParameterKind::DescriptorTable(ranges.iter().map(decode_range).collect())
        }
        D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS => {
            let constants = unsafe { &param.Anonymous.Constants };
            RootParameterKind::Constants(RootConstants {
                shader_register: constants.ShaderRegister,
                register_space: constants.RegisterSpace,
                num_32bit_values: constants.Num32BitValues,
            })
        }
        D3D12_ROOT_PARAMETER_TYPE_CBV
        | D3D12_ROOT_PARAMETER_TYPE_SRV
        | D3D12_ROOT_PARAMETER_TYPE_UAV => {
            let descriptor = unsafe { &param.Anonymous.Descriptor };
            let descriptor = RootDescriptor {
                shader_register: descriptor.ShaderRegister,
                register_space: descriptor.RegisterSpace,
            };
            match param.ParameterType {
                D3D12_ROOT_PARAMETER_TYPE_CBV => RootParameterKind::Cbv(descriptor),
                D3D12_ROOT_PARAMETER_TYPE_SRV => RootParameterKind::Srv(descriptor),
                _ => RootParameterKind::Uav(descriptor),
            }
        }
        other => {
            return Err(LayoutError::Decode(format!(
                "unknown root parameter type {}",
                other.0
            )));
        }
    };

    Ok(RootParameter {
        kind,
        visibility: ShaderVisibility(param.ShaderVisibility.0 as u32),
    })
}

fn decode_sampler(sampler: &D3D12_STATIC_SAMPLER_DESC) -> StaticSampler {
    StaticSampler {
        filter: sampler.Filter.0 as u32,
        address_u: sampler.AddressU.0 as u32,
        address_v: sampler.AddressV.0 as u32,
        address_w: sampler.AddressW.0 as u32,
        mip_lod_bias: sampler.MipLODBias,
        max_anisotropy: sampler.MaxAnisotropy,
        comparison_func: sampler.ComparisonFunc.0 as u32,
        border_color: sampler.BorderColor.0 as u32,
        min_lod: sampler.MinLOD,
        max_lod: sampler.MaxLOD,
        shader_register: sampler.ShaderRegister,
        register_space: sampler.RegisterSpace,
        visibility: ShaderVisibility(sampler.ShaderVisibility.0 as u32),
    }
}

fn encode_range(range: &DescriptorRange) -> D3D12_DESCRIPTOR_RANGE {
    D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE(range.range_type.0 as i32),
        NumDescriptors: range.num_descriptors,
        BaseShaderRegister: range.base_shader_register,
        RegisterSpace: range.register_space,
        OffsetInDescriptorsFromTableStart: range.offset_in_descriptors_from_table_start,
    }
}

fn encode_sampler(sampler: &StaticSampler) -> D3D12_STATIC_SAMPLER_DESC {
    D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER(sampler.filter as i32),
        AddressU: D3D12_TEXTURE_ADDRESS_MODE(sampler.address_u as i32),
        AddressV: D3D12_TEXTURE_ADDRESS_MODE(sampler.address_v as i32),
        AddressW: D3D12_TEXTURE_ADDRESS_MODE(sampler.address_w as i32),
        MipLODBias: sampler.mip_lod_bias,
        MaxAnisotropy: sampler.max_anisotropy,
        ComparisonFunc: D3D12_COMPARISON_FUNC(sampler.comparison_func as i32),
        BorderColor: D3D12_STATIC_BORDER_COLOR(sampler.border_color as i32),
        MinLOD: sampler.min_lod,
        MaxLOD: sampler.max_lod,
        ShaderRegister: sampler.shader_register,
        RegisterSpace: sampler.register_space,
        ShaderVisibility: D3D12_SHADER_VISIBILITY(sampler.visibility.0 as i32),
    }
}

impl LayoutCodec for D3D12LayoutCodec {
    fn decode(&self, blob: &[u8]) -> Result<RootSignatureDesc, LayoutError> {
        let deserializer: ID3D12RootSignatureDeserializer = unsafe {
            D3D12CreateRootSignatureDeserializer(blob.as_ptr() as *const c_void, blob.len())
        }
        .map_err(|e| LayoutError::Decode(e.message()))?;

        //Owned by the deserializer, everything is copied out before it is released.
        let desc = unsafe { deserializer.GetRootSignatureDesc().as_ref() }
            .ok_or_else(|| LayoutError::Decode("deserializer returned no description".to_owned()))?;

        let parameters = unsafe { raw_slice(desc.pParameters, desc.NumParameters) }
            .iter()
            .map(|p| unsafe { decode_parameter(p) })
            .collect::<Result<Vec<_>, _>>()?;
        let static_samplers = unsafe { raw_slice(desc.pStaticSamplers, desc.NumStaticSamplers) }
            .iter()
            .map(decode_sampler)
            .collect();

        Ok(RootSignatureDesc {
            flags: desc.Flags.0 as u32,
            parameters,
            static_samplers,
        })
    }

    fn encode(&self, desc: &RootSignatureDesc) -> Result<Vec<u8>, LayoutError> {
        //Range arrays must outlive the serialize call, the parameters only point into them.
        let tables: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
            .parameters
            .iter()
            .map(|p| match &p.kind {
                RootParameterKind::DescriptorTable(ranges) => {
                    ranges.iter().map(encode_range).collect()
                }
                _ => Vec::new(),
            })
            .collect();

        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(tables.iter())
            .map(|(param, ranges)| {
                let (ty, anonymous) = match &param.kind {
                    RootParameterKind::DescriptorTable(_) => (
                        D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                        D3D12_ROOT_PARAMETER_0 {
                            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                                NumDescriptorRanges: ranges.len() as u32,
                                pDescriptorRanges: if ranges.is_empty() {
                                    core::ptr::null()
                                } else {
                                    ranges.as_ptr()
                                },
                            },
                        },
                    ),
                    RootParameterKind::Constants(c) => (
                        D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                        D3D12_ROOT_PARAMETER_0 {
                            Constants: D3D12_ROOT_CONSTANTS {
                                ShaderRegister: c.shader_register,
                                RegisterSpace: c.register_space,
                                Num32BitValues: c.num_32bit_values,
                            },
                        },
                    ),
                    RootParameterKind::Cbv(d)
                    | RootParameterKind::Srv(d)
                    | RootParameterKind::Uav(d) => (
                        match &param.kind {
                            RootParameterKind::Cbv(_) => D3D12_ROOT_PARAMETER_TYPE_CBV,
                            RootParameterKind::Srv(_) => D3D12_ROOT_PARAMETER_TYPE_SRV,
                            _ => D3D12_ROOT_PARAMETER_TYPE_UAV,
                        },
                        D3D12_ROOT_PARAMETER_0 {
                            Descriptor: D3D12_ROOT_DESCRIPTOR {
                                ShaderRegister: d.shader_register,
                                RegisterSpace: d.register_space,
                            },
                        },
                    ),
                };

                D3D12_ROOT_PARAMETER {
                    ParameterType: ty,
                    Anonymous: anonymous,
                    ShaderVisibility: D3D12_SHADER_VISIBILITY(param.visibility.0 as i32),
                }
            })
            .collect();

        let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> =
            desc.static_samplers.iter().map(encode_sampler).collect();

        let raw = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: if parameters.is_empty() {
                core::ptr::null()
            } else {
                parameters.as_ptr()
            },
            NumStaticSamplers: samplers.len() as u32,
            pStaticSamplers: if samplers.is_empty() {
                core::ptr::null()
            } else {
                samplers.as_ptr()
            },
            Flags: D3D12_ROOT_SIGNATURE_FLAGS(desc.flags as i32),
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        let res = unsafe {
            D3D12SerializeRootSignature(
                &raw,
                D3D_ROOT_SIGNATURE_VERSION_1_0,
                &mut blob,
                Some(&mut error as *mut Option<ID3DBlob>),
            )
        };

        match (res, blob) {
            (Ok(()), Some(blob)) => Ok(blob_bytes(&blob)),
            (Ok(()), None) => Err(LayoutError::Encode("serializer returned no blob".to_owned())),
            (Err(e), _) => Err(LayoutError::Encode(format!(
                "{}: {}",
                e.message(),
                blob_message(error.as_ref())
            ))),
        }
    }
}
