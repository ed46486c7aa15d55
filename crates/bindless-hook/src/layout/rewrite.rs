use super::{
    DESCRIPTOR_RANGE_OFFSET_APPEND, DescriptorRange, DescriptorRangeType, LayoutCodec,
    RootParameter, RootParameterKind, RootSignatureDesc, ShaderVisibility,
};
use crate::{config::BindlessConfig, error::LayoutError};
use bytemuck::{Pod, Zeroable};

///Attached to every root signature that received the synthetic table, and to every pipeline state
/// created from such a root signature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct RewriteMetadata {
    ///Root parameter index of the appended table.
    pub synthetic_slot: u32,
    ///Number of descriptors in the appended table.
    pub max_additional_slots: u32,
}

///Why a root signature is created from its original blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassReason {
    ///The layout has no descriptor tables at all.
    NoTables,
    ///No SRV range ends at the reserved register.
    NoPlaceholder,
    ///Some SRV range reaches past the reserved register, so the shader can't use the convention.
    ExceedsReserved,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rewrite {
    PassThrough(PassReason),
    Rewritten {
        desc: RootSignatureDesc,
        metadata: RewriteMetadata,
    },
}

///What to hand to the driver's root signature creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutPlan {
    ///Create from the caller's blob.
    Original,
    Rewritten {
        blob: Vec<u8>,
        metadata: RewriteMetadata,
    },
}

fn is_bindless_visible(visibility: ShaderVisibility) -> bool {
    visibility == ShaderVisibility::ALL || visibility == ShaderVisibility::PIXEL
}

///Replaces the placeholder texture range (`t{reserved_register}`, space 0) of `original` by an appended
/// descriptor table of `additional_slots` textures.
///
/// `original` is never modified, the rewritten description is a deep copy. Errors only if the layout
/// exceeds the configured rewrite limits.
pub fn rewrite(
    original: &RootSignatureDesc,
    config: &BindlessConfig,
) -> Result<Rewrite, LayoutError> {
    //One parameter must stay free for the synthetic table.
    if original.parameters.len() >= config.max_root_parameters
        || original.max_table_ranges() > config.max_ranges_per_table
    {
        return Err(LayoutError::Limits {
            parameters: original.parameters.len(),
            ranges: original.max_table_ranges(),
        });
    }

    if original.descriptor_table_count() == 0 {
        return Ok(Rewrite::PassThrough(PassReason::NoTables));
    }

    let reserved_end = config.reserved_end() as u64;
    let mut desc = original.clone();
    let mut needs_table = false;
    let mut exceeds = false;

    for (param_idx, param) in desc.parameters.iter_mut().enumerate() {
        if !is_bindless_visible(param.visibility) {
            continue;
        }
        let RootParameterKind::DescriptorTable(ranges) = &mut param.kind else {
            continue;
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "Root parameter {}: descriptor table with {} ranges",
            param_idx,
            ranges.len()
        );
        #[cfg(not(feature = "logging"))]
        let _ = param_idx;

        let mut kept: Vec<DescriptorRange> = Vec::with_capacity(ranges.len());
        for range in ranges.iter() {
            if range.register_space != 0 || range.range_type != DescriptorRangeType::SRV {
                kept.push(*range);
                continue;
            }

            let end = range.register_end();
            if end != reserved_end {
                if end > reserved_end {
                    exceeds = true;
                    #[cfg(feature = "logging")]
                    log::warn!(
                        "Shader uses more than {} texture registers (t{}..{}), not eligible for bindless",
                        reserved_end,
                        range.base_shader_register,
                        end
                    );
                }
                kept.push(*range);
                continue;
            }

            if exceeds {
                kept.push(*range);
                continue;
            }

            needs_table = true;
            if range.num_descriptors == 1 {
                #[cfg(feature = "logging")]
                log::debug!("Removing placeholder range t{}", range.base_shader_register);
                continue;
            }

            #[cfg(feature = "logging")]
            log::debug!(
                "Shrinking range t{}+{} by one",
                range.base_shader_register,
                range.num_descriptors
            );
            let mut shrunk = *range;
            shrunk.num_descriptors -= 1;
            kept.push(shrunk);
        }

        *ranges = kept;
    }

    if exceeds {
        return Ok(Rewrite::PassThrough(PassReason::ExceedsReserved));
    }
    if !needs_table {
        return Ok(Rewrite::PassThrough(PassReason::NoPlaceholder));
    }

    desc.parameters.push(RootParameter {
        kind: RootParameterKind::DescriptorTable(vec![DescriptorRange {
            range_type: DescriptorRangeType::SRV,
            num_descriptors: config.additional_slots,
            base_shader_register: config.reserved_register,
            register_space: 0,
            offset_in_descriptors_from_table_start: DESCRIPTOR_RANGE_OFFSET_APPEND,
        }]),
        visibility: ShaderVisibility::ALL,
    });

    let metadata = RewriteMetadata {
        synthetic_slot: (desc.parameters.len() - 1) as u32,
        max_additional_slots: config.additional_slots,
    };

    #[cfg(feature = "logging")]
    log::debug!(
        "Appended bindless table at root parameter {}",
        metadata.synthetic_slot
    );

    Ok(Rewrite::Rewritten { desc, metadata })
}

///Decodes `blob`, rewrites it and encodes the result. Every failure along the way degrades to
/// [LayoutPlan::Original].
pub fn plan(codec: &impl LayoutCodec, blob: &[u8], config: &BindlessConfig) -> LayoutPlan {
    let desc = match codec.decode(blob) {
        Ok(desc) => desc,
        Err(_e) => {
            #[cfg(feature = "logging")]
            log::error!("Can't decode root signature, using it unmodified: {}", _e);
            return LayoutPlan::Original;
        }
    };

    let (desc, metadata) = match rewrite(&desc, config) {
        Ok(Rewrite::Rewritten { desc, metadata }) => (desc, metadata),
        Ok(Rewrite::PassThrough(_reason)) => {
            #[cfg(feature = "logging")]
            log::trace!("Root signature passes through: {:?}", _reason);
            return LayoutPlan::Original;
        }
        Err(_e) => {
            #[cfg(feature = "logging")]
            log::warn!("Root signature not rewritten: {}", _e);
            return LayoutPlan::Original;
        }
    };

    match codec.encode(&desc) {
        Ok(blob) => LayoutPlan::Rewritten { blob, metadata },
        Err(_e) => {
            #[cfg(feature = "logging")]
            log::error!("Failed to serialize rewritten root signature: {}", _e);
            LayoutPlan::Original
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::layout::{RootDescriptor, StaticSampler};
    use std::cell::RefCell;

    pub fn srv(base: u32, count: u32, space: u32) -> DescriptorRange {
        DescriptorRange {
            range_type: DescriptorRangeType::SRV,
            num_descriptors: count,
            base_shader_register: base,
            register_space: space,
            offset_in_descriptors_from_table_start: DESCRIPTOR_RANGE_OFFSET_APPEND,
        }
    }

    fn uav(base: u32, count: u32) -> DescriptorRange {
        DescriptorRange {
            range_type: DescriptorRangeType::UAV,
            ..srv(base, count, 0)
        }
    }

    pub fn table(ranges: Vec<DescriptorRange>, visibility: ShaderVisibility) -> RootParameter {
        RootParameter {
            kind: RootParameterKind::DescriptorTable(ranges),
            visibility,
        }
    }

    pub fn with_params(parameters: Vec<RootParameter>) -> RootSignatureDesc {
        RootSignatureDesc {
            flags: 0,
            parameters,
            static_samplers: vec![StaticSampler {
                filter: 0x15,
                address_u: 1,
                address_v: 1,
                address_w: 1,
                mip_lod_bias: 0.0,
                max_anisotropy: 1,
                comparison_func: 8,
                border_color: 0,
                min_lod: 0.0,
                max_lod: f32::MAX,
                shader_register: 0,
                register_space: 0,
                visibility: ShaderVisibility::ALL,
            }],
        }
    }

    ///Keeps decoded descriptions in memory, a blob is the index into that list.
    #[derive(Default)]
    pub struct MemoryCodec {
        pub stored: RefCell<Vec<RootSignatureDesc>>,
        pub fail_encode: bool,
    }

    impl MemoryCodec {
        pub fn store(&self, desc: RootSignatureDesc) -> Vec<u8> {
            let mut stored = self.stored.borrow_mut();
            stored.push(desc);
            ((stored.len() - 1) as u32).to_le_bytes().to_vec()
        }
    }

    impl LayoutCodec for MemoryCodec {
        fn decode(&self, blob: &[u8]) -> Result<RootSignatureDesc, LayoutError> {
            let idx: [u8; 4] = blob
                .try_into()
                .map_err(|_| LayoutError::Decode("blob is not an index".to_owned()))?;
            self.stored
                .borrow()
                .get(u32::from_le_bytes(idx) as usize)
                .cloned()
                .ok_or_else(|| LayoutError::Decode("unknown blob".to_owned()))
        }

        fn encode(&self, desc: &RootSignatureDesc) -> Result<Vec<u8>, LayoutError> {
            if self.fail_encode {
                return Err(LayoutError::Encode("refused".to_owned()));
            }
            Ok(self.store(desc.clone()))
        }
    }

    #[test]
    fn single_placeholder_is_replaced() {
        let cfg = BindlessConfig::default();
        let original = with_params(vec![
            RootParameter {
                kind: RootParameterKind::Cbv(RootDescriptor {
                    shader_register: 0,
                    register_space: 0,
                }),
                visibility: ShaderVisibility::ALL,
            },
            table(vec![uav(0, 1), srv(31, 1, 0)], ShaderVisibility::ALL),
        ]);

        let Rewrite::Rewritten { desc, metadata } = rewrite(&original, &cfg).unwrap() else {
            panic!("expected rewrite");
        };

        assert_eq!(desc.parameters.len(), original.parameters.len() + 1);
        assert_eq!(desc.parameters[1].descriptor_table().unwrap(), &[uav(0, 1)]);
        assert_eq!(metadata.synthetic_slot, 2);
        assert_eq!(metadata.max_additional_slots, 4096);

        let appended = &desc.parameters[2];
        assert_eq!(appended.visibility, ShaderVisibility::ALL);
        let ranges = appended.descriptor_table().unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].range_type, DescriptorRangeType::SRV);
        assert_eq!(ranges[0].num_descriptors, cfg.additional_slots);
        assert_eq!(ranges[0].base_shader_register, 31);
        assert_eq!(ranges[0].register_space, 0);
        assert_eq!(
            ranges[0].offset_in_descriptors_from_table_start,
            DESCRIPTOR_RANGE_OFFSET_APPEND
        );

        //Static samplers and flags survive the copy.
        assert_eq!(desc.static_samplers, original.static_samplers);
        assert_eq!(desc.flags, original.flags);
    }

    #[test]
    fn wide_placeholder_is_shrunk() {
        let original = with_params(vec![table(vec![srv(0, 32, 0)], ShaderVisibility::PIXEL)]);
        let Rewrite::Rewritten { desc, metadata } =
            rewrite(&original, &BindlessConfig::default()).unwrap()
        else {
            panic!("expected rewrite");
        };

        assert_eq!(desc.parameters[0].descriptor_table().unwrap(), &[srv(0, 31, 0)]);
        assert_eq!(metadata.synthetic_slot, 1);
    }

    #[test]
    fn exceeding_range_is_ineligible() {
        let original = with_params(vec![
            table(vec![srv(31, 1, 0)], ShaderVisibility::ALL),
            table(vec![srv(20, 20, 0)], ShaderVisibility::ALL),
        ]);
        assert_eq!(
            rewrite(&original, &BindlessConfig::default()).unwrap(),
            Rewrite::PassThrough(PassReason::ExceedsReserved)
        );
    }

    #[test]
    fn unbounded_range_is_ineligible() {
        let original = with_params(vec![table(
            vec![srv(0, u32::MAX, 0), srv(31, 1, 0)],
            ShaderVisibility::ALL,
        )]);
        assert_eq!(
            rewrite(&original, &BindlessConfig::default()).unwrap(),
            Rewrite::PassThrough(PassReason::ExceedsReserved)
        );
    }

    #[test]
    fn other_spaces_and_types_are_ignored() {
        let original = with_params(vec![table(
            vec![srv(31, 1, 1), uav(31, 1), srv(0, 4, 0)],
            ShaderVisibility::ALL,
        )]);
        assert_eq!(
            rewrite(&original, &BindlessConfig::default()).unwrap(),
            Rewrite::PassThrough(PassReason::NoPlaceholder)
        );
    }

    #[test]
    fn vertex_only_tables_are_ignored() {
        let original = with_params(vec![table(vec![srv(31, 1, 0)], ShaderVisibility::VERTEX)]);
        assert_eq!(
            rewrite(&original, &BindlessConfig::default()).unwrap(),
            Rewrite::PassThrough(PassReason::NoPlaceholder)
        );
    }

    #[test]
    fn no_tables_passes() {
        let original = with_params(vec![RootParameter {
            kind: RootParameterKind::Srv(RootDescriptor {
                shader_register: 31,
                register_space: 0,
            }),
            visibility: ShaderVisibility::ALL,
        }]);
        assert_eq!(
            rewrite(&original, &BindlessConfig::default()).unwrap(),
            Rewrite::PassThrough(PassReason::NoTables)
        );
    }

    #[test]
    fn limits_are_enforced() {
        let cfg = BindlessConfig {
            max_ranges_per_table: 2,
            ..Default::default()
        };
        let original = with_params(vec![table(
            vec![srv(0, 1, 0), srv(1, 1, 0), srv(31, 1, 0)],
            ShaderVisibility::ALL,
        )]);
        assert!(matches!(
            rewrite(&original, &cfg),
            Err(LayoutError::Limits { ranges: 3, .. })
        ));

        let cfg = BindlessConfig {
            max_root_parameters: 1,
            ..Default::default()
        };
        assert!(matches!(
            rewrite(&original, &cfg),
            Err(LayoutError::Limits { parameters: 1, .. })
        ));
    }

    #[test]
    fn plan_keeps_ineligible_blob() {
        let codec = MemoryCodec::default();
        let blob = codec.store(with_params(vec![table(
            vec![srv(0, 40, 0)],
            ShaderVisibility::ALL,
        )]));

        assert_eq!(
            plan(&codec, &blob, &BindlessConfig::default()),
            LayoutPlan::Original
        );
        //Nothing was serialized.
        assert_eq!(codec.stored.borrow().len(), 1);
    }

    #[test]
    fn plan_encodes_rewrite() {
        let codec = MemoryCodec::default();
        let blob = codec.store(with_params(vec![table(
            vec![srv(31, 1, 0)],
            ShaderVisibility::ALL,
        )]));

        let LayoutPlan::Rewritten { blob, metadata } =
            plan(&codec, &blob, &BindlessConfig::default())
        else {
            panic!("expected rewritten plan");
        };
        assert_eq!(metadata.synthetic_slot, 1);

        let decoded = codec.decode(&blob).unwrap();
        assert_eq!(decoded.parameters.len(), 2);
        assert!(decoded.parameters[0].descriptor_table().unwrap().is_empty());
    }

    #[test]
    fn plan_falls_back_on_encode_failure() {
        let codec = MemoryCodec {
            fail_encode: true,
            ..Default::default()
        };
        let blob = codec.store(with_params(vec![table(
            vec![srv(31, 1, 0)],
            ShaderVisibility::ALL,
        )]));
        assert_eq!(
            plan(&codec, &blob, &BindlessConfig::default()),
            LayoutPlan::Original
        );
    }

    #[test]
    fn plan_falls_back_on_decode_failure() {
        let codec = MemoryCodec::default();
        assert_eq!(
            plan(&codec, &[1, 2, 3], &BindlessConfig::default()),
            LayoutPlan::Original
        );
    }
}
