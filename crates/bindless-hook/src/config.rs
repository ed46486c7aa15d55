use crate::error::ConfigError;

///Constants of the binding convention the engine splices into the host.
///
/// The shader side declares its bindless table as `Texture2D table[] : register(t31)`. The host only
/// knows a single texture at `t31`, which is what [rewrite](crate::layout::rewrite) looks for and replaces
/// by a table of `additional_slots` textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindlessConfig {
    ///Size of the synthetic SRV table appended to eligible root signatures.
    pub additional_slots: u32,
    ///Number of `additional_slots` sized windows reserved in the main heap. Allows the host to
    /// switch between windows per frame via the frame offset.
    pub frame_copies: u32,
    ///Shader visible CBV/SRV/UAV heaps of at least this size are treated as the host's main heap.
    pub main_heap_threshold: u32,
    ///Absolute ceiling on a heap's descriptor count.
    pub max_descriptors: u32,
    ///Last texture register reserved by the convention. Ranges ending exactly here are placeholders.
    pub reserved_register: u32,
    ///Root signatures with more parameters pass through untouched.
    pub max_root_parameters: usize,
    ///Descriptor tables with more ranges pass through untouched.
    pub max_ranges_per_table: usize,
}

impl Default for BindlessConfig {
    fn default() -> Self {
        BindlessConfig {
            additional_slots: Self::ADDITIONAL_SLOTS,
            frame_copies: 4,
            main_heap_threshold: 262_144,
            max_descriptors: 1_000_000,
            reserved_register: 31,
            max_root_parameters: 128,
            max_ranges_per_table: 64,
        }
    }
}

impl BindlessConfig {
    pub const ADDITIONAL_SLOTS: u32 = 4096;

    ///Number of descriptors added to the main heap.
    pub const fn heap_budget(&self) -> u32 {
        self.additional_slots * self.frame_copies
    }

    ///Register one past the reserved texture register. A placeholder range ends exactly here.
    pub const fn reserved_end(&self) -> u32 {
        self.reserved_register + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.additional_slots == 0 {
            return Err(ConfigError::Zero("additional_slots"));
        }
        if self.frame_copies == 0 {
            return Err(ConfigError::Zero("frame_copies"));
        }
        if self.max_root_parameters == 0 {
            return Err(ConfigError::Zero("max_root_parameters"));
        }
        if self.max_ranges_per_table == 0 {
            return Err(ConfigError::Zero("max_ranges_per_table"));
        }
        if self.main_heap_threshold > self.max_descriptors {
            return Err(ConfigError::ThresholdAboveCeiling {
                threshold: self.main_heap_threshold,
                ceiling: self.max_descriptors,
            });
        }

        let budget = self
            .additional_slots
            .checked_mul(self.frame_copies)
            .unwrap_or(u32::MAX);
        if budget >= self.max_descriptors {
            return Err(ConfigError::BudgetAboveCeiling {
                budget,
                ceiling: self.max_descriptors,
            });
        }

        Ok(())
    }
}
