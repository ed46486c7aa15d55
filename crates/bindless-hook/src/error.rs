use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Object pointer was null")]
    NullObject,
    #[error("Object at {0:#x} has no dispatch table")]
    NullTable(usize),
    #[error("Could not make dispatch slot at {address:#x} writable (os error {code})")]
    Protection { address: usize, code: i32 },
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Could not decode root signature blob: {0}")]
    Decode(String),
    #[error("Could not encode root signature: {0}")]
    Encode(String),
    #[error("Root signature exceeds rewrite limits: {parameters} parameters, {ranges} ranges in largest table")]
    Limits { parameters: usize, ranges: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must not be zero")]
    Zero(&'static str),
    #[error("Main heap threshold {threshold} exceeds the descriptor ceiling {ceiling}")]
    ThresholdAboveCeiling { threshold: u32, ceiling: u32 },
    #[error("Bindless budget {budget} does not fit below the descriptor ceiling {ceiling}")]
    BudgetAboveCeiling { budget: u32, ceiling: u32 },
}

#[derive(Error, Debug)]
pub enum BindlessError {
    #[error("Patch error: {0}")]
    PatchError(#[from] PatchError),
    #[error("Layout error: {0}")]
    LayoutError(#[from] LayoutError),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Could not attach bindless metadata to object {0:#x}")]
    MetadataAttach(usize),
    #[error("Bindless engine is not initialized")]
    NotInitialized,
    #[error("No hooked descriptor heap was created yet")]
    NoHookedHeap,
}

#[cfg(test)]
mod test {
    use static_assertions::assert_impl_all;

    use crate::error::{BindlessError, ConfigError, LayoutError, PatchError};

    #[test]
    fn assure_send_sync() {
        assert_impl_all!(PatchError: Send, Sync);
        assert_impl_all!(LayoutError: Send, Sync);
        assert_impl_all!(ConfigError: Send, Sync);
        assert_impl_all!(BindlessError: Send, Sync);
    }

    #[test]
    fn wraps_sources() {
        let err: BindlessError = PatchError::NullObject.into();
        assert!(matches!(err, BindlessError::PatchError(PatchError::NullObject)));
        assert!(err.to_string().contains("Object pointer was null"));
    }
}
