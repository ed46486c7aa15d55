use bindless_hook::{BindlessError, PatchError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum D3D12HookError {
    #[error("Bindless error: {0}")]
    Bindless(#[from] BindlessError),
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),
    #[error("D3D12 call failed: {0}")]
    Windows(#[from] windows::core::Error),
    #[error("Device pointer was null")]
    NullDevice,
}
