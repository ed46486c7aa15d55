//! # bindless-hook-d3d12
//!
//! Direct3D 12 backend of [bindless_hook]. Loaded into the host as a plugin, it patches the host device's
//! and command lists' dispatch tables and routes every intercepted call through one process wide
//! [Engine](bindless_hook::Engine).
//!
//! The host drives it through the exported C functions in [plugin]:
//!
//! - `bindless_device_ready` installs the hooks and prepares the engine.
//! - `bindless_set_textures` writes texture views into the bindless region of the main heap.
//! - `bindless_set_frame_offset`, or the render event returned by `bindless_render_event_func`, selects
//!   the frame window.
//! - `bindless_shutdown` drops all tracked state.
//!
//! On other platforms the crate is empty.
#![cfg(windows)]

///Root signature codec on top of the D3D12 (de)serializer.
pub mod codec;

mod error;
pub use error::D3D12HookError;

mod hooks;

///Private data bridge for `ID3D12Object`.
pub mod object;

pub mod plugin;

mod vtable;
pub use vtable::vtable_offsets;

pub mod writer;
