//! # bindless-hook
//!
//! Adds a bindless texture table to a Direct3D 12 host that never asked for one.
//!
//! The host's shaders declare `Texture2D table[] : register(t31)`, while the host itself only knows a single
//! texture at `t31`. The engine sits between host and driver:
//!
//! - [layout] rewrites every root signature that carries the `t31` placeholder and appends a descriptor
//!   table of [BindlessConfig::additional_slots] textures.
//! - [heap] grows the host's main CBV/SRV/UAV heap, the added tail holds the bindless textures.
//! - [state] tracks per command list whether a rewritten root signature is bound and redirects the
//!   synthetic table to the grown heap.
//! - [Engine::set_bindless_textures] writes the host's textures into that tail.
//!
//! Interception itself works by patching dispatch table entries of live COM objects, see [dispatch] and
//! [offsets]. Everything driver specific sits behind [object::PrivateData], [layout::LayoutCodec] and
//! [texture::DescriptorWriter], implemented by the `bindless-hook-d3d12` crate.

mod config;
pub use config::BindlessConfig;

///Patching of dispatch table entries.
pub mod dispatch;

mod engine;
pub use engine::{Engine, TableRedirect};

mod error;
pub use error::{BindlessError, ConfigError, LayoutError, PatchError};

///Heap growth decisions and the process wide heap lists.
pub mod heap;

///Root signature model and the bindless rewrite.
pub mod layout;

pub mod object;

///Dispatch table offsets of the hooked entry points.
pub mod offsets;

pub mod state;

///Host texture records and view creation.
pub mod texture;
