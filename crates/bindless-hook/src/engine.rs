use crate::{
    config::BindlessConfig,
    error::BindlessError,
    heap::{HeapDesc, HeapPlan, HeapRegistry, HookedHeap, plan_heap},
    layout::{LayoutCodec, LayoutPlan, RewriteMetadata, plan},
    object::{ObjectId, PrivateData},
    state::{CommandListState, PipelineKind},
    texture::{BindlessTexture, DescriptorWriter, TextureKind, TextureViewDesc},
};
use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

///Second descriptor table bind the hook has to issue after forwarding the host's bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableRedirect {
    pub root_index: u32,
    pub gpu_descriptor: u64,
}

///Process wide bindless state. Every hooked entry point routes its decisions through one instance.
///
/// Creation time state (rewritten layouts, grown heaps) sits behind coarse locks, those calls are rare.
/// Command list state lives in the list's private data and is passed in through [PrivateData].
pub struct Engine {
    config: BindlessConfig,
    layouts: RwLock<AHashMap<ObjectId, RewriteMetadata>>,
    heaps: HeapRegistry,
    increment: AtomicU32,
    frame_offset: AtomicI32,
    initialized: AtomicBool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_valid_config(BindlessConfig::default())
    }
}

impl Engine {
    pub fn new(config: BindlessConfig) -> Result<Self, BindlessError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: BindlessConfig) -> Self {
        Engine {
            config,
            layouts: RwLock::new(AHashMap::default()),
            heaps: HeapRegistry::new(),
            increment: AtomicU32::new(0),
            frame_offset: AtomicI32::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BindlessConfig {
        &self.config
    }

    pub fn heaps(&self) -> &HeapRegistry {
        &self.heaps
    }

    ///Called once the host's device exists. `srv_increment` is the device's CBV/SRV/UAV descriptor
    /// handle increment.
    pub fn device_ready(&self, srv_increment: u32) {
        self.increment.store(srv_increment, Ordering::Release);
        self.initialized.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        log::info!(
            "Bindless ready: {} slots x {} frames, descriptor increment {}",
            self.config.additional_slots,
            self.config.frame_copies,
            srv_increment
        );
    }

    ///Drops every tracked object. The hooks stay installed and keep forwarding.
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
        self.layouts.write().clear();
        self.heaps.clear();
        self.frame_offset.store(0, Ordering::Release);

        #[cfg(feature = "logging")]
        log::info!("Bindless shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn increment(&self) -> u32 {
        self.increment.load(Ordering::Acquire)
    }

    ///Selects the descriptor window used by redirects and writes from now on.
    pub fn set_frame_offset(&self, offset: i32) {
        self.frame_offset.store(offset, Ordering::Release);
    }

    pub fn frame_offset(&self) -> i32 {
        self.frame_offset.load(Ordering::Acquire)
    }

    ///Decides what root signature blob the driver gets.
    pub fn plan_root_signature(&self, codec: &impl LayoutCodec, blob: &[u8]) -> LayoutPlan {
        plan(codec, blob, &self.config)
    }

    ///Records `metadata` for a root signature created from a rewritten blob.
    ///
    /// Fails if the metadata can't be stored on the object. Later binds of that root signature would then
    /// miss the redirect, so the caller must not continue.
    pub fn attach_layout(
        &self,
        root_signature: &impl PrivateData,
        metadata: RewriteMetadata,
    ) -> Result<(), BindlessError> {
        let id = root_signature.object_id();
        self.layouts.write().insert(id, metadata);

        if !root_signature.set(&metadata) {
            #[cfg(feature = "logging")]
            log::error!("Can't set private data on root signature {:#x}", id.0);
            return Err(BindlessError::MetadataAttach(id.0));
        }

        #[cfg(feature = "logging")]
        log::debug!(
            "Root signature {:#x} has its bindless table at parameter {}",
            id.0,
            metadata.synthetic_slot
        );
        Ok(())
    }

    ///Removes a destroyed root signature from the registry.
    pub fn forget_layout(&self, id: ObjectId) -> Option<RewriteMetadata> {
        self.layouts.write().remove(&id)
    }

    pub fn tracked_layouts(&self) -> usize {
        self.layouts.read().len()
    }

    ///Rewrite metadata of a root signature or pipeline state, if it was rewritten.
    ///
    /// Only the object's private data counts. The registry is keyed by address, which the driver reuses
    /// once an object dies, so it never decides whether an object is hooked.
    pub fn layout_metadata(&self, object: &impl PrivateData) -> Option<RewriteMetadata> {
        object.get::<RewriteMetadata>()
    }

    ///Copies the metadata of `root_signature` onto a freshly created pipeline state. Returns true if the
    /// pipeline uses a rewritten root signature.
    pub fn propagate_to_pipeline(
        &self,
        root_signature: Option<&impl PrivateData>,
        pipeline: &impl PrivateData,
    ) -> bool {
        let Some(metadata) = root_signature.and_then(|rs| self.layout_metadata(rs)) else {
            return false;
        };

        if !pipeline.set(&metadata) {
            #[cfg(feature = "logging")]
            log::warn!(
                "Can't set private data on pipeline state {:#x}",
                pipeline.object_id().0
            );
        }
        true
    }

    pub fn plan_descriptor_heap(&self, desc: &HeapDesc) -> HeapPlan {
        let plan = plan_heap(desc, &self.config);

        #[cfg(feature = "logging")]
        if plan.is_tracked() {
            log::info!(
                "Creating CBV/SRV/UAV heap with {} descriptors ({} requested)",
                plan.num_descriptors(desc.num_descriptors),
                desc.num_descriptors
            );
        }

        plan
    }

    ///Records a heap that was created according to `plan`. `cpu_start` and `gpu_start` are the heap's
    /// start handles.
    pub fn record_descriptor_heap(
        &self,
        plan: &HeapPlan,
        heap: ObjectId,
        cpu_start: usize,
        gpu_start: u64,
    ) {
        self.heaps.record(plan, heap, cpu_start, gpu_start);
    }

    pub fn command_list_state(list: &impl PrivateData) -> CommandListState {
        list.get::<CommandListState>().unwrap_or_default()
    }

    fn store_state(list: &impl PrivateData, before: &CommandListState, after: &CommandListState) {
        if before == after {
            return;
        }
        if !list.set(after) {
            #[cfg(feature = "logging")]
            log::warn!(
                "Can't store bindless state on command list {:#x}",
                list.object_id().0
            );
        }
    }

    ///Host binds a compute or graphics root signature. The call itself is forwarded unchanged.
    pub fn set_root_signature(
        &self,
        list: &impl PrivateData,
        kind: PipelineKind,
        root_signature: Option<&impl PrivateData>,
    ) {
        let before = Self::command_list_state(list);
        let mut state = before;
        let metadata = root_signature.and_then(|rs| self.layout_metadata(rs));
        state.bind_layout(kind, metadata);

        #[cfg(feature = "logging")]
        log::trace!(
            "{:?} root signature on {:#x}: hooked={}",
            kind,
            list.object_id().0,
            metadata.is_some()
        );

        Self::store_state(list, &before, &state);
    }

    ///Host binds descriptor heaps. Returns the heap list to forward if the engine's heap had to be
    /// added, `None` to forward the host's list.
    pub fn set_descriptor_heaps(
        &self,
        list: &impl PrivateData,
        heaps: &[ObjectId],
    ) -> Option<SmallVec<[ObjectId; 4]>> {
        if !self.heaps.has_hooked() {
            #[cfg(feature = "logging")]
            log::warn!("SetDescriptorHeaps called before a main heap was created");
            return None;
        }

        let before = Self::command_list_state(list);
        let mut state = before;

        if heaps.is_empty() {
            state.unbind_heaps();
            Self::store_state(list, &before, &state);
            return None;
        }

        let bound = self.heaps.resolve_bound(heaps);
        state.bind_heaps(bound.assigned);

        #[cfg(feature = "logging")]
        log::trace!(
            "Heaps on {:#x}: {} bound, hooked heap {}, extended={}",
            list.object_id().0,
            heaps.len(),
            bound.assigned,
            bound.extended.is_some()
        );

        Self::store_state(list, &before, &state);
        bound.extended
    }

    ///Host bound a descriptor table at `root_index`. The host's bind is forwarded first, then, if this
    /// returns a redirect, the bindless table is bound as a second call.
    pub fn set_root_descriptor_table(
        &self,
        list: &impl PrivateData,
        kind: PipelineKind,
        root_index: u32,
    ) -> Option<TableRedirect> {
        if !self.heaps.has_hooked() {
            #[cfg(feature = "logging")]
            log::trace!("{:?} descriptor table without a main heap", kind);
            return None;
        }

        let before = Self::command_list_state(list);
        let mut state = before;
        let target = state.bind_table(kind, root_index)?;

        let Some(heap) = self.heaps.hooked(state.assigned_heap) else {
            #[cfg(feature = "logging")]
            log::warn!("Assigned heap #{} is not tracked", state.assigned_heap);
            return None;
        };
        let frame_offset = self.frame_offset() as i64;
        if !heap.contains_window(frame_offset, self.config.additional_slots) {
            #[cfg(feature = "logging")]
            log::warn!(
                "Frame window {}..{} is outside the {} slots of heap {:#x}, table not redirected",
                frame_offset,
                frame_offset + self.config.additional_slots as i64,
                heap.budget,
                heap.heap.0
            );
            return None;
        }
        Self::store_state(list, &before, &state);

        let gpu_descriptor = heap.gpu_address(self.increment(), frame_offset);

        #[cfg(feature = "logging")]
        log::trace!(
            "{:?} table {} on {:#x}: bindless table -> {} at {:#x}",
            kind,
            root_index,
            list.object_id().0,
            target,
            gpu_descriptor
        );

        Some(TableRedirect {
            root_index: target,
            gpu_descriptor,
        })
    }

    pub fn reset_command_list(&self, list: &impl PrivateData) {
        //Written unconditionally: the slot might hold data of a different size.
        if !list.set(&CommandListState::PLAIN) {
            #[cfg(feature = "logging")]
            log::warn!(
                "Can't reset bindless state on command list {:#x}",
                list.object_id().0
            );
        }
    }

    ///Writes `textures` into the bindless region of every hooked heap, starting at slot `offset` of the
    /// current frame window. Returns the number of descriptors written.
    pub fn set_bindless_textures(
        &self,
        writer: &impl DescriptorWriter,
        offset: i32,
        textures: &[BindlessTexture],
    ) -> Result<usize, BindlessError> {
        if !self.is_initialized() {
            #[cfg(feature = "logging")]
            log::error!("SetBindlessTextures called before the device was ready");
            return Err(BindlessError::NotInitialized);
        }

        let heaps = self.heaps.hooked_heaps();
        if heaps.is_empty() {
            #[cfg(feature = "logging")]
            log::error!("SetBindlessTextures called, but no main heap was created");
            return Err(BindlessError::NoHookedHeap);
        }

        let increment = self.increment();
        let first = self.frame_offset() as i64 + offset as i64;
        let mut written = 0;
        for heap in &heaps {
            written += Self::write_heap(writer, heap, increment, first, textures);
        }

        Ok(written)
    }

    fn write_heap(
        writer: &impl DescriptorWriter,
        heap: &HookedHeap,
        increment: u32,
        first: i64,
        textures: &[BindlessTexture],
    ) -> usize {
        let mut written = 0;
        for (i, texture) in textures.iter().enumerate() {
            let slot = first + i as i64;
            if !heap.contains_slot(slot) {
                #[cfg(feature = "logging")]
                log::warn!(
                    "Bindless slot {} is outside the {} slots of heap {:#x}, skipped",
                    slot,
                    heap.budget,
                    heap.heap.0
                );
                continue;
            }
            let cpu_handle = heap.cpu_address(increment, slot);

            match texture.kind() {
                Some(TextureKind::None) => {
                    writer.create_srv(None, &TextureViewDesc::null(), cpu_handle);
                    written += 1;
                }
                Some(TextureKind::Resource) => {
                    let Some(info) = writer.resource_info(texture.handle) else {
                        #[cfg(feature = "logging")]
                        log::warn!("Texture {:#x} is not a texture resource", texture.handle);
                        continue;
                    };
                    let view = TextureViewDesc::for_resource(texture, &info);
                    writer.create_srv(Some(texture.handle), &view, cpu_handle);
                    written += 1;
                }
                Some(TextureKind::RawView) => {
                    #[cfg(feature = "logging")]
                    log::warn!("Raw views are not supported on D3D12");
                }
                None => {
                    #[cfg(feature = "logging")]
                    log::warn!("Unknown texture kind {} at slot {}", texture.kind, slot);
                }
            }
        }
        written
    }
}
