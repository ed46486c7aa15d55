//! Per command list binding state.
//!
//! The state is plain data, stored in the command list's private data slot between calls. Only the
//! thread recording the list touches it, so no locking is involved.

use crate::layout::RewriteMetadata;
use bytemuck::{Pod, Zeroable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Compute,
    Graphics,
}

impl PipelineKind {
    const fn in_hooked_flag(self) -> u32 {
        match self {
            PipelineKind::Compute => CommandListState::IN_HOOKED_COMPUTE,
            PipelineKind::Graphics => CommandListState::IN_HOOKED_GRAPHICS,
        }
    }

    const fn bound_flag(self) -> u32 {
        match self {
            PipelineKind::Compute => CommandListState::COMPUTE_BOUND,
            PipelineKind::Graphics => CommandListState::GRAPHICS_BOUND,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct CommandListState {
    pub flags: u32,
    ///1-based index of the hooked heap that is bound, 0 if none.
    pub assigned_heap: u32,
    ///Synthetic root parameter index + 1 of the bound compute root signature, 0 if plain.
    pub compute_synthetic: u32,
    ///Synthetic root parameter index + 1 of the bound graphics root signature, 0 if plain.
    pub graphics_synthetic: u32,
}

impl CommandListState {
    pub const IN_HOOKED_COMPUTE: u32 = 1 << 0;
    pub const IN_HOOKED_GRAPHICS: u32 = 1 << 1;
    pub const COMPUTE_BOUND: u32 = 1 << 2;
    pub const GRAPHICS_BOUND: u32 = 1 << 3;

    ///State of a new or reset command list.
    pub const PLAIN: Self = CommandListState {
        flags: 0,
        assigned_heap: 0,
        compute_synthetic: 0,
        graphics_synthetic: 0,
    };

    pub fn is_plain(&self) -> bool {
        *self == Self::PLAIN
    }

    pub fn in_hooked_layout(&self, kind: PipelineKind) -> bool {
        self.flags & kind.in_hooked_flag() != 0
    }

    ///True once the synthetic table was redirected since the last layout or heap change.
    pub fn is_bound(&self, kind: PipelineKind) -> bool {
        self.flags & kind.bound_flag() != 0
    }

    pub fn synthetic(&self, kind: PipelineKind) -> u32 {
        match kind {
            PipelineKind::Compute => self.compute_synthetic,
            PipelineKind::Graphics => self.graphics_synthetic,
        }
    }

    fn synthetic_mut(&mut self, kind: PipelineKind) -> &mut u32 {
        match kind {
            PipelineKind::Compute => &mut self.compute_synthetic,
            PipelineKind::Graphics => &mut self.graphics_synthetic,
        }
    }

    ///Root parameter index of the synthetic table, if a hooked layout is bound for `kind`.
    pub fn synthetic_slot(&self, kind: PipelineKind) -> Option<u32> {
        self.synthetic(kind).checked_sub(1)
    }

    ///A root signature was bound. `metadata` is the rewrite metadata of that root signature, if any.
    pub fn bind_layout(&mut self, kind: PipelineKind, metadata: Option<RewriteMetadata>) {
        match metadata {
            Some(meta) => {
                self.flags |= kind.in_hooked_flag();
                self.flags &= !kind.bound_flag();
                *self.synthetic_mut(kind) = meta.synthetic_slot + 1;
            }
            None => {
                if !self.is_plain() {
                    self.flags &= !(kind.in_hooked_flag() | kind.bound_flag());
                    *self.synthetic_mut(kind) = 0;
                }
            }
        }
    }

    ///Heaps were bound. `assigned` is the 1-based hooked heap index, 0 if none.
    pub fn bind_heaps(&mut self, assigned: u32) {
        self.assigned_heap = assigned;
        self.flags &= !(Self::COMPUTE_BOUND | Self::GRAPHICS_BOUND);
    }

    ///An empty heap list was bound.
    pub fn unbind_heaps(&mut self) {
        if !self.is_plain() {
            self.bind_heaps(0);
        }
    }

    ///A descriptor table was bound at `root_index`. Returns the synthetic root index if the bindless
    /// table has to be (re)bound after it.
    pub fn bind_table(&mut self, kind: PipelineKind, root_index: u32) -> Option<u32> {
        if !self.in_hooked_layout(kind) || self.assigned_heap == 0 {
            return None;
        }
        let target = self.synthetic_slot(kind)?;

        if root_index == target && self.is_bound(kind) {
            #[cfg(feature = "logging")]
            log::warn!(
                "Host overwrote the bindless table at root parameter {}, binding it again",
                target
            );
        }

        if root_index == target || !self.is_bound(kind) {
            self.flags |= kind.bound_flag();
            return Some(target);
        }

        None
    }

    pub fn reset(&mut self) {
        *self = Self::PLAIN;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(core::mem::size_of::<CommandListState>(), 16);

    fn meta(slot: u32) -> Option<RewriteMetadata> {
        Some(RewriteMetadata {
            synthetic_slot: slot,
            max_additional_slots: 4096,
        })
    }

    fn hooked_graphics() -> CommandListState {
        let mut state = CommandListState::default();
        state.bind_layout(PipelineKind::Graphics, meta(3));
        state.bind_heaps(1);
        state
    }

    #[test]
    fn default_is_plain() {
        assert!(CommandListState::default().is_plain());
        assert_eq!(CommandListState::default(), CommandListState::zeroed());
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = hooked_graphics();
        state.bind_layout(PipelineKind::Compute, meta(1));
        assert_eq!(state.bind_table(PipelineKind::Compute, 0), Some(1));
        state.reset();
        assert!(state.is_plain());

        let mut arbitrary = CommandListState {
            flags: u32::MAX,
            assigned_heap: 7,
            compute_synthetic: 9,
            graphics_synthetic: 11,
        };
        arbitrary.reset();
        assert_eq!(arbitrary, CommandListState::PLAIN);
    }

    #[test]
    fn plain_layout_after_hooked_clears_flags() {
        let mut state = hooked_graphics();
        assert_eq!(state.bind_table(PipelineKind::Graphics, 0), Some(3));
        state.bind_layout(PipelineKind::Graphics, None);

        assert_eq!(state.flags, 0);
        assert_eq!(state.graphics_synthetic, 0);
        assert!(!state.in_hooked_layout(PipelineKind::Graphics));
        assert!(!state.is_bound(PipelineKind::Graphics));
        //The heap stays bound on the list.
        assert_eq!(state.assigned_heap, 1);
    }

    #[test]
    fn plain_layout_keeps_other_kind() {
        let mut state = hooked_graphics();
        state.bind_layout(PipelineKind::Compute, meta(5));
        state.bind_layout(PipelineKind::Graphics, None);
        assert!(state.in_hooked_layout(PipelineKind::Compute));
        assert_eq!(state.synthetic_slot(PipelineKind::Compute), Some(5));
    }

    #[test]
    fn same_layout_twice_is_stable() {
        let mut once = CommandListState::default();
        once.bind_layout(PipelineKind::Graphics, meta(3));
        let mut twice = once;
        twice.bind_layout(PipelineKind::Graphics, meta(3));
        assert_eq!(once, twice);
    }

    #[test]
    fn plain_layout_on_plain_list_is_noop() {
        let mut state = CommandListState::default();
        state.bind_layout(PipelineKind::Compute, None);
        state.unbind_heaps();
        assert!(state.is_plain());
    }

    #[test]
    fn redirects_once_per_binding_pass() {
        let mut state = hooked_graphics();
        assert_eq!(state.bind_table(PipelineKind::Graphics, 0), Some(3));
        assert!(state.is_bound(PipelineKind::Graphics));
        assert_eq!(state.bind_table(PipelineKind::Graphics, 1), None);
        assert_eq!(state.bind_table(PipelineKind::Graphics, 2), None);

        //Host hits the synthetic index, it is redirected again.
        assert_eq!(state.bind_table(PipelineKind::Graphics, 3), Some(3));

        //New heaps start a new pass.
        state.bind_heaps(1);
        assert_eq!(state.bind_table(PipelineKind::Graphics, 1), Some(3));

        //As does a new layout.
        state.bind_layout(PipelineKind::Graphics, meta(4));
        assert_eq!(state.bind_table(PipelineKind::Graphics, 0), Some(4));
    }

    #[test]
    fn needs_layout_and_heap() {
        let mut state = CommandListState::default();
        assert_eq!(state.bind_table(PipelineKind::Compute, 0), None);

        state.bind_layout(PipelineKind::Compute, meta(2));
        assert_eq!(state.bind_table(PipelineKind::Compute, 0), None);

        state.bind_heaps(2);
        assert_eq!(state.bind_table(PipelineKind::Graphics, 0), None);
        assert_eq!(state.bind_table(PipelineKind::Compute, 0), Some(2));

        state.unbind_heaps();
        assert_eq!(state.assigned_heap, 0);
        assert_eq!(state.bind_table(PipelineKind::Compute, 0), None);
    }
}
