//! Patches single entries of a live object's dispatch table.
//!
//! The first machine word of a COM object points to its dispatch table. That table is shared by every
//! object of the same implementation class, so patching it once through any instance redirects the call
//! for all of them. There is no unhook path, a patch lives as long as the process.

use crate::{
    error::PatchError,
    offsets::{HookTarget, InterfaceKind, OffsetTable},
};
use std::{
    ffi::c_void,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

///One pointer sized entry of a dispatch table.
pub struct DispatchSlot {
    entry: *mut usize,
}

impl DispatchSlot {
    ///Locates the entry at `byte_offset` within the dispatch table of `object`.
    ///
    /// # Safety
    /// `object` must be null or point to a live object whose first word is a dispatch table pointer, and
    /// `byte_offset` must address a valid entry of that table.
    pub unsafe fn locate(object: *mut c_void, byte_offset: usize) -> Result<Self, PatchError> {
        if object.is_null() {
            return Err(PatchError::NullObject);
        }

        let table = unsafe { *(object as *const *mut u8) };
        if table.is_null() {
            return Err(PatchError::NullTable(object as usize));
        }

        Ok(DispatchSlot {
            entry: unsafe { table.add(byte_offset) } as *mut usize,
        })
    }

    pub fn address(&self) -> usize {
        self.entry as usize
    }

    ///Function pointer currently stored in the slot.
    pub fn current(&self) -> usize {
        unsafe { core::ptr::read_volatile(self.entry) }
    }

    ///Makes the slot's page writable and stores `replacement`. Returns the previous entry.
    ///
    /// # Safety
    /// `replacement` must be ABI compatible with the entry it replaces.
    pub unsafe fn replace(&self, replacement: usize) -> Result<usize, PatchError> {
        let _guard = protect::make_writable(self.entry as *mut c_void)?;
        let old = self.current();
        unsafe { core::ptr::write_volatile(self.entry, replacement) };
        Ok(old)
    }
}

///Replaces the dispatch table entry at `byte_offset` of `object` with `replacement`, returns the
/// old entry. If the page can't be made writable, the table stays untouched.
///
/// # Safety
/// See [DispatchSlot::locate] and [DispatchSlot::replace].
pub unsafe fn hook(
    object: *mut c_void,
    byte_offset: usize,
    replacement: usize,
) -> Result<usize, PatchError> {
    let slot = unsafe { DispatchSlot::locate(object, byte_offset)? };
    unsafe { slot.replace(replacement) }
}

///Record of an installed hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookInstallation {
    pub interface: InterfaceKind,
    pub target: HookTarget,
    pub byte_offset: usize,
    pub original: usize,
}

///Process wide bookkeeping of installed hooks. Keeps the original entry of every replaced slot and
/// guards each interface kind so it is patched only once.
pub struct HookRegistry {
    claimed: [AtomicBool; InterfaceKind::COUNT],
    originals: [AtomicUsize; HookTarget::COUNT],
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub const fn new() -> Self {
        HookRegistry {
            claimed: [const { AtomicBool::new(false) }; InterfaceKind::COUNT],
            originals: [const { AtomicUsize::new(0) }; HookTarget::COUNT],
        }
    }

    ///Returns true exactly once per interface kind. The caller that gets `true` installs the hooks.
    pub fn claim(&self, interface: InterfaceKind) -> bool {
        self.claimed[interface.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self, interface: InterfaceKind) -> bool {
        self.claimed[interface.index()].load(Ordering::Acquire)
    }

    ///Original entry of `target`, if a hook was installed.
    pub fn original(&self, target: HookTarget) -> Option<usize> {
        match self.originals[target.index()].load(Ordering::Acquire) {
            0 => None,
            ptr => Some(ptr),
        }
    }

    ///Installs `replacement` for `target` on `object`.
    ///
    /// The original entry is published before the slot is swapped, so a replacement that is called
    /// from another thread right after the swap always finds its original. If patching fails the slot
    /// keeps the driver's function, which makes the published original a harmless copy.
    ///
    /// # Safety
    /// `object` must implement `target.interface()`, and `replacement` must have the signature of the
    /// replaced entry.
    pub unsafe fn install(
        &self,
        object: *mut c_void,
        target: HookTarget,
        replacement: usize,
        offsets: &OffsetTable,
    ) -> Result<HookInstallation, PatchError> {
        let byte_offset = offsets.offset(target);
        let slot = unsafe { DispatchSlot::locate(object, byte_offset)? };
        let original = slot.current();

        if original == replacement {
            //Already patched through another instance of the same class.
            #[cfg(feature = "logging")]
            log::debug!("{} is already hooked", target.name());
            return Ok(HookInstallation {
                interface: target.interface(),
                target,
                byte_offset,
                original: self.original(target).unwrap_or(original),
            });
        }

        self.originals[target.index()].store(original, Ordering::Release);
        unsafe { slot.replace(replacement)? };

        #[cfg(feature = "logging")]
        log::info!(
            "Hooked {} at slot {:#x} (original {:#x})",
            target.name(),
            slot.address(),
            original
        );

        Ok(HookInstallation {
            interface: target.interface(),
            target,
            byte_offset,
            original,
        })
    }
}

#[cfg(windows)]
mod protect {
    use crate::error::PatchError;
    use std::ffi::c_void;
    use windows::Win32::System::Memory::{
        PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualProtect,
    };

    ///Restores the previous protection of the page when dropped.
    pub struct WritableGuard {
        address: *mut c_void,
        old: PAGE_PROTECTION_FLAGS,
    }

    impl Drop for WritableGuard {
        fn drop(&mut self) {
            let mut unused = PAGE_PROTECTION_FLAGS::default();
            //NOTE: failing to restore leaves the page writable, which is still correct.
            let _ = unsafe {
                VirtualProtect(
                    self.address,
                    core::mem::size_of::<usize>(),
                    self.old,
                    &mut unused,
                )
            };
        }
    }

    pub fn make_writable(address: *mut c_void) -> Result<WritableGuard, PatchError> {
        let mut old = PAGE_PROTECTION_FLAGS::default();
        unsafe {
            VirtualProtect(
                address,
                core::mem::size_of::<usize>(),
                PAGE_READWRITE,
                &mut old,
            )
        }
        .map_err(|e| {
            #[cfg(feature = "logging")]
            log::error!("VirtualProtect failed for {:#x}: {}", address as usize, e);
            PatchError::Protection {
                address: address as usize,
                code: e.code().0,
            }
        })?;

        Ok(WritableGuard { address, old })
    }
}

#[cfg(unix)]
mod protect {
    use crate::error::PatchError;
    use std::ffi::c_void;

    ///The previous protection can't be queried through mprotect, the page stays writable.
    pub struct WritableGuard;

    fn page_size() -> usize {
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as usize,
            _ => 4096,
        }
    }

    pub fn make_writable(address: *mut c_void) -> Result<WritableGuard, PatchError> {
        let page = page_size();
        let start = (address as usize / page) * page;
        let res = unsafe {
            libc::mprotect(
                start as *mut c_void,
                page,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if res != 0 {
            let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            #[cfg(feature = "logging")]
            log::error!("mprotect failed for {:#x}: os error {}", address as usize, code);
            return Err(PatchError::Protection {
                address: address as usize,
                code,
            });
        }

        Ok(WritableGuard)
    }
}
