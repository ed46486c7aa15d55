use bindless_hook::object::{ObjectId, PrivateData};
use std::ffi::c_void;
use windows::{
    Win32::Graphics::{Direct3D::ID3DDestructionNotifier, Direct3D12::ID3D12Object},
    core::{GUID, Interface},
};

///Private data slot of every object the engine annotates. Root signatures and pipeline states carry
/// their rewrite metadata there, command lists their binding state.
pub const BINDLESS_DATA: GUID = GUID::from_u128(0x6d3c_1e8a_52f4_4b7e_9c0d_a1b2_c3d4_e5f6);

///Borrowed D3D12 object.
pub struct D3D12Object<'a> {
    object: &'a ID3D12Object,
}

impl<'a> D3D12Object<'a> {
    ///Any D3D12 interface coerces to `&ID3D12Object`.
    pub fn new(object: &'a ID3D12Object) -> Self {
        D3D12Object { object }
    }

    ///Borrows the object behind a raw interface pointer, `None` for null.
    ///
    /// # Safety
    /// `raw` must be null or point to a live object that implements `ID3D12Object`.
    pub unsafe fn from_raw(raw: &'a *mut c_void) -> Option<Self> {
        unsafe { ID3D12Object::from_raw_borrowed(raw) }.map(Self::new)
    }

    ///Calls `callback` with the object's address once the driver destroys it.
    pub fn on_destroy(&self, callback: unsafe extern "system" fn(*mut c_void)) -> bool {
        let Ok(notifier) = self.object.cast::<ID3DDestructionNotifier>() else {
            return false;
        };
        unsafe { notifier.RegisterDestructionCallback(Some(callback), self.object.as_raw()) }
            .is_ok()
    }
}

impl PrivateData for D3D12Object<'_> {
    fn object_id(&self) -> ObjectId {
        ObjectId::from_ptr(self.object.as_raw())
    }

    fn read_private(&self, out: &mut [u8]) -> Option<usize> {
        let mut size = out.len() as u32;
        unsafe {
            self.object.GetPrivateData(
                &BINDLESS_DATA,
                &mut size,
                Some(out.as_mut_ptr() as *mut c_void),
            )
        }
        .ok()?;
        Some(size as usize)
    }

    fn write_private(&self, data: &[u8]) -> bool {
        unsafe {
            self.object.SetPrivateData(
                &BINDLESS_DATA,
                data.len() as u32,
                Some(data.as_ptr() as *const c_void),
            )
        }
        .is_ok()
    }
}
