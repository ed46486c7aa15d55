//! Access to driver owned objects.
//!
//! The engine never owns the objects it tracks. It identifies them by address and stores its per-object
//! state in the object's private data slot, which the driver releases together with the object.

use bytemuck::Pod;

///Stable identity of a driver object for as long as it is alive. Usually the object's address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

impl ObjectId {
    pub const NULL: Self = ObjectId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        ObjectId(ptr as usize)
    }
}

///A live object that carries an engine owned private data slot.
pub trait PrivateData {
    fn object_id(&self) -> ObjectId;

    ///Copies the slot into `out`. Returns the size of the stored data, or `None` if nothing is stored.
    fn read_private(&self, out: &mut [u8]) -> Option<usize>;

    ///Replaces the slot's content. Returns false if the driver refused.
    fn write_private(&self, data: &[u8]) -> bool;

    ///Reads a `T`. Data of a different size counts as absent.
    fn get<T: Pod>(&self) -> Option<T>
    where
        Self: Sized,
    {
        let mut value = T::zeroed();
        match self.read_private(bytemuck::bytes_of_mut(&mut value)) {
            Some(size) if size == core::mem::size_of::<T>() => Some(value),
            _ => None,
        }
    }

    fn set<T: Pod>(&self, value: &T) -> bool
    where
        Self: Sized,
    {
        self.write_private(bytemuck::bytes_of(value))
    }
}
