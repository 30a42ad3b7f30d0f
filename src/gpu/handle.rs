use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed index of a backend-owned resource.
///
/// The traits are implemented by hand so they hold for any marker `T`
/// without requiring the marker to implement them.
pub struct Handle<T>(u32, PhantomData<fn() -> T>);

impl<T> Copy for Handle<T> {}
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl<T> Handle<T> {
    pub const fn new(idx: u32) -> Self {
        Handle(idx, PhantomData)
    }

    pub fn idx(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

pub enum TextureResource {}
pub enum FramebufferResource {}
pub enum ProgramResource {}
pub enum MeshResource {}

pub type TextureId = Handle<TextureResource>;
pub type FramebufferId = Handle<FramebufferResource>;
pub type ProgramId = Handle<ProgramResource>;
pub type MeshId = Handle<MeshResource>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn handle_is_copy() {
        let h1: TextureId = Handle::new(5);
        let h2 = h1;
        let h3 = h1;
        assert_eq!(h1.idx(), h2.idx());
        assert_eq!(h1, h3);
    }

    #[test]
    fn handles_hash_by_index() {
        let mut set = HashSet::new();
        set.insert(ProgramId::new(1));
        set.insert(ProgramId::new(1));
        set.insert(ProgramId::new(2));
        assert_eq!(set.len(), 2);
    }
}
