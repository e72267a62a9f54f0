use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A scalar shared between the control thread and the audio thread.
///
/// The value is an `f32` bit-cast into an `AtomicU32`, so reads on the
/// audio thread never block. Clones share the same cell.
#[derive(Clone)]
pub struct Param(Arc<AtomicU32>);

impl Param {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Param").field(&self.get()).finish()
    }
}
