//! Lock-free SPSC ring carrying processed samples from the input callback
//! to the output callback.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn next_pow2(x: usize) -> usize {
    x.max(1).next_power_of_two()
}

pub(crate) struct SpscRingF32 {
    // Interior mutability: single producer writes, single consumer reads.
    buf: UnsafeCell<Box<[f32]>>,
    mask: usize,
    write: AtomicUsize,
    read: AtomicUsize,
}

// Safety: the engine hands one clone to the input callback (producer) and one
// to the output callback (consumer). The writer only fills slots outside
// [read..write) and advances `write`; the reader only reads [read..write) and
// advances `read`.
unsafe impl Send for SpscRingF32 {}
unsafe impl Sync for SpscRingF32 {}

impl SpscRingF32 {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        let cap_pow2 = next_pow2(cap);
        Self {
            buf: UnsafeCell::new(vec![0.0f32; cap_pow2].into_boxed_slice()),
            mask: cap_pow2 - 1,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn len(&self, w: usize, r: usize) -> usize {
        w.wrapping_sub(r) & self.mask
    }

    /// Producer: push the entire slice; returns false (and pushes nothing)
    /// if there is not enough room.
    pub(crate) fn push_slice(&self, data: &[f32]) -> bool {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Relaxed);
        let free = self.mask - self.len(w, r);
        if free < data.len() {
            return false;
        }

        // Safe: single producer, and the free-space check keeps us out of
        // the region the consumer may be reading.
        let buf = unsafe { &mut *self.buf.get() };
        let mut wi = w;
        for &v in data {
            buf[wi & self.mask] = v;
            wi = wi.wrapping_add(1);
        }
        self.write.store(wi, Ordering::Release);
        true
    }

    /// Consumer: pop exactly `out.len()` samples; false if not enough data.
    pub(crate) fn pop_into(&self, out: &mut [f32]) -> bool {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);
        if self.len(w, r) < out.len() {
            return false;
        }

        // Safe: single consumer; the producer only writes beyond `w`.
        let buf = unsafe { &*self.buf.get() };
        let mut ri = r;
        for o in out.iter_mut() {
            *o = buf[ri & self.mask];
            ri = ri.wrapping_add(1);
        }
        self.read.store(ri, Ordering::Release);
        true
    }
}
