/// Real-time safe effect interface.
/// - process() must not allocate or lock on the hot path.
/// - `block` is interleaved f32 samples, `channels` wide, as given to `prepare`.
/// - prepare() runs on the control thread before the node is handed to the renderer.
pub trait Effect: Send {
    fn prepare(&mut self, _sr: u32, _channels: u16) {}
    fn process(&mut self, block: &mut [f32]);
}
