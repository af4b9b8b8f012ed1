//! Nodes backed by platform voices

use crate::buffer::{Buffer, BufferInterleaved};
use crate::error::GraphError;
use crate::native::NativeVoiceHandle;
use crate::node::{AudioNode, ProcessContext};

/// An effect whose processing happens in a native voice.
///
/// Generic nodes feeding it are bridged through a [`VoiceAdapter`] that the
/// context inserts on initialize; native inputs are linked voice to voice.
pub struct NativeEffect {
    voice: NativeVoiceHandle,
}

impl NativeEffect {
    pub fn new(voice: NativeVoiceHandle) -> Self {
        Self { voice }
    }

    #[inline]
    pub fn voice(&self) -> &NativeVoiceHandle {
        &self.voice
    }

    pub fn volume(&self) -> f32 {
        self.voice.volume()
    }

    pub fn set_volume(&self, volume: f32) {
        self.voice.set_volume(volume);
    }
}

impl AudioNode for NativeEffect {
    type Message = ();

    fn process(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, buffer: &mut Buffer) {
        self.voice.render(buffer);
    }

    fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        self.voice.initialize(ctx, channels)
    }

    fn uninitialize(&mut self) {
        self.voice.stop();
        self.voice.uninitialize();
    }

    // the voice mixes whatever it is attached to
    fn maps_input_channels(&self) -> bool {
        true
    }

    fn on_start(&mut self) {
        self.voice.start();
    }

    fn on_stop(&mut self) {
        self.voice.stop();
    }

    fn native_voice(&self) -> Option<NativeVoiceHandle> {
        Some(self.voice.clone())
    }
}

/// Bridges a generic subgraph into a native voice.
///
/// Inserted by the context, never built by hand. Each block it interleaves
/// what its input rendered, submits it to its source voice and renders the
/// voice in its place.
pub struct VoiceAdapter {
    voice: NativeVoiceHandle,
    block: BufferInterleaved,
}

impl VoiceAdapter {
    pub(crate) fn new(voice: NativeVoiceHandle) -> Self {
        Self {
            voice,
            block: BufferInterleaved::default(),
        }
    }
}

impl AudioNode for VoiceAdapter {
    type Message = ();

    fn process(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, buffer: &mut Buffer) {
        self.block.interleave_from(buffer);
        self.voice.submit(&self.block);
        self.voice.render(buffer);
    }

    fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        self.voice.initialize(ctx, channels)?;
        self.block = BufferInterleaved::new(ctx.frames_per_block, channels);
        Ok(())
    }

    fn uninitialize(&mut self) {
        self.voice.stop();
        self.voice.uninitialize();
    }

    fn on_start(&mut self) {
        self.voice.start();
    }

    fn on_stop(&mut self) {
        self.voice.stop();
    }

    fn native_voice(&self) -> Option<NativeVoiceHandle> {
        Some(self.voice.clone())
    }

    fn is_voice_adapter(&self) -> bool {
        true
    }
}
