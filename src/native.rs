//! Platform voice abstraction.
//!
//! Some backends process audio in their own voices rather than in our graph.
//! A node backed by such a voice reports it through
//! [`AudioNode::native_voice`](crate::AudioNode::native_voice); the context
//! links those voices together and bridges generic subgraphs into them with
//! [`VoiceAdapter`](crate::nodes::VoiceAdapter) nodes.
//!
//! [`SoftwareBackend`] is an in-process backend whose voices apply volume and
//! record their links, which is enough to drive and inspect the adapter logic
//! without platform bindings.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferInterleaved};
use crate::error::GraphError;
use crate::node::ProcessContext;

/// Shared handle to a platform voice.
pub type NativeVoiceHandle = Arc<dyn NativeVoice>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

/// A voice owned by a native engine.
///
/// `submit` and `render` are called on the render thread and must not
/// allocate or block for long.
pub trait NativeVoice: Send + Sync {
    fn id(&self) -> VoiceId;

    /// Prepares the voice for `channels` at the context's block size.
    fn initialize(&self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError>;

    fn uninitialize(&self);

    fn is_initialized(&self) -> bool;

    fn start(&self);

    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Routes this voice's output into `output`.
    fn attach_output(&self, output: &NativeVoiceHandle) -> Result<(), GraphError>;

    /// The voice this one currently feeds.
    fn output(&self) -> Option<VoiceId>;

    fn volume(&self) -> f32;

    fn set_volume(&self, volume: f32);

    /// Queues one interleaved block for a source voice.
    fn submit(&self, block: &BufferInterleaved);

    /// Runs the voice for one block, writing into `buffer`.
    ///
    /// Source voices overwrite `buffer` with their queued block, effect voices
    /// process it in place.
    fn render(&self, buffer: &mut Buffer);
}

/// Factory for voices of one native engine.
pub trait NativeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Creates a voice that is fed through [`NativeVoice::submit`].
    fn create_source_voice(&self) -> Result<NativeVoiceHandle, GraphError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VoiceKind {
    Source,
    Effect,
}

struct VoiceState {
    initialized: bool,
    channels: usize,
    volume: f32,
    output: Option<VoiceId>,
    pending: BufferInterleaved,
    has_pending: bool,
}

/// Voice of a [`SoftwareBackend`].
pub struct SoftwareVoice {
    id: VoiceId,
    kind: VoiceKind,
    running: AtomicBool,
    state: Mutex<VoiceState>,
}

impl SoftwareVoice {
    fn new(id: VoiceId, kind: VoiceKind, volume: f32) -> Self {
        Self {
            id,
            kind,
            running: AtomicBool::new(false),
            state: Mutex::new(VoiceState {
                initialized: false,
                channels: 0,
                volume,
                output: None,
                pending: BufferInterleaved::default(),
                has_pending: false,
            }),
        }
    }

    #[inline]
    pub fn is_source(&self) -> bool {
        self.kind == VoiceKind::Source
    }
}

impl NativeVoice for SoftwareVoice {
    fn id(&self) -> VoiceId {
        self.id
    }

    fn initialize(&self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        if channels == 0 {
            return Err(GraphError::Native(format!(
                "voice {} cannot be created with zero channels",
                self.id.0
            )));
        }
        let mut state = self.state.lock();
        state.channels = channels;
        state.pending = BufferInterleaved::new(ctx.frames_per_block, channels);
        state.has_pending = false;
        state.initialized = true;
        Ok(())
    }

    fn uninitialize(&self) {
        self.running.store(false, Ordering::Release);
        let mut state = self.state.lock();
        state.initialized = false;
        state.has_pending = false;
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn attach_output(&self, output: &NativeVoiceHandle) -> Result<(), GraphError> {
        if output.id() == self.id {
            return Err(GraphError::Native(format!(
                "voice {} cannot output to itself",
                self.id.0
            )));
        }
        self.state.lock().output = Some(output.id());
        Ok(())
    }

    fn output(&self) -> Option<VoiceId> {
        self.state.lock().output
    }

    fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().volume = volume;
    }

    fn submit(&self, block: &BufferInterleaved) {
        let mut state = self.state.lock();
        if !state.initialized || state.pending.num_channels() != block.num_channels() {
            return;
        }
        let len = state.pending.as_slice().len().min(block.as_slice().len());
        state.pending.as_mut_slice()[..len].copy_from_slice(&block.as_slice()[..len]);
        state.has_pending = true;
    }

    fn render(&self, buffer: &mut Buffer) {
        let mut state = self.state.lock();
        let running = self.running.load(Ordering::Acquire);
        match self.kind {
            VoiceKind::Source => {
                if !running || !state.has_pending || state.pending.num_channels() != buffer.num_channels() {
                    buffer.zero();
                    return;
                }
                state.pending.deinterleave_into(buffer);
                state.has_pending = false;
            }
            VoiceKind::Effect if !running => return,
            VoiceKind::Effect => {}
        }
        if state.volume != 1.0 {
            buffer.scale(state.volume);
        }
    }
}

/// In-process native engine.
pub struct SoftwareBackend {
    next_id: AtomicU32,
    voices: Mutex<HashMap<VoiceId, Weak<SoftwareVoice>>>,
}

impl SoftwareBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(1),
            voices: Mutex::new(HashMap::new()),
        })
    }

    fn register(&self, kind: VoiceKind, volume: f32) -> Arc<SoftwareVoice> {
        let id = VoiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let voice = Arc::new(SoftwareVoice::new(id, kind, volume));
        let mut voices = self.voices.lock();
        voices.retain(|_, v| v.strong_count() > 0);
        voices.insert(id, Arc::downgrade(&voice));
        voice
    }

    /// Creates an effect voice that scales its input by `volume`.
    pub fn create_effect_voice(&self, volume: f32) -> NativeVoiceHandle {
        self.register(VoiceKind::Effect, volume)
    }

    /// Number of voices still alive.
    pub fn num_voices(&self) -> usize {
        self.voices
            .lock()
            .values()
            .filter(|v| v.strong_count() > 0)
            .count()
    }

    /// Number of live source voices, i.e. adapters.
    pub fn num_source_voices(&self) -> usize {
        self.voices
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|v| v.is_source())
            .count()
    }

    /// The voice that `id` outputs to.
    pub fn output_of(&self, id: VoiceId) -> Option<VoiceId> {
        self.voices
            .lock()
            .get(&id)
            .and_then(Weak::upgrade)
            .and_then(|v| v.output())
    }
}

impl NativeBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_source_voice(&self) -> Result<NativeVoiceHandle, GraphError> {
        Ok(self.register(VoiceKind::Source, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProcessContext {
        ProcessContext {
            sample_rate: 48000,
            frames_per_block: 4,
            frame: 0,
        }
    }

    #[test]
    fn source_voice_plays_submitted_block() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_source_voice().unwrap();
        voice.initialize(&ctx(), 1).unwrap();
        voice.start();

        let mut block = BufferInterleaved::new(4, 1);
        block.as_mut_slice().copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
        voice.submit(&block);

        let mut out = Buffer::new(4, 1);
        voice.render(&mut out);
        assert_eq!(out.channel(0), &[0.1, 0.2, 0.3, 0.4]);

        // nothing queued for the next block
        voice.render(&mut out);
        assert_eq!(out.channel(0), &[0.0; 4]);
    }

    #[test]
    fn effect_voice_scales_in_place() {
        let backend = SoftwareBackend::new();
        let voice = backend.create_effect_voice(0.5);
        voice.initialize(&ctx(), 1).unwrap();
        voice.start();

        let mut buffer = Buffer::from_channels(&[vec![1.0; 4]]);
        voice.render(&mut buffer);
        assert_eq!(buffer.channel(0), &[0.5; 4]);
    }

    #[test]
    fn links_are_recorded() {
        let backend = SoftwareBackend::new();
        let source = backend.create_source_voice().unwrap();
        let effect = backend.create_effect_voice(1.0);
        source.attach_output(&effect).unwrap();
        assert_eq!(backend.output_of(source.id()), Some(effect.id()));
        assert!(effect.attach_output(&effect).is_err());
        assert_eq!(backend.num_source_voices(), 1);

        drop(source);
        assert_eq!(backend.num_voices(), 1);
    }
}
