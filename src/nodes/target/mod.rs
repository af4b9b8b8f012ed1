//! Graph targets: where rendered audio leaves the graph.

use std::sync::Arc;

use delegate::delegate;

use crate::buffer::Buffer;
use crate::context::{ClipMonitor, Renderer};
use crate::device::DeviceRef;
use crate::error::GraphError;
use crate::format::Format;
use crate::native::NativeVoiceHandle;
use crate::node::{AudioNode, NodeRole, ProcessContext};

/// The driver behind a context's target node.
///
/// A target owns the clock: once started it calls the [`Renderer`] for every
/// block until stopped.
pub trait Target: Send + Sync {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn frames_per_block(&self) -> usize;

    fn num_channels(&self) -> usize;

    fn start(&self, renderer: Renderer) -> Result<(), GraphError>;

    /// Returns once the renderer is no longer called.
    fn stop(&self) -> Result<(), GraphError>;

    /// Voice that receives the final mix, for engines with native voices.
    fn native_voice(&self) -> Option<NativeVoiceHandle> {
        None
    }
}

/// Plays a context's output through a [`Device`](crate::Device).
pub struct LineOut {
    device: DeviceRef,
    name: String,
    channels: usize,
    voice: Option<NativeVoiceHandle>,
}

impl LineOut {
    pub fn new(device: DeviceRef) -> Result<Self, GraphError> {
        let channels = device.num_output_channels();
        if channels == 0 {
            return Err(GraphError::UnsupportedChannels {
                node: device.name().to_owned(),
                requested: 1,
                available: 0,
            });
        }
        if device.sample_rate() == 0 {
            return Err(GraphError::Device(format!("{} reports a sample rate of 0", device.name())));
        }
        Ok(Self {
            name: format!("LineOut ({})", device.name()),
            device,
            channels,
            voice: None,
        })
    }

    /// Uses fewer channels than the device provides. Unused channels stay silent.
    pub fn with_channels(mut self, channels: usize) -> Result<Self, GraphError> {
        let available = self.device.num_output_channels();
        if channels == 0 || channels > available {
            return Err(GraphError::UnsupportedChannels {
                node: self.name,
                requested: channels,
                available,
            });
        }
        self.channels = channels;
        Ok(self)
    }

    /// Routes the final mix through a native voice, making the target a
    /// native node.
    pub fn with_native_voice(mut self, voice: NativeVoiceHandle) -> Self {
        self.voice = Some(voice);
        self
    }

    #[inline]
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }
}

impl Target for LineOut {
    delegate! {
        to self.device {
            fn sample_rate(&self) -> u32;
            fn frames_per_block(&self) -> usize;
            fn start(&self, renderer: Renderer) -> Result<(), GraphError>;
            fn stop(&self) -> Result<(), GraphError>;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn native_voice(&self) -> Option<NativeVoiceHandle> {
        self.voice.clone()
    }
}

/// Processor of a context's target node.
///
/// Maps whatever is connected onto the target's channels, runs the target's
/// native voice if it has one, and silences blocks that clip.
pub(crate) struct TargetSink {
    target: Arc<dyn Target>,
    clip: Arc<ClipMonitor>,
    voice: Option<NativeVoiceHandle>,
}

impl TargetSink {
    pub(crate) fn new(target: Arc<dyn Target>, clip: Arc<ClipMonitor>) -> Self {
        let voice = target.native_voice();
        Self { target, clip, voice }
    }
}

impl AudioNode for TargetSink {
    type Message = ();

    fn process(&mut self, ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, buffer: &mut Buffer) {
        if let Some(voice) = &self.voice {
            voice.render(buffer);
        }
        self.clip.check(buffer, ctx.frame);
    }

    fn name(&self) -> &str {
        self.target.name()
    }

    fn role(&self) -> NodeRole {
        NodeRole::Target
    }

    fn format(&self) -> Format {
        Format::new()
            .with_channels(self.target.num_channels())
            .with_sample_rate(self.target.sample_rate())
    }

    fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        match &self.voice {
            Some(voice) => voice.initialize(ctx, channels),
            None => Ok(()),
        }
    }

    fn uninitialize(&mut self) {
        if let Some(voice) = &self.voice {
            voice.stop();
            voice.uninitialize();
        }
    }

    fn maps_input_channels(&self) -> bool {
        true
    }

    fn on_start(&mut self) {
        if let Some(voice) = &self.voice {
            voice.start();
        }
    }

    fn on_stop(&mut self) {
        if let Some(voice) = &self.voice {
            voice.stop();
        }
    }

    fn native_voice(&self) -> Option<NativeVoiceHandle> {
        self.voice.clone()
    }
}
