//! Closure-driven generator

use crate::buffer::Buffer;
use crate::format::Format;
use crate::node::{AudioNode, NodeRole, ProcessContext};

/// A generator that calls a closure for every block.
///
/// ```
/// use schall::nodes::CallbackSource;
///
/// let dc = CallbackSource::new(|_ctx, buffer| {
///     buffer.as_mut_slice().fill(0.5);
/// })
/// .with_channels(1);
/// ```
pub struct CallbackSource<F> {
    callback: F,
    format: Format,
}

impl<F> CallbackSource<F>
where
    F: FnMut(&ProcessContext, &mut Buffer) + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            format: Format::new().with_auto_enable(true),
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.format = self.format.with_channels(channels);
        self
    }

    /// Fixes the rate the closure produces. Connecting into a graph running at
    /// another rate is a format error.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.format = self.format.with_sample_rate(sample_rate);
        self
    }
}

impl<F> AudioNode for CallbackSource<F>
where
    F: FnMut(&ProcessContext, &mut Buffer) + Send + 'static,
{
    type Message = ();

    fn process(&mut self, ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, buffer: &mut Buffer) {
        (self.callback)(ctx, buffer);
    }

    fn role(&self) -> NodeRole {
        NodeRole::Generator
    }

    fn format(&self) -> Format {
        self.format.clone()
    }
}
