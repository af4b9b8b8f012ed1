//! In-memory sample player

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::GraphError;
use crate::format::Format;
use crate::node::{AudioNode, NodeRole, ProcessContext};

/// Messages to control a player
#[derive(Clone, Copy, Debug)]
pub enum PlayerMessage {
    /// Move the read position, in frames
    Seek(usize),
    /// Move the read position, in seconds
    SeekSecs(f64),
    /// Enable or disable looping
    SetLooping(bool),
}

/// Plays a buffer that is already in memory.
///
/// Players do not enable themselves: call [`Node::start`](crate::Node::start)
/// once connected. Starting rewinds to the beginning. Without looping, the
/// player zero-fills past the end and disables itself; with looping it wraps
/// within the block.
pub struct BufferPlayer {
    buffer: Arc<Buffer>,
    sample_rate: Option<u32>,
    read_position: usize,
    looping: bool,
    finished: bool,
}

impl BufferPlayer {
    pub fn new(buffer: Buffer) -> Self {
        Self::from_shared(Arc::new(buffer))
    }

    /// A player over samples shared with other players.
    pub fn from_shared(buffer: Arc<Buffer>) -> Self {
        Self {
            buffer,
            sample_rate: None,
            read_position: 0,
            looping: false,
            finished: false,
        }
    }

    /// The rate the samples were recorded at. Without one the player adopts
    /// the graph's rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_position
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.buffer.num_frames()
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Moves the read position, clamped to the length.
    pub fn seek(&mut self, frame: usize) {
        self.read_position = frame.min(self.buffer.num_frames());
        self.finished = false;
    }

    /// Replaces the samples. The channel count cannot change once created.
    pub fn set_buffer(&mut self, buffer: Arc<Buffer>) -> Result<(), GraphError> {
        if buffer.num_channels() != self.buffer.num_channels() {
            return Err(GraphError::UnsupportedChannels {
                node: "BufferPlayer".into(),
                requested: buffer.num_channels(),
                available: self.buffer.num_channels(),
            });
        }
        self.buffer = buffer;
        self.seek(self.read_position);
        Ok(())
    }
}

impl AudioNode for BufferPlayer {
    type Message = PlayerMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = PlayerMessage>,
        buffer: &mut Buffer,
    ) {
        for msg in messages {
            match msg {
                PlayerMessage::Seek(frame) => self.seek(frame),
                PlayerMessage::SeekSecs(secs) => {
                    let rate = self.sample_rate.unwrap_or(ctx.sample_rate);
                    self.seek((secs.max(0.0) * rate as f64) as usize);
                }
                PlayerMessage::SetLooping(l) => self.looping = l,
            }
        }

        let frames = buffer.num_frames();
        let total = self.buffer.num_frames();
        let mut written = 0;
        while written < frames {
            if self.read_position >= total {
                if self.looping && total > 0 {
                    self.read_position = 0;
                } else {
                    buffer.zero_range(written, frames - written);
                    self.finished = true;
                    return;
                }
            }
            let pos = self.read_position;
            let n = (frames - written).min(total - pos);
            for (dst, src) in buffer.channels_mut().zip(self.buffer.channels()) {
                dst[written..written + n].copy_from_slice(&src[pos..pos + n]);
            }
            written += n;
            self.read_position += n;
        }
    }

    fn role(&self) -> NodeRole {
        NodeRole::Generator
    }

    fn format(&self) -> Format {
        let format = Format::new().with_channels(self.buffer.num_channels());
        match self.sample_rate {
            Some(rate) => format.with_sample_rate(rate),
            None => format,
        }
    }

    fn on_start(&mut self) {
        self.seek(0);
    }

    fn reached_end(&mut self) -> bool {
        core::mem::take(&mut self.finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Buffer {
        Buffer::from_channels(&[(0..frames).map(|i| i as f32 + 1.0).collect()])
    }

    fn ctx() -> ProcessContext {
        ProcessContext {
            sample_rate: 100,
            frames_per_block: 4,
            frame: 0,
        }
    }

    #[test]
    fn looping_wraps_within_a_block() {
        let mut player = BufferPlayer::new(ramp(3)).with_looping(true);
        let mut out = Buffer::new(4, 1);
        player.process(&ctx(), core::iter::empty(), &mut out);
        assert_eq!(out.channel(0), &[1.0, 2.0, 3.0, 1.0]);
        assert_eq!(player.read_position(), 1);
        assert!(!player.reached_end());
    }

    #[test]
    fn seek_in_seconds_uses_source_rate() {
        let mut player = BufferPlayer::new(ramp(100)).with_sample_rate(50);
        let mut out = Buffer::new(4, 1);
        player.process(&ctx(), [PlayerMessage::SeekSecs(1.0)].into_iter(), &mut out);
        assert_eq!(out.channel(0)[0], 51.0);
    }

    #[test]
    fn channel_count_is_fixed() {
        let mut player = BufferPlayer::new(ramp(4));
        let stereo = Arc::new(Buffer::new(4, 2));
        assert!(player.set_buffer(stereo).is_err());
    }
}
