//! Multichannel sample storage.
//!
//! [`Buffer`] stores channels one after another (non-interleaved), which is the
//! layout every generic node processes. [`BufferInterleaved`] is used at the
//! device and native-voice boundaries.

/// Sample layout of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Layout {
    /// Channel after channel.
    #[default]
    NonInterleaved,
    /// Frame after frame.
    Interleaved,
}

/// Fixed-size, non-interleaved block of samples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Buffer {
    data: Vec<f32>,
    frames: usize,
    channels: usize,
}

impl Buffer {
    /// Allocates a zeroed buffer.
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; frames * channels],
            frames,
            channels,
        }
    }

    /// Builds a buffer from per-channel sample vectors of equal length.
    ///
    /// Shorter channels are padded with silence.
    pub fn from_channels(channels: &[Vec<f32>]) -> Self {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        let mut buffer = Self::new(frames, channels.len());
        for (dst, src) in buffer.channels_mut().zip(channels) {
            dst[..src.len()].copy_from_slice(src);
        }
        buffer
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    /// Total number of samples across all channels.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples of one channel.
    ///
    /// # Panics
    ///
    /// Panics if `ch >= num_channels()`.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.frames;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.frames;
        &mut self.data[start..start + self.frames]
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.frames.max(1)).take(self.channels)
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data
            .chunks_exact_mut(self.frames.max(1))
            .take(self.channels)
    }

    /// Copies channel 0 into every other channel.
    pub fn duplicate_first_channel(&mut self) {
        if self.channels < 2 || self.frames == 0 {
            return;
        }
        let (first, rest) = self.data.split_at_mut(self.frames);
        for channel in rest.chunks_exact_mut(self.frames) {
            channel.copy_from_slice(first);
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Zeroes `len` frames starting at `offset` in every channel.
    pub fn zero_range(&mut self, offset: usize, len: usize) {
        let end = (offset + len).min(self.frames);
        if offset >= end {
            return;
        }
        for channel in self.channels_mut() {
            channel[offset..end].fill(0.0);
        }
    }

    /// Reshapes the buffer, reallocating only when it has to grow.
    ///
    /// Contents are zeroed.
    pub fn resize(&mut self, frames: usize, channels: usize) {
        self.frames = frames;
        self.channels = channels;
        self.data.clear();
        self.data.resize(frames * channels, 0.0);
    }

    /// Copies `other` into this buffer, mapping channels if the counts differ.
    pub fn copy_from(&mut self, other: &Buffer) {
        if self.channels == other.channels && self.frames == other.frames {
            self.data.copy_from_slice(&other.data);
        } else {
            self.zero();
            self.mix_from(other);
        }
    }

    /// Adds `other` into this buffer.
    ///
    /// Mono sources feed every channel, mono destinations receive the average of
    /// all source channels, otherwise channels pair up by index and the extras
    /// are dropped.
    pub fn mix_from(&mut self, other: &Buffer) {
        self.mix_scaled_from(other, |_| 1.0);
    }

    /// Like [`mix_from`](Self::mix_from) with a gain per destination channel.
    pub fn mix_scaled_from(&mut self, other: &Buffer, gain: impl Fn(usize) -> f32) {
        let frames = self.frames.min(other.frames);
        let src_channels = other.channels;
        if src_channels == 0 {
            return;
        }
        let dst_channels = self.channels;

        for dst_ch in 0..dst_channels {
            let g = gain(dst_ch);
            let dst = &mut self.channel_mut(dst_ch)[..frames];
            if src_channels == 1 {
                add_scaled(dst, &other.channel(0)[..frames], g);
            } else if dst_channels == 1 {
                let g = g / src_channels as f32;
                for src in other.channels() {
                    add_scaled(dst, &src[..frames], g);
                }
            } else if dst_ch < src_channels {
                add_scaled(dst, &other.channel(dst_ch)[..frames], g);
            }
        }
    }

    /// Multiplies every sample by `gain`.
    pub fn scale(&mut self, gain: f32) {
        self.data.iter_mut().for_each(|s| *s *= gain);
    }

    /// Largest absolute sample value, NaN counts as infinite.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |peak, &s| {
            if s.is_nan() {
                f32::INFINITY
            } else {
                peak.max(s.abs())
            }
        })
    }
}

#[inline]
fn add_scaled(dst: &mut [f32], src: &[f32], gain: f32) {
    if gain == 1.0 {
        dst.iter_mut().zip(src).for_each(|(d, s)| *d += *s);
    } else {
        dst.iter_mut().zip(src).for_each(|(d, s)| *d += *s * gain);
    }
}

/// Fixed-size block of interleaved samples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferInterleaved {
    data: Vec<f32>,
    frames: usize,
    channels: usize,
}

impl BufferInterleaved {
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; frames * channels],
            frames,
            channels,
        }
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Interleaves `src`, which must have the same shape.
    pub fn interleave_from(&mut self, src: &Buffer) {
        debug_assert_eq!(src.num_channels(), self.channels);
        let frames = self.frames.min(src.num_frames());
        for (ch, channel) in src.channels().enumerate().take(self.channels) {
            for (frame, &sample) in channel[..frames].iter().enumerate() {
                self.data[frame * self.channels + ch] = sample;
            }
        }
    }

    /// De-interleaves into `dst`, which must have the same shape.
    pub fn deinterleave_into(&self, dst: &mut Buffer) {
        debug_assert_eq!(dst.num_channels(), self.channels);
        let frames = self.frames.min(dst.num_frames());
        let channels = self.channels;
        for (ch, channel) in dst.channels_mut().enumerate().take(channels) {
            for (frame, sample) in channel[..frames].iter_mut().enumerate() {
                *sample = self.data[frame * channels + ch];
            }
        }
    }
}
