//! Pass-through tap for monitoring

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::buffer::Buffer;
use crate::error::GraphError;
use crate::node::{AudioNode, ProcessContext};

#[derive(Debug, Default)]
struct TapShared {
    channels: AtomicUsize,
    dropped_frames: AtomicU64,
}

/// Copies the audio passing through it into a ring buffer.
///
/// The paired [`TapReader`] drains it on another thread, typically for a
/// meter or scope. Frames that do not fit are dropped, never waited for.
///
/// ```
/// use schall::nodes::Tap;
///
/// let (tap, mut reader) = Tap::new(4096);
/// let mut frames = vec![0.0; 1024];
/// assert_eq!(reader.read(&mut frames), 0);
/// ```
pub struct Tap {
    producer: Producer<f32>,
    shared: Arc<TapShared>,
}

/// Reading end of a [`Tap`].
pub struct TapReader {
    consumer: Consumer<f32>,
    shared: Arc<TapShared>,
}

impl Tap {
    /// A tap holding up to `capacity` samples across all channels.
    pub fn new(capacity: usize) -> (Self, TapReader) {
        let (producer, consumer) = RingBuffer::new(capacity);
        let shared = Arc::new(TapShared::default());
        (
            Self {
                producer,
                shared: shared.clone(),
            },
            TapReader { consumer, shared },
        )
    }
}

impl AudioNode for Tap {
    type Message = ();

    fn process(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, buffer: &mut Buffer) {
        let channels = buffer.num_channels();
        let frames = buffer.num_frames();
        if channels == 0 {
            return;
        }
        let fit = (self.producer.slots() / channels).min(frames);
        for frame in 0..fit {
            for ch in 0..channels {
                let _ = self.producer.push(buffer.channel(ch)[frame]);
            }
        }
        if fit < frames {
            self.shared
                .dropped_frames
                .fetch_add((frames - fit) as u64, Ordering::Relaxed);
        }
    }

    fn initialize(&mut self, _ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        self.shared.channels.store(channels, Ordering::Relaxed);
        Ok(())
    }
}

impl TapReader {
    /// Channel count of the interleaved frames, 0 before the tap initializes.
    pub fn num_channels(&self) -> usize {
        self.shared.channels.load(Ordering::Relaxed)
    }

    pub fn available_frames(&self) -> usize {
        match self.num_channels() {
            0 => 0,
            ch => self.consumer.slots() / ch,
        }
    }

    /// Frames the tap had to drop because the reader fell behind.
    pub fn num_dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }

    /// Reads whole interleaved frames into `out`, returning the frame count.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = self.num_channels();
        if channels == 0 {
            return 0;
        }
        let frames = self.available_frames().min(out.len() / channels);
        for sample in &mut out[..frames * channels] {
            *sample = self.consumer.pop().unwrap_or(0.0);
        }
        frames
    }

    /// Drains everything buffered and returns its RMS level.
    pub fn drain_rms(&mut self) -> f32 {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        while let Ok(sample) = self.consumer.pop() {
            sum += (sample as f64) * (sample as f64);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            (sum / count as f64).sqrt() as f32
        }
    }
}
