//! Streaming file player

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, Thread};
use std::time::Duration;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::error::GraphError;
use crate::file::SourceFile;
use crate::format::Format;
use crate::node::{AudioNode, NodeRole, ProcessContext};

/// Ring buffers hold this many times the larger of the block size and the
/// source's read size.
pub const RING_BUFFER_PADDING: usize = 2;

const READER_IDLE: Duration = Duration::from_millis(20);

struct Shared {
    source: Mutex<Box<dyn SourceFile>>,
    num_frames: usize,
    looping: AtomicBool,
    at_end: AtomicBool,
    running: AtomicBool,
    underruns: AtomicU64,
    overruns: AtomicU64,
    // ring writes and seek requests; never held across a read
    stream: Mutex<Stream>,
}

#[derive(Default)]
struct Stream {
    generation: u64,
    seek_to: Option<usize>,
}

impl Shared {
    /// Asks the reader to continue from `frame`. Chunks read for an earlier
    /// request are dropped instead of written.
    ///
    /// `drain` runs under the stream lock, so nothing stale can be written
    /// after it.
    fn request_seek(&self, frame: usize, drain: impl FnOnce()) {
        let mut stream = self.stream.lock();
        stream.generation += 1;
        stream.seek_to = Some(frame);
        self.at_end.store(false, Ordering::Release);
        drain();
    }

    /// Reads from the source until the rings are full or the source ends.
    ///
    /// The source lock is taken per read, and only ever by the reader.
    fn fill(&self, producers: &mut [Producer<f32>], io: &mut Buffer) {
        let mut wrote = false;
        loop {
            let (generation, seek_to) = {
                let mut stream = self.stream.lock();
                (stream.generation, stream.seek_to.take())
            };
            if let Some(frame) = seek_to {
                if let Err(err) = self.source.lock().seek(frame) {
                    warn!(%err, frame, "file seek failed, ending playback");
                    self.end(generation);
                    break;
                }
            }
            if self.at_end.load(Ordering::Acquire) {
                break;
            }
            let room = producers.first().map_or(0, Producer::slots);
            if room == 0 {
                if !wrote {
                    self.overruns.fetch_add(1, Ordering::Relaxed);
                }
                break;
            }

            let result = {
                let mut source = self.source.lock();
                let want = room.min(source.max_frames_per_read());
                if io.num_frames() != want {
                    io.resize(want, io.num_channels());
                }
                source.read(io)
            };
            let read = match result {
                Ok(read) => read,
                Err(err) => {
                    warn!(%err, "file read failed, ending playback");
                    self.end(generation);
                    break;
                }
            };

            if read == 0 {
                if self.looping.load(Ordering::Relaxed) && self.num_frames > 0 {
                    if let Err(err) = self.source.lock().seek(0) {
                        warn!(%err, "rewinding looped file failed");
                        self.end(generation);
                        break;
                    }
                    continue;
                }
                self.end(generation);
                break;
            }

            let stream = self.stream.lock();
            if stream.generation != generation {
                // a seek came in while reading
                continue;
            }
            for (producer, channel) in producers.iter_mut().zip(io.channels()) {
                for &sample in &channel[..read] {
                    // room only grows while we hold the producers
                    let _ = producer.push(sample);
                }
            }
            drop(stream);
            wrote = true;
        }
    }

    fn end(&self, generation: u64) {
        let stream = self.stream.lock();
        if stream.generation == generation {
            self.at_end.store(true, Ordering::Release);
        }
    }
}

struct Reader {
    handle: JoinHandle<()>,
    thread: Thread,
}

/// Plays a [`SourceFile`] streamed from a background thread.
///
/// Decoding happens on a reader thread that keeps one rtrb ring per channel
/// topped up; the render side only drains the rings. Running dry renders
/// silence and is counted as an underrun, which the reader thread logs.
/// Looping is handled by the reader, so the seam is sample-accurate.
///
/// Like all players it has to be started, and starting rewinds. Seek through
/// [`Handle::with`](crate::Handle::with):
///
/// ```
/// use schall::{Buffer, Handle, MemorySourceFile, nodes::FilePlayer};
///
/// let source = MemorySourceFile::new(Buffer::new(44100, 2), 44100);
/// let player = Handle::new(FilePlayer::new(source));
/// player.with(|p| p.seek(22050));
/// assert_eq!(player.with(|p| p.read_position()), 22050);
/// ```
pub struct FilePlayer {
    shared: Arc<Shared>,
    sample_rate: u32,
    channels: usize,
    consumers: Vec<Consumer<f32>>,
    reader: Option<Reader>,
    threshold: usize,
    read_position: usize,
    finished: bool,
}

impl FilePlayer {
    pub fn new(source: impl SourceFile + 'static) -> Self {
        let sample_rate = source.sample_rate();
        let channels = source.num_channels();
        let num_frames = source.num_frames();
        Self {
            shared: Arc::new(Shared {
                source: Mutex::new(Box::new(source)),
                num_frames,
                looping: AtomicBool::new(false),
                at_end: AtomicBool::new(false),
                running: AtomicBool::new(false),
                underruns: AtomicU64::new(0),
                overruns: AtomicU64::new(0),
                stream: Mutex::new(Stream::default()),
            }),
            sample_rate,
            channels,
            consumers: Vec::new(),
            reader: None,
            threshold: 0,
            read_position: 0,
            finished: false,
        }
    }

    pub fn with_looping(self, looping: bool) -> Self {
        self.set_looping(looping);
        self
    }

    pub fn set_looping(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.shared.looping.load(Ordering::Relaxed)
    }

    /// Frames played so far, wrapping when looping.
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_position
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.shared.num_frames
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Blocks that ran short of decoded audio.
    pub fn num_underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Times the reader was woken with no room to write.
    pub fn num_overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Frames decoded and waiting in the rings.
    pub fn num_buffered_frames(&self) -> usize {
        self.consumers.iter().map(Consumer::slots).min().unwrap_or(0)
    }

    /// Moves the read position, discarding audio already buffered.
    ///
    /// Never touches the source: the reader thread performs the seek and
    /// refills the rings, so playback resumes after a short underrun at most.
    pub fn seek(&mut self, frame: usize) {
        let frame = frame.min(self.shared.num_frames);
        if frame == self.read_position && !self.finished {
            return;
        }
        let consumers = &mut self.consumers;
        self.shared.request_seek(frame, || {
            for consumer in consumers.iter_mut() {
                while consumer.pop().is_ok() {}
            }
        });
        self.read_position = frame;
        self.finished = false;
        if let Some(reader) = &self.reader {
            reader.thread.unpark();
        }
    }

    fn stop_reader(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            reader.thread.unpark();
            if reader.handle.join().is_err() {
                warn!("file reader thread panicked");
            }
        }
        self.consumers.clear();
    }
}

fn read_loop(shared: Arc<Shared>, mut producers: Vec<Producer<f32>>, mut io: Buffer) {
    let mut reported = shared.underruns.load(Ordering::Relaxed);
    while shared.running.load(Ordering::Acquire) {
        shared.fill(&mut producers, &mut io);

        let underruns = shared.underruns.load(Ordering::Relaxed);
        if underruns != reported {
            warn!(total = underruns, new = underruns - reported, "file player underrun");
            reported = underruns;
        }
        std::thread::park_timeout(READER_IDLE);
    }
}

impl AudioNode for FilePlayer {
    type Message = ();

    fn process(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, buffer: &mut Buffer) {
        let frames = buffer.num_frames();
        // read before the rings so a finished reader's last frames are counted
        let at_end = self.shared.at_end.load(Ordering::Acquire);
        let available = self.num_buffered_frames();
        let count = available.min(frames);

        for (consumer, channel) in self.consumers.iter_mut().zip(buffer.channels_mut()) {
            for sample in &mut channel[..count] {
                *sample = consumer.pop().unwrap_or(0.0);
            }
        }

        if count < frames {
            buffer.zero_range(count, frames - count);
            if at_end {
                self.finished = true;
            } else {
                self.shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.read_position += count;
        if self.is_looping() && self.shared.num_frames > 0 {
            self.read_position %= self.shared.num_frames;
        }

        if available - count < self.threshold {
            if let Some(reader) = &self.reader {
                reader.thread.unpark();
            }
        }
    }

    fn role(&self) -> NodeRole {
        NodeRole::Generator
    }

    fn format(&self) -> Format {
        Format::new()
            .with_channels(self.channels)
            .with_sample_rate(self.sample_rate)
    }

    fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        self.stop_reader();

        let read_frames = self.shared.source.lock().max_frames_per_read();
        let ring_frames = ctx.frames_per_block.max(read_frames) * RING_BUFFER_PADDING;
        let (producers, consumers): (Vec<_>, Vec<_>) =
            (0..channels).map(|_| RingBuffer::new(ring_frames)).unzip();
        self.consumers = consumers;
        self.threshold = ring_frames / 2;

        let mut producers = producers;
        let mut io = Buffer::new(read_frames, channels);
        self.shared.request_seek(self.read_position, || {});
        self.shared.fill(&mut producers, &mut io);

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("schall-file-reader".into())
            .spawn(move || read_loop(shared, producers, io))?;
        let thread = handle.thread().clone();
        self.reader = Some(Reader { handle, thread });
        debug!(ring_frames, channels, "file reader started");
        Ok(())
    }

    fn uninitialize(&mut self) {
        self.stop_reader();
    }

    fn on_start(&mut self) {
        self.seek(0);
    }

    fn reached_end(&mut self) -> bool {
        core::mem::take(&mut self.finished)
    }
}

impl Drop for FilePlayer {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
