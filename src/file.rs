//! Sources of decoded audio for the player nodes.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::GraphError;

/// Frames a [`SourceFile`] reads per call unless it says otherwise.
pub const DEFAULT_MAX_FRAMES_PER_READ: usize = 4096;

/// Random-access audio stream, read from the control or a reader thread.
pub trait SourceFile: Send {
    fn sample_rate(&self) -> u32;

    fn num_channels(&self) -> usize;

    /// Total length in frames.
    fn num_frames(&self) -> usize;

    fn max_frames_per_read(&self) -> usize {
        DEFAULT_MAX_FRAMES_PER_READ
    }

    /// Reads from the current position into the start of `buffer`.
    ///
    /// Reads at most `buffer.num_frames()` and `max_frames_per_read()` frames
    /// and returns how many were read, 0 at the end of the stream.
    fn read(&mut self, buffer: &mut Buffer) -> Result<usize, GraphError>;

    /// Moves the read position, clamped to the length.
    fn seek(&mut self, frame: usize) -> Result<(), GraphError>;

    fn duration_secs(&self) -> f64 {
        match self.sample_rate() {
            0 => 0.0,
            rate => self.num_frames() as f64 / rate as f64,
        }
    }
}

/// A source backed by samples already in memory.
///
/// Clones share the samples but keep their own position.
#[derive(Clone, Debug)]
pub struct MemorySourceFile {
    data: Arc<Buffer>,
    sample_rate: u32,
    position: usize,
    max_frames_per_read: usize,
}

impl MemorySourceFile {
    pub fn new(data: Buffer, sample_rate: u32) -> Self {
        Self {
            data: Arc::new(data),
            sample_rate,
            position: 0,
            max_frames_per_read: DEFAULT_MAX_FRAMES_PER_READ,
        }
    }

    /// Builds a source from interleaved samples.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut data = Buffer::new(frames, channels);
        for (ch, channel) in data.channels_mut().enumerate() {
            for (frame, sample) in channel.iter_mut().enumerate() {
                *sample = samples[frame * channels + ch];
            }
        }
        Self::new(data, sample_rate)
    }

    pub fn with_max_frames_per_read(mut self, frames: usize) -> Self {
        self.max_frames_per_read = frames.max(1);
        self
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl SourceFile for MemorySourceFile {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn num_channels(&self) -> usize {
        self.data.num_channels()
    }

    fn num_frames(&self) -> usize {
        self.data.num_frames()
    }

    fn max_frames_per_read(&self) -> usize {
        self.max_frames_per_read
    }

    fn read(&mut self, buffer: &mut Buffer) -> Result<usize, GraphError> {
        let frames = buffer
            .num_frames()
            .min(self.max_frames_per_read)
            .min(self.data.num_frames() - self.position);
        let start = self.position;
        for (dst, src) in buffer.channels_mut().zip(self.data.channels()) {
            dst[..frames].copy_from_slice(&src[start..start + frames]);
        }
        self.position += frames;
        Ok(frames)
    }

    fn seek(&mut self, frame: usize) -> Result<(), GraphError> {
        self.position = frame.min(self.data.num_frames());
        Ok(())
    }
}

#[cfg(feature = "vorbis_src")]
pub use self::ogg::OggSourceFile;

#[cfg(feature = "vorbis_src")]
mod ogg {
    use std::fs::File;
    use std::io::{BufReader, Read, Seek};
    use std::path::Path;

    use lewton::inside_ogg::OggStreamReader;
    use lewton::VorbisError;
    use tracing::debug;

    use super::{SourceFile, DEFAULT_MAX_FRAMES_PER_READ};
    use crate::buffer::Buffer;
    use crate::error::GraphError;

    fn decode_error(err: VorbisError) -> GraphError {
        GraphError::Decode(err.to_string())
    }

    /// An Ogg Vorbis stream decoded as it is read.
    ///
    /// The length is counted once when opening. Seeking decodes forward from
    /// the start of the stream.
    pub struct OggSourceFile<R: Read + Seek = BufReader<File>> {
        reader: OggStreamReader<R>,
        sample_rate: u32,
        channels: usize,
        num_frames: usize,
        position: usize,
        // decoded but not yet read, one Vec per channel
        packet: Vec<Vec<f32>>,
        packet_offset: usize,
    }

    impl OggSourceFile {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
            let file = File::open(path.as_ref())?;
            let source = Self::new(BufReader::new(file))?;
            debug!(
                path = %path.as_ref().display(),
                frames = source.num_frames,
                sample_rate = source.sample_rate,
                "opened ogg file"
            );
            Ok(source)
        }
    }

    impl<R: Read + Seek> OggSourceFile<R> {
        pub fn new(reader: R) -> Result<Self, GraphError> {
            let mut reader = OggStreamReader::new(reader).map_err(decode_error)?;
            let sample_rate = reader.ident_hdr.audio_sample_rate;
            let channels = reader.ident_hdr.audio_channels as usize;

            let mut num_frames = 0;
            while let Some(packet) = reader
                .read_dec_packet_generic::<Vec<Vec<f32>>>()
                .map_err(decode_error)?
            {
                num_frames += packet.first().map_or(0, Vec::len);
            }
            reader.seek_absgp_pg(0).map_err(decode_error)?;

            Ok(Self {
                reader,
                sample_rate,
                channels,
                num_frames,
                position: 0,
                packet: Vec::new(),
                packet_offset: 0,
            })
        }

        fn next_packet(&mut self) -> Result<bool, GraphError> {
            loop {
                match self
                    .reader
                    .read_dec_packet_generic::<Vec<Vec<f32>>>()
                    .map_err(decode_error)?
                {
                    Some(packet) if packet.first().map_or(0, Vec::len) == 0 => continue,
                    Some(packet) => {
                        self.packet = packet;
                        self.packet_offset = 0;
                        return Ok(true);
                    }
                    None => return Ok(false),
                }
            }
        }

        fn packet_remaining(&self) -> usize {
            self.packet
                .first()
                .map_or(0, |ch| ch.len().saturating_sub(self.packet_offset))
        }
    }

    impl<R: Read + Seek + Send> SourceFile for OggSourceFile<R> {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn num_channels(&self) -> usize {
            self.channels
        }

        fn num_frames(&self) -> usize {
            self.num_frames
        }

        fn max_frames_per_read(&self) -> usize {
            DEFAULT_MAX_FRAMES_PER_READ
        }

        fn read(&mut self, buffer: &mut Buffer) -> Result<usize, GraphError> {
            let wanted = buffer.num_frames().min(DEFAULT_MAX_FRAMES_PER_READ);
            let mut read = 0;
            while read < wanted {
                if self.packet_remaining() == 0 && !self.next_packet()? {
                    break;
                }
                let n = self.packet_remaining().min(wanted - read);
                let offset = self.packet_offset;
                for (dst, src) in buffer.channels_mut().zip(&self.packet) {
                    dst[read..read + n].copy_from_slice(&src[offset..offset + n]);
                }
                self.packet_offset += n;
                read += n;
            }
            self.position += read;
            Ok(read)
        }

        fn seek(&mut self, frame: usize) -> Result<(), GraphError> {
            let frame = frame.min(self.num_frames);
            self.reader.seek_absgp_pg(0).map_err(decode_error)?;
            self.packet.clear();
            self.packet_offset = 0;
            self.position = 0;

            let mut skip = frame;
            while skip > 0 {
                if self.packet_remaining() == 0 && !self.next_packet()? {
                    break;
                }
                let n = self.packet_remaining().min(skip);
                self.packet_offset += n;
                skip -= n;
            }
            self.position = frame - skip;
            Ok(())
        }
    }
}
