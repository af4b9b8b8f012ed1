//! Schall - pull-based real-time audio graph
//!
//! A [`Context`] owns a target (usually a [`LineOut`](nodes::LineOut) on a
//! [`Device`]) and the graph of nodes feeding it. Each block, the device's
//! callback pulls the target, which pulls its inputs depth first.
//!
//! - Nodes declare a partial [`Format`]; the context resolves channel counts
//!   and sample rates on initialize, and splices in channel converters where
//!   two connected nodes disagree.
//! - Parameters reach the audio thread as messages through a [`Handle`], or
//!   through short locks on the node.
//! - Engines with their own voices plug in through [`NativeBackend`]; generic
//!   audio reaches native nodes through adapters the context inserts.
//!
//! ```
//! use schall::{Context, OfflineDevice, nodes::{LineOut, Sine, SineMessage}};
//!
//! let device = OfflineDevice::new("offline", 44100, 2, 512);
//! let ctx = Context::new().with_target(LineOut::new(device.clone())?);
//!
//! let mut sine = ctx.make_node(Sine::new(440.0).with_amplitude(0.2));
//! sine.connect(&ctx.target()?)?;
//! ctx.start()?;
//!
//! let mut block = schall::Buffer::new(512, 2);
//! device.render(&mut block);
//! assert!(block.peak() > 0.0);
//!
//! let _ = sine.send(SineMessage::SetFrequency(880.0));
//! ctx.stop()?;
//! # Ok::<(), schall::GraphError>(())
//! ```

mod buffer;
mod context;
mod device;
mod error;
mod file;
mod format;
mod native;
mod node;
pub mod nodes;

pub use buffer::{Buffer, BufferInterleaved, Layout};
pub use context::{Context, NodeSummary, Renderer, DEFAULT_CLIP_THRESHOLD, DEFAULT_FRAMES_PER_BLOCK};
pub use device::{Device, DeviceManager, DeviceRef, DeviceRegistry, OfflineDevice};
pub use error::{ErrorKind, GraphError};
pub use file::{MemorySourceFile, SourceFile, DEFAULT_MAX_FRAMES_PER_READ};
pub use format::{ChannelMode, Format};
pub use native::{NativeBackend, NativeVoice, NativeVoiceHandle, SoftwareBackend, SoftwareVoice, VoiceId};
pub use node::{AudioNode, Handle, Node, NodeId, NodeRef, NodeRole, NodeView, ProcessContext, DEFAULT_QUEUE_SIZE};

#[cfg(feature = "cpal_sink")]
pub use device::{CpalDevice, CpalDeviceManager};

#[cfg(feature = "vorbis_src")]
pub use file::OggSourceFile;
