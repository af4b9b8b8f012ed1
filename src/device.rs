//! Audio devices and their discovery.
//!
//! A [`Device`] owns the platform stream and calls into a [`Renderer`] for
//! every buffer it needs. [`OfflineDevice`] renders on demand from the calling
//! thread, which is how tests and benchmarks drive a graph. With the
//! `cpal_sink` feature, [`CpalDevice`] plays through a system output.
//!
//! # Example: List and Select a Device
//!
//! ```no_run
//! # #[cfg(feature = "cpal_sink")] {
//! use schall::{Context, CpalDeviceManager, DeviceManager, nodes::LineOut};
//!
//! let manager = CpalDeviceManager::new();
//! for device in manager.devices() {
//!     println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.num_output_channels());
//! }
//!
//! let device = manager.find_device_by_name("pulse").unwrap();
//! let ctx = Context::new().with_target(LineOut::new(device).unwrap());
//! # }
//! ```

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::Buffer;
use crate::context::Renderer;
use crate::error::GraphError;

/// Shared handle to a device.
pub type DeviceRef = Arc<dyn Device>;

/// An audio endpoint that pulls blocks from a context.
pub trait Device: Send + Sync {
    /// Stable identifier, unique within a manager.
    fn key(&self) -> &str;

    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn frames_per_block(&self) -> usize;

    fn num_output_channels(&self) -> usize;

    fn num_input_channels(&self) -> usize {
        0
    }

    /// Starts pulling from `renderer`. Replaces any previous renderer.
    fn start(&self, renderer: Renderer) -> Result<(), GraphError>;

    /// Stops the stream. Returns once the renderer is no longer called.
    fn stop(&self) -> Result<(), GraphError>;

    fn is_running(&self) -> bool;
}

/// Enumerates devices and picks defaults.
pub trait DeviceManager: Send + Sync {
    fn devices(&self) -> Vec<DeviceRef>;

    fn default_output(&self) -> Result<DeviceRef, GraphError>;

    fn default_input(&self) -> Result<DeviceRef, GraphError> {
        self.devices()
            .into_iter()
            .find(|d| d.num_input_channels() > 0)
            .ok_or_else(|| GraphError::Device("no input device available".into()))
    }

    fn find_device_by_key(&self, key: &str) -> Option<DeviceRef> {
        self.devices().into_iter().find(|d| d.key() == key)
    }

    fn find_device_by_name(&self, name: &str) -> Option<DeviceRef> {
        self.devices().into_iter().find(|d| d.name() == name)
    }
}

/// A device with no hardware behind it.
///
/// Blocks are rendered when [`render`](Self::render) is called, so a test
/// decides exactly how much audio is produced.
///
/// ```
/// use schall::{Buffer, Context, OfflineDevice, nodes::{LineOut, Sine}};
///
/// let device = OfflineDevice::new("offline", 44100, 1, 64);
/// let ctx = Context::new().with_target(LineOut::new(device.clone())?);
/// ctx.make_node(Sine::new(440.0)).connect(&ctx.target()?)?;
///
/// let mut block = Buffer::new(64, 1);
/// assert!(!device.render(&mut block)); // not started
/// ctx.start()?;
/// assert!(device.render(&mut block));
/// # Ok::<(), schall::GraphError>(())
/// ```
pub struct OfflineDevice {
    name: String,
    sample_rate: u32,
    channels: usize,
    frames_per_block: usize,
    renderer: Mutex<Option<Renderer>>,
    running: AtomicBool,
}

impl OfflineDevice {
    pub fn new(name: impl Into<String>, sample_rate: u32, channels: usize, frames_per_block: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sample_rate,
            channels,
            frames_per_block,
            renderer: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Renders one block into `out`, mapping channels if they differ.
    ///
    /// Returns false, leaving `out` silent, while the device is stopped.
    pub fn render(&self, out: &mut Buffer) -> bool {
        let mut renderer = self.renderer.lock();
        match renderer.as_mut() {
            Some(renderer) if self.running.load(Ordering::Acquire) => {
                out.copy_from(renderer.render_block());
                true
            }
            _ => {
                out.zero();
                false
            }
        }
    }

    /// Fills an interleaved slice with this device's channel count.
    pub fn render_interleaved(&self, out: &mut [f32]) -> bool {
        let mut renderer = self.renderer.lock();
        match renderer.as_mut() {
            Some(renderer) if self.running.load(Ordering::Acquire) => {
                renderer.fill_interleaved(out, self.channels);
                true
            }
            _ => {
                out.fill(0.0);
                false
            }
        }
    }
}

impl Device for OfflineDevice {
    fn key(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    fn num_output_channels(&self) -> usize {
        self.channels
    }

    fn start(&self, renderer: Renderer) -> Result<(), GraphError> {
        *self.renderer.lock() = Some(renderer);
        self.running.store(true, Ordering::Release);
        debug!(device = %self.name, "offline device started");
        Ok(())
    }

    fn stop(&self) -> Result<(), GraphError> {
        self.running.store(false, Ordering::Release);
        // waits for an in-flight render
        self.renderer.lock().take();
        debug!(device = %self.name, "offline device stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A fixed list of devices.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceRef>,
    default_output: Option<usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: DeviceRef) -> Self {
        self.devices.push(device);
        self
    }

    /// Adds `device` and makes it the default output.
    pub fn with_default_output(mut self, device: DeviceRef) -> Self {
        self.default_output = Some(self.devices.len());
        self.devices.push(device);
        self
    }
}

impl DeviceManager for DeviceRegistry {
    fn devices(&self) -> Vec<DeviceRef> {
        self.devices.clone()
    }

    fn default_output(&self) -> Result<DeviceRef, GraphError> {
        self.default_output
            .and_then(|i| self.devices.get(i))
            .or_else(|| self.devices.iter().find(|d| d.num_output_channels() > 0))
            .cloned()
            .ok_or_else(|| GraphError::Device("no output device registered".into()))
    }
}

#[cfg(feature = "cpal_sink")]
pub use self::cpal_device::{CpalDevice, CpalDeviceManager};

#[cfg(feature = "cpal_sink")]
mod cpal_device {
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread::JoinHandle;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SupportedStreamConfig};
    use parking_lot::Mutex;
    use tracing::{debug, warn};

    use super::{Device, DeviceManager, DeviceRef};
    use crate::context::{Renderer, DEFAULT_FRAMES_PER_BLOCK};
    use crate::error::GraphError;

    struct StreamThread {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<()>,
    }

    /// A system output device.
    ///
    /// The stream lives on a dedicated thread because cpal streams cannot move
    /// between threads. Stopping joins that thread.
    pub struct CpalDevice {
        device: cpal::Device,
        config: SupportedStreamConfig,
        name: String,
        frames_per_block: usize,
        stream: Mutex<Option<StreamThread>>,
    }

    impl CpalDevice {
        fn from_cpal(device: cpal::Device) -> Option<Self> {
            let config = device.default_output_config().ok()?;
            let name = device.name().unwrap_or_else(|_| "Unknown".into());
            Some(Self {
                device,
                config,
                name,
                frames_per_block: DEFAULT_FRAMES_PER_BLOCK,
                stream: Mutex::new(None),
            })
        }

        /// Sets the size of blocks pulled from the graph.
        pub fn with_frames_per_block(mut self, frames: usize) -> Self {
            self.frames_per_block = frames.max(1);
            self
        }
    }

    impl Device for CpalDevice {
        fn key(&self) -> &str {
            &self.name
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn sample_rate(&self) -> u32 {
            self.config.sample_rate().0
        }

        fn frames_per_block(&self) -> usize {
            self.frames_per_block
        }

        fn num_output_channels(&self) -> usize {
            self.config.channels() as usize
        }

        fn start(&self, renderer: Renderer) -> Result<(), GraphError> {
            self.stop()?;

            let device = self.device.clone();
            let sample_format = self.config.sample_format();
            let stream_config = self.config.config();
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let (started_tx, started_rx) = mpsc::channel();

            let handle = std::thread::Builder::new()
                .name(format!("schall-{}", self.name))
                .spawn(move || {
                    let stream = match build_stream(&device, sample_format, &stream_config, renderer) {
                        Ok(stream) => stream,
                        Err(err) => {
                            let _ = started_tx.send(Err(err));
                            return;
                        }
                    };
                    if let Err(err) = stream.play() {
                        let _ = started_tx.send(Err(err.to_string()));
                        return;
                    }
                    let _ = started_tx.send(Ok(()));

                    // the stream plays for as long as this thread holds it
                    while !thread_stop.load(Ordering::Acquire) {
                        std::thread::park();
                    }
                })?;

            match started_rx.recv() {
                Ok(Ok(())) => {
                    *self.stream.lock() = Some(StreamThread { stop, handle });
                    debug!(device = %self.name, "stream started");
                    Ok(())
                }
                Ok(Err(err)) => {
                    let _ = handle.join();
                    Err(GraphError::Device(err))
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(GraphError::Device("stream thread exited".into()))
                }
            }
        }

        fn stop(&self) -> Result<(), GraphError> {
            let Some(thread) = self.stream.lock().take() else {
                return Ok(());
            };
            thread.stop.store(true, Ordering::Release);
            thread.handle.thread().unpark();
            thread
                .handle
                .join()
                .map_err(|_| GraphError::Device("stream thread panicked".into()))?;
            debug!(device = %self.name, "stream stopped");
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.stream.lock().is_some()
        }
    }

    impl Drop for CpalDevice {
        fn drop(&mut self) {
            if let Err(err) = self.stop() {
                warn!(%err, "failed to stop stream");
            }
        }
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: SampleFormat,
        stream_config: &cpal::StreamConfig,
        mut renderer: Renderer,
    ) -> Result<cpal::Stream, String> {
        let channels = stream_config.channels as usize;
        let on_error = |err: cpal::StreamError| warn!(%err, "stream error");
        // integer formats render into here first; sized by the first callback
        let mut scratch: Vec<f32> = Vec::new();

        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                stream_config,
                move |data: &mut [f32], _| renderer.fill_interleaved(data, channels),
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                stream_config,
                move |data: &mut [i16], _| {
                    scratch.resize(data.len(), 0.0);
                    renderer.fill_interleaved(&mut scratch, channels);
                    for (out, s) in data.iter_mut().zip(&scratch) {
                        *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                on_error,
                None,
            ),
            SampleFormat::U16 => device.build_output_stream(
                stream_config,
                move |data: &mut [u16], _| {
                    scratch.resize(data.len(), 0.0);
                    renderer.fill_interleaved(&mut scratch, channels);
                    for (out, s) in data.iter_mut().zip(&scratch) {
                        *out = ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16;
                    }
                },
                on_error,
                None,
            ),
            other => return Err(format!("unsupported sample format: {other:?}")),
        };
        stream.map_err(|err| err.to_string())
    }

    /// Devices of the default cpal host.
    #[derive(Default)]
    pub struct CpalDeviceManager;

    impl CpalDeviceManager {
        pub fn new() -> Self {
            Self
        }
    }

    impl DeviceManager for CpalDeviceManager {
        fn devices(&self) -> Vec<DeviceRef> {
            let host = cpal::default_host();
            host.output_devices()
                .map(|devices| {
                    devices
                        .filter_map(CpalDevice::from_cpal)
                        .map(|d| Arc::new(d) as DeviceRef)
                        .collect()
                })
                .unwrap_or_default()
        }

        fn default_output(&self) -> Result<DeviceRef, GraphError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| GraphError::Device("no default output device".into()))?;
            let device = CpalDevice::from_cpal(device)
                .ok_or_else(|| GraphError::Device("default output has no usable config".into()))?;
            Ok(Arc::new(device))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_picks_marked_default() {
        let a: DeviceRef = OfflineDevice::new("a", 44100, 2, 64);
        let b: DeviceRef = OfflineDevice::new("b", 48000, 2, 64);
        let registry = DeviceRegistry::new().with_device(a).with_default_output(b);

        assert_eq!(registry.default_output().unwrap().name(), "b");
        assert_eq!(registry.find_device_by_key("a").unwrap().sample_rate(), 44100);
        assert!(registry.find_device_by_name("c").is_none());
        assert!(registry.default_input().is_err());
    }

    #[test]
    fn empty_registry_has_no_output() {
        assert!(DeviceRegistry::new().default_output().is_err());
    }

    #[test]
    fn stopped_device_renders_silence() {
        let device = OfflineDevice::new("offline", 44100, 2, 16);
        let mut out = Buffer::from_channels(&[vec![1.0; 16], vec![1.0; 16]]);
        assert!(!device.render(&mut out));
        assert_eq!(out.peak(), 0.0);
        assert!(!device.is_running());
    }
}
