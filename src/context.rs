//! The context owns a graph's target and drives its lifecycle.
//!
//! ```
//! use schall::{Context, OfflineDevice, nodes::{Gain, LineOut, Sine}};
//!
//! let device = OfflineDevice::new("offline", 48000, 2, 256);
//! let ctx = Context::new().with_target(LineOut::new(device.clone())?);
//!
//! let sine = ctx.make_node(Sine::new(440.0));
//! let gain = ctx.make_node(Gain::new(0.5));
//! sine.connect(&gain)?.connect(&ctx.target()?)?;
//!
//! ctx.start()?;
//! let mut block = schall::Buffer::new(256, 2);
//! assert!(device.render(&mut block));
//! # Ok::<(), schall::GraphError>(())
//! ```

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashSet;
use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info, warn};

use crate::buffer::Buffer;
use crate::device::DeviceManager;
use crate::error::GraphError;
use crate::format::ChannelMode;
use crate::native::{NativeBackend, NativeVoiceHandle};
use crate::node::{AudioNode, Handle, Node, NodeId, NodeRef, NodeRole, ProcessContext, DEFAULT_QUEUE_SIZE};
use crate::nodes::effect::ChannelConverter;
use crate::nodes::native::VoiceAdapter;
use crate::nodes::target::{LineOut, Target, TargetSink};

/// Peak level above which a block counts as clipped.
pub const DEFAULT_CLIP_THRESHOLD: f32 = 2.0;

/// Block size used when a target does not report one.
pub const DEFAULT_FRAMES_PER_BLOCK: usize = 512;

const NO_CLIP: u64 = u64::MAX;

/// Clip detection shared between the context and its target node.
#[derive(Debug)]
pub(crate) struct ClipMonitor {
    enabled: AtomicBool,
    threshold: AtomicU32,
    last_clip: AtomicU64,
}

impl ClipMonitor {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            threshold: AtomicU32::new(DEFAULT_CLIP_THRESHOLD.to_bits()),
            last_clip: AtomicU64::new(NO_CLIP),
        }
    }

    /// Silences `buffer` and records `frame` if it clips.
    pub(crate) fn check(&self, buffer: &mut Buffer, frame: u64) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let threshold = f32::from_bits(self.threshold.load(Ordering::Relaxed));
        if buffer.peak() > threshold {
            buffer.zero();
            self.last_clip.store(frame, Ordering::Relaxed);
        }
    }
}

pub(crate) struct GraphState {
    target: Option<Arc<dyn Target>>,
    target_node: Option<NodeRef>,
    device_manager: Option<Arc<dyn DeviceManager>>,
    native_backend: Option<Arc<dyn NativeBackend>>,
    process: ProcessContext,
}

/// Shared context state.
///
/// `graph` is only held for topology changes and lifecycle transitions; the
/// render thread `try_lock`s it. Everything status queries read lives outside
/// of it.
pub(crate) struct ContextInner {
    graph: Mutex<GraphState>,
    control: Mutex<()>,
    root: Mutex<Option<NodeRef>>,
    initialized: AtomicBool,
    running: AtomicBool,
    sample_rate: AtomicU32,
    frames_per_block: AtomicUsize,
    frames_processed: AtomicU64,
    dropped_blocks: AtomicU64,
    clip: Arc<ClipMonitor>,
}

/// Owner of an audio graph.
///
/// Holds the target, the lock that guards topology changes, and the
/// initialize / start / stop lifecycle. Nodes keep only a weak reference back;
/// dropping the context stops the device and uninitializes every node.
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("initialized", &self.is_initialized())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Context {
    /// A context without a target. Set one with [`with_target`](Self::with_target)
    /// or give it a device manager to create a default output on demand.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                graph: Mutex::new(GraphState {
                    target: None,
                    target_node: None,
                    device_manager: None,
                    native_backend: None,
                    process: ProcessContext {
                        sample_rate: 0,
                        frames_per_block: DEFAULT_FRAMES_PER_BLOCK,
                        frame: 0,
                    },
                }),
                control: Mutex::new(()),
                root: Mutex::new(None),
                initialized: AtomicBool::new(false),
                running: AtomicBool::new(false),
                sample_rate: AtomicU32::new(0),
                frames_per_block: AtomicUsize::new(DEFAULT_FRAMES_PER_BLOCK),
                frames_processed: AtomicU64::new(0),
                dropped_blocks: AtomicU64::new(0),
                clip: Arc::new(ClipMonitor::new()),
            }),
        }
    }

    /// A context that plays through the system's default output device.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Self {
        Self::new().with_device_manager(Arc::new(crate::device::CpalDeviceManager::new()))
    }

    pub fn with_target(self, target: impl Target + 'static) -> Self {
        {
            let mut state = self.inner.lock_graph();
            self.inner.install_target(&mut state, Arc::new(target));
        }
        self
    }

    /// Device manager used to create a default output when no target is set.
    pub fn with_device_manager(self, manager: Arc<dyn DeviceManager>) -> Self {
        self.inner.lock_graph().device_manager = Some(manager);
        self
    }

    /// Backend that supplies voices for implicit adapters.
    pub fn with_native_backend(self, backend: Arc<dyn NativeBackend>) -> Self {
        self.inner.lock_graph().native_backend = Some(backend);
        self
    }

    /// Creates a node belonging to this context.
    pub fn make_node<N: AudioNode>(&self, node: N) -> Handle<N> {
        let handle = Handle::build(node, None, DEFAULT_QUEUE_SIZE);
        handle.set_context(&self.inner);
        handle
    }

    /// Creates a node with an explicit format.
    pub fn make_node_with_format<N: AudioNode>(&self, node: N, format: crate::Format) -> Handle<N> {
        let handle = Handle::build(node, Some(format), DEFAULT_QUEUE_SIZE);
        handle.set_context(&self.inner);
        handle
    }

    /// The target node, created from the default output device if needed.
    pub fn target(&self) -> Result<NodeRef, GraphError> {
        if let Some(node) = self.inner.root.lock().clone() {
            return Ok(node);
        }
        let mut state = self.inner.lock_graph();
        self.inner.ensure_target(&mut state)
    }

    /// Replaces the target, moving the current target's inputs over.
    ///
    /// A running context is stopped, reinitialized and restarted.
    pub fn set_target(&self, target: impl Target + 'static) -> Result<(), GraphError> {
        let was_running = self.is_running();
        self.uninitialize()?;
        {
            let mut state = self.inner.lock_graph();
            self.inner.install_target(&mut state, Arc::new(target));
        }
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Negotiates formats and initializes every node reachable from the
    /// target, inputs first. A no-op if already initialized.
    pub fn initialize(&self) -> Result<(), GraphError> {
        let _control = self.inner.control.lock();
        let mut state = self.inner.lock_graph();
        self.inner.initialize_locked(&mut state)
    }

    /// Stops if running, then uninitializes from the target down. Idempotent.
    pub fn uninitialize(&self) -> Result<(), GraphError> {
        self.stop()?;
        let _control = self.inner.control.lock();
        let state = self.inner.lock_graph();
        if !self.inner.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(target) = state.target_node.clone() {
            self.inner.uninitialize_subtree(&target);
        }
        self.inner.initialized.store(false, Ordering::Release);
        debug!("context uninitialized");
        Ok(())
    }

    /// Initializes if needed and starts the target's device.
    pub fn start(&self) -> Result<(), GraphError> {
        let _control = self.inner.control.lock();
        if self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let (target, node, process) = {
            let mut state = self.inner.lock_graph();
            self.inner.initialize_locked(&mut state)?;
            let target = state.target.clone().ok_or(GraphError::NoTarget)?;
            let node = state.target_node.clone().ok_or(GraphError::NoTarget)?;
            (target, node, state.process)
        };

        let renderer = Renderer::new(
            Arc::downgrade(&self.inner),
            node,
            process.frames_per_block,
            target.num_channels(),
        );
        target.start(renderer)?;
        self.inner.running.store(true, Ordering::Release);
        info!(output = target.name(), sample_rate = process.sample_rate, "context started");
        Ok(())
    }

    /// Stops the target's device; returns once no more blocks are rendered.
    pub fn stop(&self) -> Result<(), GraphError> {
        let _control = self.inner.control.lock();
        if !self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }
        let target = self.inner.lock_graph().target.clone();
        if let Some(target) = target {
            target.stop()?;
            info!(output = target.name(), "context stopped");
        }
        self.inner.running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Stops the context and disconnects every node reachable from the target.
    pub fn disconnect_all_nodes(&self) -> Result<(), GraphError> {
        self.uninitialize()?;
        let _control = self.inner.control.lock();
        let state = self.inner.lock_graph();
        let Some(target) = state.target_node.clone() else {
            return Ok(());
        };
        let mut visited = HashSet::new();
        let mut stack = vec![target];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.id()) {
                continue;
            }
            let inputs = core::mem::take(&mut node.lock().inputs);
            for input in inputs.into_values() {
                input.lock().output = None;
                stack.push(input);
            }
        }
        debug!(nodes = visited.len(), "disconnected all nodes");
        Ok(())
    }

    /// Sample rate of the current target.
    pub fn sample_rate(&self) -> Option<u32> {
        match self.inner.sample_rate.load(Ordering::Relaxed) {
            0 => None,
            rate => Some(rate),
        }
    }

    pub fn frames_per_block(&self) -> usize {
        self.inner.frames_per_block.load(Ordering::Relaxed)
    }

    /// Frames rendered since the context was created.
    pub fn num_processed_frames(&self) -> u64 {
        self.inner.frames_processed.load(Ordering::Relaxed)
    }

    pub fn num_processed_seconds(&self) -> f64 {
        match self.sample_rate() {
            Some(rate) if rate > 0 => self.num_processed_frames() as f64 / rate as f64,
            _ => 0.0,
        }
    }

    /// Blocks rendered as silence because the graph was being modified.
    pub fn num_dropped_blocks(&self) -> u64 {
        self.inner.dropped_blocks.load(Ordering::Relaxed)
    }

    /// Configures clip detection on the target. Clipped blocks are silenced.
    pub fn set_clip_detection(&self, enabled: bool, threshold: f32) {
        self.inner.clip.enabled.store(enabled, Ordering::Relaxed);
        self.inner.clip.threshold.store(threshold.to_bits(), Ordering::Relaxed);
    }

    /// Frame at which the most recent clipped block started.
    pub fn last_clip_frame(&self) -> Option<u64> {
        match self.inner.clip.last_clip.load(Ordering::Relaxed) {
            NO_CLIP => None,
            frame => Some(frame),
        }
    }

    /// Snapshot of the graph reachable from the target.
    ///
    /// Edges point from an input to the node consuming it and carry the bus.
    pub fn topology(&self) -> DiGraph<NodeSummary, usize> {
        let target = self.inner.root.lock().clone();
        let mut graph = DiGraph::new();
        if let Some(target) = target {
            let mut indices = hashbrown::HashMap::new();
            add_to_topology(&mut graph, &mut indices, &target);
        }
        graph
    }

    /// The graph as an indented tree, target first.
    pub fn print_graph(&self) -> String {
        let mut out = String::new();
        let target = self.inner.root.lock().clone();
        if let Some(target) = target {
            let mut visited = HashSet::new();
            print_recursive(&target, 0, None, &mut visited, &mut out);
        }
        out
    }

    /// The graph in Graphviz dot format.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.topology()))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(err) = self.uninitialize() {
            warn!(%err, "failed to stop context on drop");
        }
    }
}

impl ContextInner {
    #[inline]
    pub(crate) fn lock_graph(&self) -> MutexGuard<'_, GraphState> {
        self.graph.lock()
    }

    fn install_target(self: &Arc<Self>, state: &mut GraphState, target: Arc<dyn Target>) -> NodeRef {
        let sink = TargetSink::new(target.clone(), self.clip.clone());
        let (node, _) = Node::create(sink, None, 1);
        node.set_context(self);

        if let Some(old) = state.target_node.take() {
            self.uninitialize_subtree(&old);
            let inputs = core::mem::take(&mut old.lock().inputs);
            for (bus, input) in inputs {
                input.lock().output = Some(Arc::downgrade(&node));
                node.lock().inputs.insert(bus, input);
            }
        }

        state.process = ProcessContext {
            sample_rate: target.sample_rate(),
            frames_per_block: target.frames_per_block().max(1),
            frame: 0,
        };
        self.sample_rate.store(state.process.sample_rate, Ordering::Relaxed);
        self.frames_per_block
            .store(state.process.frames_per_block, Ordering::Relaxed);
        self.initialized.store(false, Ordering::Release);
        debug!(output = target.name(), channels = target.num_channels(), "target installed");
        state.target = Some(target);
        state.target_node = Some(node.clone());
        *self.root.lock() = Some(node.clone());
        node
    }

    fn ensure_target(self: &Arc<Self>, state: &mut GraphState) -> Result<NodeRef, GraphError> {
        if let Some(node) = &state.target_node {
            return Ok(node.clone());
        }
        let manager = state.device_manager.clone().ok_or(GraphError::NoTarget)?;
        let device = manager.default_output()?;
        info!(device = device.name(), "using default output device");
        let line_out = LineOut::new(device)?;
        Ok(self.install_target(state, Arc::new(line_out)))
    }

    fn initialize_locked(self: &Arc<Self>, state: &mut GraphState) -> Result<(), GraphError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let target = self.ensure_target(state)?;
        self.attach_subtree(&target);

        let mut visited = HashSet::new();
        if let Err(err) = self.initialize_recursive(state, &target, &mut visited) {
            self.uninitialize_subtree(&target);
            return Err(err);
        }
        self.initialized.store(true, Ordering::Release);
        debug!(nodes = visited.len(), "context initialized");
        Ok(())
    }

    /// Called after every topology change with the graph lock held.
    ///
    /// On error the caller undoes its change and calls
    /// [`restore`](Self::restore).
    pub(crate) fn connections_did_change(self: &Arc<Self>, state: &mut GraphState) -> Result<(), GraphError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(target) = state.target_node.clone() else {
            return Ok(());
        };
        let mut visited = HashSet::new();
        self.initialize_recursive(state, &target, &mut visited)
    }

    /// Re-initializes after a rejected change has been undone.
    pub(crate) fn restore(self: &Arc<Self>, state: &mut GraphState) {
        if let Err(err) = self.connections_did_change(state) {
            warn!(%err, "graph could not be restored");
        }
    }

    /// Takes `input` back out of `consumer`'s `bus`, together with any
    /// implicit node spliced in front of it.
    pub(crate) fn unsplice_input(&self, consumer: &NodeRef, bus: usize, input: &NodeRef) {
        let occupant = consumer.lock().inputs.remove(&bus);
        if let Some(implicit) = occupant.filter(|n| !Arc::ptr_eq(n, input)) {
            uninitialize_node(&implicit);
            let mut inner = implicit.lock();
            inner.inputs.clear();
            inner.output = None;
        }
        input.lock().output = None;
        self.uninitialize_subtree(input);
    }

    pub(crate) fn attach_subtree(self: &Arc<Self>, node: &NodeRef) {
        let mut visited = HashSet::new();
        let mut stack = vec![node.clone()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.id()) {
                continue;
            }
            node.set_context(self);
            stack.extend(node.inputs().into_iter().map(|(_, n)| n));
        }
    }

    /// Uninitializes `node` and everything upstream of it, node first.
    pub(crate) fn uninitialize_subtree(&self, node: &NodeRef) {
        let mut visited = HashSet::new();
        let mut stack = vec![node.clone()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.id()) {
                continue;
            }
            uninitialize_node(&node);
            stack.extend(node.inputs().into_iter().rev().map(|(_, n)| n));
        }
    }

    fn initialize_recursive(
        self: &Arc<Self>,
        state: &GraphState,
        node: &NodeRef,
        visited: &mut HashSet<NodeId>,
    ) -> Result<(), GraphError> {
        if !visited.insert(node.id()) {
            return Err(GraphError::Cycle {
                from: node.name().to_owned(),
                to: node.name().to_owned(),
            });
        }
        self.remove_implicit_inputs(node);

        let declared = node.format();
        let mode = declared.channel_mode();
        let (mut sample_rate, mut channels) = defaults_from_output(node);

        if let Some(voice) = node.native_voice() {
            if !node.is_voice_adapter() {
                self.splice_native_inputs(state, node, &voice)?;
            }
        }

        for (_, input) in node.inputs() {
            self.initialize_recursive(state, &input, visited)?;
        }

        let inputs = node.inputs();
        if sample_rate.is_none() {
            sample_rate = inputs.first().and_then(|(_, input)| input.sample_rate());
        }
        if channels == 0 && mode == ChannelMode::MatchesInput {
            channels = inputs
                .iter()
                .map(|(_, input)| input.num_channels())
                .max()
                .unwrap_or(0);
        }
        if sample_rate.is_none() || channels == 0 {
            // keep what an earlier pass negotiated
            let inner = node.lock();
            sample_rate = sample_rate.or(inner.sample_rate);
            if channels == 0 {
                channels = inner.channels;
            }
        }
        // a rejected pass leaves already-initialized nodes running; the caller
        // rolls back
        let Some(sample_rate) = sample_rate.filter(|_| channels > 0) else {
            return Err(GraphError::IncompleteFormat {
                node: node.name().to_owned(),
                sample_rate,
                channels,
            });
        };

        for (_, input) in &inputs {
            if let Some(found) = input.sample_rate() {
                if found != sample_rate {
                    return Err(GraphError::SampleRateMismatch {
                        node: node.name().to_owned(),
                        input: input.name().to_owned(),
                        expected: sample_rate,
                        found,
                    });
                }
            }
        }

        self.splice_converters(state, node, sample_rate, channels)?;
        configure_node(state, node, sample_rate, channels)
    }

    /// Drops converters and adapters left behind by earlier passes.
    ///
    /// Converters are always rebuilt, adapters are kept while they still have
    /// something to bridge.
    fn remove_implicit_inputs(&self, node: &NodeRef) {
        for (bus, input) in node.inputs() {
            if !input.is_implicit() {
                continue;
            }
            let source = input.input(0);
            if input.is_voice_adapter() && source.is_some() {
                continue;
            }
            uninitialize_node(&input);
            input.lock().inputs.clear();
            input.lock().output = None;
            let mut inner = node.lock();
            match source {
                Some(source) => {
                    source.lock().output = Some(Arc::downgrade(node));
                    inner.inputs.insert(bus, source);
                }
                None => {
                    inner.inputs.remove(&bus);
                }
            }
            debug!(implicit = %input.name(), node = %node.name(), "removed implicit node");
        }
    }

    fn splice_native_inputs(
        self: &Arc<Self>,
        state: &GraphState,
        node: &NodeRef,
        voice: &NativeVoiceHandle,
    ) -> Result<(), GraphError> {
        for (bus, input) in node.inputs() {
            if let Some(input_voice) = input.native_voice() {
                input_voice.attach_output(voice)?;
                continue;
            }

            if let Some(adapter) = find_upstream_adapter(&input) {
                relink_adapter(&adapter, node, bus, &input);
                if let Some(adapter_voice) = adapter.native_voice() {
                    adapter_voice.attach_output(voice)?;
                }
                debug!(adapter = %adapter.name(), node = %node.name(), "relinked voice adapter");
                continue;
            }

            if let Some(native) = find_native(&input) {
                return Err(GraphError::GenericAfterNative {
                    node: input.name().to_owned(),
                    consumer: node.name().to_owned(),
                    native: native.name().to_owned(),
                });
            }

            let backend = state.native_backend.clone().ok_or_else(|| GraphError::NoNativeBackend {
                node: node.name().to_owned(),
            })?;
            let adapter_voice = backend.create_source_voice()?;
            adapter_voice.attach_output(voice)?;
            let (adapter, _) = Node::create(VoiceAdapter::new(adapter_voice), None, 1);
            adapter.lock().implicit = true;
            adapter.set_context(self);
            splice(node, bus, &input, &adapter);
            debug!(
                backend = backend.name(),
                input = %input.name(),
                node = %node.name(),
                "inserted voice adapter"
            );
        }
        Ok(())
    }

    fn splice_converters(
        self: &Arc<Self>,
        state: &GraphState,
        node: &NodeRef,
        sample_rate: u32,
        channels: usize,
    ) -> Result<(), GraphError> {
        if node.lock().processor.maps_input_channels() {
            return Ok(());
        }
        for (bus, input) in node.inputs() {
            let input_channels = input.num_channels();
            if input_channels == channels {
                continue;
            }
            let format = crate::Format::new()
                .with_channels(channels)
                .with_sample_rate(sample_rate);
            let (converter, _) = Node::create(ChannelConverter::new(), Some(format), 1);
            converter.lock().implicit = true;
            converter.set_context(self);
            splice(node, bus, &input, &converter);
            configure_node(state, &converter, sample_rate, channels)?;
            debug!(
                from = input_channels,
                to = channels,
                node = %node.name(),
                "inserted channel converter"
            );
        }
        Ok(())
    }

    /// Renders one block for `target`. Never blocks.
    fn render(&self, target: &Node, block: &mut Buffer) {
        let Some(state) = self.graph.try_lock() else {
            block.zero();
            self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if !self.initialized.load(Ordering::Acquire) {
            block.zero();
            return;
        }
        let ctx = ProcessContext {
            frame: self.frames_processed.load(Ordering::Relaxed),
            ..state.process
        };
        block.zero();
        target.pull(block, &ctx);
        self.frames_processed
            .fetch_add(block.num_frames() as u64, Ordering::Relaxed);
    }
}

/// Sample rate and channels a node can take from its output chain.
fn defaults_from_output(node: &NodeRef) -> (Option<u32>, usize) {
    let declared = node.format();
    let mut sample_rate = declared.sample_rate();
    let mut channels = match declared.channel_mode() {
        ChannelMode::Specified => declared.channels(),
        _ => 0,
    };
    let walk_rate = declared.wants_default_format_from_output();
    let walk_channels = walk_rate || declared.channel_mode() == ChannelMode::MatchesOutput;
    let done = |rate: Option<u32>, ch: usize| (!walk_rate || rate.is_some()) && (!walk_channels || ch > 0);

    let mut visited = HashSet::new();
    let mut current = node.output();
    while let Some(out) = current {
        if done(sample_rate, channels) || !visited.insert(out.id()) {
            break;
        }
        let format = out.format();
        if walk_rate && sample_rate.is_none() {
            sample_rate = format.sample_rate();
        }
        if walk_channels && channels == 0 && format.channel_mode() == ChannelMode::Specified {
            channels = format.channels();
        }
        current = out.output();
    }
    (sample_rate, channels)
}

fn configure_node(
    state: &GraphState,
    node: &NodeRef,
    sample_rate: u32,
    channels: usize,
) -> Result<(), GraphError> {
    let ctx = ProcessContext {
        sample_rate,
        frames_per_block: state.process.frames_per_block,
        frame: 0,
    };
    let frames = ctx.frames_per_block;

    let mut guard = node.lock();
    let inner = &mut *guard;
    if inner.initialized && (inner.sample_rate != Some(sample_rate) || inner.channels != channels) {
        debug!(node = %node.name(), channels, sample_rate, "format changed");
        if inner.auto_enable {
            node.stop_locked(inner);
        }
        inner.processor.uninitialize();
        inner.initialized = false;
    }
    inner.sample_rate = Some(sample_rate);
    inner.channels = channels;

    let shapes: Vec<(usize, usize)> = inner
        .inputs
        .iter()
        .map(|(bus, input)| (*bus, input.num_channels()))
        .collect();
    inner.process_in_place = inner.processor.can_process_in_place()
        && shapes.len() <= 1
        && shapes.iter().all(|(_, ch)| *ch == channels);

    if inner.process_in_place {
        inner.scratch.clear();
    } else {
        ensure_shape(&mut inner.summing, frames, channels);
        inner.scratch.retain(|bus, _| shapes.iter().any(|(b, _)| b == bus));
        for (bus, ch) in shapes {
            ensure_shape(inner.scratch.entry(bus).or_default(), frames, ch);
        }
    }

    if !inner.initialized {
        if let Err(err) = inner.processor.initialize(&ctx, channels) {
            warn!(node = %node.name(), %err, "initialize failed");
            return Err(err);
        }
        inner.initialized = true;
        debug!(
            node = %node.name(),
            channels,
            sample_rate,
            in_place = inner.process_in_place,
            "initialized"
        );
        if inner.auto_enable {
            node.start_locked(inner);
        }
    }
    Ok(())
}

fn ensure_shape(buffer: &mut Buffer, frames: usize, channels: usize) {
    if buffer.num_frames() != frames || buffer.num_channels() != channels {
        buffer.resize(frames, channels);
    }
}

fn uninitialize_node(node: &NodeRef) {
    let mut guard = node.lock();
    let inner = &mut *guard;
    if !inner.initialized {
        return;
    }
    if inner.auto_enable {
        node.stop_locked(inner);
    }
    inner.processor.uninitialize();
    inner.initialized = false;
    debug!(node = %node.name(), "uninitialized");
}

/// Inserts `between` on `consumer`'s `bus`, feeding from `input`.
fn splice(consumer: &NodeRef, bus: usize, input: &NodeRef, between: &NodeRef) {
    {
        let mut inner = between.lock();
        inner.inputs.insert(0, input.clone());
        inner.output = Some(Arc::downgrade(consumer));
    }
    input.lock().output = Some(Arc::downgrade(between));
    consumer.lock().inputs.insert(bus, between.clone());
}

/// Moves `adapter` from wherever it sits to between `input` and `consumer`.
fn relink_adapter(adapter: &NodeRef, consumer: &NodeRef, bus: usize, input: &NodeRef) {
    let source = adapter.lock().inputs.remove(&0);
    if let Some(out) = adapter.output() {
        let mut out_inner = out.lock();
        let slot = out_inner
            .inputs
            .iter()
            .find(|(_, n)| Arc::ptr_eq(n, adapter))
            .map(|(bus, _)| *bus);
        if let Some(slot) = slot {
            match &source {
                Some(source) => {
                    out_inner.inputs.insert(slot, source.clone());
                }
                None => {
                    out_inner.inputs.remove(&slot);
                }
            }
        }
        drop(out_inner);
        if let Some(source) = &source {
            source.lock().output = Some(Arc::downgrade(&out));
        }
    }
    uninitialize_node(adapter);
    splice(consumer, bus, input, adapter);
}

/// Walks first inputs from `node` up to the first native node, returning it
/// if it is an adapter.
fn find_upstream_adapter(node: &NodeRef) -> Option<NodeRef> {
    let mut visited = HashSet::new();
    let mut current = node.input(first_bus(node)?);
    while let Some(n) = current {
        if !visited.insert(n.id()) {
            return None;
        }
        if n.is_native() {
            return n.is_voice_adapter().then_some(n);
        }
        current = first_bus(&n).and_then(|bus| n.input(bus));
    }
    None
}

fn first_bus(node: &NodeRef) -> Option<usize> {
    node.lock().inputs.keys().next().copied()
}

/// First native node in the subtree feeding `node`, `node` included.
fn find_native(node: &NodeRef) -> Option<NodeRef> {
    let mut visited = HashSet::new();
    let mut stack = vec![node.clone()];
    while let Some(n) = stack.pop() {
        if !visited.insert(n.id()) {
            continue;
        }
        if n.is_native() {
            return Some(n);
        }
        stack.extend(n.inputs().into_iter().map(|(_, input)| input));
    }
    None
}

/// Pulls blocks from a context on behalf of a device.
///
/// Lives on the render thread: rendering never allocates, blocks, or fails.
/// If the context is busy or gone, the block is silent.
pub struct Renderer {
    context: Weak<ContextInner>,
    target: NodeRef,
    block: Buffer,
    cursor: usize,
}

impl Renderer {
    pub(crate) fn new(context: Weak<ContextInner>, target: NodeRef, frames: usize, channels: usize) -> Self {
        Self {
            context,
            target,
            block: Buffer::new(frames, channels),
            cursor: frames,
        }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.block.num_channels()
    }

    #[inline]
    pub fn frames_per_block(&self) -> usize {
        self.block.num_frames()
    }

    /// Renders the next block.
    pub fn render_block(&mut self) -> &Buffer {
        match self.context.upgrade() {
            Some(context) => context.render(&self.target, &mut self.block),
            None => self.block.zero(),
        }
        self.cursor = self.block.num_frames();
        &self.block
    }

    /// Fills an interleaved device buffer of any length, rendering blocks as
    /// needed and carrying leftovers into the next call.
    pub fn fill_interleaved(&mut self, out: &mut [f32], out_channels: usize) {
        if out_channels == 0 {
            return;
        }
        let block_frames = self.block.num_frames();
        let block_channels = self.block.num_channels();
        for frame in out.chunks_exact_mut(out_channels) {
            if self.cursor >= block_frames {
                self.render_block();
                self.cursor = 0;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = match block_channels {
                    1 => self.block.channel(0)[self.cursor],
                    n if ch < n => self.block.channel(ch)[self.cursor],
                    _ => 0.0,
                };
            }
            self.cursor += 1;
        }
    }
}

/// One node in a [`Context::topology`] snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
    pub role: NodeRole,
    pub channels: usize,
    pub sample_rate: Option<u32>,
    pub channel_mode: ChannelMode,
    pub enabled: bool,
    pub initialized: bool,
    pub process_in_place: bool,
    pub implicit: bool,
    pub native: bool,
}

impl NodeSummary {
    fn of(node: &Node) -> Self {
        let inner = node.lock();
        Self {
            id: node.id(),
            name: node.name().to_owned(),
            role: node.role(),
            channels: inner.channels,
            sample_rate: inner.sample_rate,
            channel_mode: inner.declared.channel_mode(),
            enabled: node.is_enabled(),
            initialized: inner.initialized,
            process_in_place: inner.process_in_place,
            implicit: inner.implicit,
            native: inner.processor.native_voice().is_some(),
        }
    }
}

impl fmt::Display for NodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.channel_mode {
            ChannelMode::Specified => "specified",
            ChannelMode::MatchesInput => "matches input",
            ChannelMode::MatchesOutput => "matches output",
        };
        let flags = [
            Some(if self.enabled { "enabled" } else { "disabled" }.to_owned()),
            Some(format!("ch: {}", self.channels)),
            self.sample_rate.map(|rate| format!("{rate} Hz")),
            Some(mode.to_owned()),
            self.process_in_place.then(|| "in-place".to_owned()),
            self.implicit.then(|| "implicit".to_owned()),
            self.native.then(|| "native".to_owned()),
            (!self.initialized).then(|| "uninitialized".to_owned()),
        ];
        write!(f, "{} [{}]", self.name, flags.into_iter().flatten().join(", "))
    }
}

fn add_to_topology(
    graph: &mut DiGraph<NodeSummary, usize>,
    indices: &mut hashbrown::HashMap<NodeId, NodeIndex>,
    node: &NodeRef,
) -> NodeIndex {
    if let Some(index) = indices.get(&node.id()) {
        return *index;
    }
    let index = graph.add_node(NodeSummary::of(node));
    indices.insert(node.id(), index);
    for (bus, input) in node.inputs() {
        let input_index = add_to_topology(graph, indices, &input);
        graph.add_edge(input_index, index, bus);
    }
    index
}

fn print_recursive(
    node: &NodeRef,
    depth: usize,
    bus: Option<usize>,
    visited: &mut HashSet<NodeId>,
    out: &mut String,
) {
    use core::fmt::Write;

    let prefix = "-".repeat(depth * 2);
    let bus = bus.map(|b| format!("({b}) ")).unwrap_or_default();
    let _ = writeln!(out, "{}{}{}{}", prefix, if depth > 0 { " " } else { "" }, bus, NodeSummary::of(node));
    if !visited.insert(node.id()) {
        return;
    }
    for (bus, input) in node.inputs() {
        print_recursive(&input, depth + 1, Some(bus), visited, out);
    }
}
