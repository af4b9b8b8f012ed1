//! Core node trait, graph nodes and typed handles.

use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use delegate::delegate;
use hashbrown::HashSet;
use parking_lot::{Mutex, MutexGuard};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::context::ContextInner;
use crate::error::GraphError;
use crate::format::{ChannelMode, Format};
use crate::native::NativeVoiceHandle;

/// Capacity of a node's parameter message queue.
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of frames in every block
    pub frames_per_block: usize,
    /// Frames rendered by the context before this block
    pub frame: u64,
}

/// Unique identifier for a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node can be connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    /// No inputs, manufactures samples.
    Generator,
    /// Exactly one input, transforms it.
    Effect,
    /// Many inputs on numbered busses.
    Mixer,
    /// No output, drives a device or engine.
    Target,
}

impl NodeRole {
    fn default_input_capacity(self) -> Option<usize> {
        match self {
            NodeRole::Generator => Some(0),
            NodeRole::Effect => Some(1),
            NodeRole::Mixer | NodeRole::Target => None,
        }
    }
}

/// The core trait for audio processing nodes.
///
/// A node processes one block at a time. Generators write the whole block,
/// effects transform it in place. The graph sums and channel-maps inputs
/// before `process` is called, so a node only ever sees a buffer with its own
/// channel count.
///
/// # Message-Based Parameters
///
/// Parameter updates arrive as messages sent through a [`Handle`] and are
/// drained at the start of the next processed block:
///
/// ```
/// use schall::{AudioNode, Buffer, Format, NodeRole, ProcessContext};
///
/// enum ToneMessage {
///     SetFrequency(f32),
/// }
///
/// struct Tone {
///     frequency: f32,
///     phase: f32,
/// }
///
/// impl AudioNode for Tone {
///     type Message = ToneMessage;
///
///     fn process(
///         &mut self,
///         ctx: &ProcessContext,
///         messages: impl Iterator<Item = ToneMessage>,
///         buffer: &mut Buffer,
///     ) {
///         for msg in messages {
///             match msg {
///                 ToneMessage::SetFrequency(f) => self.frequency = f,
///             }
///         }
///
///         let inc = self.frequency / ctx.sample_rate as f32;
///         for sample in buffer.channel_mut(0) {
///             *sample = (self.phase * std::f32::consts::TAU).sin() * 0.25;
///             self.phase = (self.phase + inc).fract();
///         }
///         buffer.duplicate_first_channel();
///     }
///
///     fn role(&self) -> NodeRole {
///         NodeRole::Generator
///     }
///
///     fn format(&self) -> Format {
///         Format::new().with_channels(1).with_auto_enable(true)
///     }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates, `()` for nodes without parameters.
    type Message: Send + 'static;

    /// Process one block of audio in place.
    ///
    /// `buffer` holds `ctx.frames_per_block` frames and the node's negotiated
    /// channel count. Runs on the render thread: no allocation, no blocking.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        buffer: &mut Buffer,
    );

    fn name(&self) -> &str {
        let full = core::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Effect
    }

    /// Format the node asks for when none is given at construction.
    fn format(&self) -> Format {
        Format::new()
    }

    /// Number of input busses, `None` for unbounded.
    fn input_capacity(&self) -> Option<usize> {
        self.role().default_input_capacity()
    }

    /// Called on the control thread once the format is resolved.
    fn initialize(&mut self, _ctx: &ProcessContext, _channels: usize) -> Result<(), GraphError> {
        Ok(())
    }

    fn uninitialize(&mut self) {}

    /// Adds one input bus into the summing buffer.
    fn accumulate_input(&mut self, _bus: usize, input: &Buffer, sum: &mut Buffer) {
        sum.mix_from(input);
    }

    /// Whether inputs with a different channel count can be mixed in
    /// directly instead of through a converter.
    fn maps_input_channels(&self) -> bool {
        false
    }

    fn can_process_in_place(&self) -> bool {
        true
    }

    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}

    /// Polled after every processed block; returning true disables the node.
    fn reached_end(&mut self) -> bool {
        false
    }

    /// The platform voice doing this node's processing, if any.
    fn native_voice(&self) -> Option<NativeVoiceHandle> {
        None
    }

    /// True for nodes that bridge a generic subgraph into a native voice.
    fn is_voice_adapter(&self) -> bool {
        false
    }
}

// Type-erased wrapper so nodes of any type share one graph
pub(crate) trait ErasedNode: Send {
    fn name(&self) -> &str;
    fn role(&self) -> NodeRole;
    fn format(&self) -> Format;
    fn input_capacity(&self) -> Option<usize>;
    fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError>;
    fn uninitialize(&mut self);
    fn accumulate_input(&mut self, bus: usize, input: &Buffer, sum: &mut Buffer);
    fn maps_input_channels(&self) -> bool;
    fn can_process_in_place(&self) -> bool;
    fn on_start(&mut self);
    fn on_stop(&mut self);
    fn reached_end(&mut self) -> bool;
    fn native_voice(&self) -> Option<NativeVoiceHandle>;
    fn is_voice_adapter(&self) -> bool;
    fn process_erased(&mut self, ctx: &ProcessContext, buffer: &mut Buffer);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct NodeWrapper<N: AudioNode> {
    pub(crate) node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    delegate! {
        to self.node {
            fn name(&self) -> &str;
            fn role(&self) -> NodeRole;
            fn format(&self) -> Format;
            fn input_capacity(&self) -> Option<usize>;
            fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError>;
            fn uninitialize(&mut self);
            fn accumulate_input(&mut self, bus: usize, input: &Buffer, sum: &mut Buffer);
            fn maps_input_channels(&self) -> bool;
            fn can_process_in_place(&self) -> bool;
            fn on_start(&mut self);
            fn on_stop(&mut self);
            fn reached_end(&mut self) -> bool;
            fn native_voice(&self) -> Option<NativeVoiceHandle>;
            fn is_voice_adapter(&self) -> bool;
        }
    }

    fn process_erased(&mut self, ctx: &ProcessContext, buffer: &mut Buffer) {
        // Split borrow to avoid conflict between receiver and node
        let receiver = &mut self.receiver;
        let node = &mut self.node;

        // Drains the queue without allocating
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        node.process(ctx, messages, buffer);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Shared reference to a node in a graph.
pub type NodeRef = Arc<Node>;

/// A node in the audio graph.
///
/// Owns the processor, its input connections and the buffers needed to pull
/// them. Downstream nodes hold their inputs strongly; the output and context
/// links are weak, so dropping the context or the last downstream reference
/// tears a subgraph down.
pub struct Node {
    id: NodeId,
    name: String,
    role: NodeRole,
    enabled: AtomicBool,
    inner: Mutex<NodeInner>,
}

pub(crate) struct NodeInner {
    pub(crate) processor: Box<dyn ErasedNode>,
    pub(crate) inputs: BTreeMap<usize, NodeRef>,
    pub(crate) output: Option<Weak<Node>>,
    pub(crate) context: Weak<ContextInner>,
    pub(crate) declared: Format,
    pub(crate) sample_rate: Option<u32>,
    pub(crate) channels: usize,
    pub(crate) initialized: bool,
    pub(crate) auto_enable: bool,
    pub(crate) process_in_place: bool,
    pub(crate) implicit: bool,
    pub(crate) summing: Buffer,
    pub(crate) scratch: BTreeMap<usize, Buffer>,
}

/// Read-only view of a node's connections, for typed handles that validate
/// against them.
pub struct NodeView<'a> {
    pub inputs: &'a BTreeMap<usize, NodeRef>,
    pub channels: usize,
    pub initialized: bool,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Node {
    pub(crate) fn create<N: AudioNode>(
        processor: N,
        format: Option<Format>,
        queue_size: usize,
    ) -> (NodeRef, Producer<N::Message>) {
        let role = processor.role();
        let preferred = processor.format();
        let declared = format.unwrap_or_else(|| preferred.clone()).normalized_for(role);
        let auto_enable = declared
            .auto_enable()
            .or(preferred.auto_enable())
            .unwrap_or(role != NodeRole::Generator);
        let name = processor.name().to_owned();

        let (producer, consumer) = RingBuffer::new(queue_size);
        let wrapper = NodeWrapper {
            node: processor,
            receiver: consumer,
        };

        let node = Arc::new(Node {
            id: NodeId::next(),
            name,
            role,
            enabled: AtomicBool::new(false),
            inner: Mutex::new(NodeInner {
                processor: Box::new(wrapper),
                inputs: BTreeMap::new(),
                output: None,
                context: Weak::new(),
                declared,
                sample_rate: None,
                channels: 0,
                initialized: false,
                auto_enable,
                process_in_place: true,
                implicit: false,
                summing: Buffer::default(),
                scratch: BTreeMap::new(),
            }),
        });
        (node, producer)
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeInner> {
        self.inner.lock()
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables processing. Idempotent.
    pub fn start(&self) {
        let mut inner = self.lock();
        self.start_locked(&mut inner);
    }

    /// Disables processing. Disabled generators output silence, disabled
    /// effects pass their input through.
    pub fn stop(&self) {
        let mut inner = self.lock();
        self.stop_locked(&mut inner);
    }

    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.start()
        } else {
            self.stop()
        }
    }

    pub(crate) fn start_locked(&self, inner: &mut NodeInner) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            inner.processor.on_start();
        }
    }

    pub(crate) fn stop_locked(&self, inner: &mut NodeInner) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            inner.processor.on_stop();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn is_auto_enabled(&self) -> bool {
        self.lock().auto_enable
    }

    pub fn set_auto_enabled(&self, auto_enable: bool) {
        self.lock().auto_enable = auto_enable;
    }

    /// Negotiated channel count, 0 until resolved.
    pub fn num_channels(&self) -> usize {
        self.lock().channels
    }

    /// Negotiated sample rate.
    pub fn sample_rate(&self) -> Option<u32> {
        self.lock().sample_rate
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.lock().declared.channel_mode()
    }

    /// The format the node was created with.
    pub fn format(&self) -> Format {
        self.lock().declared.clone()
    }

    /// Whether the node processes in its output buffer rather than a private
    /// summing buffer.
    pub fn is_process_in_place(&self) -> bool {
        self.lock().process_in_place
    }

    /// True for converters and adapters inserted by the context.
    pub fn is_implicit(&self) -> bool {
        self.lock().implicit
    }

    pub fn native_voice(&self) -> Option<NativeVoiceHandle> {
        self.lock().processor.native_voice()
    }

    pub fn is_native(&self) -> bool {
        self.native_voice().is_some()
    }

    pub fn is_voice_adapter(&self) -> bool {
        self.lock().processor.is_voice_adapter()
    }

    /// Connected inputs, ordered by bus.
    pub fn inputs(&self) -> Vec<(usize, NodeRef)> {
        self.lock()
            .inputs
            .iter()
            .map(|(bus, node)| (*bus, node.clone()))
            .collect()
    }

    pub fn input(&self, bus: usize) -> Option<NodeRef> {
        self.lock().inputs.get(&bus).cloned()
    }

    pub fn num_connected_inputs(&self) -> usize {
        self.lock().inputs.len()
    }

    pub fn output(&self) -> Option<NodeRef> {
        self.lock().output.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_connected_to_input(&self, node: &NodeRef) -> bool {
        self.lock().inputs.values().any(|n| Arc::ptr_eq(n, node))
    }

    pub fn is_connected_to_output(&self, node: &NodeRef) -> bool {
        self.output().is_some_and(|out| Arc::ptr_eq(&out, node))
    }

    pub(crate) fn context(&self) -> Option<Arc<ContextInner>> {
        self.lock().context.upgrade()
    }

    pub(crate) fn set_context(&self, context: &Arc<ContextInner>) {
        self.lock().context = Arc::downgrade(context);
    }

    fn input_capacity(&self) -> Option<usize> {
        self.lock().processor.input_capacity()
    }

    /// First free input bus within the node's capacity.
    ///
    /// Single-input nodes always report bus 0, so connecting to them replaces
    /// the current input.
    pub fn first_available_input_bus(&self) -> usize {
        let inner = self.lock();
        if inner.processor.input_capacity() == Some(1) {
            return 0;
        }
        (0..).find(|bus| !inner.inputs.contains_key(bus)).unwrap_or(0)
    }

    fn check_input_bus(&self, bus: usize) -> Result<(), GraphError> {
        match self.input_capacity() {
            Some(capacity) if bus >= capacity => Err(GraphError::InputCapacity {
                node: self.name.clone(),
                bus,
                capacity,
            }),
            _ => Ok(()),
        }
    }

    /// Whether `node` is reachable by following outputs from here.
    fn has_downstream(&self, node: &NodeRef) -> bool {
        let mut visited = HashSet::new();
        let mut current = self.output();
        while let Some(out) = current {
            if Arc::ptr_eq(&out, node) || !visited.insert(out.id) {
                return true;
            }
            current = out.output();
        }
        false
    }

    fn shared_context(&self, other: &Node) -> Result<Option<Arc<ContextInner>>, GraphError> {
        match (self.context(), other.context()) {
            (Some(a), Some(b)) if !Arc::ptr_eq(&a, &b) => Err(GraphError::ForeignContext {
                node: self.name.clone(),
            }),
            (a, b) => Ok(a.or(b)),
        }
    }

    /// Connects this node's output to the first free input of `dest`.
    ///
    /// Returns `dest` so connections can be chained:
    ///
    /// ```
    /// # use schall::{Handle, nodes::{Gain, Sine}};
    /// let sine = Handle::new(Sine::new(440.0));
    /// let gain = Handle::new(Gain::new(0.5));
    /// let last = Handle::new(Gain::new(1.0));
    /// sine.connect(&gain)?.connect(&last)?;
    /// assert!(last.is_connected_to_input(&gain));
    /// # Ok::<(), schall::GraphError>(())
    /// ```
    pub fn connect(self: &Arc<Self>, dest: &NodeRef) -> Result<NodeRef, GraphError> {
        let bus = dest.first_available_input_bus();
        self.connect_to_bus(dest, bus)
    }

    /// Connects this node to `dest` at `bus`, replacing whatever was there.
    pub fn connect_to_bus(self: &Arc<Self>, dest: &NodeRef, bus: usize) -> Result<NodeRef, GraphError> {
        if self.role == NodeRole::Target {
            return Err(GraphError::TargetHasNoOutputs {
                node: self.name.clone(),
            });
        }
        if dest.role == NodeRole::Generator {
            return Err(GraphError::GeneratorHasNoInputs {
                node: dest.name.clone(),
            });
        }
        if Arc::ptr_eq(self, dest) || dest.has_downstream(self) {
            return Err(GraphError::Cycle {
                from: self.name.clone(),
                to: dest.name.clone(),
            });
        }
        dest.check_input_bus(bus)?;

        let context = self.shared_context(dest)?;
        let mut graph = context.as_ref().map(|c| c.lock_graph());

        if dest.input(bus).is_some_and(|n| Arc::ptr_eq(&n, self)) {
            return Ok(dest.clone());
        }

        let previous = self.output().and_then(|old| Some((old.bus_of(self)?, old)));
        if let Some((_, old)) = &previous {
            old.remove_input(self);
        }
        let replaced = dest.lock().inputs.insert(bus, self.clone());
        if let Some(prev) = &replaced {
            prev.lock().output = None;
        }
        self.lock().output = Some(Arc::downgrade(dest));
        debug!(from = %self.name, to = %dest.name, bus, "connected");

        if let (Some(ctx), Some(graph)) = (&context, graph.as_mut()) {
            ctx.attach_subtree(dest);
            if let Some(prev) = &replaced {
                ctx.uninitialize_subtree(prev);
            }
            if let Err(err) = ctx.connections_did_change(graph) {
                warn!(from = %self.name, to = %dest.name, %err, "connection rejected");
                ctx.unsplice_input(dest, bus, self);
                if let Some(prev) = &replaced {
                    dest.link_input(bus, prev);
                }
                if let Some((old_bus, old)) = &previous {
                    old.link_input(*old_bus, self);
                }
                ctx.restore(graph);
                return Err(err);
            }
        }
        Ok(dest.clone())
    }

    /// Disconnects this node from its output. A no-op when unconnected.
    pub fn disconnect(self: &Arc<Self>) -> Result<(), GraphError> {
        let Some(output) = self.output() else {
            return Ok(());
        };
        let context = self.context();
        let mut graph = context.as_ref().map(|c| c.lock_graph());

        let bus = output.bus_of(self);
        output.remove_input(self);
        self.lock().output = None;
        debug!(from = %self.name, to = %output.name, "disconnected");

        if let (Some(ctx), Some(graph)) = (&context, graph.as_mut()) {
            ctx.uninitialize_subtree(self);
            if let Err(err) = ctx.connections_did_change(graph) {
                warn!(from = %self.name, to = %output.name, %err, "disconnect rejected");
                if let Some(bus) = bus {
                    output.link_input(bus, self);
                }
                ctx.restore(graph);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Removes the input at `bus`. A no-op when the bus is empty.
    pub fn disconnect_input(self: &Arc<Self>, bus: usize) -> Result<(), GraphError> {
        let context = self.context();
        let mut graph = context.as_ref().map(|c| c.lock_graph());

        let Some(input) = self.lock().inputs.remove(&bus) else {
            return Ok(());
        };
        input.lock().output = None;
        debug!(from = %input.name, to = %self.name, bus, "disconnected input");

        if let (Some(ctx), Some(graph)) = (&context, graph.as_mut()) {
            ctx.uninitialize_subtree(&input);
            if let Err(err) = ctx.connections_did_change(graph) {
                warn!(from = %input.name, to = %self.name, %err, "disconnect rejected");
                self.link_input(bus, &input);
                ctx.restore(graph);
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn disconnect_all_inputs(self: &Arc<Self>) -> Result<(), GraphError> {
        let busses: Vec<usize> = self.lock().inputs.keys().copied().collect();
        for bus in busses {
            self.disconnect_input(bus)?;
        }
        Ok(())
    }

    /// Bus at which `node` is connected.
    fn bus_of(&self, node: &NodeRef) -> Option<usize> {
        self.lock()
            .inputs
            .iter()
            .find(|(_, n)| Arc::ptr_eq(n, node))
            .map(|(bus, _)| *bus)
    }

    fn link_input(self: &Arc<Self>, bus: usize, input: &NodeRef) {
        input.lock().output = Some(Arc::downgrade(self));
        self.lock().inputs.insert(bus, input.clone());
    }

    fn remove_input(&self, node: &NodeRef) {
        self.lock().inputs.retain(|_, n| !Arc::ptr_eq(n, node));
    }

    /// Renders one block into `dest`, pulling inputs first.
    ///
    /// Called on the render thread with the context's graph lock held.
    pub(crate) fn pull(&self, dest: &mut Buffer, ctx: &ProcessContext) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.initialized {
            dest.zero();
            return;
        }
        let enabled = self.enabled.load(Ordering::Acquire);

        if inner.process_in_place && inner.inputs.len() <= 1 {
            match inner.inputs.values().next() {
                Some(input) => input.pull(dest, ctx),
                None => dest.zero(),
            }
            if enabled {
                inner.processor.process_erased(ctx, dest);
            }
        } else {
            inner.summing.zero();
            for (bus, input) in inner.inputs.iter() {
                if let Some(scratch) = inner.scratch.get_mut(bus) {
                    input.pull(scratch, ctx);
                    inner.processor.accumulate_input(*bus, scratch, &mut inner.summing);
                }
            }
            if enabled {
                inner.processor.process_erased(ctx, &mut inner.summing);
            }
            dest.copy_from(&inner.summing);
        }

        if enabled && inner.processor.reached_end() {
            self.stop_locked(inner);
        }
    }
}

/// Typed handle to a node.
///
/// Dereferences to the [`NodeRef`] for connecting, and carries the lock-free
/// message queue for parameter updates.
///
/// ```
/// # use schall::{Handle, nodes::{Sine, SineMessage}};
/// let mut sine = Handle::new(Sine::new(440.0));
///
/// // Applied at the start of the next processed block
/// sine.send(SineMessage::SetFrequency(880.0)).ok();
///
/// // Immediate, under the node's lock
/// sine.with(|s| s.set_amplitude(0.1));
/// ```
pub struct Handle<N: AudioNode> {
    node: NodeRef,
    sender: Producer<N::Message>,
    _marker: PhantomData<fn() -> N>,
}

impl<N: AudioNode> Handle<N> {
    /// Wraps `processor` in a detached node using its preferred format.
    pub fn new(processor: N) -> Self {
        Self::build(processor, None, DEFAULT_QUEUE_SIZE)
    }

    /// Wraps `processor` in a detached node with an explicit format.
    pub fn with_format(processor: N, format: Format) -> Self {
        Self::build(processor, Some(format), DEFAULT_QUEUE_SIZE)
    }

    pub(crate) fn build(processor: N, format: Option<Format>, queue_size: usize) -> Self {
        let (node, sender) = Node::create(processor, format, queue_size);
        Self {
            node,
            sender,
            _marker: PhantomData,
        }
    }

    /// Send a message to the node.
    ///
    /// Lock-free; returns the message if the queue is full.
    pub fn send(&mut self, msg: N::Message) -> Result<(), N::Message> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    #[inline]
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn into_node(self) -> NodeRef {
        self.node
    }

    /// Runs `f` on the processor under the node's lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut N) -> R) -> R {
        self.with_view(|node, _| f(node))
    }

    /// Like [`with`](Self::with), also exposing the node's connections.
    pub fn with_view<R>(&self, f: impl FnOnce(&mut N, NodeView<'_>) -> R) -> R {
        let mut guard = self.node.lock();
        let NodeInner {
            processor,
            inputs,
            channels,
            initialized,
            ..
        } = &mut *guard;
        let wrapper = processor
            .as_any_mut()
            .downcast_mut::<NodeWrapper<N>>()
            .expect("handle type matches its node");
        f(
            &mut wrapper.node,
            NodeView {
                inputs,
                channels: *channels,
                initialized: *initialized,
            },
        )
    }
}

impl<N: AudioNode> Deref for Handle<N> {
    type Target = NodeRef;

    fn deref(&self) -> &NodeRef {
        &self.node
    }
}

impl<N: AudioNode> fmt::Debug for Handle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.node).finish()
    }
}
