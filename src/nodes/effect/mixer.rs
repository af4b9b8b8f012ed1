//! Mixer - sums numbered busses with per-bus volume and pan

use crate::buffer::Buffer;
use crate::error::GraphError;
use crate::format::{ChannelMode, Format};
use crate::node::{AudioNode, Handle, NodeRole, NodeView, ProcessContext};

/// Busses a mixer accepts unless configured otherwise.
pub const DEFAULT_MAX_BUSSES: usize = 10;

/// A validated mixer update.
///
/// Built by the `send_bus_*` methods on `Handle<Mixer>`, which check the bus
/// and the value before queueing. Applied after the block it arrives in has
/// been summed, so it takes effect on the next one.
#[derive(Clone, Copy, Debug)]
pub struct MixerMessage(BusUpdate);

#[derive(Clone, Copy, Debug)]
enum BusUpdate {
    Volume(usize, f32),
    Pan(usize, f32),
    Enabled(usize, bool),
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bus {
    volume: f32,
    pan: f32,
    enabled: bool,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            enabled: true,
        }
    }
}

impl Bus {
    /// Linear balance: the far side fades out, the near side stays at unity.
    #[inline]
    fn gain(&self, channel: usize, channels: usize) -> f32 {
        if channels != 2 {
            return self.volume;
        }
        let balance = match channel {
            0 => (1.0 - self.pan).min(1.0),
            _ => (1.0 + self.pan).min(1.0),
        };
        self.volume * balance
    }
}

/// Sums its inputs, each on its own bus.
///
/// Inputs of any channel count are mapped to the mixer's channels as they are
/// summed. By default the mixer takes its channel count from the output chain.
///
/// ```
/// use schall::{Context, OfflineDevice, nodes::{LineOut, Mixer, Sine}};
///
/// let device = OfflineDevice::new("offline", 44100, 2, 128);
/// let ctx = Context::new().with_target(LineOut::new(device)?);
/// let mixer = ctx.make_node(Mixer::new());
/// ctx.make_node(Sine::new(220.0)).connect_to_bus(&mixer, 0)?;
/// ctx.make_node(Sine::new(330.0)).connect_to_bus(&mixer, 1)?;
/// mixer.connect(&ctx.target()?)?;
///
/// mixer.set_bus_volume(1, 0.5)?;
/// mixer.set_bus_pan(1, -1.0)?;
/// assert!(mixer.set_bus_volume(2, 0.5).is_err()); // unoccupied
/// # Ok::<(), schall::GraphError>(())
/// ```
pub struct Mixer {
    busses: Vec<Bus>,
    channels: Option<usize>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            busses: vec![Bus::default(); DEFAULT_MAX_BUSSES],
            channels: None,
        }
    }

    /// A mixer with a fixed output channel count.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_max_num_busses(mut self, max: usize) -> Self {
        self.busses.resize(max, Bus::default());
        self
    }

    #[inline]
    pub fn max_num_busses(&self) -> usize {
        self.busses.len()
    }

    // values were checked when queued; a bus can only have gone missing
    // through a shrunk limit, which leaves nothing to update
    fn apply(&mut self, update: BusUpdate) {
        match update {
            BusUpdate::Volume(bus, v) => {
                if let Some(b) = self.busses.get_mut(bus) {
                    b.volume = v;
                }
            }
            BusUpdate::Pan(bus, p) => {
                if let Some(b) = self.busses.get_mut(bus) {
                    b.pan = p;
                }
            }
            BusUpdate::Enabled(bus, e) => {
                if let Some(b) = self.busses.get_mut(bus) {
                    b.enabled = e;
                }
            }
        }
    }

    fn bus(&mut self, view: &NodeView<'_>, bus: usize) -> Result<&mut Bus, GraphError> {
        let max = self.busses.len();
        if bus >= max {
            return Err(GraphError::BusOutOfRange { bus, max });
        }
        if !view.inputs.contains_key(&bus) {
            return Err(GraphError::BusUnoccupied { bus });
        }
        Ok(&mut self.busses[bus])
    }

    /// Fails on mixers with more than two channels, negotiated or fixed.
    fn check_pan(&self, view: &NodeView<'_>, pan: f32) -> Result<(), GraphError> {
        if !(-1.0..=1.0).contains(&pan) {
            return Err(GraphError::invalid("pan", format!("{pan} is outside [-1, 1]")));
        }
        let channels = if view.initialized {
            view.channels
        } else {
            self.channels.unwrap_or(0)
        };
        if channels > 2 {
            return Err(GraphError::UnsupportedPan { channels });
        }
        Ok(())
    }

    fn set_max(&mut self, view: &NodeView<'_>, max: usize) -> Result<(), GraphError> {
        let active = view.inputs.len();
        if max < active {
            return Err(GraphError::BusLimit {
                requested: max,
                reason: format!("{active} busses are active"),
            });
        }
        if let Some(bus) = view.inputs.keys().find(|b| **b >= max) {
            return Err(GraphError::BusLimit {
                requested: max,
                reason: format!("bus {bus} is occupied"),
            });
        }
        self.busses.resize(max, Bus::default());
        Ok(())
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for Mixer {
    type Message = MixerMessage;

    fn process(&mut self, _ctx: &ProcessContext, messages: impl Iterator<Item = MixerMessage>, _buffer: &mut Buffer) {
        // summing already happened in accumulate_input
        for msg in messages {
            self.apply(msg.0);
        }
    }

    fn role(&self) -> NodeRole {
        NodeRole::Mixer
    }

    fn format(&self) -> Format {
        let format = match self.channels {
            Some(channels) => Format::new().with_channels(channels),
            None => Format::new().with_channel_mode(ChannelMode::MatchesOutput),
        };
        format.with_wants_default_format_from_output(true)
    }

    fn input_capacity(&self) -> Option<usize> {
        Some(self.busses.len())
    }

    fn initialize(&mut self, _ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        // pan set before the channel count was known
        if channels > 2 && self.busses.iter().any(|b| b.pan != 0.0) {
            return Err(GraphError::UnsupportedPan { channels });
        }
        Ok(())
    }

    fn accumulate_input(&mut self, bus: usize, input: &Buffer, sum: &mut Buffer) {
        let Some(settings) = self.busses.get(bus).copied() else {
            return;
        };
        if !settings.enabled {
            return;
        }
        let channels = sum.num_channels();
        sum.mix_scaled_from(input, |ch| settings.gain(ch, channels));
    }

    fn maps_input_channels(&self) -> bool {
        true
    }

    fn can_process_in_place(&self) -> bool {
        false
    }
}

impl Handle<Mixer> {
    pub fn max_num_busses(&self) -> usize {
        self.with(|m| m.max_num_busses())
    }

    /// Number of occupied busses.
    pub fn num_active_busses(&self) -> usize {
        self.with_view(|_, view| view.inputs.len())
    }

    /// Changes how many busses the mixer accepts.
    ///
    /// Fails if fewer than the active busses, or if a bus at or above `max`
    /// is occupied.
    pub fn set_max_num_busses(&self, max: usize) -> Result<(), GraphError> {
        self.with_view(|m, view| m.set_max(&view, max))
    }

    pub fn set_bus_volume(&self, bus: usize, volume: f32) -> Result<(), GraphError> {
        check_volume(volume)?;
        self.with_view(|m, view| {
            m.bus(&view, bus)?.volume = volume;
            Ok(())
        })
    }

    pub fn bus_volume(&self, bus: usize) -> Result<f32, GraphError> {
        self.with_view(|m, view| Ok(m.bus(&view, bus)?.volume))
    }

    /// Sets the balance of a bus, -1 (left) to 1 (right).
    ///
    /// Has no audible effect on a mono mixer; fails on more than two channels.
    /// A mixer that has not negotiated its channels yet checks again on
    /// initialize.
    pub fn set_bus_pan(&self, bus: usize, pan: f32) -> Result<(), GraphError> {
        self.with_view(|m, view| {
            m.check_pan(&view, pan)?;
            m.bus(&view, bus)?.pan = pan;
            Ok(())
        })
    }

    pub fn bus_pan(&self, bus: usize) -> Result<f32, GraphError> {
        self.with_view(|m, view| Ok(m.bus(&view, bus)?.pan))
    }

    pub fn set_bus_enabled(&self, bus: usize, enabled: bool) -> Result<(), GraphError> {
        self.with_view(|m, view| {
            m.bus(&view, bus)?.enabled = enabled;
            Ok(())
        })
    }

    pub fn is_bus_enabled(&self, bus: usize) -> Result<bool, GraphError> {
        self.with_view(|m, view| Ok(m.bus(&view, bus)?.enabled))
    }

    /// Queues a volume change for the next block, validated like
    /// [`set_bus_volume`](Self::set_bus_volume).
    pub fn send_bus_volume(&mut self, bus: usize, volume: f32) -> Result<(), GraphError> {
        check_volume(volume)?;
        self.with_view(|m, view| m.bus(&view, bus).map(|_| ()))?;
        self.queue(BusUpdate::Volume(bus, volume))
    }

    /// Queues a pan change for the next block, validated like
    /// [`set_bus_pan`](Self::set_bus_pan).
    pub fn send_bus_pan(&mut self, bus: usize, pan: f32) -> Result<(), GraphError> {
        self.with_view(|m, view| {
            m.check_pan(&view, pan)?;
            m.bus(&view, bus).map(|_| ())
        })?;
        self.queue(BusUpdate::Pan(bus, pan))
    }

    pub fn send_bus_enabled(&mut self, bus: usize, enabled: bool) -> Result<(), GraphError> {
        self.with_view(|m, view| m.bus(&view, bus).map(|_| ()))?;
        self.queue(BusUpdate::Enabled(bus, enabled))
    }

    fn queue(&mut self, update: BusUpdate) -> Result<(), GraphError> {
        self.send(MixerMessage(update)).map_err(|_| GraphError::QueueFull {
            node: self.name().to_owned(),
        })
    }
}

fn check_volume(volume: f32) -> Result<(), GraphError> {
    if !volume.is_finite() || volume < 0.0 {
        return Err(GraphError::invalid("volume", format!("{volume} is not a finite, positive gain")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_pan_is_unity() {
        let bus = Bus::default();
        assert_eq!(bus.gain(0, 2), 1.0);
        assert_eq!(bus.gain(1, 2), 1.0);
    }

    #[test]
    fn hard_pan_silences_the_far_side() {
        let bus = Bus {
            pan: -1.0,
            ..Bus::default()
        };
        assert_eq!(bus.gain(0, 2), 1.0);
        assert_eq!(bus.gain(1, 2), 0.0);
        // mono ignores pan
        assert_eq!(bus.gain(0, 1), 1.0);
    }

    #[test]
    fn disabled_busses_are_skipped() {
        let mut mixer = Mixer::new();
        mixer.apply(BusUpdate::Enabled(1, false));
        mixer.apply(BusUpdate::Volume(0, 0.5));

        let input = Buffer::from_channels(&[vec![1.0; 4]]);
        let mut sum = Buffer::new(4, 2);
        mixer.accumulate_input(0, &input, &mut sum);
        mixer.accumulate_input(1, &input, &mut sum);
        assert_eq!(sum.channel(0), &[0.5; 4]);
        assert_eq!(sum.channel(1), &[0.5; 4]);
    }

    #[test]
    fn updates_past_a_shrunk_limit_are_dropped() {
        let mut mixer = Mixer::new().with_max_num_busses(2);
        mixer.apply(BusUpdate::Volume(5, 0.0));
        assert_eq!(mixer.max_num_busses(), 2);
    }

    #[test]
    fn pan_is_checked_once_channels_are_known() {
        let ctx = ProcessContext {
            sample_rate: 48000,
            frames_per_block: 64,
            frame: 0,
        };
        let mut mixer = Mixer::new();
        assert!(mixer.initialize(&ctx, 4).is_ok());

        mixer.apply(BusUpdate::Pan(0, 0.5));
        assert!(mixer.initialize(&ctx, 2).is_ok());
        assert!(matches!(mixer.initialize(&ctx, 4), Err(GraphError::UnsupportedPan { channels: 4 })));
    }
}
