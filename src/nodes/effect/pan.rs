//! Stereo panner

use core::f32::consts::FRAC_PI_2;

use crate::buffer::Buffer;
use crate::format::Format;
use crate::node::{AudioNode, ProcessContext};

#[derive(Clone, Copy, Debug)]
pub enum PanMessage {
    /// Position from 0 (left) to 1 (right)
    SetPos(f32),
}

/// Equal-power stereo panner.
///
/// Always outputs two channels; a mono input is spread to both first. A
/// centered panner attenuates each side by 3 dB.
pub struct Pan2d {
    pos: f32,
}

impl Pan2d {
    pub fn new() -> Self {
        Self { pos: 0.5 }
    }

    pub fn with_pos(mut self, pos: f32) -> Self {
        self.set_pos(pos);
        self
    }

    #[inline]
    pub fn pos(&self) -> f32 {
        self.pos
    }

    pub fn set_pos(&mut self, pos: f32) {
        self.pos = pos.clamp(0.0, 1.0);
    }

    fn gains(&self) -> (f32, f32) {
        let angle = self.pos * FRAC_PI_2;
        (angle.cos(), angle.sin())
    }
}

impl Default for Pan2d {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for Pan2d {
    type Message = PanMessage;

    fn process(&mut self, _ctx: &ProcessContext, messages: impl Iterator<Item = PanMessage>, buffer: &mut Buffer) {
        for msg in messages {
            match msg {
                PanMessage::SetPos(pos) => self.set_pos(pos),
            }
        }
        if buffer.num_channels() < 2 {
            return;
        }
        let (left, right) = self.gains();
        buffer.channel_mut(0).iter_mut().for_each(|s| *s *= left);
        buffer.channel_mut(1).iter_mut().for_each(|s| *s *= right);
    }

    fn format(&self) -> Format {
        Format::new().with_channels(2)
    }

    fn maps_input_channels(&self) -> bool {
        true
    }
}
