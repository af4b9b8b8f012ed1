//! Gain/volume control effect

use crate::buffer::Buffer;
use crate::node::{AudioNode, ProcessContext};

/// Messages to control gain
#[derive(Clone, Copy, Debug)]
pub enum GainMessage {
    /// Set the gain multiplier (1.0 = unity, 0.0 = silence), clamped to the range
    SetGain(f32),
}

/// Scales its input by a smoothed, clamped gain.
///
/// Processes any channel count in place.
pub struct Gain {
    gain: f32,
    min: f32,
    max: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
    smoothing_ms: Option<f32>,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            min: 0.0,
            max: f32::MAX,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~4ms at 48kHz
            smoothing_ms: None,
        }
    }

    /// Limits the gain to `[min, max]`.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max.max(min);
        self.set_gain(self.gain);
        self.smoothed_gain = self.gain;
        self
    }

    /// Time for the gain to cover ~63% of a change. Applied once the sample
    /// rate is known.
    pub fn with_smoothing_ms(mut self, ms: f32) -> Self {
        self.smoothing_ms = Some(ms.max(0.0));
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self.smoothing_ms = None;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(self.min, self.max);
    }

    #[inline]
    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }
}

impl AudioNode for Gain {
    type Message = GainMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = GainMessage>,
        buffer: &mut Buffer,
    ) {
        for msg in messages {
            match msg {
                GainMessage::SetGain(g) => self.set_gain(g),
            }
        }

        let target = self.gain;
        let coeff = self.smooth_coeff;
        let start = self.smoothed_gain;
        if start == target {
            if target != 1.0 {
                buffer.scale(target);
            }
            return;
        }

        // every channel follows the same ramp
        let mut end = start;
        for channel in buffer.channels_mut() {
            let mut gain = start;
            for sample in channel.iter_mut() {
                gain = target + coeff * (gain - target);
                *sample *= gain;
            }
            end = gain;
        }
        // snap once inaudibly close
        self.smoothed_gain = if (end - target).abs() < 1e-5 { target } else { end };
    }

    fn initialize(&mut self, ctx: &ProcessContext, _channels: usize) -> Result<(), crate::GraphError> {
        if let Some(ms) = self.smoothing_ms {
            let samples = (ms / 1000.0) * ctx.sample_rate as f32;
            self.smooth_coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProcessContext {
        ProcessContext {
            sample_rate: 48000,
            frames_per_block: 4,
            frame: 0,
        }
    }

    #[test]
    fn steady_gain_scales_every_channel() {
        let mut gain = Gain::new(0.5);
        let mut buffer = Buffer::from_channels(&[vec![1.0; 4], vec![-1.0; 4]]);
        gain.process(&ctx(), core::iter::empty(), &mut buffer);
        assert_eq!(buffer.channel(0), &[0.5; 4]);
        assert_eq!(buffer.channel(1), &[-0.5; 4]);
    }

    #[test]
    fn changes_are_smoothed() {
        let mut gain = Gain::new(1.0);
        let mut buffer = Buffer::from_channels(&[vec![1.0; 4]]);
        gain.process(&ctx(), [GainMessage::SetGain(0.0)].into_iter(), &mut buffer);
        let ch = buffer.channel(0);
        assert!(ch[0] < 1.0 && ch[0] > 0.9);
        assert!(ch.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn unsmoothed_changes_are_instant() {
        let mut gain = Gain::new(1.0).without_smoothing();
        let mut buffer = Buffer::from_channels(&[vec![1.0; 4]]);
        gain.process(&ctx(), [GainMessage::SetGain(0.25)].into_iter(), &mut buffer);
        assert_eq!(buffer.channel(0), &[0.25; 4]);
    }

    #[test]
    fn gain_is_clamped_to_range() {
        let mut gain = Gain::new(3.0).with_range(0.0, 2.0);
        assert_eq!(gain.gain(), 2.0);
        gain.set_gain(-1.0);
        assert_eq!(gain.gain(), 0.0);
    }
}
