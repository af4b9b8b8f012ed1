//! Periodic oscillators

use crate::buffer::Buffer;
use crate::format::Format;
use crate::node::{AudioNode, NodeRole, ProcessContext};

/// Messages to control an oscillator
#[derive(Clone, Copy, Debug)]
pub enum OscillatorMessage {
    SetFrequency(f32),
    SetAmplitude(f32),
}

pub type SineMessage = OscillatorMessage;

/// Phase accumulator shared by the oscillators.
///
/// Phase lives in `[0, 1)` and is kept across stop/start, so a restarted
/// oscillator continues its waveform.
#[derive(Clone, Copy, Debug)]
struct Phase {
    frequency: f32,
    amplitude: f32,
    phase: f32,
}

impl Phase {
    fn new(frequency: f32) -> Self {
        Self {
            frequency: frequency.max(0.0),
            amplitude: 0.25, // -12dB, safe default
            phase: 0.0,
        }
    }

    fn apply(&mut self, msg: OscillatorMessage) {
        match msg {
            OscillatorMessage::SetFrequency(f) => self.frequency = f.max(0.0),
            OscillatorMessage::SetAmplitude(a) => self.amplitude = a.clamp(0.0, 1.0),
        }
    }

    /// Writes one waveform period's worth of `shape` into channel 0 and
    /// copies it to the others.
    #[inline]
    fn render(&mut self, ctx: &ProcessContext, buffer: &mut Buffer, shape: impl Fn(f32) -> f32) {
        if buffer.num_channels() == 0 {
            return;
        }
        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let amplitude = self.amplitude;
        for sample in buffer.channel_mut(0) {
            *sample = shape(self.phase) * amplitude;
            // increments above one period still land in [0, 1)
            self.phase = (self.phase + phase_inc).fract();
        }
        buffer.duplicate_first_channel();
    }
}

macro_rules! oscillator_common {
    () => {
        pub fn with_amplitude(mut self, amplitude: f32) -> Self {
            self.osc.amplitude = amplitude.clamp(0.0, 1.0);
            self
        }

        #[inline]
        pub fn frequency(&self) -> f32 {
            self.osc.frequency
        }

        #[inline]
        pub fn amplitude(&self) -> f32 {
            self.osc.amplitude
        }

        pub fn set_frequency(&mut self, frequency: f32) {
            self.osc.apply(OscillatorMessage::SetFrequency(frequency));
        }

        pub fn set_amplitude(&mut self, amplitude: f32) {
            self.osc.apply(OscillatorMessage::SetAmplitude(amplitude));
        }

        /// Current phase in `[0, 1)`.
        #[inline]
        pub fn phase(&self) -> f32 {
            self.osc.phase
        }
    };
}

macro_rules! oscillator_node {
    ($name:ident, $shape:expr) => {
        impl AudioNode for $name {
            type Message = OscillatorMessage;

            fn process(
                &mut self,
                ctx: &ProcessContext,
                messages: impl Iterator<Item = OscillatorMessage>,
                buffer: &mut Buffer,
            ) {
                for msg in messages {
                    self.osc.apply(msg);
                }
                let shape = $shape(self);
                self.osc.render(ctx, buffer, shape);
            }

            fn role(&self) -> NodeRole {
                NodeRole::Generator
            }

            fn format(&self) -> Format {
                Format::new().with_auto_enable(true)
            }
        }
    };
}

/// A sine wave oscillator.
pub struct Sine {
    osc: Phase,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        Self {
            osc: Phase::new(frequency),
        }
    }

    oscillator_common!();
}

oscillator_node!(Sine, |_: &Sine| |phase: f32| (phase * core::f32::consts::TAU).sin());

/// A rising ramp from 0 to 1 per period.
pub struct Phasor {
    osc: Phase,
}

impl Phasor {
    pub fn new(frequency: f32) -> Self {
        Self {
            osc: Phase::new(frequency),
        }
    }

    oscillator_common!();
}

oscillator_node!(Phasor, |_: &Phasor| |phase: f32| phase);

/// A triangle wave with an adjustable rising slope.
///
/// `up_slope` is the fraction of the period spent rising; 0.5 is symmetric,
/// values near 0 or 1 approach a saw.
pub struct Triangle {
    osc: Phase,
    up_slope: f32,
}

impl Triangle {
    pub fn new(frequency: f32) -> Self {
        Self {
            osc: Phase::new(frequency),
            up_slope: 0.5,
        }
    }

    pub fn with_up_slope(mut self, up_slope: f32) -> Self {
        self.set_up_slope(up_slope);
        self
    }

    pub fn set_up_slope(&mut self, up_slope: f32) {
        self.up_slope = up_slope.clamp(0.001, 0.999);
    }

    #[inline]
    pub fn up_slope(&self) -> f32 {
        self.up_slope
    }

    oscillator_common!();
}

oscillator_node!(Triangle, |t: &Triangle| {
    let up = t.up_slope;
    move |phase: f32| {
        if phase < up {
            -1.0 + 2.0 * phase / up
        } else {
            1.0 - 2.0 * (phase - up) / (1.0 - up)
        }
    }
});

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(sample_rate: u32) -> ProcessContext {
        ProcessContext {
            sample_rate,
            frames_per_block: 8,
            frame: 0,
        }
    }

    #[test]
    fn sine_fills_every_channel() {
        let mut sine = Sine::new(1000.0).with_amplitude(0.5);
        let mut buffer = Buffer::new(8, 2);
        sine.process(&ctx(8000), core::iter::empty(), &mut buffer);

        assert_eq!(buffer.channel(0), buffer.channel(1));
        assert_eq!(buffer.channel(0)[0], 0.0);
        assert!((buffer.channel(0)[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn messages_apply_before_rendering() {
        let mut sine = Sine::new(440.0);
        let mut buffer = Buffer::new(8, 1);
        sine.process(
            &ctx(8000),
            [OscillatorMessage::SetAmplitude(0.0)].into_iter(),
            &mut buffer,
        );
        assert_eq!(buffer.peak(), 0.0);
        assert_eq!(sine.amplitude(), 0.0);
    }

    #[test]
    fn phasor_ramps_and_wraps() {
        let mut phasor = Phasor::new(2000.0).with_amplitude(1.0);
        let mut buffer = Buffer::new(8, 1);
        phasor.process(&ctx(8000), core::iter::empty(), &mut buffer);
        assert_eq!(buffer.channel(0), &[0.0, 0.25, 0.5, 0.75, 0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn triangle_hits_its_extremes() {
        let mut tri = Triangle::new(1000.0).with_amplitude(1.0);
        let mut buffer = Buffer::new(8, 1);
        tri.process(&ctx(8000), core::iter::empty(), &mut buffer);
        let ch = buffer.channel(0);
        assert_eq!(ch[0], -1.0);
        assert!((ch[4] - 1.0).abs() < 1e-6);
        assert!(ch.iter().all(|s| s.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn phase_stays_in_range_above_the_sample_rate() {
        let mut phasor = Phasor::new(8000.0 * 2.5).with_amplitude(1.0);
        let mut buffer = Buffer::new(8, 1);
        for _ in 0..4 {
            phasor.process(&ctx(8000), core::iter::empty(), &mut buffer);
        }
        assert!((0.0..1.0).contains(&phasor.phase()));
        assert!(buffer.channel(0).iter().all(|s| (0.0..1.0).contains(s)));
        assert!((buffer.channel(0)[1] - 0.5).abs() < 1e-3);
    }
}
