//! Biquad filters
//!
//! Coefficients follow the RBJ Audio EQ Cookbook. Parameter changes only mark
//! the coefficients dirty; they are recomputed at the top of the next block.

use core::f32::consts::PI;

use crate::buffer::Buffer;
use crate::error::GraphError;
use crate::node::{AudioNode, ProcessContext};

/// Q of a Butterworth response.
pub const DEFAULT_Q: f32 = core::f32::consts::FRAC_1_SQRT_2;

#[derive(Clone, Copy, Debug)]
pub enum FilterMessage {
    /// Cutoff or center frequency in Hz
    SetFrequency(f32),
    SetQ(f32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Response {
    LowPass,
    HighPass,
    BandPass,
}

#[derive(Clone, Copy, Debug, Default)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    fn compute(response: Response, frequency: f32, q: f32, sample_rate: f32) -> Self {
        // keep the cutoff below Nyquist
        let frequency = frequency.clamp(1.0, sample_rate * 0.499);
        let omega = 2.0 * PI * frequency / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q.max(0.01));

        let (b0, b1, b2) = match response {
            Response::LowPass => ((1.0 - cos_omega) / 2.0, 1.0 - cos_omega, (1.0 - cos_omega) / 2.0),
            Response::HighPass => ((1.0 + cos_omega) / 2.0, -(1.0 + cos_omega), (1.0 + cos_omega) / 2.0),
            Response::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Direct Form I delay line for one channel.
#[derive(Clone, Copy, Debug, Default)]
struct State {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl State {
    #[inline]
    fn process(&mut self, c: &Coefficients, input: f32) -> f32 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Shared implementation of the three responses.
struct Biquad {
    response: Response,
    frequency: f32,
    q: f32,
    coefficients: Coefficients,
    states: Vec<State>,
    sample_rate: f32,
    dirty: bool,
}

impl Biquad {
    fn new(response: Response, frequency: f32) -> Self {
        Self {
            response,
            frequency,
            q: DEFAULT_Q,
            coefficients: Coefficients::default(),
            states: Vec::new(),
            sample_rate: 0.0,
            dirty: true,
        }
    }

    fn apply(&mut self, msg: FilterMessage) {
        match msg {
            FilterMessage::SetFrequency(f) => self.frequency = f,
            FilterMessage::SetQ(q) => self.q = q,
        }
        self.dirty = true;
    }

    fn process(&mut self, messages: impl Iterator<Item = FilterMessage>, buffer: &mut Buffer) {
        for msg in messages {
            self.apply(msg);
        }
        if self.dirty {
            self.coefficients = Coefficients::compute(self.response, self.frequency, self.q, self.sample_rate);
            self.dirty = false;
        }
        let c = self.coefficients;
        for (state, channel) in self.states.iter_mut().zip(buffer.channels_mut()) {
            for sample in channel.iter_mut() {
                *sample = state.process(&c, *sample);
            }
        }
    }

    fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
        if ctx.sample_rate == 0 {
            return Err(GraphError::invalid("sample_rate", "filters need a nonzero sample rate"));
        }
        self.sample_rate = ctx.sample_rate as f32;
        self.states = vec![State::default(); channels];
        self.dirty = true;
        Ok(())
    }
}

macro_rules! biquad_node {
    ($(#[$doc:meta])* $name:ident, $response:expr) => {
        $(#[$doc])*
        pub struct $name {
            biquad: Biquad,
        }

        impl $name {
            pub fn new(frequency: f32) -> Self {
                Self {
                    biquad: Biquad::new($response, frequency),
                }
            }

            pub fn with_q(mut self, q: f32) -> Self {
                self.set_q(q);
                self
            }

            #[inline]
            pub fn frequency(&self) -> f32 {
                self.biquad.frequency
            }

            #[inline]
            pub fn q(&self) -> f32 {
                self.biquad.q
            }

            pub fn set_frequency(&mut self, frequency: f32) {
                self.biquad.apply(FilterMessage::SetFrequency(frequency));
            }

            pub fn set_q(&mut self, q: f32) {
                self.biquad.apply(FilterMessage::SetQ(q));
            }
        }

        impl AudioNode for $name {
            type Message = FilterMessage;

            fn process(
                &mut self,
                _ctx: &ProcessContext,
                messages: impl Iterator<Item = FilterMessage>,
                buffer: &mut Buffer,
            ) {
                self.biquad.process(messages, buffer);
            }

            fn initialize(&mut self, ctx: &ProcessContext, channels: usize) -> Result<(), GraphError> {
                self.biquad.initialize(ctx, channels)
            }
        }
    };
}

biquad_node!(
    /// 12 dB/octave low-pass filter.
    LowPass,
    Response::LowPass
);
biquad_node!(
    /// 12 dB/octave high-pass filter.
    HighPass,
    Response::HighPass
);
biquad_node!(
    /// Band-pass filter with 0 dB peak gain; bandwidth is frequency / Q.
    BandPass,
    Response::BandPass
);

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProcessContext {
        ProcessContext {
            sample_rate: 48000,
            frames_per_block: 2048,
            frame: 0,
        }
    }

    fn run(node: &mut impl AudioNode<Message = FilterMessage>, frequency: f32) -> f32 {
        let mut buffer = Buffer::new(2048, 1);
        for (i, s) in buffer.channel_mut(0).iter_mut().enumerate() {
            *s = (i as f32 * frequency / 48000.0 * core::f32::consts::TAU).sin();
        }
        node.process(&ctx(), core::iter::empty(), &mut buffer);
        // skip the transient
        buffer.channel(0)[1024..].iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn low_pass_keeps_lows_and_cuts_highs() {
        let mut lp = LowPass::new(1000.0);
        lp.initialize(&ctx(), 1).unwrap();
        assert!(run(&mut lp, 100.0) > 0.9);
        let mut lp = LowPass::new(1000.0);
        lp.initialize(&ctx(), 1).unwrap();
        assert!(run(&mut lp, 10000.0) < 0.05);
    }

    #[test]
    fn high_pass_cuts_lows() {
        let mut hp = HighPass::new(5000.0);
        hp.initialize(&ctx(), 1).unwrap();
        assert!(run(&mut hp, 100.0) < 0.05);
    }

    #[test]
    fn band_pass_peaks_at_center() {
        let mut bp = BandPass::new(1000.0).with_q(2.0);
        bp.initialize(&ctx(), 1).unwrap();
        assert!(run(&mut bp, 1000.0) > 0.9);
    }

    #[test]
    fn parameter_changes_mark_dirty() {
        let mut lp = LowPass::new(1000.0);
        lp.initialize(&ctx(), 1).unwrap();
        let mut buffer = Buffer::new(4, 1);
        lp.process(&ctx(), core::iter::empty(), &mut buffer);
        assert!(!lp.biquad.dirty);
        lp.set_frequency(2000.0);
        assert!(lp.biquad.dirty);
        assert_eq!(lp.frequency(), 2000.0);
    }
}
