//! Example: Creating a custom audio node
//!
//! This demonstrates how to implement the `AudioNode` trait to create
//! your own audio processing nodes with message-based parameter control.
//!
//! Run with: cargo run --example custom_node
//!
//! Renders offline and prints a coarse view of the waveform.

use schall::nodes::{Gain, LineOut};
use schall::{AudioNode, Buffer, Context, Format, NodeRole, OfflineDevice, ProcessContext};

// =============================================================================
// Step 1: Define your message type for runtime parameter control
// =============================================================================

/// Messages to control our square wave oscillator
#[derive(Clone, Copy, Debug)]
pub enum SquareMessage {
    /// Set the frequency in Hz
    SetFrequency(f32),
    /// Set the pulse width (0.0 to 1.0, where 0.5 is a standard square wave)
    SetPulseWidth(f32),
}

// =============================================================================
// Step 2: Define your node struct with internal state
// =============================================================================

/// A square wave oscillator with variable pulse width
pub struct Square {
    frequency: f32,
    pulse_width: f32,
    amplitude: f32,
    phase: f32,
}

impl Square {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            pulse_width: 0.5,
            amplitude: 0.25, // -12dB, safe default
            phase: 0.0,
        }
    }

    pub fn with_pulse_width(mut self, pw: f32) -> Self {
        self.pulse_width = pw.clamp(0.0, 1.0);
        self
    }
}

// =============================================================================
// Step 3: Implement AudioNode
// =============================================================================

impl AudioNode for Square {
    type Message = SquareMessage;

    fn process(&mut self, ctx: &ProcessContext, messages: impl Iterator<Item = SquareMessage>, buffer: &mut Buffer) {
        // 1. Handle pending messages before rendering
        for msg in messages {
            match msg {
                SquareMessage::SetFrequency(f) => self.frequency = f.max(0.0),
                SquareMessage::SetPulseWidth(pw) => self.pulse_width = pw.clamp(0.0, 1.0),
            }
        }

        // 2. Render channel 0, then copy it to the rest
        let phase_inc = self.frequency / ctx.sample_rate as f32;
        for sample in buffer.channel_mut(0) {
            *sample = if self.phase < self.pulse_width {
                self.amplitude
            } else {
                -self.amplitude
            };
            self.phase = (self.phase + phase_inc).fract();
        }
        buffer.duplicate_first_channel();
    }

    // No inputs; the graph refuses connections into it
    fn role(&self) -> NodeRole {
        NodeRole::Generator
    }

    // Mono, enabled as soon as the graph initializes it
    fn format(&self) -> Format {
        Format::new().with_channels(1).with_auto_enable(true)
    }
}

// =============================================================================
// Main: Use the custom node just like built-in nodes
// =============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let device = OfflineDevice::new("offline", 8000, 2, 80);
    let ctx = Context::new().with_target(LineOut::new(device.clone())?);

    let mut square = ctx.make_node(Square::new(100.0).with_pulse_width(0.25));
    square
        .connect(&ctx.make_node(Gain::new(2.0)))?
        .connect(&ctx.target()?)?;
    ctx.start()?;
    println!("{}", ctx.print_graph());

    let mut block = Buffer::new(80, 2);
    for step in 0..4 {
        if step == 2 {
            let _ = square.send(SquareMessage::SetPulseWidth(0.75));
        }
        device.render(&mut block);
        let line: String = block
            .channel(0)
            .iter()
            .map(|s| if *s > 0.0 { '#' } else { '.' })
            .collect();
        println!("{line}");
    }

    // Synchronous access under the node's lock
    square.with(|s| s.frequency = 200.0);
    let _ = square.send(SquareMessage::SetFrequency(400.0));
    device.render(&mut block);
    println!("frames rendered: {}", ctx.num_processed_frames());
    Ok(())
}
