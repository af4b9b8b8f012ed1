//! Example: mix three oscillators offline and print the graph
//!
//! Run with: RUST_LOG=debug cargo run --example mixer
//!
//! Renders one second through an `OfflineDevice` (no audio hardware needed),
//! moving bus volumes and pans while it plays, and reports the levels.

use schall::nodes::{LineOut, LowPass, Mixer, Phasor, Sine, Tap, Triangle};
use schall::{Buffer, Context, OfflineDevice};

const SAMPLE_RATE: u32 = 48000;
const BLOCK: usize = 480;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let device = OfflineDevice::new("offline", SAMPLE_RATE, 2, BLOCK);
    let ctx = Context::new().with_target(LineOut::new(device.clone())?);

    let mixer = ctx.make_node(Mixer::new().with_max_num_busses(4));
    ctx.make_node(Sine::new(220.0)).connect_to_bus(&mixer, 0)?;
    ctx.make_node(Triangle::new(330.0).with_up_slope(0.3))
        .connect_to_bus(&mixer, 1)?;
    ctx.make_node(Phasor::new(55.0).with_amplitude(0.2))
        .connect(&ctx.make_node(LowPass::new(800.0)))?
        .connect_to_bus(&mixer, 2)?;

    let (tap, mut meter) = Tap::new(SAMPLE_RATE as usize * 2);
    mixer
        .connect(&ctx.make_node(tap))?
        .connect(&ctx.target()?)?;

    mixer.set_bus_volume(0, 0.65)?;
    mixer.set_bus_volume(1, 0.65)?;
    mixer.set_bus_pan(1, -0.5)?;
    ctx.start()?;

    println!("{}", ctx.print_graph());

    let mut block = Buffer::new(BLOCK, 2);
    let blocks = SAMPLE_RATE as usize / BLOCK;
    for i in 0..blocks {
        // sweep the triangle from left to right
        let pan = -1.0 + 2.0 * i as f32 / blocks as f32;
        mixer.set_bus_pan(1, pan)?;
        if i == blocks / 2 {
            mixer.set_bus_enabled(2, false)?;
        }
        device.render(&mut block);
        if i % 10 == 0 {
            println!("block {i:3}: peak {:.3}, rms {:.3}", block.peak(), meter.drain_rms());
        }
    }

    println!(
        "rendered {:.2}s, {} dropped blocks, last clip: {:?}",
        ctx.num_processed_seconds(),
        ctx.num_dropped_blocks(),
        ctx.last_clip_frame()
    );
    println!("\n{}", ctx.to_dot());
    ctx.stop()?;
    Ok(())
}
