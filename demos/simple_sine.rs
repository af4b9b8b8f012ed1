//! Simple example: play a sine wave with configurable output device
//!
//! Run with: cargo run --example simple_sine --features cpal_sink
//!
//! Lists available devices and lets you pick one, then plays a 440Hz sine
//! whose frequency drifts slowly.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use schall::nodes::{LineOut, Sine, SineMessage};
use schall::{Context, CpalDeviceManager, DeviceManager};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let manager = Arc::new(CpalDeviceManager::new());
    let devices = manager.devices();
    if devices.is_empty() {
        eprintln!("No audio output devices found!");
        return Ok(());
    }

    println!("Available audio output devices:");
    for (i, device) in devices.iter().enumerate() {
        println!(
            "  [{}] {} ({}Hz, {} ch)",
            i,
            device.name(),
            device.sample_rate(),
            device.num_output_channels()
        );
    }

    print!("\nSelect device [0]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let choice: usize = input.trim().parse().unwrap_or(0);

    let device = match devices.into_iter().nth(choice) {
        Some(device) => device,
        None => {
            println!("Invalid choice, using default device");
            manager.default_output()?
        }
    };
    println!("\nUsing: {} @ {}Hz", device.name(), device.sample_rate());

    let ctx = Context::new().with_target(LineOut::new(device)?);
    let mut sine = ctx.make_node(Sine::new(440.0).with_amplitude(0.25));
    sine.connect(&ctx.target()?)?;
    ctx.start()?;

    println!("Playing 440Hz sine wave...");
    println!("Press Ctrl+C to stop\n");

    let start = Instant::now();
    loop {
        let elapsed = start.elapsed().as_secs_f32();
        // modulate frequency slowly
        let freq = 440.0 + 220.0 * (elapsed * 0.5 * std::f32::consts::PI).sin();
        let _ = sine.send(SineMessage::SetFrequency(freq));
        sleep(Duration::from_millis(10));
    }
}
