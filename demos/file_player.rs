//! Simple audio file player
//!
//! Run with: cargo run --example file_player --features cpal_sink,vorbis_src -- <file.ogg>

use std::thread::sleep;
use std::time::Duration;

use schall::nodes::{FilePlayer, Gain};
use schall::{Context, OggSourceFile, SourceFile};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).ok_or("usage: file_player <file.ogg>")?;
    let source = OggSourceFile::open(&path)?;
    println!(
        "{}: {:.1}s, {} ch @ {}Hz",
        path,
        source.duration_secs(),
        source.num_channels(),
        source.sample_rate()
    );

    // a file recorded at another rate than the device is a format error
    let ctx = Context::default_output();
    let player = ctx.make_node(FilePlayer::new(source).with_looping(true));
    player
        .connect(&ctx.make_node(Gain::new(0.8)))?
        .connect(&ctx.target()?)?;
    ctx.start()?;
    player.start();

    println!("Playing... Ctrl+C to stop");
    loop {
        sleep(Duration::from_secs(1));
        let (position, underruns) = player.with(|p| (p.read_position(), p.num_underruns()));
        println!(
            "at {:.1}s, {} underruns",
            position as f64 / ctx.sample_rate().unwrap_or(1) as f64,
            underruns
        );
    }
}
