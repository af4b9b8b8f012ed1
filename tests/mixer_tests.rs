use std::sync::Arc;

use schall::nodes::{CallbackSource, LineOut, Mixer, Sine, DEFAULT_MAX_BUSSES};
use schall::{Buffer, Context, ErrorKind, GraphError, NodeRef, OfflineDevice};

const BLOCK: usize = 256;

fn offline(channels: usize) -> (Context, Arc<OfflineDevice>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let device = OfflineDevice::new("offline", 48000, channels, BLOCK);
    let ctx = Context::new().with_target(LineOut::new(device.clone()).unwrap());
    (ctx, device)
}

fn constant(ctx: &Context, value: f32) -> NodeRef {
    ctx.make_node(CallbackSource::new(move |_, buffer: &mut Buffer| buffer.as_mut_slice().fill(value)).with_channels(1))
        .into_node()
}

#[test]
fn every_bus_past_the_limit_is_rejected() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    assert_eq!(mixer.max_num_busses(), DEFAULT_MAX_BUSSES);

    for bus in mixer.max_num_busses()..mixer.max_num_busses() + 20 {
        for result in [
            mixer.set_bus_volume(bus, 0.5),
            mixer.set_bus_pan(bus, 0.0),
            mixer.set_bus_enabled(bus, false),
            mixer.bus_volume(bus).map(|_| ()),
            mixer.bus_pan(bus).map(|_| ()),
            mixer.is_bus_enabled(bus).map(|_| ()),
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, GraphError::BusOutOfRange { bus: b, max: DEFAULT_MAX_BUSSES } if b == bus));
            assert_eq!(err.kind(), ErrorKind::Parameter);
        }
    }

    let sine = ctx.make_node(Sine::new(440.0));
    assert!(matches!(
        sine.connect_to_bus(&mixer, DEFAULT_MAX_BUSSES),
        Err(GraphError::InputCapacity { .. })
    ));
}

#[test]
fn unoccupied_busses_are_rejected() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(440.0)).connect_to_bus(&mixer, 2).unwrap();

    assert!(mixer.set_bus_volume(2, 0.5).is_ok());
    assert_eq!(mixer.bus_volume(2).unwrap(), 0.5);
    let err = mixer.set_bus_volume(1, 0.5).unwrap_err();
    assert!(matches!(err, GraphError::BusUnoccupied { bus: 1 }));
    assert!(err.to_string().contains("bus index 1"));
}

#[test]
fn invalid_values_are_not_clamped() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(440.0)).connect(&mixer).unwrap();

    assert!(matches!(mixer.set_bus_volume(0, -1.0), Err(GraphError::InvalidParameter { .. })));
    assert!(matches!(mixer.set_bus_volume(0, f32::NAN), Err(GraphError::InvalidParameter { .. })));
    assert!(matches!(mixer.set_bus_pan(0, 1.5), Err(GraphError::InvalidParameter { .. })));
    assert_eq!(mixer.bus_volume(0).unwrap(), 1.0);
    assert_eq!(mixer.bus_pan(0).unwrap(), 0.0);
}

#[test]
fn bus_limit_cannot_drop_below_active_busses() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(220.0)).connect_to_bus(&mixer, 0).unwrap();
    ctx.make_node(Sine::new(330.0)).connect_to_bus(&mixer, 5).unwrap();
    assert_eq!(mixer.num_active_busses(), 2);

    assert!(matches!(mixer.set_max_num_busses(1), Err(GraphError::BusLimit { requested: 1, .. })));
    // two busses are active, but bus 5 is still occupied
    assert!(matches!(mixer.set_max_num_busses(3), Err(GraphError::BusLimit { requested: 3, .. })));
    mixer.set_max_num_busses(6).unwrap();
    assert_eq!(mixer.max_num_busses(), 6);
    assert!(matches!(mixer.set_bus_volume(6, 1.0), Err(GraphError::BusOutOfRange { max: 6, .. })));
    mixer.set_max_num_busses(32).unwrap();
    assert_eq!(mixer.bus_volume(5).unwrap(), 1.0);
}

#[test]
fn pan_needs_stereo() {
    let (ctx, _device) = offline(4);
    let mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(440.0)).connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.initialize().unwrap();

    assert_eq!(mixer.num_channels(), 4);
    let err = mixer.set_bus_pan(0, 0.5).unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedPan { channels: 4 }));
    assert_eq!(err.kind(), ErrorKind::Parameter);
    // volume still works
    mixer.set_bus_volume(0, 0.5).unwrap();

    let fixed = ctx.make_node(Mixer::new().with_channels(6));
    ctx.make_node(Sine::new(440.0)).connect(&fixed).unwrap();
    assert!(matches!(fixed.set_bus_pan(0, 0.0), Err(GraphError::UnsupportedPan { channels: 6 })));
}

#[test]
fn centered_busses_sum_with_their_volume() {
    let (ctx, device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    constant(&ctx, 0.5).connect(&mixer).unwrap();
    constant(&ctx, 0.25).connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    mixer.set_bus_volume(0, 0.65).unwrap();
    mixer.set_bus_volume(1, 0.65).unwrap();
    ctx.start().unwrap();

    let expected = 0.65 * (0.5 + 0.25);
    let mut block = Buffer::new(BLOCK, 2);
    assert!(device.render(&mut block));
    for channel in block.channels() {
        assert!(channel.iter().all(|s| (s - expected).abs() < 1e-6));
    }
}

#[test]
fn disabled_and_panned_busses() {
    let (ctx, device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    constant(&ctx, 0.5).connect(&mixer).unwrap();
    constant(&ctx, 0.25).connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    mixer.set_bus_enabled(1, false).unwrap();
    assert!(!mixer.is_bus_enabled(1).unwrap());
    let mut block = Buffer::new(BLOCK, 2);
    device.render(&mut block);
    assert_eq!(block.channel(0)[0], 0.5);
    assert_eq!(block.channel(1)[0], 0.5);

    mixer.set_bus_pan(0, -1.0).unwrap();
    device.render(&mut block);
    assert_eq!(block.channel(0)[0], 0.5);
    assert_eq!(block.channel(1)[0], 0.0);

    mixer.set_bus_pan(0, 0.5).unwrap();
    device.render(&mut block);
    assert_eq!(block.channel(0)[0], 0.25);
    assert_eq!(block.channel(1)[0], 0.5);
}

#[test]
fn messages_reach_the_mixer() {
    let (ctx, device) = offline(1);
    let mut mixer = ctx.make_node(Mixer::new());
    constant(&ctx, 0.5).connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    mixer.send_bus_volume(0, 0.0).unwrap();
    let mut block = Buffer::new(BLOCK, 1);
    // applied after the block it arrives in
    device.render(&mut block);
    assert_eq!(block.channel(0)[0], 0.5);
    device.render(&mut block);
    assert_eq!(block.peak(), 0.0);
    assert_eq!(mixer.bus_volume(0).unwrap(), 0.0);
}

#[test]
fn queued_updates_are_validated() {
    let (ctx, device) = offline(2);
    let mut mixer = ctx.make_node(Mixer::new());
    constant(&ctx, 0.5).connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    assert!(matches!(mixer.send_bus_pan(0, 7.0), Err(GraphError::InvalidParameter { .. })));
    assert!(matches!(mixer.send_bus_volume(0, -3.0), Err(GraphError::InvalidParameter { .. })));
    assert!(matches!(mixer.send_bus_volume(0, f32::INFINITY), Err(GraphError::InvalidParameter { .. })));
    assert!(matches!(
        mixer.send_bus_volume(42, 0.5),
        Err(GraphError::BusOutOfRange { bus: 42, .. })
    ));
    assert!(matches!(mixer.send_bus_enabled(3, false), Err(GraphError::BusUnoccupied { bus: 3 })));

    let mut block = Buffer::new(BLOCK, 2);
    device.render(&mut block);
    device.render(&mut block);
    assert_eq!(mixer.bus_pan(0).unwrap(), 0.0);
    assert_eq!(mixer.bus_volume(0).unwrap(), 1.0);
    assert_eq!(block.channel(1)[0], 0.5);

    mixer.send_bus_pan(0, -1.0).unwrap();
    device.render(&mut block);
    device.render(&mut block);
    assert_eq!(mixer.bus_pan(0).unwrap(), -1.0);
    assert_eq!(block.channel(1)[0], 0.0);
}

#[test]
fn queued_pan_needs_stereo() {
    let (ctx, _device) = offline(4);
    let mut mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(440.0)).connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.initialize().unwrap();

    assert!(matches!(mixer.send_bus_pan(0, 0.0), Err(GraphError::UnsupportedPan { channels: 4 })));
    mixer.send_bus_volume(0, 0.5).unwrap();
}

#[test]
fn pan_set_before_negotiation_is_checked_on_initialize() {
    let (ctx, _device) = offline(4);
    let mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(440.0)).connect(&mixer).unwrap();
    // channels are unknown until the mixer reaches the target
    mixer.set_bus_pan(0, 0.5).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();

    let err = ctx.initialize().unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedPan { channels: 4 }));
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert!(!ctx.is_initialized());

    mixer.set_bus_pan(0, 0.0).unwrap();
    ctx.initialize().unwrap();
    assert_eq!(mixer.num_channels(), 4);
}
