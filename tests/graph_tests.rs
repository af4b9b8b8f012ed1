use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use schall::nodes::{CallbackSource, ChannelConverter, Gain, LineOut, Mixer, Sine};
use schall::{Buffer, Context, ErrorKind, Format, GraphError, NodeRef, OfflineDevice};

const RATE: u32 = 44100;
const BLOCK: usize = 512;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn offline(channels: usize) -> (Context, Arc<OfflineDevice>) {
    init_tracing();
    let device = OfflineDevice::new("offline", RATE, channels, BLOCK);
    let ctx = Context::new().with_target(LineOut::new(device.clone()).unwrap());
    (ctx, device)
}

fn implicit_nodes(ctx: &Context) -> usize {
    ctx.topology().node_weights().filter(|n| n.implicit).count()
}

#[test]
fn effect_takes_channels_from_its_input() {
    let (ctx, _device) = offline(2);
    let sine = ctx.make_node_with_format(Sine::new(440.0), Format::new().with_channels(1));
    let gain = ctx.make_node(Gain::new(0.5));
    let target = ctx.target().unwrap();
    sine.connect(&gain).unwrap().connect(&target).unwrap();

    ctx.initialize().unwrap();
    assert_eq!(sine.num_channels(), 1);
    assert_eq!(sine.sample_rate(), Some(RATE));
    assert_eq!(gain.num_channels(), 1);
    assert_eq!(gain.sample_rate(), Some(RATE));
    assert_eq!(target.num_channels(), 2);
    // the target maps channels itself
    assert_eq!(implicit_nodes(&ctx), 0);
    assert!(!target.is_process_in_place());
}

#[test]
fn generators_default_from_the_output_chain() {
    let (ctx, _device) = offline(2);
    let sine = ctx.make_node(Sine::new(440.0));
    let gain = ctx.make_node(Gain::new(1.0));
    sine.connect(&gain).unwrap().connect(&ctx.target().unwrap()).unwrap();

    ctx.initialize().unwrap();
    assert_eq!(sine.num_channels(), 2);
    assert_eq!(gain.num_channels(), 2);
    assert!(gain.is_process_in_place());
}

#[test]
fn mono_into_stereo_effect_gets_a_converter() {
    let (ctx, device) = offline(2);
    let dc = ctx.make_node(
        CallbackSource::new(|_, buffer: &mut Buffer| buffer.as_mut_slice().fill(0.5)).with_channels(1),
    );
    let gain = ctx.make_node_with_format(Gain::new(1.0).without_smoothing(), Format::new().with_channels(2));
    dc.connect(&gain).unwrap().connect(&ctx.target().unwrap()).unwrap();

    ctx.start().unwrap();
    let converter = gain.input(0).unwrap();
    assert!(converter.is_implicit());
    assert_eq!(converter.name(), "ChannelConverter");
    assert_eq!(converter.num_channels(), 2);
    assert!(converter.is_connected_to_input(dc.node()));
    assert!(dc.is_connected_to_output(&converter));

    let mut block = Buffer::new(BLOCK, 2);
    assert!(device.render(&mut block));
    assert!(block.channel(0).iter().all(|s| *s == 0.5));
    assert!(block.channel(1).iter().all(|s| *s == 0.5));

    // rebuilt rather than stacked on every pass
    let other = ctx.make_node(Sine::new(220.0));
    let mixer = ctx.make_node(Mixer::new());
    other.connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    assert_eq!(implicit_nodes(&ctx), 1);
}

#[test]
fn converter_type_is_exported() {
    // user code can place one explicitly
    let (ctx, _device) = offline(2);
    let sine = ctx.make_node_with_format(Sine::new(440.0), Format::new().with_channels(1));
    let converter = ctx.make_node_with_format(ChannelConverter::new(), Format::new().with_channels(2));
    sine.connect(&converter).unwrap().connect(&ctx.target().unwrap()).unwrap();
    ctx.initialize().unwrap();
    assert_eq!(converter.num_channels(), 2);
    assert_eq!(implicit_nodes(&ctx), 0);
}

#[test]
fn connection_rules_fail_fast() {
    let (ctx, _device) = offline(2);
    let target = ctx.target().unwrap();
    let sine = ctx.make_node(Sine::new(440.0));
    let a = ctx.make_node(Gain::new(1.0));
    let b = ctx.make_node(Gain::new(1.0));

    let err = target.connect(&a).unwrap_err();
    assert!(matches!(err, GraphError::TargetHasNoOutputs { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = a.connect(&sine).unwrap_err();
    assert!(matches!(err, GraphError::GeneratorHasNoInputs { .. }));

    let err = sine.connect_to_bus(&a, 1).unwrap_err();
    assert!(matches!(err, GraphError::InputCapacity { bus: 1, capacity: 1, .. }));

    a.connect(&b).unwrap();
    assert!(matches!(b.connect(&a), Err(GraphError::Cycle { .. })));
    let a_ref: &NodeRef = &a;
    assert!(matches!(a_ref.connect(a_ref), Err(GraphError::Cycle { .. })));
}

#[test]
fn nodes_of_different_contexts_do_not_mix() {
    let (ctx, _device) = offline(2);
    let (other, _other_device) = offline(2);
    let sine = ctx.make_node(Sine::new(440.0));
    let gain = other.make_node(Gain::new(1.0));
    assert!(matches!(sine.connect(&gain), Err(GraphError::ForeignContext { .. })));
}

#[test]
fn connecting_replaces_the_occupant() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    let first = ctx.make_node(Sine::new(220.0));
    let second = ctx.make_node(Sine::new(330.0));

    first.connect_to_bus(&mixer, 0).unwrap();
    second.connect_to_bus(&mixer, 0).unwrap();
    assert!(first.output().is_none());
    assert!(mixer.input(0).is_some_and(|n| Arc::ptr_eq(&n, second.node())));
    assert_eq!(mixer.num_connected_inputs(), 1);
    assert_eq!(mixer.first_available_input_bus(), 1);
}

#[test]
fn unresolvable_format_rolls_back() {
    let (ctx, _device) = offline(2);
    // an effect with nothing feeding it has no source for its format
    let gain = ctx.make_node(Gain::new(1.0));
    gain.connect(&ctx.target().unwrap()).unwrap();

    let err = ctx.initialize().unwrap_err();
    assert!(matches!(err, GraphError::IncompleteFormat { .. }));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(!ctx.is_initialized());
    assert!(ctx.start().is_err());
    assert!(!ctx.is_running());
}

#[test]
fn sample_rate_mismatch_is_a_format_error() {
    let (ctx, _device) = offline(2);
    let slow = ctx.make_node(CallbackSource::new(|_, _: &mut Buffer| {}).with_sample_rate(22050));
    slow.connect(&ctx.target().unwrap()).unwrap();

    match ctx.initialize() {
        Err(GraphError::SampleRateMismatch { expected, found, .. }) => {
            assert_eq!(expected, RATE);
            assert_eq!(found, 22050);
        }
        other => panic!("expected a sample rate mismatch, got {other:?}"),
    }
    assert!(!ctx.is_initialized());
}

#[test]
fn rejected_connection_keeps_the_graph_playing() {
    let (ctx, device) = offline(2);
    let target = ctx.target().unwrap();
    let good = ctx.make_node(Sine::new(440.0));
    good.connect(&target).unwrap();
    ctx.start().unwrap();

    let mut block = Buffer::new(BLOCK, 2);
    assert!(device.render(&mut block));
    assert!(block.peak() > 0.2);

    let slow = ctx.make_node(CallbackSource::new(|_, _: &mut Buffer| {}).with_sample_rate(22050));
    let err = slow.connect(&target).unwrap_err();
    assert!(matches!(err, GraphError::SampleRateMismatch { found: 22050, .. }));
    assert!(slow.output().is_none());
    assert!(!slow.is_initialized());
    assert_eq!(target.num_connected_inputs(), 1);
    assert!(target.is_initialized());
    assert!(ctx.is_initialized());
    assert!(ctx.is_running());
    assert!(device.render(&mut block));
    assert!(block.peak() > 0.2);

    // replacing an occupant puts the occupant back
    assert!(slow.connect_to_bus(&target, 0).is_err());
    assert!(target.input(0).is_some_and(|n| Arc::ptr_eq(&n, good.node())));
    assert!(good.output().is_some());
    assert!(good.is_initialized());
    assert!(device.render(&mut block));
    assert!(block.peak() > 0.2);
    assert_eq!(ctx.num_dropped_blocks(), 0);
}

#[test]
fn status_polling_does_not_drop_blocks() {
    let (ctx, device) = offline(2);
    ctx.make_node(Sine::new(440.0)).connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                assert!(ctx.is_running());
                assert!(ctx.is_initialized());
                assert_eq!(ctx.sample_rate(), Some(RATE));
                assert_eq!(ctx.frames_per_block(), BLOCK);
                assert!(ctx.target().is_ok());
                assert!(!ctx.print_graph().is_empty());
            }
        });

        let mut block = Buffer::new(BLOCK, 2);
        for _ in 0..2000 {
            assert!(device.render(&mut block));
        }
        done.store(true, Ordering::Relaxed);
    });
    assert_eq!(ctx.num_dropped_blocks(), 0);
}

#[test]
fn missing_target_is_reported() {
    init_tracing();
    let ctx = Context::new();
    assert!(matches!(ctx.target(), Err(GraphError::NoTarget)));
    assert!(matches!(ctx.start(), Err(GraphError::NoTarget)));
}

#[test]
fn lifecycle_is_idempotent() {
    let (ctx, _device) = offline(2);
    let sine = ctx.make_node(Sine::new(440.0));
    sine.connect(&ctx.target().unwrap()).unwrap();

    ctx.uninitialize().unwrap();
    ctx.initialize().unwrap();
    ctx.initialize().unwrap();
    assert!(ctx.is_initialized());
    ctx.start().unwrap();
    ctx.start().unwrap();
    assert!(ctx.is_running());
    ctx.stop().unwrap();
    ctx.stop().unwrap();
    assert!(!ctx.is_running());
    assert!(ctx.is_initialized());
    ctx.uninitialize().unwrap();
    ctx.uninitialize().unwrap();
    assert!(!ctx.is_initialized());
    assert!(!sine.is_initialized());
}

#[test]
fn disconnecting_an_empty_bus_is_a_noop() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    mixer.disconnect_input(3).unwrap();
    let gain = ctx.make_node(Gain::new(1.0));
    gain.disconnect().unwrap();
    assert_eq!(mixer.num_connected_inputs(), 0);
}

#[test]
fn disconnect_while_running_reinitializes() {
    let (ctx, device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    let a = ctx.make_node(Sine::new(220.0));
    let b = ctx.make_node(Sine::new(330.0));
    a.connect(&mixer).unwrap();
    b.connect(&mixer).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    b.disconnect().unwrap();
    assert!(!b.is_initialized());
    assert!(b.output().is_none());
    assert!(a.is_initialized());
    assert_eq!(mixer.num_connected_inputs(), 1);

    let mut block = Buffer::new(BLOCK, 2);
    assert!(device.render(&mut block));
    assert!(block.peak() > 0.0);
}

#[test]
fn disconnect_all_nodes_clears_the_graph() {
    let (ctx, _device) = offline(2);
    let target = ctx.target().unwrap();
    let sine = ctx.make_node(Sine::new(440.0));
    let gain = ctx.make_node(Gain::new(1.0));
    sine.connect(&gain).unwrap().connect(&target).unwrap();
    ctx.start().unwrap();

    ctx.disconnect_all_nodes().unwrap();
    assert!(!ctx.is_running());
    assert!(!ctx.is_initialized());
    assert_eq!(target.num_connected_inputs(), 0);
    assert!(gain.output().is_none());
    assert!(sine.output().is_none());
}

fn render_blocks(device: &OfflineDevice, count: usize) -> Vec<Buffer> {
    (0..count)
        .map(|_| {
            let mut block = Buffer::new(BLOCK, 1);
            assert!(device.render(&mut block));
            block
        })
        .collect()
}

#[test]
fn sine_renders_finite_blocks_and_resumes_its_phase() {
    let (ctx, device) = offline(1);
    ctx.make_node_with_format(Sine::new(440.0).with_amplitude(0.2), Format::new().with_channels(1))
        .connect(&ctx.target().unwrap())
        .unwrap();

    ctx.start().unwrap();
    let first = render_blocks(&device, 1);
    ctx.stop().unwrap();
    ctx.start().unwrap();
    let second = render_blocks(&device, 1);

    let (reference, reference_device) = offline(1);
    reference
        .make_node_with_format(Sine::new(440.0).with_amplitude(0.2), Format::new().with_channels(1))
        .connect(&reference.target().unwrap())
        .unwrap();
    reference.start().unwrap();
    let expected = render_blocks(&reference_device, 2);

    for block in first.iter().chain(&second) {
        assert_eq!(block.num_frames(), BLOCK);
        assert!(block.channel(0).iter().all(|s| s.is_finite()));
        assert!(block.peak() <= 0.2 + 1e-6);
    }
    for (a, b) in second[0].channel(0).iter().zip(expected[1].channel(0)) {
        assert!((a - b).abs() < 1e-6);
    }
    assert_eq!(ctx.num_processed_frames(), 2 * BLOCK as u64);
    assert!((ctx.num_processed_seconds() - 1024.0 / RATE as f64).abs() < 1e-9);
}

#[test]
fn stopped_effects_pass_audio_through() {
    let (ctx, device) = offline(1);
    let dc = ctx.make_node(CallbackSource::new(|_, buffer: &mut Buffer| buffer.as_mut_slice().fill(0.5)));
    let gain = ctx.make_node(Gain::new(0.0).without_smoothing());
    dc.connect(&gain).unwrap().connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    let mut block = Buffer::new(BLOCK, 1);
    device.render(&mut block);
    assert_eq!(block.peak(), 0.0);

    gain.stop();
    device.render(&mut block);
    assert_eq!(block.peak(), 0.5);

    // a stopped generator is silent
    dc.stop();
    device.render(&mut block);
    assert_eq!(block.peak(), 0.0);
}

#[test]
fn clipped_blocks_are_silenced() {
    let (ctx, device) = offline(1);
    let loud = ctx.make_node(CallbackSource::new(|_, buffer: &mut Buffer| buffer.as_mut_slice().fill(3.0)));
    loud.connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();
    assert_eq!(ctx.last_clip_frame(), None);

    let mut block = Buffer::new(BLOCK, 1);
    device.render(&mut block);
    device.render(&mut block);
    assert_eq!(block.peak(), 0.0);
    assert_eq!(ctx.last_clip_frame(), Some(BLOCK as u64));

    ctx.set_clip_detection(false, schall::DEFAULT_CLIP_THRESHOLD);
    device.render(&mut block);
    assert_eq!(block.peak(), 3.0);
}

#[test]
fn topology_reflects_the_graph() {
    let (ctx, _device) = offline(2);
    let mixer = ctx.make_node(Mixer::new());
    ctx.make_node(Sine::new(220.0)).connect_to_bus(&mixer, 0).unwrap();
    ctx.make_node(Sine::new(330.0)).connect_to_bus(&mixer, 4).unwrap();
    mixer.connect(&ctx.target().unwrap()).unwrap();
    ctx.initialize().unwrap();

    let graph = ctx.topology();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 3);
    let mut busses: Vec<usize> = graph.edge_weights().copied().collect();
    busses.sort_unstable();
    assert_eq!(busses, vec![0, 0, 4]);

    let printed = ctx.print_graph();
    let lines: Vec<&str> = printed.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("LineOut (offline)"));
    assert!(lines[1].starts_with("-- (0) Mixer"));
    assert!(lines[2].contains("Sine"));
    assert!(lines[3].starts_with("---- (4) Sine"));
    assert!(printed.contains("ch: 2"));
    assert!(printed.contains("44100 Hz"));

    assert!(ctx.to_dot().starts_with("digraph"));
}

#[test]
fn target_can_be_replaced() {
    let (ctx, _device) = offline(2);
    let sine = ctx.make_node(Sine::new(440.0));
    sine.connect(&ctx.target().unwrap()).unwrap();
    ctx.start().unwrap();

    let device = OfflineDevice::new("other", 48000, 1, 256);
    ctx.set_target(LineOut::new(device.clone()).unwrap()).unwrap();
    assert!(ctx.is_running());
    assert_eq!(ctx.sample_rate(), Some(48000));
    assert_eq!(ctx.frames_per_block(), 256);
    assert_eq!(sine.sample_rate(), Some(48000));
    assert_eq!(sine.num_channels(), 1);

    let mut block = Buffer::new(256, 1);
    assert!(device.render(&mut block));
    assert!(block.peak() > 0.0);
}

#[test]
fn line_out_validates_channels() {
    let device = OfflineDevice::new("offline", RATE, 2, BLOCK);
    assert!(LineOut::new(device.clone()).unwrap().with_channels(1).is_ok());
    let err = LineOut::new(device.clone()).unwrap().with_channels(3).err().unwrap();
    assert!(matches!(err, GraphError::UnsupportedChannels { requested: 3, available: 2, .. }));

    let silent = OfflineDevice::new("silent", RATE, 0, BLOCK);
    assert!(LineOut::new(silent).is_err());
}

#[test]
fn default_target_comes_from_the_device_manager() {
    init_tracing();
    let device = OfflineDevice::new("speakers", RATE, 2, BLOCK);
    let registry = schall::DeviceRegistry::new().with_default_output(device.clone());
    let ctx = Context::new().with_device_manager(Arc::new(registry));

    let target = ctx.target().unwrap();
    assert_eq!(target.name(), "LineOut (speakers)");
    assert!(Arc::ptr_eq(&target, &ctx.target().unwrap()));
    assert_eq!(ctx.sample_rate(), Some(RATE));

    ctx.make_node(Sine::new(440.0)).connect(&target).unwrap();
    ctx.start().unwrap();
    let mut block = Buffer::new(BLOCK, 2);
    assert!(device.render(&mut block));
    assert!(block.peak() > 0.0);
}
