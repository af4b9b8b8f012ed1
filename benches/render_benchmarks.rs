use criterion::{black_box, criterion_group, criterion_main, Criterion};
use schall::nodes::{Gain, LineOut, LowPass, Mixer, Sine};
use schall::{AudioNode, Buffer, Context, OfflineDevice, ProcessContext};

const BLOCK: usize = 512;

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Sine.process()", |b| {
        let mut sine = Sine::new(440.0);
        let ctx = ProcessContext {
            sample_rate: 48000,
            frames_per_block: BLOCK,
            frame: 0,
        };
        let mut buffer = Buffer::new(BLOCK, 2);

        b.iter(|| sine.process(&ctx, core::iter::empty(), black_box(&mut buffer)))
    });

    c.bench_function("render sine -> gain -> lowpass", |b| {
        let device = OfflineDevice::new("bench", 48000, 2, BLOCK);
        let ctx = Context::new().with_target(LineOut::new(device.clone()).unwrap());
        ctx.make_node(Sine::new(440.0))
            .connect(&ctx.make_node(Gain::new(0.5)))
            .unwrap()
            .connect(&ctx.make_node(LowPass::new(2000.0)))
            .unwrap()
            .connect(&ctx.target().unwrap())
            .unwrap();
        ctx.start().unwrap();
        let mut block = Buffer::new(BLOCK, 2);

        b.iter(|| device.render(black_box(&mut block)))
    });

    c.bench_function("render mixer with 8 busses", |b| {
        let device = OfflineDevice::new("bench", 48000, 2, BLOCK);
        let ctx = Context::new().with_target(LineOut::new(device.clone()).unwrap());
        let mixer = ctx.make_node(Mixer::new());
        for bus in 0..8 {
            ctx.make_node(Sine::new(110.0 * (bus + 1) as f32).with_amplitude(0.1))
                .connect_to_bus(&mixer, bus)
                .unwrap();
        }
        mixer.connect(&ctx.target().unwrap()).unwrap();
        ctx.start().unwrap();
        let mut block = Buffer::new(BLOCK, 2);

        b.iter(|| device.render(black_box(&mut block)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
