use audiofabric::biquad::Biquad;
use audiofabric::bip::Bip;
use audiofabric::buffer::Buffer;
use audiofabric::field::{Field, Value};
use audiofabric::mixer::BasicMixer;
use audiofabric::processor::Processor;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn bip_round_trip(frames: usize) {
    let ring = Bip::<f32>::new(4096);
    let samples = vec![0.5f32; frames];
    let mut out = vec![0.0f32; frames];
    let mut written = 0;
    let mut read = 0;
    while read < frames {
        if written < frames {
            let (offset, n) = ring.request_write(frames - written);
            if n > 0 {
                ring.write_slice(offset, n).copy_from_slice(&samples[written..written + n]);
                ring.finish_write(n).unwrap();
                written += n;
            }
        }
        let (offset, n) = ring.request_read(frames - read);
        if n > 0 {
            out[read..read + n].copy_from_slice(ring.read_slice(offset, n));
            ring.finish_read(n);
            read += n;
        }
    }
    black_box(out);
}

fn mixer_four_sources(frames: usize) {
    let mut mixer = BasicMixer::new(1, 4);
    let output = Arc::new(Buffer::new(frames * 2));
    mixer.set_out(0, Some(output.clone())).unwrap();
    let inputs: Vec<Arc<Buffer>> = (0..4)
        .map(|i| {
            let buf = Arc::new(Buffer::new(frames * 2));
            buf.write_all(&vec![0.1 * (i as f32 + 1.0); frames]).unwrap();
            mixer.set_source(i, Some(buf.clone())).unwrap();
            buf
        })
        .collect();
    mixer.start().unwrap();
    mixer.mix().unwrap();
    mixer.end().unwrap();
    black_box(inputs);
    black_box(output);
}

fn biquad_lowpass(frames: usize) {
    let mut filter = Biquad::new(1);
    filter.set(Field::Samplerate, Value::Float(44100.0)).unwrap();
    filter.set(Field::Frequency, Value::Float(1000.0)).unwrap();
    filter.set(Field::Q, Value::Float(0.707)).unwrap();
    let input = Arc::new(Buffer::new(frames * 2));
    let output = Arc::new(Buffer::new(frames * 2));
    let samples: Vec<f32> = (0..frames).map(|i| ((i as f32) * 0.05).sin()).collect();
    input.write_all(&samples).unwrap();
    filter.set_in(0, Some(input.clone())).unwrap();
    filter.set_out(0, Some(output.clone())).unwrap();
    filter.start().unwrap();
    filter.mix().unwrap();
    filter.end().unwrap();
    black_box(output);
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("bip_round_trip_4096", |b| b.iter(|| bip_round_trip(black_box(4096))));
    c.bench_function("mixer_four_sources_1024", |b| b.iter(|| mixer_four_sources(black_box(1024))));
    c.bench_function("biquad_lowpass_1024", |b| b.iter(|| biquad_lowpass(black_box(1024))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
