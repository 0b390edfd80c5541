//! Line splitting benchmarks.
#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nbssh::LineSplitter;

fn sample_output(lines: usize) -> Vec<u8> {
    (0..lines)
        .flat_map(|i| {
            format!("  {i:08} drwxr-xr-x  2 deploy deploy 4096 file-{i}.log\r\n").into_bytes()
        })
        .collect()
}

fn split_all(data: &[u8], chunk: usize, trim: bool) -> usize {
    let mut splitter = LineSplitter::new(trim);
    let mut count = 0;
    for piece in data.chunks(chunk) {
        splitter.push(piece);
        while splitter.next_line().is_some() {
            count += 1;
        }
    }
    count + usize::from(splitter.finish().is_some())
}

fn bench_chunk_sizes(c: &mut Criterion) {
    let data = sample_output(10_000);
    let mut group = c.benchmark_group("line_split_chunk");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk in &[64, 1024, 32 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), chunk, |b, &chunk| {
            b.iter(|| split_all(black_box(&data), chunk, true));
        });
    }

    group.finish();
}

fn bench_trim(c: &mut Criterion) {
    let data = sample_output(10_000);

    c.bench_function("line_split_no_trim", |b| {
        b.iter(|| split_all(black_box(&data), 32 * 1024, false));
    });
}

fn bench_long_line(c: &mut Criterion) {
    // One line arriving in many small reads exercises the carried fragment.
    let mut data = vec![b'x'; 1 << 20];
    data.push(b'\n');

    c.bench_function("line_split_long_line", |b| {
        b.iter(|| split_all(black_box(&data), 512, false));
    });
}

criterion_group!(benches, bench_chunk_sizes, bench_trim, bench_long_line);
criterion_main!(benches);
