#![forbid(unsafe_code)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use vbd_block::{
    CipherConfig, Device, DeviceConfig, Direction, DispatchMode, Request, RequestId, RequestKind,
    SectorNumber,
};

const NSECTORS: u64 = 4096;
const SECTOR: usize = 512;

fn make_device(mode: DispatchMode, key: Option<Vec<u8>>) -> Device {
    let config = DeviceConfig {
        nsectors: NSECTORS,
        dispatch_mode: mode,
        cipher: key.map(|key| CipherConfig { key }),
        ..DeviceConfig::default()
    };
    Device::new("bench", &config).expect("device")
}

// ── Raw transfers: plain vs. encrypted ─────────────────────────────────

fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer");
    for (label, key) in [("plain", None), ("aes128", Some(vec![0x11; 16]))] {
        let dev = make_device(DispatchMode::WholeRequest, key);
        for sectors in [1_u32, 8, 64] {
            let nbytes = sectors as usize * SECTOR;
            group.throughput(Throughput::Bytes(nbytes as u64));
            let mut buf = vec![0x5A_u8; nbytes];

            group.bench_with_input(
                BenchmarkId::new(format!("{label}_write"), sectors),
                &sectors,
                |b, &sectors| {
                    b.iter(|| {
                        dev.transfer(Direction::Write, SectorNumber(128), sectors, &mut buf)
                            .expect("write");
                    });
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("{label}_read"), sectors),
                &sectors,
                |b, &sectors| {
                    b.iter(|| {
                        dev.transfer(Direction::Read, SectorNumber(128), sectors, &mut buf)
                            .expect("read");
                        black_box(&buf);
                    });
                },
            );
        }
    }
    group.finish();
}

// ── Dispatch strategies over an 8-segment request ──────────────────────

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    for mode in [DispatchMode::MultiSegment, DispatchMode::Direct] {
        let dev = make_device(mode, None);
        let mut bufs: Vec<Vec<u8>> = (0..8).map(|_| vec![0xC3_u8; SECTOR]).collect();
        group.bench_function(mode.strategy().name(), |b| {
            b.iter(|| {
                let request = bufs.iter_mut().fold(
                    Request::new(RequestId(1), RequestKind::Write, SectorNumber(0)),
                    |req, buf| req.segment(1, buf),
                );
                black_box(dev.submit(request));
            });
        });
    }
    group.finish();
}

fn bench_open_close(c: &mut Criterion) {
    let dev = make_device(DispatchMode::WholeRequest, None);
    c.bench_function("open_close_cycle", |b| {
        b.iter(|| {
            dev.open();
            dev.close().expect("close");
        });
    });
}

criterion_group!(
    transfer_benches,
    bench_transfer,
    bench_dispatch,
    bench_open_close,
);
criterion_main!(transfer_benches);
