use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use realm_gate::core::codec::{ClientCodec, WorldCodec};
use realm_gate::core::packet::{ClientPacket, ServerPacket};
use realm_gate::utils::crypto::SessionKey;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn keyed_pair() -> (ClientCodec, WorldCodec) {
    let key = SessionKey::from_bytes(vec![0x3C; 40]).unwrap();
    let mut client = ClientCodec::new();
    let mut server = WorldCodec::new();
    client.cipher_mut().rekey(&key).unwrap();
    server.cipher_mut().rekey(&key).unwrap();
    (client, server)
}

#[allow(clippy::unwrap_used)]
fn bench_inbound_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound_decode");
    let body_sizes = [0usize, 16, 256, 4096, 0x2800 - 4];

    for &size in &body_sizes {
        group.throughput(Throughput::Bytes(size as u64 + 6));
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || {
                    let (mut client, server) = keyed_pair();
                    let mut wire = BytesMut::new();
                    client
                        .encode(ClientPacket::new(0x0100, vec![0xAB; size]), &mut wire)
                        .unwrap();
                    (server, wire)
                },
                |(mut server, mut wire)| {
                    let packet = server.decode(&mut wire).unwrap();
                    assert!(packet.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_outbound_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbound_encode");
    // 0x8000 crosses into the five-byte header
    let body_sizes = [8usize, 512, 0x7FFD, 0x8000, 1024 * 1024];

    for &size in &body_sizes {
        let body = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            let (_, mut server) = keyed_pair();
            let mut buf = BytesMut::with_capacity(size + 5);
            b.iter(|| {
                buf.clear();
                server
                    .encode(ServerPacket::from_body(0x0042, &body), &mut buf)
                    .unwrap();
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_split_delivery(c: &mut Criterion) {
    let (mut client, _) = keyed_pair();
    let mut wire = BytesMut::new();
    for i in 0..64u32 {
        client
            .encode(ClientPacket::new(0x0200 + i, vec![i as u8; 96]), &mut wire)
            .unwrap();
    }
    let wire = wire.freeze();

    c.bench_function("decode_64_frames_in_7b_chunks", |b| {
        b.iter_batched(
            || keyed_pair().1,
            |mut server| {
                let mut inbox = BytesMut::new();
                let mut count = 0;
                for chunk in wire.chunks(7) {
                    inbox.extend_from_slice(chunk);
                    while server.decode(&mut inbox).unwrap().is_some() {
                        count += 1;
                    }
                }
                assert_eq!(count, 64);
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_inbound_decode,
    bench_outbound_encode,
    bench_split_delivery
);
criterion_main!(benches);
