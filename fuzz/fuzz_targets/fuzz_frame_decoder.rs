#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use realm_gate::core::codec::WorldCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes through the inbound decoder in small pieces;
    // any outcome but a panic or a stall is acceptable
    let mut codec = WorldCodec::new();
    let mut buf = BytesMut::new();
    for chunk in data.chunks(5) {
        buf.extend_from_slice(chunk);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
