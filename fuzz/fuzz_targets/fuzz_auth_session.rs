#![no_main]

use libfuzzer_sys::fuzz_target;
use realm_gate::core::opcodes::CMSG_AUTH_SESSION;
use realm_gate::core::packet::ClientPacket;
use realm_gate::protocol::handshake::AuthSessionRequest;

fuzz_target!(|data: &[u8]| {
    // Fuzz credential parsing; a parsed request must re-encode
    let packet = ClientPacket::new(CMSG_AUTH_SESSION, data.to_vec());
    if let Ok(request) = AuthSessionRequest::parse(&packet) {
        let _ = request.to_packet();
    }
});
