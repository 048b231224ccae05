//! Fuzz target for SFTP packet bodies
//!
//! Every body a server could send must decode to a packet or an error,
//! never a panic. Bodies that do decode must survive a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sftpmount_proto::Packet;

fuzz_target!(|data: &[u8]| {
    // Limit input size to avoid OOM
    if data.len() > 1024 * 1024 {
        return;
    }

    let _ = Packet::peek_request_id(data);

    let Ok(packet) = Packet::decode(data) else {
        return;
    };
    let frame = packet.to_frame();
    let (again, used) =
        Packet::decode_frame(&frame).expect("re-encoded packet must decode");
    assert_eq!(used, frame.len());
    assert_eq!(again, packet);
});
