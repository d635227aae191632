#![no_main]

use libfuzzer_sys::fuzz_target;
use frameloom::codec::FrameCodec;
use std::io::Cursor;
use tokio::runtime::Runtime;

/// Feeds arbitrary bytes straight into the frame header parser. `read_header` should reject any
/// malformed input with an `Error`, never panic, regardless of what a client sends.
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();
    runtime.block_on(async move {
        let mut cursor = Cursor::new(data.to_vec());
        let _ = FrameCodec::read_header(&mut cursor).await;
    });
});
