#![no_main]

use libfuzzer_sys::fuzz_target;
use frameloom::handshake;
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt};
use tokio::runtime::Runtime;

/// Feeds arbitrary bytes as the client side of an opening handshake. The server half should
/// either complete the upgrade or return an `Error` — never panic or hang (the handshake read is
/// itself timeout-bounded, so a client that never sends a terminating CRLFCRLF still resolves).
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();
    let data = data.to_vec();
    runtime.block_on(async move {
        let (mut client, server) = duplex(64 * 1024);
        let _ = client.write_all(&data).await;
        drop(client);
        let _ = handshake::accept(server, Duration::from_millis(50)).await;
    });
});
