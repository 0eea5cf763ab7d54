//! Process-visible wire tee: when `TCHANNEL_DEBUG` contains `dump` in its
//! comma-separated name list, every connection tees its inbound and
//! outbound frame bytes to `tracing`.

use std::net::SocketAddr;

use once_cell::sync::Lazy;

static DUMP_ENABLED: Lazy<bool> = Lazy::new(|| {
    std::env::var("TCHANNEL_DEBUG")
        .map(|names| names.split(',').any(|n| n.trim() == "dump"))
        .unwrap_or(false)
});

pub fn dump_enabled() -> bool {
    *DUMP_ENABLED
}

pub fn tee_in(remote: SocketAddr, bytes: &[u8]) {
    if dump_enabled() {
        tracing::trace!(">>> {} {}", remote, hex_preview(bytes));
    }
}

pub fn tee_out(remote: SocketAddr, bytes: &[u8]) {
    if dump_enabled() {
        tracing::trace!("<<< {} {}", remote, hex_preview(bytes));
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    const MAX: usize = 64;
    let truncated = bytes.len() > MAX;
    let shown = &bytes[..bytes.len().min(MAX)];
    let mut s = shown.iter().map(|b| format!("{:02x}", b)).collect::<String>();
    if truncated {
        s.push_str("...");
    }
    s
}
