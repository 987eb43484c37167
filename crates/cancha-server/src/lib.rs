//! Tokio drivers for the cancha brokers.
//!
//! Each driver owns the sockets and a [`cancha_core`] state machine, and
//! translates between the two: socket completions become event calls, and
//! the returned actions become socket operations. All state machine calls
//! happen on the server's own task, so a client's record is only ever
//! mutated from one place and no locking is needed anywhere.
//!
//! ```text
//! reader task ──┐
//! reader task ──┼──> mpsc ──> server task ──> core events ──> actions
//! writer task <─┴──────────────────┘          (one per completion)
//! ```
//!
//! The TCP driver spawns a reader and a writer task per connection; the UDP
//! driver multiplexes one socket. Both expose `run_until` for tests (bind
//! an ephemeral port, drive a shutdown future) and `run_until_ctrl_c` for
//! the binaries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod tcp;
pub mod udp;

pub use tcp::TcpServer;
pub use udp::UdpServer;

/// Milliseconds since the Unix epoch, used to stamp routed MESSAGE frames.
#[must_use]
pub(crate) fn wall_clock_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
