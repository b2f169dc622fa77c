//! Integration test common infrastructure.
//!
//! Provides a scripted platform adapter and a way to spawn dynchand
//! instances against it.

pub mod adapter;
pub mod daemon;

#[allow(unused_imports)]
pub use adapter::MockAdapter;
#[allow(unused_imports)]
pub use daemon::TestDaemon;

/// Reserve a free localhost port.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}
