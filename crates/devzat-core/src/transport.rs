//! The boundary between a session's REPL loop and whatever is actually
//! carrying bytes to the client. Grounded on `libshpool`'s separation
//! between `daemon/shell.rs` (the PTY-driving logic) and the concrete
//! transport wiring in `daemon/server.rs` — here the concrete SSH channel
//! implementation lives in `devzat-server` (it needs `russh`), and
//! `devzat-core` only depends on this trait.

use async_trait::async_trait;

/// A single connected client's read/write/resize surface, independent of
/// whether it arrived over SSH or (in tests) an in-memory pipe.
#[async_trait]
pub trait PtyChannel: Send + Sync {
    /// Write raw bytes to the client. No framing; the caller has already
    /// rendered ANSI/text.
    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()>;

    /// Read one chunk of input. Returns `Ok(None)` on clean EOF.
    async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>>;

    /// Current terminal dimensions, if known (a raw TCP-only client has
    /// none and gets the session's width/height defaults).
    fn pty_size(&self) -> Option<(u16, u16)>;

    /// The remote address, used for ban checks and logging.
    fn remote_addr(&self) -> String;

    async fn close(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// An in-memory [`PtyChannel`] for exercising session logic without a
    /// real SSH connection.
    pub struct MockChannel {
        pub written: Mutex<Vec<u8>>,
        pub inbound: Mutex<VecDeque<Vec<u8>>>,
        pub addr: String,
    }

    impl MockChannel {
        pub fn new(addr: impl Into<String>) -> Self {
            MockChannel { written: Mutex::new(Vec::new()), inbound: Mutex::new(VecDeque::new()), addr: addr.into() }
        }

        pub async fn push_input(&self, data: impl Into<Vec<u8>>) {
            self.inbound.lock().await.push_back(data.into());
        }
    }

    #[async_trait]
    impl PtyChannel for MockChannel {
        async fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
            self.written.lock().await.extend_from_slice(data);
            Ok(())
        }

        async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.inbound.lock().await.pop_front())
        }

        fn pty_size(&self) -> Option<(u16, u16)> {
            Some((80, 24))
        }

        fn remote_addr(&self) -> String {
            self.addr.clone()
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
