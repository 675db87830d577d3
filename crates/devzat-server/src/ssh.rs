//! The `russh` server `Handler`: turns raw terminal bytes into
//! `devzat_core::transport::PtyChannel` calls. Grounded on the connection
//! lifecycle in `other_examples`'s sshllm server handler — line assembly
//! (backspace, Ctrl-C, enter) happens here, because devzat wants raw mode
//! and draws its own prompt, while a completed line is handed up to
//! `devzat_core::session::Session` through an in-memory channel.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::server::{Auth, Handle, Handler, Msg, Server as RusshServer, Session as RusshSession};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::sync::mpsc;
use tracing::{error, warn};

use devzat_core::session::{Session as DevzatSession, SessionDeps};
use devzat_core::transport::PtyChannel;

pub struct DevzatSshServer {
    pub deps: Arc<SessionDeps>,
}

impl RusshServer for DevzatSshServer {
    type Handler = DevzatHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> DevzatHandler {
        DevzatHandler {
            deps: Arc::clone(&self.deps),
            remote_addr: addr.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string()),
            pubkey: None,
            line_tx: None,
            input_buffer: Vec::new(),
            pty_size: Arc::new(StdMutex::new(None)),
        }
    }

    fn handle_session_error(&mut self, error: russh::Error) {
        error!(error = %error, "ssh session error");
    }
}

pub struct DevzatHandler {
    deps: Arc<SessionDeps>,
    remote_addr: String,
    pubkey: Option<Vec<u8>>,
    line_tx: Option<mpsc::Sender<Vec<u8>>>,
    input_buffer: Vec<u8>,
    pty_size: Arc<StdMutex<Option<(u16, u16)>>>,
}

impl Handler for DevzatHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(&mut self, _user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        self.pubkey = Some(key.public_key_bytes());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        *self.pty_size.lock().unwrap() = Some((clamp16(col_width, 80), clamp16(row_height, 24)));
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        *self.pty_size.lock().unwrap() = Some((clamp16(col_width, 80), clamp16(row_height, 24)));
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut RusshSession) -> Result<(), Self::Error> {
        session.channel_success(channel)?;

        if self.pty_size.lock().unwrap().is_none() {
            session.data(channel, CryptoVec::from(&b"a PTY is required, closing connection\r\n"[..]))?;
            session.close(channel)?;
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        self.line_tx = Some(tx);

        let mut transport = SshTransport {
            handle: session.handle().clone(),
            channel,
            lines: rx,
            remote_addr: self.remote_addr.clone(),
            pty_size: Arc::clone(&self.pty_size),
        };
        let deps = Arc::clone(&self.deps);
        let remote_addr = self.remote_addr.clone();
        let pubkey = self.pubkey.clone();

        tokio::spawn(async move {
            let admitted = DevzatSession::admit(deps, remote_addr, pubkey.as_deref(), &transport).await;
            match admitted {
                Ok(devzat_session) => {
                    if let Err(e) = devzat_session.run(&mut transport).await {
                        warn!(error = %e, "session loop ended with an error");
                    }
                }
                Err(_) => {
                    let _ = transport.write(b"connection refused\r\n").await;
                }
            }
            let _ = transport.close().await;
        });

        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut RusshSession) -> Result<(), Self::Error> {
        let Some(tx) = &self.line_tx else { return Ok(()) };
        for &byte in data {
            match byte {
                b'\r' | b'\n' => {
                    session.data(channel, CryptoVec::from(&b"\r\n"[..]))?;
                    let line = std::mem::take(&mut self.input_buffer);
                    if tx.try_send(line).is_err() {
                        warn!("session input queue full or closed, dropping line");
                    }
                }
                0x7f | 0x08 => {
                    if self.input_buffer.pop().is_some() {
                        session.data(channel, CryptoVec::from(&b"\x08 \x08"[..]))?;
                    }
                }
                0x03 => {
                    session.close(channel)?;
                }
                _ => {
                    self.input_buffer.push(byte);
                    session.data(channel, CryptoVec::from(std::slice::from_ref(&byte)))?;
                }
            }
        }
        Ok(())
    }
}

fn clamp16(value: u32, default: u16) -> u16 {
    if value == 0 {
        default
    } else {
        value.min(u16::MAX as u32) as u16
    }
}

struct SshTransport {
    handle: Handle,
    channel: ChannelId,
    lines: mpsc::Receiver<Vec<u8>>,
    remote_addr: String,
    pty_size: Arc<StdMutex<Option<(u16, u16)>>>,
}

#[async_trait]
impl PtyChannel for SshTransport {
    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.handle
            .data(self.channel, CryptoVec::from(data))
            .await
            .map_err(|_| anyhow::anyhow!("ssh channel closed"))
    }

    async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.lines.recv().await)
    }

    fn pty_size(&self) -> Option<(u16, u16)> {
        *self.pty_size.lock().unwrap()
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        let _ = self.handle.close(self.channel).await;
        Ok(())
    }
}
