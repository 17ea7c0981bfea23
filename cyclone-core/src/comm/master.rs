//! Bind-side comm endpoint (spec §4.3). One bound TCP endpoint serves many
//! concurrent controller connections, but the thing the dispatch loop talks
//! to stays a single-threaded request/reply surface: every connection's
//! reader/writer thread forwards exactly one in-flight request at a time
//! into a shared inbox, and can only answer it once (the reply channel is a
//! one-shot).

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::msg::{read_frame, write_frame, Message};

/// One pending request: the decoded message plus the one-shot reply channel
/// back to the connection that sent it.
pub struct Envelope {
    pub message: Message,
    reply: oneshot::Sender<Message>,
}

impl Envelope {
    /// Sends `reply` back down the originating connection. A failure here
    /// means the connection already dropped; the dispatch loop logs and
    /// moves on rather than treating it as fatal (spec §4.7: a lost
    /// controller is discovered through heartbeat/request timeout, not
    /// through a failed reply).
    pub fn reply(self, reply: Message) -> Result<()> {
        self.reply
            .send(reply)
            .map_err(|_| Error::transport("peer connection already closed"))
    }
}

/// The master's bind-side endpoint: accepts any number of controller
/// connections, each enforcing strict request/reply on its own socket, and
/// exposes them to the single-threaded dispatch loop as one ordered inbox.
pub struct MasterEndpoint {
    inbox: Mutex<mpsc::Receiver<Envelope>>,
}

impl MasterEndpoint {
    /// Binds `target:port` and starts the acceptor thread (spec §4.3: "the
    /// server binds once, for the lifetime of the process").
    pub fn bind(target: &str, port: u16, poll_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind((target, port))
            .map_err(|e| Error::resource(format!("bind {target}:{port} failed: {e}")))?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("cyclone-comm-acceptor".into())
            .spawn(move || accept_loop(listener, tx, poll_timeout))
            .map_err(|e| Error::resource(format!("failed to spawn acceptor thread: {e}")))?;
        Ok(Self {
            inbox: Mutex::new(rx),
        })
    }

    /// Waits up to `timeout` for the next request from any connection.
    /// `Ok(None)` on a clean timeout, matching spec §4.7's poll-timeout
    /// branch; `Err(Error::Closed)` only if the acceptor thread itself died.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>> {
        match self.inbox.lock().recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }
}

fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Envelope>, poll_timeout: Duration) {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed, continuing");
                continue;
            }
        };
        let tx = tx.clone();
        let name = format!(
            "cyclone-comm-conn-{}",
            stream.peer_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        if let Err(e) = thread::Builder::new()
            .name(name)
            .spawn(move || connection_loop(stream, tx, poll_timeout))
        {
            warn!(error = %e, "failed to spawn connection thread");
        }
    }
}

/// Repeatedly: read one frame, forward it with a fresh one-shot reply
/// channel, block for the reply, write it back. A decode error fails only
/// that one frame (spec §4.1/§7: log a warning, reply `Acknowledge` to keep
/// the socket balanced, keep the connection alive); any other I/O or
/// transport failure drops the connection.
fn connection_loop(mut stream: TcpStream, tx: mpsc::Sender<Envelope>, poll_timeout: Duration) {
    if let Err(e) = stream.set_read_timeout(Some(poll_timeout)) {
        warn!(error = %e, "failed to set read timeout, dropping connection");
        return;
    }
    loop {
        let message = match read_frame(&mut stream) {
            Ok(msg) => msg,
            Err(Error::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(Error::Decode(e)) => {
                warn!(error = %e, "malformed frame, acknowledging without dispatching");
                if let Err(e) = write_frame(&mut stream, &Message::Acknowledge) {
                    debug!(error = %e, "write failed, dropping connection");
                    return;
                }
                continue;
            }
            Err(e) => {
                debug!(error = %e, "connection closed");
                return;
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            message,
            reply: reply_tx,
        };
        if tx.send(envelope).is_err() {
            warn!("dispatch loop inbox closed, dropping connection");
            return;
        }
        let reply = match reply_rx.recv() {
            Ok(reply) => reply,
            Err(_) => {
                debug!("dispatch loop dropped without replying");
                return;
            }
        };
        if let Err(e) = write_frame(&mut stream, &reply) {
            debug!(error = %e, "write failed, dropping connection");
            return;
        }
    }
}
