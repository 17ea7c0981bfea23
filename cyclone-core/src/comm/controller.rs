//! Connect-side comm endpoint (spec §4.3). Modeled directly on
//! `roboplc::comm::tcp::Tcp`: a lazily-(re)connected stream behind a mutex,
//! destructive reconnect on any I/O trouble.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::msg::{read_frame, write_frame, Message};

/// The controller's connect-side endpoint: connects lazily on first send,
/// applies `poll_timeout` as the read timeout, reconnects (close + rebuild)
/// on any I/O error.
pub struct ControllerEndpoint {
    addr: String,
    connect_timeout: Duration,
    poll_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl ControllerEndpoint {
    /// Creates a new endpoint. Does not connect yet — the first
    /// [`ControllerEndpoint::send`] does that (spec §4.3: "the client is
    /// automatically connected when the first request is made").
    pub fn new(target: &str, port: u16, poll_timeout: Duration) -> Self {
        Self {
            addr: format!("{target}:{port}"),
            connect_timeout: Duration::from_secs(5),
            poll_timeout,
            stream: Mutex::new(None),
        }
    }

    /// Sends `msg` on the connection, (re)connecting first if necessary.
    pub fn send(&self, msg: &Message) -> Result<()> {
        let mut guard = self.get_stream()?;
        let stream = guard.as_mut().expect("connected above");
        write_frame(stream, msg).map_err(|e| {
            guard.take();
            e
        })
    }

    /// Blocks up to `poll_timeout` for a reply; `Ok(None)` on a clean
    /// timeout (spec §4.3 "on expiry the receive returns absence rather
    /// than blocking forever"), `Err` on any other transport trouble
    /// (which also triggers a reconnect on the next call).
    pub fn recv(&self) -> Result<Option<Message>> {
        let mut guard = self.get_stream()?;
        let stream = guard.as_mut().expect("connected above");
        match read_frame(stream) {
            Ok(msg) => Ok(Some(msg)),
            Err(Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => {
                guard.take();
                Err(e)
            }
        }
    }

    /// Forces a reconnect on the next send/recv (spec §4.3 "reconnect is
    /// destructive: close + rebuild").
    pub fn reconnect(&self) {
        self.stream.lock().take();
    }

    fn get_stream(&self) -> Result<parking_lot::MutexGuard<'_, Option<TcpStream>>> {
        let mut guard = self.stream.lock();
        if guard.is_none() {
            let addr = self
                .addr
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Error::transport(format!("invalid address: {}", self.addr)))?;
            let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
            stream.set_read_timeout(Some(self.poll_timeout))?;
            stream.set_write_timeout(Some(self.poll_timeout))?;
            stream.set_nodelay(true)?;
            guard.replace(stream);
        }
        Ok(guard)
    }
}
