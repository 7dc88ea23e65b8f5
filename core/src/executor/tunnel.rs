//! Local TCP forwarding over an established SSH session.
//!
//! Binds an ephemeral localhost port and relays exactly one accepted
//! connection through a `direct-tcpip` channel to the remote endpoint. Both
//! the remote double hop (a second SSH session dialed through the proxy) and
//! the database tunnel (a SQL client dialed at the forwarded port) consume a
//! single connection, so one relay is all a task ever needs.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ssh2::Session;
use tracing::debug;

const IDLE_WAIT: Duration = Duration::from_millis(10);

/// A live port forward. Dropping the value stops the relay and releases the
/// local port; the owning task tears its tunnel down whether the task
/// succeeded or failed.
pub struct Tunnel {
    local_port: u16,
    stop: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl Tunnel {
    /// Start forwarding `127.0.0.1:<local_port>` to `remote_host:remote_port`
    /// through `session`. The session is moved into the relay thread and kept
    /// alive for the tunnel's lifetime.
    pub fn open(session: Session, remote_host: String, remote_port: u16) -> Result<Self, String> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .map_err(|e| format!("could not bind local tunnel port: {e}"))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| format!("could not read local tunnel address: {e}"))?
            .port();
        listener
            .set_nonblocking(true)
            .map_err(|e| format!("could not configure local tunnel listener: {e}"))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let pump = std::thread::spawn(move || {
            relay(listener, session, &remote_host, remote_port, &stop_flag);
        });

        Ok(Self {
            local_port,
            stop,
            pump: Some(pump),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

fn relay(
    listener: TcpListener,
    session: Session,
    remote_host: &str,
    remote_port: u16,
    stop: &AtomicBool,
) {
    let stream = loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match listener.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(IDLE_WAIT);
            }
            Err(e) => {
                debug!("tunnel accept failed: {e}");
                return;
            }
        }
    };

    let mut channel = match session.channel_direct_tcpip(remote_host, remote_port, None) {
        Ok(channel) => channel,
        Err(e) => {
            debug!("tunnel channel to {remote_host}:{remote_port} failed: {e}");
            return;
        }
    };

    if stream.set_nonblocking(true).is_err() {
        return;
    }
    // Nonblocking lets one thread interleave both directions on one session.
    session.set_blocking(false);

    let mut stream = stream;
    let mut buf = [0u8; 16384];
    let mut stream_open = true;
    let mut channel_open = true;

    while (stream_open || channel_open) && !stop.load(Ordering::Relaxed) {
        let mut idle = true;

        if stream_open {
            match stream.read(&mut buf) {
                Ok(0) => {
                    stream_open = false;
                    session.set_blocking(true);
                    let _ = channel.send_eof();
                    session.set_blocking(false);
                }
                Ok(n) => {
                    idle = false;
                    if write_all_nonblocking(&mut channel, &buf[..n], stop).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => return,
            }
        }

        if channel_open {
            match channel.read(&mut buf) {
                Ok(0) => {
                    channel_open = false;
                    let _ = stream.shutdown(std::net::Shutdown::Write);
                }
                Ok(n) => {
                    idle = false;
                    if write_all_nonblocking(&mut stream, &buf[..n], stop).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if channel.eof() {
                        channel_open = false;
                        let _ = stream.shutdown(std::net::Shutdown::Write);
                    }
                }
                Err(_) => return,
            }
        }

        if idle {
            std::thread::sleep(IDLE_WAIT);
        }
    }
}

fn write_all_nonblocking<W: Write>(dst: &mut W, mut buf: &[u8], stop: &AtomicBool) -> Result<(), ()> {
    while !buf.is_empty() {
        if stop.load(Ordering::Relaxed) {
            return Err(());
        }
        match dst.write(buf) {
            Ok(0) => return Err(()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(IDLE_WAIT);
            }
            Err(_) => return Err(()),
        }
    }
    Ok(())
}
