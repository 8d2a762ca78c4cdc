//! Gauge feedback into statsite.
//!
//! Statsite resets gauges to zero after every flush, while the collector expects them to keep
//! their value. Submitting the forwarded gauge values back to statsite restores them for the next
//! interval, which makes statsite behave like statsd. See
//! <https://github.com/armon/statsite/issues/69>.
//!
//! Feedback is best effort. Failures are logged at debug level and never reported to the caller.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use relay_config::Config;

use crate::funnel::GaugeSample;

fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<UdpSocket> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses found"))?;

    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(local)?;
    socket.connect(addr)?;
    if !timeout.is_zero() {
        socket.set_write_timeout(Some(timeout))?;
    }

    Ok(socket)
}

/// Sends gauge samples to statsite as StatsD gauges.
#[derive(Debug)]
pub struct FeedbackEmitter<'a> {
    target: Option<(&'a str, u16)>,
    timeout: Duration,
}

impl<'a> FeedbackEmitter<'a> {
    /// Creates an emitter for the feedback target of the given config.
    pub fn new(config: &'a Config) -> Self {
        Self {
            target: config.feedback_addr(),
            timeout: config.timeout(),
        }
    }

    /// Returns `true` if a feedback target is configured.
    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Sends every sample as a separate `<key>:<value>|g` datagram.
    ///
    /// Does nothing if feedback is disabled. A failed datagram does not stop the remaining
    /// samples from being sent.
    pub fn emit(&self, samples: &[GaugeSample]) {
        let Some((host, port)) = self.target else {
            return;
        };

        let socket = match connect(host, port, self.timeout) {
            Ok(socket) => socket,
            Err(error) => {
                relay_log::debug!("skipping gauge feedback to {host}:{port}: {error}");
                return;
            }
        };

        let mut failed = 0;
        for sample in samples {
            let line = format!("{sample}\n");
            if socket.send(line.as_bytes()).is_err() {
                failed += 1;
            }
        }

        relay_log::debug!(
            "fed {} of {} gauges back to {host}:{port}",
            samples.len() - failed,
            samples.len()
        );
    }
}
