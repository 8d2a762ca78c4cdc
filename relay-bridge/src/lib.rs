//! Forwards statsite sink output to an Instrumental collector.
//!
//! Statsite invokes its sink command after every flush and writes the aggregated metrics to the
//! command's standard input. This crate implements the sink:
//!
//! 1. [`Connector`] opens an authenticated session with the collector.
//! 2. [`Funnel`] translates every statsite record into a collector command using the
//!    [`ActionTable`] and writes it to the session.
//! 3. [`FeedbackEmitter`] sends the forwarded gauge values back to statsite, which resets gauges
//!    after every flush.
//!
//! [`run`] performs all three steps on a single thread with blocking I/O.
//!
//! ```no_run
//! use relay_config::Config;
//!
//! let config = Config::default();
//! let stdin = std::io::stdin().lock();
//! relay_bridge::run(&config, stdin).ok();
//! ```
#![warn(missing_docs)]

mod action;
mod connector;
mod feedback;
mod funnel;

use std::io::BufRead;

use relay_config::Config;

pub use self::action::*;
pub use self::connector::*;
pub use self::feedback::*;
pub use self::funnel::*;

/// An error that aborts [`run`].
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The session with the collector could not be established.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// Forwarding records failed.
    #[error(transparent)]
    Funnel(#[from] FunnelError),
}

impl BridgeError {
    /// Returns `true` if the collector declined the authentication token.
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::Connect(error) => error.is_authentication_failure(),
            Self::Funnel(_) => false,
        }
    }
}

/// Forwards all records from `input` to the collector and feeds gauges back to statsite.
///
/// The first error aborts the run. Gauge feedback is sent once the input is exhausted, including
/// when reading the input failed, but not when writing to the collector failed. The session is
/// closed before returning.
pub fn run<R: BufRead>(config: &Config, input: R) -> Result<FunnelReport, BridgeError> {
    let mut session = Connector::new(config).connect()?;
    match session.peer_addr() {
        Ok(addr) => relay_log::info!("authenticated with collector at {addr}"),
        Err(_) => relay_log::info!("authenticated with collector"),
    }

    let actions = ActionTable::from_config(config);
    let mut funnel = Funnel::new(config, &actions);
    let result = funnel.forward(input, &mut session);
    drop(session);

    let report = funnel.finish();
    match result {
        Err(error) if !error.is_read_error() => return Err(error.into()),
        result => {
            FeedbackEmitter::new(config).emit(&report.gauges);
            result?;
        }
    }

    relay_log::info!(
        forwarded = report.forwarded,
        dropped = report.dropped,
        gauges = report.gauges.len(),
        "forwarded metrics to collector"
    );

    Ok(report)
}
