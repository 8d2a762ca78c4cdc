//! A statsite sink that forwards aggregated metrics to an Instrumental collector.
//!
//! Statsite runs the sink command after every flush interval and writes the flushed metrics to
//! its standard input, one record per line:
//!
//! ```text
//! <kind>.<key>|<value>|<timestamp>
//! ```
//!
//! Every record is translated into a collector command and sent over an authenticated TCP
//! session. Forwarded gauges are reported back to statsite over UDP so they survive the next
//! flush.
//!
//! # Usage
//!
//! ```text
//! statsite-relay [OPTIONS] <TOKEN>
//! ```
//!
//! Configure statsite with:
//!
//! ```text
//! [sink]
//! command = statsite-relay --prefix app. <TOKEN>
//! ```
//!
//! # Workspace Crates
//!
//!  - `statsite-relay`: Main entry point and command line interface.
//!  - [`relay-bridge`]: Connection, translation and feedback pipeline.
//!  - [`relay-common`]: Common utilities.
//!  - [`relay-config`]: Static configuration for the CLI.
//!  - [`relay-log`]: Error reporting and logging.
//!
//! [`relay-bridge`]: ../relay_bridge/index.html
//! [`relay-common`]: ../relay_common/index.html
//! [`relay-config`]: ../relay_config/index.html
//! [`relay-log`]: ../relay_log/index.html

mod cli;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            relay_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
