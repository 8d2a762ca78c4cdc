//! Configuration for the statsite relay.
//!
//! The configuration is loaded once at startup from built-in defaults, an optional YAML file and
//! overrides from the command line or environment. After that, the [`Config`] is immutable and is
//! passed by reference to every component of the relay.
//!
//! ```yaml
//! upstream:
//!   host: collector.instrumentalapp.com
//!   port: 8000
//!   token: "<api token>"
//!   timeout: 1m
//! keys:
//!   prefix: "web."
//!   postfix: ""
//!   timers: gauge
//! feedback:
//!   port: 8125
//! logging:
//!   level: info
//! ```
#![warn(missing_docs)]

mod config;
mod duration;

pub use self::config::*;
pub use self::duration::*;
