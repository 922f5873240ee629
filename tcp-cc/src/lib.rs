// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Pluggable congestion control for a TCP sender.
//!
//! This crate implements the decision logic a TCP engine consults whenever
//! an acknowledgment arrives, congestion is detected or recovered from, or a
//! connection resumes sending after an idle period. Two algorithms are
//! provided: NewReno (RFC 6582 / RFC 3042 limited transmit) and CUBIC, with
//! CUBIC's curve evaluated entirely in fixed point.
//!
//! The engine owns a [`WindowState`] per connection and binds it to an
//! algorithm through a per-stack [`Registry`]:
//!
//! ```
//! use tcp_cc::{Config, Event, EventFlags, Registry, WindowState};
//!
//! let mut config = Config::new();
//! config.set_cc_algorithm_name("cubic")?;
//!
//! let registry = Registry::stack_init(&config);
//!
//! let mut tcp = WindowState::new(1460, 1 << 20, registry.params());
//! let mut cc = registry.bind(&tcp, 0, "conn-1");
//!
//! tcp.snxt = 14_600;
//!
//! let ev = Event::new(1460, EventFlags::empty(), 1);
//! let out = cc.ack_received(&mut tcp, &ev);
//! assert!(!out.xmit_flags().rexmit_needed);
//! # Ok::<(), tcp_cc::Error>(())
//! ```
//!
//! All entry points run to completion without blocking. The caller is
//! expected to hold the connection's lock, which is reflected in every
//! callback taking the window state by mutable reference.

#![warn(missing_docs)]

#[macro_use]
extern crate log;

use std::str::FromStr;

/// A specialized [`Result`] type for congestion control operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// A congestion control error.
///
/// Callbacks themselves never fail; errors only come from selecting an
/// algorithm by name or from out-of-range tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested congestion control algorithm is not registered.
    #[error("unknown congestion control algorithm")]
    CongestionControl,

    /// A configuration value is outside its accepted range.
    #[error("invalid congestion control configuration")]
    InvalidConfig,
}

/// Default number of duplicate ACKs that triggers fast retransmit.
pub const DEFAULT_DUPACK_FAST_RETRANSMIT: u32 = 3;

/// Default clock resolution of the engine, in ticks per second.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 1000;

/// Stack-wide congestion control configuration.
///
/// A `Config` is consumed by [`Registry::stack_init`], which takes an
/// immutable snapshot of it. Changing a `Config` afterwards has no effect on
/// registries that were already created.
#[derive(Clone, Debug)]
pub struct Config {
    cc_algorithm: Algorithm,

    dupack_fast_retransmit: u32,

    slow_start_initial: u32,

    slow_start_after_idle: u32,

    hz: u64,
}

impl Config {
    /// Creates a config object with default values.
    pub fn new() -> Config {
        Config {
            cc_algorithm: Algorithm::default(),
            dupack_fast_retransmit: DEFAULT_DUPACK_FAST_RETRANSMIT,
            slow_start_initial: 0,
            slow_start_after_idle: 0,
            hz: DEFAULT_TICKS_PER_SECOND,
        }
    }

    /// Sets the default congestion control algorithm by name.
    ///
    /// The default value is `newreno`. On error `Error::CongestionControl`
    /// is returned.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut config = tcp_cc::Config::new();
    /// config.set_cc_algorithm_name("cubic")?;
    /// # Ok::<(), tcp_cc::Error>(())
    /// ```
    pub fn set_cc_algorithm_name(&mut self, name: &str) -> Result<()> {
        self.cc_algorithm = Algorithm::from_str(name)?;

        Ok(())
    }

    /// Sets the default congestion control algorithm.
    ///
    /// The default value is `Algorithm::NewReno`.
    pub fn set_cc_algorithm(&mut self, algo: Algorithm) {
        self.cc_algorithm = algo;
    }

    /// Sets the number of duplicate ACKs that triggers fast retransmit.
    ///
    /// The default value is `3`. Zero is rejected with
    /// `Error::InvalidConfig`.
    pub fn set_dupack_fast_retransmit(&mut self, v: u32) -> Result<()> {
        if v == 0 {
            return Err(Error::InvalidConfig);
        }

        self.dupack_fast_retransmit = v;

        Ok(())
    }

    /// Sets the initial congestion window of new connections, in segments.
    ///
    /// The default value is `0`, which selects the RFC 3390 rule.
    pub fn set_slow_start_initial(&mut self, segments: u32) {
        self.slow_start_initial = segments;
    }

    /// Sets the congestion window used when restarting after idle, in
    /// segments.
    ///
    /// The default value is `0`, which selects the RFC 3390 rule.
    pub fn set_slow_start_after_idle(&mut self, segments: u32) {
        self.slow_start_after_idle = segments;
    }

    /// Sets the resolution of the clock ticks passed in every [`Event`].
    ///
    /// The default value is `1000`. Zero is rejected with
    /// `Error::InvalidConfig`.
    pub fn set_ticks_per_second(&mut self, hz: u64) -> Result<()> {
        if hz == 0 {
            return Err(Error::InvalidConfig);
        }

        self.hz = hz;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

pub use crate::cc::cwr_set;
pub use crate::cc::set_rexmit;
pub use crate::cc::Algorithm;
pub use crate::cc::AlgorithmDescriptor;
pub use crate::cc::CongestionControl;
pub use crate::cc::CongestionState;
pub use crate::cc::Directives;
pub use crate::cc::Event;
pub use crate::cc::EventFlags;
pub use crate::cc::Params;
pub use crate::cc::Phase;
pub use crate::cc::Registry;
pub use crate::cc::XmitFlags;
pub use crate::window::NotSackBlock;
pub use crate::window::WindowState;

pub mod cc;
mod window;
