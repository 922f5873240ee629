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

//! Congestion control dispatch.
//!
//! The per-stack [`Registry`] maps algorithm names to descriptors, and each
//! connection holds a [`CongestionState`] bound to one of them. The engine
//! feeds [`Event`]s into the state and acts on the returned [`Directives`].

use std::fmt;
use std::fmt::Debug;
use std::ops::BitOr;
use std::ops::BitOrAssign;
use std::str::FromStr;

use crate::window::WindowState;
use crate::Config;
use crate::Error;
use crate::Result;

/// Maximum length of an algorithm name, in bytes.
pub const ALGORITHM_NAME_LENGTH: usize = 32;

/// Number of built-in algorithms.
pub const ALGORITHM_COUNT: usize = 2;

/// Available congestion control algorithms.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// NewReno congestion control algorithm (default). `newreno` in a string
    /// form.
    #[default]
    NewReno = 0,
    /// CUBIC congestion control algorithm. `cubic` in a string form.
    Cubic   = 1,
}

impl Algorithm {
    /// Returns the registered name of the algorithm.
    pub fn name(self) -> &'static str {
        CC_TABLE[self as usize].name
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Converts a string to `Algorithm`.
    ///
    /// If `name` is not valid, `Error::CongestionControl` is returned.
    fn from_str(name: &str) -> Result<Self> {
        CC_TABLE
            .iter()
            .find(|desc| names_match(desc.name, name))
            .map(|desc| desc.algorithm)
            .ok_or(Error::CongestionControl)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compares two algorithm names as fixed-length strings.
fn names_match(a: &str, b: &str) -> bool {
    let a = &a.as_bytes()[..a.len().min(ALGORITHM_NAME_LENGTH)];
    let b = &b.as_bytes()[..b.len().min(ALGORITHM_NAME_LENGTH)];

    a == b
}

/// Causes carried by an event into a callback.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventFlags(u16);

impl EventFlags {
    /// The ACK carried an ECN echo.
    pub const ECN_ECHO: EventFlags = EventFlags(0x0001);

    /// The retransmit timer fired.
    pub const RETRANSMIT_TIMEOUT: EventFlags = EventFlags(0x0002);

    /// The ACK did not advance the acknowledged sequence.
    pub const DUPLICATE_ACK: EventFlags = EventFlags(0x0004);

    /// Returns an empty set.
    pub const fn empty() -> EventFlags {
        EventFlags(0)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether all causes in `other` are present.
    pub const fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no cause is present.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = Vec::new();

        if self.contains(EventFlags::ECN_ECHO) {
            names.push("ECE");
        }

        if self.contains(EventFlags::RETRANSMIT_TIMEOUT) {
            names.push("RTO");
        }

        if self.contains(EventFlags::DUPLICATE_ACK) {
            names.push("DUPACK");
        }

        write!(f, "[{}]", names.join("|"))
    }
}

/// Transmit directives produced by a callback.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Directives(u16);

impl Directives {
    /// Send new data now.
    pub const XMIT: Directives = Directives(0x0100);

    /// Retransmit the first unacknowledged segment.
    pub const REXMIT: Directives = Directives(0x0200);

    /// Send new data under limited transmit.
    pub const LIMIT_XMIT: Directives = Directives(0x0400);

    /// Retransmit using SACK information.
    pub const SACK_REXMIT: Directives = Directives(0x0800);

    /// Returns an empty set.
    pub const fn empty() -> Directives {
        Directives(0)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether all directives in `other` are present.
    pub const fn contains(self, other: Directives) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no directive is present.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Translates the directives into the engine's transmit flags.
    pub fn xmit_flags(&self) -> XmitFlags {
        XmitFlags {
            xmit_needed: self.contains(Directives::XMIT),
            rexmit_needed: self.contains(Directives::REXMIT),
            limit_xmit: self.contains(Directives::LIMIT_XMIT),
            need_sack_rexmit: self.contains(Directives::SACK_REXMIT),
        }
    }
}

impl BitOr for Directives {
    type Output = Directives;

    fn bitor(self, rhs: Directives) -> Directives {
        Directives(self.0 | rhs.0)
    }
}

impl BitOrAssign for Directives {
    fn bitor_assign(&mut self, rhs: Directives) {
        self.0 |= rhs.0;
    }
}

impl Debug for Directives {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.xmit_flags())
    }
}

/// What the engine has to do after a callback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XmitFlags {
    /// New data may be sent.
    pub xmit_needed: bool,

    /// The first unacknowledged segment must be retransmitted.
    pub rexmit_needed: bool,

    /// New data may be sent under limited transmit.
    pub limit_xmit: bool,

    /// SACK-based retransmission must run.
    pub need_sack_rexmit: bool,
}

/// An event raised by the engine against a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    /// Acknowledged sequence number of the segment being processed.
    pub seg_ack: u32,

    /// Causes of this event.
    pub flags: EventFlags,

    /// Current time, in clock ticks.
    pub now: u64,
}

impl Event {
    /// Creates a new event.
    pub fn new(seg_ack: u32, flags: EventFlags, now: u64) -> Event {
        Event {
            seg_ack,
            flags,
            now,
        }
    }

    pub(crate) fn is_dupack(&self) -> bool {
        self.flags.contains(EventFlags::DUPLICATE_ACK)
    }

    pub(crate) fn is_ece(&self) -> bool {
        self.flags.contains(EventFlags::ECN_ECHO)
    }

    pub(crate) fn is_rto(&self) -> bool {
        self.flags.contains(EventFlags::RETRANSMIT_TIMEOUT)
    }
}

/// Stack tunables visible to the algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    /// Duplicate ACKs needed to enter fast retransmit.
    pub dupack_fast_retransmit: u32,

    /// Initial window of new connections, in segments (0 = RFC 3390).
    pub slow_start_initial: u32,

    /// Window after an idle period, in segments (0 = RFC 3390).
    pub slow_start_after_idle: u32,

    /// Clock ticks per second.
    pub hz: u64,
}

impl Params {
    fn from_config(config: &Config) -> Params {
        Params {
            dupack_fast_retransmit: config.dupack_fast_retransmit,
            slow_start_initial: config.slow_start_initial,
            slow_start_after_idle: config.slow_start_after_idle,
            hz: config.hz,
        }
    }
}

/// Congestion control hooks.
///
/// One value implementing this trait is attached to each connection. It owns
/// whatever private state the algorithm needs and is dropped when the
/// connection is torn down or switches algorithm.
pub trait CongestionControl: Debug + Send {
    /// Seeds the private state from the connection's window. Optional.
    fn conn_init(&mut self, _tcp: &WindowState) {}

    /// An ACK (duplicate or not) was received.
    fn ack_received(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives;

    /// Congestion was signalled by duplicate ACKs, ECN or a timeout.
    fn cong_detected(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives;

    /// An ACK arrived during fast recovery.
    fn cong_recovered(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives;

    /// The connection resumes sending after being idle.
    fn post_idle(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives;
}

/// A registered algorithm.
#[derive(Clone, Copy)]
pub struct AlgorithmDescriptor {
    /// Unique name, at most [`ALGORITHM_NAME_LENGTH`] bytes.
    pub name: &'static str,

    /// The algorithm this descriptor builds.
    pub algorithm: Algorithm,

    attach: fn(now: u64) -> Box<dyn CongestionControl>,
}

impl AlgorithmDescriptor {
    /// Allocates a controller for a connection and runs its `conn_init`
    /// hook.
    fn attach(&self, tcp: &WindowState, now: u64) -> Box<dyn CongestionControl> {
        let mut cc = (self.attach)(now);

        cc.conn_init(tcp);

        cc
    }
}

impl Debug for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AlgorithmDescriptor")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

// Indexed by `Algorithm` discriminant.
static CC_TABLE: [AlgorithmDescriptor; ALGORITHM_COUNT] = [
    AlgorithmDescriptor {
        name: "newreno",
        algorithm: Algorithm::NewReno,
        attach: newreno::attach,
    },
    AlgorithmDescriptor {
        name: "cubic",
        algorithm: Algorithm::Cubic,
        attach: cubic::attach,
    },
];

/// Per-stack table of congestion control algorithms.
///
/// Built once by [`Registry::stack_init`] and immutable afterwards, so it can
/// be shared between connections without synchronization.
#[derive(Clone, Debug)]
pub struct Registry {
    algorithms: Vec<AlgorithmDescriptor>,

    default: usize,

    params: Params,
}

impl Registry {
    /// Builds a stack's registry from the built-in table.
    pub fn stack_init(config: &Config) -> Registry {
        let algorithms = CC_TABLE.to_vec();

        let default = algorithms
            .iter()
            .position(|desc| desc.algorithm == config.cc_algorithm)
            .unwrap_or(0);

        debug!(
            "cc stack init: algorithms={:?} default={}",
            algorithms.iter().map(|d| d.name).collect::<Vec<_>>(),
            algorithms[default].name
        );

        Registry {
            algorithms,
            default,
            params: Params::from_config(config),
        }
    }

    /// Returns the stack's tunables.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the descriptor new connections bind to.
    pub fn default_descriptor(&self) -> &AlgorithmDescriptor {
        &self.algorithms[self.default]
    }

    /// Looks up a descriptor by name.
    ///
    /// If `name` is not registered, `Error::CongestionControl` is returned.
    pub fn lookup(&self, name: &str) -> Result<&AlgorithmDescriptor> {
        self.algorithms
            .iter()
            .find(|desc| names_match(desc.name, name))
            .ok_or(Error::CongestionControl)
    }

    /// Returns the registered names, in table order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.algorithms.iter().map(|desc| desc.name)
    }

    /// Binds a new connection to the default algorithm.
    pub fn bind(
        &self, tcp: &WindowState, now: u64, trace_id: &str,
    ) -> CongestionState {
        let desc = self.default_descriptor();

        CongestionState::new(desc, self.params, tcp, now, trace_id)
    }

    /// Binds a new connection to the algorithm called `name`.
    pub fn bind_by_name(
        &self, name: &str, tcp: &WindowState, now: u64, trace_id: &str,
    ) -> Result<CongestionState> {
        let desc = self.lookup(name)?;

        Ok(CongestionState::new(desc, self.params, tcp, now, trace_id))
    }
}

/// Implicit phase of a connection, derived from its window state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// `cwnd` is below `ssthresh`.
    SlowStart,

    /// `cwnd` is at or above `ssthresh`.
    CongestionAvoidance,

    /// Enough duplicate ACKs arrived to enter fast recovery.
    FastRecovery,
}

/// Congestion control state of one connection.
pub struct CongestionState {
    algorithm: Algorithm,

    cc: Box<dyn CongestionControl>,

    params: Params,

    trace_id: String,
}

impl CongestionState {
    fn new(
        desc: &AlgorithmDescriptor, params: Params, tcp: &WindowState, now: u64,
        trace_id: &str,
    ) -> CongestionState {
        debug!("{} cc attach {}", trace_id, desc.name);

        CongestionState {
            algorithm: desc.algorithm,
            cc: desc.attach(tcp, now),
            params,
            trace_id: trace_id.to_string(),
        }
    }

    /// Returns the bound algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Rebinds the connection to another algorithm.
    ///
    /// The previous algorithm's private state is released before the new one
    /// is attached and seeded from the current window.
    pub fn set_algorithm(
        &mut self, desc: &AlgorithmDescriptor, tcp: &WindowState, now: u64,
    ) {
        debug!(
            "{} cc switch {} -> {}",
            self.trace_id, self.algorithm, desc.name
        );

        self.cc = desc.attach(tcp, now);
        self.algorithm = desc.algorithm;
    }

    /// Returns the phase the connection is in.
    pub fn phase(&self, tcp: &WindowState) -> Phase {
        if tcp.dupack_cnt >= self.params.dupack_fast_retransmit {
            Phase::FastRecovery
        } else if tcp.cwnd < tcp.ssthresh {
            Phase::SlowStart
        } else {
            Phase::CongestionAvoidance
        }
    }

    /// Handles a received ACK.
    pub fn ack_received(
        &mut self, tcp: &mut WindowState, ev: &Event,
    ) -> Directives {
        let out = self.cc.ack_received(tcp, ev, &self.params);

        self.trace("ack_received", tcp, ev, out);

        out
    }

    /// Handles a congestion signal.
    pub fn cong_detected(
        &mut self, tcp: &mut WindowState, ev: &Event,
    ) -> Directives {
        let out = self.cc.cong_detected(tcp, ev, &self.params);

        self.trace("cong_detected", tcp, ev, out);

        out
    }

    /// Handles an ACK received in fast recovery.
    pub fn cong_recovered(
        &mut self, tcp: &mut WindowState, ev: &Event,
    ) -> Directives {
        let out = self.cc.cong_recovered(tcp, ev, &self.params);

        self.trace("cong_recovered", tcp, ev, out);

        out
    }

    /// Handles a restart after idle.
    pub fn post_idle(&mut self, tcp: &mut WindowState, ev: &Event) -> Directives {
        let out = self.cc.post_idle(tcp, ev, &self.params);

        self.trace("post_idle", tcp, ev, out);

        out
    }

    fn trace(&self, hook: &str, tcp: &WindowState, ev: &Event, out: Directives) {
        debug_assert!(tcp.cwnd <= tcp.cwnd_max);

        trace!(
            "{} cc {} {} ack={} flags={:?} out={:?} {:?}",
            self.trace_id,
            self.algorithm,
            hook,
            ev.seg_ack,
            ev.flags,
            out,
            tcp
        );
    }
}

impl Debug for CongestionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {:?}", self.trace_id, self.cc)
    }
}

/// Marks the start of a congestion window reduction on ECN connections.
///
/// The boundary is the next sequence to send, not `suna + swnd`: only data
/// that is actually in flight can carry ECN information.
pub fn cwr_set(tcp: &mut WindowState) {
    if tcp.ecn_ok {
        tcp.cwr = true;
        tcp.ecn_cwr_sent = false;
        tcp.cwr_snd_max = tcp.snxt;
    }
}

/// Sets up the retransmission scope after fast retransmit.
///
/// Records the highest sequence sent so far, accounting for a queued FIN
/// that is not part of `unsent`. With SACK holes known, `pipe` is computed
/// from the forward-most SACKed sequence (Mathis and Mahdavi's FACK) and
/// SACK retransmission is requested. Otherwise a plain retransmit is
/// requested, and `pipe` is seeded from `ssthresh` on SACK connections so
/// that SACK information arriving later never meets an unset estimate.
pub fn set_rexmit(tcp: &mut WindowState, seg_ack: u32) -> Directives {
    tcp.rexmit_max = match tcp.fss {
        Some(fss) if tcp.unsent == 0 => fss,

        _ => tcp.snxt,
    };

    if tcp.has_sack_holes() {
        tcp.pipe = tcp.snxt.wrapping_sub(tcp.fack);
        tcp.sack_snxt = seg_ack;

        return Directives::SACK_REXMIT;
    }

    if tcp.snd_sack_ok {
        tcp.pipe = tcp.ssthresh;
    }

    Directives::REXMIT
}

/// `a >= b` in sequence space.
pub(crate) fn seq_geq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}


pub mod cubic;
mod newreno;

#[cfg(test)]
mod test_sender;
