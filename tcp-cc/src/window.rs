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

use std::cmp;

use crate::cc::Params;

/// Initial slow-start threshold, the largest window TCP can advertise with
/// window scaling.
pub const INITIAL_SSTHRESH: u32 = 1 << 30;

/// Byte limit of the RFC 3390 initial window.
const RFC3390_INITIAL_BYTES: u32 = 4380;

/// A block of sequence space the peer has not selectively acknowledged.
///
/// The list of such blocks is maintained by the TCP engine. Congestion
/// control only checks whether any are known and discards them when fast
/// recovery completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotSackBlock {
    /// First sequence number of the hole.
    pub begin: u32,

    /// Sequence number just past the hole.
    pub end: u32,
}

/// The window and sequence fields of a connection that congestion control
/// reads and writes.
///
/// The connection owns this value. Callbacks only ever receive it by mutable
/// reference, which is how "mutated only while the connection lock is held"
/// is expressed.
#[derive(Clone)]
pub struct WindowState {
    /// Sender maximum segment size.
    pub mss: u32,

    /// Congestion window, in bytes.
    pub cwnd: u32,

    /// Slow-start threshold, in bytes.
    pub ssthresh: u32,

    /// Ceiling for the congestion window.
    pub cwnd_max: u32,

    /// Congestion avoidance pacing counter: bytes left before the next
    /// one-MSS increment.
    pub cwnd_cnt: i32,

    /// Number of consecutive duplicate ACKs.
    pub dupack_cnt: u32,

    /// Next sequence number to send.
    pub snxt: u32,

    /// Oldest unacknowledged sequence number.
    pub suna: u32,

    /// Sequence number of the FIN, once one has been queued.
    pub fss: Option<u32>,

    /// Bytes queued but not yet sent.
    pub unsent: u32,

    /// Whether SACK was negotiated.
    pub snd_sack_ok: bool,

    /// Known SACK holes.
    pub notsack: Vec<NotSackBlock>,

    /// Highest sequence number selectively acknowledged by the peer.
    pub fack: u32,

    /// Next sequence number to retransmit in SACK recovery.
    pub sack_snxt: u32,

    /// Estimate of bytes in the network during SACK recovery.
    pub pipe: u32,

    /// Highest sequence number sent when the last retransmission started.
    pub rexmit_max: u32,

    /// Whether a timeout retransmission is in progress.
    pub rexmit: bool,

    /// Number of retransmit timer backoffs for the current segment.
    pub timer_backoff: u32,

    /// Whether ECN was negotiated.
    pub ecn_ok: bool,

    /// Whether the connection is inside a congestion window reduction.
    pub cwr: bool,

    /// Whether CWR has been sent for the current reduction.
    pub ecn_cwr_sent: bool,

    /// End of the data in flight when the current reduction started.
    pub cwr_snd_max: u32,

    /// Smoothed round-trip time, in clock ticks.
    pub srtt: u64,

    /// Number of RTT samples folded into `srtt`.
    pub rtt_update: u32,
}

impl WindowState {
    /// Creates the window state of a new connection.
    ///
    /// The congestion window starts at the initial window selected by
    /// `params.slow_start_initial`.
    ///
    /// `mss` must be non-zero: every window computation is done in whole
    /// segments.
    pub fn new(mss: u32, cwnd_max: u32, params: &Params) -> WindowState {
        debug_assert!(mss > 0, "mss must be non-zero");

        let mut tcp = WindowState {
            mss,
            cwnd: 0,
            ssthresh: INITIAL_SSTHRESH,
            cwnd_max,
            cwnd_cnt: 0,
            dupack_cnt: 0,
            snxt: 0,
            suna: 0,
            fss: None,
            unsent: 0,
            snd_sack_ok: false,
            notsack: Vec::new(),
            fack: 0,
            sack_snxt: 0,
            pipe: 0,
            rexmit_max: 0,
            rexmit: false,
            timer_backoff: 0,
            ecn_ok: false,
            cwr: false,
            ecn_cwr_sent: false,
            cwr_snd_max: 0,
            srtt: 0,
            rtt_update: 0,
        };

        tcp.set_initial_cwnd(params.slow_start_initial);

        tcp
    }

    /// Resets the congestion window to the initial window.
    ///
    /// With a non-zero `segments` the window is that many segments. With
    /// zero it follows RFC 3390: `min(4 * MSS, max(2 * MSS, 4380))`, rounded
    /// down to whole segments. The result never exceeds `cwnd_max`.
    pub fn set_initial_cwnd(&mut self, segments: u32) {
        let mss = self.mss;

        let cwnd = if segments != 0 {
            segments.saturating_mul(mss)
        } else {
            cmp::min(
                4 * mss,
                cmp::max(2 * mss, RFC3390_INITIAL_BYTES / mss * mss),
            )
        };

        self.cwnd = cmp::min(cwnd, self.cwnd_max);
        self.cwnd_cnt = 0;
    }

    /// Returns the number of bytes sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.snxt.wrapping_sub(self.suna)
    }

    /// Whether the engine currently knows about SACK holes.
    pub fn has_sack_holes(&self) -> bool {
        self.snd_sack_ok && !self.notsack.is_empty()
    }

    /// Whether ECN was negotiated and the given event carries an echo.
    pub(crate) fn ecn_congested(&self, ece: bool) -> bool {
        self.ecn_ok && ece
    }
}

impl std::fmt::Debug for WindowState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "cwnd={} ssthresh={} cwnd_max={} cwnd_cnt={} dupack={} \
             in_flight={} pipe={} rexmit_max={} cwr={} backoff={}",
            self.cwnd,
            self.ssthresh,
            self.cwnd_max,
            self.cwnd_cnt,
            self.dupack_cnt,
            self.in_flight(),
            self.pipe,
            self.rexmit_max,
            self.cwr,
            self.timer_backoff,
        )
    }
}
