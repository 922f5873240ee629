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

//! CUBIC Congestion Control
//!
//! Window growth follows RFC 8312's cubic curve, computed in fixed point
//! (see [`math`]). Fast retransmit, fast recovery, slow start and timeout
//! handling are NewReno's; CUBIC only changes how the window grows in
//! congestion avoidance and how far it is cut on a congestion event.

use std::cmp;

use crate::cc;
use crate::cc::newreno;
use crate::window::WindowState;

use super::CongestionControl;
use super::Directives;
use super::Event;
use super::Params;

use self::math::CUBIC_BETA;
use self::math::CUBIC_FC_FACTOR;

pub mod math;

/// Smoothed RTT is not trusted until this many samples have been taken.
pub const CUBIC_MIN_RTT_SAMPLES: u32 = 8;

/// CUBIC per-connection state.
///
/// Times are in engine clock ticks.
#[derive(Debug, Default)]
pub(crate) struct Cubic {
    /// Cubic constant K, with `CUBIC_SHIFT` fractional bits.
    k: u64,

    /// cwnd at the most recent congestion event.
    wmax: u32,

    /// cwnd at the previous congestion event.
    prev_wmax: u32,

    /// Number of congestion events.
    cong_count: u32,

    /// RTT samples since the last congestion event.
    ack_count: u64,

    /// Time of the last congestion event.
    last_cong: u64,

    /// Minimum observed RTT, 0 until the first sample.
    min_rtt: u64,

    /// Mean RTT over the last epoch, never below 1.
    mean_rtt: u64,

    /// Sum of RTT samples in the current epoch.
    sum_rtt: u64,
}

pub(crate) fn attach(now: u64) -> Box<dyn CongestionControl> {
    Box::new(Cubic::new(now))
}

impl Cubic {
    fn new(now: u64) -> Cubic {
        Cubic {
            last_cong: now,
            min_rtt: 0,
            mean_rtt: 1,
            ..Default::default()
        }
    }

    fn record_rtt(&mut self, tcp: &WindowState) {
        let srtt = tcp.srtt;

        if self.min_rtt == 0 || self.min_rtt > srtt {
            self.min_rtt = cmp::max(1, srtt);

            // The epoch mean is only computed after congestion, so keep it
            // at least as large as the minimum until then.
            if self.min_rtt > self.mean_rtt {
                self.mean_rtt = self.min_rtt;
            }
        }

        self.sum_rtt = self.sum_rtt.saturating_add(srtt);
        self.ack_count += 1;
    }

    /// Starts a new congestion epoch and returns the reduced window in
    /// bytes.
    ///
    /// The very first reduction halves the data in flight. Later ones
    /// scale `wmax` by `CUBIC_BETA`.
    fn start_epoch(&mut self, tcp: &WindowState, now: u64) -> u32 {
        let first = self.cong_count == 0;

        self.cong_count += 1;
        self.last_cong = now;
        self.prev_wmax = self.wmax;
        self.wmax = tcp.cwnd;

        let w = if first {
            tcp.in_flight() >> 1
        } else {
            math::calc_factor(self.wmax, CUBIC_BETA)
        };

        debug!(
            "cubic epoch {}: wmax={} prev_wmax={} reduced={}",
            self.cong_count, self.wmax, self.prev_wmax, w
        );

        w
    }
}

impl CongestionControl for Cubic {
    fn conn_init(&mut self, tcp: &WindowState) {
        self.wmax = tcp.cwnd;
    }

    fn ack_received(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives {
        // Fast recovery window accounting is standard TCP's.
        if ev.is_dupack() {
            return newreno::ack_received(tcp, ev, params);
        }

        if tcp.rtt_update >= CUBIC_MIN_RTT_SAMPLES {
            self.record_rtt(tcp);
        }

        let cwnd = tcp.cwnd;
        let mss = tcp.mss;

        if !tcp.ecn_congested(ev.is_ece()) && cwnd < tcp.ssthresh {
            tcp.cwnd = cmp::min(cwnd.saturating_add(mss), tcp.cwnd_max);

            return Directives::empty();
        }

        let tm = ev.now.saturating_sub(self.last_cong);

        let w_aimd = math::aimd_window(tm, self.mean_rtt, self.wmax, mss);
        let w_cubic = math::cubic_window(
            tm.saturating_add(self.mean_rtt),
            self.wmax,
            mss,
            self.k,
            params.hz,
        );

        if w_cubic < w_aimd {
            // TCP friendly region.
            tcp.cwnd = cmp::min(tcp.cwnd_max, w_aimd);
        } else if cwnd < w_cubic {
            // Concave or convex region: (w_cubic - cwnd) / cwnd per ACK.
            let inc = u64::from(w_cubic - cwnd) * u64::from(mss) /
                u64::from(cmp::max(cwnd, 1));
            let target = u64::from(cwnd) + inc;

            tcp.cwnd = cmp::min(u64::from(tcp.cwnd_max), target) as u32;
        }

        if self.cong_count == 0 && self.wmax < tcp.cwnd {
            self.wmax = tcp.cwnd;
        }

        Directives::empty()
    }

    fn cong_detected(
        &mut self, tcp: &mut WindowState, ev: &Event, _params: &Params,
    ) -> Directives {
        let mss = tcp.mss;
        let mut out = Directives::empty();

        if ev.is_dupack() {
            if !tcp.cwr {
                let npkt = self.start_epoch(tcp, ev.now) / mss;

                tcp.ssthresh = cmp::max(npkt, 2) * mss;
                tcp.cwnd = cmp::min(
                    npkt.saturating_add(tcp.dupack_cnt).saturating_mul(mss),
                    tcp.cwnd_max,
                );
            }

            cc::cwr_set(tcp);
            out |= cc::set_rexmit(tcp, ev.seg_ack);
        } else if ev.is_ece() {
            if tcp.ecn_ok && !tcp.cwr {
                let npkt = self.start_epoch(tcp, ev.now) / mss;

                tcp.ssthresh = cmp::max(npkt, 2) * mss;
                tcp.cwnd = cmp::min(npkt * mss, tcp.cwnd_max);

                cc::cwr_set(tcp);
            }
        } else if ev.is_rto() {
            // Only count repeated timeouts as congestion, a single one may
            // be spurious.
            if tcp.timer_backoff > 0 {
                self.cong_count += 1;
                self.last_cong = ev.now;
            }

            out |= newreno::cong_detected(tcp, ev);
        }

        out
    }

    fn cong_recovered(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives {
        // Fast convergence: release bandwidth faster while wmax trends down.
        if self.wmax < self.prev_wmax {
            self.wmax = math::calc_factor(self.wmax, CUBIC_FC_FACTOR);
        }

        let out = newreno::cong_recovered(tcp, ev, params);

        if tcp.ssthresh < tcp.in_flight() {
            tcp.cwnd =
                cmp::min(tcp.cwnd_max, math::calc_factor(self.wmax, CUBIC_BETA));
        }

        if self.ack_count > 0 && self.sum_rtt >= self.ack_count {
            self.mean_rtt = self.sum_rtt / self.ack_count;
        }

        self.last_cong = ev.now;
        self.ack_count = 0;
        self.sum_rtt = 0;
        self.k = math::cubic_k(self.wmax / tcp.mss);

        debug!(
            "cubic recovered: wmax={} k={} mean_rtt={} cwnd={}",
            self.wmax, self.k, self.mean_rtt, tcp.cwnd
        );

        out
    }

    fn post_idle(
        &mut self, tcp: &mut WindowState, _ev: &Event, params: &Params,
    ) -> Directives {
        newreno::post_idle(tcp, params)
    }
}
