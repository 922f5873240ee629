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

//! NewReno Congestion Control
//!
//! Slow start and congestion avoidance per RFC 5681, limited transmit per
//! RFC 3042 and fast recovery with partial ACK handling per RFC 6582.
//!
//! The phase is implicit: `cwnd < ssthresh` is slow start, anything else is
//! congestion avoidance, and `dupack_cnt` reaching the fast retransmit
//! threshold means fast recovery.
//!
//! The functions here are shared with CUBIC, which only overrides window
//! growth and reduction.

use std::cmp;

use crate::cc;
use crate::window::WindowState;

use super::CongestionControl;
use super::Directives;
use super::Event;
use super::Params;

/// NewReno keeps no private state.
#[derive(Debug, Default)]
pub(crate) struct NewReno;

pub(crate) fn attach(_now: u64) -> Box<dyn CongestionControl> {
    Box::new(NewReno)
}

impl CongestionControl for NewReno {
    fn ack_received(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives {
        ack_received(tcp, ev, params)
    }

    fn cong_detected(
        &mut self, tcp: &mut WindowState, ev: &Event, _params: &Params,
    ) -> Directives {
        cong_detected(tcp, ev)
    }

    fn cong_recovered(
        &mut self, tcp: &mut WindowState, ev: &Event, params: &Params,
    ) -> Directives {
        cong_recovered(tcp, ev, params)
    }

    fn post_idle(
        &mut self, tcp: &mut WindowState, _ev: &Event, params: &Params,
    ) -> Directives {
        post_idle(tcp, params)
    }
}

pub(crate) fn ack_received(
    tcp: &mut WindowState, ev: &Event, params: &Params,
) -> Directives {
    let mss = tcp.mss;
    let mut out = Directives::empty();

    if ev.is_dupack() {
        if tcp.dupack_cnt < params.dupack_fast_retransmit {
            // Limited transmit: each duplicate lets one more new segment
            // out, so the k-th one inflates cwnd by `mss << (k - 1)`. On SACK
            // connections only once the peer has reported holes.
            if tcp.unsent > 0 && (!tcp.snd_sack_ok || tcp.has_sack_holes()) {
                let shift = tcp.dupack_cnt.saturating_sub(1).min(31);
                let inc = mss.checked_shl(shift).unwrap_or(u32::MAX);

                tcp.cwnd = cmp::min(tcp.cwnd.saturating_add(inc), tcp.cwnd_max);
                out |= Directives::LIMIT_XMIT;
            }
        } else if tcp.dupack_cnt > params.dupack_fast_retransmit {
            // Fast recovery: one more segment has left the network.
            if tcp.has_sack_holes() {
                tcp.pipe = tcp.pipe.saturating_sub(mss);
                out |= Directives::SACK_REXMIT;
            } else {
                tcp.cwnd = cmp::min(tcp.cwnd.saturating_add(mss), tcp.cwnd_max);

                if tcp.unsent > 0 {
                    out |= Directives::XMIT;
                }
            }
        }

        // dupack_cnt == threshold is handled by cong_detected().
        return out;
    }

    if tcp.ecn_congested(ev.is_ece()) {
        return out;
    }

    let cwnd = tcp.cwnd;
    let mut add = mss;

    if cwnd >= tcp.ssthresh {
        // Congestion avoidance. Never grow by less than one MSS: the pacing
        // counter is seeded with one window worth of bytes and a full MSS is
        // granted once ACKs have drained it.
        if tcp.cwnd_cnt <= 0 {
            tcp.cwnd_cnt = clamp_cnt(cwnd.saturating_add(add));
            add = 0;
        } else {
            tcp.cwnd_cnt -= clamp_cnt(add);

            if tcp.cwnd_cnt > 0 {
                add = 0;
            }
        }
    }

    tcp.cwnd = cmp::min(cwnd.saturating_add(add), tcp.cwnd_max);

    out
}

pub(crate) fn cong_detected(tcp: &mut WindowState, ev: &Event) -> Directives {
    let mss = tcp.mss;
    let mut out = Directives::empty();

    // Half the number of segments in flight.
    let mut npkt = (tcp.in_flight() >> 1) / mss;

    if ev.is_dupack() {
        // A reduction already done for ECN is not repeated until a window of
        // data has gone by and cwr has been cleared.
        if !tcp.cwr {
            tcp.ssthresh = cmp::max(npkt, 2) * mss;
            tcp.cwnd = cmp::min(
                npkt.saturating_add(tcp.dupack_cnt).saturating_mul(mss),
                tcp.cwnd_max,
            );

            debug!(
                "newreno dupack congestion: ssthresh={} cwnd={}",
                tcp.ssthresh, tcp.cwnd
            );
        }

        cc::cwr_set(tcp);
        out |= cc::set_rexmit(tcp, ev.seg_ack);
    } else if ev.is_ece() {
        if tcp.ecn_ok && !tcp.cwr {
            tcp.ssthresh = cmp::max(npkt, 2) * mss;
            tcp.cwnd = cmp::min(npkt * mss, tcp.cwnd_max);

            debug!(
                "newreno ecn congestion: ssthresh={} cwnd={}",
                tcp.ssthresh, tcp.cwnd
            );

            cc::cwr_set(tcp);
        }
    } else if ev.is_rto() {
        // Back to slow start. ssthresh is left alone if it was already
        // reduced for ECN, unless this timeout is for a retransmission.
        if !tcp.cwr || tcp.rexmit {
            // Reads ssthresh before it is reassigned below.
            if tcp.timer_backoff > 0 {
                npkt = tcp.ssthresh / mss;
            }

            tcp.ssthresh = cmp::max(npkt, 2) * mss;
        }

        tcp.cwnd = cmp::min(mss, tcp.cwnd_max);
        tcp.cwnd_cnt = 0;

        debug!(
            "newreno rto congestion: ssthresh={} cwnd={} backoff={}",
            tcp.ssthresh, tcp.cwnd, tcp.timer_backoff
        );

        cc::cwr_set(tcp);
    }

    out
}

pub(crate) fn cong_recovered(
    tcp: &mut WindowState, ev: &Event, params: &Params,
) -> Directives {
    let mss = tcp.mss;
    let mut out = Directives::empty();

    debug_assert!(tcp.dupack_cnt >= params.dupack_fast_retransmit);
    debug_assert!(!tcp.rexmit);

    if cc::seq_geq(ev.seg_ack, tcp.rexmit_max) {
        // Full ACK: leave fast recovery and take back the inflation.
        tcp.dupack_cnt = 0;

        if tcp.cwnd > tcp.ssthresh {
            tcp.cwnd = tcp.ssthresh;
        }

        tcp.rexmit_max = ev.seg_ack;
        tcp.cwnd_cnt = 0;

        // Stale holes would confuse the next recovery.
        if tcp.snd_sack_ok {
            tcp.notsack.clear();
        }
    } else if tcp.has_sack_holes() {
        tcp.pipe = tcp.pipe.saturating_sub(mss);
        out |= Directives::SACK_REXMIT;
    } else {
        // Partial ACK: retransmit the next hole and stay in recovery, with
        // cwnd scaled back to where fast recovery started.
        let inflation = params.dupack_fast_retransmit.saturating_mul(mss);

        tcp.cwnd =
            cmp::min(tcp.ssthresh.saturating_add(inflation), tcp.cwnd_max);
        tcp.cwnd_cnt = clamp_cnt(tcp.cwnd);
        out |= Directives::REXMIT;
    }

    out
}

pub(crate) fn post_idle(tcp: &mut WindowState, params: &Params) -> Directives {
    tcp.set_initial_cwnd(params.slow_start_after_idle);

    Directives::empty()
}

fn clamp_cnt(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::cc::test_sender::TestSender;
    use crate::cc::Algorithm;
    use crate::cc::EventFlags;
    use crate::window::NotSackBlock;

    const MSS: u32 = 1460;

    fn test_sender() -> TestSender {
        TestSender::new(Algorithm::NewReno, MSS)
    }

    #[test]
    fn newreno_slow_start() {
        let mut sender = test_sender();
        sender.cwnd = 2920;
        sender.ssthresh = 29200;

        let out = sender.ack(MSS);

        assert!(out.is_empty());
        assert_eq!(sender.cwnd, 4380);
    }

    #[test]
    fn newreno_slow_start_multi_acks() {
        let mut sender = test_sender();
        sender.ssthresh = 1 << 20;

        let cwnd_prev = sender.cwnd;

        for _ in 0..5 {
            sender.ack(MSS);
        }

        assert_eq!(sender.cwnd, cwnd_prev + 5 * MSS);
    }

    #[test]
    fn newreno_slow_start_capped() {
        let mut sender =
            TestSender::with_cwnd_max(Algorithm::NewReno, MSS, 10000);

        for _ in 0..20 {
            sender.ack(MSS);
            assert!(sender.cwnd <= 10000);
        }

        assert_eq!(sender.cwnd, 10000);
    }

    #[test]
    fn newreno_ecn_echo_freezes_growth() {
        let mut sender = test_sender();
        sender.ecn_ok = true;

        let cwnd_prev = sender.cwnd;

        sender.ack_with(MSS, EventFlags::ECN_ECHO);
        assert_eq!(sender.cwnd, cwnd_prev);

        // Without ECN negotiated the echo is meaningless.
        sender.ecn_ok = false;
        sender.ack_with(MSS, EventFlags::ECN_ECHO);
        assert_eq!(sender.cwnd, cwnd_prev + MSS);
    }

    #[test]
    fn newreno_congestion_avoidance_pacing() {
        let mut sender = test_sender();
        sender.cwnd = 29200;
        sender.ssthresh = 29200;

        sender.ack(MSS);

        // The counter is seeded, cwnd is untouched.
        assert_eq!(sender.cwnd_cnt, 29200 + 1460);
        assert_eq!(sender.cwnd, 29200);

        // 30660 / 1460 = 21 ACKs drain the counter.
        for _ in 0..20 {
            sender.ack(MSS);
            assert_eq!(sender.cwnd, 29200);
        }

        sender.ack(MSS);
        assert_eq!(sender.cwnd, 29200 + MSS);
        assert_eq!(sender.cwnd_cnt, 0);

        // And the next ACK starts a new round.
        sender.ack(MSS);
        assert_eq!(sender.cwnd, 29200 + MSS);
        assert_eq!(sender.cwnd_cnt, (29200 + 2 * MSS) as i32);
    }

    #[rstest]
    fn newreno_limited_transmit(#[values(false, true)] sack: bool) {
        let mut sender = test_sender();
        sender.unsent = 100_000;
        sender.ssthresh = 1 << 20;

        if sack {
            sender.snd_sack_ok = true;
            sender.notsack.push(NotSackBlock {
                begin: 0,
                end: MSS,
            });
        }

        let mut cwnd = sender.cwnd;

        for k in 1..3 {
            let out = sender.dup_ack();

            assert!(out.xmit_flags().limit_xmit);
            assert_eq!(sender.cwnd, cwnd + (MSS << (k - 1)));

            cwnd = sender.cwnd;
        }
    }

    #[test]
    fn newreno_limited_transmit_needs_data_and_sack_info() {
        let mut sender = test_sender();

        // Nothing to send.
        let cwnd = sender.cwnd;
        assert!(sender.dup_ack().is_empty());
        assert_eq!(sender.cwnd, cwnd);

        // SACK connection without holes reported yet.
        let mut sender = test_sender();
        sender.unsent = 10_000;
        sender.snd_sack_ok = true;

        assert!(sender.dup_ack().is_empty());
        assert_eq!(sender.cwnd, cwnd);
    }

    #[test]
    fn newreno_limited_transmit_capped() {
        let mut sender = TestSender::with_cwnd_max(Algorithm::NewReno, MSS, 6000);
        sender.unsent = 100_000;

        sender.dup_ack();
        sender.dup_ack();

        assert_eq!(sender.cwnd, 6000);
    }

    #[test]
    fn newreno_dupack_at_threshold_is_noop() {
        let mut sender = test_sender();
        sender.unsent = 100_000;
        sender.dupack_cnt = 2;

        let cwnd = sender.cwnd;
        let out = sender.dup_ack();

        assert_eq!(sender.dupack_cnt, 3);
        assert!(out.is_empty());
        assert_eq!(sender.cwnd, cwnd);
    }

    #[test]
    fn newreno_fast_recovery_inflation() {
        let mut sender = test_sender();
        sender.dupack_cnt = 3;

        let cwnd = sender.cwnd;

        let out = sender.dup_ack();
        assert_eq!(sender.cwnd, cwnd + MSS);
        assert!(out.is_empty());

        sender.unsent = 1000;
        let out = sender.dup_ack();
        assert_eq!(sender.cwnd, cwnd + 2 * MSS);
        assert!(out.xmit_flags().xmit_needed);
    }

    #[test]
    fn newreno_fast_recovery_inflation_capped() {
        let mut sender =
            TestSender::with_cwnd_max(Algorithm::NewReno, MSS, 5000);
        sender.unsent = 100_000;
        sender.dupack_cnt = 3;

        for _ in 0..5 {
            let out = sender.dup_ack();

            assert!(out.xmit_flags().xmit_needed);
            assert!(sender.cwnd <= 5000);
        }

        assert_eq!(sender.cwnd, 5000);
    }

    #[test]
    fn newreno_fast_recovery_sack_pipe() {
        let mut sender = test_sender();
        sender.dupack_cnt = 3;
        sender.snd_sack_ok = true;
        sender.notsack.push(NotSackBlock {
            begin: 0,
            end: MSS,
        });
        sender.pipe = 2000;

        let out = sender.dup_ack();
        assert!(out.xmit_flags().need_sack_rexmit);
        assert_eq!(sender.pipe, 2000 - MSS);

        sender.dup_ack();
        assert_eq!(sender.pipe, 0);
    }

    #[test]
    fn newreno_dupack_congestion() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.dupack_cnt = 3;

        let out = sender.detect(EventFlags::DUPLICATE_ACK);

        // (40000 / 2) / 1460 = 13 segments.
        assert_eq!(sender.ssthresh, 13 * 1460);
        assert_eq!(sender.ssthresh, 18980);
        assert_eq!(sender.cwnd, (13 + 3) * 1460);
        assert_eq!(sender.rexmit_max, 40000);
        assert!(out.xmit_flags().rexmit_needed);
    }

    #[test]
    fn newreno_dupack_congestion_during_cwr() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.dupack_cnt = 3;
        sender.ecn_ok = true;
        sender.cwr = true;

        let cwnd = sender.cwnd;
        let ssthresh = sender.ssthresh;

        let out = sender.detect(EventFlags::DUPLICATE_ACK);

        // Window left alone, but retransmission still happens.
        assert_eq!(sender.cwnd, cwnd);
        assert_eq!(sender.ssthresh, ssthresh);
        assert!(out.xmit_flags().rexmit_needed);
        assert_eq!(sender.cwr_snd_max, 40000);
    }

    #[test]
    fn newreno_dupack_congestion_wins_over_ecn() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.ecn_ok = true;
        sender.dupack_cnt = 3;

        let flags = EventFlags::DUPLICATE_ACK | EventFlags::ECN_ECHO;
        let out = sender.detect(flags);

        // Inflated by the duplicates, not the ECN-only 13 * MSS.
        assert_eq!(sender.ssthresh, 18980);
        assert_eq!(sender.cwnd, (13 + 3) * MSS);
        assert!(out.xmit_flags().rexmit_needed);
        assert_eq!(sender.rexmit_max, 40000);
        assert!(sender.cwr);
        assert_eq!(sender.cwr_snd_max, 40000);
    }

    #[test]
    fn newreno_ecn_congestion() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.ecn_ok = true;

        let out = sender.detect(EventFlags::ECN_ECHO);

        assert!(out.is_empty());
        assert_eq!(sender.ssthresh, 18980);
        assert_eq!(sender.cwnd, 18980);
        assert!(sender.cwr);

        // Already reducing: a second echo changes nothing.
        sender.cwnd = 20000;
        sender.detect(EventFlags::ECN_ECHO);
        assert_eq!(sender.cwnd, 20000);
    }

    #[test]
    fn newreno_ecn_congestion_requires_negotiation() {
        let mut sender = test_sender();
        sender.send(40000);

        let cwnd = sender.cwnd;
        sender.detect(EventFlags::ECN_ECHO);

        assert_eq!(sender.cwnd, cwnd);
        assert!(!sender.cwr);
    }

    #[test]
    fn newreno_small_flight_keeps_two_segments() {
        let mut sender = test_sender();
        sender.send(MSS);
        sender.dupack_cnt = 3;

        sender.detect(EventFlags::DUPLICATE_ACK);

        assert_eq!(sender.ssthresh, 2 * MSS);
        assert_eq!(sender.cwnd, 3 * MSS);
    }

    #[rstest]
    #[case::first_timeout(0, 40000, 18980)]
    #[case::backed_off(1, 40000, 29200)]
    #[case::tiny_flight(0, 100, 2920)]
    fn newreno_rto_congestion(
        #[case] backoff: u32, #[case] in_flight: u32, #[case] ssthresh: u32,
    ) {
        let mut sender = test_sender();
        sender.send(in_flight);
        sender.ssthresh = 29200;
        sender.cwnd_cnt = 500;
        sender.timer_backoff = backoff;

        let out = sender.detect(EventFlags::RETRANSMIT_TIMEOUT);

        assert!(out.is_empty());
        assert_eq!(sender.cwnd, MSS);
        assert_eq!(sender.cwnd_cnt, 0);
        assert_eq!(sender.ssthresh, ssthresh);
        assert!(sender.ssthresh >= 2 * MSS);
    }

    #[test]
    fn newreno_repeated_rto_keeps_ssthresh_floor() {
        let mut sender = test_sender();
        sender.send(100_000);

        sender.detect(EventFlags::RETRANSMIT_TIMEOUT);

        for _ in 0..10 {
            sender.timer_backoff += 1;
            sender.detect(EventFlags::RETRANSMIT_TIMEOUT);

            assert_eq!(sender.cwnd, MSS);
            assert!(sender.ssthresh >= 2 * MSS);
        }
    }

    #[test]
    fn newreno_rto_during_cwr() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.ecn_ok = true;
        sender.cwr = true;
        sender.ssthresh = 8000;

        sender.detect(EventFlags::RETRANSMIT_TIMEOUT);
        assert_eq!(sender.ssthresh, 8000);
        assert_eq!(sender.cwnd, MSS);

        // A timeout on a retransmission reduces again.
        sender.rexmit = true;
        sender.detect(EventFlags::RETRANSMIT_TIMEOUT);
        assert_eq!(sender.ssthresh, 18980);
    }

    #[test]
    fn newreno_full_recovery() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.dupack_cnt = 3;
        sender.detect(EventFlags::DUPLICATE_ACK);

        // Inflate during recovery.
        sender.dupack_cnt = 4;
        sender.dup_ack();
        assert!(sender.cwnd > sender.ssthresh);

        let out = sender.recover(40000);

        assert!(out.is_empty());
        assert_eq!(sender.dupack_cnt, 0);
        assert_eq!(sender.cwnd, sender.ssthresh);
        assert_eq!(sender.rexmit_max, 40000);
        assert_eq!(sender.cwnd_cnt, 0);
    }

    #[test]
    fn newreno_full_recovery_clears_sack_holes() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.snd_sack_ok = true;
        sender.notsack.push(NotSackBlock {
            begin: 0,
            end: MSS,
        });
        sender.dupack_cnt = 3;
        sender.detect(EventFlags::DUPLICATE_ACK);

        sender.recover(40000);

        assert!(sender.notsack.is_empty());
    }

    #[test]
    fn newreno_partial_ack() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.dupack_cnt = 3;
        sender.detect(EventFlags::DUPLICATE_ACK);

        let out = sender.recover(10000);

        assert!(out.xmit_flags().rexmit_needed);
        assert_eq!(sender.dupack_cnt, 3);
        assert_eq!(sender.cwnd, 18980 + 3 * MSS);
        assert_eq!(sender.cwnd_cnt, sender.cwnd as i32);
    }

    #[test]
    fn newreno_partial_ack_capped() {
        let mut sender =
            TestSender::with_cwnd_max(Algorithm::NewReno, MSS, 20000);
        sender.send(40000);
        sender.dupack_cnt = 3;
        sender.detect(EventFlags::DUPLICATE_ACK);

        assert_eq!(sender.ssthresh, 18980);
        assert_eq!(sender.cwnd, 20000);

        let out = sender.recover(10000);

        // ssthresh + 3 * MSS would be 23360.
        assert!(out.xmit_flags().rexmit_needed);
        assert_eq!(sender.cwnd, 20000);
        assert_eq!(sender.cwnd_cnt, 20000);
    }

    #[test]
    fn newreno_partial_ack_sack() {
        let mut sender = test_sender();
        sender.send(40000);
        sender.snd_sack_ok = true;
        sender.fack = 30000;
        sender.notsack.push(NotSackBlock {
            begin: 0,
            end: MSS,
        });
        sender.dupack_cnt = 3;
        sender.detect(EventFlags::DUPLICATE_ACK);
        assert_eq!(sender.pipe, 10000);

        let out = sender.recover(10000);

        assert!(out.xmit_flags().need_sack_rexmit);
        assert_eq!(sender.pipe, 10000 - MSS);
    }

    #[rstest]
    #[case::rfc3390(0, 4380)]
    #[case::configured(10, 14600)]
    fn newreno_post_idle(#[case] segments: u32, #[case] expected: u32) {
        let mut sender =
            TestSender::with_idle_window(Algorithm::NewReno, MSS, segments);
        sender.cwnd = 50000;
        sender.cwnd_cnt = 77;

        let out = sender.idle();

        assert!(out.is_empty());
        assert_eq!(sender.cwnd, expected);
        assert_eq!(sender.cwnd_cnt, 0);
    }
}
