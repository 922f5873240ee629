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

//! Fixed-point CUBIC arithmetic.
//!
//! Every factor carries [`CUBIC_SHIFT`] fractional bits. The cube root used
//! for K follows the polynomial approximation from Apple's "Cubic root
//! calculation" technical note, which avoids floating point entirely.
//!
//! Time is measured in engine clock ticks, `hz` of them per second.

/// Number of bits of precision for fixed point math calcs.
pub const CUBIC_SHIFT: u32 = 8;

/// Four lots of [`CUBIC_SHIFT`], removed after `C * (t - K)^3`.
pub const CUBIC_SHIFT_4: u32 = 32;

/// 0.5 << CUBIC_SHIFT.
pub const RENO_BETA: u64 = 128;

/// ~0.8 << CUBIC_SHIFT.
pub const CUBIC_BETA: u64 = 204;

/// ~0.2 << CUBIC_SHIFT, i.e. 1 - CUBIC_BETA.
pub const ONE_SUB_CUBIC_BETA: u64 = 51;

/// 3 * ONE_SUB_CUBIC_BETA.
pub const THREE_X_PT2: u64 = 153;

/// (2 << CUBIC_SHIFT) - ONE_SUB_CUBIC_BETA, i.e. 1 + CUBIC_BETA.
pub const TWO_SUB_PT2: u64 = 461;

/// ~0.4 << CUBIC_SHIFT.
pub const CUBIC_C_FACTOR: u64 = 102;

/// Fast convergence factor, ~0.9 << CUBIC_SHIFT.
pub const CUBIC_FC_FACTOR: u64 = 230;

// Cube root polynomial coefficients: 1.072302, 0.3812513 and 0.46946116
// with CUBIC_SHIFT.
const CBRT_A: u64 = 275;
const CBRT_B: u64 = 98;
const CBRT_C: u64 = 120;

// Bound on |t - K| (fixed point) that keeps the cube within i128.
const MAX_CUBIC_DELTA: i128 = 1 << 28;

/// Multiplies `val` by a factor carrying [`CUBIC_SHIFT`] bits.
pub fn calc_factor(val: u32, factor: u64) -> u32 {
    saturate((u64::from(val) * factor) >> CUBIC_SHIFT)
}

/// Computes K, the time in seconds until the cubic curve gets back to
/// `wmax`, as `cbrt(wmax_pkts * (1 - beta) / C)` in fixed point.
pub fn cubic_k(wmax_pkts: u32) -> u64 {
    // wmax * (1 - beta) / C with CUBIC_SHIFT worth of precision.
    let mut s = ((u64::from(wmax_pkts) * ONE_SUB_CUBIC_BETA) << CUBIC_SHIFT) /
        CUBIC_C_FACTOR;

    // Rebase s into [0, 1) with CUBIC_SHIFT, dividing by 8 at a time so
    // the cube root only needs doubling afterwards.
    let mut p = 0;

    while s >= 256 {
        s >>= 3;
        p += 1;
    }

    let k = (((s * CBRT_A) >> CUBIC_SHIFT) + CBRT_B) -
        (((s * s * CBRT_C) >> CUBIC_SHIFT) >> CUBIC_SHIFT);

    k << p
}

/// Evaluates the cubic curve `C * (t - K)^3 + wmax`, in bytes.
///
/// `t` is the number of ticks since the last congestion event. Before the
/// inflection point `t - K` is negative and the curve is below `wmax`.
pub fn cubic_window(t: u64, wmax: u32, mss: u32, k: u64, hz: u64) -> u32 {
    let hz = i128::from(hz.max(1));

    // t - K, with CUBIC_SHIFT worth of precision.
    let x = ((i128::from(t) << CUBIC_SHIFT) - i128::from(k) * hz) / hz;
    let x = x.clamp(-MAX_CUBIC_DELTA, MAX_CUBIC_DELTA);

    // (t - K)^3 carries three lots of CUBIC_SHIFT, C brings the fourth.
    let cwnd = ((x * x * x * i128::from(CUBIC_C_FACTOR) * i128::from(mss)) >>
        CUBIC_SHIFT_4) +
        i128::from(wmax);

    cwnd.clamp(0, i128::from(u32::MAX)) as u32
}

/// Estimates the window standard AIMD TCP would have reached, in bytes.
///
/// `wmax * beta + 3 * (1 - beta) / (1 + beta) * t / rtt` segments, with `t`
/// and `rtt` in ticks. `rtt` is floored at one tick.
pub fn aimd_window(t: u64, rtt: u64, wmax: u32, mss: u32) -> u32 {
    let rtt = u128::from(rtt.max(1));

    let cwnd = ((u128::from(wmax) * u128::from(CUBIC_BETA)) +
        (((u128::from(THREE_X_PT2) * u128::from(t) * u128::from(mss)) <<
            CUBIC_SHIFT) /
            u128::from(TWO_SUB_PT2) /
            rtt)) >>
        CUBIC_SHIFT;

    cwnd.min(u128::from(u32::MAX)) as u32
}

fn saturate(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}
