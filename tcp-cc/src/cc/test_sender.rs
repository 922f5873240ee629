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

use std::ops::Deref;
use std::ops::DerefMut;

use crate::cc::Algorithm;
use crate::cc::CongestionState;
use crate::cc::Directives;
use crate::cc::Event;
use crate::cc::EventFlags;
use crate::cc::Registry;
use crate::window::WindowState;
use crate::Config;

/// Drives a single connection's congestion control the way the engine would.
///
/// Sequence numbers start at zero and time is counted in clock ticks.
pub(crate) struct TestSender {
    cc: CongestionState,
    tcp: WindowState,
    pub(crate) time: u64,
}

impl TestSender {
    pub(crate) fn new(algo: Algorithm, mss: u32) -> Self {
        Self::with_config(algo, mss, 1 << 20, Config::new())
    }

    pub(crate) fn with_cwnd_max(
        algo: Algorithm, mss: u32, cwnd_max: u32,
    ) -> Self {
        Self::with_config(algo, mss, cwnd_max, Config::new())
    }

    pub(crate) fn with_idle_window(
        algo: Algorithm, mss: u32, segments: u32,
    ) -> Self {
        let mut config = Config::new();
        config.set_slow_start_after_idle(segments);

        Self::with_config(algo, mss, 1 << 20, config)
    }

    fn with_config(
        algo: Algorithm, mss: u32, cwnd_max: u32, mut config: Config,
    ) -> Self {
        config.set_cc_algorithm(algo);

        let registry = Registry::stack_init(&config);
        let tcp = WindowState::new(mss, cwnd_max, registry.params());
        let cc = registry.bind(&tcp, 0, "test");

        TestSender {
            cc,
            tcp,
            time: 0,
        }
    }

    /// Sends `bytes` of new data.
    pub(crate) fn send(&mut self, bytes: u32) {
        self.tcp.snxt = self.tcp.snxt.wrapping_add(bytes);
    }

    /// Receives an ACK advancing `suna` by `bytes`.
    pub(crate) fn ack(&mut self, bytes: u32) -> Directives {
        self.ack_with(bytes, EventFlags::empty())
    }

    pub(crate) fn ack_with(
        &mut self, bytes: u32, flags: EventFlags,
    ) -> Directives {
        self.tcp.suna = self.tcp.suna.wrapping_add(bytes);

        if !crate::cc::seq_geq(self.tcp.snxt, self.tcp.suna) {
            self.tcp.snxt = self.tcp.suna;
        }

        let ev = Event::new(self.tcp.suna, flags, self.time);

        self.cc.ack_received(&mut self.tcp, &ev)
    }

    /// Receives a duplicate ACK.
    pub(crate) fn dup_ack(&mut self) -> Directives {
        self.tcp.dupack_cnt += 1;

        let ev = Event::new(self.tcp.suna, EventFlags::DUPLICATE_ACK, self.time);

        self.cc.ack_received(&mut self.tcp, &ev)
    }

    /// Signals congestion.
    pub(crate) fn detect(&mut self, flags: EventFlags) -> Directives {
        let ev = Event::new(self.tcp.suna, flags, self.time);

        self.cc.cong_detected(&mut self.tcp, &ev)
    }

    /// Receives an ACK for `seg_ack` while in fast recovery.
    pub(crate) fn recover(&mut self, seg_ack: u32) -> Directives {
        self.tcp.suna = seg_ack;

        let ev = Event::new(seg_ack, EventFlags::empty(), self.time);

        self.cc.cong_recovered(&mut self.tcp, &ev)
    }

    /// Restarts after an idle period.
    pub(crate) fn idle(&mut self) -> Directives {
        let ev = Event::new(self.tcp.suna, EventFlags::empty(), self.time);

        self.cc.post_idle(&mut self.tcp, &ev)
    }

    pub(crate) fn advance_time(&mut self, ticks: u64) {
        self.time += ticks;
    }
}

impl Deref for TestSender {
    type Target = WindowState;

    fn deref(&self) -> &Self::Target {
        &self.tcp
    }
}

impl DerefMut for TestSender {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tcp
    }
}
