use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::timing::{Tolerance, TimingWindow};
use crate::dut::{DutControl, Fd, consts};
use crate::engine::Connection;
use crate::error::{Error, Result};
use crate::peer::Endpoint;
use crate::report::ReportEventKind;
use crate::sim::SimTime;
use crate::wire::{Payload, SegmentSpec, TcpFlags};

pub const SAMPLE_DATA: &[u8] = b"Sample Data";

/// 第一次等待只用于校准，至少还要检查一个间隔
pub const MIN_RETRANSMITS: usize = 2;

/// Retransmissions of one unacknowledged segment must arrive at doubling
/// intervals.
#[derive(Debug, Clone)]
pub struct RetransmitTest {
    /// Initial RTO guess; bounds the wait for the original transmission.
    pub start_rto: SimTime,
    /// Number of waits after the original transmission; the first one
    /// calibrates the RTO and is not checked.
    pub retransmits: usize,
    pub tolerance: Tolerance,
    pub data: Vec<u8>,
    pub backlog: i32,
    pub handshake_timeout: SimTime,
    /// Wait for the RTT-sampling exchange.
    pub sample_timeout: SimTime,
}

impl Default for RetransmitTest {
    fn default() -> Self {
        Self {
            start_rto: SimTime::from_secs(1),
            retransmits: 5,
            tolerance: Tolerance::StartRto,
            data: SAMPLE_DATA.to_vec(),
            backlog: 1,
            handshake_timeout: SimTime::from_secs(1),
            sample_timeout: SimTime::from_secs(1),
        }
    }
}

/// One checked retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub probe: usize,
    pub elapsed: SimTime,
    pub window: TimingWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmitOutcome {
    /// Time from the second send to the first retransmission.
    pub start_rto: SimTime,
    pub probes: Vec<Probe>,
}

impl RetransmitTest {
    /// Drive the whole test; DUT handles are closed whatever the result.
    #[tracing::instrument(
        skip_all,
        fields(retransmits = self.retransmits, tolerance = %self.tolerance)
    )]
    pub fn run<D: DutControl + ?Sized>(
        &self,
        dut: &mut D,
        conn: &mut Connection,
    ) -> Result<RetransmitOutcome> {
        if self.retransmits < MIN_RETRANSMITS {
            return Err(Error::Config(format!(
                "retransmits must be at least {MIN_RETRANSMITS}, got {}",
                self.retransmits
            )));
        }
        let (listener, port) = dut.create_listener(
            consts::AF_INET,
            consts::SOCK_STREAM,
            consts::IPPROTO_TCP,
            self.backlog,
        )?;
        let remote = Endpoint::new(dut.addr(), port);
        let mut accepted = None;
        let result = self.exercise(dut, conn, remote, listener, &mut accepted);

        if let Some(fd) = accepted {
            if let Err(e) = dut.close(fd) {
                warn!(fd, error = %e, "关闭已接受的 socket 失败");
            }
        }
        if let Err(e) = dut.close(listener) {
            warn!(fd = listener, error = %e, "关闭监听 socket 失败");
        }
        if let Err(e) = conn.close() {
            warn!(error = %e, "RST 发送失败");
        }

        let now = conn.now();
        conn.report_mut().verdict(now, result.as_ref().err());
        match &result {
            Ok(outcome) => {
                info!(start_rto = %outcome.start_rto, probes = outcome.probes.len(), "PASS")
            }
            Err(e) => warn!(error = %e, "FAIL"),
        }
        result
    }

    fn exercise<D: DutControl + ?Sized>(
        &self,
        dut: &mut D,
        conn: &mut Connection,
        remote: Endpoint,
        listener: Fd,
        accepted: &mut Option<Fd>,
    ) -> Result<RetransmitOutcome> {
        conn.connect_to(remote)?;
        conn.handshake(self.handshake_timeout)?;
        let fd = dut.accept(listener)?;
        *accepted = Some(fd);
        dut.set_sockopt_int(fd, consts::IPPROTO_TCP, consts::TCP_NODELAY, 1)?;

        let payload = Payload::new(self.data.clone());
        let wrap = |iteration: Option<usize>| {
            let payload = payload.to_string();
            move |e: Error| Error::Expectation {
                payload,
                iteration,
                source: Box::new(e),
            }
        };

        // 先完成一次数据往返并确认，让 DUT 得到 RTT 采样
        dut.send(fd, &self.data, 0)?;
        conn.expect_data(&SegmentSpec::new(), &payload, self.sample_timeout)
            .map_err(wrap(None))?;
        conn.send(&SegmentSpec::new().with_flags(TcpFlags::ACK), &[])?;

        let mut start_rto = self.start_rto;
        let mut current = start_rto;
        let first = conn.now();
        dut.send(fd, &self.data, 0)?;
        let seq = conn
            .peer()
            .remote_seq()
            .ok_or(Error::InvalidState("no sequence number observed from the DUT"))?;
        let same_seg = SegmentSpec::new().with_seq(seq);
        conn.expect_data(&same_seg, &payload, start_rto).map_err(wrap(None))?;

        let mut outcome = RetransmitOutcome::default();
        for i in 0..self.retransmits {
            let start = conn.now();
            conn.expect_data(&same_seg, &payload, current.saturating_mul(2))
                .map_err(wrap(Some(i)))?;
            if i == 0 {
                start_rto = conn.now().saturating_sub(first);
                current = start_rto.saturating_mul(2);
                outcome.start_rto = start_rto;
                info!(start_rto = %start_rto, "测得初始 RTO");
                continue;
            }
            let elapsed = conn.now().saturating_sub(start);
            let window = self.tolerance.window(current, start_rto);
            let now = conn.now();
            conn.report_mut().push(
                now,
                ReportEventKind::Interval {
                    probe: i,
                    elapsed_ns: elapsed.0,
                    lower_ns: window.lower.0,
                    upper_ns: window.upper.0,
                },
            );
            info!(probe = i, elapsed = %elapsed, lower = %window.lower, "重传间隔");
            if !window.admits(elapsed) {
                return Err(Error::TimingViolation {
                    probe: i,
                    observed: elapsed,
                    lower: window.lower,
                });
            }
            outcome.probes.push(Probe {
                probe: i,
                elapsed,
                window,
            });
            current = current.saturating_mul(2);
        }
        Ok(outcome)
    }
}
