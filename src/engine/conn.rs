use tracing::{debug, info, trace, warn};

use super::matcher;
use crate::capture::{Clock, FrameSink, PacketStream};
use crate::error::{Error, Result};
use crate::peer::{Endpoint, Phase, PeerState};
use crate::report::{ReportEventKind, RunReport};
use crate::sim::SimTime;
use crate::wire::{self, ParsedSegment, Payload, SegmentSpec, TcpFlags};

/// One logical connection driven by the synthetic peer.
pub struct Connection {
    peer: PeerState,
    stream: Box<dyn PacketStream>,
    sink: Box<dyn FrameSink>,
    clock: Box<dyn Clock>,
    report: RunReport,
}

impl Connection {
    pub fn new(
        peer: PeerState,
        stream: impl PacketStream + 'static,
        sink: impl FrameSink + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            peer,
            stream: Box::new(stream),
            sink: Box::new(sink),
            clock: Box::new(clock),
            report: RunReport::default(),
        }
    }

    pub fn peer(&self) -> &PeerState {
        &self.peer
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut RunReport {
        &mut self.report
    }

    pub fn take_report(&mut self) -> RunReport {
        std::mem::take(&mut self.report)
    }

    /// Aim the connection at `remote` before the handshake.
    pub fn connect_to(&mut self, remote: Endpoint) -> Result<()> {
        if !self.peer.retarget(remote) {
            return Err(Error::InvalidState("connection already opened"));
        }
        Ok(())
    }

    /// Wait for a segment matching `spec` (and `payload`, if given).
    ///
    /// Frames that fail to decode or do not match are skipped. The first
    /// full match is fed to [`PeerState::observe`] before it is returned, so
    /// the peer's remote sequence tracking advances only on matches.
    #[tracing::instrument(skip(self, spec, payload), fields(spec = %spec))]
    pub fn expect(
        &mut self,
        spec: &SegmentSpec,
        payload: Option<&Payload>,
        timeout: SimTime,
    ) -> Result<ParsedSegment> {
        if spec.is_empty() {
            return Err(Error::EmptySpec);
        }
        let deadline = self.clock.now().saturating_add(timeout);
        while let Some(frame) = self.stream.next_frame(deadline)? {
            let seg = match wire::decode(&frame.bytes) {
                Ok(seg) => seg,
                Err(e) if e.is_discardable() => {
                    trace!(error = %e, len = frame.bytes.len(), "丢弃无法解码的帧");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !matcher::matches(spec, &seg) {
                trace!(seg = %seg, "不匹配，跳过");
                continue;
            }
            if !matcher::payload_matches(payload, &seg) {
                debug!(seg = %seg, "头部匹配但负载不同，跳过");
                continue;
            }
            self.peer.observe(&seg);
            debug!(at = %frame.at, seg = %seg, "匹配");
            self.report.push(frame.at, ReportEventKind::Matched((&seg).into()));
            return Ok(seg);
        }
        Err(Error::Timeout {
            spec: spec.to_string(),
            payload: payload.map(|p| format!(" with payload {p}")).unwrap_or_default(),
            waited: timeout,
        })
    }

    /// `expect` restricted to this connection's DUT → peer flow, payload required.
    pub fn expect_data(
        &mut self,
        spec: &SegmentSpec,
        payload: &Payload,
        timeout: SimTime,
    ) -> Result<ParsedSegment> {
        let spec = self.peer.inbound_flow().merge(spec);
        self.expect(&spec, Some(payload), timeout)
    }

    /// Put a segment on the wire; unset fields come from the peer state.
    pub fn send(&mut self, spec: &SegmentSpec, payload: &[u8]) -> Result<ParsedSegment> {
        let seg = self.peer.build(spec, payload);
        seg.check_fits()?;
        self.sink.send_frame(&wire::emit(&seg))?;
        self.peer.on_transmit(&seg);
        let now = self.clock.now();
        debug!(now = %now, seg = %seg, "发送");
        self.report.push(now, ReportEventKind::Sent((&seg).into()));
        Ok(seg)
    }

    /// Active open: SYN, wait for SYN|ACK acknowledging it, then ACK.
    #[tracing::instrument(skip(self))]
    pub fn handshake(&mut self, timeout: SimTime) -> Result<()> {
        if self.peer.phase() != Phase::Closed {
            return Err(Error::InvalidState("handshake needs a closed connection"));
        }
        self.send(&SegmentSpec::new().with_flags(TcpFlags::SYN), &[])?;
        let syn_ack = self
            .peer
            .inbound_flow()
            .with_flags(TcpFlags::SYN | TcpFlags::ACK)
            .with_ack(self.peer.local_seq());
        if let Err(e) = self.expect(&syn_ack, None, timeout) {
            warn!(error = %e, "握手失败");
            self.peer.abandon_open();
            return Err(Error::HandshakeTimeout(Box::new(e)));
        }
        self.send(&SegmentSpec::new().with_flags(TcpFlags::ACK), &[])?;
        info!(local = %self.peer.local(), remote = %self.peer.remote(), "连接建立");
        Ok(())
    }

    /// Abort with RST if the connection got anywhere; the peer ends `Finished`.
    pub fn close(&mut self) -> Result<()> {
        match self.peer.phase() {
            Phase::SynSent | Phase::Established => {
                self.send(&SegmentSpec::new().with_flags(TcpFlags::RST), &[])?;
            }
            Phase::Closed | Phase::Finished => {}
        }
        self.peer.finish();
        Ok(())
    }

    /// Drop frames that have already arrived.
    pub fn drain(&mut self) -> usize {
        let n = self.stream.drain();
        if n > 0 {
            debug!(n, "丢弃积压帧");
        }
        n
    }
}
