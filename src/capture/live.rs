//! 后台抓包线程
//!
//! 线程持续读取 `FrameSource`，打上到达时间戳，按 `FlowScope` 过滤后经
//! channel 交给调用方。调用方只在 `next_frame` 里阻塞，不会影响线程继续收包。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::{CapturedFrame, Clock, FlowScope, FrameSource, PacketStream};
use crate::error::{Error, Result};
use crate::sim::SimTime;

/// 线程每次阻塞读取的上限，决定 `stop` 的响应延迟。
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 抓包计数
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub seen: AtomicU64,
    pub queued: AtomicU64,
    pub filtered: AtomicU64,
}

/// 持续运行的抓包器。
pub struct Capture<C: Clock> {
    rx: Receiver<CapturedFrame>,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    handle: Option<JoinHandle<()>>,
    clock: C,
}

impl<C> Capture<C>
where
    C: Clock + Clone + Send + 'static,
{
    /// 启动后台线程开始抓包
    ///
    /// `next_frame` 的截止时间按 `clock` 解释：驱动它的 `Connection` 必须使用
    /// 同一个时钟（或其副本，见 [`Capture::clock`]），否则两个时钟起点之差会
    /// 直接缩短每次等待。
    #[tracing::instrument(skip(source, clock))]
    pub fn start<S: FrameSource + 'static>(
        mut source: S,
        scope: FlowScope,
        clock: C,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CaptureStats::default());

        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);
        let thread_clock = clock.clone();
        let handle = thread::Builder::new()
            .name("packet-capture".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    let bytes = match source.recv(POLL_INTERVAL) {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            warn!(error = %e, "帧源出错，停止抓包");
                            break;
                        }
                    };
                    let at = thread_clock.now();
                    thread_stats.seen.fetch_add(1, Ordering::Relaxed);
                    if !scope.admits(&bytes) {
                        thread_stats.filtered.fetch_add(1, Ordering::Relaxed);
                        trace!(len = bytes.len(), "不在范围内，跳过");
                        continue;
                    }
                    thread_stats.queued.fetch_add(1, Ordering::Relaxed);
                    if tx.send(CapturedFrame { at, bytes }).is_err() {
                        break;
                    }
                }
                debug!("抓包线程退出");
            })?;

        info!("抓包已启动");
        Ok(Self {
            rx,
            stop,
            stats,
            handle: Some(handle),
            clock,
        })
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 抓包打时间戳所用时钟的副本，供 `Connection` 共用。
    pub fn clock(&self) -> C {
        self.clock.clone()
    }

    /// 停止线程并等待其退出；可重复调用。
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("抓包线程 panic");
            }
            info!(
                seen = self.stats.seen.load(Ordering::Relaxed),
                queued = self.stats.queued.load(Ordering::Relaxed),
                filtered = self.stats.filtered.load(Ordering::Relaxed),
                "抓包已停止"
            );
        }
    }
}

impl<C: Clock> PacketStream for Capture<C> {
    fn next_frame(&mut self, deadline: SimTime) -> Result<Option<CapturedFrame>> {
        let remaining = deadline.saturating_sub(self.clock.now());
        let got = if remaining == SimTime::ZERO {
            match self.rx.try_recv() {
                Ok(frame) => Ok(frame),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => Err(()),
            }
        } else {
            match self.rx.recv_timeout(remaining.as_duration()) {
                Ok(frame) => Ok(frame),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(()),
            }
        };
        got.map(Some)
            .map_err(|()| Error::InvalidState("capture is not running"))
    }

    fn drain(&mut self) -> usize {
        self.rx.try_iter().count()
    }
}

impl<C: Clock> Drop for Capture<C> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
