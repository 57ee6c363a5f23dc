//! 测试过程记录（JSON）
//!
//! 引擎与判定器把关键节点（发送、匹配、重传间隔、最终结论）按时间顺序
//! 记成结构化事件，CLI 在 `--report-json` 时整体写出。

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sim::SimTime;
use crate::wire::ParsedSegment;

/// 段的摘要字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: String,
    pub len: usize,
}

impl From<&ParsedSegment> for SegmentSummary {
    fn from(seg: &ParsedSegment) -> Self {
        Self {
            src_port: seg.src_port,
            dst_port: seg.dst_port,
            seq: seg.seq_num.0,
            ack: seg.ack_num.0,
            flags: seg.flags.to_string(),
            len: seg.payload.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportEventKind {
    /// 对端发出一个段
    Sent(SegmentSummary),
    /// 期望匹配成功
    Matched(SegmentSummary),
    /// 一次重传间隔测量
    Interval {
        probe: usize,
        elapsed_ns: u64,
        lower_ns: u64,
        upper_ns: u64,
    },
    /// 最终结论
    Verdict {
        pass: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    /// 事件时刻（纳秒，和 `SimTime.0` 同口径）
    pub t_ns: u64,
    #[serde(flatten)]
    pub kind: ReportEventKind,
}

/// 内存中的事件收集器
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub events: Vec<ReportEvent>,
}

impl RunReport {
    pub fn push(&mut self, at: SimTime, kind: ReportEventKind) {
        self.events.push(ReportEvent { t_ns: at.0, kind });
    }

    pub fn verdict(&mut self, at: SimTime, failure: Option<&Error>) {
        self.push(
            at,
            ReportEventKind::Verdict {
                pass: failure.is_none(),
                message: failure.map(|e| e.to_string()),
            },
        );
    }

    /// The last recorded verdict, if any.
    pub fn passed(&self) -> Option<bool> {
        self.events.iter().rev().find_map(|e| match e.kind {
            ReportEventKind::Verdict { pass, .. } => Some(pass),
            _ => None,
        })
    }

    pub fn intervals(&self) -> impl Iterator<Item = &ReportEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, ReportEventKind::Interval { .. }))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
