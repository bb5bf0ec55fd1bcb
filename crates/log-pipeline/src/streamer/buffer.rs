//! 스트림 버퍼 -- 플러시 대기 레코드의 유한 버퍼
//!
//! [`StreamBuffer`]는 도착 순서대로 레코드를 보관하고, 배치 크기 단위로
//! 드레인합니다.
//!
//! # 백프레셔 정책
//! 버퍼가 가득 찬 경우:
//! - [`BackpressureStrategy::Drop`]: 새 레코드를 버리고 드롭 카운터 증가
//! - [`BackpressureStrategy::Buffer`]: `max_buffer_ceiling`까지 초과 보관
//! - [`BackpressureStrategy::Pause`]: 플러시로 공간이 날 때까지 새 입력 거부

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StreamRecord;
use crate::error::LogPipelineError;

/// 버퍼가 가득 찼을 때의 동작
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    /// 새 레코드 드롭
    #[default]
    Drop,
    /// 상한까지 버퍼 확장
    Buffer,
    /// 새 입력 거부
    Pause,
}

impl BackpressureStrategy {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Buffer => "buffer",
            Self::Pause => "pause",
        }
    }
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackpressureStrategy {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "buffer" => Ok(Self::Buffer),
            "pause" => Ok(Self::Pause),
            other => Err(LogPipelineError::config(
                "streamer.backpressure",
                format!("unknown backpressure strategy '{other}'"),
            )),
        }
    }
}

/// [`StreamBuffer::push`] 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 버퍼에 추가됨
    Accepted,
    /// 가득 차서 버려짐
    Dropped,
    /// 가득 차서 거부됨 (pause)
    Rejected,
}

#[derive(Debug, Clone)]
struct Pending {
    record: StreamRecord,
    arrived: DateTime<Utc>,
}

/// 플러시 대기 버퍼
#[derive(Debug)]
pub struct StreamBuffer {
    records: VecDeque<Pending>,
    /// 명목 용량
    capacity: usize,
    /// `Buffer` 정책의 절대 상한
    ceiling: usize,
    strategy: BackpressureStrategy,
}

/// 버퍼 진단용 스냅샷 (드레인하지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct StreamBufferSnapshot {
    /// 현재 정책에서의 최대 보관 수. 항상 `count <= size`
    pub size: usize,
    /// 보관 중인 레코드 수
    pub count: usize,
    /// 가장 먼저 도착한 레코드의 도착 시각
    pub oldest: Option<DateTime<Utc>>,
    /// 가장 나중에 도착한 레코드의 도착 시각
    pub newest: Option<DateTime<Utc>>,
    /// 도착 순서의 레코드
    pub data: Vec<StreamRecord>,
}

impl StreamBuffer {
    /// 새 스트림 버퍼를 생성합니다.
    ///
    /// `ceiling`은 `capacity`보다 작으면 `capacity`로 올립니다.
    pub fn new(capacity: usize, ceiling: usize, strategy: BackpressureStrategy) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            ceiling: ceiling.max(capacity),
            strategy,
        }
    }

    /// 레코드를 추가합니다. 가득 찬 경우 정책에 따라 처리합니다.
    pub fn push(&mut self, record: StreamRecord) -> Admission {
        if self.records.len() >= self.capacity {
            match self.strategy {
                BackpressureStrategy::Drop => return Admission::Dropped,
                BackpressureStrategy::Pause => return Admission::Rejected,
                BackpressureStrategy::Buffer if self.records.len() >= self.ceiling => {
                    return Admission::Dropped;
                }
                BackpressureStrategy::Buffer => {}
            }
        }

        self.records.push_back(Pending {
            record,
            arrived: Utc::now(),
        });
        Admission::Accepted
    }

    /// 배치 크기만큼 또는 남은 만큼 드레인합니다.
    pub fn drain_batch(&mut self, batch_size: usize) -> Vec<StreamRecord> {
        let count = batch_size.min(self.records.len());
        self.records.drain(..count).map(|p| p.record).collect()
    }

    /// 모든 레코드를 드레인합니다.
    pub fn drain_all(&mut self) -> Vec<StreamRecord> {
        self.records.drain(..).map(|p| p.record).collect()
    }

    /// 보관 중인 레코드 수
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 명목 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 현재 정책에서의 최대 보관 수
    pub fn limit(&self) -> usize {
        match self.strategy {
            BackpressureStrategy::Buffer => self.ceiling,
            BackpressureStrategy::Drop | BackpressureStrategy::Pause => self.capacity,
        }
    }

    /// 명목 용량 대비 사용률. `Buffer` 정책에서는 1.0을 넘을 수 있습니다.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        f64::from(u32::try_from(self.records.len()).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(self.capacity).unwrap_or(u32::MAX))
    }

    /// 배치 플러시 조건을 확인합니다.
    pub fn should_flush(&self, batch_size: usize) -> bool {
        self.records.len() >= batch_size
    }

    /// 드레인하지 않고 현재 내용을 복사합니다.
    pub fn snapshot(&self) -> StreamBufferSnapshot {
        StreamBufferSnapshot {
            size: self.limit(),
            count: self.records.len(),
            oldest: self.records.front().map(|p| p.arrived),
            newest: self.records.back().map(|p| p.arrived),
            data: self.records.iter().map(|p| p.record.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logweave_core::types::RawLine;

    fn record(msg: &str) -> StreamRecord {
        StreamRecord::Raw(RawLine::new("test", msg))
    }

    #[test]
    fn push_and_drain() {
        let mut buf = StreamBuffer::new(100, 100, BackpressureStrategy::Drop);
        for i in 0..3 {
            assert_eq!(buf.push(record(&format!("log{i}"))), Admission::Accepted);
        }
        assert_eq!(buf.len(), 3);

        let batch = buf.drain_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.drain_all().len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn drop_strategy_discards_new_records() {
        let mut buf = StreamBuffer::new(2, 10, BackpressureStrategy::Drop);
        buf.push(record("log1"));
        buf.push(record("log2"));
        assert_eq!(buf.push(record("log3")), Admission::Dropped);
        assert_eq!(buf.len(), 2);

        // 먼저 들어온 레코드가 유지됨
        let kept: Vec<String> = buf
            .drain_all()
            .into_iter()
            .map(|r| match r {
                StreamRecord::Raw(raw) => raw.content,
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(kept, vec!["log1", "log2"]);
    }

    #[test]
    fn pause_strategy_rejects_until_drained() {
        let mut buf = StreamBuffer::new(1, 1, BackpressureStrategy::Pause);
        assert_eq!(buf.push(record("a")), Admission::Accepted);
        assert_eq!(buf.push(record("b")), Admission::Rejected);
        buf.drain_batch(1);
        assert_eq!(buf.push(record("c")), Admission::Accepted);
    }

    #[test]
    fn buffer_strategy_grows_to_ceiling() {
        let mut buf = StreamBuffer::new(2, 3, BackpressureStrategy::Buffer);
        for name in ["a", "b", "c"] {
            assert_eq!(buf.push(record(name)), Admission::Accepted);
        }
        assert_eq!(buf.push(record("d")), Admission::Dropped);
        assert!(buf.utilization() > 1.0);

        let snapshot = buf.snapshot();
        assert_eq!(snapshot.size, 3);
        assert_eq!(snapshot.count, 3);
        assert!(snapshot.count <= snapshot.size);
    }

    #[test]
    fn snapshot_keeps_arrival_order_without_draining() {
        let mut buf = StreamBuffer::new(10, 10, BackpressureStrategy::Drop);
        assert!(buf.snapshot().oldest.is_none());
        buf.push(record("first"));
        buf.push(record("second"));

        let snapshot = buf.snapshot();
        assert_eq!(snapshot.count, 2);
        assert!(snapshot.oldest <= snapshot.newest);
        assert!(matches!(&snapshot.data[0], StreamRecord::Raw(r) if r.content == "first"));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn should_flush_and_utilization() {
        let mut buf = StreamBuffer::new(100, 100, BackpressureStrategy::Drop);
        assert!(!buf.should_flush(10));
        assert_eq!(buf.utilization(), 0.0);
        for i in 0..50 {
            buf.push(record(&format!("log{i}")));
        }
        assert!(buf.should_flush(10));
        assert!(!buf.should_flush(51));
        let util = buf.utilization();
        assert!(util > 0.49 && util < 0.51);
    }

    #[test]
    fn ceiling_never_below_capacity() {
        let buf = StreamBuffer::new(5, 1, BackpressureStrategy::Buffer);
        assert_eq!(buf.limit(), 5);
        assert_eq!(buf.capacity(), 5);
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            "PAUSE".parse::<BackpressureStrategy>().unwrap(),
            BackpressureStrategy::Pause
        );
        assert!("block".parse::<BackpressureStrategy>().is_err());
    }
}
