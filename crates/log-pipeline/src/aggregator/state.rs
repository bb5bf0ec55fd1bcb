//! 집계 상태와 삽입 시점 인덱스
//!
//! `correlate`/`window` 전략에서는 `add_log` 시점에 상관 맵과 윈도우 버킷을
//! 갱신해 두므로, 집계는 결과 크기에 비례하는 비용만 듭니다.
//! 로그는 `Arc`로 공유되어 인덱스 사이에 복사되지 않습니다.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use xxhash_rust::xxh3::Xxh3;

use logweave_core::types::ParsedLog;

use super::types::{
    AggregatedData, AggregatedLog, AggregatedResult, AggregationStrategy, AggregatorConfig,
    Correlation, ProcessInfo, ProcessLog, TimeWindow,
};
use crate::error::LogPipelineError;
use crate::filter::compiled::FieldPath;

/// 인덱스에 저장되는 로그 참조
#[derive(Debug, Clone)]
struct Entry {
    process_id: Arc<str>,
    /// 집계기 전역 삽입 순번
    seq: u64,
    /// 로그 타임스탬프, 없으면 수신 시각
    at: DateTime<Utc>,
    log: Arc<ParsedLog>,
}

impl Entry {
    fn to_aggregated(&self) -> AggregatedLog {
        AggregatedLog {
            process_id: self.process_id.to_string(),
            log: ParsedLog::clone(&self.log),
        }
    }

    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.at, self.seq)
    }
}

#[derive(Debug)]
struct ProcessEntry {
    info: ProcessInfo,
    start_time: DateTime<Utc>,
    logs: VecDeque<Entry>,
}

/// 집계기 내부 상태
#[derive(Debug)]
pub(super) struct State {
    processes: BTreeMap<String, ProcessEntry>,
    correlations: BTreeMap<String, Vec<Entry>>,
    windows: BTreeMap<i64, Vec<Entry>>,
    window_origin: Option<DateTime<Utc>>,
    correlation_path: Option<FieldPath>,
    dedup_paths: Vec<(String, FieldPath)>,
    next_seq: u64,
    total: usize,
    /// 변경될 때마다 증가
    version: u64,
}

impl State {
    pub(super) fn new(config: &AggregatorConfig) -> Self {
        Self {
            processes: BTreeMap::new(),
            correlations: BTreeMap::new(),
            windows: BTreeMap::new(),
            window_origin: None,
            correlation_path: config.correlation_field.as_deref().map(FieldPath::parse),
            dedup_paths: config
                .dedup_fields
                .iter()
                .map(|f| (f.clone(), FieldPath::parse(f)))
                .collect(),
            next_seq: 0,
            total: 0,
            version: 0,
        }
    }

    pub(super) fn version(&self) -> u64 {
        self.version
    }

    pub(super) fn total_logs(&self) -> usize {
        self.total
    }

    pub(super) fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub(super) fn has_process(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    pub(super) fn process_ids(&self) -> Vec<String> {
        self.processes.keys().cloned().collect()
    }

    pub(super) fn add_process(
        &mut self,
        id: &str,
        info: ProcessInfo,
        max_processes: usize,
    ) -> Result<(), LogPipelineError> {
        if self.processes.contains_key(id) {
            return Err(LogPipelineError::DuplicateProcess(id.to_owned()));
        }
        if self.processes.len() >= max_processes {
            return Err(LogPipelineError::Capacity {
                resource: "processes".to_owned(),
                limit: max_processes,
            });
        }
        self.processes.insert(
            id.to_owned(),
            ProcessEntry {
                info,
                start_time: Utc::now(),
                logs: VecDeque::new(),
            },
        );
        self.version += 1;
        Ok(())
    }

    pub(super) fn remove_process(&mut self, id: &str) -> Option<ProcessLog> {
        let entry = self.processes.remove(id)?;
        self.total -= entry.logs.len();
        self.correlations.retain(|_, bucket| {
            bucket.retain(|e| &*e.process_id != id);
            !bucket.is_empty()
        });
        self.windows.retain(|_, bucket| {
            bucket.retain(|e| &*e.process_id != id);
            !bucket.is_empty()
        });
        self.version += 1;
        Some(snapshot(id, &entry))
    }

    pub(super) fn get_process(&self, id: &str) -> Option<ProcessLog> {
        self.processes.get(id).map(|entry| snapshot(id, entry))
    }

    /// 로그를 추가하고 전략에 맞는 인덱스를 갱신합니다.
    /// 상한을 넘으면 축출된 로그 수를 반환합니다.
    pub(super) fn add_log(
        &mut self,
        id: &str,
        log: ParsedLog,
        config: &AggregatorConfig,
    ) -> Result<usize, LogPipelineError> {
        if !self.processes.contains_key(id) {
            return Err(LogPipelineError::ProcessNotFound(id.to_owned()));
        }

        let at = log.timestamp.unwrap_or_else(Utc::now);
        let entry = Entry {
            process_id: Arc::from(id),
            seq: self.next_seq,
            at,
            log: Arc::new(log),
        };
        self.next_seq += 1;

        match config.strategy {
            AggregationStrategy::Correlate => {
                if let Some(key) = self.correlation_key(&entry.log) {
                    self.correlations.entry(key).or_default().push(entry.clone());
                }
            }
            AggregationStrategy::Window => {
                let origin = *self.window_origin.get_or_insert(at);
                for index in window_indices(origin, at, config) {
                    self.windows.entry(index).or_default().push(entry.clone());
                }
            }
            _ => {}
        }

        let mut evicted = Vec::new();
        if let Some(process) = self.processes.get_mut(id) {
            process.logs.push_back(entry);
            if let Some(limit) = config.max_logs_per_process {
                while process.logs.len() > limit {
                    if let Some(old) = process.logs.pop_front() {
                        evicted.push(old);
                    }
                }
            }
        }
        for old in &evicted {
            self.unindex(old, config);
        }

        self.total = self.total + 1 - evicted.len();
        self.version += 1;
        Ok(evicted.len())
    }

    fn unindex(&mut self, entry: &Entry, config: &AggregatorConfig) {
        match config.strategy {
            AggregationStrategy::Correlate => {
                if let Some(key) = self.correlation_key(&entry.log) {
                    remove_seq(&mut self.correlations, &key, entry.seq);
                }
            }
            AggregationStrategy::Window => {
                if let Some(origin) = self.window_origin {
                    for index in window_indices(origin, entry.at, config) {
                        remove_seq(&mut self.windows, &index, entry.seq);
                    }
                }
            }
            _ => {}
        }
    }

    fn correlation_key(&self, log: &ParsedLog) -> Option<String> {
        let value = self.correlation_path.as_ref()?.resolve(log)?;
        match &*value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// 프로세스 등록은 유지하고 로그와 인덱스만 비웁니다.
    pub(super) fn clear_logs(&mut self) {
        for process in self.processes.values_mut() {
            process.logs.clear();
        }
        self.correlations.clear();
        self.windows.clear();
        self.window_origin = None;
        self.total = 0;
        self.version += 1;
    }

    /// 프로세스까지 모두 제거합니다.
    pub(super) fn clear(&mut self) {
        self.clear_logs();
        self.processes.clear();
    }

    // --- 집계 ---

    /// 현재 상태의 스냅샷을 만듭니다. 상태는 변경하지 않습니다.
    pub(super) fn aggregate(&self, config: &AggregatorConfig) -> AggregatedResult {
        let mut metadata = Map::new();
        let data = match config.strategy {
            AggregationStrategy::Merge => {
                let merged = self.merged();
                let merged = self.maybe_dedup(merged, config, &mut metadata);
                AggregatedData::Merged(merged.iter().map(|e| e.to_aggregated()).collect())
            }
            AggregationStrategy::Group => AggregatedData::Grouped(
                self.processes
                    .iter()
                    .map(|(id, p)| {
                        let logs = p.logs.iter().map(|e| ParsedLog::clone(&e.log)).collect();
                        (id.clone(), logs)
                    })
                    .collect(),
            ),
            AggregationStrategy::Correlate => {
                if let Some(field) = &config.correlation_field {
                    metadata.insert("correlation_field".to_owned(), Value::from(field.as_str()));
                }
                AggregatedData::Correlated(self.correlated())
            }
            AggregationStrategy::Window => {
                metadata.insert(
                    "window_size_ms".to_owned(),
                    Value::from(duration_millis(config.window.size)),
                );
                metadata.insert(
                    "window_overlap_ms".to_owned(),
                    Value::from(duration_millis(config.window.overlap)),
                );
                AggregatedData::Windowed(self.windowed(config))
            }
            AggregationStrategy::Sample => {
                let merged = self.merged();
                let merged = self.maybe_dedup(merged, config, &mut metadata);
                metadata.insert("sample_rate".to_owned(), Value::from(config.sample_rate));
                metadata.insert("population".to_owned(), Value::from(merged.len()));
                let sampled = sample(merged, config.sample_rate, config.sample_seed);
                AggregatedData::Sampled(sampled.iter().map(|e| e.to_aggregated()).collect())
            }
        };

        let count = match &data {
            AggregatedData::Merged(logs) | AggregatedData::Sampled(logs) => logs.len(),
            AggregatedData::Grouped(groups) => groups.values().map(Vec::len).sum(),
            AggregatedData::Correlated(clusters) => clusters.iter().map(|c| c.logs.len()).sum(),
            AggregatedData::Windowed(windows) => windows.iter().map(|w| w.logs.len()).sum(),
        };

        AggregatedResult {
            strategy: config.strategy,
            timestamp: Utc::now(),
            count,
            processes: self.process_ids(),
            data,
            metadata,
        }
    }

    /// 모든 프로세스의 로그를 (시각, 삽입 순번) 순으로 병합합니다.
    fn merged(&self) -> Vec<&Entry> {
        let mut all: Vec<&Entry> = self.processes.values().flat_map(|p| p.logs.iter()).collect();
        all.sort_by_key(|e| e.order_key());
        all
    }

    fn maybe_dedup<'a>(
        &self,
        entries: Vec<&'a Entry>,
        config: &AggregatorConfig,
        metadata: &mut Map<String, Value>,
    ) -> Vec<&'a Entry> {
        if !config.deduplication {
            return entries;
        }
        let before = entries.len();
        let mut seen = HashSet::with_capacity(before);
        let kept: Vec<&Entry> = entries
            .into_iter()
            .filter(|e| seen.insert(self.fingerprint(&e.log)))
            .collect();
        metadata.insert(
            "duplicates_removed".to_owned(),
            Value::from(before - kept.len()),
        );
        kept
    }

    /// 설정된 필드들로 내용 지문을 계산합니다.
    fn fingerprint(&self, log: &ParsedLog) -> u64 {
        let mut hasher = Xxh3::new();
        for (name, path) in &self.dedup_paths {
            hasher.update(name.as_bytes());
            hasher.update(&[0x1f]);
            match path.resolve(log) {
                Some(value) => hasher.update(value.to_string().as_bytes()),
                None => hasher.update(&[0x00]),
            }
            hasher.update(&[0x1e]);
        }
        hasher.digest()
    }

    fn correlated(&self) -> Vec<Correlation> {
        self.correlations
            .iter()
            .map(|(key, bucket)| {
                let mut entries: Vec<&Entry> = bucket.iter().collect();
                entries.sort_by_key(|e| e.order_key());
                let processes: BTreeSet<&str> = entries.iter().map(|e| &*e.process_id).collect();
                Correlation {
                    key: key.clone(),
                    processes: processes.into_iter().map(str::to_owned).collect(),
                    logs: entries.iter().map(|e| e.to_aggregated()).collect(),
                }
            })
            .collect()
    }

    fn windowed(&self, config: &AggregatorConfig) -> Vec<TimeWindow> {
        let Some(origin) = self.window_origin else {
            return Vec::new();
        };
        let size = millis_i64(config.window.size);
        let step = millis_i64(config.window.step());

        self.windows
            .iter()
            .map(|(&index, bucket)| {
                let mut entries: Vec<&Entry> = bucket.iter().collect();
                entries.sort_by_key(|e| e.order_key());
                let start = shift(origin, step.saturating_mul(index));
                TimeWindow {
                    index,
                    start,
                    end: shift(start, size),
                    logs: entries.iter().map(|e| e.to_aggregated()).collect(),
                }
            })
            .collect()
    }
}

fn snapshot(id: &str, entry: &ProcessEntry) -> ProcessLog {
    ProcessLog {
        process_id: id.to_owned(),
        process_name: entry.info.name.clone(),
        pid: entry.info.pid,
        start_time: entry.start_time,
        logs: entry.logs.iter().map(|e| ParsedLog::clone(&e.log)).collect(),
        metadata: entry.info.metadata.clone(),
    }
}

fn remove_seq<K: Ord>(index: &mut BTreeMap<K, Vec<Entry>>, key: &K, seq: u64) {
    if let Some(bucket) = index.get_mut(key) {
        bucket.retain(|e| e.seq != seq);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}

/// `at`을 포함하는 윈도우 번호 범위.
///
/// 윈도우 `k`는 `[origin + k*step, origin + k*step + size)`입니다.
fn window_indices(
    origin: DateTime<Utc>,
    at: DateTime<Utc>,
    config: &AggregatorConfig,
) -> std::ops::RangeInclusive<i64> {
    let size = millis_i64(config.window.size);
    let step = millis_i64(config.window.step()).max(1);
    let offset = (at - origin).num_milliseconds();

    let last = offset.div_euclid(step);
    let mut first = (offset - size).div_euclid(step) + 1;
    // 원점 이전 윈도우는 원점보다 이른 레코드에만 생깁니다.
    if offset >= 0 {
        first = first.max(0);
    }
    first..=last
}

/// 레코드마다 독립 베르누이 시행으로 샘플링합니다.
fn sample(entries: Vec<&Entry>, rate: f64, seed: Option<u64>) -> Vec<&Entry> {
    if rate >= 1.0 {
        return entries;
    }
    if rate <= 0.0 {
        return Vec::new();
    }
    match seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            entries
                .into_iter()
                .filter(|_| rng.random::<f64>() < rate)
                .collect()
        }
        None => {
            let mut rng = rand::rng();
            entries
                .into_iter()
                .filter(|_| rng.random::<f64>() < rate)
                .collect()
        }
    }
}

fn duration_millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn millis_i64(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// 범위를 벗어나면 원래 시각을 그대로 둡니다.
fn shift(at: DateTime<Utc>, millis: i64) -> DateTime<Utc> {
    TimeDelta::try_milliseconds(millis)
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(at)
}
