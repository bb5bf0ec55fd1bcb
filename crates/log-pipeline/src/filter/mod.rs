//! 필터 모듈 -- 규칙 트리로 레코드 통과 여부를 결정
//!
//! [`LogFilter`]는 최상위 규칙/그룹과 활성 프리셋을 기본 연산자로 결합한
//! 하나의 술어를 평가합니다. 컴파일된 술어는 캐싱되며, 규칙이나 프리셋이
//! 바뀌면 무효화되어 다음 `filter` 호출에서 다시 컴파일됩니다.
//!
//! # 아키텍처
//! - [`types`]: 규칙 트리 데이터 구조와 프리셋 팩토리
//! - [`compiled`]: 필드 경로 해석과 연산자 평가
//! - [`loader`]: YAML 프리셋 파일 로딩
//!
//! # 사용 예시
//! ```ignore
//! let mut filter = LogFilter::new(FilterConfig::default())?;
//! filter.add_preset(FilterPreset::error_level())?;
//! let errors = filter.filter_batch(logs);
//! ```

pub(crate) mod compiled;
pub mod loader;
pub mod types;

pub use loader::PresetLoader;
pub use types::{
    DEFAULT_MAX_DEPTH, FilterConfig, FilterGroup, FilterNode, FilterOperator, FilterPreset,
    FilterRule, GroupOperator,
};

use metrics::counter;
use serde_json::Value;

use logweave_core::metrics as m;
use logweave_core::types::ParsedLog;

use self::compiled::{CompiledNode, Subject};
use crate::error::LogPipelineError;

/// 규칙 트리 필터
pub struct LogFilter {
    config: FilterConfig,
    /// 캐싱된 술어. `None`이면 다음 평가 전에 다시 컴파일합니다.
    compiled: Option<CompiledNode>,
    matched: u64,
    rejected: u64,
}

impl LogFilter {
    /// 설정을 검증하고 필터를 생성합니다.
    ///
    /// 깊이 초과, 잘못된 정규식, 연산자와 맞지 않는 값은 `Config` 에러입니다.
    pub fn new(config: FilterConfig) -> Result<Self, LogPipelineError> {
        config.validate()?;
        let compiled = Some(compile(&config)?);
        Ok(Self {
            config,
            compiled,
            matched: 0,
            rejected: 0,
        })
    }

    /// 레코드가 술어를 통과하는지 평가합니다.
    pub fn filter(&mut self, log: &ParsedLog) -> bool {
        self.evaluate(&Subject::Log(log))
    }

    /// 임의의 JSON 객체를 평가합니다. 필드 경로는 객체 안의 점 경로로 해석됩니다.
    pub fn filter_value(&mut self, value: &Value) -> bool {
        self.evaluate(&Subject::Value(value))
    }

    /// 통과한 레코드만 남깁니다. 순서는 유지됩니다.
    pub fn filter_batch(&mut self, logs: Vec<ParsedLog>) -> Vec<ParsedLog> {
        logs.into_iter().filter(|log| self.filter(log)).collect()
    }

    fn evaluate(&mut self, subject: &Subject<'_>) -> bool {
        let passed = match self.predicate() {
            Some(node) => node.eval(subject),
            None => false,
        };

        if passed {
            self.matched += 1;
            counter!(m::FILTER_MATCHED_TOTAL).increment(1);
        } else {
            self.rejected += 1;
            counter!(m::FILTER_REJECTED_TOTAL).increment(1);
        }
        passed
    }

    fn predicate(&mut self) -> Option<&CompiledNode> {
        if self.compiled.is_none() {
            match compile(&self.config) {
                Ok(node) => self.compiled = Some(node),
                Err(e) => {
                    // add_rule/add_preset에서 검증하므로 도달하지 않아야 함
                    tracing::error!(error = %e, "failed to recompile filter predicate");
                    return None;
                }
            }
        }
        self.compiled.as_ref()
    }

    fn invalidate(&mut self) {
        self.compiled = None;
    }

    // --- 규칙 관리 ---

    /// 최상위 규칙 또는 그룹을 추가합니다.
    pub fn add_rule(&mut self, node: impl Into<FilterNode>) -> Result<(), LogPipelineError> {
        let node = node.into();
        node.validate(self.config.max_depth)?;
        CompiledNode::compile(&node)?;
        self.config.rules.push(node);
        self.invalidate();
        Ok(())
    }

    /// 인덱스의 최상위 규칙을 제거합니다.
    pub fn remove_rule(&mut self, index: usize) -> Option<FilterNode> {
        if index >= self.config.rules.len() {
            return None;
        }
        let removed = self.config.rules.remove(index);
        self.invalidate();
        Some(removed)
    }

    /// 모든 최상위 규칙을 제거합니다. 프리셋은 유지됩니다.
    pub fn clear_rules(&mut self) {
        self.config.rules.clear();
        self.invalidate();
    }

    /// 현재 최상위 규칙 목록
    pub fn rules(&self) -> &[FilterNode] {
        &self.config.rules
    }

    // --- 프리셋 관리 ---

    /// 프리셋을 추가합니다. 같은 이름이 있으면 교체합니다.
    pub fn add_preset(&mut self, preset: FilterPreset) -> Result<(), LogPipelineError> {
        preset.validate(self.config.max_depth)?;
        CompiledNode::compile_group(&preset.group)?;

        match self
            .config
            .presets
            .iter_mut()
            .find(|p| p.name == preset.name)
        {
            Some(existing) => *existing = preset,
            None => self.config.presets.push(preset),
        }
        self.invalidate();
        Ok(())
    }

    /// 프리셋을 제거합니다.
    pub fn remove_preset(&mut self, name: &str) -> Option<FilterPreset> {
        let index = self.config.presets.iter().position(|p| p.name == name)?;
        self.invalidate();
        Some(self.config.presets.remove(index))
    }

    /// 프리셋을 활성화합니다. 프리셋이 없으면 `false`입니다.
    pub fn enable_preset(&mut self, name: &str) -> bool {
        self.set_preset_enabled(name, true)
    }

    /// 프리셋을 비활성화합니다. 프리셋이 없으면 `false`입니다.
    pub fn disable_preset(&mut self, name: &str) -> bool {
        self.set_preset_enabled(name, false)
    }

    fn set_preset_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(preset) = self.config.presets.iter_mut().find(|p| p.name == name) else {
            return false;
        };
        if preset.enabled != enabled {
            preset.enabled = enabled;
            self.invalidate();
        }
        true
    }

    /// 프리셋 목록
    pub fn presets(&self) -> &[FilterPreset] {
        &self.config.presets
    }

    /// 디렉토리의 YAML 프리셋을 모두 추가합니다. 추가된 수를 반환합니다.
    pub async fn load_presets_from_dir(
        &mut self,
        dir: impl AsRef<std::path::Path>,
    ) -> Result<usize, LogPipelineError> {
        let presets = PresetLoader::load_directory(dir).await?;
        let count = presets.len();
        for preset in presets {
            self.add_preset(preset)?;
        }
        Ok(count)
    }

    // --- 통계 ---

    /// 통과한 레코드 수
    pub fn matched_count(&self) -> u64 {
        self.matched
    }

    /// 거부된 레코드 수
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// 통계를 초기화합니다.
    pub fn reset_stats(&mut self) {
        self.matched = 0;
        self.rejected = 0;
    }
}

impl std::fmt::Debug for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFilter")
            .field("rules", &self.config.rules.len())
            .field("presets", &self.config.presets.len())
            .field("compiled", &self.compiled.is_some())
            .field("matched", &self.matched)
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// 최상위 규칙과 활성 프리셋을 기본 연산자로 결합합니다.
/// 결합할 것이 없으면 모든 레코드를 통과시킵니다.
fn compile(config: &FilterConfig) -> Result<CompiledNode, LogPipelineError> {
    let mut children = config
        .rules
        .iter()
        .map(CompiledNode::compile)
        .collect::<Result<Vec<_>, _>>()?;
    for preset in config.presets.iter().filter(|p| p.enabled) {
        children.push(CompiledNode::compile_group(&preset.group)?);
    }

    let operator = if children.is_empty() {
        GroupOperator::And
    } else {
        config.operator
    };
    Ok(CompiledNode::Group { operator, children })
}
