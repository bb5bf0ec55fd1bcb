//! 프리셋 파일 로더 -- YAML 필터 프리셋을 디스크에서 로드합니다.
//!
//! 디렉토리 내의 `.yml`/`.yaml` 파일을 스캔하고 파싱합니다.
//! 개별 파일 파싱 실패는 경고 로그를 남기고 건너뜁니다.

use std::collections::HashSet;
use std::path::Path;

use crate::error::LogPipelineError;

use super::types::{DEFAULT_MAX_DEPTH, FilterPreset};

const MAX_PRESET_FILE_SIZE: u64 = 1024 * 1024; // 1MB
const MAX_PRESETS_COUNT: usize = 1_000;

/// 프리셋 파일 로더
pub struct PresetLoader;

impl PresetLoader {
    /// 디렉토리에서 모든 YAML 프리셋 파일을 로드합니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 프리셋 수가 `MAX_PRESETS_COUNT`를 초과하는 경우
    pub async fn load_directory(
        dir: impl AsRef<Path>,
    ) -> Result<Vec<FilterPreset>, LogPipelineError> {
        let dir = dir.as_ref();
        let load_err = |reason: String| LogPipelineError::PresetLoad {
            path: dir.display().to_string(),
            reason,
        };

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| load_err(format!("failed to read directory: {e}")))?;

        let mut presets = Vec::new();
        let mut seen = HashSet::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| load_err(format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if !is_yaml {
                continue;
            }

            match Self::load_file(&path).await {
                Ok(preset) => {
                    if !seen.insert(preset.name.clone()) {
                        tracing::warn!(
                            preset = %preset.name,
                            path = %path.display(),
                            "duplicate preset name, skipping"
                        );
                        continue;
                    }
                    presets.push(preset);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load preset file, skipping"
                    );
                }
            }

            if presets.len() > MAX_PRESETS_COUNT {
                return Err(load_err(format!("too many presets: max {MAX_PRESETS_COUNT}")));
            }
        }

        // 디렉토리 순회 순서는 플랫폼마다 다름
        presets.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(dir = %dir.display(), count = presets.len(), "loaded filter presets");
        Ok(presets)
    }

    /// 단일 YAML 파일에서 프리셋을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<FilterPreset, LogPipelineError> {
        let path = path.as_ref();
        let load_err = |reason: String| LogPipelineError::PresetLoad {
            path: path.display().to_string(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| load_err(format!("failed to read file metadata: {e}")))?;
        if metadata.len() > MAX_PRESET_FILE_SIZE {
            return Err(load_err(format!(
                "file too large: {} bytes (max: {MAX_PRESET_FILE_SIZE})",
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_err(format!("failed to read file: {e}")))?;

        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// YAML 문자열을 파싱하여 프리셋을 생성합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<FilterPreset, LogPipelineError> {
        let preset: FilterPreset =
            serde_yaml::from_str(yaml_str).map_err(|e| LogPipelineError::PresetLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        preset
            .validate(DEFAULT_MAX_DEPTH)
            .map_err(|e| LogPipelineError::PresetLoad {
                path: source.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERRORS_YAML: &str = r#"
name: errors
description: error and above
group:
  rules:
    - field: level
      operator: gte
      value: error
"#;

    #[test]
    fn parse_valid_yaml() {
        let preset = PresetLoader::parse_yaml(ERRORS_YAML, "errors.yml").unwrap();
        assert_eq!(preset.name, "errors");
        assert!(preset.enabled);
        assert_eq!(preset.group.rules.len(), 1);
    }

    #[test]
    fn parse_invalid_yaml_returns_error() {
        let result = PresetLoader::parse_yaml("not: [valid: yaml: {{{", "bad.yml");
        assert!(matches!(result, Err(LogPipelineError::PresetLoad { .. })));
    }

    #[test]
    fn invalid_rule_shape_is_rejected() {
        let yaml = r#"
name: broken
group:
  rules:
    - field: source
      operator: in
      value: api
"#;
        assert!(PresetLoader::parse_yaml(yaml, "broken.yml").is_err());
    }

    #[tokio::test]
    async fn load_directory_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("errors.yaml"), ERRORS_YAML)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("dup.yml"), ERRORS_YAML)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("bad.yml"), "{{{").await.unwrap();
        tokio::fs::write(dir.path().join("readme.txt"), "ignored")
            .await
            .unwrap();

        let presets = PresetLoader::load_directory(dir.path()).await.unwrap();
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].name, "errors");
    }

    #[tokio::test]
    async fn load_nonexistent_directory_returns_error() {
        let result = PresetLoader::load_directory("/nonexistent/path/presets").await;
        assert!(result.is_err());
    }
}
