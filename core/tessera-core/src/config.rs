//! 엔진 설정
//!
//! 기본값 → `TESSERA_*` 환경 변수 → JSON 파일 순으로 덮어쓴다.

use crate::codegen::execution::ParallelizationPolicy;
use crate::error::{TesseraError, TesseraResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Tunables shared by the compiler, the runtime structures and the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 벡터화 루프 한 번에 처리하는 최대 행 수
    pub vector_size: usize,
    /// 타일 그룹 하나에 들어가는 최대 행 수
    pub tile_group_size: usize,
    /// 해시 테이블 초기 버킷 수 (2의 거듭제곱으로 올림)
    pub hash_table_capacity: usize,
    /// 리사이즈 임계 적재율
    pub hash_table_load_factor: f64,
    /// false면 모든 파이프라인을 단일 워커로 실행
    pub parallel_execution: bool,
    /// 워커 풀 크기 정책
    pub parallelism: ParallelizationPolicy,
    /// 워커 하나가 최소로 맡는 타일 그룹 수
    pub min_tile_groups_per_worker: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vector_size: 1024,
            tile_group_size: 4096,
            hash_table_capacity: 256,
            hash_table_load_factor: 0.75,
            parallel_execution: true,
            parallelism: ParallelizationPolicy::Auto,
            min_tile_groups_per_worker: 1,
        }
    }
}

impl EngineConfig {
    /// Environment variable prefix
    pub const ENV_PREFIX: &'static str = "TESSERA_";

    /// Single-worker configuration, handy for deterministic tests
    pub fn serial() -> Self {
        Self {
            parallel_execution: false,
            ..Self::default()
        }
    }

    pub fn with_vector_size(mut self, vector_size: usize) -> Self {
        self.vector_size = vector_size;
        self
    }

    pub fn with_tile_group_size(mut self, tile_group_size: usize) -> Self {
        self.tile_group_size = tile_group_size;
        self
    }

    pub fn with_parallelism(mut self, policy: ParallelizationPolicy) -> Self {
        self.parallelism = policy;
        self
    }

    /// 환경 변수에서 로드 (`TESSERA_VECTOR_SIZE`, `TESSERA_PARALLEL_EXECUTION`, ...)
    pub fn load_from_env(mut self) -> TesseraResult<Self> {
        if let Some(v) = env_value("VECTOR_SIZE")? {
            self.vector_size = v;
        }
        if let Some(v) = env_value("TILE_GROUP_SIZE")? {
            self.tile_group_size = v;
        }
        if let Some(v) = env_value("HASH_TABLE_CAPACITY")? {
            self.hash_table_capacity = v;
        }
        if let Some(v) = env_value("HASH_TABLE_LOAD_FACTOR")? {
            self.hash_table_load_factor = v;
        }
        if let Some(v) = env_value("PARALLEL_EXECUTION")? {
            self.parallel_execution = v;
        }
        if let Some(v) = env_value("WORKER_THREADS")? {
            self.parallelism = match v {
                0 => ParallelizationPolicy::Auto,
                n => ParallelizationPolicy::Fixed(n),
            };
        }
        if let Some(v) = env_value("MIN_TILE_GROUPS_PER_WORKER")? {
            self.min_tile_groups_per_worker = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// JSON 파일에서 로드
    pub fn from_file(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// JSON 파일로 저장
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> TesseraResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> TesseraResult<()> {
        if self.vector_size == 0 {
            return Err(TesseraError::Config("vector_size must be > 0".into()));
        }
        if self.tile_group_size == 0 {
            return Err(TesseraError::Config("tile_group_size must be > 0".into()));
        }
        if !(self.hash_table_load_factor > 0.0 && self.hash_table_load_factor < 1.0) {
            return Err(TesseraError::Config(format!(
                "hash_table_load_factor must be in (0, 1), got {}",
                self.hash_table_load_factor
            )));
        }
        if let ParallelizationPolicy::Fixed(0) = self.parallelism {
            return Err(TesseraError::Config("fixed worker count must be > 0".into()));
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &str) -> TesseraResult<Option<T>> {
    let name = format!("{}{key}", EngineConfig::ENV_PREFIX);
    match env::var(&name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TesseraError::Config(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}
