//! # 해시 그리드 생성 설정
//!
//! 레벨 수, 레벨당 피처 수, 해시 테이블 예산 같은 값은 생성 시점 상수입니다.
//! `validate`는 커널 디스패치 전에 한 번만 호출되어 잘못된 설정을 조기에 거부합니다.

use crate::error::{HashGridError, Result};

/// 배치 용량 하한. 이보다 작은 힌트는 이 값으로 올립니다.
pub const MIN_BATCH_CAPACITY: usize = 2048;

/// 그래디언트 산포(scatter) 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScatterStrategy {
    /// (샘플, 레벨) 단위 태스크가 공유 버퍼에 원자적 덧셈을 수행합니다.
    #[default]
    Atomic,
    /// 워커마다 별도 버퍼에 누적한 뒤 마지막에 합칩니다.
    Partitioned,
}

/// 커널이 실행될 장치.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// `cuda` 피처가 켜진 경우에만 사용 가능.
    Cuda,
}

impl Device {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(HashGridError::invalid_config(format!(
                "unknown device '{}'",
                other
            ))),
        }
    }
}

/// 해시 그리드 인코더 설정.
#[derive(Debug, Clone, PartialEq)]
pub struct HashGridConfig {
    pub base_resolution: u32,
    pub num_levels: usize,
    pub features_per_level: usize,
    /// 레벨당 최대 테이블 크기의 log2.
    pub log2_hashmap_size: u32,
    /// 레벨 간 해상도 증가율 (> 1).
    pub growth_factor: f64,
    pub batch_capacity: usize,
    /// 입력 좌표 범위 `[-bound, bound]`.
    pub bound: f32,
    /// 파라미터 초기화 범위 `[-init_scale, init_scale]`.
    pub init_scale: f32,
    pub seed: Option<u64>,
    pub scatter: ScatterStrategy,
    pub device: Device,
}

impl Default for HashGridConfig {
    fn default() -> Self {
        Self {
            base_resolution: 16,
            num_levels: 16,
            features_per_level: 2,
            log2_hashmap_size: 19,
            growth_factor: 1.3195079565048218,
            batch_capacity: 8192,
            bound: 1.0,
            init_scale: 1e-4,
            seed: None,
            scatter: ScatterStrategy::Atomic,
            device: Device::Cpu,
        }
    }
}

impl HashGridConfig {
    pub fn new(growth_factor: f64) -> Self {
        Self {
            growth_factor,
            ..Self::default()
        }
    }

    pub fn with_base_resolution(mut self, base_resolution: u32) -> Self {
        self.base_resolution = base_resolution;
        self
    }

    pub fn with_num_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
        self
    }

    pub fn with_features_per_level(mut self, features_per_level: usize) -> Self {
        self.features_per_level = features_per_level;
        self
    }

    pub fn with_log2_hashmap_size(mut self, log2_hashmap_size: u32) -> Self {
        self.log2_hashmap_size = log2_hashmap_size;
        self
    }

    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> Self {
        self.batch_capacity = batch_capacity;
        self
    }

    pub fn with_bound(mut self, bound: f32) -> Self {
        self.bound = bound;
        self
    }

    pub fn with_init_scale(mut self, init_scale: f32) -> Self {
        self.init_scale = init_scale;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_scatter(mut self, scatter: ScatterStrategy) -> Self {
        self.scatter = scatter;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// 레벨당 최대 테이블 크기 `2^log2_hashmap_size`.
    pub fn max_table_size(&self) -> u32 {
        1u32 << self.log2_hashmap_size
    }

    /// 임베딩 폭 = 레벨 수 × 레벨당 피처 수.
    pub fn output_dim(&self) -> usize {
        self.num_levels * self.features_per_level
    }

    /// 하한이 적용된 배치 용량.
    pub fn effective_batch_capacity(&self) -> usize {
        self.batch_capacity.max(MIN_BATCH_CAPACITY)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_levels == 0 {
            return Err(HashGridError::invalid_config("num_levels must be positive"));
        }
        if self.features_per_level == 0 {
            return Err(HashGridError::invalid_config(
                "features_per_level must be positive",
            ));
        }
        if self.base_resolution == 0 {
            return Err(HashGridError::invalid_config(
                "base_resolution must be positive",
            ));
        }
        if !self.growth_factor.is_finite() || self.growth_factor <= 1.0 {
            return Err(HashGridError::invalid_config(format!(
                "growth_factor must be a finite value > 1, got {}",
                self.growth_factor
            )));
        }
        if !(3..=30).contains(&self.log2_hashmap_size) {
            return Err(HashGridError::invalid_config(format!(
                "log2_hashmap_size must be in [3, 30], got {}",
                self.log2_hashmap_size
            )));
        }
        if !self.bound.is_finite() || self.bound <= 0.0 {
            return Err(HashGridError::invalid_config(format!(
                "bound must be a finite positive value, got {}",
                self.bound
            )));
        }
        if !self.init_scale.is_finite() || self.init_scale < 0.0 {
            return Err(HashGridError::invalid_config(format!(
                "init_scale must be finite and non-negative, got {}",
                self.init_scale
            )));
        }
        if self.device == Device::Cuda && !cfg!(feature = "cuda") {
            return Err(HashGridError::invalid_config(
                "device 'cuda' requested but the crate was built without the `cuda` feature",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_profile() {
        let config = HashGridConfig::default();
        assert_eq!(config.base_resolution, 16);
        assert_eq!(config.num_levels, 16);
        assert_eq!(config.features_per_level, 2);
        assert_eq!(config.max_table_size(), 1 << 19);
        assert_eq!(config.output_dim(), 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_capacity_floor() {
        let config = HashGridConfig::default().with_batch_capacity(16);
        assert_eq!(config.effective_batch_capacity(), MIN_BATCH_CAPACITY);
        let config = HashGridConfig::default().with_batch_capacity(10_000);
        assert_eq!(config.effective_batch_capacity(), 10_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            HashGridConfig::default().with_num_levels(0),
            HashGridConfig::default().with_features_per_level(0),
            HashGridConfig::default().with_base_resolution(0),
            HashGridConfig::new(1.0),
            HashGridConfig::new(f64::NAN),
            HashGridConfig::default().with_log2_hashmap_size(2),
            HashGridConfig::default().with_log2_hashmap_size(31),
            HashGridConfig::default().with_bound(0.0),
            HashGridConfig::default().with_init_scale(-1.0),
        ];
        for config in bad.iter() {
            assert!(
                matches!(config.validate(), Err(HashGridError::InvalidConfig { .. })),
                "설정이 거부되어야 함: {:?}",
                config
            );
        }
    }

    #[test]
    fn test_device_parse() {
        assert_eq!(Device::parse("CPU").unwrap(), Device::Cpu);
        assert_eq!(Device::parse("cuda").unwrap(), Device::Cuda);
        assert!(Device::parse("tpu").is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_requires_feature() {
        let config = HashGridConfig::default().with_device(Device::Cuda);
        assert!(config.validate().is_err());
    }
}
