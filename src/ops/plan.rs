//! # 레벨 기하 계획
//!
//! 각 해상도 레벨의 격자 해상도, 테이블 크기, 인덱싱 방식, 그리고 평탄화된
//! 파라미터 버퍼 안에서의 오프셋을 생성 시점에 한 번 계산합니다.
//! 결과는 불변이며 인코딩/역전파 커널 모두의 입력이 됩니다.

use num_integer::Integer;

use crate::config::HashGridConfig;
use crate::error::Result;

/// 테이블 크기 정렬 단위.
pub const TABLE_ALIGNMENT: u64 = 8;

/// 레벨의 슬롯 주소 지정 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexingMode {
    /// 조밀 격자 전체가 테이블에 들어가므로 선형 인덱스를 그대로 씁니다.
    Dense,
    /// 곱셈 해시. 충돌을 허용합니다.
    Hashed,
}

/// 한 레벨의 불변 기하 정보.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelDescriptor {
    pub level: usize,
    /// 축당 격자 꼭짓점 수.
    pub resolution: u32,
    /// `B * exp(level * ln s) - 1`. 커널은 해상도를 다시 계산하지 않고 이 값을 씁니다.
    pub scale: f32,
    pub table_size: u32,
    /// 평탄화된 버퍼 안에서의 시작 슬롯.
    pub table_offset: usize,
    pub mode: IndexingMode,
}

impl LevelDescriptor {
    /// 슬롯 `slot`의 피처 `feature`가 놓인 평탄 인덱스.
    #[inline]
    pub fn param_index(&self, slot: u32, feature: usize, features_per_level: usize) -> usize {
        (self.table_offset + slot as usize) * features_per_level + feature
    }
}

/// 레벨 `level`의 격자 스케일. 지수/로그 항등식으로 계산해 레벨이 많아도
/// 반복 곱셈 오차가 쌓이지 않습니다.
pub fn level_scale(base_resolution: u32, growth_factor: f64, level: usize) -> f64 {
    base_resolution as f64 * (level as f64 * growth_factor.ln()).exp() - 1.0
}

/// 스케일에서 해상도를 얻는다: `ceil(scale) + 1`.
pub fn resolution_from_scale(scale: f64) -> u32 {
    (scale.ceil() as u32).saturating_add(1)
}

/// 전체 레벨 계획.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelPlan {
    levels: Vec<LevelDescriptor>,
    features_per_level: usize,
    total_slots: usize,
}

impl LevelPlan {
    /// 설정을 검증하고 레벨 계획을 만듭니다.
    pub fn from_config(config: &HashGridConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(
            config.base_resolution,
            config.num_levels,
            config.growth_factor,
            config.max_table_size(),
            config.features_per_level,
        ))
    }

    /// 검증 없이 계획을 계산합니다. 실패 경로가 없습니다.
    pub fn build(
        base_resolution: u32,
        num_levels: usize,
        growth_factor: f64,
        max_table_size: u32,
        features_per_level: usize,
    ) -> Self {
        let mut levels = Vec::with_capacity(num_levels);
        let mut offset = 0usize;

        for level in 0..num_levels {
            let scale = level_scale(base_resolution, growth_factor, level);
            let resolution = resolution_from_scale(scale);

            let raw_size = (resolution as u64).saturating_pow(3);
            let aligned = Integer::next_multiple_of(&raw_size, &TABLE_ALIGNMENT);
            let table_size = aligned.min(max_table_size as u64) as u32;
            let mode = if raw_size <= table_size as u64 {
                IndexingMode::Dense
            } else {
                IndexingMode::Hashed
            };

            let descriptor = LevelDescriptor {
                level,
                resolution,
                scale: scale as f32,
                table_size,
                table_offset: offset,
                mode,
            };
            tracing::debug!(
                level,
                resolution,
                table_size,
                table_offset = offset,
                mode = ?mode,
                "planned hash grid level"
            );
            levels.push(descriptor);
            offset += table_size as usize;
        }

        Self {
            levels,
            features_per_level,
            total_slots: offset,
        }
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        &self.levels
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn features_per_level(&self) -> usize {
        self.features_per_level
    }

    /// 모든 레벨 테이블 크기의 합.
    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// 평탄화된 파라미터 버퍼 길이.
    pub fn num_parameters(&self) -> usize {
        self.total_slots * self.features_per_level
    }

    pub fn output_dim(&self) -> usize {
        self.levels.len() * self.features_per_level
    }

    pub fn dense_levels(&self) -> usize {
        self.levels
            .iter()
            .filter(|l| l.mode == IndexingMode::Dense)
            .count()
    }
}
