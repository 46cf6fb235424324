//! # 인코딩 커널
//!
//! 위치 배치를 받아 레벨마다 주변 8개 꼭짓점의 피처를 삼선형 보간해
//! `[N, L·F]` 임베딩을 만듭니다. 출력 쓰기 외에 부수 효과가 없는 순수 함수입니다.
//!
//! 논리적 스레드 하나가 (샘플, 레벨) 쌍 하나를 맡고, rayon이 이를 병렬로 돌립니다.
//! 파라미터 버퍼는 읽기 전용으로 모든 스레드가 공유합니다.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::ops::interp::corner_slots;
use crate::ops::plan::LevelPlan;

/// 샘플 `sample`의 좌표를 읽습니다.
#[inline]
pub(crate) fn position_of(positions: &ArrayView2<f32>, sample: usize) -> [f32; 3] {
    [
        positions[[sample, 0]],
        positions[[sample, 1]],
        positions[[sample, 2]],
    ]
}

/// 미리 할당된 평탄 출력 버퍼 `out` (`N·L·F` 길이)에 임베딩을 씁니다.
///
/// # 인자
/// * `positions` - `[N, 3]`, `[0, 1]³`로 정규화된 좌표.
/// * `params` - 평탄화된 파라미터 버퍼, 길이 `plan.num_parameters()`.
/// * `plan` - 레벨 계획.
/// * `out` - 행 우선 `[N, L·F]` 출력.
///
/// 형태는 호출자가 보장합니다. 범위 밖 좌표는 에러 없이 어떤 유효 슬롯을 읽습니다.
pub fn hash_encode_into(
    positions: &ArrayView2<f32>,
    params: &[f32],
    plan: &LevelPlan,
    out: &mut [f32],
) {
    let levels = plan.levels();
    let num_levels = levels.len();
    let features = plan.features_per_level();
    debug_assert_eq!(out.len(), positions.nrows() * num_levels * features);
    debug_assert_eq!(params.len(), plan.num_parameters());

    out.par_chunks_mut(features)
        .enumerate()
        .for_each(|(task, feats)| {
            let sample = task / num_levels;
            let level = &levels[task % num_levels];
            let position = position_of(positions, sample);

            feats.iter_mut().for_each(|v| *v = 0.0);
            for (slot, weight) in corner_slots(level, position) {
                let base = level.param_index(slot, 0, features);
                for (f, acc) in feats.iter_mut().enumerate() {
                    *acc += weight * params[base + f];
                }
            }
        });
}

/// `[N, 3]` 위치를 인코딩해 `[N, L·F]` 임베딩을 반환합니다.
pub fn hash_encode(positions: &ArrayView2<f32>, params: &[f32], plan: &LevelPlan) -> Array2<f32> {
    let mut output = Array2::<f32>::zeros((positions.nrows(), plan.output_dim()));
    let out = output
        .as_slice_mut()
        .expect("freshly allocated array is contiguous");
    hash_encode_into(positions, params, plan, out);
    output
}
