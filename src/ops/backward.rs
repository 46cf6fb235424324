//! # 그래디언트 산포 커널
//!
//! 인코딩 커널과 똑같은 꼭짓점/가중치 계산을 거친 뒤, 피처를 읽는 대신
//! `weight × grad_output[sample, level, f]`를 파라미터 그래디언트 슬롯에 더합니다.
//!
//! 여러 (샘플, 레벨, 꼭짓점)이 같은 슬롯을 가리킬 수 있으므로(해시 충돌, 이웃
//! 샘플이 공유하는 꼭짓점) 병렬 누산은 원자적이거나 워커별 버퍼로 분리되어야 합니다.

use ndarray::{Array1, ArrayView2};
use rayon::prelude::*;

use crate::config::ScatterStrategy;
use crate::error::Result;
use crate::ops::atomic::{try_zeroed_vec, GradientAccumulator};
use crate::ops::encode::position_of;
use crate::ops::interp::corner_slots;
use crate::ops::plan::LevelPlan;

/// 워커별 버퍼 방식에서 한 파티션이 맡는 최소 샘플 수.
const PARTITION_MIN_SAMPLES: usize = 256;

/// 공유 누산기에 원자적으로 더합니다. 누산기는 먼저 0으로 초기화됩니다.
///
/// 가중치가 0인 꼭짓점도 `0 × grad`를 더하므로 비유한 출력 그래디언트는
/// 워커별 버퍼 방식과 똑같이 전파됩니다.
///
/// # 인자
/// * `positions` - forward에 썼던 `[N, 3]` 좌표.
/// * `grad_output` - `[N, L·F]` 출력 그래디언트.
/// * `plan` - 레벨 계획.
/// * `accumulator` - 길이 `plan.num_parameters()`.
pub fn scatter_atomic(
    positions: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    plan: &LevelPlan,
    accumulator: &GradientAccumulator,
) {
    accumulator.zero();

    let levels = plan.levels();
    let num_levels = levels.len();
    let features = plan.features_per_level();
    let tasks = positions.nrows() * num_levels;

    (0..tasks).into_par_iter().for_each(|task| {
        let sample = task / num_levels;
        let level = &levels[task % num_levels];
        let position = position_of(positions, sample);
        let column = level.level * features;

        for (slot, weight) in corner_slots(level, position) {
            let base = level.param_index(slot, 0, features);
            for f in 0..features {
                let upstream = grad_output[[sample, column + f]];
                accumulator.add(base + f, weight * upstream);
            }
        }
    });
}

/// 파티션 수: 워커 수를 넘지 않고, 파티션마다 최소 `PARTITION_MIN_SAMPLES`개.
fn partition_count(rows: usize) -> usize {
    let by_size = (rows + PARTITION_MIN_SAMPLES - 1) / PARTITION_MIN_SAMPLES;
    by_size.clamp(1, rayon::current_num_threads().max(1))
}

/// 샘플을 워커 수만큼의 파티션으로 나눠 각자 평범한 버퍼에 누산한 뒤 합칩니다.
/// 잠금이나 원자 연산이 없습니다.
///
/// 버퍼는 파티션마다 하나씩만 할당되며, 할당 실패는 `Allocation` 에러로 돌아옵니다.
pub fn scatter_partitioned(
    positions: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    plan: &LevelPlan,
) -> Result<Vec<f32>> {
    let levels = plan.levels();
    let features = plan.features_per_level();
    let total = plan.num_parameters();
    let rows = positions.nrows();

    let partitions = partition_count(rows);
    let chunk = (rows + partitions - 1) / partitions;
    let mut buffers = (0..partitions)
        .map(|_| try_zeroed_vec(total, "partitioned gradient"))
        .collect::<Result<Vec<_>>>()?;

    buffers
        .par_iter_mut()
        .enumerate()
        .for_each(|(part, local)| {
            let start = (part * chunk).min(rows);
            let end = (start + chunk).min(rows);
            for sample in start..end {
                let position = position_of(positions, sample);
                for level in levels {
                    let column = level.level * features;
                    for (slot, weight) in corner_slots(level, position) {
                        let base = level.param_index(slot, 0, features);
                        for f in 0..features {
                            local[base + f] += weight * grad_output[[sample, column + f]];
                        }
                    }
                }
            }
        });

    let mut buffers = buffers.into_iter();
    let mut merged = match buffers.next() {
        Some(first) => first,
        None => return try_zeroed_vec(total, "partitioned gradient"),
    };
    for local in buffers {
        merged
            .par_iter_mut()
            .zip(local.par_iter())
            .for_each(|(a, b)| *a += *b);
    }
    Ok(merged)
}

/// 선택한 방식으로 누산기를 채웁니다.
pub fn hash_encode_backward_into(
    positions: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    plan: &LevelPlan,
    strategy: ScatterStrategy,
    accumulator: &GradientAccumulator,
) -> Result<()> {
    debug_assert_eq!(accumulator.len(), plan.num_parameters());
    debug_assert_eq!(grad_output.nrows(), positions.nrows());
    match strategy {
        ScatterStrategy::Atomic => scatter_atomic(positions, grad_output, plan, accumulator),
        ScatterStrategy::Partitioned => {
            let merged = scatter_partitioned(positions, grad_output, plan)?;
            accumulator.store_from(&merged);
        }
    }
    Ok(())
}

/// `[N, L·F]` 출력 그래디언트로부터 파라미터 그래디언트를 계산합니다.
pub fn hash_encode_backward(
    positions: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    plan: &LevelPlan,
    strategy: ScatterStrategy,
) -> Result<Array1<f32>> {
    match strategy {
        ScatterStrategy::Atomic => {
            let accumulator = GradientAccumulator::try_zeros(plan.num_parameters())?;
            scatter_atomic(positions, grad_output, plan, &accumulator);
            Ok(accumulator.to_array())
        }
        ScatterStrategy::Partitioned => Ok(Array1::from_vec(scatter_partitioned(
            positions,
            grad_output,
            plan,
        )?)),
    }
}
