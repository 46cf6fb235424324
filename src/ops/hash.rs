//! # 공간 해시 함수
//!
//! 정수 격자 좌표를 레벨 테이블의 슬롯 `[0, table_size)`로 보냅니다.
//! 조밀 레벨은 선형 인덱스, 해시 레벨은 곱셈 해시를 씁니다. 해시 충돌은 의도된
//! 것이며 학습된 피처가 흡수합니다. 체이닝으로 "고치지" 않습니다.

use crate::ops::plan::{IndexingMode, LevelDescriptor};

/// 축별 해시 곱수. 첫 축은 1이라 연속한 x 좌표가 서로 다른 슬롯에 흩어집니다.
pub const HASH_PRIMES: [u32; 3] = [1, 2_654_435_761, 805_459_861];

/// 조밀 격자 선형 인덱스 `gx + gy·res + gz·res²` (u32 랩어라운드).
#[inline]
pub fn dense_index(corner: [u32; 3], resolution: u32) -> u32 {
    let mut index = 0u32;
    let mut stride = 1u32;
    for &coord in corner.iter() {
        index = index.wrapping_add(coord.wrapping_mul(stride));
        stride = stride.wrapping_mul(resolution);
    }
    index
}

/// 축별 곱의 XOR (u32 랩어라운드).
#[inline]
pub fn fast_hash(corner: [u32; 3]) -> u32 {
    corner
        .iter()
        .zip(HASH_PRIMES.iter())
        .fold(0u32, |acc, (&coord, &prime)| acc ^ coord.wrapping_mul(prime))
}

/// 꼭짓점을 레벨 테이블 슬롯으로 보냅니다.
///
/// 두 방식 모두 마지막에 `table_size`로 나머지를 취하므로 범위 밖 좌표도
/// 항상 유효한 슬롯에 떨어집니다.
#[inline]
pub fn slot(level: &LevelDescriptor, corner: [u32; 3]) -> u32 {
    let raw = match level.mode {
        IndexingMode::Dense => dense_index(corner, level.resolution),
        IndexingMode::Hashed => fast_hash(corner),
    };
    raw % level.table_size
}
