//! 삼선형 보간 기하: 기준 꼭짓점, 소수부, 8개 꼭짓점 가중치.
//! 인코딩과 역전파 커널이 같은 함수를 써야 두 방향의 기하가 어긋나지 않습니다.

use crate::ops::hash;
use crate::ops::plan::LevelDescriptor;

/// 셀을 둘러싼 꼭짓점 수.
pub const NUM_CORNERS: usize = 8;

/// 한 레벨에서 연속 좌표가 놓인 셀.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSample {
    pub base: [u32; 3],
    pub frac: [f32; 3],
}

impl CellSample {
    /// `p = x·scale + 0.5`의 바닥과 소수부를 구합니다.
    ///
    /// 음수 바닥값은 `i32`를 거쳐 `u32`로 감기고 NaN은 0이 됩니다. 어떤 입력도
    /// 패닉하지 않습니다.
    #[inline]
    pub fn locate(position: [f32; 3], scale: f32) -> Self {
        let mut base = [0u32; 3];
        let mut frac = [0f32; 3];
        for d in 0..3 {
            let p = position[d] * scale + 0.5;
            let floor = p.floor();
            base[d] = floor as i32 as u32;
            frac[d] = p - floor;
        }
        Self { base, frac }
    }

    /// 꼭짓점 `index`의 정수 좌표와 가중치. 비트 `d`가 1이면 축 `d`로 +1.
    #[inline]
    pub fn corner(&self, index: usize) -> ([u32; 3], f32) {
        let mut coord = self.base;
        let mut weight = 1.0f32;
        for d in 0..3 {
            if index & (1 << d) == 0 {
                weight *= 1.0 - self.frac[d];
            } else {
                coord[d] = coord[d].wrapping_add(1);
                weight *= self.frac[d];
            }
        }
        (coord, weight)
    }
}

/// 레벨 테이블 안의 8개 꼭짓점 슬롯과 가중치.
#[inline]
pub fn corner_slots(level: &LevelDescriptor, position: [f32; 3]) -> [(u32, f32); NUM_CORNERS] {
    let cell = CellSample::locate(position, level.scale);
    let mut out = [(0u32, 0f32); NUM_CORNERS];
    for (index, entry) in out.iter_mut().enumerate() {
        let (coord, weight) = cell.corner(index);
        *entry = (hash::slot(level, coord), weight);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_sum_to_one() {
        let positions = [
            [0.1f32, 0.2, 0.3],
            [0.5, 0.5, 0.5],
            [0.999, 0.001, 0.73],
            [0.0, 1.0, 0.25],
        ];
        for &scale in [15.0f32, 22.15, 511.0].iter() {
            for &position in positions.iter() {
                let cell = CellSample::locate(position, scale);
                let total: f32 = (0..NUM_CORNERS).map(|i| cell.corner(i).1).sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_grid_aligned_point_has_single_corner() {
        // 0.5 · 15 + 0.5 = 8.0 → 정확히 꼭짓점 (8, 8, 8)
        let cell = CellSample::locate([0.5, 0.5, 0.5], 15.0);
        assert_eq!(cell.base, [8, 8, 8]);
        assert_eq!(cell.frac, [0.0, 0.0, 0.0]);
        let (coord, weight) = cell.corner(0);
        assert_eq!(coord, [8, 8, 8]);
        assert_eq!(weight, 1.0);
        for index in 1..NUM_CORNERS {
            assert_eq!(cell.corner(index).1, 0.0);
        }
    }

    #[test]
    fn test_origin_sits_mid_cell() {
        // 0 · scale + 0.5 = 0.5 → 모든 축 소수부 0.5, 8개 꼭짓점이 1/8씩
        let cell = CellSample::locate([0.0, 0.0, 0.0], 15.0);
        assert_eq!(cell.base, [0, 0, 0]);
        for index in 0..NUM_CORNERS {
            assert_relative_eq!(cell.corner(index).1, 0.125);
        }
        assert_eq!(cell.corner(7).0, [1, 1, 1]);
        assert_eq!(cell.corner(0b010).0, [0, 1, 0]);
    }

    #[test]
    fn test_negative_and_nan_inputs_do_not_panic() {
        let cell = CellSample::locate([-1.0, f32::NAN, 2.0], 15.0);
        // -1 · 15 + 0.5 = -14.5 → 바닥 -15
        assert_eq!(cell.base[0], (-15i32) as u32);
        assert_relative_eq!(cell.frac[0], 0.5);
        assert_eq!(cell.base[1], 0);
        assert!(cell.frac[1].is_nan());
    }
}
