//! 보간 기하와 공간 해시의 성질 테스트.

use proptest::prelude::*;

use crate::ops::hash::dense_index;
use crate::ops::interp::{CellSample, NUM_CORNERS};

proptest! {
    #[test]
    fn prop_가중치_합은_1(
        x in 0.0f32..=1.0,
        y in 0.0f32..=1.0,
        z in 0.0f32..=1.0,
        scale in 1.0f32..600.0,
    ) {
        let cell = CellSample::locate([x, y, z], scale);
        let mut total = 0.0f32;
        for index in 0..NUM_CORNERS {
            let (_, weight) = cell.corner(index);
            prop_assert!(weight >= 0.0);
            total += weight;
        }
        prop_assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn prop_소수부_범위(
        x in 0.0f32..=1.0,
        scale in 1.0f32..600.0,
    ) {
        let cell = CellSample::locate([x, x, x], scale);
        for d in 0..3 {
            prop_assert!(cell.frac[d] >= 0.0 && cell.frac[d] < 1.0);
        }
    }

    #[test]
    fn prop_밀집_인덱스_역변환(
        resolution in 2u32..64,
        gx in 0u32..64,
        gy in 0u32..64,
        gz in 0u32..64,
    ) {
        let corner = [gx % resolution, gy % resolution, gz % resolution];
        let index = dense_index(corner, resolution);
        prop_assert!(index < resolution.pow(3));
        let decoded = [
            index % resolution,
            (index / resolution) % resolution,
            index / (resolution * resolution),
        ];
        prop_assert_eq!(decoded, corner);
    }
}
