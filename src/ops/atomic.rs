//! 원자적 f32 누산기.
//!
//! 하드웨어 f32 atomic add가 없으므로 비트 패턴을 `AtomicU32`에 담고 CAS 루프로
//! 더합니다. 더하는 순서는 정해지지 않으며 부동소수점 재결합 오차만큼 실행마다
//! 결과가 달라질 수 있습니다.

use std::sync::atomic::{AtomicU32, Ordering};

use ndarray::Array1;
use rayon::prelude::*;

use crate::error::{HashGridError, Result};

/// 0으로 채운 `len`개짜리 벡터를 할당합니다. 실패하면 `Allocation` 에러.
pub fn try_zeroed_vec(len: usize, what: &'static str) -> Result<Vec<f32>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| HashGridError::Allocation {
            what,
            bytes: len.saturating_mul(std::mem::size_of::<f32>()),
        })?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// 값을 더하고 이전 값을 돌려줍니다.
    #[inline]
    pub fn fetch_add(&self, delta: f32) -> f32 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(previous) => return f32::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

/// 파라미터 버퍼와 같은 형태의 그래디언트 누산 버퍼.
///
/// 역전파 커널은 더하기만 하므로 매 패스 전에 `zero`가 필요합니다.
#[derive(Debug)]
pub struct GradientAccumulator {
    slots: Vec<AtomicF32>,
}

impl GradientAccumulator {
    pub fn zeros(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, AtomicF32::default);
        Self { slots }
    }

    /// `try_reserve_exact`로 할당해 메모리 부족을 에러로 돌려줍니다.
    pub fn try_zeros(len: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| HashGridError::Allocation {
                what: "parameter gradient",
                bytes: len.saturating_mul(std::mem::size_of::<f32>()),
            })?;
        slots.resize_with(len, AtomicF32::default);
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn zero(&self) {
        self.slots.par_iter().for_each(|slot| slot.store(0.0));
    }

    #[inline]
    pub fn add(&self, index: usize, delta: f32) {
        self.slots[index].fetch_add(delta);
    }

    pub fn get(&self, index: usize) -> f32 {
        self.slots[index].load()
    }

    /// 길이가 같은 평범한 버퍼 내용으로 덮어씁니다.
    pub fn store_from(&self, values: &[f32]) {
        debug_assert_eq!(values.len(), self.slots.len());
        self.slots
            .par_iter()
            .zip(values.par_iter())
            .for_each(|(slot, &value)| slot.store(value));
    }

    pub fn to_array(&self) -> Array1<f32> {
        Array1::from_vec(self.slots.par_iter().map(AtomicF32::load).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_add_returns_previous() {
        let value = AtomicF32::new(1.5);
        assert_eq!(value.fetch_add(2.0), 1.5);
        assert_eq!(value.load(), 3.5);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let accumulator = GradientAccumulator::zeros(4);
        (0..10_000usize).into_par_iter().for_each(|i| {
            accumulator.add(i % 4, 0.5);
        });
        for index in 0..4 {
            assert_eq!(accumulator.get(index), 1250.0);
        }
        accumulator.zero();
        assert!(accumulator.to_array().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_store_from_overwrites() {
        let accumulator = GradientAccumulator::zeros(3);
        accumulator.add(0, 9.0);
        accumulator.store_from(&[1.0, 2.0, 3.0]);
        assert_eq!(accumulator.to_array().to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_try_zeroed_vec() {
        let buffer = try_zeroed_vec(16, "test").unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(buffer.iter().all(|&v| v == 0.0));
        assert!(matches!(
            try_zeroed_vec(usize::MAX / 2, "test"),
            Err(HashGridError::Allocation { .. })
        ));
    }

    #[test]
    fn test_try_zeros_reports_allocation_failure() {
        assert_eq!(GradientAccumulator::try_zeros(8).unwrap().len(), 8);
        assert!(matches!(
            GradientAccumulator::try_zeros(usize::MAX / 2),
            Err(HashGridError::Allocation { .. })
        ));
    }
}
