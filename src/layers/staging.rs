//! # 배치 스테이징 버퍼
//!
//! forward에 들어온 위치 배치를 보관해 backward가 같은 기하를 재생할 수 있게 합니다.
//! 용량은 커지기만 하고 줄지 않습니다. 할당은 `try_reserve_exact`를 거쳐 메모리 부족을
//! 에러로 돌려줍니다.

use ndarray::ArrayView2;

use crate::error::{HashGridError, Result};
use crate::ops::atomic::try_zeroed_vec;

/// 호스트 위치 스테이징.
#[derive(Debug)]
pub struct HostStaging {
    positions: Vec<f32>,
    capacity: usize,
    rows: Option<usize>,
}

impl HostStaging {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            positions: try_zeroed_vec(capacity * 3, "position staging")?,
            capacity,
            rows: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 필요하면 용량을 늘립니다. 새 용량은 `max(rows, 2 × capacity)`.
    pub fn ensure_capacity(&mut self, rows: usize) -> Result<bool> {
        if rows <= self.capacity {
            return Ok(false);
        }
        let new_capacity = rows.max(self.capacity.saturating_mul(2));
        let additional = new_capacity * 3 - self.positions.len();
        self.positions
            .try_reserve_exact(additional)
            .map_err(|_| HashGridError::Allocation {
                what: "position staging",
                bytes: new_capacity * 3 * std::mem::size_of::<f32>(),
            })?;
        self.positions.resize(new_capacity * 3, 0.0);
        tracing::debug!(
            old_capacity = self.capacity,
            new_capacity,
            "grew position staging buffer"
        );
        self.capacity = new_capacity;
        Ok(true)
    }

    /// 위치 배치를 행 우선으로 복사해 둡니다.
    pub fn stage(&mut self, positions: &ArrayView2<f32>) -> Result<()> {
        let rows = positions.nrows();
        self.ensure_capacity(rows)?;
        for (dst, src) in self.positions[..rows * 3]
            .chunks_exact_mut(3)
            .zip(positions.rows())
        {
            dst[0] = src[0];
            dst[1] = src[1];
            dst[2] = src[2];
        }
        self.rows = Some(rows);
        Ok(())
    }

    /// 마지막으로 스테이징된 배치.
    pub fn cached(&self) -> Option<ArrayView2<'_, f32>> {
        self.rows.and_then(|rows| self.view(rows).ok())
    }

    pub fn cached_rows(&self) -> Option<usize> {
        self.rows
    }

    pub fn as_slice(&self, rows: usize) -> &[f32] {
        &self.positions[..rows * 3]
    }

    fn view(&self, rows: usize) -> Result<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((rows, 3), &self.positions[..rows * 3]).map_err(|e| {
            HashGridError::Device {
                message: format!("staging view: {}", e),
            }
        })
    }
}

/// CUDA 디바이스 스테이징. 생성 시 배치 용량만큼 할당하고, 더 큰 배치가 오면
/// 배치 의존 버퍼를 다시 할당합니다.
#[cfg(feature = "cuda")]
pub struct DeviceStaging {
    pub positions: crate::ops::cuda::DeviceBuffer<f32>,
    pub params: crate::ops::cuda::DeviceBuffer<f32>,
    pub output: crate::ops::cuda::DeviceBuffer<f32>,
    pub grad_output: crate::ops::cuda::DeviceBuffer<f32>,
    pub grad_params: crate::ops::cuda::DeviceBuffer<f32>,
    pub levels: crate::ops::cuda::DeviceBuffer<crate::ops::cuda::LevelGpu>,
    capacity: usize,
    output_dim: usize,
}

#[cfg(feature = "cuda")]
impl DeviceStaging {
    pub fn new(plan: &crate::ops::plan::LevelPlan, capacity: usize) -> Result<Self> {
        use crate::ops::cuda::{DeviceBuffer, LevelGpu};

        let output_dim = plan.output_dim();
        let gpu_levels: Vec<LevelGpu> = plan.levels().iter().map(LevelGpu::from).collect();
        let mut levels = DeviceBuffer::alloc(gpu_levels.len(), "device level table")?;
        levels.upload(&gpu_levels)?;

        Ok(Self {
            positions: DeviceBuffer::alloc(capacity * 3, "device positions")?,
            params: DeviceBuffer::alloc(plan.num_parameters(), "device parameters")?,
            output: DeviceBuffer::alloc(capacity * output_dim, "device embedding")?,
            grad_output: DeviceBuffer::alloc(capacity * output_dim, "device output gradient")?,
            grad_params: DeviceBuffer::alloc(plan.num_parameters(), "device parameter gradient")?,
            levels,
            capacity,
            output_dim,
        })
    }

    pub fn ensure_capacity(&mut self, rows: usize) -> Result<()> {
        use crate::ops::cuda::DeviceBuffer;

        if rows <= self.capacity {
            return Ok(());
        }
        let new_capacity = rows.max(self.capacity.saturating_mul(2));
        self.positions = DeviceBuffer::alloc(new_capacity * 3, "device positions")?;
        self.output = DeviceBuffer::alloc(new_capacity * self.output_dim, "device embedding")?;
        self.grad_output =
            DeviceBuffer::alloc(new_capacity * self.output_dim, "device output gradient")?;
        tracing::debug!(
            old_capacity = self.capacity,
            new_capacity,
            "grew device staging buffers"
        );
        self.capacity = new_capacity;
        Ok(())
    }
}
