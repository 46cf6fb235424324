// src/layers/hashgrid.rs

//! # 다해상도 해시 그리드 인코더
//!
//! 평탄화된 파라미터 버퍼와 레벨 계획, 스테이징 버퍼를 소유하고
//! forward/backward 계약을 외부 학습 프레임워크에 노출합니다.
//!
//! - `forward(positions, params)`: 정규화된 `[N, 3]` 좌표 → `[N, L·F]` 임베딩
//! - `backward(grad_output)`: 직전 forward의 좌표로 파라미터 그래디언트 계산
//!
//! 같은 인스턴스에서 forward/backward를 동시에 부르는 것은 `&mut self`로 막힙니다.
//! 학습 스텝은 한 번에 하나만 진행됩니다.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::HashGridConfig;
use crate::error::{HashGridError, Result};
use crate::layers::staging::HostStaging;
use crate::ops::atomic::try_zeroed_vec;
use crate::ops::{self, GradientAccumulator, LevelDescriptor, LevelPlan};

/// 해시 그리드 위치 인코더.
pub struct HashGridEncoder {
    config: HashGridConfig,
    plan: LevelPlan,
    params: Array1<f32>,
    grad: GradientAccumulator,
    staging: HostStaging,
    #[cfg(feature = "cuda")]
    device: Option<crate::layers::staging::DeviceStaging>,
}

impl HashGridEncoder {
    /// 설정을 검증하고 레벨 계획, 파라미터, 스테이징 버퍼를 준비합니다.
    ///
    /// 메모리 할당 실패는 `HashGridError::Allocation`으로 돌아옵니다.
    pub fn new(config: HashGridConfig) -> Result<Self> {
        let plan = LevelPlan::from_config(&config)?;
        let num_parameters = plan.num_parameters();
        let capacity = config.effective_batch_capacity();

        let params = Array1::from_vec(init_parameters(&config, num_parameters)?);
        let grad = GradientAccumulator::try_zeros(num_parameters)?;
        let staging = HostStaging::with_capacity(capacity)?;

        #[cfg(feature = "cuda")]
        let device = match config.device {
            crate::config::Device::Cuda => {
                Some(crate::layers::staging::DeviceStaging::new(&plan, capacity)?)
            }
            crate::config::Device::Cpu => None,
        };

        tracing::info!(
            levels = plan.num_levels(),
            dense_levels = plan.dense_levels(),
            total_slots = plan.total_slots(),
            num_parameters,
            growth_factor = config.growth_factor,
            batch_capacity = capacity,
            device = ?config.device,
            "hash grid encoder ready"
        );

        Ok(Self {
            config,
            plan,
            params,
            grad,
            staging,
            #[cfg(feature = "cuda")]
            device,
        })
    }

    pub fn config(&self) -> &HashGridConfig {
        &self.config
    }

    pub fn plan(&self) -> &LevelPlan {
        &self.plan
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        self.plan.levels()
    }

    pub fn output_dim(&self) -> usize {
        self.plan.output_dim()
    }

    pub fn num_parameters(&self) -> usize {
        self.plan.num_parameters()
    }

    pub fn batch_capacity(&self) -> usize {
        self.staging.capacity()
    }

    pub fn parameters(&self) -> ArrayView1<'_, f32> {
        self.params.view()
    }

    /// 옵티마이저가 스텝 사이에 파라미터를 갱신할 때 씁니다.
    pub fn parameters_mut(&mut self) -> ArrayViewMut1<'_, f32> {
        self.params.view_mut()
    }

    pub fn set_parameters(&mut self, params: &ArrayView1<f32>) -> Result<()> {
        self.check_parameter_length(params.len())?;
        self.params.assign(params);
        Ok(())
    }

    /// 정규화된 좌표와 외부 파라미터 버퍼로 임베딩을 계산합니다.
    ///
    /// 파라미터는 내부 버퍼로 복사되어 다음 backward에서 재사용됩니다.
    ///
    /// # 인자
    /// * `positions` - `[N, 3]`, `[0, 1]³`로 정규화된 좌표.
    /// * `params` - 길이 `num_parameters()`의 평탄 버퍼.
    ///
    /// # 반환
    /// `[N, L·F]` 임베딩.
    pub fn forward(
        &mut self,
        positions: &ArrayView2<f32>,
        params: &ArrayView1<f32>,
    ) -> Result<Array2<f32>> {
        self.check_parameter_length(params.len())?;
        check_position_width(positions)?;
        self.params.assign(params);
        self.run_forward(positions)
    }

    /// `[-bound, bound]³` 좌표를 `(x + bound) / (2·bound)`로 정규화한 뒤
    /// 소유한 파라미터로 인코딩합니다.
    pub fn encode(&mut self, positions: &ArrayView2<f32>) -> Result<Array2<f32>> {
        let bound = self.config.bound;
        let normalized = positions.mapv(|x| (x + bound) / (2.0 * bound));
        self.run_forward(&normalized.view())
    }

    /// 직전 forward의 좌표로 파라미터 그래디언트를 계산합니다.
    ///
    /// 내부 누산기는 매 호출 전에 0으로 초기화되므로 호출이 누적되지 않습니다.
    ///
    /// # 인자
    /// * `grad_output` - `[N, L·F]`, N은 직전 forward의 배치 크기.
    ///
    /// # 반환
    /// 길이 `num_parameters()`의 파라미터 그래디언트.
    pub fn backward(&mut self, grad_output: &ArrayView2<f32>) -> Result<Array1<f32>> {
        let rows = self.staging.cached_rows().ok_or(HashGridError::NoForwardPass)?;
        let expected = [rows, self.output_dim()];
        if grad_output.shape() != expected {
            return Err(HashGridError::ShapeMismatch {
                expected: expected.to_vec(),
                got: grad_output.shape().to_vec(),
            });
        }
        tracing::trace!(batch_size = rows, "hash grid backward");

        if let Some(grad) = self.backward_on_device(grad_output, rows)? {
            return Ok(grad);
        }

        let positions = self
            .staging
            .cached()
            .ok_or(HashGridError::NoForwardPass)?;
        ops::hash_encode_backward_into(
            &positions,
            grad_output,
            &self.plan,
            self.config.scatter,
            &self.grad,
        )?;
        Ok(self.grad.to_array())
    }

    /// 내부 그래디언트 누산기를 0으로 채웁니다.
    pub fn zero_grad(&self) {
        self.grad.zero();
    }

    /// 마지막 backward가 남긴 그래디언트.
    pub fn gradient(&self) -> Array1<f32> {
        self.grad.to_array()
    }

    fn check_parameter_length(&self, got: usize) -> Result<()> {
        let expected = self.plan.num_parameters();
        if got != expected {
            return Err(HashGridError::ParameterLength { expected, got });
        }
        Ok(())
    }

    fn run_forward(&mut self, positions: &ArrayView2<f32>) -> Result<Array2<f32>> {
        check_position_width(positions)?;
        let rows = positions.nrows();
        let output_dim = self.output_dim();
        tracing::trace!(batch_size = rows, "hash grid forward");

        self.staging.stage(positions)?;
        let mut out = try_zeroed_vec(rows * output_dim, "embedding")?;

        if !self.forward_on_device(rows, &mut out)? {
            let staged = self
                .staging
                .cached()
                .ok_or(HashGridError::NoForwardPass)?;
            let params = self.params.as_slice().ok_or_else(|| HashGridError::Device {
                message: "parameter buffer is not contiguous".to_string(),
            })?;
            ops::hash_encode_into(&staged, params, &self.plan, &mut out);
        }
        into_embedding(out, rows, output_dim)
    }

    /// 디바이스 스테이징이 있으면 커널을 디바이스에서 돌리고 `true`를 돌려줍니다.
    #[cfg(feature = "cuda")]
    fn forward_on_device(&mut self, rows: usize, out: &mut [f32]) -> Result<bool> {
        let Some(device) = self.device.as_mut() else {
            return Ok(false);
        };
        device.ensure_capacity(rows)?;
        device.positions.upload(self.staging.as_slice(rows))?;
        let params = self.params.as_slice().ok_or_else(|| HashGridError::Device {
            message: "parameter buffer is not contiguous".to_string(),
        })?;
        device.params.upload(params)?;
        ops::cuda::hash_encode_cuda(
            &device.positions,
            &device.params,
            &mut device.output,
            &device.levels,
            rows,
            self.plan.features_per_level(),
        )?;
        device.output.download(out)?;
        Ok(true)
    }

    #[cfg(not(feature = "cuda"))]
    fn forward_on_device(&mut self, _rows: usize, _out: &mut [f32]) -> Result<bool> {
        Ok(false)
    }

    #[cfg(feature = "cuda")]
    fn backward_on_device(
        &mut self,
        grad_output: &ArrayView2<f32>,
        rows: usize,
    ) -> Result<Option<Array1<f32>>> {
        let Some(device) = self.device.as_mut() else {
            return Ok(None);
        };
        let mut grad_host = try_zeroed_vec(self.plan.num_parameters(), "parameter gradient")?;
        let upstream = grad_output.as_standard_layout();
        let upstream = upstream.as_slice().ok_or_else(|| HashGridError::Device {
            message: "output gradient is not contiguous".to_string(),
        })?;
        device.grad_output.upload(upstream)?;
        ops::cuda::hash_encode_backward_cuda(
            &device.positions,
            &device.grad_output,
            &mut device.grad_params,
            &device.levels,
            rows,
            self.plan.features_per_level(),
        )?;
        device.grad_params.download(&mut grad_host)?;
        self.grad.store_from(&grad_host);
        Ok(Some(Array1::from_vec(grad_host)))
    }

    #[cfg(not(feature = "cuda"))]
    fn backward_on_device(
        &mut self,
        _grad_output: &ArrayView2<f32>,
        _rows: usize,
    ) -> Result<Option<Array1<f32>>> {
        Ok(None)
    }
}

fn check_position_width(positions: &ArrayView2<f32>) -> Result<()> {
    if positions.ncols() != 3 {
        return Err(HashGridError::ShapeMismatch {
            expected: vec![positions.nrows(), 3],
            got: positions.shape().to_vec(),
        });
    }
    Ok(())
}

fn into_embedding(out: Vec<f32>, rows: usize, output_dim: usize) -> Result<Array2<f32>> {
    Array2::from_shape_vec((rows, output_dim), out).map_err(|_| HashGridError::ShapeMismatch {
        expected: vec![rows, output_dim],
        got: vec![rows * output_dim],
    })
}

/// `[-init_scale, init_scale]` 균등 분포로 파라미터를 초기화합니다.
fn init_parameters(config: &HashGridConfig, len: usize) -> Result<Vec<f32>> {
    let mut params = try_zeroed_vec(len, "parameter buffer")?;
    if config.init_scale == 0.0 {
        return Ok(params);
    }
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let dist = Uniform::new_inclusive(-config.init_scale, config.init_scale);
    for value in params.iter_mut() {
        *value = dist.sample(&mut rng);
    }
    Ok(params)
}

impl std::fmt::Debug for HashGridEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashGridEncoder")
            .field("levels", &self.plan.num_levels())
            .field("num_parameters", &self.plan.num_parameters())
            .field("output_dim", &self.plan.output_dim())
            .field("batch_capacity", &self.staging.capacity())
            .field("device", &self.config.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScatterStrategy;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr2, Array1};

    fn small_config() -> HashGridConfig {
        HashGridConfig::new(2.0)
            .with_base_resolution(4)
            .with_num_levels(3)
            .with_log2_hashmap_size(6)
            .with_seed(7)
    }

    #[test]
    fn test_construction() {
        let encoder = HashGridEncoder::new(small_config().with_batch_capacity(16)).unwrap();
        assert_eq!(encoder.output_dim(), 6);
        assert_eq!(encoder.num_parameters(), encoder.plan().total_slots() * 2);
        assert_eq!(encoder.batch_capacity(), 2048);
        let bound = 1e-4;
        assert!(encoder.parameters().iter().all(|&v| v.abs() <= bound));
        assert!(encoder.parameters().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_seeded_initialisation_is_reproducible() {
        let a = HashGridEncoder::new(small_config()).unwrap();
        let b = HashGridEncoder::new(small_config()).unwrap();
        assert_eq!(a.parameters(), b.parameters());
        assert_eq!(a.levels(), b.levels());
    }

    #[test]
    fn test_rejects_wrong_parameter_length() {
        let mut encoder = HashGridEncoder::new(small_config()).unwrap();
        let positions = arr2(&[[0.5f32, 0.5, 0.5]]);
        let params = Array1::<f32>::zeros(3);
        assert_eq!(
            encoder.forward(&positions.view(), &params.view()).unwrap_err(),
            HashGridError::ParameterLength {
                expected: encoder.num_parameters(),
                got: 3
            }
        );
    }

    #[test]
    fn test_rejects_wrong_position_width() {
        let mut encoder = HashGridEncoder::new(small_config()).unwrap();
        let positions = arr2(&[[0.5f32, 0.5]]);
        assert!(matches!(
            encoder.encode(&positions.view()),
            Err(HashGridError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejected_forward_keeps_parameters() {
        let mut encoder = HashGridEncoder::new(small_config()).unwrap();
        let before = encoder.parameters().to_owned();
        let positions = arr2(&[[0.5f32, 0.5]]);
        let ones = Array1::<f32>::ones(encoder.num_parameters());
        assert!(matches!(
            encoder.forward(&positions.view(), &ones.view()),
            Err(HashGridError::ShapeMismatch { .. })
        ));
        assert_eq!(encoder.parameters(), before.view());
    }

    #[test]
    fn test_default_capacity_is_kept() {
        let encoder = HashGridEncoder::new(small_config()).unwrap();
        assert_eq!(encoder.batch_capacity(), 8192);
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut encoder = HashGridEncoder::new(small_config()).unwrap();
        let grad = Array2::<f32>::zeros((1, 6));
        assert_eq!(
            encoder.backward(&grad.view()).unwrap_err(),
            HashGridError::NoForwardPass
        );
    }

    #[test]
    fn test_backward_checks_batch_shape() {
        let mut encoder = HashGridEncoder::new(small_config()).unwrap();
        let positions = arr2(&[[0.1f32, 0.2, 0.3], [0.4, 0.5, 0.6]]);
        encoder.encode(&positions.view()).unwrap();
        let grad = Array2::<f32>::zeros((3, 6));
        assert!(matches!(
            encoder.backward(&grad.view()),
            Err(HashGridError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_normalises_by_bound() {
        let mut encoder = HashGridEncoder::new(small_config().with_bound(2.0)).unwrap();
        let raw = arr2(&[[-2.0f32, 0.0, 2.0]]);
        let normalized = arr2(&[[0.0f32, 0.5, 1.0]]);
        let params = encoder.parameters().to_owned();
        let a = encoder.encode(&raw.view()).unwrap();
        let b = encoder.forward(&normalized.view(), &params.view()).unwrap();
        assert_abs_diff_eq!(a, b, epsilon = 1e-7);
    }

    #[test]
    fn test_repeated_backward_does_not_accumulate() {
        for strategy in [ScatterStrategy::Atomic, ScatterStrategy::Partitioned] {
            let mut encoder = HashGridEncoder::new(small_config().with_scatter(strategy)).unwrap();
            let positions = arr2(&[[0.2f32, 0.7, 0.4], [0.9, 0.1, 0.3]]);
            encoder.encode(&positions.view()).unwrap();
            let grad_output = Array2::<f32>::ones((2, 6));
            let first = encoder.backward(&grad_output.view()).unwrap();
            let second = encoder.backward(&grad_output.view()).unwrap();
            assert_abs_diff_eq!(first, second, epsilon = 1e-6);
            assert_relative_eq!(first.sum(), 12.0, epsilon = 1e-4);
            assert_abs_diff_eq!(encoder.gradient(), second, epsilon = 1e-6);

            encoder.zero_grad();
            assert!(encoder.gradient().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_batch_larger_than_capacity_grows_staging() {
        let mut encoder =
            HashGridEncoder::new(small_config().with_batch_capacity(2048)).unwrap();
        let positions = Array2::from_shape_fn((3000, 3), |(i, d)| ((i + d) % 10) as f32 / 10.0);
        let out = encoder.encode(&positions.view()).unwrap();
        assert_eq!(out.shape(), &[3000, 6]);
        assert_eq!(encoder.batch_capacity(), 4096);
    }

    #[test]
    fn test_set_parameters() {
        let mut encoder = HashGridEncoder::new(small_config()).unwrap();
        let ones = Array1::<f32>::ones(encoder.num_parameters());
        encoder.set_parameters(&ones.view()).unwrap();
        let out = encoder.encode(&arr2(&[[0.3f32, -0.2, 0.6]]).view()).unwrap();
        for &v in out.iter() {
            assert_relative_eq!(v, 1.0, epsilon = 1e-5);
        }
        assert!(encoder
            .set_parameters(&Array1::<f32>::ones(2).view())
            .is_err());

        encoder.parameters_mut().fill(0.0);
        assert!(encoder.parameters().iter().all(|&v| v == 0.0));
    }
}
