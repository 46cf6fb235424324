// src/bindings/hashgrid.rs

//! # HashGridEncoder를 위한 Python 바인딩
//!
//! `pyo3`로 `HashGridEncoder`를 Python 클래스로 노출합니다. autograd `Function`
//! 배선은 Python 쪽에서 `forward`/`backward`를 호출해 구성합니다.

use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::PyModule;

use crate::config::{Device, HashGridConfig, ScatterStrategy};
use crate::error::HashGridError;
use crate::layers::hashgrid::HashGridEncoder;
use crate::ops::{self, IndexingMode, LevelPlan};

fn parse_scatter(name: &str) -> PyResult<ScatterStrategy> {
    match name.to_ascii_lowercase().as_str() {
        "atomic" => Ok(ScatterStrategy::Atomic),
        "partitioned" => Ok(ScatterStrategy::Partitioned),
        other => Err(HashGridError::invalid_config(format!(
            "unknown scatter strategy '{}'",
            other
        ))
        .into()),
    }
}

#[pyclass(name = "HashGridEncoder", module = "hashgrid_encoder._rust")]
pub struct PyHashGridEncoder {
    inner: HashGridEncoder,
}

#[pymethods]
impl PyHashGridEncoder {
    #[new]
    #[pyo3(signature = (
        base_resolution=16,
        num_levels=16,
        features_per_level=2,
        log2_hashmap_size=19,
        growth_factor=1.3195079565048218,
        batch_capacity=8192,
        bound=1.0,
        init_scale=1e-4,
        seed=None,
        scatter="atomic",
        device="cpu"
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        base_resolution: u32,
        num_levels: usize,
        features_per_level: usize,
        log2_hashmap_size: u32,
        growth_factor: f64,
        batch_capacity: usize,
        bound: f32,
        init_scale: f32,
        seed: Option<u64>,
        scatter: &str,
        device: &str,
    ) -> PyResult<Self> {
        let config = HashGridConfig {
            base_resolution,
            num_levels,
            features_per_level,
            log2_hashmap_size,
            growth_factor,
            batch_capacity,
            bound,
            init_scale,
            seed,
            scatter: parse_scatter(scatter)?,
            device: Device::parse(device)?,
        };
        Ok(PyHashGridEncoder {
            inner: HashGridEncoder::new(config)?,
        })
    }

    /// 정규화된 `[N, 3]` 좌표와 파라미터로 `[N, L·F]` 임베딩을 계산
    pub fn forward<'py>(
        &mut self,
        py: Python<'py>,
        positions: PyReadonlyArray2<'py, f32>,
        params: PyReadonlyArray1<'py, f32>,
    ) -> PyResult<&'py PyArray2<f32>> {
        let result = self
            .inner
            .forward(&positions.as_array(), &params.as_array())?;
        Ok(result.into_pyarray(py))
    }

    /// `[-bound, bound]³` 좌표를 소유한 파라미터로 인코딩
    pub fn encode<'py>(
        &mut self,
        py: Python<'py>,
        positions: PyReadonlyArray2<'py, f32>,
    ) -> PyResult<&'py PyArray2<f32>> {
        let result = self.inner.encode(&positions.as_array())?;
        Ok(result.into_pyarray(py))
    }

    /// 직전 forward 기준의 파라미터 그래디언트
    pub fn backward<'py>(
        &mut self,
        py: Python<'py>,
        grad_output: PyReadonlyArray2<'py, f32>,
    ) -> PyResult<&'py PyArray1<f32>> {
        let grad = self.inner.backward(&grad_output.as_array())?;
        Ok(grad.into_pyarray(py))
    }

    pub fn zero_grad(&self) {
        self.inner.zero_grad();
    }

    #[getter]
    pub fn parameters<'py>(&self, py: Python<'py>) -> &'py PyArray1<f32> {
        self.inner.parameters().to_owned().into_pyarray(py)
    }

    #[setter]
    pub fn set_parameters(&mut self, params: PyReadonlyArray1<f32>) -> PyResult<()> {
        self.inner.set_parameters(&params.as_array())?;
        Ok(())
    }

    #[getter]
    pub fn output_dim(&self) -> usize {
        self.inner.output_dim()
    }

    #[getter]
    pub fn num_parameters(&self) -> usize {
        self.inner.num_parameters()
    }

    #[getter]
    pub fn batch_capacity(&self) -> usize {
        self.inner.batch_capacity()
    }

    /// 레벨별 `(resolution, scale, table_size, table_offset, mode)` 목록
    pub fn level_descriptors(&self) -> Vec<(u32, f32, u32, usize, &'static str)> {
        self.inner
            .levels()
            .iter()
            .map(|level| {
                let mode = match level.mode {
                    IndexingMode::Dense => "dense",
                    IndexingMode::Hashed => "hashed",
                };
                (level.resolution, level.scale, level.table_size, level.table_offset, mode)
            })
            .collect()
    }

    fn __repr__(&self) -> String {
        format!(
            "HashGridEncoder(levels={}, output_dim={}, num_parameters={})",
            self.inner.plan().num_levels(),
            self.inner.output_dim(),
            self.inner.num_parameters()
        )
    }
}

#[pyfunction]
#[pyo3(signature = (
    positions,
    params,
    base_resolution=16,
    num_levels=16,
    features_per_level=2,
    log2_hashmap_size=19,
    growth_factor=1.3195079565048218
))]
pub fn hash_encode_cpu<'py>(
    py: Python<'py>,
    positions: PyReadonlyArray2<'py, f32>,
    params: PyReadonlyArray1<'py, f32>,
    base_resolution: u32,
    num_levels: usize,
    features_per_level: usize,
    log2_hashmap_size: u32,
    growth_factor: f64,
) -> PyResult<&'py PyArray2<f32>> {
    let plan = stateless_plan(
        base_resolution,
        num_levels,
        features_per_level,
        log2_hashmap_size,
        growth_factor,
    )?;
    let positions = positions.as_array();
    check_positions(&positions)?;
    let params = params.as_array();
    let params = params.as_slice().ok_or_else(|| HashGridError::ShapeMismatch {
        expected: vec![plan.num_parameters()],
        got: params.shape().to_vec(),
    })?;
    if params.len() != plan.num_parameters() {
        return Err(HashGridError::ParameterLength {
            expected: plan.num_parameters(),
            got: params.len(),
        }
        .into());
    }
    let result = py.allow_threads(|| ops::hash_encode(&positions, params, &plan));
    Ok(result.into_pyarray(py))
}

#[pyfunction]
#[pyo3(signature = (
    positions,
    grad_output,
    base_resolution=16,
    num_levels=16,
    features_per_level=2,
    log2_hashmap_size=19,
    growth_factor=1.3195079565048218
))]
pub fn hash_encode_backward_cpu<'py>(
    py: Python<'py>,
    positions: PyReadonlyArray2<'py, f32>,
    grad_output: PyReadonlyArray2<'py, f32>,
    base_resolution: u32,
    num_levels: usize,
    features_per_level: usize,
    log2_hashmap_size: u32,
    growth_factor: f64,
) -> PyResult<&'py PyArray1<f32>> {
    let plan = stateless_plan(
        base_resolution,
        num_levels,
        features_per_level,
        log2_hashmap_size,
        growth_factor,
    )?;
    let positions = positions.as_array();
    check_positions(&positions)?;
    let grad_output = grad_output.as_array();
    let expected = [positions.nrows(), plan.output_dim()];
    if grad_output.shape() != expected {
        return Err(HashGridError::ShapeMismatch {
            expected: expected.to_vec(),
            got: grad_output.shape().to_vec(),
        }
        .into());
    }
    let grad = py.allow_threads(|| {
        ops::hash_encode_backward(&positions, &grad_output, &plan, ScatterStrategy::Atomic)
    })?;
    Ok(grad.into_pyarray(py))
}

fn stateless_plan(
    base_resolution: u32,
    num_levels: usize,
    features_per_level: usize,
    log2_hashmap_size: u32,
    growth_factor: f64,
) -> PyResult<LevelPlan> {
    let config = HashGridConfig {
        base_resolution,
        num_levels,
        features_per_level,
        log2_hashmap_size,
        growth_factor,
        ..HashGridConfig::default()
    };
    Ok(LevelPlan::from_config(&config)?)
}

fn check_positions(positions: &ndarray::ArrayView2<f32>) -> PyResult<()> {
    if positions.ncols() != 3 {
        return Err(HashGridError::ShapeMismatch {
            expected: vec![positions.nrows(), 3],
            got: positions.shape().to_vec(),
        }
        .into());
    }
    Ok(())
}

pub fn register(m: &PyModule) -> PyResult<()> {
    m.add_class::<PyHashGridEncoder>()?;
    m.add_function(wrap_pyfunction!(hash_encode_cpu, m)?)?;
    m.add_function(wrap_pyfunction!(hash_encode_backward_cpu, m)?)?;
    Ok(())
}
