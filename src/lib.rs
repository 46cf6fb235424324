//! Multiresolution hash grid positional encoding.
//!
//! 3차원 좌표를 레벨별 해시 테이블의 삼선형 보간 피처로 인코딩하고,
//! 파라미터 그래디언트를 테이블 슬롯으로 산포합니다.

pub mod config;
pub mod error;
pub mod layers;
pub mod ops;

#[cfg(feature = "python")]
mod bindings;

pub use config::{Device, HashGridConfig, ScatterStrategy};
pub use error::{HashGridError, Result};
pub use layers::HashGridEncoder;
pub use ops::{IndexingMode, LevelDescriptor, LevelPlan};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// hashgrid_encoder - Rust hash grid encoder for neural fields
#[cfg(feature = "python")]
#[pymodule]
fn _rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    bindings::register(m)?;
    Ok(())
}
