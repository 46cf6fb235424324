//! 해시 그리드 인코더의 에러 타입.
//!
//! 커널 자체는 에러를 반환하지 않습니다. 범위를 벗어난 좌표나 NaN은 수치적으로만
//! 열화되고, 여기 정의된 에러는 모듈 경계(생성, 형태 검사, 스테이징)에서만 발생합니다.

use thiserror::Error;

/// 해시 그리드 연산 중 발생할 수 있는 에러.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HashGridError {
    /// 잘못된 생성 설정.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// 설정 에러 설명.
        message: String,
    },

    /// 파라미터 버퍼 길이가 레벨 계획의 총합과 다름.
    #[error("parameter buffer length mismatch: expected {expected}, got {got}")]
    ParameterLength {
        /// 계획된 파라미터 수.
        expected: usize,
        /// 전달된 길이.
        got: usize,
    },

    /// 입력 배열 형태 불일치.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// 기대 형태.
        expected: Vec<usize>,
        /// 실제 형태.
        got: Vec<usize>,
    },

    /// forward 없이 backward를 호출함.
    #[error("backward called before any forward pass")]
    NoForwardPass,

    /// 호스트/디바이스 메모리 할당 실패.
    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation {
        /// 할당 대상 버퍼.
        what: &'static str,
        /// 요청 바이트 수.
        bytes: usize,
    },

    /// 디바이스 런타임 에러.
    #[error("device error: {message}")]
    Device {
        /// 런타임이 보고한 내용.
        message: String,
    },
}

impl HashGridError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        HashGridError::InvalidConfig {
            message: message.into(),
        }
    }
}

/// 해시 그리드 연산 결과 타입.
pub type Result<T> = std::result::Result<T, HashGridError>;

#[cfg(feature = "python")]
impl From<HashGridError> for pyo3::PyErr {
    fn from(err: HashGridError) -> Self {
        use pyo3::exceptions::{PyMemoryError, PyRuntimeError, PyValueError};
        let message = err.to_string();
        match err {
            HashGridError::InvalidConfig { .. }
            | HashGridError::ParameterLength { .. }
            | HashGridError::ShapeMismatch { .. } => PyValueError::new_err(message),
            HashGridError::Allocation { .. } => PyMemoryError::new_err(message),
            HashGridError::NoForwardPass | HashGridError::Device { .. } => {
                PyRuntimeError::new_err(message)
            }
        }
    }
}
