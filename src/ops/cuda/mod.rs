//! # CUDA 디바이스 경로
//!
//! `hashgrid.cu`의 커널 런처와 CUDA 런타임 함수 바인딩, 그리고 해제를 책임지는
//! 디바이스 버퍼 래퍼. 모든 런타임 에러 코드는 `HashGridError`로 바뀝니다.

use std::ffi::c_void;
use std::marker::PhantomData;

use crate::error::{HashGridError, Result};
use crate::ops::plan::{IndexingMode, LevelDescriptor};

mod ffi {
    use std::ffi::c_void;

    extern "C" {
        pub fn hashgrid_encode_cuda(
            positions: *const f32,
            params: *const f32,
            out: *mut f32,
            levels: *const c_void,
            batch_size: libc::c_int,
            num_levels: libc::c_int,
            features: libc::c_int,
        ) -> libc::c_int;

        pub fn hashgrid_backward_cuda(
            positions: *const f32,
            grad_output: *const f32,
            grad_params: *mut f32,
            levels: *const c_void,
            batch_size: libc::c_int,
            num_levels: libc::c_int,
            features: libc::c_int,
            num_params: libc::size_t,
        ) -> libc::c_int;
    }

    // CUDA 런타임 바인딩
    extern "C" {
        pub fn cudaMalloc(devPtr: *mut *mut c_void, size: usize) -> i32;
        pub fn cudaFree(devPtr: *mut c_void) -> i32;
        pub fn cudaMemcpy(dst: *mut c_void, src: *const c_void, count: usize, kind: i32) -> i32;
    }
}

// CUDA 메모리 복사 종류 상수
const CUDA_MEMCPY_HOST_TO_DEVICE: i32 = 1;
const CUDA_MEMCPY_DEVICE_TO_HOST: i32 = 2;

fn check(code: i32, what: &str) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(HashGridError::Device {
            message: format!("{} failed with CUDA error code {}", what, code),
        })
    }
}

/// `hashgrid.cu`의 `LevelGpu`와 같은 배치.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LevelGpu {
    pub resolution: u32,
    pub scale: f32,
    pub table_size: u32,
    pub table_offset: u32,
    pub mode: i32,
}

impl From<&LevelDescriptor> for LevelGpu {
    fn from(level: &LevelDescriptor) -> Self {
        Self {
            resolution: level.resolution,
            scale: level.scale,
            table_size: level.table_size,
            table_offset: level.table_offset as u32,
            mode: match level.mode {
                IndexingMode::Dense => 0,
                IndexingMode::Hashed => 1,
            },
        }
    }
}

/// 원소 `len`개짜리 디바이스 버퍼. drop 시 해제됩니다.
pub struct DeviceBuffer<T: Copy> {
    ptr: *mut c_void,
    len: usize,
    _marker: PhantomData<T>,
}

// 디바이스 포인터는 호스트 스레드 간에 옮겨도 안전하다
unsafe impl<T: Copy> Send for DeviceBuffer<T> {}
unsafe impl<T: Copy> Sync for DeviceBuffer<T> {}

impl<T: Copy> DeviceBuffer<T> {
    pub fn alloc(len: usize, what: &'static str) -> Result<Self> {
        let bytes = len.max(1) * std::mem::size_of::<T>();
        let mut ptr: *mut c_void = std::ptr::null_mut();
        let code = unsafe { ffi::cudaMalloc(&mut ptr as *mut *mut c_void, bytes) };
        if code != 0 || ptr.is_null() {
            return Err(HashGridError::Allocation { what, bytes });
        }
        Ok(Self {
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr as *const T
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr as *mut T
    }

    /// 호스트 슬라이스를 버퍼 앞부분에 복사합니다.
    pub fn upload(&mut self, host: &[T]) -> Result<()> {
        if host.len() > self.len {
            return Err(HashGridError::Device {
                message: format!("upload of {} elements into buffer of {}", host.len(), self.len),
            });
        }
        let code = unsafe {
            ffi::cudaMemcpy(
                self.ptr,
                host.as_ptr() as *const c_void,
                std::mem::size_of_val(host),
                CUDA_MEMCPY_HOST_TO_DEVICE,
            )
        };
        check(code, "cudaMemcpy H2D")
    }

    /// 버퍼 앞부분을 호스트 슬라이스로 복사합니다.
    pub fn download(&self, host: &mut [T]) -> Result<()> {
        if host.len() > self.len {
            return Err(HashGridError::Device {
                message: format!("download of {} elements from buffer of {}", host.len(), self.len),
            });
        }
        let code = unsafe {
            ffi::cudaMemcpy(
                host.as_mut_ptr() as *mut c_void,
                self.ptr as *const c_void,
                std::mem::size_of_val(host),
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        };
        check(code, "cudaMemcpy D2H")
    }
}

impl<T: Copy> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            let code = unsafe { ffi::cudaFree(self.ptr) };
            if code != 0 {
                tracing::warn!(code, "cudaFree failed");
            }
        }
    }
}

/// 디바이스에서 인코딩 커널을 실행합니다. 모든 버퍼는 이미 디바이스에 있습니다.
pub fn hash_encode_cuda(
    positions: &DeviceBuffer<f32>,
    params: &DeviceBuffer<f32>,
    out: &mut DeviceBuffer<f32>,
    levels: &DeviceBuffer<LevelGpu>,
    batch_size: usize,
    features: usize,
) -> Result<()> {
    let code = unsafe {
        ffi::hashgrid_encode_cuda(
            positions.as_ptr(),
            params.as_ptr(),
            out.as_mut_ptr(),
            levels.as_ptr() as *const c_void,
            batch_size as libc::c_int,
            levels.len() as libc::c_int,
            features as libc::c_int,
        )
    };
    check(code, "hashgrid_encode_cuda")
}

/// 디바이스에서 그래디언트 산포 커널을 실행합니다. 런처가 먼저 버퍼를 0으로 채웁니다.
pub fn hash_encode_backward_cuda(
    positions: &DeviceBuffer<f32>,
    grad_output: &DeviceBuffer<f32>,
    grad_params: &mut DeviceBuffer<f32>,
    levels: &DeviceBuffer<LevelGpu>,
    batch_size: usize,
    features: usize,
) -> Result<()> {
    let num_params = grad_params.len();
    let code = unsafe {
        ffi::hashgrid_backward_cuda(
            positions.as_ptr(),
            grad_output.as_ptr(),
            grad_params.as_mut_ptr(),
            levels.as_ptr() as *const c_void,
            batch_size as libc::c_int,
            levels.len() as libc::c_int,
            features as libc::c_int,
            num_params as libc::size_t,
        )
    };
    check(code, "hashgrid_backward_cuda")
}
