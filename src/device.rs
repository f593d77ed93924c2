use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Zip};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::DevicePreference;
use crate::error::Result;

/// Where matrix products of the model are executed.
#[derive(Clone)]
pub enum Device {
    /// Plain single-threaded products on the calling thread.
    Cpu,
    /// Batch rows are spread over a dedicated compute pool.
    Parallel(Arc<ThreadPool>),
}

impl Device {
    /// Resolve a preference into a concrete device. Called once per run.
    pub fn resolve(preference: DevicePreference) -> Result<Self> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let device = match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Auto if cores <= 1 => Device::Cpu,
            DevicePreference::Auto | DevicePreference::Parallel => Device::parallel(cores)?,
        };
        log::info!("using device {device:?}");
        Ok(device)
    }

    pub fn parallel(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("compute-{i}"))
            .build()?;
        Ok(Device::Parallel(Arc::new(pool)))
    }

    /// `a · b` for a batch-major `a`.
    pub fn matmul(&self, a: ArrayView2<f32>, b: ArrayView2<f32>) -> Array2<f32> {
        match self {
            Device::Cpu => a.dot(&b),
            Device::Parallel(pool) => pool.install(|| {
                let mut out = Array2::<f32>::zeros((a.nrows(), b.ncols()));
                Zip::from(out.rows_mut())
                    .and(a.rows())
                    .par_for_each(|mut o, row| o.assign(&row.dot(&b)));
                out
            }),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Parallel(pool) => write!(f, "parallel({} threads)", pool.current_num_threads()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn parallel_matches_cpu() {
        let a = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let b = array![[1.0f32, 0.5], [0.0, -1.0], [2.0, 1.0]];
        let cpu = Device::Cpu.matmul(a.view(), b.view());
        let par = Device::parallel(2).unwrap().matmul(a.view(), b.view());
        assert_eq!(cpu, par);
        assert_eq!(cpu, array![[7.0, 1.5], [16.0, 3.0]]);
    }
}
