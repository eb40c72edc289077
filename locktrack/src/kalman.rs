//! Dense linear Kalman filter

use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// Model and initial conditions for a [`KalmanFilter`]
#[derive(Debug, Clone)]
pub struct KalmanFilterParams {
    pub dim_x: usize,
    pub dim_z: usize,
    pub x: DVector<f64>,
    pub p: DMatrix<f64>,
    /// Transition, applied once per predict
    pub f: DMatrix<f64>,
    /// Maps state to measurement
    pub h: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub q: DMatrix<f64>,
}

/// Predict/update filter over a `dim_x` state observed through `dim_z`
/// measurements. The model matrices are public so callers can retune
/// noise in place.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    pub dim_x: usize,
    pub dim_z: usize,
    pub x: DVector<f64>,
    pub p: DMatrix<f64>,
    pub f: DMatrix<f64>,
    pub h: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub q: DMatrix<f64>,
}

impl KalmanFilter {
    pub fn new(params: KalmanFilterParams) -> Self {
        Self {
            dim_x: params.dim_x,
            dim_z: params.dim_z,
            x: params.x,
            p: params.p,
            f: params.f,
            h: params.h,
            r: params.r,
            q: params.q,
        }
    }

    /// Predict the next state
    pub fn predict(&mut self) {
        // x = F * x
        self.x = &self.f * &self.x;

        // P = F * P * F^T + Q
        self.p = &self.f * &self.p * self.f.transpose() + &self.q;
        self.symmetrize();
    }

    /// Update with observation
    ///
    /// On failure the state and covariance are left as they were after
    /// the preceding predict.
    pub fn update(&mut self, z: &DVector<f64>) -> Result<()> {
        if z.len() != self.dim_z {
            anyhow::bail!(
                "Observation has {} components, filter expects {}",
                z.len(),
                self.dim_z
            );
        }

        // Residual: y = z - H * x
        let y = z - &self.h * &self.x;

        // Innovation covariance: S = H * P * H^T + R
        let s = &self.h * &self.p * self.h.transpose() + &self.r;

        // Kalman gain: K = P * H^T * S^-1
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| anyhow::anyhow!("Failed to invert innovation covariance matrix"))?;
        let k = &self.p * self.h.transpose() * s_inv;

        // Update state: x = x + K * y
        let x = &self.x + &k * &y;

        // Joseph form keeps P symmetric positive semi-definite:
        // P = (I - K H) P (I - K H)^T + K R K^T
        let i_kh = DMatrix::identity(self.dim_x, self.dim_x) - &k * &self.h;
        let p = &i_kh * &self.p * i_kh.transpose() + &k * &self.r * k.transpose();

        if !x.iter().chain(p.iter()).all(|v| v.is_finite()) {
            anyhow::bail!("Kalman update produced non-finite values");
        }

        self.x = x;
        self.p = p;
        self.symmetrize();
        Ok(())
    }

    fn symmetrize(&mut self) {
        self.p = (&self.p + self.p.transpose()) * 0.5;
    }
}
