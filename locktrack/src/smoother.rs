//! Kalman-based second-stage smoothing of 2D movement deltas
//!
//! Two layouts are supported:
//! - independent: one constant-velocity filter per axis, state `[pos, vel]`
//! - coupled: one filter with state `[x, y, vx, vy]` and cross-axis
//!   correlation terms in P, Q and R, so diagonal motion informs both axes

use crate::kalman::{KalmanFilter, KalmanFilterParams};
use nalgebra::{DMatrix, DVector};

/// Smoother tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SmootherConfig {
    pub enabled: bool,
    /// Initial state covariance (P)
    pub initial_covariance: f64,
    /// Measurement noise (R)
    pub measurement_noise: f64,
    /// Process noise (Q)
    pub process_noise: f64,
    /// Use the coupled 4-state layout instead of per-axis filters
    pub coupled: bool,
    pub xy_correlation: f64,
    pub process_correlation: f64,
    pub measurement_correlation: f64,
    /// Look-ahead horizon used by [`StatisticalSmoother::predict_frames`]
    pub frames_to_predict: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_covariance: 38.17,
            measurement_noise: 2.8,
            process_noise: 28.11,
            coupled: false,
            xy_correlation: 0.3,
            process_correlation: 0.2,
            measurement_correlation: 0.1,
            frames_to_predict: 1.5,
        }
    }
}

/// One look-ahead step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePrediction {
    pub frame: usize,
    pub x: f64,
    pub y: f64,
    /// Only populated by the coupled layout
    pub velocity: Option<(f64, f64)>,
    pub uncertainty_x: f64,
    pub uncertainty_y: f64,
}

/// Motion summary derived from the coupled filter's velocity state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionAnalysis {
    pub speed: f64,
    pub heading_rad: f64,
    pub heading_deg: f64,
    pub is_turning: bool,
    pub turning_strength: f64,
}

#[derive(Debug, Clone)]
enum FilterBank {
    Independent { x: KalmanFilter, y: KalmanFilter },
    Coupled(KalmanFilter),
}

/// Filters raw movement deltas; the identity function while disabled
#[derive(Debug, Clone)]
pub struct StatisticalSmoother {
    config: SmootherConfig,
    bank: FilterBank,
}

impl Default for StatisticalSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}

impl StatisticalSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        let bank = build_bank(&config);
        Self { config, bank }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    pub fn is_coupled(&self) -> bool {
        matches!(self.bank, FilterBank::Coupled(_))
    }

    /// Apply new tuning.
    ///
    /// Toggling the coupled layout rebuilds the filters from zero. Otherwise
    /// the state estimate is kept; the covariance is only rebuilt when the
    /// initial covariance or, in the coupled layout, the xy correlation changed.
    pub fn reconfigure(&mut self, config: SmootherConfig) {
        if config == self.config {
            return;
        }

        if config.coupled != self.is_coupled() {
            log::info!(
                "Smoother layout changed to {}, reinitializing state",
                if config.coupled { "coupled" } else { "independent" }
            );
            self.bank = build_bank(&config);
            self.config = config;
            return;
        }

        let reset_covariance = config.initial_covariance != self.config.initial_covariance;
        match &mut self.bank {
            FilterBank::Independent { x, y } => {
                for kf in [x, y] {
                    let fresh = axis_params(&config);
                    kf.q = fresh.q;
                    kf.r = fresh.r;
                    if reset_covariance {
                        kf.p = fresh.p;
                    }
                }
            }
            FilterBank::Coupled(kf) => {
                let fresh = coupled_params(&config);
                kf.q = fresh.q;
                kf.r = fresh.r;
                if reset_covariance || config.xy_correlation != self.config.xy_correlation {
                    kf.p = fresh.p;
                }
            }
        }
        log::debug!("Smoother reconfigured: {:?}", config);
        self.config = config;
    }

    /// Filter one movement delta.
    ///
    /// Non-finite input and numerical failures return the input unchanged and
    /// leave the filter state as it was.
    pub fn update(&mut self, dx: f32, dy: f32) -> (f32, f32) {
        if !self.config.enabled {
            return (dx, dy);
        }
        if !dx.is_finite() || !dy.is_finite() {
            log::warn!("Smoother skipped non-finite input ({}, {})", dx, dy);
            return (dx, dy);
        }

        let backup = self.bank.clone();
        let result = match &mut self.bank {
            FilterBank::Independent { x, y } => {
                x.predict();
                y.predict();
                x.update(&DVector::from_vec(vec![dx as f64]))
                    .and_then(|_| y.update(&DVector::from_vec(vec![dy as f64])))
                    .map(|_| (x.x[0], y.x[0]))
            }
            FilterBank::Coupled(kf) => {
                kf.predict();
                kf.update(&DVector::from_vec(vec![dx as f64, dy as f64]))
                    .map(|_| (kf.x[0], kf.x[1]))
            }
        };

        match result {
            Ok((sx, sy)) => (sx as f32, sy as f32),
            Err(e) => {
                log::warn!("Smoother update failed, passing input through: {}", e);
                self.bank = backup;
                (dx, dy)
            }
        }
    }

    /// Look ahead `max(1, floor(frames_to_predict))` steps without changing
    /// the filter. Empty while disabled.
    pub fn predict_frames(&self) -> Vec<FramePrediction> {
        if !self.config.enabled {
            return Vec::new();
        }
        let steps = (self.config.frames_to_predict.max(1.0)) as usize;

        match &self.bank {
            FilterBank::Coupled(kf) => {
                let mut kf = kf.clone();
                (1..=steps)
                    .map(|frame| {
                        kf.predict();
                        FramePrediction {
                            frame,
                            x: kf.x[0],
                            y: kf.x[1],
                            velocity: Some((kf.x[2], kf.x[3])),
                            uncertainty_x: kf.p[(0, 0)].max(0.0).sqrt(),
                            uncertainty_y: kf.p[(1, 1)].max(0.0).sqrt(),
                        }
                    })
                    .collect()
            }
            FilterBank::Independent { x, y } => {
                let (mut x, mut y) = (x.clone(), y.clone());
                (1..=steps)
                    .map(|frame| {
                        x.predict();
                        y.predict();
                        FramePrediction {
                            frame,
                            x: x.x[0],
                            y: y.x[0],
                            velocity: None,
                            uncertainty_x: x.p[(0, 0)].max(0.0).sqrt(),
                            uncertainty_y: y.p[(0, 0)].max(0.0).sqrt(),
                        }
                    })
                    .collect()
            }
        }
    }

    /// Speed, heading and turning estimate. Coupled layout only.
    pub fn motion_analysis(&self) -> Option<MotionAnalysis> {
        if !self.config.enabled {
            return None;
        }
        let FilterBank::Coupled(kf) = &self.bank else {
            return None;
        };

        let (vx, vy) = (kf.x[2], kf.x[3]);
        let speed = (vx * vx + vy * vy).sqrt();
        let cov = kf.p.view((2, 2), (2, 2));
        let turning_strength = cov[(0, 1)].abs() / ((cov[(0, 0)] * cov[(1, 1)]).max(0.0).sqrt() + 1e-10);
        let heading_rad = vy.atan2(vx);

        Some(MotionAnalysis {
            speed,
            heading_rad,
            heading_deg: heading_rad.to_degrees(),
            is_turning: turning_strength > 0.5,
            turning_strength,
        })
    }

    /// Diagonal of every covariance matrix, for health checks
    pub fn covariance_diagonals(&self) -> Vec<f64> {
        match &self.bank {
            FilterBank::Independent { x, y } => x
                .p
                .diagonal()
                .iter()
                .chain(y.p.diagonal().iter())
                .copied()
                .collect(),
            FilterBank::Coupled(kf) => kf.p.diagonal().iter().copied().collect(),
        }
    }

    /// Current position estimate (x, y)
    pub fn position(&self) -> (f64, f64) {
        match &self.bank {
            FilterBank::Independent { x, y } => (x.x[0], y.x[0]),
            FilterBank::Coupled(kf) => (kf.x[0], kf.x[1]),
        }
    }
}

fn build_bank(config: &SmootherConfig) -> FilterBank {
    if config.coupled {
        FilterBank::Coupled(KalmanFilter::new(coupled_params(config)))
    } else {
        FilterBank::Independent {
            x: KalmanFilter::new(axis_params(config)),
            y: KalmanFilter::new(axis_params(config)),
        }
    }
}

/// Constant-velocity model for one axis, state `[pos, vel]`, dt = 1 frame
fn axis_params(config: &SmootherConfig) -> KalmanFilterParams {
    let q = config.process_noise;
    #[rustfmt::skip]
    let q = DMatrix::from_row_slice(2, 2, &[
        q / 3.0, q / 2.0,
        q / 2.0, q,
    ]);
    KalmanFilterParams {
        dim_x: 2,
        dim_z: 1,
        x: DVector::zeros(2),
        p: DMatrix::identity(2, 2) * config.initial_covariance,
        f: DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]),
        h: DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
        r: DMatrix::from_element(1, 1, config.measurement_noise),
        q,
    }
}

/// Coupled model, state `[x, y, vx, vy]`, dt = 1 frame
fn coupled_params(config: &SmootherConfig) -> KalmanFilterParams {
    let p_pos = config.initial_covariance;
    let p_vel = p_pos * 2.0;
    let c = config.xy_correlation;

    let r = config.measurement_noise;
    let mc = config.measurement_correlation;

    let q_pos = config.process_noise / 3.0;
    let q_vel = config.process_noise;
    let pc = config.process_correlation;

    #[rustfmt::skip]
    let p = DMatrix::from_row_slice(4, 4, &[
        p_pos,     p_pos * c, 0.0,       0.0,
        p_pos * c, p_pos,     0.0,       0.0,
        0.0,       0.0,       p_vel,     p_vel * c,
        0.0,       0.0,       p_vel * c, p_vel,
    ]);

    #[rustfmt::skip]
    let q = DMatrix::from_row_slice(4, 4, &[
        q_pos,            q_pos * pc,       q_pos / 2.0,      q_pos * pc / 2.0,
        q_pos * pc,       q_pos,            q_pos * pc / 2.0, q_pos / 2.0,
        q_pos / 2.0,      q_pos * pc / 2.0, q_vel,            q_vel * pc,
        q_pos * pc / 2.0, q_pos / 2.0,      q_vel * pc,       q_vel,
    ]);

    #[rustfmt::skip]
    let f = DMatrix::from_row_slice(4, 4, &[
        1.0, 0.0, 1.0, 0.0,
        0.0, 1.0, 0.0, 1.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);

    #[rustfmt::skip]
    let h = DMatrix::from_row_slice(2, 4, &[
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
    ]);

    KalmanFilterParams {
        dim_x: 4,
        dim_z: 2,
        x: DVector::zeros(4),
        p,
        f,
        h,
        r: DMatrix::from_row_slice(2, 2, &[r, r * mc, r * mc, r]),
        q,
    }
}
