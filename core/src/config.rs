//! Pipeline configuration.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("dimension {name} must be positive")]
    ZeroDimension { name: &'static str },
    #[error("dimensions must satisfy k <= k' <= d, got d={dim_d}, k={dim_k}, k'={dim_kprime}")]
    InconsistentDimensions {
        dim_d: usize,
        dim_k: usize,
        dim_kprime: usize,
    },
    #[error("{name} must be {requirement}, got {value}")]
    OutOfRange {
        name: &'static str,
        requirement: &'static str,
        value: f64,
    },
    #[error("at least one partition is required")]
    NoPartitions,
    #[error("expected {expected} document partitions, got {got}")]
    PartitionCount { expected: usize, got: usize },
}

/// Parameters shared by every stage.
///
/// Built with [`Config::new`] and refined with the consuming setters:
///
/// ```rust
/// use tf_moments::Config;
///
/// let config = Config::new(20, 4, 6, 0.1, 3).with_rho(0.01).with_max_iterations(50);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.tolerance(), 1e-4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    dim_d: usize,
    dim_k: usize,
    dim_kprime: usize,
    alpha0: f64,
    rho: f64,
    tolerance: f64,
    max_iterations: usize,
    num_partitions: usize,
}

impl Config {
    pub const DEFAULT_RHO: f64 = 0.0;
    pub const DEFAULT_TOLERANCE: f64 = 1e-4;
    /// Zero means the ALS loop runs until it converges.
    pub const DEFAULT_MAX_ITERATIONS: usize = 0;

    /// * `dim_d` - vocabulary size.
    /// * `dim_k` - number of latent factors.
    /// * `dim_kprime` - intermediate whitening rank, `dim_k <= dim_kprime <= dim_d`.
    /// * `alpha0` - Dirichlet concentration.
    /// * `num_partitions` - number of worker slots.
    pub fn new(
        dim_d: usize,
        dim_k: usize,
        dim_kprime: usize,
        alpha0: f64,
        num_partitions: usize,
    ) -> Self {
        Self {
            dim_d,
            dim_k,
            dim_kprime,
            alpha0,
            rho: Self::DEFAULT_RHO,
            tolerance: Self::DEFAULT_TOLERANCE,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            num_partitions,
        }
    }

    /// Sets the ALS ridge strength.
    pub fn with_rho(mut self, rho: f64) -> Self {
        self.rho = rho;
        self
    }

    /// Sets the ALS relative-change convergence threshold.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Caps the number of ALS sweeps; zero removes the cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn dim_d(&self) -> usize {
        self.dim_d
    }

    pub fn dim_k(&self) -> usize {
        self.dim_k
    }

    pub fn dim_kprime(&self) -> usize {
        self.dim_kprime
    }

    pub fn alpha0(&self) -> f64 {
        self.alpha0
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Checks that the dimensions and scalars are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("d", self.dim_d),
            ("k", self.dim_k),
            ("k'", self.dim_kprime),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDimension { name });
            }
        }
        if self.dim_k > self.dim_kprime || self.dim_kprime > self.dim_d {
            return Err(ConfigError::InconsistentDimensions {
                dim_d: self.dim_d,
                dim_k: self.dim_k,
                dim_kprime: self.dim_kprime,
            });
        }
        if !(self.alpha0.is_finite() && self.alpha0 > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "alpha0",
                requirement: "positive and finite",
                value: self.alpha0,
            });
        }
        if !(self.rho.is_finite() && self.rho >= 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "rho",
                requirement: "non-negative and finite",
                value: self.rho,
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "tolerance",
                requirement: "non-negative and finite",
                value: self.tolerance,
            });
        }
        if self.num_partitions == 0 {
            return Err(ConfigError::NoPartitions);
        }
        Ok(())
    }
}
