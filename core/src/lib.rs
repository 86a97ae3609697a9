//! # tf-moments
//!
//! `tf-moments` fits latent Dirichlet topic models by the method of moments.
//! It whitens the empirical second moment, builds the Dirichlet-corrected
//! third-moment tensor in whitened space, factorizes that tensor with
//! alternating least squares and maps the factors back to vocabulary space.
//!
//! The work is split across one master and `N` workers that only talk over
//! broadcast/reduce [collective groups](distributed). Each worker owns a
//! share of the corpus and a band of tensor rows.
//!
//! ## Modules
//!
//! - [`matrix`]: Dense row-major `f64` matrix.
//! - [`linalg`]: Orthogonalisation, pseudo-inverse, eigen and simplex helpers.
//! - [`distributed`]: Collective groups (broadcast + associative reduce).
//! - [`stages`]: The Whiten, M1, M3, ALS and Unwhiten protocols.
//! - [`scheduler`]: Steps each execution slot through the stages.
//! - [`pipeline`]: In-process runtime with one thread per slot.
//! - [`io`]: Text formats for corpora and fitted matrices.
//! - [`synthetic`]: Seeded synthetic corpora with known topics.
//!
//! ## Example
//!
//! ```rust
//! use tf_moments::io::split_documents;
//! use tf_moments::synthetic::SyntheticCorpus;
//! use tf_moments::{Config, Pipeline};
//!
//! let corpus = SyntheticCorpus::generate(20, 3, 0.3, 60, 30, 1).unwrap();
//! let config = Config::new(20, 3, 5, 0.3, 2).with_max_iterations(20);
//! let estimate = Pipeline::new(config)
//!     .unwrap()
//!     .run(split_documents(corpus.documents, 2))
//!     .unwrap();
//!
//! assert_eq!(estimate.beta.shape(), &[20, 3]);
//! let total: f64 = estimate.alpha.data().iter().sum();
//! assert!((total - 0.3).abs() < 1e-9);
//! ```

pub mod config;
pub mod distributed;
pub mod document;
pub mod error;
pub mod io;
pub mod linalg;
pub mod matrix;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod stages;
pub mod synthetic;

pub use config::{Config, ConfigError};
pub use distributed::CollectiveError;
pub use document::{Document, Token};
pub use error::{PipelineError, Result};
pub use matrix::{Matrix, MatrixError};
pub use pipeline::Pipeline;
pub use stages::Estimate;
