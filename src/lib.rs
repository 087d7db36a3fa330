#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]

//! Rate-matrix estimation for milestoning simulations. Event logs of Markovian milestoning with
//! Voronoi tessellations (MMVT) or Elber milestoning are reduced to a milestone rate matrix, from
//! which equilibrium probabilities, free energy profiles, mean first passage times and binding
//! rate constants are computed. Uncertainties are estimated by sampling rate matrices from their
//! posterior by Markov chain Monte Carlo.
//!
//! Please reference the following if you use this code in your research:
//!
//! [1] Vanden-Eijnden E and Venturoli M. Markovian milestoning with Voronoi tessellations.
//! J. Chem. Phys. 130:194101, 2009. <https://doi.org/10.1063/1.3129843>
//!
//! [2] Votapka LW, Stokely AM, Ojha AA and Amaro RE. SEEKR2: Versatile Multiscale Milestoning
//! Utilizing the OpenMM Molecular Dynamics Engine. J. Chem. Inf. Model. 62:3253, 2022.
//! <https://doi.org/10.1021/acs.jcim.2c00501>
//!
//! [3] Noé F. Probability distributions of molecular observables computed from Markov models.
//! J. Chem. Phys. 128:244103, 2008. <https://doi.org/10.1063/1.2916718>

#[macro_use]
extern crate derive_builder;

pub mod analysis;
pub mod bd;
/// Errors of this crate
pub mod errors;
pub mod kinetics;
pub mod linalg;
pub mod logs;
pub mod mcmc;
/// Anchors, milestones and the topology of a milestoning calculation
pub mod model;
pub mod rate_matrix;
pub mod sample;
pub mod stationary;
pub mod stats;
/// Exactly solvable systems for testing the analysis
pub mod testsystems;

#[cfg(feature = "python")]
mod python;

pub use analysis::{analyze, Analysis, AnalysisOptions, AnalysisResults};
pub use errors::{AnalysisError, Result};
pub use logs::LogFormat;
pub use model::{Anchor, CalculationType, Milestone, Model};
pub use sample::{DataSample, Observables};
