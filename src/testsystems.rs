use crate::bd::{BdDestination, BdStatistics};
use crate::errors::*;
use crate::model::{Anchor, BdMilestone, CalculationType, KOnInfo, Milestone, Model};
use crate::stats::{AnchorStatistics, ElberAnchorStatistics};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Radially symmetric interaction potentials
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Potential {
    /// $W(r) = 0$
    Flat,
    /// $W(r) = a r$
    Linear {
        #[allow(missing_docs)]
        slope: f64,
    },
    /// $W(r) = k r^2$
    Quadratic {
        #[allow(missing_docs)]
        k: f64,
    },
    /// $W(r) = q_1 q_2 / 4 \pi r$
    Coulomb {
        #[allow(missing_docs)]
        q1q2: f64,
    },
}

impl Potential {
    /// Potential energy at separation `r`
    pub fn energy(&self, r: f64) -> f64 {
        match *self {
            Potential::Flat => 0.0,
            Potential::Linear { slope } => slope * r,
            Potential::Quadratic { k } => k * r * r,
            Potential::Coulomb { q1q2 } => q1q2 / (4.0 * PI * r),
        }
    }

    /// Radial force $-dW/dr$ at separation `r`
    pub fn force(&self, r: f64) -> f64 {
        match *self {
            Potential::Flat => 0.0,
            Potential::Linear { slope } => -slope,
            Potential::Quadratic { k } => -2.0 * k * r,
            Potential::Coulomb { q1q2 } => q1q2 / (4.0 * PI * r * r),
        }
    }
}

/// Diffusion of a particle around a spherical receptor, milestoned by concentric spheres
///
/// The milestones are spheres of increasing radius; the innermost anchor is bounded by a
/// reflecting sphere of radius `r_min` and is the bound state, and the outermost milestone
/// borders the bulk. Milestone statistics, mean first passage times and association rates are
/// all known exactly from one dimensional quadrature over the radial coordinate.
///
/// # Examples
///
/// Exact MMVT statistics reproduce the analytical mean first passage time.
///
/// ```
/// use mmvt_rs::analysis::{Analysis, AnalysisOptions};
/// use mmvt_rs::kinetics::{MfptKey, StateId};
/// use mmvt_rs::testsystems::*;
///
/// let system = SmoluchowskiSystem::default();
/// let model = system.model().unwrap();
/// let mut analysis = Analysis::new(&model, AnalysisOptions::default()).unwrap();
/// for (alpha, stats) in system.mmvt_statistics().unwrap().into_iter().enumerate() {
///     if let Some(stats) = stats {
///         analysis.set_anchor_statistics(alpha, stats).unwrap();
///     }
/// }
/// let sample = analysis.process_main_sample().unwrap();
/// let mfpt = sample.kinetics.mfpts[&MfptKey::new(StateId::Milestone(0), StateId::Bulk)];
/// assert!((mfpt - system.analytical_mfpt()).abs() < 1e-3 * mfpt);
/// ```
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct SmoluchowskiSystem {
    /// Radii of the milestones, innermost first
    #[builder(default = "vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]")]
    milestone_radii: Vec<f64>,

    /// Radius of the reflecting inner boundary
    #[builder(default = "0.5")]
    r_min: f64,

    /// Diffusion coefficient
    #[builder(default = "1.0")]
    diffusion: f64,

    /// Inverse temperature
    #[builder(default = "1.0")]
    beta: f64,

    /// Interaction potential
    #[builder(default = "Potential::Flat")]
    potential: Potential,

    /// Trapezoid intervals per segment of every integral
    #[builder(default = "10000")]
    quadrature_points: usize,

    /// Milestoning formalism of the model
    #[builder(default = "CalculationType::Mmvt")]
    calculation: CalculationType,

    /// Anchors besides the bulk that are end states
    #[builder(default = "vec![0]")]
    end_anchors: Vec<usize>,
}

impl SmoluchowskiSystemBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(radii) = &self.milestone_radii {
            if radii.len() < 2 {
                return Err("at least two milestones are needed".to_string());
            }
            if radii.windows(2).any(|w| !(w[0] < w[1])) {
                return Err(format!("milestone radii must increase: {:?}", radii));
            }
            if let Some(r_min) = self.r_min {
                if !(r_min > 0.0 && r_min < radii[0]) {
                    return Err(format!(
                        "r_min must lie between 0 and the first milestone, not {}",
                        r_min
                    ));
                }
            }
        }
        if let Some(diffusion) = self.diffusion {
            if !(diffusion > 0.0) {
                return Err(format!("diffusion must be positive, not {}", diffusion));
            }
        }
        if let Some(beta) = self.beta {
            if !(beta > 0.0) {
                return Err(format!("beta must be positive, not {}", beta));
            }
        }
        if let Some(points) = self.quadrature_points {
            if points < 2 {
                return Err("quadrature needs at least two intervals".to_string());
            }
        }

        Ok(())
    }

    /// Build and validate the test system
    pub fn build(&self) -> Result<SmoluchowskiSystem> {
        Ok(self.build_inner()?)
    }
}

impl Default for SmoluchowskiSystem {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("SmoluchowskiSystem should not fail with default params")
    }
}

/// Nodes and cumulative integrals on a grid that includes a set of breakpoints
struct Quadrature {
    nodes: Vec<f64>,
    /// Index of each breakpoint in `nodes`
    breaks: Vec<usize>,
}

impl Quadrature {
    fn new(breakpoints: &[f64], intervals: usize) -> Self {
        let mut nodes = vec![breakpoints[0]];
        let mut breaks = vec![0];
        for w in breakpoints.windows(2) {
            let h = (w[1] - w[0]) / intervals as f64;
            nodes.extend((1..intervals).map(|k| w[0] + h * k as f64));
            nodes.push(w[1]);
            breaks.push(nodes.len() - 1);
        }
        Self { nodes, breaks }
    }

    fn sample(&self, f: impl Fn(f64) -> f64) -> Vec<f64> {
        self.nodes.iter().map(|&r| f(r)).collect()
    }

    /// Cumulative trapezoid integral of sampled values from the first node
    fn cumulative(&self, values: &[f64]) -> Vec<f64> {
        let mut total = 0.0;
        let mut out = Vec::with_capacity(values.len());
        out.push(0.0);
        for k in 1..values.len() {
            total += 0.5 * (values[k] + values[k - 1]) * (self.nodes[k] - self.nodes[k - 1]);
            out.push(total);
        }
        out
    }
}

impl SmoluchowskiSystem {
    /// Get a new builder for the `SmoluchowskiSystem` struct
    pub fn builder() -> SmoluchowskiSystemBuilder {
        SmoluchowskiSystemBuilder::default()
    }

    /// Radii of the milestones
    pub fn milestone_radii(&self) -> &[f64] {
        &self.milestone_radii
    }

    /// Radial equilibrium density $r^2 e^{-\beta W(r)}$, without the factor of $4 \pi$
    fn density(&self, r: f64) -> f64 {
        r * r * (-self.beta * self.potential.energy(r)).exp()
    }

    /// Radial resistance $1 / D r^2 e^{-\beta W(r)}$
    fn resistance(&self, r: f64) -> f64 {
        1.0 / (self.diffusion * self.density(r))
    }

    fn outermost(&self) -> usize {
        self.milestone_radii.len() - 1
    }

    fn milestone(&self, index: usize, alias: usize, neighbor: usize) -> Milestone {
        Milestone::new(index, alias, neighbor).with_variable("radius", self.milestone_radii[index])
    }

    /// The anchors and milestones of this system
    pub fn model(&self) -> Result<Model> {
        let last = self.outermost();
        let mut anchors = match self.calculation {
            CalculationType::Mmvt => {
                let mut anchors = vec![Anchor::new(0, vec![self.milestone(0, 1, 1)])];
                for i in 1..=last {
                    anchors.push(Anchor::new(
                        i,
                        vec![self.milestone(i - 1, 1, i - 1), self.milestone(i, 2, i + 1)],
                    ));
                }
                anchors.push(Anchor::new(last + 1, vec![self.milestone(last, 1, last)]));
                anchors
            }
            CalculationType::Elber => (0..=last)
                .map(|i| {
                    let mut milestones = Vec::new();
                    if i > 0 {
                        milestones.push(self.milestone(i - 1, 1, i - 1));
                    }
                    milestones.push(self.milestone(i, 2, i));
                    if i < last {
                        milestones.push(self.milestone(i + 1, 3, i + 1));
                    }
                    Anchor::new(i, milestones)
                })
                .collect(),
        };

        let bulk_index = anchors.len() - 1;
        for &alpha in &self.end_anchors {
            if alpha >= bulk_index {
                return Err(AnalysisError::InvalidModel(format!(
                    "end state {} is not one of the {} anchors in front of the bulk",
                    alpha, bulk_index
                )));
            }
            anchors[alpha].endstate = true;
        }
        if let Some(bulk) = anchors.last_mut() {
            bulk.endstate = true;
            bulk.bulkstate = true;
        }

        Model::builder()
            .temperature(298.15)
            .calculation(self.calculation)
            .anchors(anchors)
            .k_on_info(KOnInfo {
                bd_milestones: vec![BdMilestone {
                    index: 0,
                    outer_milestone: last,
                    inner_milestone: last - 1,
                }],
            })
            .build()
    }

    /// Exact MMVT statistics of every anchor, with one unit of time spent in each
    ///
    /// The bulk anchor has no statistics.
    pub fn mmvt_statistics(&self) -> Result<Vec<Option<AnchorStatistics>>> {
        if self.calculation != CalculationType::Mmvt {
            return Err(AnalysisError::InvalidModel(
                "MMVT statistics of an Elber system".to_string(),
            ));
        }
        let radii = &self.milestone_radii;
        let d = self.diffusion;

        // The dead-end anchor only bounces against its one milestone
        let inner = Quadrature::new(&[self.r_min, radii[0]], self.quadrature_points);
        let z = *inner
            .cumulative(&inner.sample(|r| self.density(r)))
            .last()
            .unwrap_or(&0.0);
        let mut stats = vec![Some(AnchorStatistics::from_totals(
            BTreeMap::new(),
            std::iter::once((1, 1.0)).collect(),
            std::iter::once((1, d * self.density(radii[0]) / z)).collect(),
            1.0,
        ))];

        for w in radii.windows(2) {
            let (a, b) = (w[0], w[1]);
            let grid = Quadrature::new(&[a, b], self.quadrature_points);
            let density = grid.sample(|r| self.density(r));
            let cumulative_resistance = grid.cumulative(&grid.sample(|r| self.resistance(r)));
            let z = *grid.cumulative(&density).last().unwrap_or(&0.0);
            let g = *cumulative_resistance.last().unwrap_or(&0.0);

            // Probability that the last milestone touched was the lower one
            let last_lower: Vec<f64> = density
                .iter()
                .zip(&cumulative_resistance)
                .map(|(&w, &c)| w * (g - c) / g)
                .collect();
            let r_lower = *grid.cumulative(&last_lower).last().unwrap_or(&0.0) / z;

            let transitions = 1.0 / (z * g);
            let mut n_i_j = BTreeMap::new();
            n_i_j.insert((1, 2), transitions);
            n_i_j.insert((2, 1), transitions);
            let mut r_i = BTreeMap::new();
            r_i.insert(1, r_lower);
            r_i.insert(2, 1.0 - r_lower);
            // Only the ratio of bounce rates across a milestone matters
            let mut n_alpha_beta = BTreeMap::new();
            n_alpha_beta.insert(1, d * self.density(a) / z);
            n_alpha_beta.insert(2, d * self.density(b) / z);

            stats.push(Some(AnchorStatistics::from_totals(
                n_i_j,
                r_i,
                n_alpha_beta,
                1.0,
            )));
        }

        stats.push(None);
        Ok(stats)
    }

    /// Exact Elber statistics of every anchor
    ///
    /// Trajectories start on each anchor's centre milestone and stop on either neighbour; the
    /// innermost anchor reflects at `r_min`. The bulk anchor has no statistics.
    pub fn elber_statistics(&self) -> Result<Vec<Option<ElberAnchorStatistics>>> {
        if self.calculation != CalculationType::Elber {
            return Err(AnalysisError::InvalidModel(
                "Elber statistics of an MMVT system".to_string(),
            ));
        }
        let radii = &self.milestone_radii;
        let mut stats = Vec::new();

        // Exit time of the innermost anchor, reflecting at r_min
        let grid = Quadrature::new(&[self.r_min, radii[0], radii[1]], self.quadrature_points);
        let p = grid.cumulative(&grid.sample(|r| self.density(r)));
        let hp: Vec<f64> = grid
            .nodes
            .iter()
            .zip(&p)
            .map(|(&r, &p)| self.resistance(r) * p)
            .collect();
        let cumulative_hp = grid.cumulative(&hp);
        let time = cumulative_hp[grid.breaks[2]] - cumulative_hp[grid.breaks[1]];
        stats.push(Some(ElberAnchorStatistics::new(
            std::iter::once((3, 1.0)).collect(),
            time,
        )));

        for w in radii.windows(3) {
            let grid = Quadrature::new(w, self.quadrature_points);
            let h = grid.cumulative(&grid.sample(|r| self.resistance(r)));
            let p = grid.cumulative(&grid.sample(|r| self.density(r)));
            let hp: Vec<f64> = grid
                .nodes
                .iter()
                .zip(&p)
                .map(|(&r, &p)| self.resistance(r) * p)
                .collect();
            let cumulative_hp = grid.cumulative(&hp);

            let (centre, end) = (grid.breaks[1], grid.breaks[2]);
            let p_up = h[centre] / h[end];
            let c = cumulative_hp[end] / h[end];
            let time = -cumulative_hp[centre] + c * h[centre];

            let mut n_i_j = BTreeMap::new();
            n_i_j.insert(1, 1.0 - p_up);
            n_i_j.insert(3, p_up);
            stats.push(Some(ElberAnchorStatistics::new(n_i_j, time)));
        }

        stats.push(None);
        Ok(stats)
    }

    /// $\int_r^\infty e^{\beta W(s)} / s^2 \, ds$, known in closed form for flat and Coulomb
    /// potentials
    fn escape_integral(&self, r: f64) -> Result<f64> {
        match self.potential {
            Potential::Flat => Ok(1.0 / r),
            Potential::Coulomb { q1q2 } if q1q2 != 0.0 => {
                let a = self.beta * q1q2 / (4.0 * PI);
                Ok(((a / r).exp() - 1.0) / a)
            }
            Potential::Coulomb { .. } => Ok(1.0 / r),
            _ => Err(AnalysisError::InvalidModel(format!(
                "no closed form association rate for {:?}",
                self.potential
            ))),
        }
    }

    /// Exact BD statistics for the outermost milestone
    pub fn bd_statistics(&self) -> Result<BdStatistics> {
        let radii = &self.milestone_radii;
        let last = self.outermost();
        let outer = self.escape_integral(radii[last])?;
        let inner = self.escape_integral(radii[last - 1])?;
        let k_b = 4.0 * PI * self.diffusion / outer;
        let p_in = outer / inner;

        let mut counts = BTreeMap::new();
        counts.insert(BdDestination::Milestone(last - 1), p_in);
        counts.insert(BdDestination::Escaped, 1.0 - p_in);
        Ok(BdStatistics::new(k_b, counts))
    }

    /// Mean first passage time from the innermost to the outermost milestone
    ///
    /// $$ \tau = \int_{r_0}^{r_n} \frac{e^{\beta W(s)}}{D s^2}
    ///    \int_{r_{min}}^{s} r^2 e^{-\beta W(r)} \, dr \, ds $$
    pub fn analytical_mfpt(&self) -> f64 {
        self.analytical_mfpt_between(0, self.outermost())
    }

    /// Mean first passage time from milestone `from` to milestone `to`
    ///
    /// Inward passages are reflected at the outermost milestone, as they are in an MMVT model
    /// whose bulk anchor is not simulated:
    ///
    /// $$ \tau = \int_{r_{to}}^{r_{from}} \frac{e^{\beta W(s)}}{D s^2}
    ///    \int_{s}^{r_n} r^2 e^{-\beta W(r)} \, dr \, ds $$
    ///
    /// # Panics
    ///
    /// If either index is not a milestone of this system.
    pub fn analytical_mfpt_between(&self, from: usize, to: usize) -> f64 {
        let radii = &self.milestone_radii;
        let mut breakpoints = vec![self.r_min];
        breakpoints.extend_from_slice(radii);
        let grid = Quadrature::new(&breakpoints, self.quadrature_points);
        let p = grid.cumulative(&grid.sample(|r| self.density(r)));
        let total = p[grid.breaks[radii.len()]];

        // Equilibrium mass behind the moving particle
        let hp: Vec<f64> = grid
            .nodes
            .iter()
            .zip(&p)
            .map(|(&r, &p)| self.resistance(r) * if from <= to { p } else { total - p })
            .collect();
        let cumulative_hp = grid.cumulative(&hp);
        let (inner, outer) = (from.min(to), from.max(to));
        cumulative_hp[grid.breaks[outer + 1]] - cumulative_hp[grid.breaks[inner + 1]]
    }

    /// Debye-Smoluchowski association rate to the innermost milestone
    pub fn analytical_k_on(&self) -> Result<f64> {
        Ok(4.0 * PI * self.diffusion / self.escape_integral(self.milestone_radii[0])?)
    }

    /// Simulate Brownian dynamics in MMVT anchor `alpha` and write its bounces as an OpenMM log
    ///
    /// Moves that would leave the anchor through a milestone are rejected and logged as a
    /// bounce; moves through the reflecting sphere at `r_min` are rejected silently.
    pub fn write_mmvt_log(
        &self,
        alpha: usize,
        path: &Path,
        steps: usize,
        dt: f64,
        seed: u64,
    ) -> Result<()> {
        let radii = &self.milestone_radii;
        let (lower, upper, lower_alias, upper_alias) = match alpha {
            0 => (self.r_min, radii[0], None, 1),
            a if a <= self.outermost() => (radii[a - 1], radii[a], Some(1), 2),
            _ => {
                return Err(AnalysisError::InvalidModel(format!(
                    "anchor {} has no dynamics",
                    alpha
                )))
            }
        };
        let io_error = |source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
        writeln!(out, "#\"Bounced boundary ID\",\"bounce index\",\"total time (ps)\"")
            .map_err(io_error)?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = (2.0 * self.diffusion * dt).sqrt();
        let mut x = [0.5 * (lower + upper), 0.0, 0.0];
        let mut bounces = 0;

        for step in 1..=steps {
            let r = x.iter().map(|c| c * c).sum::<f64>().sqrt();
            let drift = self.diffusion * self.beta * self.potential.force(r) * dt / r;
            let mut proposal = [0.0; 3];
            for (new, &old) in proposal.iter_mut().zip(&x) {
                let xi: f64 = StandardNormal.sample(&mut rng);
                *new = old + drift * old + noise * xi;
            }
            let r_new = proposal.iter().map(|c| c * c).sum::<f64>().sqrt();

            let alias = if r_new >= upper {
                upper_alias
            } else if r_new > lower {
                x = proposal;
                continue;
            } else if let Some(alias) = lower_alias {
                alias
            } else {
                continue;
            };
            writeln!(out, "{},{},{}", alias, bounces, step as f64 * dt).map_err(io_error)?;
            bounces += 1;
        }

        out.flush().map_err(io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use itertools::Itertools;

    #[test]
    fn reject_bad_radii() {
        assert!(SmoluchowskiSystem::builder()
            .milestone_radii(vec![2.0, 1.0])
            .build()
            .is_err());
        assert!(SmoluchowskiSystem::builder()
            .milestone_radii(vec![1.0, 2.0])
            .r_min(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn flat_mfpt_closed_form() {
        let system = SmoluchowskiSystem::default();
        let (r0, rn, r_min) = (1.0_f64, 6.0_f64, 0.5_f64);
        let expected =
            (rn * rn - r0 * r0) / 6.0 + r_min.powi(3) / 3.0 * (1.0 / rn - 1.0 / r0);
        assert_relative_eq!(system.analytical_mfpt(), expected, max_relative = 1e-6);
    }

    #[test]
    fn mmvt_models_have_a_dead_end_and_a_bulk() {
        let system = SmoluchowskiSystem::default();
        let model = system.model().unwrap();
        assert_eq!(model.num_anchors(), 7);
        assert_eq!(model.num_milestones(), 6);
        assert_eq!(model.bulk_index().unwrap(), 6);
        assert!(model.anchors[0].is_dead_end());
        assert_eq!(model.anchors[3].milestones[1].variables["radius"], 4.0);

        let stats = system.mmvt_statistics().unwrap();
        assert_eq!(stats.len(), 7);
        assert!(stats[6].is_none());
        let cell = stats[2].as_ref().unwrap();
        assert_relative_eq!(
            cell.r_i[&1].total + cell.r_i[&2].total,
            1.0,
            epsilon = 1e-12
        );
        assert_eq!(cell.n_i_j[&(1, 2)], cell.n_i_j[&(2, 1)]);
    }

    #[test]
    fn elber_models_centre_on_each_milestone() {
        let system = SmoluchowskiSystem::builder()
            .calculation(CalculationType::Elber)
            .build()
            .unwrap();
        let model = system.model().unwrap();
        assert_eq!(model.num_anchors(), 6);
        assert_eq!(model.bulk_index().unwrap(), 5);

        let stats = system.elber_statistics().unwrap();
        assert_eq!(stats.len(), 6);
        for anchor_stats in stats.iter().flatten() {
            let total: f64 = anchor_stats.n_i_j.values().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
            assert!(anchor_stats.r_i_total > 0.0);
        }
        assert!(system.mmvt_statistics().is_err());
    }

    #[test]
    fn end_anchors_must_precede_the_bulk() {
        let system = SmoluchowskiSystem::builder()
            .end_anchors(vec![0, 3])
            .build()
            .unwrap();
        let model = system.model().unwrap();
        let ends: Vec<usize> = model.end_milestones().keys().copied().collect();
        assert_eq!(ends, vec![0, 2, 3]);

        let system = SmoluchowskiSystem::builder()
            .end_anchors(vec![6])
            .build()
            .unwrap();
        assert!(matches!(system.model(), Err(AnalysisError::InvalidModel(_))));
    }

    #[test]
    fn flat_mfpts_between_milestones() {
        let system = SmoluchowskiSystem::default();
        let (r_min, r_n) = (0.5_f64, 6.0_f64);
        // Outward from 2 to 4, reflecting at r_min
        let outward = (16.0 - 4.0) / 6.0 + r_min.powi(3) / 3.0 * (1.0 / 4.0 - 1.0 / 2.0);
        assert_relative_eq!(
            system.analytical_mfpt_between(1, 3),
            outward,
            max_relative = 1e-6
        );
        // Inward from 4 to 2, reflecting at r_n
        let inward = r_n.powi(3) / 3.0 * (1.0 / 2.0 - 1.0 / 4.0) - (16.0 - 4.0) / 6.0;
        assert_relative_eq!(
            system.analytical_mfpt_between(3, 1),
            inward,
            max_relative = 1e-6
        );
        assert_eq!(system.analytical_mfpt_between(2, 2), 0.0);
    }

    #[test]
    fn flat_bd_statistics() {
        let system = SmoluchowskiSystem::default();
        let bd = system.bd_statistics().unwrap();
        assert_relative_eq!(bd.k_b, 4.0 * PI * 6.0);
        let p = bd.probabilities().unwrap();
        assert_relative_eq!(p[&BdDestination::Milestone(4)], 5.0 / 6.0);
        assert_relative_eq!(system.analytical_k_on().unwrap(), 4.0 * PI);
    }

    #[test]
    fn coulomb_reduces_to_flat() {
        let coulomb = SmoluchowskiSystem::builder()
            .potential(Potential::Coulomb { q1q2: -1e-9 })
            .build()
            .unwrap();
        assert_relative_eq!(
            coulomb.analytical_k_on().unwrap(),
            4.0 * PI,
            max_relative = 1e-6
        );
        let quadratic = SmoluchowskiSystem::builder()
            .potential(Potential::Quadratic { k: 1.0 })
            .build()
            .unwrap();
        assert!(quadratic.analytical_k_on().is_err());
    }

    #[test]
    fn toy_engine_writes_bounces() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mmvt.out");
        let system = SmoluchowskiSystem::default();
        system.write_mmvt_log(2, &path, 5000, 1e-3, 4).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<(usize, usize, f64)> = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| {
                let (alias, index, time) = l.split(',').collect_tuple().unwrap();
                (
                    alias.parse().unwrap(),
                    index.parse().unwrap(),
                    time.parse().unwrap(),
                )
            })
            .collect();
        assert!(!records.is_empty());
        assert!(records.iter().all(|&(alias, _, _)| alias == 1 || alias == 2));
        assert!(records
            .iter()
            .tuple_windows()
            .all(|(a, b)| b.1 == a.1 + 1 && b.2 > a.2));
        assert!(system.write_mmvt_log(6, &path, 10, 1e-3, 4).is_err());
    }
}
