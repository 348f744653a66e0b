//! No-U-Turn sampler transition with multinomial trajectory sampling
//!
//! Trajectories are extended by repeated doubling in a random direction. Within each subtree a
//! state is proposed in proportion to its density (uniform progressive sampling), while the
//! top-level merge biases selection toward the newest subtree. Expansion stops on a generalized
//! U-turn, a divergence, or the maximum tree depth.
//!

use rand::Rng;
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::model::LogDensity;
use crate::prob_utils::ln_sum_exp;

/// Energy error above which a trajectory is marked divergent
const MAX_ENERGY_ERROR: f64 = 1000.0;

/// Position, momentum and log density gradient of one point in phase space
#[derive(Clone)]
pub struct PhasePoint {
    pub q: Vec<f64>,
    p: Vec<f64>,
    grad: Vec<f64>,
    ln_density: f64,
}

impl PhasePoint {
    /// Create a point at `q` with zero momentum
    pub fn new<M: LogDensity>(model: &M, q: Vec<f64>) -> Self {
        let mut grad = vec![0.0; q.len()];
        let ln_density = model.ln_density_and_gradient(&q, &mut grad);
        let p = vec![0.0; q.len()];
        Self {
            q,
            p,
            grad,
            ln_density,
        }
    }

    pub fn ln_density(&self) -> f64 {
        self.ln_density
    }

    pub fn is_finite(&self) -> bool {
        self.ln_density.is_finite() && self.grad.iter().all(|x| x.is_finite())
    }
}

/// Momentum and velocity at one end of a trajectory
#[derive(Clone)]
struct TrajectoryEnd {
    p: Vec<f64>,
    p_sharp: Vec<f64>,
}

/// Summary of a completed (non-divergent, U-turn free) subtree
struct Subtree {
    /// End nearest the trajectory origin
    near: TrajectoryEnd,

    /// End furthest from the trajectory origin
    far: TrajectoryEnd,

    /// Sum of momenta over all subtree states
    rho: Vec<f64>,

    ln_sum_weight: f64,
    proposal: PhasePoint,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

/// Trajectory continues unless the summed momentum reverses direction at either end
fn is_no_u_turn(p_sharp_a: &[f64], p_sharp_b: &[f64], rho: &[f64]) -> bool {
    dot(p_sharp_a, rho) > 0.0 && dot(p_sharp_b, rho) > 0.0
}

/// Check the U-turn criterion for a trajectory formed by appending `new` beyond `old`
///
/// In addition to the criterion over the merged trajectory, each half is checked after extension
/// by the adjacent state of the other half.
///
fn is_merged_no_u_turn(
    old: (&TrajectoryEnd, &TrajectoryEnd, &[f64]),
    new: (&TrajectoryEnd, &TrajectoryEnd, &[f64]),
    rho: &[f64],
) -> bool {
    let (old_far, old_near, old_rho) = old;
    let (new_near, new_far, new_rho) = new;
    is_no_u_turn(&old_far.p_sharp, &new_far.p_sharp, rho)
        && is_no_u_turn(&old_far.p_sharp, &new_near.p_sharp, &add(old_rho, &new_near.p))
        && is_no_u_turn(&old_near.p_sharp, &new_far.p_sharp, &add(new_rho, &old_near.p))
}

/// Diagnostics of a single transition
#[derive(Clone, Debug, Default)]
pub struct TransitionStats {
    pub accept_stat: f64,
    pub tree_depth: usize,
    pub leapfrog_count: usize,
    pub divergent: bool,
    pub energy: f64,
}

/// Hamiltonian dynamics with a diagonal metric and one transition's tree building state
///
struct TreeBuilder<'a, M: LogDensity> {
    model: &'a M,
    inv_metric: &'a [f64],
    step_size: f64,
    rng: &'a mut Xoshiro256PlusPlus,

    /// Current integrator state
    z: PhasePoint,

    initial_energy: f64,
    leapfrog_count: usize,
    sum_metro_prob: f64,
    divergent: bool,
}

impl<M: LogDensity> TreeBuilder<'_, M> {
    fn p_sharp(&self, z: &PhasePoint) -> Vec<f64> {
        z.p.iter().zip(self.inv_metric.iter()).map(|(p, m)| p * m).collect()
    }

    fn leapfrog(&mut self, step_size: f64) {
        let z = &mut self.z;
        for (p, g) in z.p.iter_mut().zip(z.grad.iter()) {
            *p += 0.5 * step_size * g;
        }
        for ((q, p), m) in z.q.iter_mut().zip(z.p.iter()).zip(self.inv_metric.iter()) {
            *q += step_size * m * p;
        }
        z.ln_density = self.model.ln_density_and_gradient(&z.q, &mut z.grad);
        for (p, g) in z.p.iter_mut().zip(z.grad.iter()) {
            *p += 0.5 * step_size * g;
        }
    }

    /// Build a subtree of 2^depth leapfrog steps from the current integrator state
    ///
    /// Returns None if the subtree diverged or contains a U-turn.
    ///
    fn build_tree(&mut self, depth: usize, direction: f64) -> Option<Subtree> {
        if depth == 0 {
            self.leapfrog(direction * self.step_size);
            self.leapfrog_count += 1;

            let mut energy = hamiltonian(&self.z, self.inv_metric);
            if energy.is_nan() {
                energy = f64::INFINITY;
            }
            if energy - self.initial_energy > MAX_ENERGY_ERROR {
                self.divergent = true;
            }

            let ln_weight = self.initial_energy - energy;
            self.sum_metro_prob += if ln_weight > 0.0 {
                1.0
            } else {
                ln_weight.exp()
            };

            if self.divergent {
                return None;
            }

            let end = TrajectoryEnd {
                p: self.z.p.clone(),
                p_sharp: self.p_sharp(&self.z),
            };
            return Some(Subtree {
                near: end.clone(),
                far: end,
                rho: self.z.p.clone(),
                ln_sum_weight: ln_weight,
                proposal: self.z.clone(),
            });
        }

        let init = self.build_tree(depth - 1, direction)?;
        let last = self.build_tree(depth - 1, direction)?;

        let ln_sum_weight = ln_sum_exp(init.ln_sum_weight, last.ln_sum_weight);
        let accept_prob = (last.ln_sum_weight - ln_sum_weight).exp();
        let proposal = if self.rng.gen_range(0.0..1.0) < accept_prob {
            last.proposal
        } else {
            init.proposal
        };

        let rho = add(&init.rho, &last.rho);
        if !is_merged_no_u_turn(
            (&init.near, &init.far, &init.rho),
            (&last.near, &last.far, &last.rho),
            &rho,
        ) {
            return None;
        }

        Some(Subtree {
            near: init.near,
            far: last.far,
            rho,
            ln_sum_weight,
            proposal,
        })
    }
}

fn kinetic_energy(p: &[f64], inv_metric: &[f64]) -> f64 {
    0.5 * p
        .iter()
        .zip(inv_metric.iter())
        .map(|(p, m)| p * p * m)
        .sum::<f64>()
}

fn hamiltonian(z: &PhasePoint, inv_metric: &[f64]) -> f64 {
    -z.ln_density + kinetic_energy(&z.p, inv_metric)
}

/// Draw a new momentum from the kinetic energy distribution
pub fn sample_momentum(z: &mut PhasePoint, inv_metric: &[f64], rng: &mut Xoshiro256PlusPlus) {
    for (p, m) in z.p.iter_mut().zip(inv_metric.iter()) {
        let x: f64 = rng.sample(StandardNormal);
        *p = x / m.sqrt();
    }
}

/// Run one NUTS transition from `z`
///
/// Returns the new state and the transition diagnostics
///
pub fn transition<M: LogDensity>(
    model: &M,
    z: &PhasePoint,
    inv_metric: &[f64],
    step_size: f64,
    max_tree_depth: usize,
    rng: &mut Xoshiro256PlusPlus,
) -> (PhasePoint, TransitionStats) {
    let mut z = z.clone();
    sample_momentum(&mut z, inv_metric, rng);
    let initial_energy = hamiltonian(&z, inv_metric);

    let start = TrajectoryEnd {
        p: z.p.clone(),
        p_sharp: z.p.iter().zip(inv_metric.iter()).map(|(p, m)| p * m).collect(),
    };

    // Trajectory ends in the backward and forward directions
    let mut z_bck = z.clone();
    let mut z_fwd = z.clone();
    let mut bck = start.clone();
    let mut fwd = start;
    let mut rho = z.p.clone();

    let mut sample = z.clone();
    let mut ln_sum_weight = 0.0;
    let mut depth = 0;

    let mut builder = TreeBuilder {
        model,
        inv_metric,
        step_size,
        rng,
        z,
        initial_energy,
        leapfrog_count: 0,
        sum_metro_prob: 0.0,
        divergent: false,
    };

    while depth < max_tree_depth {
        let is_forward = builder.rng.gen_range(0.0..1.0) > 0.5;
        let (direction, start_z) = if is_forward {
            (1.0, &z_fwd)
        } else {
            (-1.0, &z_bck)
        };
        builder.z = start_z.clone();

        let subtree = match builder.build_tree(depth, direction) {
            Some(x) => x,
            None => break,
        };
        depth += 1;

        // Biased progressive sampling favors the new subtree
        if subtree.ln_sum_weight > ln_sum_weight {
            sample = subtree.proposal.clone();
        } else {
            let accept_prob = (subtree.ln_sum_weight - ln_sum_weight).exp();
            if builder.rng.gen_range(0.0..1.0) < accept_prob {
                sample = subtree.proposal.clone();
            }
        }
        ln_sum_weight = ln_sum_exp(ln_sum_weight, subtree.ln_sum_weight);

        let old_rho = rho;
        rho = add(&old_rho, &subtree.rho);
        let (old_near, old_far) = if is_forward { (&fwd, &bck) } else { (&bck, &fwd) };
        let is_continuing = is_merged_no_u_turn(
            (old_far, old_near, &old_rho),
            (&subtree.near, &subtree.far, &subtree.rho),
            &rho,
        );

        if is_forward {
            z_fwd = builder.z.clone();
            fwd = subtree.far;
        } else {
            z_bck = builder.z.clone();
            bck = subtree.far;
        }

        if !is_continuing {
            break;
        }
    }

    let leapfrog_count = builder.leapfrog_count;
    let stats = TransitionStats {
        accept_stat: if leapfrog_count > 0 {
            builder.sum_metro_prob / leapfrog_count as f64
        } else {
            0.0
        },
        tree_depth: depth,
        leapfrog_count,
        divergent: builder.divergent,
        energy: hamiltonian(&sample, inv_metric),
    };
    (sample, stats)
}

/// Find a reasonable initial step size by doubling or halving until the acceptance probability of
/// a single leapfrog step crosses 0.8
///
/// Returns None if the step size search leaves the range (0, 1e7]
///
pub fn find_reasonable_step_size<M: LogDensity>(
    model: &M,
    z: &PhasePoint,
    inv_metric: &[f64],
    step_size: f64,
    rng: &mut Xoshiro256PlusPlus,
) -> Option<f64> {
    let ln_target = 0.8f64.ln();

    let single_step_energy_delta = |step_size: f64, rng: &mut Xoshiro256PlusPlus| {
        let mut z = z.clone();
        sample_momentum(&mut z, inv_metric, rng);
        let initial_energy = hamiltonian(&z, inv_metric);
        let mut builder = TreeBuilder {
            model,
            inv_metric,
            step_size,
            rng,
            z,
            initial_energy,
            leapfrog_count: 0,
            sum_metro_prob: 0.0,
            divergent: false,
        };
        builder.leapfrog(step_size);
        let mut energy = hamiltonian(&builder.z, inv_metric);
        if energy.is_nan() {
            energy = f64::INFINITY;
        }
        initial_energy - energy
    };

    let mut step_size = step_size;
    let is_increasing = single_step_energy_delta(step_size, rng) > ln_target;
    loop {
        let delta = single_step_energy_delta(step_size, rng);
        if is_increasing && delta <= ln_target {
            break;
        }
        if !is_increasing && delta >= ln_target {
            break;
        }
        step_size = if is_increasing {
            2.0 * step_size
        } else {
            0.5 * step_size
        };
        if step_size > 1e7 || step_size == 0.0 {
            return None;
        }
    }
    Some(step_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Independent normal distribution with the given scales
    struct DiagNormal {
        scales: Vec<f64>,
    }

    impl LogDensity for DiagNormal {
        fn dim(&self) -> usize {
            self.scales.len()
        }

        fn ln_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
            let mut ln_density = 0.0;
            for ((x, s), g) in theta.iter().zip(self.scales.iter()).zip(grad.iter_mut()) {
                ln_density -= 0.5 * (x / s) * (x / s);
                *g = -x / (s * s);
            }
            ln_density
        }

        fn parameter_layout(&self) -> Vec<(String, usize)> {
            vec![("x".to_string(), self.scales.len())]
        }

        fn constrain(&self, theta: &[f64]) -> Vec<f64> {
            theta.to_vec()
        }
    }

    #[test]
    fn test_leapfrog_conserves_energy() {
        let model = DiagNormal {
            scales: vec![1.0, 2.0],
        };
        let inv_metric = vec![1.0, 1.0];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut z = PhasePoint::new(&model, vec![0.5, -1.0]);
        sample_momentum(&mut z, &inv_metric, &mut rng);
        let initial_energy = hamiltonian(&z, &inv_metric);

        let mut builder = TreeBuilder {
            model: &model,
            inv_metric: &inv_metric,
            step_size: 0.01,
            rng: &mut rng,
            z,
            initial_energy,
            leapfrog_count: 0,
            sum_metro_prob: 0.0,
            divergent: false,
        };
        for _ in 0..100 {
            builder.leapfrog(0.01);
        }
        let energy = hamiltonian(&builder.z, &inv_metric);
        approx::assert_abs_diff_eq!(energy, initial_energy, epsilon = 1e-3);
    }

    #[test]
    fn test_transition_diagnostics() {
        let model = DiagNormal {
            scales: vec![1.0; 3],
        };
        let inv_metric = vec![1.0; 3];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let z = PhasePoint::new(&model, vec![0.1, 0.2, -0.3]);

        let (next, stats) = transition(&model, &z, &inv_metric, 0.5, 10, &mut rng);
        assert!(next.is_finite());
        assert!(!stats.divergent);
        assert!(stats.tree_depth >= 1);
        assert!(stats.leapfrog_count >= 1);
        assert!(stats.leapfrog_count < (1 << (stats.tree_depth + 1)));
        assert!(stats.accept_stat > 0.0 && stats.accept_stat <= 1.0);
    }

    #[test]
    fn test_divergence_is_recorded() {
        let model = DiagNormal {
            scales: vec![0.001; 2],
        };
        let inv_metric = vec![1.0; 2];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let z = PhasePoint::new(&model, vec![0.0, 0.0]);
        let (_, stats) = transition(&model, &z, &inv_metric, 10.0, 10, &mut rng);
        assert!(stats.divergent);
    }

    #[test]
    fn test_find_reasonable_step_size() {
        let model = DiagNormal {
            scales: vec![0.01; 2],
        };
        let inv_metric = vec![1.0; 2];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let z = PhasePoint::new(&model, vec![0.0, 0.0]);
        let step_size = find_reasonable_step_size(&model, &z, &inv_metric, 1.0, &mut rng).unwrap();
        assert!(step_size < 0.1);
    }
}
