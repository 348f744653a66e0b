//! Warmup tuning of the sampler step size and diagonal metric
//!

/// Dual averaging step size adaptation
///
pub struct StepSizeAdaptation {
    mu: f64,
    target_accept: f64,
    gamma: f64,
    kappa: f64,
    t0: f64,

    counter: f64,
    s_bar: f64,
    x_bar: f64,
}

impl StepSizeAdaptation {
    pub fn new(target_accept: f64) -> Self {
        Self {
            mu: 0.0,
            target_accept,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.0,
            counter: 0.0,
            s_bar: 0.0,
            x_bar: 0.0,
        }
    }

    /// Restart the dual averaging procedure, shrinking toward 10x the given step size
    pub fn restart(&mut self, step_size: f64) {
        self.mu = (10.0 * step_size).ln();
        self.counter = 0.0;
        self.s_bar = 0.0;
        self.x_bar = 0.0;
    }

    /// Return the next step size given the acceptance statistic of the latest transition
    pub fn learn_step_size(&mut self, accept_stat: f64) -> f64 {
        self.counter += 1.0;
        let accept_stat = accept_stat.min(1.0);

        let eta = 1.0 / (self.counter + self.t0);
        self.s_bar = (1.0 - eta) * self.s_bar + eta * (self.target_accept - accept_stat);

        let x = self.mu - self.s_bar * self.counter.sqrt() / self.gamma;
        let x_eta = self.counter.powf(-self.kappa);
        self.x_bar = (1.0 - x_eta) * self.x_bar + x_eta * x;

        x.exp()
    }

    /// Final step size to use once adaptation is complete
    pub fn final_step_size(&self) -> f64 {
        self.x_bar.exp()
    }
}

/// Streaming mean and variance estimate
///
struct WelfordVariance {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl WelfordVariance {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn restart(&mut self) {
        self.count = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }

    fn add_sample(&mut self, q: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((m, m2), x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(q.iter()) {
            let delta = x - *m;
            *m += delta / n;
            *m2 += (x - *m) * delta;
        }
    }

    fn sample_variance(&self) -> Vec<f64> {
        let n = self.count as f64;
        self.m2.iter().map(|x| x / (n - 1.0)).collect()
    }
}

/// Diagonal inverse metric adaptation over a schedule of expanding windows
///
/// Warmup is split into an initial buffer for step size tuning only, a series of doubling metric
/// estimation windows, and a terminal buffer for final step size tuning. Short warmups use a 15%/75%/10%
/// split in place of the default 75/25/50 iteration buffers.
///
pub struct MetricAdaptation {
    num_warmup: usize,
    init_buffer: usize,
    term_buffer: usize,
    window_size: usize,
    next_window_end: usize,
    counter: usize,
    is_enabled: bool,
    estimator: WelfordVariance,
}

impl MetricAdaptation {
    pub fn new(dim: usize, num_warmup: usize) -> Self {
        let mut init_buffer = 75;
        let mut term_buffer = 50;
        let mut window_size = 25;

        // Too few iterations to estimate a metric
        let is_enabled = num_warmup >= 20;

        if is_enabled && init_buffer + window_size + term_buffer > num_warmup {
            init_buffer = (0.15 * num_warmup as f64) as usize;
            term_buffer = (0.1 * num_warmup as f64) as usize;
            window_size = num_warmup - (init_buffer + term_buffer);
        }

        Self {
            num_warmup,
            init_buffer,
            term_buffer,
            window_size,
            next_window_end: init_buffer + window_size - 1,
            counter: 0,
            is_enabled,
            estimator: WelfordVariance::new(dim),
        }
    }

    fn is_in_window(&self) -> bool {
        self.counter >= self.init_buffer
            && self.counter < self.num_warmup - self.term_buffer
            && self.counter != self.num_warmup
    }

    fn is_window_end(&self) -> bool {
        self.counter == self.next_window_end && self.counter != self.num_warmup
    }

    fn compute_next_window(&mut self) {
        let last_window_end = self.num_warmup - self.term_buffer - 1;
        if self.next_window_end == last_window_end {
            return;
        }
        self.window_size *= 2;
        self.next_window_end = self.counter + self.window_size;

        if self.next_window_end != last_window_end {
            // Stretch the next window if the one after it would not fit
            let next_window_boundary = self.next_window_end + 2 * self.window_size;
            if next_window_boundary >= self.num_warmup - self.term_buffer {
                self.next_window_end = last_window_end;
            }
        }
    }

    /// Add one warmup draw to the metric estimate
    ///
    /// Returns true when a window ends and `inv_metric` has been updated
    ///
    pub fn learn_inv_metric(&mut self, inv_metric: &mut [f64], q: &[f64]) -> bool {
        if !self.is_enabled {
            return false;
        }

        if self.is_in_window() {
            self.estimator.add_sample(q);
        }

        if self.is_window_end() {
            self.compute_next_window();

            let n = self.estimator.count as f64;
            for (x, var) in inv_metric
                .iter_mut()
                .zip(self.estimator.sample_variance())
            {
                // Regularize toward a unit metric
                *x = (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0));
            }
            self.estimator.restart();

            self.counter += 1;
            return true;
        }

        self.counter += 1;
        false
    }
}
