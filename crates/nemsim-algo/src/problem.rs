//! Owned intermediate representation of one interval's optimization problem.
//!
//! Components never touch a solver handle. They push variables and constraints into a
//! [`ProblemBuilder`], which yields a [`DispatchProblem`] value; the backend translates
//! that value into solver calls exactly once per solve.
//!
//! ```text
//! minimise   c·x + c0
//! subject to a_k·x (≤ | ≥ | =) b_k      for every constraint k
//!            l_j ≤ x_j ≤ u_j             for every variable j
//!            x_j ∈ {0, 1}                for binary variables
//! ```

use serde::{Deserialize, Serialize};

/// Index of a variable inside one [`DispatchProblem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(usize);

impl VarId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub kind: VarKind,
}

/// Affine expression `Σ coef·var + constant`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            self.terms.push((var, coefficient));
        }
    }

    pub fn add_expr(&mut self, other: &LinearExpr, scale: f64) {
        for (var, coefficient) in &other.terms {
            self.add_term(*var, coefficient * scale);
        }
        self.constant += other.constant * scale;
    }

    pub fn sum(vars: impl IntoIterator<Item = VarId>) -> Self {
        let mut expr = Self::new();
        for var in vars {
            expr.add_term(var, 1.0);
        }
        expr
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, c)| c * values.get(var.0).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl ConstraintDef {
    /// Signed amount by which `values` violate the constraint (0 when satisfied).
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }
}

/// A fully assembled problem, minimised by convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchProblem {
    variables: Vec<VariableDef>,
    constraints: Vec<ConstraintDef>,
    objective: LinearExpr,
}

impl DispatchProblem {
    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn variable(&self, id: VarId) -> Option<&VariableDef> {
        self.variables.get(id.0)
    }

    pub fn constraints(&self) -> &[ConstraintDef] {
        &self.constraints
    }

    pub fn constraint(&self, name: &str) -> Option<&ConstraintDef> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn has_integers(&self) -> bool {
        self.variables.iter().any(|v| v.kind == VarKind::Binary)
    }

    /// Names of constraints or bounds violated by more than `tolerance`.
    pub fn violations(&self, values: &[f64], tolerance: f64) -> Vec<String> {
        let mut violated = Vec::new();
        for (def, value) in self.variables.iter().zip(values) {
            if *value < def.lower - tolerance || *value > def.upper + tolerance {
                violated.push(def.name.clone());
            }
        }
        for constraint in &self.constraints {
            if constraint.violation(values) > tolerance {
                violated.push(constraint.name.clone());
            }
        }
        violated
    }
}

/// Accumulates variables, constraints and objective terms into an owned problem.
#[derive(Debug, Default)]
pub struct ProblemBuilder {
    problem: DispatchProblem,
}

impl ProblemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuous variable on `[lower, upper]`; infinite bounds are allowed.
    pub fn add_variable(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.push_variable(name.into(), lower, upper, VarKind::Continuous)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.push_variable(name.into(), 0.0, 1.0, VarKind::Binary)
    }

    fn push_variable(&mut self, name: String, lower: f64, upper: f64, kind: VarKind) -> VarId {
        let id = VarId(self.problem.variables.len());
        self.problem.variables.push(VariableDef {
            name,
            lower,
            upper,
            kind,
        });
        id
    }

    /// Add `expr (sense) rhs`. The expression's constant is moved to the right-hand side.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        mut expr: LinearExpr,
        sense: Sense,
        rhs: f64,
    ) {
        let rhs = rhs - expr.constant;
        expr.constant = 0.0;
        self.problem.constraints.push(ConstraintDef {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
    }

    pub fn add_objective_term(&mut self, var: VarId, coefficient: f64) {
        self.problem.objective.add_term(var, coefficient);
    }

    pub fn add_objective_constant(&mut self, value: f64) {
        self.problem.objective.constant += value;
    }

    pub fn num_variables(&self) -> usize {
        self.problem.variables.len()
    }

    pub fn build(self) -> DispatchProblem {
        self.problem
    }
}

/// Primal values returned by a backend, indexed like the problem's variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimalSolution {
    values: Vec<f64>,
    objective: f64,
}

impl PrimalSolution {
    pub fn new(values: Vec<f64>, objective: f64) -> Self {
        Self { values, objective }
    }

    #[inline]
    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var.0).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn evaluate(&self, expr: &LinearExpr) -> f64 {
        expr.evaluate(&self.values)
    }
}
