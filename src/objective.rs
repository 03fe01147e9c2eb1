//! Weighted sums of objective terms with explicit algorithm roles.
//!
//! An [`Objective`] is `sum_i w_i f_i(K_i x)` kept as a flat, tagged list
//! rather than as a nested composite function. The [`Role`] of each term
//! says how an algorithm may touch it: through its gradient, through its
//! proximal map, or through the proximal map of its convex conjugate. Role
//! eligibility is checked once, when an algorithm is built.

use std::fmt;
use std::sync::Arc;

use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};
use crate::functions::{Function, ScaledFunction};
use crate::operators::{IdentityOperator, Operator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Differentiable data term or regulariser, used via its gradient.
    Smooth,
    /// Simple term used via its proximal map; at most one per objective.
    Proximable,
    /// `f(K x)` handled through the conjugate of `f` by primal-dual methods;
    /// at most one per objective.
    Dual,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Smooth => "smooth",
            Role::Proximable => "proximable",
            Role::Dual => "dual",
        };
        f.write_str(s)
    }
}

/// One weighted summand `w f(K x)`.
#[derive(Clone, Debug)]
pub struct Term {
    function: Arc<dyn Function>,
    operator: Option<Arc<dyn Operator>>,
    weight: f64,
    role: Role,
}

impl Term {
    pub fn new(function: Arc<dyn Function>, role: Role) -> Self {
        Self {
            function,
            operator: None,
            weight: 1.0,
            role,
        }
    }

    pub fn smooth(function: Arc<dyn Function>) -> Self {
        Self::new(function, Role::Smooth)
    }

    pub fn proximable(function: Arc<dyn Function>) -> Self {
        Self::new(function, Role::Proximable)
    }

    pub fn dual(function: Arc<dyn Function>, operator: Arc<dyn Operator>) -> Self {
        Self::new(function, Role::Dual).with_operator(operator)
    }

    pub fn with_operator(self, operator: Arc<dyn Operator>) -> Self {
        Self {
            operator: Some(operator),
            ..self
        }
    }

    pub fn with_weight(self, weight: f64) -> Self {
        Self { weight, ..self }
    }

    pub fn function(&self) -> &Arc<dyn Function> {
        &self.function
    }

    pub fn operator(&self) -> Option<&Arc<dyn Operator>> {
        self.operator.as_ref()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// `K`, or the identity on `domain` when the term has no operator.
    pub fn operator_or_identity(&self, domain: &Geometry) -> Arc<dyn Operator> {
        match &self.operator {
            Some(op) => op.clone(),
            None => Arc::new(IdentityOperator::new(domain.clone())),
        }
    }

    /// `w f` as a single function.
    pub fn weighted_function(&self) -> Result<Arc<dyn Function>> {
        if self.weight == 1.0 {
            Ok(self.function.clone())
        } else {
            Ok(Arc::new(ScaledFunction::new(self.function.clone(), self.weight)?))
        }
    }

    fn inner_point(&self, x: &DataArray) -> Result<Option<DataArray>> {
        self.operator.as_ref().map(|op| op.apply(x)).transpose()
    }

    /// `w f(K x)`. A zero weight still reports `+inf` where `f` does, so
    /// indicator terms keep their feasibility meaning.
    pub fn value(&self, x: &DataArray) -> Result<f64> {
        let v = match self.inner_point(x)? {
            Some(kx) => self.function.value(&kx)?,
            None => self.function.value(x)?,
        };
        if self.weight == 0.0 {
            return Ok(if v == f64::INFINITY { v } else { 0.0 });
        }
        Ok(self.weight * v)
    }

    /// `w K*(grad f)(K x)`, using the Jacobian adjoint for nonlinear `K`.
    pub fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        match &self.operator {
            Some(op) => {
                let kx = op.apply(x)?;
                let g = self.function.gradient(&kx)?;
                Ok(op.jacobian_adjoint(x, &g)?.scaled(self.weight))
            }
            None => Ok(self.function.gradient(x)?.scaled(self.weight)),
        }
    }

    /// `w L_f ||K||^2`, `None` when any factor is unknown.
    pub fn lipschitz(&self) -> Option<f64> {
        let l = self.function.lipschitz()?;
        let k = match &self.operator {
            Some(op) if op.is_linear() => op.norm().ok()?,
            Some(_) => return None,
            None => 1.0,
        };
        Some(self.weight * l * k * k)
    }

    fn validate(&self, domain: &Geometry) -> Result<()> {
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(ReconError::config(format!(
                "weight of {} term {} must be finite and non-negative, got {}",
                self.role,
                self.function.name(),
                self.weight
            )));
        }
        match &self.operator {
            Some(op) => {
                op.domain().ensure_matches(domain, "Objective: term operator domain")?;
                if let Some(fd) = self.function.domain() {
                    op.range()
                        .ensure_matches(fd, "Objective: function domain vs operator range")?;
                }
            }
            None => {
                if let Some(fd) = self.function.domain() {
                    fd.ensure_matches(domain, "Objective: function domain")?;
                }
            }
        }
        match self.role {
            Role::Smooth if !self.function.is_differentiable() => Err(ReconError::NotDifferentiable {
                function: self.function.name().to_string(),
            }),
            Role::Proximable if self.operator.is_some() => Err(ReconError::config(format!(
                "proximable term {} cannot carry an operator, use the dual role",
                self.function.name()
            ))),
            _ => Ok(()),
        }
    }
}

/// `sum_i w_i f_i(K_i x)` over a fixed domain geometry.
#[derive(Clone, Debug)]
pub struct Objective {
    domain: Geometry,
    terms: Vec<Term>,
}

impl Objective {
    pub fn new(domain: Geometry) -> Self {
        Self {
            domain,
            terms: Vec::new(),
        }
    }

    /// Validated insertion: weights, geometries and the single-term roles.
    pub fn with_term(mut self, term: Term) -> Result<Self> {
        term.validate(&self.domain)?;
        if matches!(term.role, Role::Proximable | Role::Dual)
            && self.terms.iter().any(|t| t.role == term.role)
        {
            return Err(ReconError::config(format!(
                "an objective holds at most one {} term",
                term.role
            )));
        }
        self.terms.push(term);
        Ok(self)
    }

    pub fn smooth(self, function: Arc<dyn Function>) -> Result<Self> {
        self.with_term(Term::smooth(function))
    }

    pub fn proximable(self, function: Arc<dyn Function>) -> Result<Self> {
        self.with_term(Term::proximable(function))
    }

    pub fn dual(self, function: Arc<dyn Function>, operator: Arc<dyn Operator>) -> Result<Self> {
        self.with_term(Term::dual(function, operator))
    }

    pub fn domain(&self) -> &Geometry {
        &self.domain
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn smooth_terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter().filter(|t| t.role == Role::Smooth)
    }

    pub fn proximable_term(&self) -> Option<&Term> {
        self.terms.iter().find(|t| t.role == Role::Proximable)
    }

    pub fn dual_term(&self) -> Option<&Term> {
        self.terms.iter().find(|t| t.role == Role::Dual)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.terms.iter().any(|t| t.role == role)
    }

    /// Full objective value; may be `+inf` when a constraint is violated.
    pub fn value(&self, x: &DataArray) -> Result<f64> {
        x.ensure_geometry(&self.domain, "Objective::value")?;
        let mut total = 0.0;
        for t in &self.terms {
            total += t.value(x)?;
        }
        Ok(total)
    }

    /// Gradient of the whole objective; every term must be smooth.
    pub fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        if let Some(t) = self.terms.iter().find(|t| t.role != Role::Smooth) {
            return Err(ReconError::NotDifferentiable {
                function: format!("objective ({} term {})", t.role, t.function.name()),
            });
        }
        self.smooth_gradient(x)
    }

    pub fn smooth_value(&self, x: &DataArray) -> Result<f64> {
        x.ensure_geometry(&self.domain, "Objective::smooth_value")?;
        let mut total = 0.0;
        for t in self.smooth_terms() {
            total += t.value(x)?;
        }
        Ok(total)
    }

    /// Sum of the gradients of the smooth terms only.
    pub fn smooth_gradient(&self, x: &DataArray) -> Result<DataArray> {
        x.ensure_geometry(&self.domain, "Objective::smooth_gradient")?;
        let mut acc = DataArray::zeros(&self.domain);
        for t in self.smooth_terms() {
            acc.add_scaled(1.0, &t.gradient(x)?)?;
        }
        Ok(acc)
    }

    /// Lipschitz bound `sum_i w_i L_i ||K_i||^2` of the smooth part.
    pub fn smooth_lipschitz(&self) -> Option<f64> {
        self.smooth_terms().map(Term::lipschitz).sum()
    }

    /// Proximal map of the designated proximable term, `prox_{step w g}`.
    pub fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        let term = self.proximable_term().ok_or_else(|| ReconError::NotProximable {
            function: "objective without a proximable term".to_string(),
        })?;
        if term.weight == 0.0 {
            crate::functions::check_step(step)?;
            return Ok(x.clone());
        }
        term.function.proximal(x, term.weight * step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::AxisLabel;
    use crate::functions::{IndicatorBox, L1Norm, L2NormSquared, LeastSquares};
    use crate::operators::{GradientOperator, MatrixOperator};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn line(n: usize) -> Geometry {
        Geometry::vector(AxisLabel::Horizontal, n).unwrap()
    }

    fn least_squares(b: Vec<f64>) -> Arc<dyn Function> {
        let g = line(b.len());
        let b = DataArray::from_vec(g.clone(), b).unwrap();
        Arc::new(LeastSquares::new(Arc::new(IdentityOperator::new(g)), b).unwrap())
    }

    #[test]
    fn value_sums_weighted_terms() {
        let g = line(2);
        let obj = Objective::new(g.clone())
            .smooth(least_squares(vec![1.0, 1.0]))
            .unwrap()
            .with_term(Term::proximable(Arc::new(L1Norm::new(1.0).unwrap())).with_weight(3.0))
            .unwrap();
        let x = DataArray::from_vec(g, vec![1.0, -2.0]).unwrap();
        // 0.5 * (0 + 9) + 3 * 3
        assert_abs_diff_eq!(obj.value(&x).unwrap(), 13.5);
        assert_abs_diff_eq!(obj.smooth_value(&x).unwrap(), 4.5);
    }

    #[test]
    fn gradient_requires_every_term_smooth() {
        let g = line(2);
        let obj = Objective::new(g.clone())
            .smooth(least_squares(vec![1.0, 1.0]))
            .unwrap()
            .proximable(Arc::new(L1Norm::new(1.0).unwrap()))
            .unwrap();
        let x = DataArray::zeros(&g);
        assert!(matches!(obj.gradient(&x), Err(ReconError::NotDifferentiable { .. })));
        assert_eq!(obj.smooth_gradient(&x).unwrap().to_vec(), vec![-1.0, -1.0]);
    }

    #[test]
    fn non_smooth_function_cannot_take_the_smooth_role() {
        let obj = Objective::new(line(2)).smooth(Arc::new(L1Norm::new(1.0).unwrap()));
        assert!(matches!(obj, Err(ReconError::NotDifferentiable { .. })));
    }

    #[test]
    fn only_one_proximable_term() {
        let obj = Objective::new(line(2))
            .proximable(Arc::new(L1Norm::new(1.0).unwrap()))
            .unwrap()
            .proximable(Arc::new(L1Norm::new(2.0).unwrap()));
        assert!(matches!(obj, Err(ReconError::InvalidConfiguration(_))));
    }

    #[test]
    fn proximal_uses_the_weighted_step() {
        let g = line(3);
        let obj = Objective::new(g.clone())
            .with_term(Term::proximable(Arc::new(L1Norm::new(1.0).unwrap())).with_weight(2.0))
            .unwrap();
        let x = DataArray::from_vec(g, vec![5.0, -1.0, 0.5]).unwrap();
        assert_eq!(obj.proximal(&x, 1.0).unwrap().to_vec(), vec![3.0, 0.0, 0.0]);
    }

    #[test]
    fn proximal_without_a_proximable_term_is_refused() {
        let g = line(1);
        let obj = Objective::new(g.clone()).smooth(least_squares(vec![1.0])).unwrap();
        assert!(matches!(
            obj.proximal(&DataArray::zeros(&g), 1.0),
            Err(ReconError::NotProximable { .. })
        ));
    }

    #[test]
    fn operator_geometry_is_checked() {
        let a = MatrixOperator::from_matrix(array![[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]).unwrap();
        let wrong = line(3);
        let term = Term::smooth(Arc::new(L2NormSquared::new(1.0).unwrap())).with_operator(Arc::new(a));
        assert!(matches!(
            Objective::new(wrong).with_term(term),
            Err(ReconError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn zero_weighted_indicator_still_reports_infeasibility() {
        let g = line(2);
        let obj = Objective::new(g.clone())
            .with_term(Term::proximable(Arc::new(IndicatorBox::non_negative())).with_weight(0.0))
            .unwrap()
            .smooth(least_squares(vec![1.0, 1.0]))
            .unwrap();
        let feasible = DataArray::from_vec(g.clone(), vec![1.0, 2.0]).unwrap();
        let infeasible = DataArray::from_vec(g, vec![1.0, -2.0]).unwrap();
        assert_abs_diff_eq!(obj.value(&feasible).unwrap(), 0.5);
        assert_eq!(obj.value(&infeasible).unwrap(), f64::INFINITY);
    }

    #[test]
    fn lipschitz_of_the_smooth_part() {
        let g = Geometry::new([(AxisLabel::HorizontalY, 3), (AxisLabel::HorizontalX, 3)]).unwrap();
        let grad = GradientOperator::new(g.clone()).unwrap();
        let k = grad.norm().unwrap();
        let obj = Objective::new(g)
            .with_term(
                Term::smooth(Arc::new(L2NormSquared::new(1.0).unwrap()))
                    .with_operator(Arc::new(grad))
                    .with_weight(0.5),
            )
            .unwrap();
        assert_abs_diff_eq!(obj.smooth_lipschitz().unwrap(), 0.5 * 2.0 * k * k, epsilon = 1e-12);
    }
}
