use log::{debug, info};

use super::{Algorithm, ArmijoBacktracking, Preconditioner, SolverOptions, StepSize};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::objective::{Objective, Role};

/// Gradient descent `x <- x - a P grad F(x)` on a fully smooth objective.
///
/// With `StepSize::Auto` the step is `1/L` from the objective's Lipschitz
/// estimate; without one the step starts at 1 and Armijo backtracking is
/// switched on.
#[derive(Debug)]
pub struct GradientDescent {
    objective: Objective,
    x: DataArray,
    step: f64,
    last_step: f64,
    line_search: Option<ArmijoBacktracking>,
    preconditioner: Option<Preconditioner>,
    options: SolverOptions,
}

impl GradientDescent {
    pub fn new(objective: Objective, x0: DataArray, options: &SolverOptions) -> Result<Self> {
        options.validate()?;
        options.reject_acceleration("GradientDescent")?;
        x0.ensure_geometry(objective.domain(), "GradientDescent initial iterate")?;
        if let Some(t) = objective.terms().iter().find(|t| t.role() != Role::Smooth) {
            return Err(ReconError::NotDifferentiable {
                function: format!("{} ({} term)", t.function().name(), t.role()),
            });
        }

        let (step, line_search) = match options.initial_step {
            StepSize::Fixed(s) => (s, None),
            StepSize::Auto => match objective.smooth_lipschitz() {
                Some(l) if l > 0.0 => (1.0 / l, None),
                Some(_) => (1.0, None),
                None => {
                    info!("GradientDescent: no Lipschitz estimate, using Armijo backtracking");
                    (1.0, Some(ArmijoBacktracking::default()))
                }
            },
        };
        info!("GradientDescent configured with step {step:.6e}");
        Ok(Self {
            objective,
            x: x0,
            step,
            last_step: step,
            line_search,
            preconditioner: None,
            options: *options,
        })
    }

    pub fn with_armijo(self, armijo: ArmijoBacktracking) -> Self {
        Self {
            line_search: Some(armijo),
            ..self
        }
    }

    pub fn with_preconditioner(self, preconditioner: Preconditioner) -> Result<Self> {
        preconditioner
            .values()
            .ensure_geometry(self.objective.domain(), "GradientDescent preconditioner")?;
        Ok(Self {
            preconditioner: Some(preconditioner),
            ..self
        })
    }

    /// Initial (or fixed) step size.
    pub fn step_size(&self) -> f64 {
        self.step
    }

    /// Step actually taken in the latest iteration.
    pub fn last_step(&self) -> f64 {
        self.last_step
    }

    pub fn objective_function(&self) -> &Objective {
        &self.objective
    }
}

impl Algorithm for GradientDescent {
    fn name(&self) -> &'static str {
        "gd"
    }

    fn update(&mut self) -> Result<()> {
        let gradient = self.objective.gradient(&self.x)?;
        let direction = match &self.preconditioner {
            Some(p) => p.apply(&gradient)?,
            None => gradient.clone(),
        };

        let alpha = match &self.line_search {
            None => self.step,
            Some(armijo) => {
                // directional derivative along -direction
                let dphi0 = -gradient.dot(&direction)?;
                if dphi0 >= 0.0 {
                    debug!("GradientDescent: stationary point, no descent direction");
                    self.last_step = 0.0;
                    return Ok(());
                }
                let cost0 = self.objective.value(&self.x)?;
                let (objective, x) = (&self.objective, &self.x);
                armijo.search(self.step, cost0, dphi0, &mut |a| {
                    let trial = x.sapyb(1.0, &direction, -a)?;
                    let cost = objective.value(&trial)?;
                    Ok(cost.is_finite().then_some(cost))
                })?
            }
        };
        self.x.add_scaled(-alpha, &direction)?;
        self.last_step = alpha;
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    fn objective(&self) -> Result<f64> {
        self.objective.value(&self.x)
    }

    fn built_with(&self) -> Option<&SolverOptions> {
        Some(&self.options)
    }
}
