use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use burn::tensor::{backend::Backend, Tensor};
use tracing::{debug, info};

use crate::constraint::{Expr, LossTerm};
use crate::data::DataDict;
use crate::error::{DpcError, DpcResult};
use crate::modules::Component;
use crate::utils::constant;

const LOSS_KEY: &str = "loss";
const OWNER: &str = "problem";

/// Ordered components feeding a weighted sum of objectives and constraints.
///
/// One [`DataDict`] is threaded through every component in order, each adding
/// its declared outputs. The objectives and then the constraints are evaluated
/// against the result; their unweighted values land in the dictionary under
/// their names and the weighted total under `loss`.
pub struct Problem<B: Backend> {
    components: Vec<Box<dyn Component<B>>>,
    objectives: Vec<Box<dyn LossTerm<B>>>,
    constraints: Vec<Box<dyn LossTerm<B>>>,
}

impl<B: Backend> Problem<B> {
    pub fn new(
        objectives: Vec<Box<dyn LossTerm<B>>>,
        constraints: Vec<Box<dyn LossTerm<B>>>,
        components: Vec<Box<dyn Component<B>>>,
    ) -> DpcResult<Self> {
        let mut problem = Self {
            components,
            objectives,
            constraints,
        };
        problem.validate()?;
        problem.link()?;

        info!(
            components = problem.components.len(),
            objectives = problem.objectives.len(),
            constraints = problem.constraints.len(),
            "built problem"
        );
        Ok(problem)
    }

    fn terms(&self) -> impl Iterator<Item = &Box<dyn LossTerm<B>>> {
        self.objectives.iter().chain(self.constraints.iter())
    }

    fn validate(&self) -> DpcResult<()> {
        let mut names = BTreeSet::new();
        for term in self.terms() {
            let name = term.name();
            if name == LOSS_KEY {
                return Err(DpcError::Config(format!(
                    "`{LOSS_KEY}` is reserved for the total loss"
                )));
            }
            if !names.insert(name.to_string()) {
                return Err(DpcError::DuplicateName(name.to_string()));
            }
            let weight = term.weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(DpcError::Config(format!(
                    "{name}: weight must be finite and nonnegative, got {weight}"
                )));
            }
        }

        let mut component_names = BTreeSet::new();
        let mut produced = BTreeSet::new();
        for component in self.components.iter() {
            if !component_names.insert(component.name()) {
                return Err(DpcError::DuplicateName(component.name().to_string()));
            }
            for key in component.output_keys() {
                if names.contains(key) || key == LOSS_KEY || !produced.insert(key.as_str()) {
                    return Err(DpcError::collision(component.name(), key));
                }
            }
        }
        Ok(())
    }

    /// Inline earlier term definitions into later gradient nodes.
    fn link(&mut self) -> DpcResult<()> {
        let mut defs: BTreeMap<String, Expr> = BTreeMap::new();
        for term in self.objectives.iter_mut().chain(self.constraints.iter_mut()) {
            term.link(&defs)?;
            if let Some(expr) = term.expression() {
                defs.insert(term.name().to_string(), expr.substitute(&defs));
            }
        }
        Ok(())
    }

    pub fn components(&self) -> &[Box<dyn Component<B>>] {
        &self.components
    }

    pub fn objectives(&self) -> &[Box<dyn LossTerm<B>>] {
        &self.objectives
    }

    pub fn constraints(&self) -> &[Box<dyn LossTerm<B>>] {
        &self.constraints
    }

    /// Run every component in order, merging its outputs into `data`.
    pub fn step(&self, mut data: DataDict<B>) -> DpcResult<DataDict<B>> {
        for component in self.components.iter() {
            let name = component.name();
            component.interface().check_inputs(&data)?;

            let out = component.forward(&data)?;
            component.interface().check_outputs(&out)?;
            debug!(component = name, outputs = out.len(), "component step");
            data.merge(name, out)?;
        }
        Ok(data)
    }

    /// Evaluate objectives then constraints, storing each value under its
    /// name and the weighted sum under `loss`.
    pub fn calculate_loss(&self, mut data: DataDict<B>) -> DpcResult<DataDict<B>> {
        let mut total: Option<Tensor<B, 3>> = None;
        for term in self.terms() {
            let value = term.evaluate(&data)?;
            let weighted = value.clone() * term.weight();
            debug!(term = term.name(), weight = term.weight(), "loss term");

            total = Some(match total {
                Some(total) => total + weighted,
                None => weighted,
            });
            data.insert(OWNER, term.name(), value)?;
        }

        let total = match total {
            Some(total) => total,
            None => constant(0.0, &data.device()),
        };
        data.insert(OWNER, LOSS_KEY, total)?;
        Ok(data)
    }

    /// Step and loss, with every key prefixed by the batch name tag.
    pub fn forward(&self, data: DataDict<B>) -> DpcResult<DataDict<B>> {
        let data = self.step(data)?;
        let data = self.calculate_loss(data)?;
        Ok(data.prefixed())
    }

    /// Sum of the components' regularization errors.
    pub fn reg_error(&self) -> Tensor<B, 3> {
        self.components
            .iter()
            .map(|component| component.reg_error())
            .reduce(|a, b| a + b)
            .unwrap_or_else(|| constant(0.0, &Default::default()))
    }

    /// Check, without running anything, that a batch holding `input_keys`
    /// flows through the problem: every component and term only reads keys
    /// available before it, and nothing overwrites an existing key.
    pub fn check_dataflow(&self, input_keys: &[&str]) -> DpcResult<()> {
        let mut available: BTreeSet<String> = input_keys.iter().map(|k| k.to_string()).collect();

        for component in self.components.iter() {
            let name = component.name();
            if let Some(key) = component.input_keys().iter().find(|k| !available.contains(*k)) {
                return Err(DpcError::missing_key(name, key));
            }
            for key in component.output_keys() {
                if !available.insert(key.clone()) {
                    return Err(DpcError::collision(name, key));
                }
            }
        }

        for term in self.terms() {
            let name = term.name();
            if let Some(key) = term.input_keys().iter().find(|k| !available.contains(*k)) {
                return Err(DpcError::missing_key(name, key));
            }
            if !available.insert(name.to_string()) {
                return Err(DpcError::collision(name, name));
            }
        }

        if available.contains(LOSS_KEY) {
            return Err(DpcError::collision(OWNER, LOSS_KEY));
        }
        Ok(())
    }
}

impl<B: Backend> fmt::Display for Problem<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Problem")?;
        writeln!(f, "  components:")?;
        for component in self.components.iter() {
            writeln!(
                f,
                "    {}: [{}] -> [{}]",
                component.name(),
                component.input_keys().join(", "),
                component.output_keys().join(", ")
            )?;
        }
        writeln!(f, "  constraints:")?;
        for term in self.constraints.iter() {
            writeln!(f, "    {} (weight {})", term.name(), term.weight())?;
        }
        writeln!(f, "  objectives:")?;
        for term in self.objectives.iter() {
            writeln!(f, "    {} (weight {})", term.name(), term.weight())?;
        }
        Ok(())
    }
}

/// Collects components and terms in order, then validates them into a [`Problem`].
pub struct ProblemBuilder<B: Backend> {
    components: Vec<Box<dyn Component<B>>>,
    objectives: Vec<Box<dyn LossTerm<B>>>,
    constraints: Vec<Box<dyn LossTerm<B>>>,
}

impl<B: Backend> Default for ProblemBuilder<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ProblemBuilder<B> {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            objectives: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn component(mut self, component: impl Component<B> + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    pub fn objective(mut self, term: impl LossTerm<B> + 'static) -> Self {
        self.objectives.push(Box::new(term));
        self
    }

    pub fn constraint(mut self, term: impl LossTerm<B> + 'static) -> Self {
        self.constraints.push(Box::new(term));
        self
    }

    pub fn build(self) -> DpcResult<Problem<B>> {
        Problem::new(self.objectives, self.constraints, self.components)
    }
}
