use super::system::System;
use crate::core::forcefield::term::{ComponentValue, Expression, Symbol};
use crate::error::{Error, Result};
use slotmap::{SlotMap, new_key_type};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

new_key_type! {
    pub struct ConstraintId;
}

/// A condition a [`System`] is kept in after every committed change.
///
/// Constraints get the system by mutable reference so they can read energies
/// and repair it through its ordinary (transactional) API.
pub trait Constraint: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn is_satisfied(&self, system: &mut System) -> Result<bool>;

    /// Edits `system` towards satisfying the constraint. Returns whether
    /// anything changed.
    fn apply(&self, system: &mut System) -> Result<bool>;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Default)]
pub struct Constraints {
    items: SlotMap<ConstraintId, Arc<dyn Constraint>>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add(&mut self, constraint: impl Constraint) -> ConstraintId {
        self.items.insert(Arc::new(constraint))
    }

    pub fn add_shared(&mut self, constraint: Arc<dyn Constraint>) -> ConstraintId {
        self.items.insert(constraint)
    }

    pub fn remove(&mut self, id: ConstraintId) -> Result<Arc<dyn Constraint>> {
        self.items.remove(id).ok_or_else(|| missing_constraint(id))
    }

    pub fn get(&self, id: ConstraintId) -> Result<&dyn Constraint> {
        self.items
            .get(id)
            .map(|c| c.as_ref())
            .ok_or_else(|| missing_constraint(id))
    }

    pub fn get_as<C: Constraint>(&self, id: ConstraintId) -> Result<&C> {
        let constraint = self.get(id)?;
        constraint
            .as_any()
            .downcast_ref::<C>()
            .ok_or_else(|| Error::InvalidCast {
                from: format!("constraint '{}'", constraint.name()),
                to: std::any::type_name::<C>().to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstraintId, &Arc<dyn Constraint>)> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.values().map(|c| c.name()).collect()
    }

    pub(crate) fn shared(&self) -> Vec<Arc<dyn Constraint>> {
        self.items.values().cloned().collect()
    }
}

impl<C: Constraint> FromIterator<C> for Constraints {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut constraints = Constraints::new();
        for constraint in iter {
            constraints.add(constraint);
        }
        constraints
    }
}

fn missing_constraint(id: ConstraintId) -> Error {
    Error::MissingConstraint(format!("no constraint with id {id:?}"))
}

pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Keeps a user component equal to the value of an expression over other
/// components, e.g. a coupling parameter tied to a weighted energy.
#[derive(Debug, Clone)]
pub struct ComponentConstraint {
    name: String,
    component: Symbol,
    expression: Expression,
    tolerance: f64,
}

impl ComponentConstraint {
    pub fn new(component: Symbol, expression: impl Into<Expression>) -> Self {
        Self {
            name: format!("{component} constraint"),
            component,
            expression: expression.into(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn component(&self) -> &Symbol {
        &self.component
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    fn target(&self, system: &mut System) -> Result<f64> {
        self.expression.evaluate(|s| system.energy_of(s))
    }
}

impl Constraint for ComponentConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied(&self, system: &mut System) -> Result<bool> {
        let current = match system.energy_of(&self.component) {
            Ok(value) => value,
            Err(Error::MissingComponent(symbol)) if symbol == self.component => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok((current - self.target(system)?).abs() <= self.tolerance)
    }

    fn apply(&self, system: &mut System) -> Result<bool> {
        let target = self.target(system)?;
        system.set_component(self.component.clone(), ComponentValue::Constant(target))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Always;

    impl Constraint for Always {
        fn name(&self) -> &str {
            "always"
        }
        fn is_satisfied(&self, _: &mut System) -> Result<bool> {
            Ok(true)
        }
        fn apply(&self, _: &mut System) -> Result<bool> {
            Ok(false)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn removed_constraint_ids_are_not_reused() {
        let mut constraints = Constraints::new();
        let a = constraints.add(Always);
        constraints.remove(a).unwrap();
        let b = constraints.add(Always);
        assert_ne!(a, b);
        assert!(matches!(constraints.get(a), Err(Error::MissingConstraint(_))));
        assert!(matches!(constraints.remove(a), Err(Error::MissingConstraint(_))));
        assert_eq!(constraints.names(), vec!["always"]);
    }

    #[test]
    fn get_as_reports_wrong_type() {
        let mut constraints = Constraints::new();
        let id = constraints.add(Always);
        assert!(constraints.get_as::<Always>(id).is_ok());
        assert!(matches!(
            constraints.get_as::<ComponentConstraint>(id),
            Err(Error::InvalidCast { .. })
        ));
    }

    #[test]
    fn component_constraint_sets_the_component_to_its_target() {
        let mut system = System::named("s");
        let lambda = Symbol::new("lambda");
        system.set_component(Symbol::new("E_{x}"), 3.0).unwrap();
        let constraint = ComponentConstraint::new(lambda.clone(), Expression::from(Symbol::new("E_{x}")) * 2.0);

        assert!(!constraint.is_satisfied(&mut system).unwrap());
        assert!(constraint.apply(&mut system).unwrap());
        assert_eq!(system.energy_of(&lambda).unwrap(), 6.0);
        assert!(constraint.is_satisfied(&mut system).unwrap());
        assert!(!constraint.apply(&mut system).unwrap());
    }
}
