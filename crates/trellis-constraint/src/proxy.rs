//! Touch-relative constraints.
//!
//! A proxy constraint refers to "the nth active touch" instead of a concrete
//! target. The [`ProxyResolver`] keeps track of the active touches, creates
//! the per-touch position variables and their edit variables, and makes
//! proxy constraints concrete exactly while the number of active touches
//! matches the number of distinct proxies they reference.
//!
//! The resolver never talks to the solver directly. Every effect goes
//! through a [`ProxyDelegate`]; [`SolverBinding`] is the delegate that
//! forwards to a [`Solver`].

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};
use trellis_core::{Constraint, Property, SolverError, Strength, Target, TouchId, Variable};

use crate::cassowary::Solver;
use crate::config::SolverConfig;

/// Position of a touch as reported by the input system.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchPoint {
    pub id: TouchId,
    pub x: f64,
    pub y: f64,
}

impl TouchPoint {
    pub fn new(id: u64, x: f64, y: f64) -> Self {
        Self {
            id: TouchId(id),
            x,
            y,
        }
    }
}

/// What happened to an edit variable.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EditVariableChange {
    Added(Strength),
    Suggested(f64),
    Removed,
}

/// Receiver of everything the resolver wants done.
pub trait ProxyDelegate {
    fn on_constraints_added(&mut self, constraints: &[Constraint]);

    fn on_constraints_removed(&mut self, constraints: &[Constraint]);

    fn on_edit_variable_changed(&mut self, variable: &Variable, change: EditVariableChange);

    /// Current value of a variable, sampled when a constant term is folded.
    fn resolve_constant(&mut self, variable: &Variable) -> f64;
}

#[derive(Debug, Clone, Copy)]
struct ActiveTouch {
    position: (f64, f64),
}

/// Tracks active touches and applies proxy constraints when they fit.
#[derive(Debug, Default)]
pub struct ProxyResolver {
    config: SolverConfig,
    /// Active touches in the order they began
    touches: IndexMap<TouchId, ActiveTouch>,
    /// Registered proxy constraints
    registered: IndexSet<Constraint>,
    /// Registered constraint -> its concrete form in the solver
    applied: IndexMap<Constraint, Constraint>,
}

impl ProxyResolver {
    pub fn new() -> Self {
        Self::with_config(SolverConfig::default())
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self {
            config,
            touches: IndexMap::new(),
            registered: IndexSet::new(),
            applied: IndexMap::new(),
        }
    }

    pub fn active_touch_count(&self) -> usize {
        self.touches.len()
    }

    /// Active touches, in the order they began.
    pub fn active_touches(&self) -> impl Iterator<Item = TouchPoint> + '_ {
        self.touches.iter().map(|(id, touch)| TouchPoint {
            id: *id,
            x: touch.position.0,
            y: touch.position.1,
        })
    }

    /// Concrete forms of the proxy constraints currently in the solver.
    pub fn applied_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.applied.values()
    }

    /// Whether a registered proxy constraint is currently applied.
    pub fn is_applied(&self, constraint: &Constraint) -> bool {
        self.applied.contains_key(constraint)
    }

    /// Add constraints to the layout.
    ///
    /// Proxy-free constraints are passed straight on. Proxy constraints are
    /// kept and applied as soon as the active touches match them.
    ///
    /// # Panics
    ///
    /// Panics if a proxy constraint is already registered.
    pub fn register_constraints(
        &mut self,
        constraints: Vec<Constraint>,
        delegate: &mut dyn ProxyDelegate,
    ) {
        let mut concrete = Vec::new();
        for constraint in constraints {
            if constraint.has_proxies() {
                let name = constraint.name.clone();
                assert!(
                    self.registered.insert(constraint),
                    "proxy constraint {name} registered twice"
                );
            } else {
                concrete.push(constraint);
            }
        }
        if !concrete.is_empty() {
            delegate.on_constraints_added(&concrete);
        }
        self.apply_satisfied(delegate);
    }

    /// Remove constraints from the layout.
    ///
    /// # Panics
    ///
    /// Panics if a proxy constraint was never registered.
    pub fn unregister_constraints(
        &mut self,
        constraints: &[Constraint],
        delegate: &mut dyn ProxyDelegate,
    ) {
        let mut removed = Vec::new();
        for constraint in constraints {
            if constraint.has_proxies() {
                assert!(
                    self.registered.shift_remove(constraint),
                    "proxy constraint {} is not registered",
                    constraint.name
                );
                if let Some(resolved) = self.applied.shift_remove(constraint) {
                    removed.push(resolved);
                }
            } else {
                removed.push(constraint.clone());
            }
        }
        if !removed.is_empty() {
            delegate.on_constraints_removed(&removed);
        }
    }

    /// Start tracking new touches.
    ///
    /// # Panics
    ///
    /// Panics if a touch is already active.
    pub fn begin_touches(&mut self, points: &[TouchPoint], delegate: &mut dyn ProxyDelegate) {
        if points.is_empty() {
            return;
        }
        // Applied constraints were resolved for the old touch count.
        self.retract_applied(delegate);

        for point in points {
            assert!(
                !self.touches.contains_key(&point.id),
                "touch {} began twice",
                point.id.0
            );
            self.touches.insert(
                point.id,
                ActiveTouch {
                    position: (point.x, point.y),
                },
            );
            for (property, value) in [(Property::PositionX, point.x), (Property::PositionY, point.y)] {
                let variable = Variable::touch(point.id, property);
                delegate.on_edit_variable_changed(
                    &variable,
                    EditVariableChange::Added(self.config.touch_strength),
                );
                delegate.on_edit_variable_changed(&variable, EditVariableChange::Suggested(value));
            }
        }
        debug!(
            began = points.len(),
            active = self.touches.len(),
            "touches began"
        );

        self.apply_satisfied(delegate);
    }

    /// Move active touches. Only suggests new positions.
    pub fn move_touches(&mut self, points: &[TouchPoint], delegate: &mut dyn ProxyDelegate) {
        for point in points {
            let Some(touch) = self.touches.get_mut(&point.id) else {
                debug!(touch = point.id.0, "ignoring move of inactive touch");
                continue;
            };
            touch.position = (point.x, point.y);
            for (property, value) in [(Property::PositionX, point.x), (Property::PositionY, point.y)] {
                delegate.on_edit_variable_changed(
                    &Variable::touch(point.id, property),
                    EditVariableChange::Suggested(value),
                );
            }
        }
    }

    /// Stop tracking touches that lifted.
    pub fn end_touches(&mut self, ids: &[TouchId], delegate: &mut dyn ProxyDelegate) {
        let ended = self.release_touches(ids, delegate);
        if ended > 0 {
            debug!(ended, active = self.touches.len(), "touches ended");
        }
    }

    /// Stop tracking touches the input system gave up on.
    pub fn cancel_touches(&mut self, ids: &[TouchId], delegate: &mut dyn ProxyDelegate) {
        let cancelled = self.release_touches(ids, delegate);
        if cancelled > 0 {
            debug!(cancelled, active = self.touches.len(), "touches cancelled");
        }
    }

    fn release_touches(&mut self, ids: &[TouchId], delegate: &mut dyn ProxyDelegate) -> usize {
        let ids: Vec<TouchId> = ids
            .iter()
            .copied()
            .filter(|id| self.touches.contains_key(id))
            .collect();
        if ids.is_empty() {
            return 0;
        }

        // Rows refer to the touch symbols until these are gone.
        self.retract_applied(delegate);

        for id in &ids {
            self.touches.shift_remove(id);
            for property in [Property::PositionX, Property::PositionY] {
                delegate.on_edit_variable_changed(
                    &Variable::touch(*id, property),
                    EditVariableChange::Removed,
                );
            }
        }

        self.apply_satisfied(delegate);
        ids.len()
    }

    /// Whether a proxy constraint fits the active touches: it names exactly
    /// as many distinct proxies as there are touches, all in range.
    fn is_satisfied(&self, constraint: &Constraint) -> bool {
        let proxies = constraint.expression.referenced_proxies();
        let count = self.touches.len();
        proxies.len() == count && proxies.iter().all(|index| (*index as usize) < count)
    }

    fn resolve(&self, constraint: &Constraint, delegate: &mut dyn ProxyDelegate) -> Constraint {
        let touches = &self.touches;
        constraint.resolve_proxies(
            |variable| match variable.target {
                Target::Proxy(index) => match touches.get_index(index as usize) {
                    Some((id, _)) => variable.with_target(Target::Touch(*id)),
                    None => *variable,
                },
                _ => *variable,
            },
            // Sampled on every application, so a re-applied constraint
            // starts from where things are now.
            |variable| delegate.resolve_constant(variable),
        )
    }

    fn retract_applied(&mut self, delegate: &mut dyn ProxyDelegate) {
        if self.applied.is_empty() {
            return;
        }
        let retracted: Vec<Constraint> = self.applied.drain(..).map(|(_, resolved)| resolved).collect();
        debug!(count = retracted.len(), "retracting proxy constraints");
        delegate.on_constraints_removed(&retracted);
    }

    fn apply_satisfied(&mut self, delegate: &mut dyn ProxyDelegate) {
        let mut activated = Vec::new();
        for constraint in &self.registered {
            if !self.applied.contains_key(constraint) && self.is_satisfied(constraint) {
                activated.push((constraint.clone(), self.resolve(constraint, delegate)));
            }
        }
        if activated.is_empty() {
            return;
        }

        let resolved: Vec<Constraint> = activated.iter().map(|(_, r)| r.clone()).collect();
        self.applied.extend(activated);
        debug!(count = resolved.len(), "applying proxy constraints");
        delegate.on_constraints_added(&resolved);
    }
}

/// A [`ProxyDelegate`] that forwards to a [`Solver`].
///
/// Constant terms are sampled from the solver when it knows the variable
/// and from `resolve` otherwise. Failures are logged and collected rather
/// than returned, since the resolver has no one to return them to.
pub struct SolverBinding<'a, F> {
    solver: &'a mut Solver,
    resolve: F,
    failures: Vec<SolverError>,
}

impl<'a, F> SolverBinding<'a, F>
where
    F: FnMut(&Variable) -> f64,
{
    pub fn new(solver: &'a mut Solver, resolve: F) -> Self {
        Self {
            solver,
            resolve,
            failures: Vec::new(),
        }
    }

    pub fn failures(&self) -> &[SolverError] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<SolverError> {
        std::mem::take(&mut self.failures)
    }

    fn record(&mut self, subject: &dyn std::fmt::Display, error: impl Into<SolverError>) {
        let error = error.into();
        warn!(%subject, %error, "solver rejected a change");
        self.failures.push(error);
    }
}

impl<'a, F> ProxyDelegate for SolverBinding<'a, F>
where
    F: FnMut(&Variable) -> f64,
{
    fn on_constraints_added(&mut self, constraints: &[Constraint]) {
        for constraint in constraints {
            if let Err(error) = self.solver.add_constraint(constraint.clone()) {
                self.record(constraint, error);
            }
        }
    }

    fn on_constraints_removed(&mut self, constraints: &[Constraint]) {
        for constraint in constraints {
            if let Err(error) = self.solver.remove_constraint(constraint) {
                self.record(constraint, error);
            }
        }
    }

    fn on_edit_variable_changed(&mut self, variable: &Variable, change: EditVariableChange) {
        let result: Result<(), SolverError> = match change {
            EditVariableChange::Added(strength) => self
                .solver
                .add_edit_variable(*variable, strength)
                .map_err(Into::into),
            EditVariableChange::Suggested(value) => self
                .solver
                .suggest_value(*variable, value)
                .map_err(Into::into),
            EditVariableChange::Removed => self
                .solver
                .remove_edit_variable(variable)
                .map_err(Into::into),
        };
        if let Err(error) = result {
            self.record(variable, error);
        }
    }

    fn resolve_constant(&mut self, variable: &Variable) -> f64 {
        match self.solver.value_of(variable) {
            Some(value) => value,
            None => (self.resolve)(variable),
        }
    }
}
