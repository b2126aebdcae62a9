//! Cassowary constraint solver implementation.
//!
//! This is an incremental implementation of the Cassowary linear constraint
//! solving algorithm, as described in "The Cassowary Linear Arithmetic
//! Constraint Solving Algorithm" by Greg J. Badros and Alan Borning.
//!
//! Constraints can be added and removed one at a time without re-solving
//! from scratch. Edit variables take new suggested values every frame; the
//! resulting infeasibility is repaired with the dual simplex method, so the
//! cost of a suggestion is proportional to the rows it touches.
//!
//! Every pivot choice breaks ties by the lowest symbol id, so the same
//! sequence of calls always produces the same tableau.

use indexmap::IndexMap;
use tracing::{debug, trace};
use trellis_core::{
    AddConstraintError, Constraint, EditVariableError, Relation, RemoveConstraintError, Strength,
    SuggestValueError, Variable,
};

use crate::config::SolverConfig;
use crate::tableau::{near_zero, Row, Symbol, SymbolKind, Tableau, Tag, EPSILON};

/// Bookkeeping for an edit variable.
#[derive(Debug, Clone)]
struct EditInfo {
    tag: Tag,
    constraint: Constraint,
    /// The last suggested value.
    constant: f64,
}

#[derive(Debug, Clone, Copy)]
struct VarData {
    symbol: Symbol,
    /// Value handed out by the last flush.
    reported: Option<f64>,
    /// Number of constraint terms referring to the variable.
    references: usize,
}

/// Whether a flush reported anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlushOutcome {
    NoUpdates,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Objective {
    Primary,
    Artificial,
}

fn is_infeasible(row: &Row) -> bool {
    row.constant < -EPSILON
}

/// The Cassowary constraint solver.
#[derive(Debug)]
pub struct Solver {
    config: SolverConfig,
    /// Symbol arena and the rows of basic symbols
    tableau: Tableau,
    /// The objective function row
    objective: Row,
    /// Artificial objective while probing a constraint without a subject
    artificial: Option<Row>,
    /// Installed constraints and the symbols needed to remove them
    constraints: IndexMap<Constraint, Tag>,
    /// External variables, in creation order
    variables: IndexMap<Variable, VarData>,
    edits: IndexMap<Variable, EditInfo>,
    /// Rows whose constant went negative; never external
    infeasible_rows: Vec<Symbol>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    /// Create a new solver.
    pub fn new() -> Self {
        Self::with_config(SolverConfig::default())
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self {
            config,
            tableau: Tableau::new(),
            objective: Row::new(0.0),
            artificial: None,
            constraints: IndexMap::new(),
            variables: IndexMap::new(),
            edits: IndexMap::new(),
            infeasible_rows: Vec::new(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Add several constraints, stopping at the first failure.
    ///
    /// Constraints added before the failing one stay in the solver.
    pub fn add_constraints<I>(&mut self, constraints: I) -> Result<(), AddConstraintError>
    where
        I: IntoIterator<Item = Constraint>,
    {
        for constraint in constraints {
            self.add_constraint(constraint)?;
        }
        Ok(())
    }

    /// Add a constraint to the solver.
    ///
    /// A required constraint that conflicts with the required constraints
    /// already present is rejected with
    /// [`AddConstraintError::UnsatisfiableConstraint`] and leaves the solver
    /// exactly as it was.
    ///
    /// # Panics
    ///
    /// Panics if the constraint still refers to proxy variables.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<(), AddConstraintError> {
        assert!(
            !constraint.has_proxies(),
            "constraint {} must be resolved before it reaches the solver",
            constraint.name
        );
        if self.constraints.contains_key(&constraint) {
            return Err(AddConstraintError::DuplicateConstraint);
        }

        let known_variables = self.variables.len();
        let (mut row, tag) = self.create_row(&constraint);
        let mut subject = self.choose_subject(&row, &tag);

        // A row made only of dummies is either redundant (zero constant) or
        // contradicts the required constraints already present.
        if subject.is_none() && row.all_dummies() {
            if !near_zero(row.constant) {
                self.variables.truncate(known_variables);
                debug!(constraint = %constraint.name, "rejected unsatisfiable constraint");
                return Err(AddConstraintError::UnsatisfiableConstraint);
            }
            subject = Some(tag.marker);
        }

        match subject {
            Some(subject) => {
                row.solve_for(subject);
                self.substitute(subject, &row);
                self.tableau.insert(subject, row);
            }
            None => {
                self.tableau.begin_journal();
                let objective = self.objective.clone();
                match self.add_with_artificial_variable(row) {
                    Ok(true) => self.tableau.commit_journal(),
                    Ok(false) => {
                        self.tableau.rollback_journal();
                        self.objective = objective;
                        self.artificial = None;
                        self.infeasible_rows.clear();
                        self.variables.truncate(known_variables);
                        debug!(constraint = %constraint.name, "rejected unsatisfiable constraint");
                        return Err(AddConstraintError::UnsatisfiableConstraint);
                    }
                    Err(error) => {
                        self.tableau.commit_journal();
                        return Err(AddConstraintError::Internal(error));
                    }
                }
            }
        }

        self.retain_variables(&constraint);
        debug!(
            constraint = %constraint.name,
            rows = self.tableau.row_count(),
            symbols = self.tableau.symbol_count(),
            "added constraint"
        );
        self.constraints.insert(constraint, tag);

        self.optimize(Objective::Primary)
            .map_err(AddConstraintError::Internal)?;
        self.infeasible_rows.clear();
        Ok(())
    }

    /// Remove several constraints, stopping at the first failure.
    pub fn remove_constraints<'a, I>(&mut self, constraints: I) -> Result<(), RemoveConstraintError>
    where
        I: IntoIterator<Item = &'a Constraint>,
    {
        for constraint in constraints {
            self.remove_constraint(constraint)?;
        }
        Ok(())
    }

    /// Remove a constraint from the solver.
    pub fn remove_constraint(&mut self, constraint: &Constraint) -> Result<(), RemoveConstraintError> {
        let (constraint, tag) = self
            .constraints
            .shift_remove_entry(constraint)
            .ok_or(RemoveConstraintError::UnknownConstraint)?;

        // Error weights must leave the objective before any pivot, or the
        // substitution would spread them into other cells.
        self.remove_constraint_effects(&constraint, &tag);

        // If the marker is basic, simply drop the row. Otherwise pivot the
        // marker into the basis and then drop the row.
        if self.tableau.remove(tag.marker).is_none() {
            if let Some((leaving, mut row)) = self.marker_leaving_row(tag.marker) {
                row.solve_for_symbols(leaving, tag.marker);
                self.substitute(tag.marker, &row);
            }
        }
        if let Some(other) = tag.other {
            self.tableau.remove(other);
        }

        // The internal constraint of an edit variable may be removed directly.
        self.edits.retain(|_, info| info.constraint != constraint);
        self.release_variables(&constraint);
        debug!(
            constraint = %constraint.name,
            rows = self.tableau.row_count(),
            "removed constraint"
        );

        self.optimize(Objective::Primary)
            .map_err(RemoveConstraintError::Internal)?;
        self.infeasible_rows.clear();
        Ok(())
    }

    /// Test whether a constraint has been added to the solver.
    pub fn has_constraint(&self, constraint: &Constraint) -> bool {
        self.constraints.contains_key(constraint)
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Installed constraints, in insertion order. Includes the internal
    /// constraints of edit variables.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.keys()
    }

    /// Make `variable` an edit variable held at its current value.
    ///
    /// Use [`Solver::suggest_value`] afterwards to move it.
    pub fn add_edit_variable(
        &mut self,
        variable: Variable,
        strength: Strength,
    ) -> Result<(), EditVariableError> {
        if self.edits.contains_key(&variable) {
            return Err(EditVariableError::DuplicateEditVariable);
        }
        let strength = Strength::new(strength.0);
        if strength.is_required() {
            return Err(EditVariableError::BadRequiredStrength);
        }

        let current = self.value_of(&variable).unwrap_or(0.0);
        let constraint = Constraint::equal(format!("edit {variable}"), variable, current, strength);
        self.add_constraint(constraint.clone())?;
        let tag = self
            .constraints
            .get(&constraint)
            .copied()
            .ok_or(EditVariableError::Internal("edit constraint missing after insertion"))?;

        debug!(%variable, value = current, "added edit variable");
        self.edits.insert(
            variable,
            EditInfo {
                tag,
                constraint,
                constant: current,
            },
        );
        Ok(())
    }

    /// Remove an edit variable from the solver.
    pub fn remove_edit_variable(&mut self, variable: &Variable) -> Result<(), EditVariableError> {
        let info = self
            .edits
            .shift_remove(variable)
            .ok_or(EditVariableError::UnknownEditVariable)?;
        self.remove_constraint(&info.constraint)?;
        debug!(%variable, "removed edit variable");
        Ok(())
    }

    /// Test whether an edit variable has been added to the solver.
    pub fn has_edit_variable(&self, variable: &Variable) -> bool {
        self.edits.contains_key(variable)
    }

    pub fn edit_variable_count(&self) -> usize {
        self.edits.len()
    }

    /// Suggest a value for the given edit variable.
    ///
    /// The edit constraint is shifted in place and feasibility is restored
    /// with the dual simplex method; no rows are added or removed.
    pub fn suggest_value(&mut self, variable: Variable, value: f64) -> Result<(), SuggestValueError> {
        let info = self
            .edits
            .get_mut(&variable)
            .ok_or(SuggestValueError::UnknownEditVariable)?;
        let delta = value - info.constant;
        info.constant = value;
        let tag = info.tag;
        if delta == 0.0 {
            return Ok(());
        }

        let infeasible = &mut self.infeasible_rows;
        if let Some(row) = self.tableau.row_mut(tag.marker) {
            // The positive error is basic.
            row.add(-delta);
            if is_infeasible(row) {
                infeasible.push(tag.marker);
            }
        } else if let Some((other, row)) = tag
            .other
            .and_then(|other| self.tableau.row_mut(other).map(|row| (other, row)))
        {
            // The negative error is basic.
            row.add(delta);
            if is_infeasible(row) {
                infeasible.push(other);
            }
        } else {
            // Both are parametric: shift every row that mentions them.
            self.tableau.rows_with_mut(tag.marker, |symbol, row| {
                row.add(delta * row.coefficient(tag.marker));
                if !symbol.is_external() && is_infeasible(row) {
                    infeasible.push(symbol);
                }
            });
        }

        self.dual_optimize().map_err(SuggestValueError::Internal)
    }

    /// Report every variable whose value changed since the last flush.
    ///
    /// Variables are visited in creation order. A variable that was never
    /// reported counts as changed.
    pub fn flush_updates<F>(&mut self, mut callback: F) -> FlushOutcome
    where
        F: FnMut(&Variable, f64),
    {
        let mut outcome = FlushOutcome::NoUpdates;
        for (variable, data) in self.variables.iter_mut() {
            let value = self.tableau.row(data.symbol).map_or(0.0, |row| row.constant);
            if data.reported != Some(value) {
                data.reported = Some(value);
                callback(variable, value);
                outcome = FlushOutcome::Updated;
            }
        }
        outcome
    }

    /// The current value of a variable the solver knows about.
    pub fn value_of(&self, variable: &Variable) -> Option<f64> {
        self.variables
            .get(variable)
            .map(|data| self.tableau.row(data.symbol).map_or(0.0, |row| row.constant))
    }

    pub fn has_variable(&self, variable: &Variable) -> bool {
        self.variables.contains_key(variable)
    }

    /// Reset the solver to the empty starting condition.
    pub fn reset(&mut self) {
        self.tableau.clear();
        self.objective = Row::new(0.0);
        self.artificial = None;
        self.constraints.clear();
        self.variables.clear();
        self.edits.clear();
        self.infeasible_rows.clear();
    }

    /// Get the symbol for a variable, creating it on first use.
    fn var_symbol(&mut self, variable: Variable) -> Symbol {
        if let Some(data) = self.variables.get(&variable) {
            return data.symbol;
        }
        let symbol = self.tableau.new_symbol(SymbolKind::External);
        self.variables.insert(
            variable,
            VarData {
                symbol,
                reported: None,
                references: 0,
            },
        );
        symbol
    }

    fn retain_variables(&mut self, constraint: &Constraint) {
        for term in &constraint.expression.terms {
            if near_zero(term.coefficient) {
                continue;
            }
            if let Some(data) = self.variables.get_mut(&term.variable) {
                data.references += 1;
            }
        }
    }

    fn release_variables(&mut self, constraint: &Constraint) {
        for term in &constraint.expression.terms {
            if near_zero(term.coefficient) {
                continue;
            }
            let Some(data) = self.variables.get_mut(&term.variable) else {
                continue;
            };
            data.references = data.references.saturating_sub(1);
            if data.references == 0 && self.config.collect_unused_variables {
                let symbol = data.symbol;
                self.variables.shift_remove(&term.variable);
                self.tableau.remove(symbol);
                trace!(variable = %term.variable, "collected unused variable");
            }
        }
    }

    /// Create a row for a constraint.
    ///
    /// Basic symbols are substituted by their rows, the slack, error and
    /// dummy symbols are added, and the sign is flipped if needed so the
    /// constant is non-negative.
    fn create_row(&mut self, constraint: &Constraint) -> (Row, Tag) {
        let expression = &constraint.expression;
        let mut row = Row::new(expression.constant);

        for term in &expression.terms {
            if near_zero(term.coefficient) {
                continue;
            }
            let symbol = self.var_symbol(term.variable);
            match self.tableau.row(symbol) {
                Some(basic) => {
                    row.insert_row(basic, term.coefficient);
                }
                None => row.insert_symbol(symbol, term.coefficient),
            }
        }

        let strength = constraint.strength;
        let tag = match constraint.relation {
            Relation::LessOrEqual | Relation::GreaterOrEqual => {
                let coefficient = if constraint.relation == Relation::LessOrEqual {
                    1.0
                } else {
                    -1.0
                };
                let slack = self.tableau.new_symbol(SymbolKind::Slack);
                row.insert_symbol(slack, coefficient);
                if strength.is_required() {
                    Tag {
                        marker: slack,
                        other: None,
                    }
                } else {
                    let error = self.tableau.new_symbol(SymbolKind::Error);
                    row.insert_symbol(error, -coefficient);
                    self.objective.insert_symbol(error, strength.0);
                    Tag {
                        marker: slack,
                        other: Some(error),
                    }
                }
            }
            Relation::EqualTo => {
                if strength.is_required() {
                    let dummy = self.tableau.new_symbol(SymbolKind::Dummy);
                    row.insert_symbol(dummy, 1.0);
                    Tag {
                        marker: dummy,
                        other: None,
                    }
                } else {
                    // expression = errplus - errminus
                    let errplus = self.tableau.new_symbol(SymbolKind::Error);
                    let errminus = self.tableau.new_symbol(SymbolKind::Error);
                    row.insert_symbol(errplus, -1.0);
                    row.insert_symbol(errminus, 1.0);
                    self.objective.insert_symbol(errplus, strength.0);
                    self.objective.insert_symbol(errminus, strength.0);
                    Tag {
                        marker: errplus,
                        other: Some(errminus),
                    }
                }
            }
        };

        if row.constant < 0.0 {
            row.reverse_sign();
        }
        (row, tag)
    }

    /// Choose the symbol to solve a new row for.
    ///
    /// Prefers an external symbol with a negative coefficient, then any
    /// external symbol, then a marker or other symbol with a negative
    /// coefficient. `None` means the row needs an artificial variable.
    fn choose_subject(&self, row: &Row, tag: &Tag) -> Option<Symbol> {
        let mut external = None;
        for (symbol, coefficient) in row.cells() {
            if symbol.is_external() {
                if coefficient < 0.0 {
                    return Some(symbol);
                }
                external.get_or_insert(symbol);
            }
        }
        if external.is_some() {
            return external;
        }

        if tag.marker.is_pivotable() && row.coefficient(tag.marker) < 0.0 {
            return Some(tag.marker);
        }
        tag.other
            .filter(|other| other.is_pivotable() && row.coefficient(*other) < 0.0)
    }

    /// Add the row to the tableau using an artificial variable.
    ///
    /// Returns `false` if the row cannot be satisfied. The caller restores
    /// the tableau in that case.
    fn add_with_artificial_variable(&mut self, row: Row) -> Result<bool, &'static str> {
        let art = self.tableau.new_symbol(SymbolKind::Slack);
        self.tableau.insert(art, row.clone());
        self.artificial = Some(row);

        // Successful only if the artificial objective reaches zero.
        self.optimize(Objective::Artificial)?;
        let success = self
            .artificial
            .take()
            .map_or(false, |artificial| near_zero(artificial.constant));
        trace!(success, "artificial probe finished");

        // If the artificial variable is still basic, pivot it out.
        if let Some(mut row) = self.tableau.remove(art) {
            if row.is_constant() {
                return Ok(success);
            }
            let Some(entering) = row.any_pivotable_symbol() else {
                return Ok(false);
            };
            row.solve_for_symbols(art, entering);
            self.substitute(entering, &row);
            self.tableau.insert(entering, row);
        }

        self.tableau.rows_with_mut(art, |_, row| row.remove(art));
        self.objective.remove(art);
        Ok(success)
    }

    /// Substitute a symbol throughout the tableau and the objectives.
    fn substitute(&mut self, symbol: Symbol, row: &Row) {
        let infeasible = &mut self.infeasible_rows;
        self.tableau.rows_with_mut(symbol, |basic, other| {
            other.substitute(symbol, row);
            if !basic.is_external() && is_infeasible(other) {
                infeasible.push(basic);
            }
        });
        self.objective.substitute(symbol, row);
        if let Some(artificial) = self.artificial.as_mut() {
            artificial.substitute(symbol, row);
        }
    }

    /// Optimize an objective with the primal simplex method.
    fn optimize(&mut self, which: Objective) -> Result<(), &'static str> {
        loop {
            let objective = match which {
                Objective::Primary => &self.objective,
                Objective::Artificial => self
                    .artificial
                    .as_ref()
                    .ok_or("artificial objective missing")?,
            };
            let Some(entering) = entering_symbol(objective) else {
                return Ok(());
            };
            let (leaving, mut row) = self
                .leaving_row(entering)
                .ok_or("the objective is unbounded")?;

            trace!(entering = entering.id(), leaving = leaving.id(), "primal pivot");
            row.solve_for_symbols(leaving, entering);
            self.substitute(entering, &row);
            self.tableau.insert(entering, row);
        }
    }

    /// Restore feasibility after a suggestion with the dual simplex method.
    ///
    /// The objective is optimal on entry, so only infeasible rows need to be
    /// pivoted out; the most negative one leaves first.
    fn dual_optimize(&mut self) -> Result<(), &'static str> {
        while let Some(leaving) = self.most_infeasible_row() {
            let mut row = self
                .tableau
                .remove(leaving)
                .ok_or("infeasible row vanished")?;
            let Some(entering) = self.dual_entering_symbol(&row) else {
                self.tableau.insert(leaving, row);
                return Err("dual optimize failed");
            };

            trace!(entering = entering.id(), leaving = leaving.id(), "dual pivot");
            row.solve_for_symbols(leaving, entering);
            self.substitute(entering, &row);
            self.tableau.insert(entering, row);
        }
        Ok(())
    }

    /// Pop the recorded row with the most negative constant.
    fn most_infeasible_row(&mut self) -> Option<Symbol> {
        let tableau = &self.tableau;
        self.infeasible_rows
            .retain(|symbol| tableau.row(*symbol).map_or(false, is_infeasible));
        self.infeasible_rows.sort_unstable();
        self.infeasible_rows.dedup();

        let constant = |symbol: &Symbol| tableau.row(*symbol).map_or(0.0, |row| row.constant);
        let (index, _) = self
            .infeasible_rows
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| constant(*a).total_cmp(&constant(*b)).then_with(|| a.cmp(b)))?;
        Some(self.infeasible_rows.remove(index))
    }

    /// The symbol to enter the basis when `row` leaves during dual simplex.
    ///
    /// Among the symbols that raise the row when they grow, picks the one
    /// with the smallest ratio of objective coefficient to row coefficient.
    fn dual_entering_symbol(&self, row: &Row) -> Option<Symbol> {
        let mut entering = None;
        let mut ratio = f64::INFINITY;
        for (symbol, coefficient) in row.cells() {
            if coefficient > 0.0 && !symbol.is_dummy() {
                let r = self.objective.coefficient(symbol) / coefficient;
                if r < ratio {
                    ratio = r;
                    entering = Some(symbol);
                }
            }
        }
        entering
    }

    /// Find the row to leave the basis when `entering` enters.
    ///
    /// Minimum ratio test over restricted rows that shrink as `entering`
    /// grows. Never returns an external row.
    fn leaving_row(&mut self, entering: Symbol) -> Option<(Symbol, Row)> {
        let mut ratio = f64::INFINITY;
        let mut leaving = None;
        for (symbol, row) in self.tableau.iter() {
            if !symbol.is_pivotable() {
                continue;
            }
            let coefficient = row.coefficient(entering);
            if coefficient < 0.0 {
                let r = -row.constant / coefficient;
                if r < ratio {
                    ratio = r;
                    leaving = Some(symbol);
                }
            }
        }
        let leaving = leaving?;
        self.tableau.remove(leaving).map(|row| (leaving, row))
    }

    /// Find the row to pivot on when removing a non-basic marker.
    ///
    /// Precedence:
    /// 0. a row keyed by the dummy of a redundant required equality;
    /// 1. a restricted row with a negative marker coefficient and the
    ///    smallest `-constant / coefficient`;
    /// 2. a restricted row with the smallest `constant / coefficient`;
    /// 3. an unrestricted (external) row containing the marker.
    ///
    /// A dummy-keyed row holds only dummies and a zero constant; pivoting on
    /// it hands the marker's place to the surviving twin's dummy.
    ///
    /// `None` means the marker appears nowhere, so nothing has to move.
    fn marker_leaving_row(&mut self, marker: Symbol) -> Option<(Symbol, Row)> {
        let mut r1 = f64::INFINITY;
        let mut r2 = f64::INFINITY;
        let mut redundant = None;
        let mut first = None;
        let mut second = None;
        let mut third = None;
        for (symbol, row) in self.tableau.iter() {
            let coefficient = row.coefficient(marker);
            if coefficient == 0.0 {
                continue;
            }
            if symbol.is_dummy() {
                redundant.get_or_insert(symbol);
            } else if symbol.is_external() {
                third.get_or_insert(symbol);
            } else if coefficient < 0.0 {
                let r = -row.constant / coefficient;
                if r < r1 {
                    r1 = r;
                    first = Some(symbol);
                }
            } else {
                let r = row.constant / coefficient;
                if r < r2 {
                    r2 = r;
                    second = Some(symbol);
                }
            }
        }
        let leaving = redundant.or(first).or(second).or(third)?;
        self.tableau.remove(leaving).map(|row| (leaving, row))
    }

    /// Remove the error weights a constraint put into the objective.
    fn remove_constraint_effects(&mut self, constraint: &Constraint, tag: &Tag) {
        let strength = constraint.strength.0;
        for symbol in std::iter::once(tag.marker).chain(tag.other) {
            if !symbol.is_error() {
                continue;
            }
            match self.tableau.row(symbol) {
                Some(row) => {
                    self.objective.insert_row(row, -strength);
                }
                None => self.objective.insert_symbol(symbol, -strength),
            }
        }
    }
}

/// The most negative non-dummy objective coefficient, lowest id on ties.
fn entering_symbol(objective: &Row) -> Option<Symbol> {
    let mut entering = None;
    let mut most_negative = 0.0;
    for (symbol, coefficient) in objective.cells() {
        if !symbol.is_dummy() && coefficient < most_negative {
            most_negative = coefficient;
            entering = Some(symbol);
        }
    }
    entering
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trellis_core::{Expression, Property, TouchId};

    fn var(handle: u64) -> Variable {
        Variable::entity(handle, Property::PositionX)
    }

    fn values(solver: &mut Solver) -> Vec<(Variable, f64)> {
        let mut updates = Vec::new();
        solver.flush_updates(|v, value| updates.push((*v, value)));
        updates
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn assert_near(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("variable should be known to the solver");
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_simple_equality() {
        let mut solver = Solver::new();
        let x = var(1);

        solver
            .add_constraint(Constraint::equal("x", x, 100.0, Strength::REQUIRED))
            .unwrap();
        assert_near(solver.value_of(&x), 100.0);
    }

    #[test]
    fn test_two_variables() {
        let mut solver = Solver::new();
        let x = var(1);
        let y = var(2);

        solver
            .add_constraint(Constraint::equal("x", x, 100.0, Strength::REQUIRED))
            .unwrap();
        solver
            .add_constraint(Constraint::equal(
                "y",
                y,
                Expression::from(x) + 50.0,
                Strength::REQUIRED,
            ))
            .unwrap();

        assert_near(solver.value_of(&x), 100.0);
        assert_near(solver.value_of(&y), 150.0);
    }

    #[test]
    fn test_strength_ordering() {
        let mut solver = Solver::new();
        let x = var(1);

        solver
            .add_constraint(Constraint::equal("weak", x, 100.0, Strength::WEAK))
            .unwrap();
        solver
            .add_constraint(Constraint::equal("strong", x, 50.0, Strength::STRONG))
            .unwrap();

        assert_near(solver.value_of(&x), 50.0);
    }

    #[test]
    fn test_required_inequality_beats_weak_equality() {
        let mut solver = Solver::new();
        let x = var(1);

        solver
            .add_constraint(Constraint::equal("pull", x, 0.0, Strength::WEAK))
            .unwrap();
        solver
            .add_constraint(Constraint::greater_or_equal("floor", x, 5.0, Strength::REQUIRED))
            .unwrap();

        let updates = values(&mut solver);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, x);
        assert!((updates[0].1 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_conflicting_required_is_rejected() {
        let mut solver = Solver::new();
        let x = var(1);

        let first = Constraint::equal("ten", x, 10.0, Strength::REQUIRED);
        let second = Constraint::equal("twenty", x, 20.0, Strength::REQUIRED);
        solver.add_constraint(first.clone()).unwrap();
        assert_eq!(
            solver.add_constraint(second.clone()),
            Err(AddConstraintError::UnsatisfiableConstraint)
        );

        assert!(solver.has_constraint(&first));
        assert!(!solver.has_constraint(&second));
        assert_near(solver.value_of(&x), 10.0);
    }

    #[test]
    fn test_rejection_through_artificial_probe_leaves_solver_unchanged() {
        init_tracing();
        let mut solver = Solver::new();
        let x = var(1);
        let y = var(2);

        solver
            .add_constraint(Constraint::greater_or_equal("x floor", x, 10.0, Strength::REQUIRED))
            .unwrap();
        solver
            .add_constraint(Constraint::equal("x pull", x, 40.0, Strength::MEDIUM))
            .unwrap();
        solver
            .add_constraint(Constraint::equal("y", y, 3.0, Strength::REQUIRED))
            .unwrap();
        let before = values(&mut solver);

        // x <= 5 contradicts x >= 10.
        let ceiling = Constraint::less_or_equal("x ceiling", x, 5.0, Strength::REQUIRED);
        assert_eq!(
            solver.add_constraint(ceiling.clone()),
            Err(AddConstraintError::UnsatisfiableConstraint)
        );
        assert!(!solver.has_constraint(&ceiling));
        assert_eq!(solver.flush_updates(|_, _| {}), FlushOutcome::NoUpdates);
        assert_near(solver.value_of(&x), 40.0);
        assert_near(solver.value_of(&y), 3.0);
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn test_duplicate_constraint() {
        let mut solver = Solver::new();
        let x = var(1);
        let c = Constraint::equal("x", x, 1.0, Strength::STRONG);
        solver.add_constraint(c.clone()).unwrap();

        let renamed = Constraint { name: "other name".into(), ..c };
        assert_eq!(
            solver.add_constraint(renamed),
            Err(AddConstraintError::DuplicateConstraint)
        );
    }

    #[test]
    fn test_remove_unknown_constraint() {
        let mut solver = Solver::new();
        let c = Constraint::equal("x", var(1), 1.0, Strength::STRONG);
        assert_eq!(
            solver.remove_constraint(&c),
            Err(RemoveConstraintError::UnknownConstraint)
        );
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut solver = Solver::new();
        let x = var(1);
        let y = var(2);

        solver
            .add_constraint(Constraint::equal("x", x, 20.0, Strength::REQUIRED))
            .unwrap();
        solver
            .add_constraint(Constraint::greater_or_equal("y", y, x, Strength::STRONG))
            .unwrap();
        solver
            .add_constraint(Constraint::equal("y pull", y, 0.0, Strength::WEAK))
            .unwrap();
        values(&mut solver);
        let x_before = solver.value_of(&x);
        let y_before = solver.value_of(&y);

        let extra = Constraint::less_or_equal("y cap", y, 15.0, Strength::MEDIUM);
        solver.add_constraint(extra.clone()).unwrap();
        solver.remove_constraint(&extra).unwrap();

        assert_near(solver.value_of(&x), x_before.unwrap());
        assert_near(solver.value_of(&y), y_before.unwrap());
        assert!(!solver.has_constraint(&extra));
    }

    #[test]
    fn test_removing_strong_constraint_releases_weaker_one() {
        let mut solver = Solver::new();
        let x = var(1);

        solver
            .add_constraint(Constraint::equal("weak", x, 100.0, Strength::WEAK))
            .unwrap();
        let strong = Constraint::equal("strong", x, 50.0, Strength::STRONG);
        solver.add_constraint(strong.clone()).unwrap();
        assert_near(solver.value_of(&x), 50.0);

        solver.remove_constraint(&strong).unwrap();
        assert_near(solver.value_of(&x), 100.0);
    }

    #[test]
    fn test_removed_variables_are_collected() {
        let mut solver = Solver::new();
        let x = var(1);
        let c = Constraint::equal("x", x, 3.0, Strength::REQUIRED);
        solver.add_constraint(c.clone()).unwrap();
        assert!(solver.has_variable(&x));
        solver.remove_constraint(&c).unwrap();
        assert!(!solver.has_variable(&x));

        let mut keeping = Solver::with_config(
            SolverConfig::default().with_collect_unused_variables(false),
        );
        keeping.add_constraint(c.clone()).unwrap();
        keeping.remove_constraint(&c).unwrap();
        assert!(keeping.has_variable(&x));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut solver = Solver::new();
        let x = var(1);
        solver
            .add_constraint(Constraint::equal("x", x, 7.0, Strength::REQUIRED))
            .unwrap();

        assert_eq!(solver.flush_updates(|_, _| {}), FlushOutcome::Updated);
        assert_eq!(solver.flush_updates(|_, _| {}), FlushOutcome::NoUpdates);
    }

    #[test]
    fn test_flush_reports_only_changes() {
        let mut solver = Solver::new();
        let x = var(1);
        let y = var(2);
        solver
            .add_constraint(Constraint::equal("x", x, 7.0, Strength::REQUIRED))
            .unwrap();
        solver
            .add_constraint(Constraint::equal("y", y, 1.0, Strength::REQUIRED))
            .unwrap();
        values(&mut solver);

        let z = var(3);
        solver.add_edit_variable(z, Strength::STRONG).unwrap();
        solver.suggest_value(z, 4.0).unwrap();

        let updates = values(&mut solver);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, z);
    }

    #[test]
    fn test_unconstrained_suggestion() {
        let mut solver = Solver::new();
        let x = var(1);
        solver.add_edit_variable(x, Strength::STRONG).unwrap();
        assert!(solver.has_edit_variable(&x));

        solver.suggest_value(x, 42.0).unwrap();
        assert_near(solver.value_of(&x), 42.0);
        solver.suggest_value(x, -3.5).unwrap();
        assert_near(solver.value_of(&x), -3.5);
    }

    #[test]
    fn test_edit_variable_errors() {
        let mut solver = Solver::new();
        let x = var(1);
        assert_eq!(
            solver.add_edit_variable(x, Strength::REQUIRED),
            Err(EditVariableError::BadRequiredStrength)
        );
        assert_eq!(
            solver.suggest_value(x, 1.0),
            Err(SuggestValueError::UnknownEditVariable)
        );
        assert_eq!(
            solver.remove_edit_variable(&x),
            Err(EditVariableError::UnknownEditVariable)
        );
        solver.add_edit_variable(x, Strength::MEDIUM).unwrap();
        assert_eq!(
            solver.add_edit_variable(x, Strength::MEDIUM),
            Err(EditVariableError::DuplicateEditVariable)
        );
        solver.remove_edit_variable(&x).unwrap();
        assert!(!solver.has_edit_variable(&x));
        assert_eq!(solver.constraint_count(), 0);
    }

    #[test]
    fn test_edit_variable_starts_at_current_value() {
        let mut solver = Solver::new();
        let x = var(1);
        solver
            .add_constraint(Constraint::equal("x", x, 60.0, Strength::WEAK))
            .unwrap();
        solver.add_edit_variable(x, Strength::STRONG).unwrap();
        assert_near(solver.value_of(&x), 60.0);
    }

    #[test]
    fn test_suggestion_respects_required_bounds() {
        let mut solver = Solver::new();
        let x = var(1);
        solver
            .add_constraint(Constraint::greater_or_equal("min", x, 0.0, Strength::REQUIRED))
            .unwrap();
        solver
            .add_constraint(Constraint::less_or_equal("max", x, 100.0, Strength::REQUIRED))
            .unwrap();
        solver.add_edit_variable(x, Strength::TOUCH).unwrap();

        solver.suggest_value(x, 250.0).unwrap();
        assert_near(solver.value_of(&x), 100.0);
        solver.suggest_value(x, -20.0).unwrap();
        assert_near(solver.value_of(&x), 0.0);
        solver.suggest_value(x, 30.0).unwrap();
        assert_near(solver.value_of(&x), 30.0);
    }

    #[test]
    fn test_drag_follows_touch() {
        init_tracing();
        let mut solver = Solver::new();
        let touch_x = Variable::touch(TouchId(1), Property::PositionX);
        let layer_x = var(9);

        solver.add_edit_variable(touch_x, Strength::TOUCH).unwrap();
        solver.suggest_value(touch_x, 100.0).unwrap();
        let drag = Constraint::equal(
            "drag",
            layer_x,
            Expression::from(touch_x) + 50.0,
            Strength::REQUIRED,
        );
        solver.add_constraint(drag.clone()).unwrap();
        assert_near(solver.value_of(&layer_x), 150.0);

        let constraints = solver.constraint_count();
        solver.suggest_value(touch_x, 130.0).unwrap();
        assert_near(solver.value_of(&layer_x), 180.0);
        assert_eq!(solver.constraint_count(), constraints);

        solver.remove_constraint(&drag).unwrap();
        assert!(!solver.has_variable(&layer_x));
        assert_near(solver.value_of(&touch_x), 130.0);
    }

    #[test]
    fn test_layout_chain() {
        let mut solver = Solver::new();
        let left = Variable::entity(1, Property::PositionX);
        let width = Variable::entity(1, Property::Width);
        let next = Variable::entity(2, Property::PositionX);

        solver
            .add_constraints([
                Constraint::equal("left", left, 10.0, Strength::REQUIRED),
                Constraint::greater_or_equal("min width", width, 40.0, Strength::REQUIRED),
                Constraint::equal("preferred width", width, 20.0, Strength::MEDIUM),
                Constraint::equal(
                    "spacing",
                    next,
                    Expression::from(left) + width + 8.0,
                    Strength::REQUIRED,
                ),
            ])
            .unwrap();

        assert_near(solver.value_of(&width), 40.0);
        assert_near(solver.value_of(&next), 58.0);
    }

    #[test]
    fn test_removing_twin_keeps_redundant_equality() {
        let mut solver = Solver::new();
        let x = var(1);
        solver.add_edit_variable(x, Strength::STRONG).unwrap();
        solver.suggest_value(x, 1.0).unwrap();

        let a = Constraint::equal("a", Expression::from(x) * -1.0, 4.0, Strength::REQUIRED);
        let b = Constraint::equal("b", Expression::from(x) * -2.0, 8.0, Strength::REQUIRED);
        solver.add_constraint(a.clone()).unwrap();
        solver.add_constraint(b.clone()).unwrap();
        assert_near(solver.value_of(&x), -4.0);

        solver.remove_constraint(&a).unwrap();
        assert!(solver.has_constraint(&b));
        assert_near(solver.value_of(&x), -4.0);

        solver.remove_constraint(&b).unwrap();
        assert_near(solver.value_of(&x), 1.0);
    }

    #[test]
    fn test_redundant_equalities_removed_in_any_order() {
        let x = var(1);
        let y = var(2);
        let pins = [
            Constraint::equal("x", x, 3.0, Strength::REQUIRED),
            Constraint::equal("2x", Expression::from(x) * 2.0, 6.0, Strength::REQUIRED),
            Constraint::equal("-3x", Expression::from(x) * -3.0, -9.0, Strength::REQUIRED),
        ];
        for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2]] {
            let mut solver = Solver::new();
            solver
                .add_constraint(Constraint::equal("y", y, Expression::from(x) + 1.0, Strength::REQUIRED))
                .unwrap();
            solver
                .add_constraint(Constraint::equal("x pull", x, 50.0, Strength::WEAK))
                .unwrap();
            solver.add_constraints(pins.iter().cloned()).unwrap();

            for (removed, index) in order.iter().enumerate() {
                solver.remove_constraint(&pins[*index]).unwrap();
                let expected = if removed < 2 { 3.0 } else { 50.0 };
                assert_near(solver.value_of(&x), expected);
                assert_near(solver.value_of(&y), expected + 1.0);
            }
        }
    }

    #[test]
    fn test_two_edit_variables_interact() {
        let mut solver = Solver::new();
        let x = var(1);
        let y = var(2);
        solver
            .add_constraint(Constraint::greater_or_equal(
                "gap",
                y,
                Expression::from(x) + 10.0,
                Strength::REQUIRED,
            ))
            .unwrap();
        solver.add_edit_variable(x, Strength::STRONG).unwrap();
        solver.add_edit_variable(y, Strength::WEAK).unwrap();

        solver.suggest_value(x, 0.0).unwrap();
        solver.suggest_value(y, 50.0).unwrap();
        assert_near(solver.value_of(&x), 0.0);
        assert_near(solver.value_of(&y), 50.0);

        // The weaker edit gives way.
        solver.suggest_value(y, 5.0).unwrap();
        assert_near(solver.value_of(&x), 0.0);
        assert_near(solver.value_of(&y), 10.0);

        solver.suggest_value(x, 30.0).unwrap();
        assert_near(solver.value_of(&x), 30.0);
        assert_near(solver.value_of(&y), 40.0);

        solver.suggest_value(y, 100.0).unwrap();
        assert_near(solver.value_of(&x), 30.0);
        assert_near(solver.value_of(&y), 100.0);
    }

    #[test]
    fn test_reset() {
        let mut solver = Solver::new();
        let x = var(1);
        solver.add_edit_variable(x, Strength::STRONG).unwrap();
        solver.reset();
        assert_eq!(solver.constraint_count(), 0);
        assert_eq!(solver.edit_variable_count(), 0);
        assert!(!solver.has_variable(&x));
        assert_eq!(solver.flush_updates(|_, _| {}), FlushOutcome::NoUpdates);
    }

    #[test]
    #[should_panic(expected = "must be resolved")]
    fn test_proxy_constraint_panics() {
        let mut solver = Solver::new();
        let c = Constraint::equal(
            "proxy",
            Variable::proxy(0, Property::PositionX),
            0.0,
            Strength::REQUIRED,
        );
        let _ = solver.add_constraint(c);
    }

    proptest! {
        #[test]
        fn prop_required_bounds_hold_under_suggestions(
            suggestions in proptest::collection::vec(-500.0f64..500.0, 1..40),
        ) {
            let mut solver = Solver::new();
            let x = var(1);
            let y = var(2);
            solver.add_constraint(Constraint::greater_or_equal("min", x, -100.0, Strength::REQUIRED)).unwrap();
            solver.add_constraint(Constraint::less_or_equal("max", x, 100.0, Strength::REQUIRED)).unwrap();
            solver.add_constraint(Constraint::equal("follow", y, Expression::from(x) * 2.0, Strength::REQUIRED)).unwrap();
            solver.add_edit_variable(x, Strength::STRONG).unwrap();

            for value in suggestions {
                solver.suggest_value(x, value).unwrap();
                let xv = solver.value_of(&x).unwrap();
                let yv = solver.value_of(&y).unwrap();
                prop_assert!((xv - value.clamp(-100.0, 100.0)).abs() < 1e-6);
                prop_assert!((yv - 2.0 * xv).abs() < 1e-6);
            }
        }

        #[test]
        fn prop_redundant_equalities_survive_removals(
            scales in proptest::collection::btree_set(1u8..8, 2..6),
            removals in proptest::collection::vec(any::<proptest::sample::Index>(), 0..6),
            suggestion in -50.0f64..50.0,
        ) {
            let mut solver = Solver::new();
            let x = var(1);
            let y = var(2);
            solver.add_edit_variable(x, Strength::STRONG).unwrap();
            solver.suggest_value(x, suggestion).unwrap();
            solver.add_constraint(Constraint::equal("double", y, Expression::from(x) * 2.0, Strength::REQUIRED)).unwrap();

            let mut installed = Vec::new();
            for scale in scales {
                let k = if scale % 2 == 0 { -f64::from(scale) } else { f64::from(scale) };
                let pin = Constraint::equal(format!("pin {k}"), Expression::from(x) * k, 7.0 * k, Strength::REQUIRED);
                solver.add_constraint(pin.clone()).unwrap();
                installed.push(pin);
                prop_assert!((solver.value_of(&x).unwrap() - 7.0).abs() < 1e-6);
            }

            for index in removals {
                if installed.is_empty() {
                    break;
                }
                let pin = installed.remove(index.index(installed.len()));
                solver.remove_constraint(&pin).unwrap();
                let expected = if installed.is_empty() { suggestion } else { 7.0 };
                let xv = solver.value_of(&x).unwrap();
                prop_assert!((xv - expected).abs() < 1e-6, "x = {}, expected {}", xv, expected);
                prop_assert!((solver.value_of(&y).unwrap() - 2.0 * xv).abs() < 1e-6);
            }
        }

        #[test]
        fn prop_round_trip_leaves_unrelated_values(
            a in -1000.0f64..1000.0,
            b in -1000.0f64..1000.0,
        ) {
            let mut solver = Solver::new();
            let x = var(1);
            let y = var(2);
            solver.add_constraint(Constraint::equal("x", x, a, Strength::REQUIRED)).unwrap();
            solver.add_constraint(Constraint::equal("y", y, Expression::from(x) + 1.0, Strength::STRONG)).unwrap();
            let before = (solver.value_of(&x).unwrap(), solver.value_of(&y).unwrap());

            let z = var(3);
            let extra = Constraint::equal("z", z, b, Strength::MEDIUM);
            solver.add_constraint(extra.clone()).unwrap();
            solver.remove_constraint(&extra).unwrap();

            let after = (solver.value_of(&x).unwrap(), solver.value_of(&y).unwrap());
            prop_assert!((before.0 - after.0).abs() < 1e-6);
            prop_assert!((before.1 - after.1).abs() < 1e-6);
            prop_assert_eq!(solver.flush_updates(|_, _| {}), FlushOutcome::Updated);
            prop_assert_eq!(solver.flush_updates(|_, _| {}), FlushOutcome::NoUpdates);
        }
    }
}
