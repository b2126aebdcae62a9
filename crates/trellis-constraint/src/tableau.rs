//! Simplex tableau storage.
//!
//! Symbols are allocated sequentially and double as indices into the
//! tableau arena, so a row is owned by the slot of its basic symbol and
//! everything else (tags, edit info) refers to rows by symbol id.

use std::collections::BTreeMap;

/// Tolerance for floating-point comparisons.
pub(crate) const EPSILON: f64 = 1e-8;

/// Near-zero check for floating point values.
pub(crate) fn near_zero(value: f64) -> bool {
    value.abs() < EPSILON
}

/// Symbol kinds used internally in the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum SymbolKind {
    /// An external variable (the actual unknowns we're solving for)
    External,
    /// A slack variable (for inequality constraints)
    Slack,
    /// An error variable (for non-required constraints)
    Error,
    /// A dummy variable (for required equality constraints)
    Dummy,
}

/// An internal tableau unknown. Ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Symbol {
    id: usize,
    kind: SymbolKind,
}

impl Symbol {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn is_external(&self) -> bool {
        self.kind == SymbolKind::External
    }

    pub(crate) fn is_error(&self) -> bool {
        self.kind == SymbolKind::Error
    }

    pub(crate) fn is_dummy(&self) -> bool {
        self.kind == SymbolKind::Dummy
    }

    /// Slack and error symbols are restricted to non-negative values and may
    /// be pivoted freely.
    pub(crate) fn is_pivotable(&self) -> bool {
        matches!(self.kind, SymbolKind::Slack | SymbolKind::Error)
    }
}

/// A row in the simplex tableau: `basic = constant + Σ coefficient·symbol`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Row {
    pub(crate) constant: f64,
    cells: BTreeMap<Symbol, f64>,
}

impl Row {
    pub(crate) fn new(constant: f64) -> Self {
        Self {
            constant,
            cells: BTreeMap::new(),
        }
    }

    pub(crate) fn cells(&self) -> impl Iterator<Item = (Symbol, f64)> + '_ {
        self.cells.iter().map(|(&s, &c)| (s, c))
    }

    pub(crate) fn is_constant(&self) -> bool {
        self.cells.is_empty()
    }

    /// Add to the constant, returning the new constant.
    pub(crate) fn add(&mut self, value: f64) -> f64 {
        self.constant += value;
        self.constant
    }

    /// Add `coefficient` to the cell for `symbol`, dropping it if it cancels out.
    pub(crate) fn insert_symbol(&mut self, symbol: Symbol, coefficient: f64) {
        let entry = self.cells.entry(symbol).or_insert(0.0);
        *entry += coefficient;
        if near_zero(*entry) {
            self.cells.remove(&symbol);
        }
    }

    /// Add `coefficient` times `other` to this row.
    pub(crate) fn insert_row(&mut self, other: &Row, coefficient: f64) {
        self.constant += other.constant * coefficient;
        for (&symbol, &c) in &other.cells {
            self.insert_symbol(symbol, c * coefficient);
        }
    }

    pub(crate) fn remove(&mut self, symbol: Symbol) {
        self.cells.remove(&symbol);
    }

    pub(crate) fn reverse_sign(&mut self) {
        self.constant = -self.constant;
        for c in self.cells.values_mut() {
            *c = -*c;
        }
    }

    /// Solve `0 = row` for `symbol`, leaving `symbol = row'`.
    ///
    /// `symbol` must be present in the row.
    pub(crate) fn solve_for(&mut self, symbol: Symbol) {
        let coefficient = self.cells.remove(&symbol).unwrap_or(1.0);
        let multiplier = -1.0 / coefficient;
        self.constant *= multiplier;
        for c in self.cells.values_mut() {
            *c *= multiplier;
        }
    }

    /// Solve `lhs = row` for `rhs`, leaving `rhs = row'`.
    pub(crate) fn solve_for_symbols(&mut self, lhs: Symbol, rhs: Symbol) {
        self.insert_symbol(lhs, -1.0);
        self.solve_for(rhs);
    }

    pub(crate) fn coefficient(&self, symbol: Symbol) -> f64 {
        self.cells.get(&symbol).copied().unwrap_or(0.0)
    }

    /// Replace `symbol` with `row`.
    pub(crate) fn substitute(&mut self, symbol: Symbol, row: &Row) {
        if let Some(coefficient) = self.cells.remove(&symbol) {
            self.insert_row(row, coefficient);
        }
    }

    pub(crate) fn contains(&self, symbol: Symbol) -> bool {
        self.cells.contains_key(&symbol)
    }

    pub(crate) fn all_dummies(&self) -> bool {
        self.cells.keys().all(Symbol::is_dummy)
    }

    /// The lowest-id slack or error symbol in the row.
    pub(crate) fn any_pivotable_symbol(&self) -> Option<Symbol> {
        self.cells.keys().copied().find(Symbol::is_pivotable)
    }
}

/// The (marker, other) symbols introduced for a constraint, needed to
/// reverse its insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
    pub(crate) marker: Symbol,
    pub(crate) other: Option<Symbol>,
}

/// Prior contents of the slots changed since a journal was opened.
#[derive(Debug, Clone, Default)]
struct Journal {
    symbols: usize,
    basic_count: usize,
    saved: BTreeMap<usize, Option<Row>>,
}

/// Arena of symbols and the rows of basic symbols.
///
/// While a journal is open, every slot is saved before its first change so
/// that [`Tableau::rollback_journal`] costs only what was touched.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tableau {
    kinds: Vec<SymbolKind>,
    rows: Vec<Option<Row>>,
    basic_count: usize,
    journal: Option<Journal>,
}

impl Tableau {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh symbol.
    pub(crate) fn new_symbol(&mut self, kind: SymbolKind) -> Symbol {
        let id = self.kinds.len();
        self.kinds.push(kind);
        self.rows.push(None);
        Symbol { id, kind }
    }

    pub(crate) fn symbol_count(&self) -> usize {
        self.kinds.len()
    }

    pub(crate) fn row_count(&self) -> usize {
        self.basic_count
    }

    pub(crate) fn row(&self, symbol: Symbol) -> Option<&Row> {
        self.rows.get(symbol.id).and_then(Option::as_ref)
    }

    pub(crate) fn row_mut(&mut self, symbol: Symbol) -> Option<&mut Row> {
        self.save(symbol.id);
        self.rows.get_mut(symbol.id).and_then(Option::as_mut)
    }

    /// Make `symbol` basic with the given row.
    pub(crate) fn insert(&mut self, symbol: Symbol, row: Row) {
        self.save(symbol.id);
        let slot = &mut self.rows[symbol.id];
        if slot.is_none() {
            self.basic_count += 1;
        }
        *slot = Some(row);
    }

    pub(crate) fn remove(&mut self, symbol: Symbol) -> Option<Row> {
        self.save(symbol.id);
        let row = self.rows.get_mut(symbol.id).and_then(Option::take);
        if row.is_some() {
            self.basic_count -= 1;
        }
        row
    }

    /// Rows in ascending order of their basic symbol.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Symbol, &Row)> {
        let kinds = &self.kinds;
        self.rows.iter().enumerate().filter_map(move |(id, row)| {
            row.as_ref().map(|r| (Symbol { id, kind: kinds[id] }, r))
        })
    }

    /// Visit the rows that mention `symbol`, in ascending order.
    pub(crate) fn rows_with_mut<F>(&mut self, symbol: Symbol, mut f: F)
    where
        F: FnMut(Symbol, &mut Row),
    {
        for id in 0..self.rows.len() {
            let mentions = self.rows[id].as_ref().map_or(false, |row| row.contains(symbol));
            if !mentions {
                continue;
            }
            self.save(id);
            let basic = Symbol {
                id,
                kind: self.kinds[id],
            };
            if let Some(row) = self.rows[id].as_mut() {
                f(basic, row);
            }
        }
    }

    /// Start recording changes. Symbols allocated from now on are dropped
    /// again by a rollback.
    pub(crate) fn begin_journal(&mut self) {
        self.journal = Some(Journal {
            symbols: self.kinds.len(),
            basic_count: self.basic_count,
            saved: BTreeMap::new(),
        });
    }

    /// Keep the changes made since [`Tableau::begin_journal`].
    pub(crate) fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Undo every change made since [`Tableau::begin_journal`].
    pub(crate) fn rollback_journal(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        self.kinds.truncate(journal.symbols);
        self.rows.truncate(journal.symbols);
        for (id, row) in journal.saved {
            self.rows[id] = row;
        }
        self.basic_count = journal.basic_count;
    }

    fn save(&mut self, id: usize) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if id < journal.symbols {
            let rows = &self.rows;
            journal
                .saved
                .entry(id)
                .or_insert_with(|| rows.get(id).cloned().flatten());
        }
    }

    pub(crate) fn clear(&mut self) {
        self.kinds.clear();
        self.rows.clear();
        self.basic_count = 0;
        self.journal = None;
    }
}
