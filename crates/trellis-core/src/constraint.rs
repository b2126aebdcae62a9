//! Linear expressions and the constraints built from them.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Mul, Neg, Sub};

use smallvec::SmallVec;

use crate::types::{Target, Variable};

/// A coefficient applied to a variable.
///
/// A term flagged `is_constant` is not kept symbolic: when the constraint is
/// made concrete, the variable's current value is read once and folded into
/// the expression constant. This captures offsets at gesture start.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Term {
    pub variable: Variable,
    pub coefficient: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_constant: bool,
}

impl Term {
    pub fn new(variable: Variable, coefficient: f64) -> Self {
        Self {
            variable,
            coefficient,
            is_constant: false,
        }
    }

    /// A term whose value is sampled once instead of solved for.
    pub fn constant(variable: Variable, coefficient: f64) -> Self {
        Self {
            variable,
            coefficient,
            is_constant: true,
        }
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.variable
            .cmp(&other.variable)
            .then_with(|| self.coefficient.total_cmp(&other.coefficient))
            .then_with(|| self.is_constant.cmp(&other.is_constant))
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key(other) == Ordering::Equal
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variable.hash(state);
        self.coefficient.to_bits().hash(state);
        self.is_constant.hash(state);
    }
}

/// A linear combination of variables plus a constant: `Σ cᵢ·vᵢ + constant`.
///
/// Term order does not affect the value; it only fixes iteration order.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Expression {
    pub terms: SmallVec<[Term; 4]>,
    pub constant: f64,
}

impl Expression {
    pub fn new(terms: impl IntoIterator<Item = Term>, constant: f64) -> Self {
        Self {
            terms: terms.into_iter().collect(),
            constant,
        }
    }

    /// Create a constant expression.
    pub fn from_constant(value: f64) -> Self {
        Self {
            terms: SmallVec::new(),
            constant: value,
        }
    }

    /// Create an expression from a single variable.
    pub fn from_variable(variable: Variable) -> Self {
        Self::new([Term::new(variable, 1.0)], 0.0)
    }

    /// Append a symbolic term.
    pub fn term(mut self, variable: Variable, coefficient: f64) -> Self {
        self.terms.push(Term::new(variable, coefficient));
        self
    }

    /// Append a term that is sampled when the constraint is made concrete.
    pub fn constant_term(mut self, variable: Variable, coefficient: f64) -> Self {
        self.terms.push(Term::constant(variable, coefficient));
        self
    }

    pub fn plus(self, other: impl Into<Expression>) -> Self {
        self + other
    }

    pub fn minus(self, other: impl Into<Expression>) -> Self {
        self - other
    }

    /// Multiply every coefficient and the constant by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        self * factor
    }

    pub fn add_term(&mut self, term: Term) {
        self.terms.push(term);
    }

    /// Whether any term refers to a proxy target.
    pub fn has_proxies(&self) -> bool {
        self.terms.iter().any(|t| t.variable.is_proxy())
    }

    /// Distinct proxy indices referenced by the terms, ascending.
    pub fn referenced_proxies(&self) -> SmallVec<[u32; 4]> {
        let mut proxies: SmallVec<[u32; 4]> = self
            .terms
            .iter()
            .filter_map(|t| t.variable.target.proxy_index())
            .collect();
        proxies.sort_unstable();
        proxies.dedup();
        proxies
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.constant
            .total_cmp(&other.constant)
            .then_with(|| self.terms.len().cmp(&other.terms.len()))
            .then_with(|| {
                self.terms
                    .iter()
                    .zip(other.terms.iter())
                    .map(|(a, b)| a.cmp_key(b))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key(other) == Ordering::Equal
    }
}

impl Eq for Expression {}

impl Hash for Expression {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.constant.to_bits().hash(state);
        self.terms.len().hash(state);
        for term in &self.terms {
            term.hash(state);
        }
    }
}

impl From<Variable> for Expression {
    fn from(variable: Variable) -> Self {
        Expression::from_variable(variable)
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::from_constant(value)
    }
}

impl From<Term> for Expression {
    fn from(term: Term) -> Self {
        Expression::new([term], 0.0)
    }
}

impl<T: Into<Expression>> Add<T> for Expression {
    type Output = Expression;

    fn add(mut self, rhs: T) -> Expression {
        let rhs = rhs.into();
        self.constant += rhs.constant;
        self.terms.extend(rhs.terms);
        self
    }
}

impl<T: Into<Expression>> Sub<T> for Expression {
    type Output = Expression;

    fn sub(self, rhs: T) -> Expression {
        self + (-rhs.into())
    }
}

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        self * -1.0
    }
}

impl Mul<f64> for Expression {
    type Output = Expression;

    fn mul(mut self, scalar: f64) -> Expression {
        self.constant *= scalar;
        for term in &mut self.terms {
            term.coefficient *= scalar;
        }
        self
    }
}

/// Constraint strength (priority).
///
/// Anything at or above [`Strength::REQUIRED`] must hold exactly; weaker
/// constraints are satisfied as well as the stronger ones allow.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Strength(pub f64);

impl Strength {
    pub const REQUIRED: Strength = Strength(1_001_001_000.0);
    pub const STRONG: Strength = Strength(1_000_000.0);
    pub const MEDIUM: Strength = Strength(1_000.0);
    pub const WEAK: Strength = Strength(1.0);

    /// Just below required: wins over every other preference without ever
    /// overriding a required constraint. Used for touch positions.
    pub const TOUCH: Strength = Strength(1_001_000_999.0);

    /// Create a custom strength, clipped to `[0, REQUIRED]`.
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, Self::REQUIRED.0))
    }

    /// Check if this is a required constraint.
    pub fn is_required(&self) -> bool {
        self.0 >= Self::REQUIRED.0
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// How an expression relates to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Relation {
    EqualTo = 0,
    LessOrEqual = 1,
    GreaterOrEqual = 2,
}

impl Relation {
    /// Decode a relation from its wire ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Relation::EqualTo),
            1 => Some(Relation::LessOrEqual),
            2 => Some(Relation::GreaterOrEqual),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::EqualTo => "==",
            Relation::LessOrEqual => "<=",
            Relation::GreaterOrEqual => ">=",
        }
    }
}

/// `expression <relation> 0` at some strength.
///
/// Equality, hashing and ordering only look at the expression, relation and
/// strength. The name is a label: two constraints that differ only by name
/// are the same constraint.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constraint {
    pub name: String,
    pub expression: Expression,
    pub relation: Relation,
    pub strength: Strength,
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(
        name: impl Into<String>,
        expression: Expression,
        relation: Relation,
        strength: Strength,
    ) -> Self {
        Self {
            name: name.into(),
            expression,
            relation,
            strength,
        }
    }

    /// `lhs == rhs`
    pub fn equal(
        name: impl Into<String>,
        lhs: impl Into<Expression>,
        rhs: impl Into<Expression>,
        strength: Strength,
    ) -> Self {
        Self::new(name, lhs.into() - rhs, Relation::EqualTo, strength)
    }

    /// `lhs <= rhs`
    pub fn less_or_equal(
        name: impl Into<String>,
        lhs: impl Into<Expression>,
        rhs: impl Into<Expression>,
        strength: Strength,
    ) -> Self {
        Self::new(name, lhs.into() - rhs, Relation::LessOrEqual, strength)
    }

    /// `lhs >= rhs`
    pub fn greater_or_equal(
        name: impl Into<String>,
        lhs: impl Into<Expression>,
        rhs: impl Into<Expression>,
        strength: Strength,
    ) -> Self {
        Self::new(name, lhs.into() - rhs, Relation::GreaterOrEqual, strength)
    }

    pub fn has_proxies(&self) -> bool {
        self.expression.has_proxies()
    }

    /// Make a proxy constraint concrete.
    ///
    /// Every proxy variable is replaced by `replacement(variable)`. Terms
    /// flagged `is_constant` are dropped and `coefficient * constant_resolution(v)`
    /// is added to the constant instead, where `v` is the concrete variable.
    /// The result gets a fresh name derived from the concrete targets.
    ///
    /// # Panics
    ///
    /// Panics if `replacement` returns a proxy variable.
    pub fn resolve_proxies<R, C>(&self, mut replacement: R, mut constant_resolution: C) -> Constraint
    where
        R: FnMut(&Variable) -> Variable,
        C: FnMut(&Variable) -> f64,
    {
        let mut expression = Expression::from_constant(self.expression.constant);
        let mut resolved: SmallVec<[Target; 4]> = SmallVec::new();

        for term in &self.expression.terms {
            let variable = if term.variable.is_proxy() {
                let concrete = replacement(&term.variable);
                assert!(
                    !concrete.is_proxy(),
                    "proxy replacement for {} returned another proxy ({})",
                    term.variable,
                    concrete
                );
                if !resolved.contains(&concrete.target) {
                    resolved.push(concrete.target);
                }
                concrete
            } else {
                term.variable
            };

            if term.is_constant {
                expression.constant += term.coefficient * constant_resolution(&variable);
            } else {
                expression.add_term(Term::new(variable, term.coefficient));
            }
        }

        let targets: Vec<String> = resolved.iter().map(ToString::to_string).collect();
        Constraint {
            name: format!("{}@{}", self.name, targets.join(",")),
            expression,
            relation: self.relation,
            strength: self.strength,
        }
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.expression
            .cmp_key(&other.expression)
            .then_with(|| self.relation.cmp(&other.relation))
            .then_with(|| self.strength.0.total_cmp(&other.strength.0))
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key(other) == Ordering::Equal
    }
}

impl Eq for Constraint {}

impl PartialOrd for Constraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Constraint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_key(other)
    }
}

impl Hash for Constraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
        self.relation.hash(state);
        self.strength.0.to_bits().hash(state);
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        for (i, term) in self.expression.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            let marker = if term.is_constant { "'" } else { "" };
            write!(f, "{}*{}{}", term.coefficient, term.variable, marker)?;
        }
        write!(
            f,
            " + {} {} 0 | {}",
            self.expression.constant,
            self.relation.symbol(),
            self.strength.0
        )
    }
}
