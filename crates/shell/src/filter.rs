//! Transfer filter language
//!
//! A filter expression constrains one attribute of a logged transfer:
//!
//! ```text
//! <variable> <comparator> <value> [<comparator> <value>]
//! ```
//!
//! e.g. `id>10`, `id>=7<=10`, `"size = 0x40"`, `type=isoc`. Several
//! expressions form a query; an entry matches when every expression does.
//!
//! Variables: `id`, `type`, `size`, `index` (control only), `ep` (endpoint,
//! or request type for control, masked with `0x1f`) and `errors`
//! (isochronous only). `type` takes `=` with one of `ctrl`, `int`, `bulk`,
//! `isoc`; every other variable takes numeric comparisons.

use crate::payload::split_int_prefix;
use crate::transfer_log::{TransferDetails, TransferEntry};
use common::TransferKind;
use std::fmt;
use thiserror::Error;

/// Filter parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Unrecognised variable \"{0}\"")]
    UnknownVariable(String),

    #[error("Unrecognised value \"{0}\" for variable \"type\"")]
    UnknownType(String),

    #[error("Only the equals sign is allowed for variable \"type\" in \"{0}\"")]
    TypeComparator(String),

    #[error("No qualifier in \"{0}\" was found")]
    MissingComparator(String),

    #[error("Missing value after comparator in \"{0}\"")]
    MissingValue(String),

    #[error("Invalid range spec in \"{0}\" (found equals sign)")]
    EqualsInRange(String),

    #[error("Invalid range spec in \"{0}\" (both bounds on the same side)")]
    SameSide(String),

    #[error("Unexpected text \"{rest}\" in \"{expr}\"")]
    TrailingText { expr: String, rest: String },

    #[error("Cannot apply two filters on the same variable ({0})")]
    DuplicateVariable(Variable),
}

/// Attribute a filter expression constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    Id,
    Type,
    Size,
    Index,
    Endpoint,
    Errors,
}

impl Variable {
    pub const ALL: [Variable; 6] = [
        Variable::Id,
        Variable::Type,
        Variable::Size,
        Variable::Index,
        Variable::Endpoint,
        Variable::Errors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::Id => "id",
            Variable::Type => "type",
            Variable::Size => "size",
            Variable::Index => "index",
            Variable::Endpoint => "ep",
            Variable::Errors => "errors",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }

    /// Transfer kind this variable is restricted to, if any
    pub fn required_kind(self) -> Option<TransferKind> {
        match self {
            Variable::Index => Some(TransferKind::Control),
            Variable::Errors => Some(TransferKind::Isochronous),
            _ => None,
        }
    }

    /// Numeric value of this variable for `entry`
    ///
    /// `None` when the entry's kind does not carry the variable.
    fn value(self, entry: &TransferEntry) -> Option<i64> {
        match (self, &entry.details) {
            (Variable::Id, _) => Some(i64::from(entry.id)),
            (Variable::Type, _) => None,
            (Variable::Size, _) => Some(entry.size as i64),
            (Variable::Index, TransferDetails::Control { index, .. }) => Some(i64::from(*index)),
            (Variable::Endpoint, _) => Some(i64::from(entry.endpoint_or_request_type() & 0x1f)),
            (Variable::Errors, TransferDetails::Isochronous { errors, .. }) => Some(*errors as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    /// Split a leading comparator off `s`
    fn split(s: &str) -> Option<(Comparator, &str)> {
        for (token, cmp) in [
            ("<=", Comparator::Le),
            (">=", Comparator::Ge),
            ("<", Comparator::Lt),
            (">", Comparator::Gt),
            ("=", Comparator::Eq),
        ] {
            if let Some(rest) = s.strip_prefix(token) {
                return Some((cmp, rest));
            }
        }
        None
    }

    fn is_lower(self) -> bool {
        matches!(self, Comparator::Gt | Comparator::Ge)
    }

    fn is_upper(self) -> bool {
        matches!(self, Comparator::Lt | Comparator::Le)
    }
}

/// One parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `type=<kind>`
    Kind(TransferKind),
    /// Inclusive bounds on a numeric variable; `None` is unbounded
    Range {
        variable: Variable,
        min: Option<i64>,
        max: Option<i64>,
    },
}

impl Predicate {
    pub fn variable(&self) -> Variable {
        match self {
            Predicate::Kind(_) => Variable::Type,
            Predicate::Range { variable, .. } => *variable,
        }
    }

    /// Whether `entry` satisfies this predicate
    pub fn matches(&self, entry: &TransferEntry) -> bool {
        match self {
            Predicate::Kind(kind) => entry.kind() == *kind,
            Predicate::Range { variable, min, max } => {
                if variable.required_kind().is_some_and(|k| k != entry.kind()) {
                    return false;
                }
                let Some(n) = variable.value(entry) else {
                    return false;
                };
                min.is_none_or(|min| n >= min) && max.is_none_or(|max| n <= max)
            }
        }
    }
}

/// Parse a single filter expression
pub fn parse_filter(text: &str) -> Result<Predicate, FilterError> {
    let expr = text.trim();
    let name_len = expr
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(expr.len());
    let (name, rest) = expr.split_at(name_len);

    let variable =
        Variable::from_name(name).ok_or_else(|| FilterError::UnknownVariable(name.to_string()))?;
    let rest = rest.trim_start();

    if variable == Variable::Type {
        return parse_kind(expr, rest);
    }

    let (first, rest) = parse_clause(expr, rest)?;
    let mut min = None;
    let mut max = None;
    apply_clause(first, &mut min, &mut max);

    let rest = rest.trim_start();
    if rest.is_empty() {
        return Ok(Predicate::Range { variable, min, max });
    }

    let (second, rest) = match parse_clause(expr, rest) {
        Err(FilterError::MissingComparator(_)) => {
            return Err(FilterError::TrailingText {
                expr: expr.to_string(),
                rest: rest.to_string(),
            });
        }
        other => other?,
    };

    if first.0 == Comparator::Eq || second.0 == Comparator::Eq {
        return Err(FilterError::EqualsInRange(expr.to_string()));
    }
    if (first.0.is_lower() && second.0.is_lower()) || (first.0.is_upper() && second.0.is_upper())
    {
        return Err(FilterError::SameSide(expr.to_string()));
    }
    apply_clause(second, &mut min, &mut max);

    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(FilterError::TrailingText {
            expr: expr.to_string(),
            rest: rest.to_string(),
        });
    }

    Ok(Predicate::Range { variable, min, max })
}

fn parse_kind(expr: &str, rest: &str) -> Result<Predicate, FilterError> {
    match Comparator::split(rest) {
        Some((Comparator::Eq, value)) => {
            let value = value.trim();
            TransferKind::from_short_name(value)
                .map(Predicate::Kind)
                .ok_or_else(|| FilterError::UnknownType(value.to_string()))
        }
        Some(_) => Err(FilterError::TypeComparator(expr.to_string())),
        None => Err(FilterError::MissingComparator(expr.to_string())),
    }
}

fn parse_clause<'a>(expr: &str, s: &'a str) -> Result<((Comparator, i64), &'a str), FilterError> {
    let (cmp, rest) =
        Comparator::split(s).ok_or_else(|| FilterError::MissingComparator(expr.to_string()))?;
    let (value, rest) = split_int_prefix(rest.trim_start())
        .ok_or_else(|| FilterError::MissingValue(expr.to_string()))?;
    Ok(((cmp, value), rest))
}

fn apply_clause((cmp, n): (Comparator, i64), min: &mut Option<i64>, max: &mut Option<i64>) {
    match cmp {
        Comparator::Eq => {
            *min = Some(n);
            *max = Some(n);
        }
        Comparator::Gt => *min = Some(n.saturating_add(1)),
        Comparator::Ge => *min = Some(n),
        Comparator::Lt => *max = Some(n.saturating_sub(1)),
        Comparator::Le => *max = Some(n),
    }
}

/// Logical AND of `predicates` over `entry`; an empty set accepts everything
pub fn evaluate(entry: &TransferEntry, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| p.matches(entry))
}

/// A query: one predicate per variable at most
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Filter that accepts every entry
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a list of filter expressions into a query
    pub fn parse<S: AsRef<str>>(exprs: &[S]) -> Result<Self, FilterError> {
        let mut predicates: Vec<Predicate> = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let predicate = parse_filter(expr.as_ref())?;
            if predicates
                .iter()
                .any(|p| p.variable() == predicate.variable())
            {
                return Err(FilterError::DuplicateVariable(predicate.variable()));
            }
            predicates.push(predicate);
        }
        Ok(Self { predicates })
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, entry: &TransferEntry) -> bool {
        evaluate(entry, &self.predicates)
    }
}
