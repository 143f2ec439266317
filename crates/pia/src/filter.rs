//! Filters on PSMs, peptides and protein groups
//!
//! Filters are configured as [`FilterOptions`] (deserialized from JSON) and
//! compiled into a [`Filter`], which validates the combination of criterion,
//! comparator and value once, up front.

use crate::evidence::Psm;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Psm,
    Peptide,
    ProteinGroup,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterComparator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Regex,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "criterion", rename_all = "snake_case")]
pub enum Criterion {
    PsmScore { accession: String },
    PsmDecoy,
    PsmAccessions,
    PsmCharge,
    PeptideNumberOfPsms,
    ProteinNumberOfPeptides,
    ProteinNumberOfPsms,
    ProteinScore,
    ProteinAccessions,
}

impl Criterion {
    pub fn kind(&self) -> FilterKind {
        match self {
            Criterion::PsmScore { .. }
            | Criterion::PsmDecoy
            | Criterion::PsmAccessions
            | Criterion::PsmCharge => FilterKind::Psm,
            Criterion::PeptideNumberOfPsms => FilterKind::Peptide,
            Criterion::ProteinNumberOfPeptides
            | Criterion::ProteinNumberOfPsms
            | Criterion::ProteinScore
            | Criterion::ProteinAccessions => FilterKind::ProteinGroup,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// User-facing, serializable description of a filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(flatten)]
    pub criterion: Criterion,
    pub comparator: FilterComparator,
    pub value: FilterValue,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Clone, Debug)]
enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    Pattern(Regex),
}

/// A validated filter, ready to be applied
#[derive(Clone, Debug)]
pub struct Filter {
    criterion: Criterion,
    comparator: FilterComparator,
    value: Value,
    negate: bool,
}

/// A PSM as seen by filters: the PSM plus the protein accessions and decoy
/// status reachable through it
pub struct PsmView<'a> {
    pub psm: &'a Psm,
    pub accessions: Vec<&'a str>,
    pub decoy: Option<bool>,
}

pub struct PeptideView<'a> {
    pub sequence: &'a str,
    pub psms: usize,
}

pub struct ProteinGroupView<'a> {
    pub accessions: Vec<&'a str>,
    pub peptides: usize,
    pub psms: usize,
    pub score: f64,
}

pub enum FilterItem<'a> {
    Psm(PsmView<'a>),
    Peptide(PeptideView<'a>),
    ProteinGroup(ProteinGroupView<'a>),
}

impl FilterItem<'_> {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterItem::Psm(_) => FilterKind::Psm,
            FilterItem::Peptide(_) => FilterKind::Peptide,
            FilterItem::ProteinGroup(_) => FilterKind::ProteinGroup,
        }
    }
}

impl TryFrom<FilterOptions> for Filter {
    type Error = Error;

    fn try_from(options: FilterOptions) -> Result<Self> {
        let FilterOptions {
            criterion,
            comparator,
            value,
            negate,
        } = options;

        let invalid = |reason: &str| {
            Err(Error::InvalidFilter(format!(
                "{:?} with {:?}: {}",
                criterion, comparator, reason
            )))
        };

        let value = match (&criterion, comparator, value) {
            (Criterion::PsmDecoy, FilterComparator::Equal | FilterComparator::NotEqual, FilterValue::Bool(b)) => {
                Value::Bool(b)
            }
            (Criterion::PsmDecoy, _, _) => {
                return invalid("decoy filters compare a boolean for (in)equality")
            }
            (
                Criterion::PsmAccessions | Criterion::ProteinAccessions,
                FilterComparator::Regex,
                FilterValue::Text(pattern),
            ) => Value::Pattern(Regex::new(&pattern)?),
            (
                Criterion::PsmAccessions | Criterion::ProteinAccessions,
                FilterComparator::Equal | FilterComparator::NotEqual,
                FilterValue::Text(text),
            ) => Value::Text(text),
            (Criterion::PsmAccessions | Criterion::ProteinAccessions, _, _) => {
                return invalid("accession filters need a text value and a regex or (in)equality comparator")
            }
            (_, FilterComparator::Regex, _) => {
                return invalid("regular expressions only apply to accessions")
            }
            (_, _, FilterValue::Number(n)) => Value::Number(n),
            (_, _, _) => return invalid("numeric criteria need a numeric value"),
        };

        Ok(Filter {
            criterion,
            comparator,
            value,
            negate,
        })
    }
}

fn compare_numbers(comparator: FilterComparator, lhs: f64, rhs: f64) -> bool {
    match comparator {
        FilterComparator::Equal => lhs == rhs,
        FilterComparator::NotEqual => lhs != rhs,
        FilterComparator::Less => lhs < rhs,
        FilterComparator::LessEqual => lhs <= rhs,
        FilterComparator::Greater => lhs > rhs,
        FilterComparator::GreaterEqual => lhs >= rhs,
        FilterComparator::Regex => false,
    }
}

impl Filter {
    pub fn new(options: FilterOptions) -> Result<Self> {
        Self::try_from(options)
    }

    pub fn criterion(&self) -> &Criterion {
        &self.criterion
    }

    pub fn supports(&self, kind: FilterKind) -> bool {
        self.criterion.kind() == kind
    }

    /// Filters that do not support the kind of `item` are always satisfied
    pub fn satisfies(&self, item: &FilterItem) -> bool {
        if !self.supports(item.kind()) {
            return true;
        }
        let passes = match item {
            FilterItem::Psm(view) => self.satisfies_psm(view),
            FilterItem::Peptide(view) => self.compare(view.psms as f64),
            FilterItem::ProteinGroup(view) => match &self.criterion {
                Criterion::ProteinNumberOfPeptides => self.compare(view.peptides as f64),
                Criterion::ProteinNumberOfPsms => self.compare(view.psms as f64),
                Criterion::ProteinScore => !view.score.is_nan() && self.compare(view.score),
                _ => self.matches_accessions(&view.accessions),
            },
        };
        passes ^ self.negate
    }

    fn satisfies_psm(&self, view: &PsmView) -> bool {
        match &self.criterion {
            // an absent score never satisfies a score filter
            Criterion::PsmScore { accession } => view
                .psm
                .score(accession)
                .map(|score| self.compare(score))
                .unwrap_or(false),
            Criterion::PsmDecoy => match (&self.value, view.decoy) {
                (Value::Bool(expected), Some(decoy)) => {
                    (decoy == *expected) == (self.comparator == FilterComparator::Equal)
                }
                _ => false,
            },
            Criterion::PsmCharge => self.compare(view.psm.charge as f64),
            _ => self.matches_accessions(&view.accessions),
        }
    }

    fn compare(&self, lhs: f64) -> bool {
        match self.value {
            Value::Number(rhs) => compare_numbers(self.comparator, lhs, rhs),
            _ => false,
        }
    }

    fn matches_accessions(&self, accessions: &[&str]) -> bool {
        match (&self.value, self.comparator) {
            (Value::Pattern(re), _) => accessions.iter().any(|acc| re.is_match(acc)),
            (Value::Text(text), FilterComparator::Equal) => accessions.iter().any(|acc| acc == text),
            (Value::Text(text), FilterComparator::NotEqual) => {
                accessions.iter().all(|acc| acc != text)
            }
            _ => false,
        }
    }
}

/// An ordered list of filters; an item passes iff every filter supporting its
/// kind is satisfied
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn from_options(options: Vec<FilterOptions>) -> Result<Self> {
        options
            .into_iter()
            .map(Filter::try_from)
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn has_filters_for(&self, kind: FilterKind) -> bool {
        self.filters.iter().any(|f| f.supports(kind))
    }

    pub fn satisfies(&self, item: &FilterItem) -> bool {
        self.filters.iter().all(|f| f.satisfies(item))
    }
}
