//! Query AST definitions.
//!
//! A query is a table plus an optional WHERE tree, ordering, pagination
//! bounds and related (presentation) subqueries. Conditions form a
//! closed tagged union so every consumer -- builder, optimizer, filter
//! compilation -- is forced to handle all variants exhaustively.

mod alias;

pub use alias::uniquify_aliases;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use rivulet_core::{Bound, CompareOp, OrderSpec, Value};

/// The equi-join predicate between a parent row and a child row:
/// two equal-length field lists, matched positionally.
#[derive(Clone, Debug, PartialEq)]
pub struct Correlation {
    pub parent_fields: Vec<String>,
    pub child_fields: Vec<String>,
}

impl Correlation {
    /// Creates a correlation.
    pub fn new<P: Into<String>, C: Into<String>>(
        parent_fields: impl IntoIterator<Item = P>,
        child_fields: impl IntoIterator<Item = C>,
    ) -> Self {
        let correlation = Self {
            parent_fields: parent_fields.into_iter().map(Into::into).collect(),
            child_fields: child_fields.into_iter().map(Into::into).collect(),
        };
        assert_eq!(
            correlation.parent_fields.len(),
            correlation.child_fields.len(),
            "correlation field lists must have equal length"
        );
        correlation
    }

    /// Inverts the correlation for join reordering: the two field lists
    /// swap verbatim, nothing else changes.
    pub fn inverted(&self) -> Correlation {
        Correlation {
            parent_fields: self.child_fields.clone(),
            child_fields: self.parent_fields.clone(),
        }
    }
}

/// EXISTS or NOT EXISTS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExistsOp {
    Exists,
    NotExists,
}

/// A correlated-subquery condition.
#[derive(Clone, Debug, PartialEq)]
pub struct ExistsCondition {
    pub op: ExistsOp,
    pub correlation: Correlation,
    pub subquery: Box<QueryAst>,
    /// Marks this condition for the flip-exists optimizer.
    pub flip: bool,
}

/// A column-to-literal comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleCondition {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

/// A WHERE tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Simple(SimpleCondition),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Exists(ExistsCondition),
}

impl Condition {
    /// `field op value`.
    pub fn simple(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Simple(SimpleCondition {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(field, CompareOp::Eq, value)
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(field, CompareOp::Gt, value)
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(field, CompareOp::Lt, value)
    }

    /// `field LIKE pattern`.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::simple(field, CompareOp::Like, Value::String(pattern.into()))
    }

    /// `field IN (values)`, expressed as a disjunction of equalities.
    pub fn field_in(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        let field = field.into();
        Condition::Or(
            values
                .into_iter()
                .map(|v| Condition::Simple(SimpleCondition {
                    field: field.clone(),
                    op: CompareOp::Eq,
                    value: v,
                }))
                .collect(),
        )
    }

    /// Conjunction.
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    /// Disjunction.
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    /// `EXISTS (subquery)` correlated by `correlation`.
    pub fn exists(correlation: Correlation, subquery: QueryAst) -> Self {
        Condition::Exists(ExistsCondition {
            op: ExistsOp::Exists,
            correlation,
            subquery: Box::new(subquery),
            flip: false,
        })
    }

    /// `NOT EXISTS (subquery)` correlated by `correlation`.
    pub fn not_exists(correlation: Correlation, subquery: QueryAst) -> Self {
        Condition::Exists(ExistsCondition {
            op: ExistsOp::NotExists,
            correlation,
            subquery: Box::new(subquery),
            flip: false,
        })
    }

    /// Marks the outermost exists condition for flipping. No-op on
    /// other variants.
    pub fn flipped(mut self) -> Self {
        if let Condition::Exists(e) = &mut self {
            e.flip = true;
        }
        self
    }

    /// True if this tree contains a correlated subquery anywhere.
    pub fn has_subquery(&self) -> bool {
        match self {
            Condition::Simple(_) => false,
            Condition::Exists(_) => true,
            Condition::And(children) | Condition::Or(children) => {
                children.iter().any(Condition::has_subquery)
            }
        }
    }
}

/// A presentation subquery, materialized into the result tree.
#[derive(Clone, Debug, PartialEq)]
pub struct RelatedQuery {
    pub correlation: Correlation,
    pub subquery: QueryAst,
}

/// Presentation attributes of the original root, carried on the
/// `was_root` tag after a flip so the caller can reapply them.
#[derive(Clone, Debug, PartialEq)]
pub struct RootAttrs {
    pub order_by: Option<OrderSpec>,
    pub limit: Option<usize>,
    pub start: Option<Bound>,
}

/// A declarative query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryAst {
    pub table: String,
    pub alias: Option<String>,
    pub where_clause: Option<Condition>,
    pub order_by: Option<OrderSpec>,
    pub start: Option<Bound>,
    pub limit: Option<usize>,
    pub related: Vec<RelatedQuery>,
    /// Set by the flip-exists transform on the relocated original root.
    pub was_root: Option<RootAttrs>,
}

impl QueryAst {
    /// Starts a query over the named table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            where_clause: None,
            order_by: None,
            start: None,
            limit: None,
            related: Vec::new(),
            was_root: None,
        }
    }

    /// Sets the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Sets the WHERE tree, replacing any existing one.
    pub fn with_where(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Sets the ordering.
    pub fn with_order_by(mut self, order_by: OrderSpec) -> Self {
        self.order_by = Some(order_by);
        self
    }

    /// Sets the pagination start bound.
    pub fn with_start(mut self, start: Bound) -> Self {
        self.start = Some(start);
        self
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Adds a related (presentation) subquery.
    pub fn with_related(mut self, correlation: Correlation, subquery: QueryAst) -> Self {
        self.related.push(RelatedQuery {
            correlation,
            subquery,
        });
        self
    }

    /// The alias if set, otherwise the table name.
    pub fn alias_or_table(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}
