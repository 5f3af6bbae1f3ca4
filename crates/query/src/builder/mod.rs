//! The AST -> pipeline compiler.
//!
//! The builder walks a query AST and wires an operator graph: source
//! connection (with filter pushdown and split-edit keys), Skip,
//! hidden Join + Exists per AND-level correlated subquery, the filter
//! pipeline (FanOut/FanIn where OR meets a subquery), Take, and one
//! non-hidden Join per related subquery. The environment plugs in
//! through [`BuilderDelegate`].
//!
//! Aliases must be unique across the whole tree; run
//! [`crate::ast::uniquify_aliases`] first (the [`crate::compile`] entry
//! point does).

pub mod filters;

use crate::ast::{Condition, ExistsCondition, ExistsOp, QueryAst};
use crate::builder::filters::{compile_predicate, split_pushdown};
use hashbrown::{HashMap, HashSet};
use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::{Error, OrderSpec, Result};
use rivulet_ivm::{
    Exists, ExistsMode, FanIn, FanOut, Filter, Join, MemoryStorage, Operator, OperatorRef, Skip,
    Source, Storage, Take,
};

/// Environment hooks the builder compiles against.
pub trait BuilderDelegate {
    /// Looks up the source for a table.
    fn source(&self, table: &str) -> Option<Rc<dyn Source>>;

    /// Creates a fresh, operator-private storage.
    fn create_storage(&self, name: &str) -> Rc<dyn Storage>;

    /// Instrumentation hook invoked for every wired edge.
    fn add_edge(&self, _from: &str, _to: &str) {}

    /// Identity-preserving wrapping hook for interior operators.
    fn decorate_input(&self, input: OperatorRef) -> OperatorRef {
        input
    }

    /// Identity-preserving wrapping hook for filter stages.
    fn decorate_filter_input(&self, input: OperatorRef) -> OperatorRef {
        input
    }

    /// Identity-preserving wrapping hook for source connections.
    fn decorate_source_input(&self, input: OperatorRef) -> OperatorRef {
        input
    }

    /// Environment-specific AST rewriting (e.g. name mapping).
    fn map_ast(&self, ast: QueryAst) -> QueryAst {
        ast
    }

    /// Forces filter application even when the source claims to have
    /// fully applied the pushed-down filters.
    fn apply_filters_anyway(&self) -> bool {
        false
    }
}

/// A ready-made delegate over a registry of named sources, backed by
/// in-memory storage.
#[derive(Default)]
pub struct CatalogDelegate {
    sources: RefCell<HashMap<String, Rc<dyn Source>>>,
}

impl CatalogDelegate {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source under a table name.
    pub fn register(&self, table: impl Into<String>, source: Rc<dyn Source>) {
        self.sources.borrow_mut().insert(table.into(), source);
    }
}

impl BuilderDelegate for CatalogDelegate {
    fn source(&self, table: &str) -> Option<Rc<dyn Source>> {
        self.sources.borrow().get(table).cloned()
    }

    fn create_storage(&self, _name: &str) -> Rc<dyn Storage> {
        Rc::new(MemoryStorage::new())
    }
}

/// Compiles query ASTs into operator pipelines.
pub struct PipelineBuilder<'a> {
    delegate: &'a dyn BuilderDelegate,
    aliases: RefCell<HashSet<String>>,
}

impl<'a> PipelineBuilder<'a> {
    /// Creates a builder over a delegate.
    pub fn new(delegate: &'a dyn BuilderDelegate) -> Self {
        Self {
            delegate,
            aliases: RefCell::new(HashSet::new()),
        }
    }

    /// Builds the pipeline for a query whose aliases are already
    /// uniquified.
    pub fn build(&self, ast: &QueryAst) -> Result<OperatorRef> {
        self.build_query(ast, &[])
    }

    fn claim_alias(&self, ast: &QueryAst) -> Result<String> {
        let alias = ast
            .alias
            .clone()
            .ok_or_else(|| Error::missing_alias(ast.table.as_str()))?;
        if !self.aliases.borrow_mut().insert(alias.clone()) {
            return Err(Error::duplicate_alias(alias));
        }
        Ok(alias)
    }

    /// Builds one query node. `extra_split` carries the correlation
    /// child fields when this node is a subquery; they double as the
    /// Take partition key.
    fn build_query(&self, ast: &QueryAst, extra_split: &[String]) -> Result<OperatorRef> {
        let alias = self.claim_alias(ast)?;
        let source = self
            .delegate
            .source(&ast.table)
            .ok_or_else(|| Error::source_not_found(ast.table.as_str()))?;
        let schema = source.schema();

        let order = match &ast.order_by {
            Some(order) => {
                for key in schema.primary_key() {
                    if !order.contains(key) {
                        return Err(Error::order_missing_key(
                            ast.table.as_str(),
                            key.as_str(),
                        ));
                    }
                }
                order.clone()
            }
            None => OrderSpec::by_key(schema.primary_key()),
        };

        let split_keys = split_edit_keys(ast, &order, extra_split);

        let (pushdown, residual_if_applied) = match &ast.where_clause {
            Some(condition) => split_pushdown(condition),
            None => (Vec::new(), None),
        };
        let connection = source.connect(&order, &pushdown, &split_keys);
        let residual = if connection.fully_applied_filters && !self.delegate.apply_filters_anyway()
        {
            residual_if_applied
        } else {
            ast.where_clause.clone()
        };

        debug_log!(
            "build {}: {} pushed-down filters, residual: {}",
            alias,
            pushdown.len(),
            residual.is_some()
        );

        let mut input = self.delegate.decorate_source_input(connection.input);
        let mut label = format!("source({})", alias);

        if let Some(start) = &ast.start {
            input = self.stack(
                Skip::new(input, start.clone()),
                &mut label,
                format!("skip({})", alias),
            );
        }

        // AND-reachable correlated subqueries become hidden joins with
        // exists filtering; the rest goes through the filter pipeline.
        let mut exists_conditions = Vec::new();
        let mut rest = Vec::new();
        if let Some(condition) = residual {
            flatten_and(condition, &mut exists_conditions, &mut rest);
        }
        for exists in &exists_conditions {
            input = self.wire_exists(input, exists, &mut label)?;
        }
        if !rest.is_empty() {
            input = self.apply_filters(input, rest, &alias, &mut label)?;
        }

        if let Some(limit) = ast.limit {
            let partition = if extra_split.is_empty() {
                None
            } else {
                Some(extra_split.to_vec())
            };
            let storage = self.delegate.create_storage(&format!("take({})", alias));
            input = self.stack(
                Take::new(input, storage, limit, partition),
                &mut label,
                format!("take({})", alias),
            );
        }

        for related in &ast.related {
            let child = self.build_query(&related.subquery, &related.correlation.child_fields)?;
            let child_alias = related.subquery.alias_or_table().to_string();
            let storage = self
                .delegate
                .create_storage(&format!("join({})", child_alias));
            let join = Join::new(
                input,
                child,
                storage,
                related.correlation.parent_fields.clone(),
                related.correlation.child_fields.clone(),
                child_alias.clone(),
                false,
            );
            input = self.stack(join, &mut label, format!("join({})", child_alias));
        }

        Ok(input)
    }

    /// Wires one hidden Join + Exists pair for a correlated subquery.
    fn wire_exists(
        &self,
        input: OperatorRef,
        exists: &ExistsCondition,
        label: &mut String,
    ) -> Result<OperatorRef> {
        let child = self.build_query(&exists.subquery, &exists.correlation.child_fields)?;
        let alias = exists
            .subquery
            .alias
            .clone()
            .ok_or_else(|| Error::missing_alias(exists.subquery.table.as_str()))?;

        let join_storage = self.delegate.create_storage(&format!("join({})", alias));
        let join = Join::new(
            input,
            child,
            join_storage,
            exists.correlation.parent_fields.clone(),
            exists.correlation.child_fields.clone(),
            alias.clone(),
            true,
        );
        let input = self.stack(join, label, format!("join({})", alias));

        let mode = match exists.op {
            ExistsOp::Exists => ExistsMode::Exists,
            ExistsOp::NotExists => ExistsMode::NotExists,
        };
        let exists_storage = self.delegate.create_storage(&format!("exists({})", alias));
        let op = Exists::new(input, exists_storage, alias.clone(), mode);
        Ok(self.stack(op, label, format!("exists({})", alias)))
    }

    /// Applies the residual WHERE conditions: subquery-free conditions
    /// merge into one plain filter; each OR that contains a subquery
    /// gets fan-out/fan-in machinery.
    fn apply_filters(
        &self,
        mut input: OperatorRef,
        conditions: Vec<Condition>,
        alias: &str,
        label: &mut String,
    ) -> Result<OperatorRef> {
        let mut plain = Vec::new();
        let mut fanned = Vec::new();
        for condition in conditions {
            if condition.has_subquery() {
                fanned.push(condition);
            } else {
                plain.push(condition);
            }
        }

        if !plain.is_empty() {
            let condition = singleton_or_and(plain);
            let filter = Filter::new(input, compile_predicate(&condition));
            self.delegate.add_edge(label, &format!("filter({})", alias));
            *label = format!("filter({})", alias);
            let filter: OperatorRef = filter;
            input = self.delegate.decorate_filter_input(filter);
        }

        for condition in fanned {
            input = self.apply_or(input, condition, alias, label)?;
        }
        Ok(input)
    }

    /// Compiles `OR` with subquery operands: one branch per operand
    /// that contains a subquery, subquery-free operands merged into a
    /// single plain filter branch.
    fn apply_or(
        &self,
        input: OperatorRef,
        condition: Condition,
        alias: &str,
        label: &mut String,
    ) -> Result<OperatorRef> {
        let Condition::Or(operands) = condition else {
            unreachable!("only OR trees carry subqueries past the exists stage")
        };

        let fan_out = FanOut::new(input);
        self.delegate.add_edge(label, &format!("fan_out({})", alias));
        *label = format!("fan_out({})", alias);

        let mut branches: Vec<OperatorRef> = Vec::new();
        let mut plain = Vec::new();
        for operand in operands {
            if operand.has_subquery() {
                let mut exists_conditions = Vec::new();
                let mut rest = Vec::new();
                flatten_and(operand, &mut exists_conditions, &mut rest);

                let mut branch: OperatorRef = fan_out.clone();
                let mut branch_label = label.clone();
                for exists in &exists_conditions {
                    branch = self.wire_exists(branch, exists, &mut branch_label)?;
                }
                if !rest.is_empty() {
                    branch = self.apply_filters(branch, rest, alias, &mut branch_label)?;
                }
                branches.push(branch);
            } else {
                plain.push(operand);
            }
        }
        if !plain.is_empty() {
            let condition = singleton_or_or(plain);
            let filter: OperatorRef = Filter::new(fan_out.clone(), compile_predicate(&condition));
            branches.push(self.delegate.decorate_filter_input(filter));
        }

        let fan_in = FanIn::new(&fan_out, branches);
        self.delegate.add_edge(label, &format!("fan_in({})", alias));
        *label = format!("fan_in({})", alias);
        let fan_in: OperatorRef = fan_in;
        Ok(self.delegate.decorate_input(fan_in))
    }

    fn stack<T: Operator + 'static>(
        &self,
        op: Rc<T>,
        label: &mut String,
        new_label: String,
    ) -> OperatorRef {
        self.delegate.add_edge(label, &new_label);
        *label = new_label;
        let op: OperatorRef = op;
        self.delegate.decorate_input(op)
    }
}

/// Flattens nested ANDs, extracting the exists conditions.
fn flatten_and(
    condition: Condition,
    exists_out: &mut Vec<ExistsCondition>,
    rest: &mut Vec<Condition>,
) {
    match condition {
        Condition::And(children) => {
            for child in children {
                flatten_and(child, exists_out, rest);
            }
        }
        Condition::Exists(exists) => exists_out.push(exists),
        other => rest.push(other),
    }
}

fn singleton_or_and(mut conditions: Vec<Condition>) -> Condition {
    if conditions.len() == 1 {
        conditions.pop().unwrap()
    } else {
        Condition::And(conditions)
    }
}

fn singleton_or_or(mut conditions: Vec<Condition>) -> Condition {
    if conditions.len() == 1 {
        conditions.pop().unwrap()
    } else {
        Condition::Or(conditions)
    }
}

/// The columns whose in-place edit must be split into remove + add:
/// ordering columns, correlation parent fields of every subquery at
/// this level, and the child fields of the enclosing correlation.
fn split_edit_keys(ast: &QueryAst, order: &OrderSpec, extra: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = order.columns().map(String::from).collect();
    if let Some(condition) = &ast.where_clause {
        collect_parent_fields(condition, &mut keys);
    }
    for related in &ast.related {
        for field in &related.correlation.parent_fields {
            if !keys.contains(field) {
                keys.push(field.clone());
            }
        }
    }
    for field in extra {
        if !keys.contains(field) {
            keys.push(field.clone());
        }
    }
    keys
}

/// Collects correlation parent fields of exists conditions at this
/// query level (subqueries reference their own tables and are handled
/// in their own builds).
fn collect_parent_fields(condition: &Condition, keys: &mut Vec<String>) {
    match condition {
        Condition::Simple(_) => {}
        Condition::And(children) | Condition::Or(children) => {
            for child in children {
                collect_parent_fields(child, keys);
            }
        }
        Condition::Exists(exists) => {
            for field in &exists.correlation.parent_fields {
                if !keys.contains(field) {
                    keys.push(field.clone());
                }
            }
        }
    }
}
