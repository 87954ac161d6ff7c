//! Structured lineage extraction over the `sqlparser` AST.
//!
//! The statement is parsed with the dialect's grammar, classified, and walked
//! for table references. Descent into nested queries (derived tables, CTE
//! bodies, set operations, IN / EXISTS / scalar subqueries) is bounded by a
//! nesting cap.

use std::collections::{BTreeSet, HashSet};

use sqlparser::ast::{
    Expr, FromTable, Function, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, ObjectName,
    Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::parser::Parser;

use super::types::{ColumnMapping, ExtractionMethod, LineageFact, QueryType, TransformationType};
use super::{LineageError, LineageStrategy};
use crate::sql::dialect::{Dialect, SqlDialect};

/// Default cap on nested query depth.
pub const DEFAULT_MAX_SUBQUERY_DEPTH: usize = 10;

/// Aggregate functions that mark an output column as `aggregate`.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "SUM",
    "COUNT",
    "AVG",
    "MIN",
    "MAX",
    "STDDEV",
    "STDDEV_POP",
    "STDDEV_SAMP",
    "VARIANCE",
    "VAR_POP",
    "VAR_SAMP",
    "ARRAY_AGG",
    "STRING_AGG",
    "LISTAGG",
    "GROUP_CONCAT",
    "COUNT_BIG",
    "APPROX_COUNT_DISTINCT",
    "MEDIAN",
    "ANY_VALUE",
    "BOOL_AND",
    "BOOL_OR",
];

/// Full syntactic parse strategy.
#[derive(Debug, Clone)]
pub struct StructuredParser {
    max_depth: usize,
}

impl Default for StructuredParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredParser {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_SUBQUERY_DEPTH,
        }
    }

    /// Override the nested query cap.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn extract_statement(&self, statement: &Statement, dialect: Dialect) -> LineageFact {
        let mut tables = TableCollector::new(self.max_depth);
        let mut fact = LineageFact::empty(ExtractionMethod::Structured);
        let query_type = classify(statement, dialect, &mut tables, &mut fact);

        if tables.depth_exceeded {
            fact.add_warning(format!(
                "query nesting exceeds {} levels; deeper tables were not collected",
                self.max_depth
            ));
        }

        fact.source_tables = tables.tables;
        fact.query_type = query_type;
        fact.confidence_score = query_type.structured_confidence();
        fact
    }
}

/// Classify a statement, collecting its tables and column lineage.
fn classify(
    statement: &Statement,
    dialect: Dialect,
    tables: &mut TableCollector,
    fact: &mut LineageFact,
) -> QueryType {
    match statement {
        Statement::Query(query) => {
            if let SetExpr::Insert(inner) = query.body.as_ref() {
                // WITH ... INSERT: the CTEs scope the inner statement.
                tables.with_clause(query, 0);
                return classify(inner, dialect, tables, fact);
            }
            tables.query(query, 0);
            match select_into(query).filter(|_| dialect.select_into_creates_table()) {
                Some(into) => {
                    fact.target_table = Some(object_name(into));
                    fact.column_lineage = projection_mappings(&query.body);
                    QueryType::Create
                }
                None => QueryType::Select,
            }
        }
        Statement::Insert(insert) => {
            fact.target_table = Some(object_name(&insert.table_name));
            if let Some(source) = &insert.source {
                tables.query(source, 0);
                fact.column_lineage =
                    pair_insert_columns(&insert.columns, source, &mut fact.warnings);
            }
            QueryType::Insert
        }
        Statement::CreateTable(create) => {
            fact.target_table = Some(object_name(&create.name));
            if let Some(query) = &create.query {
                tables.query(query, 0);
                fact.column_lineage = projection_mappings(&query.body);
            }
            QueryType::Create
        }
        Statement::CreateView { name, query, .. } => {
            fact.target_table = Some(object_name(name));
            tables.query(query, 0);
            fact.column_lineage = projection_mappings(&query.body);
            QueryType::CreateView
        }
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            let mut relations: Vec<&TableFactor> =
                table.joins.iter().map(|join| &join.relation).collect();
            if let Some(from) = from {
                relations.push(&from.relation);
                relations.extend(from.joins.iter().map(|join| &join.relation));
            }
            let written = relation_name(&table.relation);
            fact.target_table = written
                .as_deref()
                .map(|name| resolve_alias(name, &relations).unwrap_or_else(|| name.to_string()));
            for factor in relations {
                if !names_target(factor, written.as_deref()) {
                    tables.table_factor(factor, 0);
                }
            }
            for assignment in assignments {
                tables.expr(&assignment.value, 0);
            }
            if let Some(selection) = selection {
                tables.expr(selection, 0);
            }
            QueryType::Update
        }
        Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => from,
            };
            let relations: Vec<&TableFactor> = from
                .iter()
                .flat_map(|table| {
                    std::iter::once(&table.relation)
                        .chain(table.joins.iter().map(|join| &join.relation))
                })
                .collect();
            let written = delete
                .tables
                .first()
                .map(object_name)
                .or_else(|| from.first().and_then(|table| relation_name(&table.relation)));
            fact.target_table = written
                .as_deref()
                .map(|name| resolve_alias(name, &relations).unwrap_or_else(|| name.to_string()));
            for factor in relations {
                if !names_target(factor, written.as_deref()) {
                    tables.table_factor(factor, 0);
                }
            }
            for table in delete.using.iter().flatten() {
                tables.table_with_joins(table, 0);
            }
            if let Some(selection) = &delete.selection {
                tables.expr(selection, 0);
            }
            QueryType::Delete
        }
        Statement::Merge { table, source, .. } => {
            fact.target_table = relation_name(table);
            tables.table_factor(source, 0);
            QueryType::Unknown
        }
        _ => QueryType::Unknown,
    }
}

impl LineageStrategy for StructuredParser {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn extract(&self, sql: &str, dialect: Dialect) -> Result<LineageFact, LineageError> {
        if sql.trim().is_empty() {
            return Err(LineageError::EmptyInput);
        }

        let grammar = dialect.parser_dialect();
        let statements =
            Parser::parse_sql(&*grammar, sql).map_err(|e| LineageError::Syntax(e.to_string()))?;
        let statement = statements.first().ok_or(LineageError::NoStatements)?;

        let mut fact = self.extract_statement(statement, dialect);
        if statements.len() > 1 {
            fact.add_warning(format!(
                "{} statements found; only the first was analyzed",
                statements.len()
            ));
        }
        Ok(fact)
    }
}

// =============================================================================
// Table Collection
// =============================================================================

/// Walks a statement collecting table references.
struct TableCollector {
    max_depth: usize,
    /// Lowercased CTE names, excluded from sources.
    ctes: HashSet<String>,
    tables: BTreeSet<String>,
    depth_exceeded: bool,
}

impl TableCollector {
    fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            ctes: HashSet::new(),
            tables: BTreeSet::new(),
            depth_exceeded: false,
        }
    }

    fn query(&mut self, query: &Query, depth: usize) {
        if depth > self.max_depth {
            self.depth_exceeded = true;
            return;
        }
        self.with_clause(query, depth);
        self.set_expr(&query.body, depth);
    }

    fn with_clause(&mut self, query: &Query, depth: usize) {
        if let Some(with) = &query.with {
            // Register every name first so CTEs may reference each other.
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
            for cte in &with.cte_tables {
                self.query(&cte.query, depth + 1);
            }
        }
    }

    fn set_expr(&mut self, body: &SetExpr, depth: usize) {
        match body {
            SetExpr::Select(select) => self.select(select, depth),
            SetExpr::Query(query) => self.query(query, depth + 1),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left, depth);
                self.set_expr(right, depth);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &Select, depth: usize) {
        for table in &select.from {
            self.table_with_joins(table, depth);
        }
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.expr(expr, depth)
                }
                _ => {}
            }
        }
        if let Some(selection) = &select.selection {
            self.expr(selection, depth);
        }
        if let Some(having) = &select.having {
            self.expr(having, depth);
        }
    }

    fn table_with_joins(&mut self, table: &TableWithJoins, depth: usize) {
        self.table_factor(&table.relation, depth);
        for join in &table.joins {
            self.table_factor(&join.relation, depth);
        }
    }

    fn table_factor(&mut self, factor: &TableFactor, depth: usize) {
        match factor {
            TableFactor::Table { name, .. } => self.add_table(name),
            TableFactor::Derived { subquery, .. } => self.query(subquery, depth + 1),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins, depth),
            _ => {}
        }
    }

    fn add_table(&mut self, name: &ObjectName) {
        let normalized = object_name(name);
        if name.0.len() == 1 && self.ctes.contains(&normalized.to_lowercase()) {
            return;
        }
        self.tables.insert(normalized);
    }

    fn expr(&mut self, expr: &Expr, depth: usize) {
        match expr {
            Expr::Subquery(query) => self.query(query, depth + 1),
            Expr::Exists { subquery, .. } => self.query(subquery, depth + 1),
            Expr::InSubquery { expr, subquery, .. } => {
                self.expr(expr, depth);
                self.query(subquery, depth + 1);
            }
            Expr::BinaryOp { left, right, .. } => {
                self.expr(left, depth);
                self.expr(right, depth);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr) => self.expr(expr, depth),
            Expr::InList { expr, list, .. } => {
                self.expr(expr, depth);
                for item in list {
                    self.expr(item, depth);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr, depth);
                self.expr(low, depth);
                self.expr(high, depth);
            }
            Expr::Function(function) => self.function(function, depth),
            _ => {}
        }
    }

    fn function(&mut self, function: &Function, depth: usize) {
        match &function.args {
            FunctionArguments::List(list) => {
                for arg in &list.args {
                    if let Some(expr) = function_arg_expr(arg) {
                        self.expr(expr, depth);
                    }
                }
            }
            FunctionArguments::Subquery(query) => self.query(query, depth + 1),
            FunctionArguments::None => {}
        }
    }
}

// =============================================================================
// Column Derivation
// =============================================================================

/// One output expression of a SELECT list.
struct OutputColumn {
    source: String,
    name: Option<String>,
    aggregate: bool,
    expression: Option<String>,
    wildcard: bool,
}

impl OutputColumn {
    fn from_item(item: &SelectItem) -> Self {
        match item {
            SelectItem::UnnamedExpr(expr) => Self::from_expr(expr, None),
            SelectItem::ExprWithAlias { expr, alias } => Self::from_expr(expr, Some(alias)),
            _ => Self {
                source: "*".to_string(),
                name: None,
                aggregate: false,
                expression: None,
                wildcard: true,
            },
        }
    }

    fn from_expr(expr: &Expr, alias: Option<&Ident>) -> Self {
        let expr = unwrap_nested(expr);
        let alias = alias.map(|a| a.value.clone());
        match expr {
            Expr::Identifier(ident) => Self {
                source: ident.value.clone(),
                name: alias.or_else(|| Some(ident.value.clone())),
                aggregate: false,
                expression: None,
                wildcard: false,
            },
            Expr::CompoundIdentifier(parts) => Self {
                source: join_idents(parts),
                name: alias.or_else(|| parts.last().map(|p| p.value.clone())),
                aggregate: false,
                expression: None,
                wildcard: false,
            },
            other => {
                let text = other.to_string();
                Self {
                    source: text.clone(),
                    name: alias,
                    aggregate: is_aggregate(other),
                    expression: Some(text),
                    wildcard: false,
                }
            }
        }
    }

    fn into_mapping(self, target: String) -> ColumnMapping {
        ColumnMapping {
            source_column: self.source,
            target_column: target,
            transformation_type: if self.aggregate {
                TransformationType::Aggregate
            } else {
                TransformationType::PassThrough
            },
            expression: self.expression,
        }
    }
}

/// Output columns of a query body; `None` for bodies without a SELECT list.
fn output_columns(body: &SetExpr) -> Option<Vec<OutputColumn>> {
    match body {
        SetExpr::Select(select) => Some(
            select
                .projection
                .iter()
                .map(OutputColumn::from_item)
                .collect(),
        ),
        SetExpr::Query(query) => output_columns(&query.body),
        SetExpr::SetOperation { left, .. } => output_columns(left),
        _ => None,
    }
}

/// Mappings named by SELECT-list aliases or bare column references.
fn projection_mappings(body: &SetExpr) -> Vec<ColumnMapping> {
    output_columns(body)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|column| {
            let target = column.name.clone()?;
            Some(column.into_mapping(target))
        })
        .collect()
}

/// Pair an INSERT target column list positionally with the SELECT list.
fn pair_insert_columns(
    targets: &[Ident],
    source: &Query,
    warnings: &mut Vec<String>,
) -> Vec<ColumnMapping> {
    let Some(outputs) = output_columns(&source.body) else {
        return Vec::new();
    };
    if targets.is_empty() {
        warnings.push("INSERT has no explicit column list; column lineage skipped".to_string());
        return Vec::new();
    }
    if outputs.iter().any(|o| o.wildcard) {
        warnings.push("INSERT source selects a wildcard; column lineage skipped".to_string());
        return Vec::new();
    }
    if outputs.len() != targets.len() {
        warnings.push(format!(
            "INSERT lists {} target columns but selects {}; column lineage skipped",
            targets.len(),
            outputs.len()
        ));
        return Vec::new();
    }
    outputs
        .into_iter()
        .zip(targets)
        .map(|(output, target)| output.into_mapping(target.value.clone()))
        .collect()
}

// =============================================================================
// Helpers
// =============================================================================

/// Dotted, unquoted form of an object name.
fn object_name(name: &ObjectName) -> String {
    join_idents(&name.0)
}

fn join_idents(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|part| {
            if part.value.contains('.') {
                format!("\"{}\"", part.value)
            } else {
                part.value.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn relation_name(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, .. } => Some(object_name(name)),
        _ => None,
    }
}

fn relation_alias(factor: &TableFactor) -> Option<&str> {
    match factor {
        TableFactor::Table {
            alias: Some(alias), ..
        } => Some(alias.name.value.as_str()),
        _ => None,
    }
}

/// The table a DML target refers to when it is written as an alias
/// (`UPDATE o ... FROM dbo.orders o`).
fn resolve_alias(name: &str, relations: &[&TableFactor]) -> Option<String> {
    relations.iter().find_map(|factor| {
        relation_alias(factor)
            .filter(|alias| alias.eq_ignore_ascii_case(name))
            .and_then(|_| relation_name(factor))
    })
}

/// Whether a FROM item is the DML target itself rather than a source.
fn names_target(factor: &TableFactor, written: Option<&str>) -> bool {
    let Some(written) = written else {
        return false;
    };
    relation_alias(factor).is_some_and(|alias| alias.eq_ignore_ascii_case(written))
        || relation_name(factor).is_some_and(|name| name.eq_ignore_ascii_case(written))
}

/// Target of `SELECT ... INTO new_table`.
fn select_into(query: &Query) -> Option<&ObjectName> {
    match query.body.as_ref() {
        SetExpr::Select(select) => select.into.as_ref().map(|into| &into.name),
        _ => None,
    }
}

fn function_arg_expr(arg: &FunctionArg) -> Option<&Expr> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
        | FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Some(expr),
        _ => None,
    }
}

fn unwrap_nested(mut expr: &Expr) -> &Expr {
    while let Expr::Nested(inner) = expr {
        expr = inner;
    }
    expr
}

fn is_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(function) if function.over.is_none() => function
            .name
            .0
            .last()
            .map(|ident| {
                let name = ident.value.to_uppercase();
                AGGREGATE_FUNCTIONS.contains(&name.as_str())
            })
            .unwrap_or(false),
        _ => false,
    }
}
