//! Parameterized row filters and sort orders
//!
//! Filters are composed structurally and compiled to a `WHERE` clause with
//! positional `?` placeholders plus the matching parameter list. Column
//! names are checked against the collection before any SQL is produced.

use crate::record::{Collection, ID};
use crate::value::Value;
use crate::{Error, Result};

/// Comparison operator for a column predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

/// A row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    In {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Caller-supplied clause with positional `?` placeholders.
    ///
    /// The clause is trusted SQL; only `params` carry user data. It must be a
    /// single self-contained expression: parentheses balanced outside quotes,
    /// no `;` and no comments. It is always parenthesized when combined with
    /// other predicates.
    Sql { clause: String, params: Vec<Value> },
}

impl Filter {
    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(column, CompareOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Filter::IsNotNull(column.into())
    }

    pub fn in_values<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Row id predicate used to narrow item-level identifiers
    pub fn id(id: i64) -> Self {
        Self::eq(ID, id)
    }

    pub fn sql<V: Into<Value>>(clause: impl Into<String>, params: impl IntoIterator<Item = V>) -> Self {
        Filter::Sql {
            clause: clause.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// AND an optional filter after `self`
    pub fn and_then(self, other: Option<Filter>) -> Self {
        match other {
            Some(other) => self.and(other),
            None => self,
        }
    }

    /// Compile against a collection's declared columns
    pub fn compile(&self, collection: Collection) -> Result<Selection> {
        let mut selection = Selection::default();
        self.write(collection, &mut selection)?;
        Ok(selection)
    }

    fn write(&self, collection: Collection, out: &mut Selection) -> Result<()> {
        match self {
            Filter::Compare { column, op, value } => {
                let column = collection.column(column)?;
                out.clause.push_str(&format!("{} {} ?", column.name, op.as_sql()));
                out.params.push(value.clone());
            }
            Filter::IsNull(column) => {
                let column = collection.column(column)?;
                out.clause.push_str(&format!("{} IS NULL", column.name));
            }
            Filter::IsNotNull(column) => {
                let column = collection.column(column)?;
                out.clause.push_str(&format!("{} IS NOT NULL", column.name));
            }
            Filter::In { column, values } => {
                let column = collection.column(column)?;
                if values.is_empty() {
                    out.clause.push('0');
                } else {
                    let marks = vec!["?"; values.len()].join(", ");
                    out.clause.push_str(&format!("{} IN ({})", column.name, marks));
                    out.params.extend(values.iter().cloned());
                }
            }
            Filter::And(parts) => write_joined(parts, " AND ", "1", collection, out)?,
            Filter::Or(parts) => write_joined(parts, " OR ", "0", collection, out)?,
            Filter::Not(inner) => {
                out.clause.push_str("NOT (");
                inner.write(collection, out)?;
                out.clause.push(')');
            }
            Filter::Sql { clause, params } => {
                check_clause(clause)?;
                out.clause.push('(');
                out.clause.push_str(clause);
                out.clause.push(')');
                out.params.extend(params.iter().cloned());
            }
        }
        Ok(())
    }
}

/// Reject clauses that could reach outside their own parentheses
fn check_clause(clause: &str) -> Result<()> {
    let invalid = |why: &str| Err(Error::InvalidFilter(format!("{} in '{}'", why, clause)));
    if clause.trim().is_empty() {
        return invalid("empty clause");
    }

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = clause.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return invalid("unbalanced ')'");
                }
                depth -= 1;
            }
            ';' => return invalid("statement separator"),
            '-' if chars.peek() == Some(&'-') => return invalid("comment"),
            '/' if chars.peek() == Some(&'*') => return invalid("comment"),
            _ => {}
        }
    }

    if quote.is_some() {
        return invalid("unterminated quote");
    }
    if depth > 0 {
        return invalid("unbalanced '('");
    }
    Ok(())
}

fn write_joined(
    parts: &[Filter],
    separator: &str,
    empty: &str,
    collection: Collection,
    out: &mut Selection,
) -> Result<()> {
    if parts.is_empty() {
        out.clause.push_str(empty);
        return Ok(());
    }
    out.clause.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.clause.push_str(separator);
        }
        part.write(collection, out)?;
    }
    out.clause.push(')');
    Ok(())
}

/// A compiled `WHERE` clause and its parameters, in placeholder order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub clause: String,
    pub params: Vec<Value>,
}

impl Selection {
    /// ` WHERE <clause>` or nothing
    pub fn where_sql(&self) -> String {
        if self.clause.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clause)
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

/// Ordered list of sort keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOrder {
    keys: Vec<SortKey>,
}

impl SortOrder {
    pub fn asc(column: impl Into<String>) -> Self {
        Self::default().then_asc(column)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::default().then_desc(column)
    }

    pub fn then_asc(mut self, column: impl Into<String>) -> Self {
        self.keys.push(SortKey { column: column.into(), descending: false });
        self
    }

    pub fn then_desc(mut self, column: impl Into<String>) -> Self {
        self.keys.push(SortKey { column: column.into(), descending: true });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parse `"title DESC, _id"` style orders
    pub fn parse(text: &str) -> Result<Self> {
        let mut order = Self::default();
        for term in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut words = term.split_whitespace();
            let column = words
                .next()
                .ok_or_else(|| Error::InvalidSortOrder(text.to_string()))?;
            let descending = match words.next().map(str::to_ascii_uppercase).as_deref() {
                None | Some("ASC") => false,
                Some("DESC") => true,
                Some(_) => return Err(Error::InvalidSortOrder(text.to_string())),
            };
            if words.next().is_some() {
                return Err(Error::InvalidSortOrder(text.to_string()));
            }
            order.keys.push(SortKey { column: column.to_string(), descending });
        }
        Ok(order)
    }

    /// Validate against the collection and end with `_id` so that every
    /// row has a distinct position
    pub fn resolve(&self, collection: Collection) -> Result<Vec<OrderKey>> {
        let mut keys = Vec::with_capacity(self.keys.len() + 1);
        for key in &self.keys {
            let column = collection.column(&key.column)?;
            keys.push(OrderKey {
                column: column.name,
                descending: key.descending,
            });
        }
        if !keys.iter().any(|k| k.column == ID) {
            keys.push(OrderKey { column: ID, descending: false });
        }
        Ok(keys)
    }

    /// `ORDER BY` body, validated against the collection
    pub fn to_sql(&self, collection: Collection) -> Result<String> {
        Ok(order_by(&self.resolve(collection)?))
    }
}

/// A sort key checked against a collection's columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub column: &'static str,
    pub descending: bool,
}

impl OrderKey {
    /// Predicate for rows strictly after `value` in this key's direction.
    ///
    /// NULL sorts first ascending and last descending. Returns false when no
    /// row can follow.
    fn after(&self, value: &Value, out: &mut Selection) -> bool {
        let col = self.column;
        match (self.descending, value) {
            (false, Value::Null) => out.clause.push_str(&format!("{} IS NOT NULL", col)),
            (false, v) => {
                out.clause.push_str(&format!("{} > ?", col));
                out.params.push(v.clone());
            }
            (true, Value::Null) => return false,
            (true, v) => {
                out.clause.push_str(&format!("({} < ? OR {} IS NULL)", col, col));
                out.params.push(v.clone());
            }
        }
        true
    }
}

/// Render resolved keys as an `ORDER BY` body
pub fn order_by(keys: &[OrderKey]) -> String {
    keys.iter()
        .map(|k| format!("{} {}", k.column, if k.descending { "DESC" } else { "ASC" }))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rows strictly after the position `last` under `keys`.
///
/// `last` holds one value per key. Expands to
/// `k1 > v1 OR (k1 IS v1 AND k2 > v2) OR ...`.
pub fn keyset_after(keys: &[OrderKey], last: &[Value]) -> Selection {
    let mut out = Selection::default();
    let mut terms = 0;
    out.clause.push('(');
    for (i, key) in keys.iter().enumerate() {
        let mut term = Selection::default();
        for (prev, value) in keys[..i].iter().zip(last) {
            term.clause.push_str(&format!("{} IS ? AND ", prev.column));
            term.params.push(value.clone());
        }
        if !key.after(&last[i], &mut term) {
            continue;
        }
        if terms > 0 {
            out.clause.push_str(" OR ");
        }
        out.clause.push('(');
        out.clause.push_str(&term.clause);
        out.clause.push(')');
        out.params.extend(term.params);
        terms += 1;
    }
    if terms == 0 {
        return Selection { clause: "0".to_string(), params: Vec::new() };
    }
    out.clause.push(')');
    out
}
