use std::fmt;

use chrono::{DateTime, Utc};
use tidemark_common::record::{IS_DELETED_FIELD, LAST_MODIFIED_FIELD};

/// SOQL datetime literal format (unquoted, UTC).
const SOQL_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query has no {0} clause")]
    MissingClause(&'static str),

    #[error("query repeats the {0} clause")]
    DuplicateClause(&'static str),

    #[error("invalid {clause} value: {value}")]
    InvalidNumber { clause: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Select,
    From,
    UsingScope,
    Where,
    With,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
    For,
}

impl Clause {
    fn keyword(self) -> &'static str {
        match self {
            Clause::Select => "SELECT",
            Clause::From => "FROM",
            Clause::UsingScope => "USING SCOPE",
            Clause::Where => "WHERE",
            Clause::With => "WITH",
            Clause::GroupBy => "GROUP BY",
            Clause::Having => "HAVING",
            Clause::OrderBy => "ORDER BY",
            Clause::Limit => "LIMIT",
            Clause::Offset => "OFFSET",
            Clause::For => "FOR",
        }
    }
}

/// Comparison operators recognised in simple filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Filter expression of a `WHERE` clause.
///
/// Caller conditions that are not simple comparisons are kept verbatim as
/// `Raw`; conjunctions are flattened into `And`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Raw(String),
    Compare {
        field: String,
        op: CompareOp,
        value: String,
    },
    And(Vec<Filter>),
}

impl Filter {
    /// `LastModifiedDate > <watermark>`.
    pub fn modified_after(watermark: DateTime<Utc>) -> Self {
        Filter::Compare {
            field: LAST_MODIFIED_FIELD.to_string(),
            op: CompareOp::Gt,
            value: watermark.format(SOQL_DATETIME_FORMAT).to_string(),
        }
    }

    fn parse(text: &str) -> Self {
        let text = text.trim();
        if has_top_level_word(text, "OR") {
            return Filter::Raw(text.to_string());
        }

        let mut conjuncts: Vec<Filter> = split_top_level_word(text, "AND")
            .into_iter()
            .map(Self::parse_condition)
            .collect();

        if conjuncts.len() == 1 {
            conjuncts.remove(0)
        } else {
            Filter::And(conjuncts)
        }
    }

    fn parse_condition(text: &str) -> Self {
        let tokens = split_top_level_whitespace(text);
        if let [field, op, value] = tokens.as_slice() {
            if let Some(op) = CompareOp::parse(op) {
                if is_field_path(field) {
                    return Filter::Compare {
                        field: field.to_string(),
                        op,
                        value: value.to_string(),
                    };
                }
            }
        }
        Filter::Raw(text.trim().to_string())
    }

    fn conjuncts(&self) -> Vec<&Filter> {
        match self {
            Filter::And(children) => children.iter().collect(),
            other => vec![other],
        }
    }

    fn same_condition(&self, other: &Filter) -> bool {
        match (self, other) {
            (
                Filter::Compare { field, op, value },
                Filter::Compare {
                    field: other_field,
                    op: other_op,
                    value: other_value,
                },
            ) => field.eq_ignore_ascii_case(other_field) && op == other_op && value == other_value,
            _ => self == other,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Raw(text) => f.write_str(text),
            Filter::Compare { field, op, value } => write!(f, "{field} {} {value}", op.as_str()),
            Filter::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    match child {
                        Filter::Raw(text) if has_top_level_word(text, "OR") => {
                            write!(f, "({text})")?
                        }
                        other => write!(f, "{other}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Structured SOQL query: projection, source object, filter tree and limit.
///
/// Clauses the sync never touches (`WITH`, `GROUP BY`, `ORDER BY`, ...) are
/// carried through verbatim in their original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoqlQuery {
    fields: Vec<String>,
    from: String,
    scope: Option<String>,
    filter: Option<Filter>,
    modifiers: Vec<(Clause, String)>,
    limit: Option<u64>,
    offset: Option<u64>,
    for_clause: Option<String>,
}

impl SoqlQuery {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let text = text.trim();
        let words = top_level_words(text);

        let mut marks: Vec<(Clause, usize, usize)> = Vec::new();
        let mut i = 0;
        while i < words.len() {
            let word = &words[i];
            let next = words.get(i + 1).map(|w| w.text.to_ascii_uppercase());
            let upper = word.text.to_ascii_uppercase();
            let seen_from = marks.iter().any(|(c, _, _)| *c == Clause::From);

            let found = match upper.as_str() {
                "SELECT" if marks.is_empty() => Some((Clause::Select, word.end, 1)),
                "FROM" if !marks.is_empty() && !seen_from => Some((Clause::From, word.end, 1)),
                _ if !seen_from => None,
                "USING" if next.as_deref() == Some("SCOPE") => {
                    Some((Clause::UsingScope, words[i + 1].end, 2))
                }
                "WHERE" => Some((Clause::Where, word.end, 1)),
                "WITH" => Some((Clause::With, word.end, 1)),
                "GROUP" if next.as_deref() == Some("BY") => {
                    Some((Clause::GroupBy, words[i + 1].end, 2))
                }
                "HAVING" => Some((Clause::Having, word.end, 1)),
                "ORDER" if next.as_deref() == Some("BY") => {
                    Some((Clause::OrderBy, words[i + 1].end, 2))
                }
                "LIMIT" => Some((Clause::Limit, word.end, 1)),
                "OFFSET" => Some((Clause::Offset, word.end, 1)),
                "FOR" => Some((Clause::For, word.end, 1)),
                _ => None,
            };

            match found {
                Some((clause, body_start, consumed)) => {
                    if marks.iter().any(|(c, _, _)| *c == clause) {
                        return Err(QueryError::DuplicateClause(clause.keyword()));
                    }
                    marks.push((clause, word.start, body_start));
                    i += consumed;
                }
                None => i += 1,
            }
        }

        let mut fields = None;
        let mut from = None;
        let mut query = SoqlQuery {
            fields: Vec::new(),
            from: String::new(),
            scope: None,
            filter: None,
            modifiers: Vec::new(),
            limit: None,
            offset: None,
            for_clause: None,
        };

        for (index, (clause, _, _)) in marks.iter().enumerate() {
            let text = clause_body(text, &marks, index);
            match clause {
                Clause::Select => {
                    fields = Some(
                        split_top_level_commas(text)
                            .into_iter()
                            .filter(|f| !f.is_empty())
                            .map(str::to_string)
                            .collect::<Vec<_>>(),
                    )
                }
                Clause::From => from = Some(text.to_string()),
                Clause::UsingScope => query.scope = Some(text.to_string()),
                Clause::Where => query.filter = Some(Filter::parse(text)),
                Clause::Limit => query.limit = Some(parse_number("LIMIT", text)?),
                Clause::Offset => query.offset = Some(parse_number("OFFSET", text)?),
                Clause::For => query.for_clause = Some(text.to_string()),
                other => query.modifiers.push((*other, text.to_string())),
            }
        }

        query.fields = fields
            .filter(|f| !f.is_empty())
            .ok_or(QueryError::MissingClause("SELECT"))?;
        query.from = from
            .filter(|f| !f.is_empty())
            .ok_or(QueryError::MissingClause("FROM"))?;

        Ok(query)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.eq_ignore_ascii_case(field))
    }

    /// Append `field` to the projection unless already selected.
    pub fn ensure_field(&mut self, field: &str) {
        if !self.has_field(field) {
            self.fields.push(field.to_string());
        }
    }

    /// Conjoin `condition` with the existing filter unless it is already one
    /// of its conjuncts.
    pub fn and_filter(&mut self, condition: Filter) {
        self.filter = match self.filter.take() {
            None => Some(condition),
            Some(existing) => {
                if existing
                    .conjuncts()
                    .iter()
                    .any(|c| c.same_condition(&condition))
                {
                    Some(existing)
                } else {
                    let mut children = match existing {
                        Filter::And(children) => children,
                        other => vec![other],
                    };
                    children.push(condition);
                    Some(Filter::And(children))
                }
            }
        };
    }
}

impl fmt::Display for SoqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.fields.join(", "), self.from)?;
        if let Some(scope) = &self.scope {
            write!(f, " USING SCOPE {scope}")?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        for (clause, text) in &self.modifiers {
            write!(f, " {} {text}", clause.keyword())?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        if let Some(for_clause) = &self.for_clause {
            write!(f, " FOR {for_clause}")?;
        }
        Ok(())
    }
}

/// Build the query for one incremental sync pass.
///
/// Ensures the soft-delete flag and the modification timestamp are selected and,
/// when a watermark exists, restricts the result to records modified after it.
/// Deterministic and idempotent for identical inputs.
pub fn build_incremental_query(
    base: &str,
    watermark: Option<DateTime<Utc>>,
) -> Result<SoqlQuery, QueryError> {
    let mut query = SoqlQuery::parse(base)?;
    query.ensure_field(IS_DELETED_FIELD);
    query.ensure_field(LAST_MODIFIED_FIELD);
    if let Some(watermark) = watermark {
        query.and_filter(Filter::modified_after(watermark));
    }
    Ok(query)
}

/// Text between a clause keyword and the start of the next clause.
fn clause_body<'a>(text: &'a str, marks: &[(Clause, usize, usize)], index: usize) -> &'a str {
    let (_, _, start) = marks[index];
    let end = marks.get(index + 1).map(|m| m.1).unwrap_or(text.len());
    text[start..end].trim()
}

fn parse_number(clause: &'static str, text: &str) -> Result<u64, QueryError> {
    text.parse().map_err(|_| QueryError::InvalidNumber {
        clause,
        value: text.to_string(),
    })
}

fn is_field_path(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// A word at nesting depth zero, outside string literals.
struct Word<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

/// Walk `text` yielding, for each char, whether it sits at depth zero outside
/// a string literal. Quotes and parentheses themselves report `false`.
fn top_level_mask(text: &str) -> Vec<(usize, char, bool)> {
    let mut out = Vec::with_capacity(text.len());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '\'' {
                in_string = false;
            }
            out.push((i, c, false));
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                out.push((i, c, false));
            }
            '(' => {
                depth += 1;
                out.push((i, c, false));
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push((i, c, false));
            }
            _ => out.push((i, c, depth == 0)),
        }
    }
    out
}

fn top_level_words(text: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c, top) in top_level_mask(text) {
        let is_word = top && (c.is_ascii_alphanumeric() || c == '_' || c == '.');
        match (is_word, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                words.push(Word {
                    text: &text[s..i],
                    start: s,
                    end: i,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push(Word {
            text: &text[s..],
            start: s,
            end: text.len(),
        });
    }
    words
}

fn has_top_level_word(text: &str, keyword: &str) -> bool {
    top_level_words(text)
        .iter()
        .any(|w| w.text.eq_ignore_ascii_case(keyword))
}

fn split_top_level_word<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for word in top_level_words(text) {
        if word.text.eq_ignore_ascii_case(keyword) {
            parts.push(text[last..word.start].trim());
            last = word.end;
        }
    }
    parts.push(text[last..].trim());
    parts
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for (i, c, top) in top_level_mask(text) {
        if top && c == ',' {
            parts.push(text[last..i].trim());
            last = i + 1;
        }
    }
    parts.push(text[last..].trim());
    parts
}

fn split_top_level_whitespace(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c, top) in top_level_mask(text) {
        let separator = top && c.is_whitespace();
        match (separator, start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                parts.push(&text[s..i]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        parts.push(&text[s..]);
    }
    parts
}
