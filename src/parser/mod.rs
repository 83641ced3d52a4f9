//! Statement classification for the write path.
//!
//! Every request is either a bufferable row insert (merged with other
//! inserts sharing the same [`InsertSig`]) or a pass-through statement that
//! is forwarded to a backend verbatim. Anything we cannot classify with
//! confidence degrades to pass-through so unusual-but-valid syntax keeps
//! working.

use regex::Regex;
use std::sync::OnceLock;
use url::form_urlencoded;

/// Matches `INSERT INTO <table> [(cols)] (FORMAT <name> | VALUES) <rows...>`.
const INSERT_PATTERN: &str =
    r"(?is)^\s*INSERT\s+INTO\s+([^\s(]+)\s*(\([^)]*\))?\s*(?:FORMAT\s+([A-Za-z][A-Za-z0-9]*)|(VALUES))[ \t]*(.*)$";

fn insert_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(INSERT_PATTERN).expect("insert pattern compiles"))
}

/// How row fragments of one signature are joined into a single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowFormat {
    /// `VALUES (..),(..)` tuples, joined with `,`.
    Values,
    /// Line-oriented formats (`TabSeparated`, `CSV`, `JSONEachRow`, ...),
    /// joined with `\n`.
    Lines,
}

impl RowFormat {
    pub fn separator(self) -> &'static str {
        match self {
            RowFormat::Values => ",",
            RowFormat::Lines => "\n",
        }
    }
}

/// Merge signature of a bufferable insert: two statements with the same
/// signature can have their row payloads joined and sent as one statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsertSig {
    table: String,
    prefix: String,
    params: String,
    format: RowFormat,
}

impl InsertSig {
    /// Destination table as written in the statement.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Normalized statement head, e.g. `INSERT INTO t (a,b) FORMAT CSV`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Pass-through request parameters (the URL query string minus `query`).
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn format(&self) -> RowFormat {
        self.format
    }

    /// Rebuild the full deliverable statement from merged row payloads.
    pub fn assemble(&self, merged_rows: &str) -> String {
        match self.format {
            RowFormat::Values => format!("{} {}", self.prefix, merged_rows),
            RowFormat::Lines => format!("{}\n{}", self.prefix, merged_rows),
        }
    }
}

/// Result of classifying one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuery {
    /// A mergeable row insert: buffer it.
    Insert {
        sig: InsertSig,
        rows: String,
        row_count: usize,
    },
    /// Everything else: forward the original parameters and body one-for-one.
    PassThrough { params: String, body: String },
}

impl ParsedQuery {
    pub fn is_bufferable(&self) -> bool {
        matches!(self, ParsedQuery::Insert { .. })
    }
}

/// Classify a request given its raw URL query string and body.
///
/// The statement text comes from the `query` URL parameter when present
/// (the body then carries the row data), otherwise from the body itself.
pub fn parse_query(target: &str, body: &str) -> ParsedQuery {
    let (url_statement, params) = split_query_param(target);

    let pass_through = || ParsedQuery::PassThrough {
        params: target.to_string(),
        body: body.to_string(),
    };

    let statement = match &url_statement {
        Some(q) => q.as_str(),
        None => body,
    };

    let Some(caps) = insert_regex().captures(statement) else {
        return pass_through();
    };

    let table = caps[1].to_string();
    let cols = caps
        .get(2)
        .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect::<String>());
    let (format, clause) = match caps.get(3) {
        Some(name) => (RowFormat::Lines, format!("FORMAT {}", name.as_str())),
        None => (RowFormat::Values, "VALUES".to_string()),
    };

    let tail = caps.get(5).map_or("", |m| m.as_str());
    // Data sent in the body wins over anything inlined after the clause.
    let raw_rows = if url_statement.is_some() && !body.trim().is_empty() {
        body
    } else {
        tail
    };
    let rows = normalize_rows(raw_rows, format);
    if rows.is_empty() {
        return pass_through();
    }

    let row_count = match format {
        RowFormat::Lines => rows.lines().filter(|l| !l.trim().is_empty()).count(),
        RowFormat::Values => count_values_tuples(&rows),
    };
    if row_count == 0 {
        return pass_through();
    }

    let prefix = match cols {
        Some(cols) => format!("INSERT INTO {table} {cols} {clause}"),
        None => format!("INSERT INTO {table} {clause}"),
    };

    ParsedQuery::Insert {
        sig: InsertSig {
            table,
            prefix,
            params,
            format,
        },
        rows,
        row_count,
    }
}

/// Extract the percent-decoded `query` parameter and re-encode the rest.
fn split_query_param(target: &str) -> (Option<String>, String) {
    let mut statement = None;
    let mut rest = form_urlencoded::Serializer::new(String::new());
    let mut has_rest = false;

    for (key, value) in form_urlencoded::parse(target.as_bytes()) {
        if key == "query" {
            statement = Some(value.into_owned());
        } else {
            rest.append_pair(&key, &value);
            has_rest = true;
        }
    }

    let params = if has_rest { rest.finish() } else { String::new() };
    (statement, params)
}

fn normalize_rows(raw: &str, format: RowFormat) -> String {
    match format {
        RowFormat::Lines => raw.trim_matches(['\n', '\r']).to_string(),
        RowFormat::Values => raw.trim().trim_end_matches(';').trim_end().to_string(),
    }
}

/// Count top-level `(..)` tuples in a VALUES payload.
///
/// Understands single-quoted strings with `''` and backslash escapes, so
/// parentheses inside string literals do not affect the count.
fn count_values_tuples(rows: &str) -> usize {
    let mut count = 0;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = rows.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '\'' => {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                    } else {
                        in_string = false;
                    }
                }
                _ => {}
            }
        } else {
            match c {
                '\'' => in_string = true,
                '(' => {
                    if depth == 0 {
                        count += 1;
                    }
                    depth += 1;
                }
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_insert(parsed: ParsedQuery) -> (InsertSig, String, usize) {
        match parsed {
            ParsedQuery::Insert {
                sig,
                rows,
                row_count,
            } => (sig, rows, row_count),
            ParsedQuery::PassThrough { .. } => panic!("expected insert, got pass-through"),
        }
    }

    #[test]
    fn values_insert_in_body_is_bufferable() {
        let parsed = parse_query("", "INSERT INTO metrics (a, b) VALUES (1, 2), (3, 4)");
        let (sig, rows, row_count) = expect_insert(parsed);

        assert_eq!(sig.table(), "metrics");
        assert_eq!(sig.prefix(), "INSERT INTO metrics (a,b) VALUES");
        assert_eq!(sig.format(), RowFormat::Values);
        assert_eq!(rows, "(1, 2), (3, 4)");
        assert_eq!(row_count, 2);
    }

    #[test]
    fn format_insert_in_body_is_bufferable() {
        let parsed = parse_query("", "INSERT INTO logs FORMAT TabSeparated\n1\ta\n2\tb\n");
        let (sig, rows, row_count) = expect_insert(parsed);

        assert_eq!(sig.prefix(), "INSERT INTO logs FORMAT TabSeparated");
        assert_eq!(sig.format(), RowFormat::Lines);
        assert_eq!(rows, "1\ta\n2\tb");
        assert_eq!(row_count, 2);
    }

    #[test]
    fn statement_in_url_with_body_payload() {
        let target = "database=prod&query=INSERT%20INTO%20t%20FORMAT%20CSV";
        let parsed = parse_query(target, "1,a\n2,b");
        let (sig, rows, row_count) = expect_insert(parsed);

        assert_eq!(sig.prefix(), "INSERT INTO t FORMAT CSV");
        assert_eq!(sig.params(), "database=prod");
        assert_eq!(rows, "1,a\n2,b");
        assert_eq!(row_count, 2);
    }

    #[test]
    fn identical_statements_share_a_signature() {
        let a = parse_query("", "INSERT INTO t (x) VALUES (1)");
        let b = parse_query("", "insert into t (x) values (2)");
        let (sig_a, _, _) = expect_insert(a);
        let (sig_b, _, _) = expect_insert(b);
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn column_list_whitespace_does_not_split_signatures() {
        let (sig_a, _, _) = expect_insert(parse_query("", "INSERT INTO t (a,b) VALUES (1,2)"));
        let (sig_b, _, _) = expect_insert(parse_query("", "INSERT INTO t (a, b) VALUES (3,4)"));
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn select_is_pass_through() {
        let parsed = parse_query("", "SELECT count() FROM metrics");
        assert!(!parsed.is_bufferable());
    }

    #[test]
    fn ddl_is_pass_through() {
        let parsed = parse_query("", "CREATE TABLE t (a UInt64) ENGINE = Memory");
        assert!(!parsed.is_bufferable());
    }

    #[test]
    fn insert_without_parseable_clause_is_pass_through() {
        // INSERT ... SELECT has no row payload to merge.
        let parsed = parse_query("", "INSERT INTO t SELECT * FROM other");
        assert!(!parsed.is_bufferable());
    }

    #[test]
    fn insert_without_rows_is_pass_through() {
        let parsed = parse_query("query=INSERT%20INTO%20t%20FORMAT%20CSV", "");
        assert!(!parsed.is_bufferable());
    }

    #[test]
    fn pass_through_keeps_original_params_and_body() {
        let target = "database=prod&query=SELECT%201";
        let parsed = parse_query(target, "");
        match parsed {
            ParsedQuery::PassThrough { params, body } => {
                assert_eq!(params, target);
                assert_eq!(body, "");
            }
            ParsedQuery::Insert { .. } => panic!("expected pass-through"),
        }
    }

    #[test]
    fn values_payload_with_trailing_semicolon() {
        let (_, rows, row_count) = expect_insert(parse_query("", "INSERT INTO t VALUES (1),(2);"));
        assert_eq!(rows, "(1),(2)");
        assert_eq!(row_count, 2);
    }

    #[test]
    fn tuple_counting_ignores_parens_inside_strings() {
        assert_eq!(count_values_tuples("(1, 'a(b)c'), (2, 'd')"), 2);
        assert_eq!(count_values_tuples(r"(1, 'it\'s'), (2, 'fine')"), 2);
        assert_eq!(count_values_tuples("(1, 'two''quotes'), (2, 'x')"), 2);
        assert_eq!(count_values_tuples("(1, (2, 3)), (4, (5, 6))"), 2);
    }

    #[test]
    fn assemble_rebuilds_full_statement() {
        let (sig, rows, _) = expect_insert(parse_query("", "INSERT INTO t (a) VALUES (1)"));
        assert_eq!(sig.assemble(&rows), "INSERT INTO t (a) VALUES (1)");

        let (sig, rows, _) = expect_insert(parse_query("", "INSERT INTO t FORMAT CSV\n1,a"));
        assert_eq!(sig.assemble(&rows), "INSERT INTO t FORMAT CSV\n1,a");
    }
}
