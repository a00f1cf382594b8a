use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static BRACKET_TOKEN: LazyLock<Regex> = LazyLock::new(|| compile(r"\[([^\[\]\r\n]+)\]"));
static CALL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b([A-Za-z_][A-Za-z0-9_.]*)\s*\("));
static QUOTED_OR_BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| compile(r"'(?:[^']|'')*'|\[[^\[\]\r\n]*\]"));
static EVALUATE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\bEVALUATE\b"));
static DEFINE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\bDEFINE\b"));
static MEASURE_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\bMEASURE\s+(?:'(?:[^']|'')*'|[A-Za-z0-9_]+)?\s*\[([^\[\]\r\n]+)\]")
});
static FUNCTION_DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\bFUNCTION\s+([A-Za-z_][A-Za-z0-9_.]*)\s*="));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(error) => panic!("invalid built-in pattern `{pattern}`: {error}"),
    }
}

const BUILTIN_CALLS: &[&str] = &[
    "ABS", "ADDCOLUMNS", "ADDMISSINGITEMS", "ALL", "ALLEXCEPT", "ALLNOBLANKROW", "ALLSELECTED",
    "AND", "AVERAGE", "AVERAGEA", "AVERAGEX", "BLANK", "CALCULATE", "CALCULATETABLE", "CEILING",
    "COALESCE", "COMBINEVALUES", "CONCATENATE", "CONCATENATEX", "CONTAINS", "CONTAINSROW",
    "COUNT", "COUNTA", "COUNTAX", "COUNTBLANK", "COUNTROWS", "COUNTX", "CROSSFILTER",
    "CROSSJOIN", "CURRENCY", "DATATABLE", "DATE", "DATEADD", "DATESBETWEEN", "DATESINPERIOD",
    "DATESMTD", "DATESQTD", "DATESYTD", "DATEVALUE", "DAY", "DISTINCT", "DISTINCTCOUNT",
    "DISTINCTCOUNTNOBLANK", "DIVIDE", "EARLIER", "EDATE", "EOMONTH", "EVALUATE", "EXCEPT",
    "FALSE", "FILTER", "FILTERS", "FIRSTDATE", "FIRSTNONBLANK", "FIXED", "FLOOR", "FORMAT",
    "GENERATE", "GENERATEALL", "GENERATESERIES", "GROUPBY", "HASONEFILTER", "HASONEVALUE",
    "IF", "IFERROR", "IN", "INDEX", "INT", "INTERSECT", "ISBLANK", "ISCROSSFILTERED", "ISEMPTY",
    "ISERROR", "ISFILTERED", "ISINSCOPE", "KEEPFILTERS", "LASTDATE", "LASTNONBLANK", "LEFT",
    "LEN", "LOOKUPVALUE", "LOWER", "MAX", "MAXA", "MAXX", "MEDIAN", "MID", "MIN", "MINA", "MINX",
    "MOD", "MONTH", "NATURALINNERJOIN", "NATURALLEFTOUTERJOIN", "NOT", "NOW", "OFFSET", "OR",
    "PARALLELPERIOD", "POWER", "PREVIOUSMONTH", "PREVIOUSYEAR", "PRODUCT", "PRODUCTX", "RANK",
    "RANKX", "RELATED", "RELATEDTABLE", "REMOVEFILTERS", "REPLACE", "RETURN", "RIGHT", "ROUND",
    "ROUNDDOWN", "ROUNDUP", "ROW", "ROWNUMBER", "SAMEPERIODLASTYEAR", "SEARCH", "SELECTCOLUMNS",
    "SELECTEDVALUE", "SIGN", "SQRT", "SUBSTITUTE", "SUM", "SUMMARIZE", "SUMMARIZECOLUMNS",
    "SUMX", "SWITCH", "TODAY", "TOPN", "TOTALMTD", "TOTALQTD", "TOTALYTD", "TREATAS", "TRIM",
    "TRUE", "TRUNC", "UNION", "UPPER", "USERELATIONSHIP", "VALUE", "VALUES", "VAR", "WINDOW",
    "YEAR",
];

/// Lowercased alphanumerics only, so `[Total Sales]`, `Total_Sales` and
/// `'Total-Sales'` share one key.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Blanks string literals and comments while preserving byte offsets and line breaks.
/// Quoted table names and bracketed names are copied through as written.
#[must_use]
pub fn mask_comments_and_strings(text: &str) -> String {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        StringLiteral,
        TableName,
        BracketName,
    }

    let mut masked = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();

    let blank = |masked: &mut String, ch: char| {
        if ch == '\n' || ch == '\r' {
            masked.push(ch);
        } else {
            masked.extend(std::iter::repeat_n(' ', ch.len_utf8()));
        }
    };

    while let Some(ch) = chars.next() {
        match state {
            State::Code => match ch {
                '"' => {
                    state = State::StringLiteral;
                    masked.push(' ');
                }
                '\'' => {
                    state = State::TableName;
                    masked.push(ch);
                }
                '[' => {
                    state = State::BracketName;
                    masked.push(ch);
                }
                '/' if chars.peek() == Some(&'/') => {
                    state = State::LineComment;
                    masked.push(' ');
                }
                '-' if chars.peek() == Some(&'-') => {
                    state = State::LineComment;
                    masked.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                    masked.push_str("  ");
                }
                _ => masked.push(ch),
            },
            State::LineComment => {
                if ch == '\n' {
                    state = State::Code;
                }
                blank(&mut masked, ch);
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                    masked.push_str("  ");
                } else {
                    blank(&mut masked, ch);
                }
            }
            State::StringLiteral => {
                if ch == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        masked.push_str("  ");
                    } else {
                        state = State::Code;
                        masked.push(' ');
                    }
                } else {
                    blank(&mut masked, ch);
                }
            }
            State::TableName | State::BracketName => {
                let close = if state == State::TableName { '\'' } else { ']' };
                masked.push(ch);
                if ch == close {
                    if chars.peek() == Some(&close) {
                        chars.next();
                        masked.push(close);
                    } else {
                        state = State::Code;
                    }
                } else if ch == '\n' || ch == '\r' {
                    state = State::Code;
                }
            }
        }
    }

    masked
}

#[must_use]
pub fn bracket_tokens(masked: &str) -> Vec<String> {
    BRACKET_TOKEN
        .captures_iter(masked)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[must_use]
pub fn call_tokens(masked: &str) -> Vec<String> {
    let without_names = QUOTED_OR_BRACKETED.replace_all(masked, " ");
    CALL_TOKEN
        .captures_iter(&without_names)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .filter(|name| !is_builtin_call(name))
        .collect()
}

#[must_use]
pub fn is_builtin_call(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    BUILTIN_CALLS.binary_search(&upper.as_str()).is_ok()
}

#[must_use]
pub fn first_evaluate_offset(masked: &str) -> Option<usize> {
    EVALUATE_KEYWORD.find(masked).map(|found| found.start())
}

#[must_use]
pub fn define_keyword_end(masked: &str) -> Option<usize> {
    DEFINE_KEYWORD.find(masked).map(|found| found.end())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredNames {
    pub measures: HashSet<String>,
    pub functions: HashSet<String>,
}

#[must_use]
pub fn declared_names(masked: &str) -> DeclaredNames {
    let names = |pattern: &Regex| -> HashSet<String> {
        pattern
            .captures_iter(masked)
            .filter_map(|captures| captures.get(1))
            .map(|name| name.as_str().trim().to_lowercase())
            .collect()
    };
    DeclaredNames {
        measures: names(&*MEASURE_DEFINITION),
        functions: names(&*FUNCTION_DEFINITION),
    }
}
