//! Type mapping between SQLite declared types and MySQL column types.
//!
//! SQLite accepts any string as a declared type and decorates base keywords
//! with length or precision suffixes, so rules match by substring. A type
//! string can contain several keywords (`BIGINT` contains `INT`), which makes
//! the rule order significant: more specific keywords come first.

/// What a matching rule produces.
#[derive(Debug, Clone, Copy)]
enum RuleTarget {
    /// A fixed MySQL type.
    Fixed(&'static str),
    /// `DECIMAL(p,s)` from the source qualifier, else `DECIMAL(10,5)`.
    Decimal,
    /// `CHAR(n)` from the source qualifier, else `CHAR(255)`.
    Char,
}

/// Ordered (keyword, target) pairs, checked top to bottom.
const TYPE_RULES: &[(&str, RuleTarget)] = &[
    ("UNSIGNED BIG INT", RuleTarget::Fixed("BIGINT UNSIGNED")),
    ("BIGINT", RuleTarget::Fixed("BIGINT")),
    ("INT8", RuleTarget::Fixed("BIGINT")),
    ("MEDIUMINT", RuleTarget::Fixed("MEDIUMINT")),
    ("SMALLINT", RuleTarget::Fixed("SMALLINT")),
    ("INT2", RuleTarget::Fixed("SMALLINT")),
    ("TINYINT", RuleTarget::Fixed("TINYINT")),
    ("INT", RuleTarget::Fixed("INT")),
    ("TEXT", RuleTarget::Fixed("LONGTEXT")),
    ("CLOB", RuleTarget::Fixed("LONGTEXT")),
    ("BLOB", RuleTarget::Fixed("LONGBLOB")),
    ("DOUBLE", RuleTarget::Fixed("DOUBLE")),
    ("REAL", RuleTarget::Fixed("DOUBLE")),
    ("FLOAT", RuleTarget::Fixed("FLOAT")),
    ("NUMERIC", RuleTarget::Decimal),
    ("DECIMAL", RuleTarget::Decimal),
    ("BOOL", RuleTarget::Fixed("BOOLEAN")),
    ("DATETIME", RuleTarget::Fixed("DATETIME")),
    ("TIMESTAMP", RuleTarget::Fixed("DATETIME")),
    ("DATE", RuleTarget::Fixed("DATE")),
    ("CHAR", RuleTarget::Char),
];

/// Most permissive MySQL text type, used when nothing matches.
pub const FALLBACK_TYPE: &str = "LONGTEXT";

/// Default scale when the source declares no usable `(p,s)` qualifier.
const DEFAULT_DECIMAL: &str = "DECIMAL(10,5)";

/// Map a SQLite declared type to a MySQL column type.
///
/// Total and deterministic: every input takes exactly one path, the VARCHAR
/// special case, the first matching rule, or the fallback.
pub fn map_type(source_type: &str) -> String {
    let normalized = source_type.trim().to_uppercase();

    if normalized.contains("VARCHAR") {
        if normalized.contains('(') {
            return normalized;
        }
        return "VARCHAR(255)".to_string();
    }

    for (keyword, target) in TYPE_RULES {
        if normalized.contains(keyword) {
            return match target {
                RuleTarget::Fixed(t) => t.to_string(),
                RuleTarget::Decimal => decimal_type(&normalized),
                RuleTarget::Char => char_type(&normalized),
            };
        }
    }

    FALLBACK_TYPE.to_string()
}

/// Whether a mapped MySQL type is in the integer family.
pub fn is_integer_type(mysql_type: &str) -> bool {
    mysql_type.to_uppercase().contains("INT")
}

/// Whether a mapped MySQL type is a LOB, which MySQL restricts in defaults and
/// needs a prefix length to index.
pub fn is_lob_type(mysql_type: &str) -> bool {
    let upper = mysql_type.to_uppercase();
    upper.contains("TEXT") || upper.contains("BLOB")
}

/// Whether a mapped MySQL type accepts `DEFAULT CURRENT_TIMESTAMP`.
pub fn is_timestamp_type(mysql_type: &str) -> bool {
    let upper = mysql_type.to_uppercase();
    upper.starts_with("DATETIME") || upper.starts_with("TIMESTAMP")
}

/// Parse a `(a)` or `(a,b)` qualifier from a type string.
fn qualifier(normalized: &str) -> Option<Vec<u32>> {
    let start = normalized.find('(')?;
    let end = normalized[start..].find(')')? + start;
    normalized[start + 1..end]
        .split(',')
        .map(|part| part.trim().parse::<u32>().ok())
        .collect()
}

fn decimal_type(normalized: &str) -> String {
    match qualifier(normalized).as_deref() {
        // MySQL limits: precision 1..=65, scale <= 30 and <= precision
        Some([p, s]) if (1..=65).contains(p) && *s <= 30 && s <= p => {
            format!("DECIMAL({},{})", p, s)
        }
        _ => DEFAULT_DECIMAL.to_string(),
    }
}

fn char_type(normalized: &str) -> String {
    match qualifier(normalized).as_deref() {
        Some([n]) if (1..=255).contains(n) => format!("CHAR({})", n),
        _ => "CHAR(255)".to_string(),
    }
}
