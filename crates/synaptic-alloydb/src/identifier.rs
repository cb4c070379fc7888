use crate::AlloyDbError;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate that an identifier is safe to interpolate into SQL.
///
/// Allows ASCII alphanumerics and underscores, must not start with a digit
/// and must fit in PostgreSQL's identifier length. `kind` names the
/// identifier in the error (`"table"`, `"column"`, ...).
pub fn validate_identifier(kind: &'static str, name: &str) -> Result<(), AlloyDbError> {
    let invalid = |reason: &str| AlloyDbError::InvalidIdentifier {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("longer than 63 bytes"));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("must not start with a digit"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(
            "only alphanumeric and underscore characters are allowed",
        ));
    }
    Ok(())
}

/// Quote a validated identifier.
///
/// Validation already rules out `"`, but embedded quotes are still doubled
/// so the output is well formed for any input.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a `schema.name` pair.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote(schema), quote(name))
}

/// Validate a column data type used in `CREATE TABLE`, e.g. `UUID`,
/// `VARCHAR(36)` or `NUMERIC(10, 2)`.
pub fn validate_data_type(name: &str) -> Result<(), AlloyDbError> {
    let ok = !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','));
    if ok {
        Ok(())
    } else {
        Err(AlloyDbError::InvalidIdentifier {
            kind: "data type",
            name: name.to_string(),
            reason: "only alphanumeric, underscore, space, parenthesis and comma characters are allowed"
                .to_string(),
        })
    }
}
