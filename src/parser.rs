//! The schema parser seam: turns a stored DDL string back into the
//! `(schema, name)` pair `Catalog::open` needs to repopulate its lookup
//! maps (spec.md §4.8 step 2, "instantiate the object by invoking the
//! external parser on `sql`").
//!
//! No grammar lives here. Grounded directly on spec.md §1's framing of
//! the SQL parser as an external collaborator the catalog calls through
//! a seam, not a component this crate implements.

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecl {
    pub schema: Option<String>,
    pub name: String,
}

pub trait SchemaParser: Send + Sync {
    fn parse(&self, sql: &str) -> Result<ParsedDecl, Error>;
}

/// Always fails. Stands in for "no parser wired up yet" so a misconfigured
/// catalog fails loudly at `open()` instead of silently losing names.
pub struct NoopParser;

impl SchemaParser for NoopParser {
    fn parse(&self, _sql: &str) -> Result<ParsedDecl, Error> {
        Err(Error::Unsupported("no schema parser configured".to_string()))
    }
}

/// Test double: treats `sql` as a bare `schema.name` or `name` token
/// instead of real DDL, so catalog tests can exercise `open()`/DDL
/// round-trips without a real SQL grammar.
pub struct CsvSchemaParser;

impl SchemaParser for CsvSchemaParser {
    fn parse(&self, sql: &str) -> Result<ParsedDecl, Error> {
        match sql.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => Ok(ParsedDecl {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            }),
            _ => {
                if sql.is_empty() {
                    return Err(Error::SyntaxError("empty declaration".to_string()));
                }
                Ok(ParsedDecl {
                    schema: None,
                    name: sql.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parser_splits_schema_and_name() {
        let decl = CsvSchemaParser.parse("public.people").unwrap();
        assert_eq!(decl.schema.as_deref(), Some("public"));
        assert_eq!(decl.name, "people");
    }

    #[test]
    fn csv_parser_treats_bare_token_as_unscoped_name() {
        let decl = CsvSchemaParser.parse("people").unwrap();
        assert_eq!(decl.schema, None);
        assert_eq!(decl.name, "people");
    }

    #[test]
    fn csv_parser_rejects_empty_declaration() {
        assert!(CsvSchemaParser.parse("").is_err());
    }

    #[test]
    fn noop_parser_always_fails() {
        assert!(NoopParser.parse("anything").is_err());
    }
}
