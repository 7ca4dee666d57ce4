//! Recursive-descent parser for the CREATE statement surface.
//!
//! Besides building the meta tree, the parser records the role of every
//! name token it sees (schema qualifier, statement name, table reference,
//! column reference with its owning relation) so renames can be applied
//! as a byte splice over the original text, and collects the referenced
//! table/view names per statement kind: foreign-key targets for tables,
//! the target table plus WHERE references for indexes, body and WHEN
//! relations for triggers (OLD/NEW excluded), FROM/JOIN relations for
//! views.

use std::collections::HashSet;

use crate::ast::*;
use crate::error::GrammarError;
use crate::quoting::{is_reserved, unquote};
use crate::token::{Token, TokenKind, Tokenized, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NameRole {
    Schema,
    StatementName,
    TableRef,
    ColumnRef { owner: String },
}

#[derive(Debug)]
pub(crate) struct ParseDetail<'a> {
    pub tz: Tokenized<'a>,
    pub roles: Vec<(usize, NameRole)>,
    pub statement: Statement,
}

pub(crate) fn parse_statement(sql: &str) -> Result<ParseDetail<'_>, GrammarError> {
    let tz = tokenize(sql)?;
    let mut parser = Parser {
        tz: &tz,
        pos: 0,
        kind: StatementKind::Table,
        roles: Vec::new(),
        tables: Vec::new(),
        relation_tokens: HashSet::new(),
        trigger_table: None,
    };
    let statement = parser.parse()?;
    let roles = std::mem::take(&mut parser.roles);
    Ok(ParseDetail { tz, roles, statement })
}

/// Keywords that end a SELECT's FROM-clause relation list.
const FROM_STOP: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
];

/// Keywords that may glue further relations inside a FROM clause.
const JOIN_WORDS: &[&str] = &["JOIN", "LEFT", "RIGHT", "FULL", "INNER", "OUTER", "CROSS", "NATURAL"];

/// Words that terminate a column's type specification.
const TYPE_STOP: &[&str] = &[
    "CONSTRAINT", "PRIMARY", "NOT", "NULL", "UNIQUE", "DEFAULT", "CHECK", "COLLATE",
    "REFERENCES", "GENERATED",
];

struct Parser<'a> {
    tz: &'a Tokenized<'a>,
    pos: usize,
    kind: StatementKind,
    roles: Vec<(usize, NameRole)>,
    tables: Vec<String>,
    /// Token indices already consumed as FROM-clause relation names.
    relation_tokens: HashSet<usize>,
    /// Lower-cased target table, for OLD/NEW resolution in trigger bodies.
    trigger_table: Option<String>,
}

impl<'a> Parser<'a> {
    fn tokens(&self) -> &[Token] {
        &self.tz.tokens
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens().len()
    }

    fn error_here(&self, message: impl Into<String>) -> GrammarError {
        match self.tokens().get(self.pos) {
            Some(tok) => GrammarError::parse(tok.line, tok.column, message),
            None => {
                let (line, column) = self
                    .tokens()
                    .last()
                    .map(|t| (t.line, t.column + (t.end - t.start)))
                    .unwrap_or((1, 1));
                GrammarError::parse(line, column, message)
            }
        }
    }

    fn peek_is_word(&self, word: &str) -> bool {
        self.tz.is_word(self.pos, word)
    }

    fn peek_is_punct(&self, punct: &str) -> bool {
        self.tz.is_punct(self.pos, punct)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek_is_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek_is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), GrammarError> {
        if !self.eat_word(word) {
            return Err(self.error_here(format!("expected {word}")));
        }
        Ok(())
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), GrammarError> {
        if !self.eat_punct(punct) {
            return Err(self.error_here(format!("expected '{punct}'")));
        }
        Ok(())
    }

    /// Whether the token can serve as a name (bare word, quoted, or a
    /// string literal, which SQLite tolerates in name positions).
    fn is_name_token(&self, index: usize) -> bool {
        matches!(
            self.tokens().get(index).map(|t| t.kind),
            Some(TokenKind::Word | TokenKind::QuotedId | TokenKind::String)
        )
    }

    fn next_name(&mut self, role: Option<NameRole>) -> Result<String, GrammarError> {
        if !self.is_name_token(self.pos) {
            return Err(self.error_here("expected a name"));
        }
        let text = self.tz.text(self.pos);
        if let Some(role) = role {
            self.roles.push((self.pos, role));
        }
        self.pos += 1;
        Ok(unquote(text))
    }

    /// `[schema.]name`, recording the schema and name roles.
    fn qualified_name(&mut self) -> Result<(Option<String>, String), GrammarError> {
        let first_pos = self.pos;
        let first = self.next_name(None)?;
        if self.eat_punct(".") {
            self.roles.push((first_pos, NameRole::Schema));
            let name = self.next_name(Some(NameRole::StatementName))?;
            Ok((Some(first), name))
        } else {
            self.roles.push((first_pos, NameRole::StatementName));
            Ok((None, first))
        }
    }

    fn collect_table(&mut self, name: &str) {
        let lower = name.to_lowercase();
        if !self.tables.contains(&lower) {
            self.tables.push(lower);
        }
    }

    fn parse(&mut self) -> Result<Statement, GrammarError> {
        self.expect_word("CREATE")?;
        let temporary = self.eat_word("TEMP") || self.eat_word("TEMPORARY");
        let mut unique = false;

        self.kind = if self.eat_word("TABLE") {
            StatementKind::Table
        } else if self.eat_word("INDEX") {
            StatementKind::Index
        } else if self.eat_word("UNIQUE") {
            unique = true;
            self.expect_word("INDEX")?;
            StatementKind::Index
        } else if self.eat_word("TRIGGER") {
            StatementKind::Trigger
        } else if self.eat_word("VIEW") {
            StatementKind::View
        } else if self.eat_word("VIRTUAL") {
            self.expect_word("TABLE")?;
            StatementKind::VirtualTable
        } else {
            return Err(self.error_here("expected TABLE, INDEX, TRIGGER, VIEW or VIRTUAL TABLE"));
        };

        let mut if_not_exists = false;
        if self.eat_word("IF") {
            self.expect_word("NOT")?;
            self.expect_word("EXISTS")?;
            if_not_exists = true;
        }

        let (schema, name) = self.qualified_name()?;
        let header = StatementHeader {
            name,
            schema,
            temporary,
            if_not_exists,
            comments: self.tz.comments.clone(),
            tables: Vec::new(),
        };

        let mut statement = match self.kind {
            StatementKind::Table => Statement::Table(self.parse_table(header)?),
            StatementKind::Index => Statement::Index(self.parse_index(header, unique)?),
            StatementKind::Trigger => Statement::Trigger(self.parse_trigger(header)?),
            StatementKind::View => Statement::View(self.parse_view(header)?),
            StatementKind::VirtualTable => {
                Statement::VirtualTable(self.parse_virtual_table(header)?)
            }
        };

        self.eat_punct(";");
        if !self.at_end() {
            return Err(self.error_here("unexpected trailing input"));
        }
        statement.header_mut().tables = std::mem::take(&mut self.tables);
        Ok(statement)
    }

    // ------------------------------------------------------------------
    // CREATE TABLE

    fn parse_table(&mut self, header: StatementHeader) -> Result<TableDef, GrammarError> {
        let owner = header.name.to_lowercase();
        self.expect_punct("(")?;

        let mut columns = Vec::new();
        let mut constraints = Vec::new();
        loop {
            if self.at_table_constraint() {
                constraints.push(self.parse_table_constraint(&owner)?);
            } else {
                columns.push(self.parse_column_def(&owner)?);
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            break;
        }

        let mut without_rowid = false;
        if self.eat_word("WITHOUT") {
            self.expect_word("ROWID")?;
            without_rowid = true;
        }

        Ok(TableDef { header, without_rowid, columns, constraints })
    }

    fn at_table_constraint(&self) -> bool {
        ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
            .iter()
            .any(|w| self.peek_is_word(w))
    }

    fn parse_column_def(&mut self, owner: &str) -> Result<ColumnDef, GrammarError> {
        let name = self.next_name(Some(NameRole::ColumnRef { owner: owner.to_string() }))?;
        let col_type = self.parse_column_type()?;

        let mut constraints = Vec::new();
        loop {
            let constraint_name = if self.eat_word("CONSTRAINT") {
                Some(self.next_name(None)?)
            } else {
                None
            };
            let kind = if self.eat_word("PRIMARY") {
                self.expect_word("KEY")?;
                let order = self.parse_sort_order();
                let conflict = self.parse_conflict_clause()?;
                let autoincrement = self.eat_word("AUTOINCREMENT");
                Some(ColumnConstraintKind::PrimaryKey { order, conflict, autoincrement })
            } else if self.eat_word("NOT") {
                self.expect_word("NULL")?;
                Some(ColumnConstraintKind::NotNull { conflict: self.parse_conflict_clause()? })
            } else if self.eat_word("NULL") {
                // Explicit NULL is the default; consume and drop.
                self.parse_conflict_clause()?;
                continue;
            } else if self.eat_word("UNIQUE") {
                Some(ColumnConstraintKind::Unique { conflict: self.parse_conflict_clause()? })
            } else if self.eat_word("DEFAULT") {
                Some(ColumnConstraintKind::Default { expr: self.parse_default_value(owner)? })
            } else if self.eat_word("CHECK") {
                Some(ColumnConstraintKind::Check { expr: self.parse_paren_expr(Some(owner))? })
            } else if self.eat_word("COLLATE") {
                Some(ColumnConstraintKind::Collate {
                    collation: self.next_name(None)?.to_uppercase(),
                })
            } else if self.peek_is_word("REFERENCES") {
                Some(ColumnConstraintKind::ForeignKey(self.parse_references_clause()?))
            } else {
                if constraint_name.is_some() {
                    return Err(self.error_here("expected a constraint after CONSTRAINT name"));
                }
                break;
            };
            if let Some(kind) = kind {
                constraints.push(ColumnConstraint { name: constraint_name, kind });
            }
        }

        Ok(ColumnDef { name, col_type, constraints })
    }

    fn parse_column_type(&mut self) -> Result<Option<String>, GrammarError> {
        if let Some(tok) = self.tokens().get(self.pos)
            && tok.kind == TokenKind::QuotedId
        {
            let t = unquote(self.tz.text(self.pos)).to_uppercase();
            self.pos += 1;
            return Ok(Some(self.parse_type_arguments(t)?));
        }

        let mut words = Vec::new();
        while let Some(tok) = self.tokens().get(self.pos) {
            if tok.kind != TokenKind::Word {
                break;
            }
            let text = self.tz.text(self.pos);
            if TYPE_STOP.iter().any(|w| text.eq_ignore_ascii_case(w)) {
                break;
            }
            words.push(text.to_uppercase());
            self.pos += 1;
        }
        if words.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.parse_type_arguments(words.join(" "))?))
    }

    fn parse_type_arguments(&mut self, mut base: String) -> Result<String, GrammarError> {
        if self.eat_punct("(") {
            let mut args = Vec::new();
            loop {
                let mut arg = String::new();
                if self.eat_punct("+") {
                    arg.push('+');
                } else if self.eat_punct("-") {
                    arg.push('-');
                }
                let Some(tok) = self.tokens().get(self.pos) else {
                    return Err(self.error_here("unterminated type arguments"));
                };
                if tok.kind != TokenKind::Number {
                    return Err(self.error_here("expected a number in type arguments"));
                }
                arg.push_str(self.tz.text(self.pos));
                self.pos += 1;
                args.push(arg.to_uppercase());
                if self.eat_punct(",") {
                    continue;
                }
                self.expect_punct(")")?;
                break;
            }
            base.push_str(&format!("({})", args.join(",")));
        }
        Ok(base)
    }

    fn parse_default_value(&mut self, owner: &str) -> Result<String, GrammarError> {
        if self.peek_is_punct("(") {
            let inner = self.parse_paren_expr(Some(owner))?;
            return Ok(format!("({inner})"));
        }
        let start = self.pos;
        if self.peek_is_punct("+") || self.peek_is_punct("-") {
            self.pos += 1;
        }
        if self.at_end() {
            return Err(self.error_here("expected a DEFAULT value"));
        }
        self.pos += 1;
        Ok(self.tz.span_text(start, self.pos - 1).to_string())
    }

    /// Captures `( .. )` with balanced nesting, returning the raw inner
    /// text and scanning it for name roles.
    fn parse_paren_expr(&mut self, owner: Option<&str>) -> Result<String, GrammarError> {
        self.expect_punct("(")?;
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(tok) = self.tokens().get(self.pos) {
            if tok.kind == TokenKind::Punct {
                match self.tz.text(self.pos) {
                    "(" => depth += 1,
                    ")" => {
                        if depth == 0 {
                            let end = self.pos;
                            self.pos += 1;
                            let text = self.tz.span_text(start, end.saturating_sub(1));
                            let collect = self.kind != StatementKind::Table;
                            self.scan_region(start, end, owner, collect);
                            return Ok(text.to_string());
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            self.pos += 1;
        }
        Err(self.error_here("unterminated parenthesized expression"))
    }

    fn parse_sort_order(&mut self) -> Option<SortOrder> {
        if self.eat_word("ASC") {
            Some(SortOrder::Asc)
        } else if self.eat_word("DESC") {
            Some(SortOrder::Desc)
        } else {
            None
        }
    }

    fn parse_conflict_clause(&mut self) -> Result<Option<ConflictAction>, GrammarError> {
        if !self.peek_is_word("ON") || !self.tz.is_word(self.pos + 1, "CONFLICT") {
            return Ok(None);
        }
        self.pos += 2;
        let action = if self.eat_word("ROLLBACK") {
            ConflictAction::Rollback
        } else if self.eat_word("ABORT") {
            ConflictAction::Abort
        } else if self.eat_word("FAIL") {
            ConflictAction::Fail
        } else if self.eat_word("IGNORE") {
            ConflictAction::Ignore
        } else if self.eat_word("REPLACE") {
            ConflictAction::Replace
        } else {
            return Err(self.error_here("expected a conflict action"));
        };
        Ok(Some(action))
    }

    fn parse_references_clause(&mut self) -> Result<ForeignKeyClause, GrammarError> {
        self.expect_word("REFERENCES")?;
        let table = self.next_name(Some(NameRole::TableRef))?;
        if self.kind == StatementKind::Table {
            self.collect_table(&table);
        }

        let mut clause = ForeignKeyClause { table: table.clone(), ..Default::default() };
        let owner = table.to_lowercase();
        if self.eat_punct("(") {
            loop {
                clause
                    .columns
                    .push(self.next_name(Some(NameRole::ColumnRef { owner: owner.clone() }))?);
                if self.eat_punct(",") {
                    continue;
                }
                self.expect_punct(")")?;
                break;
            }
        }

        loop {
            if self.peek_is_word("ON") && !self.tz.is_word(self.pos + 1, "CONFLICT") {
                self.pos += 1;
                let target = if self.eat_word("DELETE") {
                    "DELETE"
                } else if self.eat_word("UPDATE") {
                    "UPDATE"
                } else {
                    return Err(self.error_here("expected DELETE or UPDATE"));
                };
                let action = self.parse_fk_action()?;
                match target {
                    "DELETE" => clause.on_delete = Some(action),
                    _ => clause.on_update = Some(action),
                }
            } else if self.eat_word("MATCH") {
                clause.match_clause = Some(self.next_name(None)?.to_uppercase());
            } else if self.peek_is_word("DEFERRABLE")
                || (self.peek_is_word("NOT") && self.tz.is_word(self.pos + 1, "DEFERRABLE"))
            {
                let not = self.eat_word("NOT");
                self.expect_word("DEFERRABLE")?;
                let mut deferrable = Deferrable { not, initially: None };
                if self.eat_word("INITIALLY") {
                    let initially = if self.eat_word("DEFERRED") {
                        "DEFERRED"
                    } else if self.eat_word("IMMEDIATE") {
                        "IMMEDIATE"
                    } else {
                        return Err(self.error_here("expected DEFERRED or IMMEDIATE"));
                    };
                    deferrable.initially = Some(initially.to_string());
                }
                clause.deferrable = Some(deferrable);
            } else {
                break;
            }
        }
        Ok(clause)
    }

    fn parse_fk_action(&mut self) -> Result<String, GrammarError> {
        if self.eat_word("SET") {
            if self.eat_word("NULL") {
                Ok("SET NULL".to_string())
            } else if self.eat_word("DEFAULT") {
                Ok("SET DEFAULT".to_string())
            } else {
                Err(self.error_here("expected NULL or DEFAULT"))
            }
        } else if self.eat_word("CASCADE") {
            Ok("CASCADE".to_string())
        } else if self.eat_word("RESTRICT") {
            Ok("RESTRICT".to_string())
        } else if self.eat_word("NO") {
            self.expect_word("ACTION")?;
            Ok("NO ACTION".to_string())
        } else {
            Err(self.error_here("expected a foreign key action"))
        }
    }

    fn parse_table_constraint(&mut self, owner: &str) -> Result<TableConstraint, GrammarError> {
        let name = if self.eat_word("CONSTRAINT") {
            Some(self.next_name(None)?)
        } else {
            None
        };

        let kind = if self.eat_word("PRIMARY") {
            self.expect_word("KEY")?;
            let columns = self.parse_indexed_columns(owner)?;
            let conflict = self.parse_conflict_clause()?;
            TableConstraintKind::PrimaryKey { columns, conflict }
        } else if self.eat_word("UNIQUE") {
            let columns = self.parse_indexed_columns(owner)?;
            let conflict = self.parse_conflict_clause()?;
            TableConstraintKind::Unique { columns, conflict }
        } else if self.eat_word("CHECK") {
            TableConstraintKind::Check { expr: self.parse_paren_expr(Some(owner))? }
        } else if self.eat_word("FOREIGN") {
            self.expect_word("KEY")?;
            self.expect_punct("(")?;
            let mut columns = Vec::new();
            loop {
                columns.push(self.next_name(Some(NameRole::ColumnRef { owner: owner.to_string() }))?);
                if self.eat_punct(",") {
                    continue;
                }
                self.expect_punct(")")?;
                break;
            }
            let clause = self.parse_references_clause()?;
            TableConstraintKind::ForeignKey { columns, clause }
        } else {
            return Err(self.error_here("expected a table constraint"));
        };

        Ok(TableConstraint { name, kind })
    }

    fn parse_indexed_columns(&mut self, owner: &str) -> Result<Vec<IndexedColumn>, GrammarError> {
        self.expect_punct("(")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_indexed_column(owner)?);
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            break;
        }
        Ok(columns)
    }

    fn parse_indexed_column(&mut self, owner: &str) -> Result<IndexedColumn, GrammarError> {
        let mut column = IndexedColumn::default();
        // A lone name (optionally followed by COLLATE/ASC/DESC) is a
        // column reference; anything else is an expression.
        let next_terminates = |tz: &Tokenized<'_>, i: usize| {
            tz.is_punct(i, ",")
                || tz.is_punct(i, ")")
                || tz.is_word(i, "COLLATE")
                || tz.is_word(i, "ASC")
                || tz.is_word(i, "DESC")
        };
        if self.is_name_token(self.pos) && next_terminates(self.tz, self.pos + 1) {
            column.name = Some(self.next_name(Some(NameRole::ColumnRef { owner: owner.to_string() }))?);
        } else {
            let start = self.pos;
            let mut depth = 0usize;
            while let Some(tok) = self.tokens().get(self.pos) {
                if tok.kind == TokenKind::Punct {
                    match self.tz.text(self.pos) {
                        "(" => depth += 1,
                        ")" if depth == 0 => break,
                        ")" => depth -= 1,
                        "," if depth == 0 => break,
                        _ => {}
                    }
                }
                if depth == 0
                    && (self.peek_is_word("COLLATE") || self.peek_is_word("ASC") || self.peek_is_word("DESC"))
                {
                    break;
                }
                self.pos += 1;
            }
            if start == self.pos {
                return Err(self.error_here("expected an indexed column"));
            }
            column.expr = Some(self.tz.span_text(start, self.pos - 1).to_string());
            let collect = self.kind == StatementKind::Index;
            let scan_owner = owner.to_string();
            self.scan_region(start, self.pos, Some(&scan_owner), collect);
        }
        if self.eat_word("COLLATE") {
            column.collate = Some(self.next_name(None)?.to_uppercase());
        }
        column.order = self.parse_sort_order();
        Ok(column)
    }

    // ------------------------------------------------------------------
    // CREATE INDEX

    fn parse_index(
        &mut self,
        header: StatementHeader,
        unique: bool,
    ) -> Result<IndexDef, GrammarError> {
        self.expect_word("ON")?;
        let table_pos = self.pos;
        let table = self.next_name(Some(NameRole::TableRef))?;
        self.relation_tokens.insert(table_pos);
        self.collect_table(&table);

        let owner = table.to_lowercase();
        let columns = self.parse_indexed_columns(&owner)?;

        let mut where_clause = None;
        if self.eat_word("WHERE") {
            let start = self.pos;
            let mut end = self.tokens().len();
            if self.tz.is_punct(end.saturating_sub(1), ";") {
                end -= 1;
            }
            if start >= end {
                return Err(self.error_here("expected a WHERE expression"));
            }
            where_clause = Some(self.tz.span_text(start, end - 1).to_string());
            self.scan_region(start, end, Some(&owner), true);
            self.pos = end;
        }

        Ok(IndexDef { header, unique, table, columns, where_clause })
    }

    // ------------------------------------------------------------------
    // CREATE TRIGGER

    fn parse_trigger(&mut self, header: StatementHeader) -> Result<TriggerDef, GrammarError> {
        let timing = if self.eat_word("BEFORE") {
            Some(TriggerTiming::Before)
        } else if self.eat_word("AFTER") {
            Some(TriggerTiming::After)
        } else if self.eat_word("INSTEAD") {
            self.expect_word("OF")?;
            Some(TriggerTiming::InsteadOf)
        } else {
            None
        };

        let action = if self.eat_word("DELETE") {
            TriggerAction::Delete
        } else if self.eat_word("INSERT") {
            TriggerAction::Insert
        } else if self.eat_word("UPDATE") {
            TriggerAction::Update
        } else {
            return Err(self.error_here("expected DELETE, INSERT or UPDATE"));
        };

        // UPDATE OF columns precede the ON clause; their owner roles are
        // recorded once the target table is known.
        let mut update_columns = Vec::new();
        let mut update_column_tokens = Vec::new();
        if action == TriggerAction::Update && self.eat_word("OF") {
            loop {
                update_column_tokens.push(self.pos);
                update_columns.push(self.next_name(None)?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }

        self.expect_word("ON")?;
        let table_pos = self.pos;
        let table = self.next_name(Some(NameRole::TableRef))?;
        self.relation_tokens.insert(table_pos);
        let owner = table.to_lowercase();
        self.trigger_table = Some(owner.clone());
        for idx in update_column_tokens {
            self.roles.push((idx, NameRole::ColumnRef { owner: owner.clone() }));
        }

        let mut for_each_row = false;
        if self.eat_word("FOR") {
            self.expect_word("EACH")?;
            self.expect_word("ROW")?;
            for_each_row = true;
        }

        let mut when = None;
        if self.eat_word("WHEN") {
            let start = self.pos;
            let mut depth = 0usize;
            while !self.at_end() {
                if self.peek_is_punct("(") {
                    depth += 1;
                } else if self.peek_is_punct(")") {
                    depth = depth.saturating_sub(1);
                } else if depth == 0 && self.peek_is_word("BEGIN") {
                    break;
                }
                self.pos += 1;
            }
            if start == self.pos {
                return Err(self.error_here("expected a WHEN expression"));
            }
            when = Some(self.tz.span_text(start, self.pos - 1).to_string());
            self.scan_region(start, self.pos, Some(&owner), true);
        }

        self.expect_word("BEGIN")?;
        let begin_tok = self.pos - 1;
        let body_start = self.pos;
        // Match the closing END, skipping CASE..END expressions.
        let mut case_depth = 0usize;
        let end_tok = loop {
            if self.at_end() {
                return Err(self.error_here("unterminated trigger body"));
            }
            if self.peek_is_word("CASE") {
                case_depth += 1;
            } else if self.peek_is_word("END") {
                if case_depth == 0 {
                    break self.pos;
                }
                case_depth -= 1;
            }
            self.pos += 1;
        };
        self.scan_region(body_start, end_tok, Some(&owner), true);

        let raw = &self.tz.sql[self.tokens()[begin_tok].end..self.tokens()[end_tok].start];
        let mut body = raw.trim_end_matches([' ', '\t']);
        body = body.strip_prefix('\n').unwrap_or(body);
        body = body.strip_suffix('\n').unwrap_or(body);
        let body = body.to_string();
        self.pos = end_tok + 1;

        Ok(TriggerDef {
            header,
            timing,
            action,
            update_columns,
            table,
            for_each_row,
            when,
            body,
        })
    }

    // ------------------------------------------------------------------
    // CREATE VIEW

    fn parse_view(&mut self, header: StatementHeader) -> Result<ViewDef, GrammarError> {
        let owner = header.name.to_lowercase();
        let mut columns = Vec::new();
        if self.eat_punct("(") {
            loop {
                columns.push(self.next_name(Some(NameRole::ColumnRef { owner: owner.clone() }))?);
                if self.eat_punct(",") {
                    continue;
                }
                self.expect_punct(")")?;
                break;
            }
        }
        self.expect_word("AS")?;

        let start = self.pos;
        let mut end = self.tokens().len();
        if end > start && self.tz.is_punct(end - 1, ";") {
            end -= 1;
        }
        if start >= end {
            return Err(self.error_here("expected a SELECT statement"));
        }
        let select = self.tz.span_text(start, end - 1).to_string();
        self.scan_region(start, end, None, true);
        self.pos = end;

        Ok(ViewDef { header, columns, select })
    }

    // ------------------------------------------------------------------
    // CREATE VIRTUAL TABLE

    fn parse_virtual_table(
        &mut self,
        header: StatementHeader,
    ) -> Result<VirtualTableDef, GrammarError> {
        self.expect_word("USING")?;
        let module = self.next_name(None)?;
        let mut arguments = Vec::new();
        if self.eat_punct("(") {
            let mut start = self.pos;
            let mut depth = 0usize;
            loop {
                if self.at_end() {
                    return Err(self.error_here("unterminated module arguments"));
                }
                if self.peek_is_punct("(") {
                    depth += 1;
                } else if self.peek_is_punct(")") {
                    if depth == 0 {
                        if self.pos > start {
                            arguments.push(self.tz.span_text(start, self.pos - 1).to_string());
                        }
                        self.pos += 1;
                        break;
                    }
                    depth -= 1;
                } else if depth == 0 && self.peek_is_punct(",") {
                    arguments.push(self.tz.span_text(start, self.pos - 1).to_string());
                    start = self.pos + 1;
                }
                self.pos += 1;
            }
        }
        Ok(VirtualTableDef { header, module, arguments })
    }

    // ------------------------------------------------------------------
    // Region scanning: SELECT/UPDATE/INSERT/DELETE contexts inside raw
    // expression text, tracked with an owner stack so column references
    // resolve to the intended relation.

    fn scan_region(&mut self, start: usize, end: usize, base_owner: Option<&str>, collect: bool) {
        let mut scopes: Vec<(i32, Option<String>)> =
            vec![(-1, base_owner.map(|s| s.to_lowercase()))];
        let mut depth = 0i32;
        let mut i = start;
        while i < end {
            let tok = self.tokens()[i];
            match tok.kind {
                TokenKind::Punct => match self.tz.text(i) {
                    "(" => depth += 1,
                    ")" => {
                        depth -= 1;
                        while scopes.len() > 1 && scopes.last().is_some_and(|s| s.0 > depth) {
                            scopes.pop();
                        }
                    }
                    ";" => {
                        while scopes.len() > 1 && scopes.last().is_some_and(|s| s.0 == depth) {
                            scopes.pop();
                        }
                    }
                    _ => {}
                },
                TokenKind::Word | TokenKind::QuotedId => {
                    if self.relation_tokens.contains(&i) {
                        i += 1;
                        continue;
                    }
                    if tok.kind == TokenKind::Word && self.tz.is_word(i, "SELECT") {
                        let owner = self.scan_from_clause(i, end, depth, collect);
                        scopes.push((depth, owner));
                    } else if tok.kind == TokenKind::Word && self.tz.is_word(i, "UPDATE") {
                        if let Some(j) = self.scan_dml_target(i + 1, end, collect) {
                            let owner = self.relation_owner(j);
                            scopes.push((depth, owner));
                            i = j + 1;
                            continue;
                        }
                    } else if tok.kind == TokenKind::Word
                        && (self.tz.is_word(i, "INSERT") || self.tz.is_word(i, "REPLACE"))
                    {
                        let mut j = i + 1;
                        if self.tz.is_word(j, "OR") {
                            j += 2;
                        }
                        if self.tz.is_word(j, "INTO")
                            && let Some(j) = self.scan_dml_target(j + 1, end, collect)
                        {
                            let owner = self.relation_owner(j);
                            scopes.push((depth, owner));
                            i = j + 1;
                            continue;
                        }
                    } else if tok.kind == TokenKind::Word
                        && self.tz.is_word(i, "DELETE")
                        && self.tz.is_word(i + 1, "FROM")
                        && let Some(j) = self.scan_dml_target(i + 2, end, collect)
                    {
                        let owner = self.relation_owner(j);
                        scopes.push((depth, owner));
                        i = j + 1;
                        continue;
                    } else {
                        i = self.classify_identifier(i, end, &scopes, collect);
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Locates the FROM clause of the SELECT starting at `select_pos` and
    /// marks its relation names. Returns the owner when the clause names
    /// exactly one relation.
    fn scan_from_clause(
        &mut self,
        select_pos: usize,
        end: usize,
        select_depth: i32,
        collect: bool,
    ) -> Option<String> {
        let mut depth = select_depth;
        let mut i = select_pos + 1;
        while i < end {
            if self.tz.is_punct(i, "(") {
                depth += 1;
            } else if self.tz.is_punct(i, ")") {
                depth -= 1;
                if depth < select_depth {
                    return None;
                }
            } else if depth == select_depth && self.tz.is_punct(i, ";") {
                return None;
            } else if depth == select_depth
                && ["UNION", "EXCEPT", "INTERSECT"].iter().any(|w| self.tz.is_word(i, w))
            {
                return None;
            } else if depth == select_depth && self.tz.is_word(i, "FROM") {
                return self.scan_relation_list(i + 1, end, select_depth, collect);
            }
            i += 1;
        }
        None
    }

    fn scan_relation_list(
        &mut self,
        start: usize,
        end: usize,
        depth0: i32,
        collect: bool,
    ) -> Option<String> {
        let mut names = Vec::new();
        let mut subqueries = 0usize;
        let mut i = start;
        let mut depth = depth0;
        let mut expect_name = true;
        while i < end {
            if self.tz.is_punct(i, "(") {
                if expect_name {
                    subqueries += 1;
                    expect_name = false;
                }
                depth += 1;
            } else if self.tz.is_punct(i, ")") {
                depth -= 1;
                if depth < depth0 {
                    break;
                }
            } else if depth == depth0 {
                if self.tz.is_punct(i, ";")
                    || FROM_STOP.iter().any(|w| self.tz.is_word(i, w))
                {
                    break;
                }
                if self.tz.is_punct(i, ",") || JOIN_WORDS.iter().any(|w| self.tz.is_word(i, w)) {
                    expect_name = true;
                } else if expect_name && self.is_name_token(i) && !self.is_keyword(i) {
                    // Qualified relation: schema.name.
                    let mut name_pos = i;
                    if self.tz.is_punct(i + 1, ".") && self.is_name_token(i + 2) {
                        name_pos = i + 2;
                    }
                    let name = unquote(self.tz.text(name_pos));
                    self.mark_relation(name_pos, &name, collect);
                    names.push(name.to_lowercase());
                    i = name_pos;
                    expect_name = false;
                }
            }
            i += 1;
        }
        if names.len() == 1 && subqueries == 0 {
            names.pop()
        } else {
            None
        }
    }

    /// Consumes `[schema.]name` at `start` for UPDATE/INSERT/DELETE
    /// targets, marking the name. Returns the name token index.
    fn scan_dml_target(&mut self, start: usize, end: usize, collect: bool) -> Option<usize> {
        let mut i = start;
        // UPDATE OR ROLLBACK | ABORT | .. prefix.
        if self.tz.is_word(i, "OR") && i + 1 < end {
            i += 2;
        }
        if i >= end || !self.is_name_token(i) || self.is_keyword(i) {
            return None;
        }
        let mut name_pos = i;
        if self.tz.is_punct(i + 1, ".") && self.is_name_token(i + 2) {
            name_pos = i + 2;
        }
        let name = unquote(self.tz.text(name_pos));
        self.mark_relation(name_pos, &name, collect);
        Some(name_pos)
    }

    fn relation_owner(&self, name_pos: usize) -> Option<String> {
        let name = unquote(self.tz.text(name_pos)).to_lowercase();
        if self.kind == StatementKind::Trigger && matches!(name.as_str(), "old" | "new") {
            return self.trigger_table.clone();
        }
        Some(name)
    }

    fn mark_relation(&mut self, pos: usize, name: &str, collect: bool) {
        if !self.relation_tokens.insert(pos) {
            return;
        }
        let lower = name.to_lowercase();
        let is_pseudo =
            self.kind == StatementKind::Trigger && matches!(lower.as_str(), "old" | "new");
        if is_pseudo {
            return;
        }
        self.roles.push((pos, NameRole::TableRef));
        if collect {
            self.collect_table(name);
        }
    }

    fn is_keyword(&self, i: usize) -> bool {
        self.tokens().get(i).is_some_and(|t| t.kind == TokenKind::Word)
            && is_reserved(self.tz.text(i))
    }

    /// Classifies a plain identifier inside a region: function names and
    /// keywords are skipped, `rel.col` pairs resolve their owner from the
    /// qualifier, everything else uses the innermost scope owner.
    /// Returns the next position to scan.
    fn classify_identifier(
        &mut self,
        i: usize,
        end: usize,
        scopes: &[(i32, Option<String>)],
        collect: bool,
    ) -> usize {
        if self.is_keyword(i) {
            return i + 1;
        }
        // Function call.
        if self.tz.is_punct(i + 1, "(") {
            return i + 1;
        }
        // Alias position: skip the word following AS.
        if i > 0 && self.tz.is_word(i - 1, "AS") {
            return i + 1;
        }
        // Qualified reference rel.col.
        if i + 2 < end && self.tz.is_punct(i + 1, ".") && self.is_name_token(i + 2) {
            let qualifier = unquote(self.tz.text(i)).to_lowercase();
            let is_pseudo =
                self.kind == StatementKind::Trigger && matches!(qualifier.as_str(), "old" | "new");
            let owner = if is_pseudo {
                self.trigger_table.clone()
            } else {
                if self.relation_tokens.insert(i) {
                    self.roles.push((i, NameRole::TableRef));
                    if collect {
                        self.collect_table(&qualifier);
                    }
                }
                Some(qualifier)
            };
            if let Some(owner) = owner {
                self.roles.push((i + 2, NameRole::ColumnRef { owner }));
            }
            return i + 3;
        }
        if let Some(owner) = scopes.last().and_then(|s| s.1.clone()) {
            self.roles.push((i, NameRole::ColumnRef { owner }));
        }
        i + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Statement {
        parse_statement(sql).unwrap().statement
    }

    #[test]
    fn table_with_column_constraints() {
        let Statement::Table(t) = parse(
            "CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT NOT NULL DEFAULT 'x')",
        ) else {
            panic!("expected a table")
        };
        assert_eq!(t.header.name, "t");
        assert_eq!(t.columns.len(), 2);
        assert_eq!(t.columns[0].col_type.as_deref(), Some("INTEGER"));
        assert!(t.columns[0].is_primary_key());
        assert!(t.columns[1].is_not_null());
        let default = t.columns[1]
            .constraint(|k| matches!(k, ColumnConstraintKind::Default { .. }))
            .unwrap();
        assert_eq!(
            default.kind,
            ColumnConstraintKind::Default { expr: "'x'".to_string() }
        );
    }

    #[test]
    fn table_collects_foreign_key_targets_only() {
        let Statement::Table(t) = parse(
            "CREATE TABLE order_(id INTEGER, customer_id REFERENCES customer(id),
             CHECK (LENGTH(other.x) > 0))",
        ) else {
            panic!()
        };
        assert_eq!(t.header.tables, vec!["customer".to_string()]);
    }

    #[test]
    fn table_level_constraints() {
        let Statement::Table(t) = parse(
            "CREATE TABLE t(a, b, PRIMARY KEY (a) ON CONFLICT ROLLBACK,
             FOREIGN KEY (b) REFERENCES u (c) ON DELETE CASCADE ON UPDATE RESTRICT MATCH SIMPLE,
             CONSTRAINT chk CHECK (a != b))",
        ) else {
            panic!()
        };
        assert_eq!(t.constraints.len(), 3);
        match &t.constraints[1].kind {
            TableConstraintKind::ForeignKey { columns, clause } => {
                assert_eq!(columns, &["b".to_string()]);
                assert_eq!(clause.table, "u");
                assert_eq!(clause.on_delete.as_deref(), Some("CASCADE"));
                assert_eq!(clause.on_update.as_deref(), Some("RESTRICT"));
                assert_eq!(clause.match_clause.as_deref(), Some("SIMPLE"));
            }
            other => panic!("unexpected constraint: {other:?}"),
        }
        assert_eq!(t.constraints[2].name.as_deref(), Some("chk"));
    }

    #[test]
    fn quirky_type_names() {
        let Statement::Table(t) = parse(
            "CREATE TABLE t(a TIMESTAMP WITH TIME ZONE, b DOUBLE TYPE, c NUMERIC(10,5), d)",
        ) else {
            panic!()
        };
        assert_eq!(t.columns[0].col_type.as_deref(), Some("TIMESTAMP WITH TIME ZONE"));
        assert_eq!(t.columns[1].col_type.as_deref(), Some("DOUBLE TYPE"));
        assert_eq!(t.columns[2].col_type.as_deref(), Some("NUMERIC(10,5)"));
        assert_eq!(t.columns[3].col_type, None);
    }

    #[test]
    fn index_with_where_and_schema() {
        let Statement::Index(i) = parse(
            "CREATE UNIQUE INDEX IF NOT EXISTS s.idx ON t (a COLLATE NOCASE DESC, b)
             WHERE t.a NOT BETWEEN 1 AND 5",
        ) else {
            panic!()
        };
        assert!(i.unique);
        assert!(i.header.if_not_exists);
        assert_eq!(i.header.schema.as_deref(), Some("s"));
        assert_eq!(i.table, "t");
        assert_eq!(i.columns[0].collate.as_deref(), Some("NOCASE"));
        assert_eq!(i.columns[0].order, Some(SortOrder::Desc));
        assert!(i.where_clause.as_deref().unwrap().contains("BETWEEN"));
        assert_eq!(i.header.tables, vec!["t".to_string()]);
    }

    #[test]
    fn trigger_body_and_dependencies() {
        let Statement::Trigger(t) = parse(
            "CREATE TRIGGER trg AFTER UPDATE OF a ON t
             WHEN 1 NOT IN (SELECT c FROM t2)
             BEGIN
               UPDATE t3 SET x = NEW.a;
               DELETE FROM t4 WHERE y != OLD.a;
             END",
        ) else {
            panic!()
        };
        assert_eq!(t.timing, Some(TriggerTiming::After));
        assert_eq!(t.action, TriggerAction::Update);
        assert_eq!(t.update_columns, vec!["a".to_string()]);
        assert_eq!(t.table, "t");
        assert!(t.when.as_deref().unwrap().starts_with("1 NOT IN"));
        assert!(t.body.contains("UPDATE t3"));
        // Header table is not a body dependency; OLD/NEW are skipped.
        assert_eq!(
            t.header.tables,
            vec!["t2".to_string(), "t3".to_string(), "t4".to_string()]
        );
    }

    #[test]
    fn trigger_body_tolerates_case_expressions() {
        let Statement::Trigger(t) = parse(
            "CREATE TRIGGER trg AFTER INSERT ON t BEGIN
               UPDATE t SET a = CASE WHEN NEW.a > 0 THEN 1 ELSE 0 END;
             END",
        ) else {
            panic!()
        };
        assert!(t.body.trim_end().ends_with("END;"));
    }

    #[test]
    fn view_dependencies_include_nested_selects() {
        let Statement::View(v) = parse(
            "CREATE TEMPORARY VIEW IF NOT EXISTS v (a, b) AS
             SELECT x, y FROM t1 WHERE x IN (SELECT z FROM t2) UNION SELECT p, q FROM t3",
        ) else {
            panic!()
        };
        assert!(v.header.temporary);
        assert_eq!(v.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            v.header.tables,
            vec!["t1".to_string(), "t2".to_string(), "t3".to_string()]
        );
    }

    #[test]
    fn virtual_table_module_arguments() {
        let Statement::VirtualTable(v) =
            parse("CREATE VIRTUAL TABLE IF NOT EXISTS s.ft USING fts5 (body, tokenize = 'porter')")
        else {
            panic!()
        };
        assert_eq!(v.module, "fts5");
        assert_eq!(v.arguments.len(), 2);
        assert_eq!(v.arguments[1], "tokenize = 'porter'");
    }

    #[test]
    fn parse_error_carries_position() {
        let err = parse_statement("CREATE TABLE t(").unwrap_err();
        match err {
            GrammarError::Parse { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn comments_survive_into_header() {
        let stmt = parse("-- lead\nCREATE TABLE t(a) /* tail */");
        assert_eq!(stmt.header().comments, vec!["-- lead", "/* tail */"]);
    }
}
