//! Recognizes the handful of things a line of input can be: a meta-command,
//! an `insert`/`select` statement, or neither.
use crate::storage::row::Row;

pub enum MetaCommand {
    Exit,
    PrintTree,
    PrintConstants,
}

/// Parses a `.`-prefixed line. `None` means the command isn't one we know.
pub fn parse_meta_command(input: &str) -> Option<MetaCommand> {
    match input {
        ".exit" => Some(MetaCommand::Exit),
        ".btree" => Some(MetaCommand::PrintTree),
        ".constants" => Some(MetaCommand::PrintConstants),
        _ => None,
    }
}

pub enum Statement {
    Insert(Row),
    Select,
}

pub enum PrepareResult {
    Success(Statement),
    NegativeId,
    StringTooLong,
    SyntaxError,
    UnrecognizedKeyword,
}

/// Parses a non-meta line into a [`Statement`], or one of the recoverable
/// failure modes a malformed line can hit.
pub fn prepare_statement(input: &str) -> PrepareResult {
    if input == "select" {
        return PrepareResult::Success(Statement::Select);
    }
    if input.starts_with("insert") {
        return prepare_insert(input);
    }
    PrepareResult::UnrecognizedKeyword
}

/// `insert <username> <id> <email>` — username first, then the numeric id,
/// then email.
fn prepare_insert(input: &str) -> PrepareResult {
    let mut tokens = input.split_whitespace();
    let Some(_keyword) = tokens.next() else {
        return PrepareResult::SyntaxError;
    };
    let (Some(username), Some(id_str), Some(email)) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return PrepareResult::SyntaxError;
    };
    if tokens.next().is_some() {
        return PrepareResult::SyntaxError;
    }

    let Ok(id) = id_str.parse::<i64>() else {
        return PrepareResult::SyntaxError;
    };
    if id < 0 {
        return PrepareResult::NegativeId;
    }
    let Ok(id) = u32::try_from(id) else {
        return PrepareResult::SyntaxError;
    };

    match Row::new(id, username, email) {
        Ok(row) => PrepareResult::Success(Statement::Insert(row)),
        Err(_too_long) => PrepareResult::StringTooLong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_insert() {
        match prepare_statement("insert alice 1 a@example.com") {
            PrepareResult::Success(Statement::Insert(row)) => {
                assert_eq!(row.id, 1);
                assert_eq!(row.username, "alice");
                assert_eq!(row.email, "a@example.com");
            }
            _ => panic!("expected a successful insert"),
        }
    }

    #[test]
    fn rejects_negative_id() {
        assert!(matches!(
            prepare_statement("insert alice -1 a@x.com"),
            PrepareResult::NegativeId
        ));
    }

    #[test]
    fn rejects_missing_tokens() {
        assert!(matches!(
            prepare_statement("insert alice 1"),
            PrepareResult::SyntaxError
        ));
    }

    #[test]
    fn rejects_oversized_username() {
        let long = "a".repeat(33);
        let input = format!("insert {long} 1 a@x.com");
        assert!(matches!(
            prepare_statement(&input),
            PrepareResult::StringTooLong
        ));
    }

    #[test]
    fn unknown_keyword_is_reported() {
        assert!(matches!(
            prepare_statement("delete 1"),
            PrepareResult::UnrecognizedKeyword
        ));
    }

    #[test]
    fn recognizes_meta_commands() {
        assert!(matches!(parse_meta_command(".exit"), Some(MetaCommand::Exit)));
        assert!(parse_meta_command(".bogus").is_none());
    }
}
