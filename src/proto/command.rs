//! Command-line parsing and the command lookup table. Grounded in
//! spec.md §4.2 and the teacher's `server/controlchan/command.rs` /
//! `server/controlchan/line_parser/`.

use crate::error::{Error, ErrorKind};

const MAX_COMMAND_LEN: usize = 64;
const MAX_ARG_LEN: usize = 512;

/// Whether a command's argument is required, optional, or must be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRequirement {
    None,
    Required,
    Optional,
}

/// A parsed command line: an uppercased command token and its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub arg: String,
}

/// Splits `line` (already stripped of CRLF) at the first space. The prefix,
/// uppercased, is the command name; the suffix, trimmed, is the argument.
pub fn parse(line: &str) -> Result<ParsedCommand, Error> {
    let (name_part, arg_part) = match line.split_once(' ') {
        Some((n, a)) => (n, a.trim()),
        None => (line, ""),
    };
    if name_part.is_empty() || name_part.len() > MAX_COMMAND_LEN {
        return Err(Error::new(ErrorKind::Protocol));
    }
    if arg_part.len() > MAX_ARG_LEN {
        return Err(Error::new(ErrorKind::Protocol));
    }
    Ok(ParsedCommand {
        name: name_part.to_ascii_uppercase(),
        arg: arg_part.to_string(),
    })
}

/// Validates `arg` against `req`. Empty-string args count as absent.
pub fn validate_args(req: ArgRequirement, arg: &str) -> bool {
    match req {
        ArgRequirement::None => arg.is_empty(),
        ArgRequirement::Required => !arg.is_empty(),
        ArgRequirement::Optional => true,
    }
}

/// One entry in the fixed command table: name and argument requirement.
/// The handler itself is looked up separately by the dispatcher (see
/// `session::dispatch`), since handlers need generics (`Session<'_>`) that
/// don't fit neatly into a `'static` table of function pointers alongside
/// `AUTH`'s conditional availability.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub args: ArgRequirement,
}

macro_rules! cmd {
    ($name:literal, $req:expr) => {
        CommandSpec { name: $name, args: $req }
    };
}

/// The fixed command table, linear-searched by name (case-sensitive on the
/// already-uppercased token). Matches spec.md §4.2's command list.
pub const COMMAND_TABLE: &[CommandSpec] = &[
    cmd!("USER", ArgRequirement::Required),
    cmd!("PASS", ArgRequirement::Optional),
    cmd!("QUIT", ArgRequirement::None),
    cmd!("NOOP", ArgRequirement::None),
    cmd!("CWD", ArgRequirement::Required),
    cmd!("CDUP", ArgRequirement::None),
    cmd!("PWD", ArgRequirement::None),
    cmd!("LIST", ArgRequirement::Optional),
    cmd!("NLST", ArgRequirement::Optional),
    cmd!("MLSD", ArgRequirement::Optional),
    cmd!("MLST", ArgRequirement::Optional),
    cmd!("RETR", ArgRequirement::Required),
    cmd!("STOR", ArgRequirement::Required),
    cmd!("APPE", ArgRequirement::Required),
    cmd!("REST", ArgRequirement::Required),
    cmd!("DELE", ArgRequirement::Required),
    cmd!("RMD", ArgRequirement::Required),
    cmd!("MKD", ArgRequirement::Required),
    cmd!("RNFR", ArgRequirement::Required),
    cmd!("RNTO", ArgRequirement::Required),
    cmd!("PORT", ArgRequirement::Required),
    cmd!("PASV", ArgRequirement::None),
    cmd!("SIZE", ArgRequirement::Required),
    cmd!("MDTM", ArgRequirement::Required),
    cmd!("STAT", ArgRequirement::Optional),
    cmd!("SYST", ArgRequirement::None),
    cmd!("FEAT", ArgRequirement::None),
    cmd!("HELP", ArgRequirement::Optional),
    cmd!("TYPE", ArgRequirement::Required),
    cmd!("MODE", ArgRequirement::Required),
    cmd!("STRU", ArgRequirement::Required),
    cmd!("AUTH", ArgRequirement::Required),
    cmd!("ABOR", ArgRequirement::None),
    cmd!("ALLO", ArgRequirement::Optional),
    cmd!("OPTS", ArgRequirement::Required),
];

/// Linear search by name, case-sensitive on the already-uppercased input.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|c| c.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_and_argument() {
        let p = parse("retr /pub/file.bin").unwrap();
        assert_eq!(p.name, "RETR");
        assert_eq!(p.arg, "/pub/file.bin");
    }

    #[test]
    fn parses_bare_command_with_empty_arg() {
        let p = parse("NOOP").unwrap();
        assert_eq!(p.name, "NOOP");
        assert_eq!(p.arg, "");
    }

    #[test]
    fn rejects_empty_command_token() {
        assert!(parse("   ").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn rejects_oversized_argument() {
        let line = format!("STOR {}", "x".repeat(600));
        assert_eq!(parse(&line).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn lookup_is_case_sensitive_on_uppercased_name() {
        assert!(lookup("RETR").is_some());
        assert!(lookup("retr").is_none());
    }

    #[test]
    fn validate_args_matches_requirement() {
        assert!(validate_args(ArgRequirement::None, ""));
        assert!(!validate_args(ArgRequirement::None, "x"));
        assert!(validate_args(ArgRequirement::Required, "x"));
        assert!(!validate_args(ArgRequirement::Required, ""));
        assert!(validate_args(ArgRequirement::Optional, ""));
        assert!(validate_args(ArgRequirement::Optional, "x"));
    }
}
