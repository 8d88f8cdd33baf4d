//! Recursive-descent parser for Sieve scripts.
//!
//! Single pass over the token stream, driven entirely by the command
//! definitions in a [`Registry`]. The output is a fully validated
//! [`Script`]: structure, argument types and capability declarations have
//! all been checked, so later stages never need to re-validate.

use std::collections::BTreeSet;

use crate::ast::{ArgValue, Command, Script, SieveString};
use crate::grammar::{ArgSlot, CommandKind, ExtraArg, Registry, ValueType};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::{Error, Result};

/// Sieve script parser, borrowing the registry it validates against.
pub struct Parser<'r> {
    registry: &'r Registry,
}

impl<'r> Parser<'r> {
    /// Creates a parser over the given registry.
    #[must_use]
    pub const fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Parses a complete script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lex`] or [`Error::Parse`] describing the first
    /// problem found, with its source line.
    pub fn parse(&self, input: &str) -> Result<Script> {
        tracing::trace!(bytes = input.len(), "parsing sieve script");
        let mut run = Run {
            registry: self.registry,
            lexer: Lexer::new(input),
            peeked: None,
            requires: BTreeSet::new(),
        };
        run.parse_script()
    }
}

struct Run<'r, 'a> {
    registry: &'r Registry,
    lexer: Lexer<'a>,
    peeked: Option<Token>,
    requires: BTreeSet<String>,
}

impl Run<'_, '_> {
    /// Next non-comment token.
    fn next(&mut self) -> Result<Option<Token>> {
        if let Some(token) = self.peeked.take() {
            return Ok(Some(token));
        }
        while let Some(token) = self.lexer.next_token()? {
            if !token.is_comment() {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        if self.peeked.is_none() {
            self.peeked = self.next()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Line to report for end-of-input errors.
    fn eof_line(&self) -> usize {
        self.lexer.line()
    }

    fn parse_script(&mut self) -> Result<Script> {
        let mut script = Script::new();
        let mut prev: Option<String> = None;

        while let Some(token) = self.next()? {
            let TokenKind::Identifier(name) = token.kind else {
                return Err(Error::parse(
                    token.line,
                    format!("{} found while identifier expected", token.kind.describe()),
                ));
            };
            let command = self.parse_command(&name, token.line, prev.as_deref())?;
            prev = Some(command.name().to_string());
            if command.name() == "require" {
                self.absorb_require(command);
            } else {
                script.push(command);
            }
        }

        script.requires = self.requires.clone();
        Ok(script)
    }

    fn parse_block(&mut self, parent: &mut Command) -> Result<()> {
        let mut prev: Option<String> = None;
        loop {
            let Some(token) = self.next()? else {
                return Err(Error::parse(
                    self.eof_line(),
                    "end of script reached while '}' expected",
                ));
            };
            match token.kind {
                TokenKind::RBrace => return Ok(()),
                TokenKind::Identifier(name) => {
                    let command = self.parse_command(&name, token.line, prev.as_deref())?;
                    prev = Some(command.name().to_string());
                    if command.name() == "require" {
                        self.absorb_require(command);
                    } else {
                        parent.children.push(command);
                    }
                }
                other => {
                    return Err(Error::parse(
                        token.line,
                        format!("{} found while identifier expected", other.describe()),
                    ));
                }
            }
        }
    }

    /// Parses one command statement: `identifier arguments (';' | block)`.
    fn parse_command(
        &mut self,
        name: &str,
        line: usize,
        prev: Option<&str>,
    ) -> Result<Command> {
        let definition = self
            .registry
            .get(name)
            .ok_or_else(|| Error::parse(line, format!("unknown command {name}")))?;

        if definition.kind == CommandKind::Test {
            return Err(Error::parse(
                line,
                format!("{name} may not appear as a first command"),
            ));
        }
        if !definition.must_follow.is_empty() {
            let ok = prev.is_some_and(|p| definition.must_follow.iter().any(|f| f == p));
            if !ok {
                return Err(Error::parse(
                    line,
                    format!(
                        "the {name} command must follow an {} command",
                        definition.must_follow.join(" or ")
                    ),
                ));
            }
        }
        self.check_extension(definition.extension.as_deref(), line)?;

        let mut command = Command::new(definition);
        self.parse_arguments(&mut command)?;

        match self.next()? {
            Some(Token {
                kind: TokenKind::Semicolon,
                ..
            }) if !command.definition.accepts_block => {
                self.finalize(&mut command, line)?;
            }
            Some(Token {
                kind: TokenKind::LBrace,
                ..
            }) if command.definition.accepts_block => {
                self.finalize(&mut command, line)?;
                self.parse_block(&mut command)?;
            }
            Some(token) => {
                let expected = if command.definition.accepts_block {
                    "'{'"
                } else {
                    "semicolon"
                };
                return Err(Error::parse(
                    token.line,
                    format!("{} found while {expected} expected", token.kind.describe()),
                ));
            }
            None => {
                let expected = if command.definition.accepts_block {
                    "'{'"
                } else {
                    "semicolon"
                };
                return Err(Error::parse(
                    self.eof_line(),
                    format!("end of script reached while {expected} expected"),
                ));
            }
        }

        Ok(command)
    }

    /// Parses a nested test: `identifier arguments`.
    fn parse_test(&mut self, name: &str, line: usize) -> Result<Command> {
        let definition = self
            .registry
            .get(name)
            .ok_or_else(|| Error::parse(line, format!("unknown command {name}")))?;
        if definition.kind != CommandKind::Test {
            return Err(Error::parse(
                line,
                format!("expected test command, '{name}' found instead"),
            ));
        }
        self.check_extension(definition.extension.as_deref(), line)?;

        let mut test = Command::new(definition);
        self.parse_arguments(&mut test)?;
        self.finalize(&mut test, line)?;
        Ok(test)
    }

    /// Consumes argument tokens until a statement or list delimiter.
    fn parse_arguments(&mut self, command: &mut Command) -> Result<()> {
        // first slot not yet considered for positional binding; tags only
        // match from here on, so they cannot jump back over positionals
        let mut next_positional = 0usize;

        loop {
            let Some(token) = self.peek()? else {
                return Ok(());
            };
            match &token.kind {
                TokenKind::Semicolon
                | TokenKind::LBrace
                | TokenKind::RBrace
                | TokenKind::RParen
                | TokenKind::Comma => return Ok(()),
                _ => {}
            }

            let token = self.next()?.ok_or_else(|| {
                Error::parse(self.eof_line(), "end of script reached")
            })?;
            let line = token.line;
            match token.kind {
                TokenKind::Tag(tag) => {
                    self.bind_tag(command, &tag, line, next_positional)?;
                }
                TokenKind::Number { value, text } => {
                    bind_positional(
                        command,
                        ArgValue::Number { value, text },
                        line,
                        &mut next_positional,
                    )?;
                }
                TokenKind::String(text) => {
                    bind_positional(
                        command,
                        ArgValue::Str(SieveString::quoted(text)),
                        line,
                        &mut next_positional,
                    )?;
                }
                TokenKind::Multiline(text) => {
                    bind_positional(
                        command,
                        ArgValue::Str(SieveString::multiline(text)),
                        line,
                        &mut next_positional,
                    )?;
                }
                TokenKind::LBracket => {
                    let list = self.parse_string_list(line)?;
                    bind_positional(command, ArgValue::List(list), line, &mut next_positional)?;
                }
                TokenKind::Identifier(name) => {
                    let Some(slot) = unfilled_slot_accepting(command, ValueType::Test) else {
                        return Err(Error::parse(
                            line,
                            format!(
                                "unexpected argument '{name}' for command {}",
                                command.name()
                            ),
                        ));
                    };
                    let slot_name = slot.name.clone();
                    let test = self.parse_test(&name, line)?;
                    command.push_argument(&slot_name, ArgValue::Test(Box::new(test)));
                }
                TokenKind::LParen => {
                    let Some(slot) = unfilled_slot_accepting(command, ValueType::TestList)
                    else {
                        return Err(Error::parse(
                            line,
                            format!("unexpected '(' after command {}", command.name()),
                        ));
                    };
                    let slot_name = slot.name.clone();
                    let tests = self.parse_test_list()?;
                    command.push_argument(&slot_name, ArgValue::TestList(tests));
                }
                other => {
                    return Err(Error::parse(
                        line,
                        format!("unexpected token '{other}'"),
                    ));
                }
            }
        }
    }

    /// `[` already consumed; parses `string *("," string) "]"`.
    fn parse_string_list(&mut self, open_line: usize) -> Result<Vec<SieveString>> {
        let mut items = Vec::new();
        loop {
            match self.next()? {
                Some(Token {
                    kind: TokenKind::String(text),
                    ..
                }) => items.push(SieveString::quoted(text)),
                Some(token) => {
                    return Err(Error::parse(
                        token.line,
                        format!("{} found while string expected", token.kind.describe()),
                    ));
                }
                None => {
                    return Err(Error::parse(
                        self.eof_line(),
                        "end of script reached while string expected",
                    ));
                }
            }
            match self.next()? {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => {}
                Some(Token {
                    kind: TokenKind::RBracket,
                    ..
                }) => return Ok(items),
                Some(token) => {
                    return Err(Error::parse(
                        token.line,
                        format!(
                            "{} found while ',' or ']' expected",
                            token.kind.describe()
                        ),
                    ));
                }
                None => {
                    return Err(Error::parse(
                        self.eof_line(),
                        format!("unclosed string list opened on line {open_line}"),
                    ));
                }
            }
        }
    }

    /// `(` already consumed; parses `test *("," test) ")"`.
    fn parse_test_list(&mut self) -> Result<Vec<Command>> {
        let mut tests = Vec::new();
        loop {
            match self.next()? {
                Some(Token {
                    kind: TokenKind::Identifier(name),
                    line,
                }) => tests.push(self.parse_test(&name, line)?),
                Some(token) => {
                    return Err(Error::parse(
                        token.line,
                        format!(
                            "{} found while identifier expected",
                            token.kind.describe()
                        ),
                    ));
                }
                None => {
                    return Err(Error::parse(
                        self.eof_line(),
                        "end of script reached while identifier expected",
                    ));
                }
            }
            match self.next()? {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => {}
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => return Ok(tests),
                Some(token) => {
                    return Err(Error::parse(
                        token.line,
                        format!(
                            "{} found while ',' or ')' expected",
                            token.kind.describe()
                        ),
                    ));
                }
                None => {
                    return Err(Error::parse(
                        self.eof_line(),
                        "end of script reached while ')' expected",
                    ));
                }
            }
        }
    }

    /// Binds a tag argument and, when the slot declares one, its companion.
    fn bind_tag(
        &mut self,
        command: &mut Command,
        tag: &str,
        line: usize,
        next_positional: usize,
    ) -> Result<()> {
        let definition = command.definition.clone();
        for slot in definition.args.iter().skip(next_positional) {
            if command.has_argument(&slot.name) {
                continue;
            }
            if !slot.is_tag() {
                if slot.required {
                    // a tag cannot jump over an unfilled required positional
                    break;
                }
                continue;
            }
            let Some(gate) = slot.match_tag(tag) else {
                continue;
            };
            self.check_extension(slot.extension.as_deref(), line)?;
            self.check_extension(gate, line)?;

            let companion = match &slot.extra {
                Some(extra) if extra.applies_to(tag) => {
                    Some(Box::new(self.parse_companion(&slot.name, extra)?))
                }
                _ => None,
            };
            command.push_argument(
                &slot.name,
                ArgValue::Tag {
                    name: tag.to_string(),
                    companion,
                },
            );
            return Ok(());
        }
        Err(Error::parse(
            line,
            format!("bad argument {tag} for command {}", command.name()),
        ))
    }

    /// Parses the companion argument following a tag like `:comparator`.
    fn parse_companion(
        &mut self,
        slot_name: &str,
        extra: &ExtraArg,
    ) -> Result<ArgValue> {
        let expected = if extra.types.contains(&ValueType::Number) {
            "number"
        } else {
            "string"
        };
        let Some(token) = self.next()? else {
            return Err(Error::parse(
                self.eof_line(),
                format!("end of script reached while {expected} expected"),
            ));
        };
        let line = token.line;
        let value = match token.kind {
            TokenKind::Number { value, text } if extra.types.contains(&ValueType::Number) => {
                ArgValue::Number { value, text }
            }
            TokenKind::String(text) if extra.types.contains(&ValueType::String) => {
                if !extra.values.is_empty()
                    && !extra.values.iter().any(|v| v.eq_ignore_ascii_case(&text))
                {
                    return Err(Error::parse(
                        line,
                        format!("bad value \"{text}\" for argument '{slot_name}'"),
                    ));
                }
                ArgValue::Str(SieveString::quoted(text))
            }
            TokenKind::Multiline(text) if extra.types.contains(&ValueType::String) => {
                ArgValue::Str(SieveString::multiline(text))
            }
            TokenKind::LBracket if extra.types.contains(&ValueType::StringList) => {
                ArgValue::List(self.parse_string_list(line)?)
            }
            other => {
                return Err(Error::parse(
                    line,
                    format!("{} found while {expected} expected", other.describe()),
                ));
            }
        };
        Ok(value)
    }

    /// Repairs optional-before-required positional ambiguity, then checks
    /// that every required slot is bound.
    ///
    /// Positional values bind greedily, so `setflag "\\Seen";` first lands
    /// the flag list in the optional `variable-name` slot; when a required
    /// slot is still empty at the end, the value of a compatible earlier
    /// optional slot moves over to fill it.
    fn finalize(&self, command: &mut Command, line: usize) -> Result<()> {
        let definition = command.definition.clone();
        for (idx, slot) in definition.args.iter().enumerate() {
            if !slot.required || slot.is_tag() || command.has_argument(&slot.name) {
                continue;
            }
            let donor = definition.args[..idx].iter().rev().find(|earlier| {
                !earlier.required
                    && !earlier.is_tag()
                    && command
                        .argument(&earlier.name)
                        .is_some_and(|v| slot.accepts(v.value_type()))
            });
            if let Some(donor) = donor
                && let Some(value) = command.take_argument(&donor.name.clone())
            {
                command.push_argument(&slot.name, value);
            }
        }
        for slot in &definition.args {
            if slot.required && !command.has_argument(&slot.name) {
                return Err(Error::parse(
                    line,
                    format!(
                        "missing required argument '{}' for command {}",
                        slot.name,
                        command.name()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_extension(&mut self, extension: Option<&str>, line: usize) -> Result<()> {
        if let Some(ext) = extension
            && !self.requires.contains(ext)
        {
            return Err(Error::parse(line, format!("extension '{ext}' not loaded")));
        }
        Ok(())
    }

    /// Records the capabilities of a parsed `require` statement.
    fn absorb_require(&mut self, mut command: Command) {
        match command.take_argument("capabilities") {
            Some(ArgValue::Str(s)) => {
                self.requires.insert(s.text);
            }
            Some(ArgValue::List(items)) => {
                for item in items {
                    self.requires.insert(item.text);
                }
            }
            _ => {}
        }
    }
}

fn unfilled_slot_accepting(command: &Command, value_type: ValueType) -> Option<&ArgSlot> {
    command
        .definition
        .args
        .iter()
        .find(|slot| slot.types.contains(&value_type) && !command.has_argument(&slot.name))
}

/// Binds a positional (non-tag) value to the next compatible slot.
fn bind_positional(
    command: &mut Command,
    value: ArgValue,
    line: usize,
    next_positional: &mut usize,
) -> Result<()> {
    let definition = command.definition.clone();
    let value_type = value.value_type();
    let mut idx = *next_positional;
    while let Some(slot) = definition.args.get(idx) {
        if command.has_argument(&slot.name) {
            idx += 1;
            continue;
        }
        if slot.is_tag() {
            if slot.required {
                break; // e.g. size without :over/:under
            }
            idx += 1;
            continue;
        }
        if slot.accepts(value_type) {
            command.push_argument(&slot.name, value);
            *next_positional = idx + 1;
            return Ok(());
        }
        if slot.required {
            break;
        }
        idx += 1;
    }
    Err(Error::parse(
        line,
        format!(
            "bad argument {} for command {}",
            describe_value(&value),
            command.name()
        ),
    ))
}

fn describe_value(value: &ArgValue) -> String {
    match value {
        ArgValue::Tag { name, .. } => name.clone(),
        ArgValue::Number { text, .. } => text.clone(),
        ArgValue::Str(s) => format!("\"{}\"", s.text),
        ArgValue::List(_) => "string list".to_string(),
        ArgValue::Test(t) => t.name().to_string(),
        ArgValue::TestList(_) => "test list".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Script> {
        let registry = Registry::default();
        Parser::new(&registry).parse(input)
    }

    #[test]
    fn test_require_only() {
        let script = parse("require [\"fileinto\"];").unwrap();
        assert!(script.requires.contains("fileinto"));
        assert!(script.commands.is_empty());
        assert_eq!(script.to_sieve(), "require [\"fileinto\"];\n");
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse("require [\"fileinto\"]").unwrap_err();
        assert_eq!(err.line(), Some(1));
        assert!(err.to_string().contains("semicolon"));
    }

    #[test]
    fn test_extension_not_loaded() {
        let err = parse("fileinto \"X\";").unwrap_err();
        assert_eq!(
            err.to_string(),
            "line 1: extension 'fileinto' not loaded"
        );
    }

    #[test]
    fn test_if_header_fileinto() {
        let script = parse(
            "require [\"fileinto\"];\n\
             if header :is \"Sender\" \"a@b\" {\n\
                 fileinto \"X\";\n\
             }\n",
        )
        .unwrap();
        assert_eq!(script.commands.len(), 1);
        let if_cmd = &script.commands[0];
        assert_eq!(if_cmd.name(), "if");
        let Some(ArgValue::Test(test)) = if_cmd.argument("test") else {
            panic!("missing test argument");
        };
        assert_eq!(test.name(), "header");
        assert_eq!(
            test.argument("match-type"),
            Some(&ArgValue::tag(":is"))
        );
        assert_eq!(if_cmd.children.len(), 1);
        assert_eq!(if_cmd.children[0].name(), "fileinto");
    }

    #[test]
    fn test_require_accumulates() {
        let script = parse(
            "require \"fileinto\";\nrequire [\"copy\", \"vacation\"];\nkeep;\n",
        )
        .unwrap();
        assert_eq!(
            script.requires.iter().cloned().collect::<Vec<_>>(),
            ["copy", "fileinto", "vacation"]
        );
    }

    #[test]
    fn test_require_after_command_allowed() {
        // deliberate leniency: a require following other commands still loads
        let script = parse("keep;\nrequire \"fileinto\";\nfileinto \"X\";\n").unwrap();
        assert_eq!(script.commands.len(), 2);
    }

    #[test]
    fn test_unknown_command() {
        let err = parse("macommande \"Toto\";").unwrap_err();
        assert!(err.to_string().contains("unknown command macommande"));
    }

    #[test]
    fn test_test_outside_control() {
        assert!(parse("true;").is_err());
    }

    #[test]
    fn test_elsif_requires_if() {
        let err = parse("elsif true {\n}\n").unwrap_err();
        assert!(err.to_string().contains("must follow an if or elsif"));
    }

    #[test]
    fn test_setflag_single_argument_form() {
        let script =
            parse("require \"imap4flags\";\nsetflag \"\\\\Seen\";\n").unwrap();
        let setflag = &script.commands[0];
        assert!(setflag.argument("variable-name").is_none());
        assert!(setflag.argument("list-of-flags").is_some());
    }

    #[test]
    fn test_setflag_two_argument_form() {
        let script =
            parse("require \"imap4flags\";\nsetflag \"var\" [\"\\\\Seen\"];\n").unwrap();
        let setflag = &script.commands[0];
        assert_eq!(
            setflag.argument("variable-name"),
            Some(&ArgValue::string("var"))
        );
        assert!(setflag.argument("list-of-flags").is_some());
    }

    #[test]
    fn test_tag_cannot_skip_required_positional() {
        // tags must come before the positional arguments
        assert!(parse("if address \"From\" :is \"tim@example.com\" {\ndiscard;\n}\n").is_err());
    }

    #[test]
    fn test_relational_needs_require() {
        let err = parse(
            "if header :count \"ge\" \"X-Priority\" \"3\" {\ndiscard;\n}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("'relational' not loaded"));
    }

    #[test]
    fn test_size_quantifier() {
        let script = parse("if size :over 100K {\ndiscard;\n}\n").unwrap();
        let Some(ArgValue::Test(size)) = script.commands[0].argument("test") else {
            panic!("missing test");
        };
        assert_eq!(
            size.argument("limit"),
            Some(&ArgValue::Number {
                value: 100 * 1024,
                text: "100K".into()
            })
        );
    }
}
