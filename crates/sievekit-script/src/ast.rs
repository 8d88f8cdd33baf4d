//! Command tree, builder operations and the canonical serializer.
//!
//! A [`Script`] owns the set of declared capabilities plus a list of
//! top-level [`Command`] nodes. Trees come out of the parser fully
//! validated, but can also be assembled by hand through the builder
//! methods and then rendered with [`Script::to_sieve`].

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::grammar::{CommandDefinition, CommandKind, ValueType};
use crate::{Error, Result};

/// A string argument, remembering whether it was written as a quoted
/// string or a `text:` multiline literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SieveString {
    /// Unescaped content.
    pub text: String,
    /// True for `text: ... .` literals.
    pub multiline: bool,
}

impl SieveString {
    /// A quoted string.
    #[must_use]
    pub fn quoted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            multiline: false,
        }
    }

    /// A multiline literal.
    #[must_use]
    pub fn multiline(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            multiline: true,
        }
    }
}

/// A bound argument value. Values keep their lexical type so serialization
/// reproduces the author's spelling (quantified numbers, multiline
/// strings, bracketed lists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// `:tag`, optionally with its companion argument
    /// (e.g. `:comparator "i;octet"`).
    Tag {
        /// Spelling including the colon.
        name: String,
        /// Companion argument, when the slot declares one.
        companion: Option<Box<ArgValue>>,
    },
    /// Number, quantifier already applied.
    Number {
        /// Numeric value.
        value: u64,
        /// Source spelling (`100K`).
        text: String,
    },
    /// Single string.
    Str(SieveString),
    /// Bracketed string list.
    List(Vec<SieveString>),
    /// Nested test.
    Test(Box<Command>),
    /// Parenthesized test list.
    TestList(Vec<Command>),
}

impl ArgValue {
    /// Tag value without companion.
    #[must_use]
    pub fn tag(name: impl Into<String>) -> Self {
        Self::Tag {
            name: name.into(),
            companion: None,
        }
    }

    /// Tag value with a companion.
    #[must_use]
    pub fn tag_with(name: impl Into<String>, companion: Self) -> Self {
        Self::Tag {
            name: name.into(),
            companion: Some(Box::new(companion)),
        }
    }

    /// Plain number.
    #[must_use]
    pub fn number(value: u64) -> Self {
        Self::Number {
            value,
            text: value.to_string(),
        }
    }

    /// Quoted string.
    #[must_use]
    pub fn string(text: impl Into<String>) -> Self {
        Self::Str(SieveString::quoted(text))
    }

    /// String list from quoted strings.
    #[must_use]
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(SieveString::quoted).collect())
    }

    /// The lexical type of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Tag { .. } => ValueType::Tag,
            Self::Number { .. } => ValueType::Number,
            Self::Str(_) => ValueType::String,
            Self::List(_) => ValueType::StringList,
            Self::Test(_) => ValueType::Test,
            Self::TestList(_) => ValueType::TestList,
        }
    }
}

/// One node of the command tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The definition this node was parsed or built against.
    pub definition: Arc<CommandDefinition>,
    /// Bound arguments, keyed by slot name, in binding order.
    arguments: Vec<(String, ArgValue)>,
    /// Child commands (controls with a block only).
    pub children: Vec<Command>,
}

impl Command {
    /// Creates an empty node for the given definition.
    #[must_use]
    pub fn new(definition: Arc<CommandDefinition>) -> Self {
        Self {
            definition,
            arguments: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The command category.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.definition.kind
    }

    /// Returns the bound value of a slot, if set.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&ArgValue> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Whether a slot is bound.
    #[must_use]
    pub fn has_argument(&self, name: &str) -> bool {
        self.argument(name).is_some()
    }

    /// Binds (or rebinds) a slot, validating name and type against the
    /// definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Build`] if the slot does not exist, the value type
    /// is not accepted, or a tag spelling is not allowed for the slot.
    pub fn set_argument(&mut self, name: &str, value: ArgValue) -> Result<()> {
        let slot = self.definition.slot(name).ok_or_else(|| {
            Error::build(format!(
                "command {} has no argument named '{name}'",
                self.name()
            ))
        })?;
        if !slot.accepts(value.value_type()) {
            return Err(Error::build(format!(
                "argument '{name}' of {} does not accept a {:?}",
                self.name(),
                value.value_type()
            )));
        }
        if let ArgValue::Tag { name: tag, .. } = &value
            && slot.match_tag(tag).is_none()
        {
            return Err(Error::build(format!(
                "bad value {tag} for argument '{name}' of {}",
                self.name()
            )));
        }
        if let Some(existing) = self.arguments.iter_mut().find(|(n, _)| n == name) {
            existing.1 = value;
        } else {
            self.arguments.push((name.to_string(), value));
        }
        Ok(())
    }

    /// Removes a bound argument, returning it.
    pub fn unset_argument(&mut self, name: &str) -> Option<ArgValue> {
        let pos = self.arguments.iter().position(|(n, _)| n == name)?;
        Some(self.arguments.remove(pos).1)
    }

    pub(crate) fn push_argument(&mut self, name: &str, value: ArgValue) {
        self.arguments.push((name.to_string(), value));
    }

    pub(crate) fn take_argument(&mut self, name: &str) -> Option<ArgValue> {
        self.unset_argument(name)
    }

    /// Bound arguments in binding order.
    #[must_use]
    pub fn arguments(&self) -> &[(String, ArgValue)] {
        &self.arguments
    }

    /// Appends a child command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Build`] if this command does not take a block.
    pub fn add_child(&mut self, child: Self) -> Result<()> {
        if !self.definition.accepts_block {
            return Err(Error::build(format!(
                "command {} does not take a block",
                self.name()
            )));
        }
        self.children.push(child);
        Ok(())
    }

    /// Removes the child at `index`, returning it.
    pub fn remove_child(&mut self, index: usize) -> Option<Self> {
        if index < self.children.len() {
            Some(self.children.remove(index))
        } else {
            None
        }
    }

    /// Visits this node, its test arguments and its children, depth-first.
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a Self),
    {
        visit(self);
        for (_, value) in &self.arguments {
            match value {
                ArgValue::Test(test) => test.walk(visit),
                ArgValue::TestList(tests) => {
                    for test in tests {
                        test.walk(visit);
                    }
                }
                _ => {}
            }
        }
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Collects every extension the subtree depends on: the command's own,
    /// any slot-gated tags (`:copy`) and any extension-gated tag values
    /// (`:count`).
    pub(crate) fn collect_extensions(&self, into: &mut BTreeSet<String>) {
        self.walk(&mut |node: &Self| {
            if let Some(ext) = &node.definition.extension {
                into.insert(ext.clone());
            }
            for (slot_name, value) in &node.arguments {
                let Some(slot) = node.definition.slot(slot_name) else {
                    continue;
                };
                if let Some(ext) = &slot.extension {
                    into.insert(ext.clone());
                }
                if let ArgValue::Tag { name, .. } = value
                    && let Some(Some(ext)) = slot.match_tag(name)
                {
                    into.insert(ext.to_string());
                }
            }
        });
    }
}

/// A parsed or hand-built Sieve script.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    /// Capabilities declared via `require`.
    pub requires: BTreeSet<String>,
    /// Top-level commands, `require` statements excluded.
    pub commands: Vec<Command>,
}

impl Script {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a required capability.
    pub fn require(&mut self, capability: impl Into<String>) {
        self.requires.insert(capability.into());
    }

    /// Appends a top-level command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Visits every command in the script, tests included.
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a Command),
    {
        for command in &self.commands {
            command.walk(visit);
        }
    }

    /// The union of declared capabilities and the extensions actually used
    /// by the tree. This is what the serializer emits in the leading
    /// `require` line, so hand-built trees always serialize to loadable
    /// scripts.
    #[must_use]
    pub fn required_extensions(&self) -> BTreeSet<String> {
        let mut set = self.requires.clone();
        for command in &self.commands {
            command.collect_extensions(&mut set);
        }
        set
    }

    /// Renders the canonical Sieve text: a sorted `require` line when any
    /// capability is needed, four-space indentation, one statement per
    /// line, tag arguments in schema order before positionals.
    #[must_use]
    pub fn to_sieve(&self) -> String {
        let mut out = String::new();
        let extensions = self.required_extensions();
        if !extensions.is_empty() {
            out.push_str("require [");
            for (i, ext) in extensions.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted(&mut out, ext);
            }
            out.push_str("];\n");
        }
        for command in &self.commands {
            write_command(&mut out, command, 0);
        }
        out
    }

    /// Renders a debug tree of the script, one node or value per line.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if !self.requires.is_empty() {
            let _ = writeln!(
                out,
                "require {}",
                self.requires
                    .iter()
                    .map(|r| format!("\"{r}\""))
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }
        for command in &self.commands {
            dump_command(&mut out, command, 0);
        }
        out
    }
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

fn write_quoted(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

fn write_multiline(out: &mut String, body: &str) {
    out.push_str("text:\n");
    for line in body.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push('\n');
    }
    out.push('.');
}

/// Writes a value; returns true when the output ended with a multiline
/// terminator, in which case the caller must start a fresh line.
fn write_value(out: &mut String, value: &ArgValue) -> bool {
    match value {
        ArgValue::Tag { name, companion } => {
            out.push_str(name);
            if let Some(companion) = companion {
                out.push(' ');
                return write_value(out, companion);
            }
            false
        }
        ArgValue::Number { text, .. } => {
            out.push_str(text);
            false
        }
        ArgValue::Str(s) => {
            if s.multiline {
                write_multiline(out, &s.text);
                true
            } else {
                write_quoted(out, &s.text);
                false
            }
        }
        ArgValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted(out, &item.text);
            }
            out.push(']');
            false
        }
        ArgValue::Test(test) => write_test(out, test),
        ArgValue::TestList(tests) => {
            out.push('(');
            for (i, test) in tests.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_test(out, test);
            }
            out.push(')');
            false
        }
    }
}

/// Writes command name and arguments inline (shared by tests and
/// statements). Returns true when a multiline string broke the line.
fn write_head(out: &mut String, command: &Command) -> bool {
    out.push_str(command.name());
    let mut broke = false;
    for slot in &command.definition.args {
        if let Some(value) = command.argument(&slot.name) {
            if broke {
                out.push('\n');
            } else {
                out.push(' ');
            }
            broke = write_value(out, value);
        }
    }
    broke
}

fn write_test(out: &mut String, test: &Command) -> bool {
    write_head(out, test)
}

fn write_command(out: &mut String, command: &Command, level: usize) {
    indent(out, level);
    let broke = write_head(out, command);
    if command.definition.accepts_block {
        if broke {
            out.push('\n');
        }
        out.push_str(" {\n");
        for child in &command.children {
            write_command(out, child, level + 1);
        }
        indent(out, level);
        out.push_str("}\n");
    } else {
        if broke {
            out.push('\n');
        }
        out.push_str(";\n");
    }
}

fn dump_value(out: &mut String, value: &ArgValue, level: usize) {
    match value {
        ArgValue::Tag { name, companion } => {
            indent(out, level);
            out.push_str(name);
            out.push('\n');
            if let Some(companion) = companion {
                dump_value(out, companion, level);
            }
        }
        ArgValue::Number { text, .. } => {
            indent(out, level);
            out.push_str(text);
            out.push('\n');
        }
        ArgValue::Str(s) => {
            if s.multiline {
                indent(out, level);
                out.push_str("text:\n");
                out.push_str(&s.text);
                out.push_str(".\n");
            } else {
                indent(out, level);
                write_quoted(out, &s.text);
                out.push('\n');
            }
        }
        ArgValue::List(items) => {
            indent(out, level);
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_quoted(out, &item.text);
            }
            out.push_str("]\n");
        }
        ArgValue::Test(test) => dump_command(out, test, level),
        ArgValue::TestList(tests) => {
            for test in tests {
                dump_command(out, test, level);
            }
        }
    }
}

fn dump_command(out: &mut String, command: &Command, level: usize) {
    indent(out, level);
    let _ = writeln!(
        out,
        "{} (type: {})",
        command.name(),
        command.kind().as_str()
    );
    for slot in &command.definition.args {
        if let Some(value) = command.argument(&slot.name) {
            dump_value(out, value, level + 1);
        }
    }
    for child in &command.children {
        dump_command(out, child, level + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Registry;

    fn command(registry: &Registry, name: &str) -> Command {
        Command::new(registry.get(name).unwrap())
    }

    #[test]
    fn test_builder_simple_action() {
        let registry = Registry::default();
        let mut fileinto = command(&registry, "fileinto");
        fileinto
            .set_argument("mailbox", ArgValue::string("Spam"))
            .unwrap();

        let mut script = Script::new();
        script.push(fileinto);

        assert_eq!(
            script.to_sieve(),
            "require [\"fileinto\"];\nfileinto \"Spam\";\n"
        );
    }

    #[test]
    fn test_builder_rejects_unknown_slot() {
        let registry = Registry::default();
        let mut keep = command(&registry, "keep");
        let err = keep
            .set_argument("mailbox", ArgValue::string("X"))
            .unwrap_err();
        assert!(err.to_string().contains("no argument"));
    }

    #[test]
    fn test_builder_rejects_bad_type() {
        let registry = Registry::default();
        let mut fileinto = command(&registry, "fileinto");
        assert!(
            fileinto
                .set_argument("mailbox", ArgValue::number(3))
                .is_err()
        );
    }

    #[test]
    fn test_builder_rejects_bad_tag_value() {
        let registry = Registry::default();
        let mut header = command(&registry, "header");
        let err = header
            .set_argument("match-type", ArgValue::tag(":isnot"))
            .unwrap_err();
        assert!(err.to_string().contains("bad value"));
    }

    #[test]
    fn test_add_child_requires_block() {
        let registry = Registry::default();
        let mut keep = command(&registry, "keep");
        assert!(keep.add_child(command(&registry, "discard")).is_err());

        let mut if_cmd = command(&registry, "if");
        assert!(if_cmd.add_child(command(&registry, "discard")).is_ok());
        assert_eq!(if_cmd.children.len(), 1);
        assert!(if_cmd.remove_child(0).is_some());
        assert!(if_cmd.remove_child(0).is_none());
    }

    #[test]
    fn test_auto_require_from_tags() {
        let registry = Registry::default();
        let mut redirect = command(&registry, "redirect");
        redirect.set_argument("copy", ArgValue::tag(":copy")).unwrap();
        redirect
            .set_argument("address", ArgValue::string("a@b"))
            .unwrap();

        let mut script = Script::new();
        script.push(redirect);

        let exts = script.required_extensions();
        assert!(exts.contains("copy"));
        assert!(script.to_sieve().starts_with("require [\"copy\"];\n"));
    }

    #[test]
    fn test_serializer_block_and_nesting() {
        let registry = Registry::default();
        let mut test = command(&registry, "header");
        test.set_argument("match-type", ArgValue::tag(":is")).unwrap();
        test.set_argument("header-names", ArgValue::list(["Sender"]))
            .unwrap();
        test.set_argument("key-list", ArgValue::list(["a@b"])).unwrap();

        let mut fileinto = command(&registry, "fileinto");
        fileinto
            .set_argument("mailbox", ArgValue::string("X"))
            .unwrap();

        let mut if_cmd = command(&registry, "if");
        if_cmd
            .set_argument("test", ArgValue::Test(Box::new(test)))
            .unwrap();
        if_cmd.add_child(fileinto).unwrap();

        let mut script = Script::new();
        script.push(if_cmd);

        assert_eq!(
            script.to_sieve(),
            "require [\"fileinto\"];\n\
             if header :is [\"Sender\"] [\"a@b\"] {\n\
             \x20   fileinto \"X\";\n\
             }\n"
        );
    }

    #[test]
    fn test_serializer_escapes_quotes() {
        let registry = Registry::default();
        let mut redirect = command(&registry, "redirect");
        redirect
            .set_argument("address", ArgValue::string("a\"b\\c"))
            .unwrap();
        let mut script = Script::new();
        script.push(redirect);
        assert_eq!(script.to_sieve(), "redirect \"a\\\"b\\\\c\";\n");
    }

    #[test]
    fn test_serializer_multiline_terminator() {
        let registry = Registry::default();
        let mut reject = command(&registry, "reject");
        reject
            .set_argument(
                "text",
                ArgValue::Str(SieveString::multiline("gone\n.away\n")),
            )
            .unwrap();
        let mut script = Script::new();
        script.requires.insert("reject".into());
        script.push(reject);

        // dot-stuffed body, lone-dot terminator, semicolon on its own line
        assert_eq!(
            script.to_sieve(),
            "require [\"reject\"];\nreject text:\ngone\n..away\n.\n;\n"
        );
    }

    #[test]
    fn test_walk_visits_tests_and_children() {
        let registry = Registry::default();
        let mut not = command(&registry, "not");
        not.set_argument(
            "test",
            ArgValue::Test(Box::new(command(&registry, "true"))),
        )
        .unwrap();

        let mut if_cmd = command(&registry, "if");
        if_cmd
            .set_argument("test", ArgValue::Test(Box::new(not)))
            .unwrap();
        if_cmd.add_child(command(&registry, "discard")).unwrap();

        let mut script = Script::new();
        script.push(if_cmd);

        let mut names = Vec::new();
        script.walk(&mut |c| names.push(c.name().to_string()));
        assert_eq!(names, ["if", "not", "true", "discard"]);
    }

    #[test]
    fn test_dump_shape() {
        let registry = Registry::default();
        let mut size = command(&registry, "size");
        size.set_argument("range", ArgValue::tag(":over")).unwrap();
        size.set_argument("limit", ArgValue::number(100)).unwrap();

        let mut if_cmd = command(&registry, "if");
        if_cmd
            .set_argument("test", ArgValue::Test(Box::new(size)))
            .unwrap();
        if_cmd.add_child(command(&registry, "discard")).unwrap();

        let mut script = Script::new();
        script.push(if_cmd);

        assert_eq!(
            script.dump(),
            "if (type: control)\n\
             \x20   size (type: test)\n\
             \x20       :over\n\
             \x20       100\n\
             \x20   discard (type: action)\n"
        );
    }
}
