//! Declarative command grammar and the command registry.
//!
//! Every known Sieve command is described by a [`CommandDefinition`]: its
//! category, the extension it belongs to, whether it opens a block, and an
//! ordered list of [`ArgSlot`]s. The parser is entirely data-driven by
//! these definitions, which is what makes the language extensible at
//! runtime: applications register new definitions instead of writing
//! parsing code.

use std::collections::HashMap;
use std::sync::Arc;

/// Command category, RFC 5228 section 2.9/2.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Control structures (`if`, `require`, `stop`, ...).
    Control,
    /// Actions applied to a message (`fileinto`, `discard`, ...).
    Action,
    /// Tests used inside conditionals (`header`, `anyof`, ...).
    Test,
}

impl CommandKind {
    /// Lowercase name used in diagnostics and dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Action => "action",
            Self::Test => "test",
        }
    }
}

/// Lexical type a slot can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A `:tag` literal.
    Tag,
    /// A number with optional quantifier.
    Number,
    /// A quoted or multiline string.
    String,
    /// A bracketed string list (a bare string satisfies this too).
    StringList,
    /// A single nested test.
    Test,
    /// A parenthesized list of tests.
    TestList,
}

/// Companion argument consumed right after a tag (e.g. the string after
/// `:comparator`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraArg {
    /// Accepted types for the companion.
    pub types: Vec<ValueType>,
    /// Allowed values; empty means unconstrained. For string companions the
    /// comparison is against the unquoted content.
    pub values: Vec<String>,
    /// Tag spellings that take the companion; empty means all of them.
    pub valid_for: Vec<String>,
}

impl ExtraArg {
    /// Companion is a single string.
    #[must_use]
    pub fn string() -> Self {
        Self {
            types: vec![ValueType::String],
            values: Vec::new(),
            valid_for: Vec::new(),
        }
    }

    /// Companion is a number.
    #[must_use]
    pub fn number() -> Self {
        Self {
            types: vec![ValueType::Number],
            values: Vec::new(),
            valid_for: Vec::new(),
        }
    }

    /// Companion is a string or a string list.
    #[must_use]
    pub fn string_or_list() -> Self {
        Self {
            types: vec![ValueType::String, ValueType::StringList],
            values: Vec::new(),
            valid_for: Vec::new(),
        }
    }

    /// Restricts the companion to the given values.
    #[must_use]
    pub fn values(mut self, values: &[&str]) -> Self {
        self.values = values.iter().map(|v| (*v).to_string()).collect();
        self
    }

    /// Restricts which tag spellings consume the companion.
    #[must_use]
    pub fn valid_for(mut self, tags: &[&str]) -> Self {
        self.valid_for = tags.iter().map(|v| (*v).to_string()).collect();
        self
    }

    /// Whether the given tag spelling consumes this companion.
    #[must_use]
    pub fn applies_to(&self, tag: &str) -> bool {
        self.valid_for.is_empty()
            || self.valid_for.iter().any(|v| v.eq_ignore_ascii_case(tag))
    }
}

/// One argument slot of a command definition.
///
/// Tag slots double as mutual-exclusion groups: a slot binds at most one of
/// its spellings, so `:is` and `:contains` (same slot) cannot both appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSlot {
    /// Semantic name (`"match-type"`, `"key-list"`, ...).
    pub name: String,
    /// Accepted types.
    pub types: Vec<ValueType>,
    /// Whether the slot must be filled.
    pub required: bool,
    /// Allowed tag spellings for tag slots.
    pub values: Vec<String>,
    /// Additional tag spellings gated on an extension
    /// (spelling, extension name).
    pub extension_values: Vec<(String, String)>,
    /// Extension gating the whole slot (e.g. `:copy` needs `copy`).
    pub extension: Option<String>,
    /// Companion argument description, if any.
    pub extra: Option<ExtraArg>,
}

impl ArgSlot {
    fn new(name: &str, types: Vec<ValueType>) -> Self {
        Self {
            name: name.to_string(),
            types,
            required: false,
            values: Vec::new(),
            extension_values: Vec::new(),
            extension: None,
            extra: None,
        }
    }

    /// Optional tag slot accepting the given spellings.
    #[must_use]
    pub fn tag(name: &str, values: &[&str]) -> Self {
        let mut slot = Self::new(name, vec![ValueType::Tag]);
        slot.values = values.iter().map(|v| (*v).to_string()).collect();
        slot
    }

    /// String slot.
    #[must_use]
    pub fn string(name: &str) -> Self {
        Self::new(name, vec![ValueType::String])
    }

    /// String-or-string-list slot.
    #[must_use]
    pub fn string_or_list(name: &str) -> Self {
        Self::new(name, vec![ValueType::String, ValueType::StringList])
    }

    /// Number slot.
    #[must_use]
    pub fn number(name: &str) -> Self {
        Self::new(name, vec![ValueType::Number])
    }

    /// Single nested test slot.
    #[must_use]
    pub fn test(name: &str) -> Self {
        Self::new(name, vec![ValueType::Test])
    }

    /// Parenthesized test-list slot.
    #[must_use]
    pub fn test_list(name: &str) -> Self {
        Self::new(name, vec![ValueType::TestList])
    }

    /// Marks the slot required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Gates the whole slot on an extension.
    #[must_use]
    pub fn requires_extension(mut self, extension: &str) -> Self {
        self.extension = Some(extension.to_string());
        self
    }

    /// Adds a tag spelling gated on an extension.
    #[must_use]
    pub fn extension_value(mut self, value: &str, extension: &str) -> Self {
        self.extension_values
            .push((value.to_string(), extension.to_string()));
        self
    }

    /// Attaches a companion argument.
    #[must_use]
    pub fn with_companion(mut self, extra: ExtraArg) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Whether this is a tag slot.
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.types.contains(&ValueType::Tag)
    }

    /// Whether the slot accepts a value of the given lexical type.
    ///
    /// A bare string satisfies a string-list slot (RFC 5228: brackets are
    /// optional around a single string).
    #[must_use]
    pub fn accepts(&self, value_type: ValueType) -> bool {
        self.types.contains(&value_type)
            || (value_type == ValueType::String && self.types.contains(&ValueType::StringList))
    }

    /// Matches a tag spelling against this slot.
    ///
    /// Returns the extension the spelling is gated on, if any
    /// (`Some(None)` = matched, ungated).
    #[must_use]
    pub fn match_tag(&self, tag: &str) -> Option<Option<&str>> {
        if self.values.iter().any(|v| v.eq_ignore_ascii_case(tag)) {
            return Some(None);
        }
        self.extension_values
            .iter()
            .find(|(v, _)| v.eq_ignore_ascii_case(tag))
            .map(|(_, ext)| Some(ext.as_str()))
    }
}

/// Full description of one Sieve command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    /// Command name, stored lowercase.
    pub name: String,
    /// Category.
    pub kind: CommandKind,
    /// Extension that must be `require`d to use the command.
    pub extension: Option<String>,
    /// Whether the command takes a `{ ... }` block of children
    /// (controls only).
    pub accepts_block: bool,
    /// Command names this one must directly follow (`elsif`, `else`).
    pub must_follow: Vec<String>,
    /// Ordered argument slots.
    pub args: Vec<ArgSlot>,
}

impl CommandDefinition {
    fn new(name: &str, kind: CommandKind) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            kind,
            extension: None,
            accepts_block: false,
            must_follow: Vec::new(),
            args: Vec::new(),
        }
    }

    /// New control command.
    #[must_use]
    pub fn control(name: &str) -> Self {
        Self::new(name, CommandKind::Control)
    }

    /// New action command.
    #[must_use]
    pub fn action(name: &str) -> Self {
        Self::new(name, CommandKind::Action)
    }

    /// New test command.
    #[must_use]
    pub fn test(name: &str) -> Self {
        Self::new(name, CommandKind::Test)
    }

    /// The command opens a block of child commands.
    #[must_use]
    pub fn with_block(mut self) -> Self {
        self.accepts_block = true;
        self
    }

    /// The command is only valid right after one of the given commands.
    #[must_use]
    pub fn must_follow(mut self, names: &[&str]) -> Self {
        self.must_follow = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Marks the command as part of an extension.
    #[must_use]
    pub fn extension(mut self, name: &str) -> Self {
        self.extension = Some(name.to_string());
        self
    }

    /// Appends an argument slot.
    #[must_use]
    pub fn arg(mut self, slot: ArgSlot) -> Self {
        self.args.push(slot);
        self
    }

    /// Whether a `require` is needed before using the command.
    #[must_use]
    pub fn is_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Looks up a slot by semantic name.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&ArgSlot> {
        self.args.iter().find(|s| s.name == name)
    }
}

/// Mapping from (lowercased) command name to definition.
///
/// The registry is an explicit handle: populate it once at startup,
/// register any application-specific commands, then hand it to the parser.
/// Definitions are reference-counted so parsed trees stay valid however the
/// registry evolves afterwards.
#[derive(Debug, Clone)]
pub struct Registry {
    commands: HashMap<String, Arc<CommandDefinition>>,
}

impl Registry {
    /// Creates an empty registry with no known commands.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Registers a definition, replacing any previous one of the same name.
    pub fn register(&mut self, definition: CommandDefinition) {
        self.commands
            .insert(definition.name.clone(), Arc::new(definition));
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CommandDefinition>> {
        self.commands.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Number of known commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for Registry {
    /// A registry pre-populated with the builtin command set: the RFC 5228
    /// base plus the extensions this crate understands (fileinto, copy,
    /// reject/ereject, vacation, imap4flags, envelope, body, date,
    /// relational, regex, subaddress, variables, mailbox, mboxmetadata).
    fn default() -> Self {
        let mut registry = Self::empty();
        for def in builtin_definitions() {
            registry.register(def);
        }
        registry
    }
}

/// `:comparator "i;..."`, shared by most string tests.
fn comparator_slot() -> ArgSlot {
    ArgSlot::tag("comparator", &[":comparator"])
        .with_companion(ExtraArg::string().values(&["i;octet", "i;ascii-casemap"]))
}

/// Match-type group. `:count`/`:value` need `relational` and consume a
/// relational operator string; `:regex` needs `regex`.
fn match_type_slot() -> ArgSlot {
    ArgSlot::tag("match-type", &[":is", ":contains", ":matches"])
        .extension_value(":count", "relational")
        .extension_value(":value", "relational")
        .extension_value(":regex", "regex")
        .with_companion(
            ExtraArg::string()
                .values(&["gt", "ge", "lt", "le", "eq", "ne"])
                .valid_for(&[":count", ":value"]),
        )
}

/// Address-part group; `:user`/`:detail` come from `subaddress`.
fn address_part_slot() -> ArgSlot {
    ArgSlot::tag("address-part", &[":localpart", ":domain", ":all"])
        .extension_value(":user", "subaddress")
        .extension_value(":detail", "subaddress")
}

fn flags_slot() -> ArgSlot {
    ArgSlot::tag("flags", &[":flags"])
        .requires_extension("imap4flags")
        .with_companion(ExtraArg::string_or_list())
}

#[allow(clippy::too_many_lines)]
fn builtin_definitions() -> Vec<CommandDefinition> {
    vec![
        // -- controls ------------------------------------------------------
        CommandDefinition::control("require")
            .arg(ArgSlot::string_or_list("capabilities").required()),
        CommandDefinition::control("if")
            .with_block()
            .arg(ArgSlot::test("test").required()),
        CommandDefinition::control("elsif")
            .with_block()
            .must_follow(&["if", "elsif"])
            .arg(ArgSlot::test("test").required()),
        CommandDefinition::control("else")
            .with_block()
            .must_follow(&["if", "elsif"]),
        CommandDefinition::control("stop"),
        CommandDefinition::control("set")
            .extension("variables")
            .arg(ArgSlot::string("name").required())
            .arg(ArgSlot::string("value").required()),
        // -- actions -------------------------------------------------------
        CommandDefinition::action("keep").arg(flags_slot()),
        CommandDefinition::action("discard"),
        CommandDefinition::action("redirect")
            .arg(ArgSlot::tag("copy", &[":copy"]).requires_extension("copy"))
            .arg(ArgSlot::string("address").required()),
        CommandDefinition::action("fileinto")
            .extension("fileinto")
            .arg(ArgSlot::tag("copy", &[":copy"]).requires_extension("copy"))
            .arg(ArgSlot::tag("create", &[":create"]).requires_extension("mailbox"))
            .arg(flags_slot())
            .arg(ArgSlot::string("mailbox").required()),
        CommandDefinition::action("reject")
            .extension("reject")
            .arg(ArgSlot::string("text").required()),
        CommandDefinition::action("ereject")
            .extension("ereject")
            .arg(ArgSlot::string("text").required()),
        CommandDefinition::action("vacation")
            .extension("vacation")
            .arg(
                ArgSlot::tag("subject", &[":subject"]).with_companion(ExtraArg::string()),
            )
            .arg(ArgSlot::tag("seconds", &[":seconds"]).with_companion(ExtraArg::number()))
            .arg(ArgSlot::tag("days", &[":days"]).with_companion(ExtraArg::number()))
            .arg(ArgSlot::tag("from", &[":from"]).with_companion(ExtraArg::string()))
            .arg(
                ArgSlot::tag("addresses", &[":addresses"])
                    .with_companion(ExtraArg::string_or_list()),
            )
            .arg(ArgSlot::tag("handle", &[":handle"]).with_companion(ExtraArg::string()))
            .arg(ArgSlot::tag("mime", &[":mime"]))
            .arg(ArgSlot::string("reason").required()),
        CommandDefinition::action("setflag")
            .extension("imap4flags")
            .arg(ArgSlot::string("variable-name"))
            .arg(ArgSlot::string_or_list("list-of-flags").required()),
        CommandDefinition::action("addflag")
            .extension("imap4flags")
            .arg(ArgSlot::string("variable-name"))
            .arg(ArgSlot::string_or_list("list-of-flags").required()),
        CommandDefinition::action("removeflag")
            .extension("imap4flags")
            .arg(ArgSlot::string("variable-name"))
            .arg(ArgSlot::string_or_list("list-of-flags").required()),
        // -- tests ---------------------------------------------------------
        CommandDefinition::test("address")
            .arg(comparator_slot())
            .arg(address_part_slot())
            .arg(match_type_slot())
            .arg(ArgSlot::string_or_list("header-list").required())
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("envelope")
            .extension("envelope")
            .arg(comparator_slot())
            .arg(address_part_slot())
            .arg(match_type_slot())
            .arg(ArgSlot::string_or_list("header-list").required())
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("header")
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(ArgSlot::string_or_list("header-names").required())
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("exists")
            .arg(ArgSlot::string_or_list("header-names").required()),
        CommandDefinition::test("size")
            .arg(ArgSlot::tag("range", &[":over", ":under"]).required())
            .arg(ArgSlot::number("limit").required()),
        CommandDefinition::test("body")
            .extension("body")
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(
                ArgSlot::tag("body-transform", &[":raw", ":content", ":text"])
                    .with_companion(ExtraArg::string_or_list().valid_for(&[":content"])),
            )
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("true"),
        CommandDefinition::test("false"),
        CommandDefinition::test("not").arg(ArgSlot::test("test").required()),
        CommandDefinition::test("anyof").arg(ArgSlot::test_list("tests").required()),
        CommandDefinition::test("allof").arg(ArgSlot::test_list("tests").required()),
        CommandDefinition::test("hasflag")
            .extension("imap4flags")
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(ArgSlot::string_or_list("variable-list"))
            .arg(ArgSlot::string_or_list("list-of-flags").required()),
        CommandDefinition::test("date")
            .extension("date")
            .arg(
                ArgSlot::tag("zone", &[":zone", ":originalzone"])
                    .with_companion(ExtraArg::string().valid_for(&[":zone"])),
            )
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(ArgSlot::string("header-name").required())
            .arg(ArgSlot::string("date-part").required())
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("currentdate")
            .extension("date")
            .arg(ArgSlot::tag("zone", &[":zone"]).with_companion(ExtraArg::string()))
            .arg(comparator_slot())
            .arg(match_type_slot())
            .arg(ArgSlot::string("date-part").required())
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("mailboxexists")
            .extension("mailbox")
            .arg(ArgSlot::string_or_list("mailbox-names").required()),
        CommandDefinition::test("metadata")
            .extension("mboxmetadata")
            .arg(match_type_slot())
            .arg(comparator_slot())
            .arg(ArgSlot::string("mailbox").required())
            .arg(ArgSlot::string("annotation-name").required())
            .arg(ArgSlot::string_or_list("key-list").required()),
        CommandDefinition::test("metadataexists")
            .extension("mboxmetadata")
            .arg(ArgSlot::string("mailbox").required())
            .arg(ArgSlot::string_or_list("annotation-names").required()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_case_insensitive() {
        let registry = Registry::default();
        assert!(registry.get("fileinto").is_some());
        assert!(registry.get("FILEINTO").is_some());
        assert!(registry.get("FileInto").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_builtin_categories() {
        let registry = Registry::default();
        assert_eq!(registry.get("if").unwrap().kind, CommandKind::Control);
        assert_eq!(registry.get("keep").unwrap().kind, CommandKind::Action);
        assert_eq!(registry.get("header").unwrap().kind, CommandKind::Test);
        assert_eq!(registry.get("stop").unwrap().kind, CommandKind::Control);
    }

    #[test]
    fn test_extension_marking() {
        let registry = Registry::default();
        assert!(registry.get("fileinto").unwrap().is_extension());
        assert!(registry.get("vacation").unwrap().is_extension());
        assert!(!registry.get("keep").unwrap().is_extension());
        assert!(!registry.get("redirect").unwrap().is_extension());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = Registry::default();
        let before = registry.len();
        registry.register(CommandDefinition::action("keep"));
        assert_eq!(registry.len(), before);
        assert!(registry.get("keep").unwrap().args.is_empty());
    }

    #[test]
    fn test_match_tag_groups() {
        let slot = match_type_slot();
        assert_eq!(slot.match_tag(":is"), Some(None));
        assert_eq!(slot.match_tag(":CONTAINS"), Some(None));
        assert_eq!(slot.match_tag(":count"), Some(Some("relational")));
        assert_eq!(slot.match_tag(":regex"), Some(Some("regex")));
        assert_eq!(slot.match_tag(":isnot"), None);
    }

    #[test]
    fn test_companion_applicability() {
        let slot = match_type_slot();
        let extra = slot.extra.as_ref().unwrap();
        assert!(extra.applies_to(":count"));
        assert!(extra.applies_to(":value"));
        assert!(!extra.applies_to(":is"));
        assert!(!extra.applies_to(":regex"));
    }

    #[test]
    fn test_string_satisfies_stringlist() {
        let slot = ArgSlot::string_or_list("key-list");
        assert!(slot.accepts(ValueType::String));
        assert!(slot.accepts(ValueType::StringList));
        assert!(!slot.accepts(ValueType::Number));
    }

    #[test]
    fn test_block_and_follow_rules() {
        let registry = Registry::default();
        assert!(registry.get("if").unwrap().accepts_block);
        assert!(!registry.get("stop").unwrap().accepts_block);
        assert_eq!(registry.get("elsif").unwrap().must_follow, ["if", "elsif"]);
        assert_eq!(registry.get("else").unwrap().must_follow, ["if", "elsif"]);
    }
}
