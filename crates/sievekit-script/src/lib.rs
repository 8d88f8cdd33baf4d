//! # sievekit-script
//!
//! Lexer, parser, AST and canonical serializer for the Sieve mail
//! filtering language (RFC 5228) and the extensions commonly deployed
//! alongside it (fileinto, copy, reject/ereject, vacation, imap4flags,
//! envelope, body, date, relational, regex, subaddress, variables,
//! mailbox, mboxmetadata).
//!
//! ## Quick start
//!
//! ```
//! use sievekit_script::{Parser, Registry};
//!
//! let registry = Registry::default();
//! let script = Parser::new(&registry)
//!     .parse("require [\"fileinto\"];\nif header :is \"Sender\" \"a@b\" { fileinto \"X\"; }")
//!     .expect("valid script");
//!
//! assert!(script.requires.contains("fileinto"));
//! println!("{}", script.to_sieve());
//! ```
//!
//! ## Extending the grammar
//!
//! Commands are described as data, not code: register a
//! [`CommandDefinition`] and the parser picks it up.
//!
//! ```
//! use sievekit_script::{ArgSlot, CommandDefinition, Parser, Registry};
//!
//! let mut registry = Registry::default();
//! registry.register(
//!     CommandDefinition::action("archive")
//!         .arg(ArgSlot::string("folder").required()),
//! );
//! assert!(Parser::new(&registry).parse("archive \"2024\";").is_ok());
//! ```
//!
//! ## Modules
//!
//! - [`lexer`]: token stream over Sieve source
//! - [`grammar`]: command definitions and the registry
//! - [`parser`]: recursive-descent parser producing [`Script`]
//! - [`ast`]: the command tree, builder API and serializer

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod ast;
mod error;
pub mod grammar;
pub mod lexer;
pub mod parser;

pub use ast::{ArgValue, Command, Script, SieveString};
pub use error::{Error, Result};
pub use grammar::{ArgSlot, CommandDefinition, CommandKind, ExtraArg, Registry, ValueType};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
