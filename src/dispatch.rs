//! Command lookup tables.
//!
//! Both tables are plain values built once at startup and only read
//! afterwards. The server shares its [`DispatchTable`] between workers
//! through an `Arc`.

use crate::handlers::{self, FileStore, Reply, Request};
use crate::header::Command;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Reply> + Send + 'a>>;

/// A server-side request handler.
pub type Handler = for<'a> fn(&'a FileStore, Request) -> HandlerFuture<'a>;

/// Maps request tags to their handlers.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    handlers: HashMap<Command, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for `command`.
    pub fn register(mut self, command: Command, handler: Handler) -> Self {
        self.handlers.insert(command, handler);
        self
    }

    /// The standard table: LS, GET, PUT and RM.
    pub fn standard() -> Self {
        Self::new()
            .register(Command::Ls, ls)
            .register(Command::Get, get)
            .register(Command::Put, put)
            .register(Command::Rm, rm)
    }

    pub fn lookup(&self, command: Command) -> Option<Handler> {
        self.handlers.get(&command).copied()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn ls(store: &FileStore, request: Request) -> HandlerFuture<'_> {
    Box::pin(handlers::reply_ls(store, request))
}

fn get(store: &FileStore, request: Request) -> HandlerFuture<'_> {
    Box::pin(handlers::reply_get(store, request))
}

fn put(store: &FileStore, request: Request) -> HandlerFuture<'_> {
    Box::pin(handlers::reply_put(store, request))
}

fn rm(store: &FileStore, request: Request) -> HandlerFuture<'_> {
    Box::pin(handlers::reply_rm(store, request))
}

/// Maps interactive command words to tags on the client side.
#[derive(Debug, Clone)]
pub struct CommandWords {
    words: HashMap<&'static str, Command>,
}

impl CommandWords {
    pub fn new() -> Self {
        let words = [
            ("exit", Command::Exit),
            ("help", Command::Help),
            ("ls", Command::Ls),
            ("get", Command::Get),
            ("put", Command::Put),
            ("rm", Command::Rm),
        ]
        .into_iter()
        .collect();
        Self { words }
    }

    /// Unknown words map to [`Command::Error`].
    pub fn lookup(&self, word: &str) -> Command {
        self.words.get(word).copied().unwrap_or(Command::Error)
    }
}

impl Default for CommandWords {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = DispatchTable::standard();
        for command in [Command::Ls, Command::Get, Command::Put, Command::Rm] {
            assert!(table.lookup(command).is_some(), "{command} missing");
        }
        for command in [
            Command::Error,
            Command::Exit,
            Command::Help,
            Command::File,
            Command::LsOut,
            Command::Ack,
            Command::Nak,
        ] {
            assert!(table.lookup(command).is_none(), "{command} registered");
        }
    }

    #[test]
    fn test_command_words() {
        let words = CommandWords::new();
        assert_eq!(words.lookup("get"), Command::Get);
        assert_eq!(words.lookup("exit"), Command::Exit);
        assert_eq!(words.lookup("GET"), Command::Error);
        assert_eq!(words.lookup("mkdir"), Command::Error);
        assert_eq!(words.lookup(""), Command::Error);
    }
}
