use crate::{
    config::SimConfig,
    core::{
        allocator::{AllocError, AllocationId, MemoryManager, Strategy, UnknownStrategy},
        cache::CacheHierarchy,
    },
};

use std::{
    io::{BufRead, Write},
    str::FromStr,
};
use thiserror::Error;
use anyhow::Result;
use log::*;

pub const HELP: &str = "\
Commands:
init memory <size>
set allocator <first_fit | best_fit | worst_fit | buddy>
malloc <size>
free <id>
dump memory
stats
access <address>
exit
";

/// Errors found while reading a command line.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShellError {
    #[error("unknown command '{0}', type 'help'")]
    UnknownCommand(String),
    #[error("'{command}' expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),
    #[error(transparent)]
    UnknownAllocator(#[from] UnknownStrategy),
}

/// A single line of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Init(u64),
    SetAllocator(Strategy),
    Malloc(u64),
    Free(AllocationId),
    Dump,
    Stats,
    Access(u64),
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = ShellError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();

        // Keyword arguments ("memory", "allocator") are
        // optional, as in "init 1024" or "dump".
        let mut next_after = |keyword: &str| {
            words.next().and_then(|word| {
                if word == keyword { words.next() } else { Some(word) }
            })
        };

        let command = match name {
            "init" => {
                let size = next_after("memory")
                    .ok_or(ShellError::MissingArgument { command: "init", expected: "a memory size" })?;
                Command::Init(parse_number(size)?)
            }
            "set" => {
                let strategy = next_after("allocator")
                    .ok_or(ShellError::MissingArgument { command: "set", expected: "an allocator name" })?;
                Command::SetAllocator(strategy.parse()?)
            }
            "malloc" => {
                let size = next_after("")
                    .ok_or(ShellError::MissingArgument { command: "malloc", expected: "a size" })?;
                Command::Malloc(parse_number(size)?)
            }
            "free" => {
                let id = next_after("")
                    .ok_or(ShellError::MissingArgument { command: "free", expected: "a block id" })?;
                Command::Free(parse_number(id)?)
            }
            "access" => {
                let address = next_after("")
                    .ok_or(ShellError::MissingArgument { command: "access", expected: "an address" })?;
                Command::Access(parse_number(address)?)
            }
            "dump" => Command::Dump,
            "stats" => Command::Stats,
            "help" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => return Err(ShellError::UnknownCommand(other.to_string())),
        };

        Ok(command)
    }
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_number(word: &str) -> Result<u64, ShellError> {
    let parsed = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => word.parse(),
    };

    parsed.map_err(|_| ShellError::InvalidNumber(word.to_string()))
}

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    /// Print the text and read the next command.
    Continue(String),
    Exit,
}

/// Interactive front end: the memory manager and the cache
/// hierarchy, driven by text commands.
pub struct Shell {
    memory: MemoryManager,
    caches: CacheHierarchy,
}

impl Shell {
    pub fn new(config: &SimConfig) -> Result<Self> {
        let mut memory = MemoryManager::new();
        let caches = CacheHierarchy::new(config.l1, config.l2)?;

        // The strategy goes first so that the initial memory is
        // laid out by the right engine. A size the engine rejects
        // leaves it unusable until the next `init`, as with the
        // `init` command.
        if let Some(strategy) = config.strategy {
            if let Err(error) = memory.set_strategy(strategy) {
                warn!("Startup allocator {} rejected: {}", strategy, error);
            }
        }
        if let Some(size) = config.memory {
            if let Err(error) = memory.init(size) {
                warn!("Startup memory size {} rejected: {}", size, error);
            }
        }

        info!("Caches configured: L1 {}, L2 {}.", config.l1, config.l2);
        Ok(Self { memory, caches })
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn caches(&self) -> &CacheHierarchy {
        &self.caches
    }

    /// Parse and run one line of input. Empty lines produce no
    /// output.
    pub fn execute_line(&mut self, line: &str) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue(String::new());
        }

        match line.parse() {
            Ok(command) => self.execute(command),
            Err(error) => {
                warn!("Rejected command '{}': {}", line.trim(), error);
                Flow::Continue(format!("Error: {error}\n"))
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Flow {
        let out = match command {
            Command::Init(size) => match self.memory.init(size) {
                Ok(()) => format!("Memory initialized with size {size}\n"),
                Err(error) => format!("Error: {error}\n"),
            },
            Command::SetAllocator(strategy) => {
                let mut out = format!("Allocator set to {strategy}\n");
                if let Err(error) = self.memory.set_strategy(strategy) {
                    out.push_str(&format!("Error: {error}\n"));
                }
                out
            }
            Command::Malloc(size) => match self.memory.allocate(size) {
                Ok(allocation) => format!(
                    "Allocated block id={} at address=0x{:04x}\n",
                    allocation.id, allocation.address,
                ),
                Err(error) => format!("Allocation failed: {error}\n"),
            },
            Command::Free(id) => match self.memory.free(id) {
                Ok(()) => format!("Block {id} freed\n"),
                Err(AllocError::InvalidIdentifier(_)) => "Invalid block id\n".to_string(),
                Err(error) => format!("Error: {error}\n"),
            },
            Command::Dump => self.memory.dump_memory().to_string(),
            Command::Stats => format!("{}\n{}", self.memory.stats(), self.caches.stats()),
            Command::Access(address) => {
                let level = self.caches.access(address);
                format!("Access 0x{address:04x}: {level}\n")
            }
            Command::Help => HELP.to_string(),
            Command::Exit => return Flow::Exit,
        };

        Flow::Continue(out)
    }

    /// Read commands from `input` until `exit` or end of input,
    /// writing the results to `output`.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<()> {
        writeln!(output, "Memory Management Simulator")?;
        writeln!(output, "Type 'help' to see commands")?;

        let mut lines = input.lines();
        loop {
            write!(output, "> ")?;
            output.flush()?;

            let Some(line) = lines.next() else {
                break;
            };

            match self.execute_line(&line?) {
                Flow::Continue(text) => write!(output, "{text}")?,
                Flow::Exit => break,
            }
        }

        writeln!(output, "Exiting simulator...")?;
        Ok(())
    }
}
