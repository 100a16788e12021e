// SPDX-License-Identifier: GPL-3.0-only

//! Scripted runner and manual clock for tests
//!
//! Rules match on the program name plus argument fragments; the most recently
//! added matching rule answers. Each rule holds a queue of replies; the last reply repeats once
//! the queue is drained. Calls without a matching rule succeed with empty output.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use super::{CommandRunner, Invocation};
use crate::error::{Result, SysError};
use crate::poll::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Out(String),
    Fail { code: i32, stderr: String },
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Out(stdout.into())
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Fail {
            code,
            stderr: stderr.into(),
        }
    }
}

struct Rule {
    program: String,
    fragments: Vec<String>,
    replies: VecDeque<Reply>,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        if self.program != invocation.program {
            return false;
        }
        let joined = invocation.args.join(" ");
        self.fragments
            .iter()
            .all(|fragment| joined.contains(fragment.as_str()))
    }

    fn next_reply(&mut self) -> Reply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or_else(|| Reply::ok(""))
        } else {
            self.replies.front().cloned().unwrap_or_else(|| Reply::ok(""))
        }
    }
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<Invocation>>,
    missing: RefCell<HashSet<String>>,
    root: Cell<bool>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `program` calls whose arguments contain every fragment.
    ///
    /// The most recently added matching rule wins, so a scenario can override
    /// a preset.
    pub fn on(&self, program: &str, fragments: &[&str], reply: Reply) -> &Self {
        self.on_seq(program, fragments, vec![reply])
    }

    /// Like [`ScriptedRunner::on`] with replies consumed in order
    pub fn on_seq(&self, program: &str, fragments: &[&str], replies: Vec<Reply>) -> &Self {
        self.rules.borrow_mut().push(Rule {
            program: program.to_string(),
            fragments: fragments.iter().map(|fragment| fragment.to_string()).collect(),
            replies: replies.into(),
        });
        self
    }

    /// Make `locate` report these host tools as absent
    pub fn without_tools(&self, tools: &[&str]) -> &Self {
        self.missing
            .borrow_mut()
            .extend(tools.iter().map(|tool| tool.to_string()));
        self
    }

    pub fn set_root(&self, root: bool) -> &Self {
        self.root.set(root);
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Logical command lines in call order
    pub fn lines(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    /// Number of calls whose command line contains `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(fragment))
            .count()
    }

    /// Index of the first call whose command line contains `fragment`
    pub fn position(&self, fragment: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.contains(fragment))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<String> {
        self.calls.borrow_mut().push(invocation.clone());

        let reply = self
            .rules
            .borrow_mut()
            .iter_mut()
            .rev()
            .find(|rule| rule.matches(invocation))
            .map(Rule::next_reply)
            .unwrap_or_else(|| Reply::ok(""));

        match reply {
            Reply::Out(stdout) => Ok(stdout),
            Reply::Fail { code, stderr } => Err(SysError::command(
                &invocation.description,
                format!("exit status {code}"),
                Some(code),
                &stderr,
            )),
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        if self.missing.borrow().contains(program) {
            None
        } else {
            Some(PathBuf::from("/usr/bin").join(program))
        }
    }

    fn is_root(&self) -> bool {
        self.root.get()
    }
}

/// Clock that records sleeps instead of sleeping
#[derive(Debug, Default)]
pub struct ManualClock {
    sleeps: Cell<u32>,
    total: Cell<Duration>,
}

impl ManualClock {
    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }

    pub fn total(&self) -> Duration {
        self.total.get()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.total.set(self.total.get() + duration);
    }
}
