//! Accumulator for batch-script headers and launcher arguments

use std::fmt::Write as _;

/// Collects the batch header and the launcher command-line arguments in a
/// single pass, so both render entry points see the same decisions.
///
/// Directives and body lines are kept apart: schedulers stop reading
/// directives at the first command, so every directive is rendered before
/// any body line regardless of the order they were added in.
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    directive_prefix: &'static str,
    directives: String,
    body: String,
    cmd_args: Vec<String>,
}

impl ScriptBuilder {
    /// Start a script with the interpreter line.
    ///
    /// `directive_prefix` is the scheduler's header marker, e.g. `#SBATCH`.
    pub fn new(directive_prefix: &'static str) -> Self {
        Self {
            directive_prefix,
            directives: String::with_capacity(256),
            body: String::new(),
            cmd_args: Vec::new(),
        }
    }

    /// Write one directive line into the batch header
    pub fn directive(&mut self, flag: &str) {
        let _ = writeln!(self.directives, "{} {}", self.directive_prefix, flag);
    }

    /// Append a shell line to the header body, after all directives
    pub fn header_line(&mut self, line: &str) {
        self.body.push_str(line);
        if !line.ends_with('\n') {
            self.body.push('\n');
        }
    }

    /// Append an argument to the launcher command line
    pub fn arg(&mut self, arg: impl Into<String>) {
        self.cmd_args.push(arg.into());
    }

    /// Emit to both the command line and, when not blocking, the header
    pub fn both(&mut self, flag: String, blocking: bool) {
        if !blocking {
            self.directive(&flag);
        }
        self.cmd_args.push(flag);
    }

    /// Emit to the command line when blocking, else to the header
    pub fn select_interactive_or_batch(&mut self, flags: &[String], blocking: bool) {
        if blocking {
            self.cmd_args.extend(flags.iter().cloned());
        } else {
            let joined = flags.join(" ");
            self.directive(&joined);
        }
    }

    /// Finish and return `(header, cmd_args)`
    pub fn finish(self) -> (String, Vec<String>) {
        let mut header = String::with_capacity(10 + self.directives.len() + self.body.len());
        header.push_str("#!/bin/sh\n");
        header.push_str(&self.directives);
        header.push_str(&self.body);
        (header, self.cmd_args)
    }
}
