//! Repair arbiter: the policy that decides the fate of every proposed fix.
//!
//! The terminal interaction is behind the [`Prompter`] capability so that the
//! binary can install a raw-mode console prompter while tests install a
//! scripted decision table.

use std::collections::VecDeque;

/// How discrepancies are mediated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// Report only; every proposed fix is declined and recorded as an
    /// uncorrected error.
    ReadOnly,
    /// Accept the caller-supplied default for every proposed fix.
    Automatic,
    /// Ask the operator.
    Interactive,
}

impl RepairMode {
    /// Whether this mode is allowed to mutate the image at all.
    #[must_use]
    pub fn repairs(self) -> bool {
        matches!(self, Self::Automatic | Self::Interactive)
    }
}

/// Decision source for interactive runs.
///
/// Implementations own the presentation: print the question, read the answer,
/// echo it. They are only consulted in [`RepairMode::Interactive`].
pub trait Prompter {
    fn ask(&mut self, question: &str, default_yes: bool) -> bool;
}

/// Outcome of routing one proposed fix through the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    /// Whether this decision leaves an error uncorrected.
    pub uncorrected: bool,
}

/// Apply the three-mode policy to one proposed fix.
///
/// Read-only runs print the newline the pending diagnostic is missing and
/// decline. Automatic runs take the default. Interactive runs defer to the
/// prompter. A declined fix is an uncorrected error in every mode.
pub fn arbitrate(
    mode: RepairMode,
    prompter: &mut dyn Prompter,
    question: &str,
    default_yes: bool,
) -> Verdict {
    let accepted = match mode {
        RepairMode::ReadOnly => {
            println!();
            false
        }
        RepairMode::Automatic => {
            println!();
            default_yes
        }
        RepairMode::Interactive => prompter.ask(question, default_yes),
    };
    Verdict {
        accepted,
        uncorrected: !accepted,
    }
}

/// Prompter that always returns the default; used for the non-interactive
/// modes where the prompter is never consulted, and as a building block in
/// tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultsPrompter;

impl Prompter for DefaultsPrompter {
    fn ask(&mut self, _question: &str, default_yes: bool) -> bool {
        default_yes
    }
}

/// Scripted decision table for tests: pops one prepared answer per question
/// and falls back to the default when the script runs dry. Records every
/// question asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<bool>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    #[must_use]
    pub fn questions(&self) -> &[String] {
        &self.asked
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str, default_yes: bool) -> bool {
        self.asked.push(question.to_owned());
        self.answers.pop_front().unwrap_or(default_yes)
    }
}
