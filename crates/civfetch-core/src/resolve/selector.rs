//! Candidate selection.
//!
//! Automation uses [`top_result`] / [`SelectionMode::Auto`] and never touches
//! a prompt. The interactive loop wraps a [`SelectionPrompt`] supplied by the
//! caller; it holds no locks while waiting on input.

use super::candidate::SearchCandidate;

/// Parsed user command. Indices are 1-based as displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionCommand {
    Select(usize),
    Detail(usize),
    Cancel,
}

impl SelectionCommand {
    /// Parse `3`, `d 3` / `detail 3` / `info 3`, or `q` / `cancel`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim().to_lowercase();
        let mut parts = input.split_whitespace();
        let head = parts.next().unwrap_or("");
        let arg = parts.next();

        match (head, arg) {
            ("q" | "quit" | "c" | "cancel" | "n" | "none", None) => Ok(SelectionCommand::Cancel),
            ("d" | "detail" | "i" | "info", Some(n)) => {
                parse_index(n).map(SelectionCommand::Detail)
            }
            (n, None) if !n.is_empty() => parse_index(n).map(SelectionCommand::Select),
            _ => Err(format!(
                "Unrecognized input '{}': enter a number, 'd <number>' for details, \
                 or 'q' to cancel",
                input
            )),
        }
    }
}

fn parse_index(s: &str) -> Result<usize, String> {
    s.parse::<usize>()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| format!("'{}' is not a valid candidate number", s))
}

/// Result of a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Selected(SearchCandidate),
    /// The user explicitly declined every candidate.
    Cancelled,
    /// There was nothing to choose from.
    NoCandidates,
}

impl SelectionOutcome {
    pub fn selected(&self) -> Option<&SearchCandidate> {
        match self {
            SelectionOutcome::Selected(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Pick the top-ranked candidate without asking.
    Auto,
    #[default]
    Interactive,
}

/// I/O surface of the interactive loop.
pub trait SelectionPrompt {
    fn show_candidates(&mut self, candidates: &[SearchCandidate]);

    fn show_detail(&mut self, index: usize, candidate: &SearchCandidate);

    fn show_error(&mut self, message: &str);

    /// Read one line of input; `None` means input was closed.
    fn read_line(&mut self) -> std::io::Result<Option<String>>;
}

/// Top-ranked candidate, if any.
pub fn top_result(candidates: &[SearchCandidate]) -> Option<&SearchCandidate> {
    candidates.first()
}

/// Select from ranked candidates.
///
/// `prompt` is only used in interactive mode; interactive mode without a
/// prompt behaves like a cancellation.
pub fn select(
    candidates: &[SearchCandidate],
    mode: SelectionMode,
    prompt: Option<&mut dyn SelectionPrompt>,
) -> std::io::Result<SelectionOutcome> {
    if candidates.is_empty() {
        return Ok(SelectionOutcome::NoCandidates);
    }
    match (mode, prompt) {
        (SelectionMode::Auto, _) => Ok(top_result(candidates)
            .cloned()
            .map(SelectionOutcome::Selected)
            .unwrap_or(SelectionOutcome::NoCandidates)),
        (SelectionMode::Interactive, Some(prompt)) => interactive_select(candidates, prompt),
        (SelectionMode::Interactive, None) => Ok(SelectionOutcome::Cancelled),
    }
}

/// Prompt until the user selects a candidate or cancels.
pub fn interactive_select(
    candidates: &[SearchCandidate],
    prompt: &mut dyn SelectionPrompt,
) -> std::io::Result<SelectionOutcome> {
    if candidates.is_empty() {
        return Ok(SelectionOutcome::NoCandidates);
    }

    prompt.show_candidates(candidates);
    loop {
        let Some(line) = prompt.read_line()? else {
            return Ok(SelectionOutcome::Cancelled);
        };

        match SelectionCommand::parse(&line) {
            Ok(SelectionCommand::Cancel) => return Ok(SelectionOutcome::Cancelled),
            Ok(SelectionCommand::Select(n)) => match candidates.get(n - 1) {
                Some(c) => return Ok(SelectionOutcome::Selected(c.clone())),
                None => prompt.show_error(&out_of_range(n, candidates.len())),
            },
            Ok(SelectionCommand::Detail(n)) => match candidates.get(n - 1) {
                Some(c) => prompt.show_detail(n, c),
                None => prompt.show_error(&out_of_range(n, candidates.len())),
            },
            Err(message) => prompt.show_error(&message),
        }
    }
}

fn out_of_range(n: usize, len: usize) -> String {
    format!("No candidate {} (choose 1-{})", n, len)
}

/// Human-readable detail lines for a candidate.
pub fn detail_lines(candidate: &SearchCandidate) -> Vec<String> {
    let item = candidate.item();
    let mut lines = vec![
        format!("Name:       {}", candidate.name()),
        format!("Model id:   {}", candidate.model_id()),
        format!(
            "Confidence: {} ({}), via {}",
            candidate.score(),
            candidate.tier(),
            candidate.strategy()
        ),
    ];
    if let Some(kind) = item.kind.as_deref() {
        lines.push(format!("Type:       {}", kind));
    }
    if let Some(creator) = item.creator_name() {
        lines.push(format!("Creator:    {}", creator));
    }
    lines.push(format!("Downloads:  {}", item.download_count()));
    if item.nsfw || item.poi {
        lines.push("Flags:      restricted content".to_string());
    }
    for version in &item.model_versions {
        let base = version.base_model.as_deref().unwrap_or("unknown base");
        lines.push(format!("  version {} '{}' ({})", version.id, version.name, base));
        for file in &version.files {
            let marker = if file.is_primary() { "*" } else { " " };
            lines.push(format!(
                "   {} {} ({:.1} MB)",
                marker,
                file.name,
                file.size_kb / 1024.0
            ));
        }
    }
    lines
}
