//! Terminal implementation of the candidate selection prompt.

use civfetch_core::resolve::selector::detail_lines;
use civfetch_core::resolve::SelectionPrompt;
use civfetch_core::SearchCandidate;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Input;

/// Prints to stderr and reads through `dialoguer`.
pub struct TerminalPrompt {
    theme: ColorfulTheme,
    count: usize,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
            count: 0,
        }
    }
}

impl SelectionPrompt for TerminalPrompt {
    fn show_candidates(&mut self, candidates: &[SearchCandidate]) {
        self.count = candidates.len();
        eprintln!("{}", candidate_table(candidates));
    }

    fn show_detail(&mut self, index: usize, candidate: &SearchCandidate) {
        eprintln!("[{}]", index);
        for line in detail_lines(candidate) {
            eprintln!("  {}", line);
        }
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("  {}", message);
    }

    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let line: String = Input::with_theme(&self.theme)
            .with_prompt(format!("Select 1-{}, 'd N' for details, 'q' to cancel", self.count))
            .allow_empty(true)
            .interact_text()
            .map_err(|e| match e {
                dialoguer::Error::IO(err) => err,
            })?;
        Ok(Some(line))
    }
}

/// Ranked candidates as a fixed-width table.
pub fn candidate_table(candidates: &[SearchCandidate]) -> String {
    let mut out = format!(
        "{:>3}  {:>5}  {:<6}  {:<18}  {:>9}  {}\n",
        "#", "score", "tier", "strategy", "model", "name"
    );
    for (i, c) in candidates.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}  {:>5}  {:<6}  {:<18}  {:>9}  {}\n",
            i + 1,
            c.score(),
            c.tier(),
            c.strategy(),
            c.model_id(),
            c.name()
        ));
    }
    out
}
