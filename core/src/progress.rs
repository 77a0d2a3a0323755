use indicatif::ProgressStyle;
use serde::Serialize;

/// Number of processed candidates between two progress events.
pub const PROGRESS_INTERVAL: usize = 10;

/// Snapshot of a sorting run handed to progress observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SortProgress {
    pub total: usize,
    pub processed: usize,
    /// Accepted predictions whose label is not internal-use.
    pub accepted: usize,
}

pub fn default_style() -> ProgressStyle {
    match ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} copied: {msg}")
    {
        Ok(style) => style.progress_chars("##-"),
        Err(_) => ProgressStyle::default_bar(),
    }
}
