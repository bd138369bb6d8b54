pub(crate) const FRAGMENT_DELIMITER: char = ';';

/// A script broken into the shell fragments that run one after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Script {
    fragments: Vec<String>,
}

impl Script {
    /// Splits on `;`, trims each piece and drops the empty ones.
    /// Returns `None` when nothing runnable is left.
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let fragments: Vec<String> = text
            .split(FRAGMENT_DELIMITER)
            .map(str::trim)
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string)
            .collect();
        if fragments.is_empty() {
            None
        } else {
            Some(Self { fragments })
        }
    }

    pub(crate) fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub(crate) fn is_pipeline(&self) -> bool {
        self.fragments.len() > 1
    }
}
