use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::error::ScrapeError;

/// Global the site's bootstrap script assigns the pre-rendered app state to.
pub const PRERENDERED_STATE_MARKER: &str = "__PRERENDERED_STATE__";

static SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("static selector"));

/// Body of the first `<script>` (document order) whose markup mentions `marker`.
pub fn locate_bootstrap_script(html: &str, marker: &'static str) -> Result<String, ScrapeError> {
    let doc = Html::parse_document(html);
    doc.select(&SCRIPT)
        .find(|script| script.html().contains(marker))
        .map(|script| script.text().collect::<String>())
        .ok_or(ScrapeError::ScriptNotFound { marker })
}
