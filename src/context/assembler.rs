//! Prompt assembly from thread history, business context and the query

use std::borrow::Cow;

use crate::thread::MessageEntry;

/// Default number of history messages injected per turn
pub const DEFAULT_INJECTION_WINDOW: usize = 10;

/// Configuration for context assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Most recent history entries rendered into the prompt (individual
    /// messages, not pairs). Independent of what the store retains.
    pub injection_window: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            injection_window: DEFAULT_INJECTION_WINDOW,
        }
    }
}

/// Renders the single text payload sent to the model
///
/// Sections always appear in this order, each wrapped in its own tag:
/// `<conversation-history>`, `<business-context>`, `<current-query>`.
/// Empty history and absent business context are left out entirely.
/// `&`, `<` and `>` in any content are escaped, so text can never open or
/// close a section. Output depends only on the inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    #[must_use]
    pub const fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> ContextConfig {
        self.config
    }

    /// Trim `history` to the injection window
    #[must_use]
    pub fn window<'a>(&self, history: &'a [MessageEntry]) -> &'a [MessageEntry] {
        let skip = history.len().saturating_sub(self.config.injection_window);
        &history[skip..]
    }

    /// Assemble the prompt payload
    #[must_use]
    pub fn render(
        &self,
        history: &[MessageEntry],
        business_context: Option<&str>,
        query: &str,
    ) -> String {
        let mut parts = Vec::with_capacity(3);

        let window = self.window(history);
        if !window.is_empty() {
            let turns: Vec<String> = window
                .iter()
                .map(|m| format!("<{role}>\n{}\n</{role}>", escape(&m.content), role = m.role))
                .collect();
            parts.push(format!(
                "<conversation-history>\n{}\n</conversation-history>",
                turns.join("\n")
            ));
        }

        if let Some(context) = business_context.map(str::trim).filter(|c| !c.is_empty()) {
            parts.push(format!("<business-context>\n{}\n</business-context>", escape(context)));
        }

        parts.push(format!("<current-query>\n{}\n</current-query>", escape(query.trim())));

        parts.join("\n\n")
    }
}

/// Replace markup characters with entities
fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
