//! Free-form text composer.
//!
//! Confirmed signs edit a text buffer: letters append, `space` appends a
//! space, `delete` removes the last character and `autocmp` accepts the first
//! autocomplete suggestion as the next word.

use handsign_events::{AutocompleteRequest, ComposerUpdate};

use crate::constants::AUTOCOMPLETE_PLACEHOLDERS;
use crate::reconciler::{ConsecutiveGate, SignSymbol};

#[derive(Debug, Clone)]
pub struct TextComposer {
    gate: ConsecutiveGate,
    text: String,
    suggestions: Vec<String>,
}

impl TextComposer {
    pub fn new(threshold: u32) -> Self {
        Self {
            gate: ConsecutiveGate::new(threshold),
            text: String::new(),
            suggestions: Vec::new(),
        }
    }

    /// Feed one prediction; returns the symbol if it was confirmed.
    pub fn observe(&mut self, label: &str) -> Option<SignSymbol> {
        let committed = self.gate.observe(label)?;
        let symbol = SignSymbol::parse(&committed);
        if symbol.is_none() {
            tracing::debug!(label = %committed, "Ignoring unknown sign");
        }
        symbol
    }

    /// Apply a confirmed symbol. Returns whether the text changed.
    pub fn apply(&mut self, symbol: SignSymbol) -> bool {
        match symbol {
            SignSymbol::Letter(c) => {
                self.text.push(c);
                true
            }
            SignSymbol::Space => {
                self.text.push(' ');
                true
            }
            SignSymbol::Delete => self.text.pop().is_some(),
            SignSymbol::Autocomplete => self.accept_suggestion(),
        }
    }

    fn accept_suggestion(&mut self) -> bool {
        let Some(word) = self
            .suggestions
            .first()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        else {
            return false;
        };

        if !self.text.is_empty() && !self.text.ends_with(' ') {
            self.text.push(' ');
        }
        self.text.push_str(&word);
        self.text.push(' ');
        self.suggestions.clear();
        true
    }

    /// Store suggestions from `res_autocomp`, dropping placeholders.
    pub fn set_suggestions(&mut self, suggestions: Vec<String>) {
        self.suggestions = suggestions
            .into_iter()
            .filter(|s| {
                let s = s.trim();
                !s.is_empty() && !AUTOCOMPLETE_PLACEHOLDERS.contains(&s)
            })
            .collect();
    }

    pub fn autocomplete_request(&self) -> AutocompleteRequest {
        AutocompleteRequest {
            text: self.text.clone(),
        }
    }

    pub fn update(&self) -> ComposerUpdate {
        ComposerUpdate {
            text: self.text.clone(),
            suggestions: self.suggestions.clone(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn gate(&self) -> &ConsecutiveGate {
        &self.gate
    }

    pub fn reset_gate(&mut self) {
        self.gate.reset();
    }

    pub fn clear(&mut self) {
        self.gate.reset();
        self.text.clear();
        self.suggestions.clear();
    }
}
