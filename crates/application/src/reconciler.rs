//! Prediction reconciler.
//!
//! A raw prediction stream flickers between labels. A label only counts once
//! it has been predicted `threshold` times in a row; the gate then commits it
//! and starts counting from zero again.

use std::fmt;

/// A committed sign: a letter or one of the control gestures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignSymbol {
    Letter(char),
    Delete,
    Space,
    /// Accept the pending autocomplete suggestion.
    Autocomplete,
}

impl SignSymbol {
    /// Parse a prediction label. Letters are case-insensitive.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        match label.to_ascii_lowercase().as_str() {
            "delete" => return Some(Self::Delete),
            "space" => return Some(Self::Space),
            "autocmp" => return Some(Self::Autocomplete),
            _ => {}
        }

        let mut chars = label.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Some(Self::Letter(c.to_ascii_uppercase())),
            _ => None,
        }
    }

    /// Symbol for one character of a target sequence.
    pub fn from_target_char(c: char) -> Option<Self> {
        if c.is_whitespace() {
            Some(Self::Space)
        } else if c.is_ascii_alphabetic() {
            Some(Self::Letter(c.to_ascii_uppercase()))
        } else {
            None
        }
    }

    /// Wire label of this symbol.
    pub fn label(&self) -> String {
        match self {
            Self::Letter(c) => c.to_string(),
            Self::Delete => "delete".to_string(),
            Self::Space => "space".to_string(),
            Self::Autocomplete => "autocmp".to_string(),
        }
    }
}

impl fmt::Display for SignSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// N-in-a-row confirmation gate.
#[derive(Debug, Clone)]
pub struct ConsecutiveGate {
    threshold: u32,
    tracked: Option<String>,
    count: u32,
}

impl ConsecutiveGate {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            tracked: None,
            count: 0,
        }
    }

    /// Feed one prediction. Returns the label when it reaches the threshold.
    pub fn observe(&mut self, label: &str) -> Option<String> {
        match &self.tracked {
            Some(tracked) if tracked == label => self.count += 1,
            _ => {
                self.tracked = Some(label.to_string());
                self.count = 1;
            }
        }

        if self.count >= self.threshold {
            self.count = 0;
            return self.tracked.take();
        }
        None
    }

    pub fn reset(&mut self) {
        self.tracked = None;
        self.count = 0;
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn tracked(&self) -> Option<&str> {
        self.tracked.as_deref()
    }
}

/// Result of feeding one prediction to a [`PredictionReconciler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Still accumulating.
    Pending,
    /// A label was committed but it is not the current target.
    Mismatch(String),
    /// The current target was committed; `index` is the next one.
    Advanced { symbol: SignSymbol, index: usize },
    /// The last target was committed.
    Completed,
}

/// Walks a target sequence, one confirmed sign at a time.
#[derive(Debug, Clone)]
pub struct PredictionReconciler {
    gate: ConsecutiveGate,
    target: Vec<SignSymbol>,
    index: usize,
    completed: Vec<SignSymbol>,
}

impl PredictionReconciler {
    /// Characters that have no sign (digits, punctuation) are skipped.
    pub fn new(sequence: &str, threshold: u32) -> Self {
        let target = sequence
            .chars()
            .filter_map(SignSymbol::from_target_char)
            .collect();
        Self {
            gate: ConsecutiveGate::new(threshold),
            target,
            index: 0,
            completed: Vec::new(),
        }
    }

    /// A target with nothing to sign never completes: every commit is a
    /// mismatch.
    pub fn observe(&mut self, label: &str) -> Reconciled {
        if self.is_complete() {
            return Reconciled::Completed;
        }

        let Some(committed) = self.gate.observe(label) else {
            return Reconciled::Pending;
        };

        match (SignSymbol::parse(&committed), self.current_target()) {
            (Some(symbol), Some(expected)) if symbol == expected => {
                self.completed.push(symbol);
                self.index += 1;
                if self.is_complete() {
                    Reconciled::Completed
                } else {
                    Reconciled::Advanced {
                        symbol,
                        index: self.index,
                    }
                }
            }
            _ => Reconciled::Mismatch(committed),
        }
    }

    /// Number of signs in the target sequence.
    pub fn target_len(&self) -> usize {
        self.target.len()
    }

    /// Forget the partial count (e.g. after the connection dropped).
    pub fn reset_gate(&mut self) {
        self.gate.reset();
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_target(&self) -> Option<SignSymbol> {
        self.target.get(self.index).copied()
    }

    pub fn completed(&self) -> &[SignSymbol] {
        &self.completed
    }

    pub fn threshold(&self) -> u32 {
        self.gate.threshold()
    }

    /// Raw consecutive count of whatever label is being tracked.
    pub fn consecutive_count(&self) -> u32 {
        self.gate.count()
    }

    /// Consecutive count towards the current target. Counting some other
    /// label does not show as progress.
    pub fn target_count(&self) -> u32 {
        match (self.gate.tracked(), self.current_target()) {
            (Some(tracked), Some(target)) if SignSymbol::parse(tracked) == Some(target) => {
                self.gate.count()
            }
            _ => 0,
        }
    }

    pub fn character_progress(&self) -> f32 {
        if self.is_complete() {
            return 1.0;
        }
        (self.target_count() as f32 / self.threshold() as f32).min(1.0)
    }

    pub fn sequence_progress(&self) -> f32 {
        if self.target.is_empty() {
            return 0.0;
        }
        let done = self.index as f32 + self.character_progress().min(0.999);
        (done / self.target.len() as f32).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        !self.target.is_empty() && self.index >= self.target.len()
    }
}
