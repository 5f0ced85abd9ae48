//! Two-list transfer control state: `available` and `chosen` display keys.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSetState {
    available: Vec<String>,
    chosen: Vec<String>,
}

impl SelectionSetState {
    /// Every key starts available, sorted and de-duplicated.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        Self {
            available: unique.into_iter().collect(),
            chosen: Vec::new(),
        }
    }

    pub fn available(&self) -> &[String] {
        &self.available
    }

    pub fn chosen(&self) -> &[String] {
        &self.chosen
    }

    pub fn chosen_keys(&self) -> Vec<String> {
        self.chosen.clone()
    }

    pub fn is_chosen(&self, key: &str) -> bool {
        self.chosen.iter().any(|k| k == key)
    }

    pub fn move_to_chosen<S: AsRef<str>>(&mut self, keys: &[S]) {
        transfer(&mut self.available, &mut self.chosen, keys);
    }

    pub fn move_to_available<S: AsRef<str>>(&mut self, keys: &[S]) {
        transfer(&mut self.chosen, &mut self.available, keys);
    }

    pub fn move_all_to_chosen(&mut self) {
        let all = std::mem::take(&mut self.available);
        merge_into(&mut self.chosen, all);
    }

    pub fn move_all_to_available(&mut self) {
        let all = std::mem::take(&mut self.chosen);
        merge_into(&mut self.available, all);
    }
}

/// Move the requested keys that are present in `from`; absent keys are ignored.
fn transfer<S: AsRef<str>>(from: &mut Vec<String>, to: &mut Vec<String>, keys: &[S]) {
    let wanted: BTreeSet<&str> = keys.iter().map(AsRef::as_ref).collect();
    let (moved, kept): (Vec<String>, Vec<String>) = std::mem::take(from)
        .into_iter()
        .partition(|k| wanted.contains(k.as_str()));
    *from = kept;
    merge_into(to, moved);
}

/// Merge lexically sorted incoming keys into `dest`, existing keys first on ties.
fn merge_into(dest: &mut Vec<String>, mut incoming: Vec<String>) {
    if incoming.is_empty() {
        return;
    }
    incoming.sort();
    let existing = std::mem::take(dest);
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let mut left = existing.into_iter().peekable();
    let mut right = incoming.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l <= r,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    *dest = merged;
}
