//! Page list, current position and the status board shared by all steps.

use crate::model::PlaybookName;
use crate::orchestrator::{ProgressStep, StatusBoard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSpec {
    pub name: String,
    pub playbooks: Vec<PlaybookName>,
    pub progress: Vec<ProgressStep>,
    pub requires_confirmation: bool,
}

impl PageSpec {
    /// A page with no remote work; Next is always available.
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            playbooks: Vec::new(),
            progress: Vec::new(),
            requires_confirmation: false,
        }
    }

    pub fn runs_playbooks(&self) -> bool {
        !self.playbooks.is_empty()
    }
}

pub struct WizardContainer {
    pages: Vec<PageSpec>,
    current: usize,
    board: StatusBoard,
}

impl WizardContainer {
    pub fn new(pages: Vec<PageSpec>) -> Self {
        Self {
            pages,
            current: 0,
            board: StatusBoard::new(),
        }
    }

    pub fn with_board(mut self, board: StatusBoard) -> Self {
        self.board = board;
        self
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_page(&self) -> Option<&PageSpec> {
        self.pages.get(self.current)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut StatusBoard {
        &mut self.board
    }

    pub fn into_board(self) -> StatusBoard {
        self.board
    }

    /// Move to the next page. Returns false when already on the last one.
    pub fn advance(&mut self) -> bool {
        if self.current + 1 < self.pages.len() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    /// Move to the previous page. Returns false when already on the first one.
    pub fn retreat(&mut self) -> bool {
        if self.current > 0 {
            self.current -= 1;
            true
        } else {
            false
        }
    }
}
