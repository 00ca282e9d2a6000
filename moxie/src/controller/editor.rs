//! Editor state and key bindings (spec.md §4.4 "Editor state",
//! "Key bindings (canonical)").
//!
//! Pure, synchronous state manipulation — no RPC here. [`super::Controller`]
//! drives this state machine and performs the network calls the Enter
//! and Tab bindings need (transmission-interrupt evaluation, proxy
//! transmit, history writes, trie lookups).

use super::history::Entry;
use super::trie::Trie;

/// Whether the editor is accepting a normal line or driving a
/// reverse-i-search (spec.md §4.4 "Editor state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Regular,
    HistorySearch,
}

/// `{ buffer, cursor, mode, historyCursorKey, historySearchMatch }`
/// (spec.md §4.4).
pub struct EditorState {
    buffer: Vec<char>,
    cursor: usize,
    mode: Mode,
    /// `historyCursorKey`: the entry ↑/↓ last landed on, so the next
    /// press knows where to move from.
    pub history_cursor: Option<Entry>,
    /// The needle being typed in `historySearch` mode.
    search_needle: String,
    /// The entry the needle currently matches, if any.
    pub search_match: Option<Entry>,
}

impl Default for EditorState {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            mode: Mode::Regular,
            history_cursor: None,
            search_needle: String::new(),
            search_match: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn buffer(&self) -> String {
        self.buffer.iter().collect()
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn search_needle(&self) -> &str {
        &self.search_needle
    }

    fn insert_char_into(chars: &mut Vec<char>, cursor: &mut usize, c: char) {
        chars.insert(*cursor, c);
        *cursor += 1;
    }

    /// Printable key or space (regular mode): insert at cursor.
    pub fn insert(&mut self, c: char) {
        match self.mode {
            Mode::Regular => Self::insert_char_into(&mut self.buffer, &mut self.cursor, c),
            Mode::HistorySearch => self.search_needle.push(c),
        }
    }

    /// Backspace: delete left of cursor (regular) or shorten the needle
    /// (historySearch).
    pub fn backspace(&mut self) {
        match self.mode {
            Mode::Regular => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.buffer.remove(self.cursor);
                }
            }
            Mode::HistorySearch => {
                self.search_needle.pop();
            }
        }
    }

    /// ← : move cursor left (regular) or within the needle
    /// (historySearch — needle has no cursor of its own in this
    /// implementation, so this is a no-op there beyond bounds-checking,
    /// matching the spec's silence on what "moving the needle cursor"
    /// changes observably).
    pub fn move_left(&mut self) {
        if self.mode == Mode::Regular && self.cursor > 0 {
            self.cursor -= 1;
        }
    }

    /// → : move cursor right.
    pub fn move_right(&mut self) {
        if self.mode == Mode::Regular && self.cursor < self.buffer.len() {
            self.cursor += 1;
        }
    }

    /// Replace the buffer wholesale (↑/↓ history recall, or accepting a
    /// reverse-i-search match).
    pub fn set_buffer(&mut self, line: &str) {
        self.buffer = line.chars().collect();
        self.cursor = self.buffer.len();
    }

    /// Ctrl-R: enter historySearch, reset the cursor, and start from an
    /// empty needle (spec.md §4.4: "`lastHistory ← null`; run search").
    pub fn enter_history_search(&mut self) {
        self.mode = Mode::HistorySearch;
        self.history_cursor = None;
        self.search_needle.clear();
        self.search_match = None;
    }

    /// Enter while in historySearch: accept the matched entry into the
    /// buffer and return to regular mode.
    pub fn accept_history_search(&mut self) {
        if let Some(entry) = self.search_match.take() {
            self.set_buffer(&entry.line);
        }
        self.mode = Mode::Regular;
        self.search_needle.clear();
    }

    /// Tab: prefix-complete the buffer from `trie` (spec.md §4.4
    /// "Completion (trie)"). No-op if there is no unique completion.
    pub fn complete(&mut self, trie: &Trie) {
        if self.mode != Mode::Regular {
            return;
        }
        if let Some(completed) = trie.complete(&self.buffer()) {
            self.set_buffer(&completed);
        }
    }

    /// Clear the buffer and cursor after a successful commit (spec.md
    /// §4.4 commit step 6).
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_cursor = None;
    }

    /// Render text for the current mode (spec.md §4.4 "Screen
    /// rendering"): in regular mode, the buffer; in historySearch,
    /// `"(reverse-i-search)`<buffer>`: <match>"`. Returns the rendered
    /// line plus the cursor's logical column within it.
    #[must_use]
    pub fn render(&self) -> (String, usize) {
        match self.mode {
            Mode::Regular => (self.buffer(), self.cursor),
            Mode::HistorySearch => {
                let header = format!("(reverse-i-search)`{}`: ", self.search_needle);
                let matched = self
                    .search_match
                    .as_ref()
                    .map(|e| e.line.as_str())
                    .unwrap_or("");
                let line = format!("{header}{matched}");
                let cursor = header.chars().count() + self.search_needle.chars().count();
                (line, cursor)
            }
        }
    }
}

/// Split `line` on runs of non-word bytes and return every token at
/// least [`crate::constants::MIN_COMPLETION_TOKEN_LEN`] bytes long
/// (spec.md §4.4 commit step 5, and Subscriber duties).
#[must_use]
pub fn completion_tokens(line: &str) -> Vec<&str> {
    line.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|tok| tok.len() >= crate::constants::MIN_COMPLETION_TOKEN_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_backspace() {
        let mut state = EditorState::new();
        state.insert('a');
        state.insert('b');
        state.insert('c');
        assert_eq!(state.buffer(), "abc");
        state.move_left();
        state.backspace();
        assert_eq!(state.buffer(), "ac");
        assert_eq!(state.cursor(), 1);
    }

    #[test]
    fn history_search_render_matches_spec_format() {
        let mut state = EditorState::new();
        state.enter_history_search();
        state.insert('h');
        state.insert('i');
        state.search_match = Some(Entry {
            key: 1,
            line: "history line".into(),
        });
        let (line, cursor) = state.render();
        assert_eq!(line, "(reverse-i-search)`hi`: history line");
        assert_eq!(cursor, "(reverse-i-search)`hi`: ".chars().count() + 2);
    }

    #[test]
    fn completion_tokens_filters_short_words() {
        let tokens = completion_tokens("go north, then look east!!");
        assert_eq!(tokens, vec!["north", "then", "look", "east"]);
    }
}
