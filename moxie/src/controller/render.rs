//! The Controller's terminal front end (spec.md §4.4 "Key bindings
//! (canonical)", "Screen rendering").
//!
//! Raw mode plus the alternate screen, restored via an RAII guard on
//! drop exactly like the teacher's `tui::guard::TerminalGuard` — so a
//! panic or an early return never leaves the operator's shell in raw
//! mode.

use std::io::Stdout;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;

use crate::error::{MoxieError, Result};

use super::editor::{EditorState, Mode};
use super::history::{next_history, prev_history, search_prev_history, PrevOutcome};
use super::Controller;

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen);
        let _ = execute!(std::io::stdout(), crossterm::cursor::Show);
    }
}

/// Drive the editor until the operator quits (spec.md §4.4 "Ctrl-C:
/// quit cleanly"). Returns `Ok(())` on a clean quit; any other error is
/// propagated to `main` for the process's exit code (spec.md §6).
pub async fn run_editor(controller: Controller) -> Result<()> {
    enable_raw_mode().map_err(|e| MoxieError::FatalIo(e.to_string()))?;
    execute!(std::io::stdout(), EnterAlternateScreen)
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?;
    let _guard = TerminalGuard;

    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal =
        Terminal::new(backend).map_err(|e| MoxieError::FatalIo(e.to_string()))?;

    let mut state = EditorState::new();

    loop {
        draw(&mut terminal, &state)?;

        let key = match next_key().await? {
            Some(key) => key,
            None => continue,
        };

        match handle_key(&controller, &mut state, key).await {
            Ok(true) => continue,
            Ok(false) => return Err(MoxieError::UserQuit),
            Err(e) => return Err(e),
        }
    }
}

fn draw(terminal: &mut Terminal<CrosstermBackend<Stdout>>, state: &EditorState) -> Result<()> {
    let (line, cursor) = state.render();
    terminal
        .draw(|frame| {
            let area = Layout::vertical([Constraint::Min(0), Constraint::Length(1)])
                .split(frame.area());
            let prompt = Paragraph::new(line.as_str()).block(Block::default().borders(Borders::NONE));
            frame.render_widget(prompt, area[1]);
            frame.set_cursor_position((area[1].x + cursor as u16, area[1].y));
        })
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?;
    Ok(())
}

/// Poll for a key event without blocking the async runtime for longer
/// than a short slice, so the editor loop stays cooperative even though
/// crossterm's reader is synchronous.
async fn next_key() -> Result<Option<KeyEvent>> {
    let available = tokio::task::spawn_blocking(|| {
        event::poll(std::time::Duration::from_millis(50))
    })
    .await
    .map_err(|e| MoxieError::FatalIo(e.to_string()))?
    .map_err(|e| MoxieError::FatalIo(e.to_string()))?;

    if !available {
        return Ok(None);
    }

    let event = tokio::task::spawn_blocking(event::read)
        .await
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?;

    Ok(match event {
        Event::Key(key) => Some(key),
        _ => None,
    })
}

/// Apply one key event (spec.md §4.4 key binding table). Returns
/// `Ok(true)` to keep looping, `Ok(false)` on a clean Ctrl-C quit.
async fn handle_key(controller: &Controller, state: &mut EditorState, key: KeyEvent) -> Result<bool> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match (key.code, ctrl) {
        (KeyCode::Char('c'), true) => return Ok(false),
        (KeyCode::Char('r'), true) => state.enter_history_search(),
        (KeyCode::Char(c), false) if state.mode() == Mode::HistorySearch => {
            state.insert(c);
            run_reverse_search(controller, state).await?;
        }
        (KeyCode::Char(c), false) => state.insert(c),
        (KeyCode::Backspace, _) => {
            state.backspace();
            if state.mode() == Mode::HistorySearch {
                run_reverse_search(controller, state).await?;
            }
        }
        (KeyCode::Left, _) => state.move_left(),
        (KeyCode::Right, _) => state.move_right(),
        (KeyCode::Up, _) => apply_prev_history(controller, state).await?,
        (KeyCode::Down, _) => apply_next_history(controller, state).await?,
        (KeyCode::Tab, _) => {
            let trie = controller.trie();
            let trie = trie.lock().expect("trie lock poisoned");
            state.complete(&trie);
        }
        (KeyCode::Enter, _) if state.mode() == Mode::HistorySearch => {
            state.accept_history_search();
        }
        (KeyCode::Enter, _) => {
            controller.commit(state).await?;
        }
        (KeyCode::Esc, _) if state.mode() == Mode::HistorySearch => {
            state.accept_history_search();
            state.clear();
        }
        _ => {}
    }

    Ok(true)
}

async fn apply_prev_history(controller: &Controller, state: &mut EditorState) -> Result<()> {
    let outcome = prev_history(controller.history(), state.history_cursor.as_ref())
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?;
    match outcome {
        PrevOutcome::Found(entry) => {
            state.set_buffer(&entry.line);
            state.history_cursor = Some(entry);
        }
        PrevOutcome::AtOldest(entry) => {
            state.set_buffer(&entry.line);
        }
        PrevOutcome::Vanished => {}
    }
    Ok(())
}

async fn apply_next_history(controller: &Controller, state: &mut EditorState) -> Result<()> {
    if let Some(entry) = next_history(controller.history(), state.history_cursor.as_ref())
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?
    {
        state.set_buffer(&entry.line);
        state.history_cursor = Some(entry);
    }
    Ok(())
}

async fn run_reverse_search(controller: &Controller, state: &mut EditorState) -> Result<()> {
    let needle = state.search_needle().to_string();
    state.search_match = search_prev_history(controller.history(), None, &needle)
        .map_err(|e| MoxieError::FatalIo(e.to_string()))?;
    Ok(())
}
