use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::time::Duration;
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    watch,
};
use tracing::warn;

use crate::app::{self, AppCommand, AppEvent, AppState, Focus, KeyOutcome};
use crate::state::SessionState;

const HELP: &str =
    "Tab focus · Enter run · F2 vocals · F3 mode · F4 length · F5 refresh · p play · s stop · e extend · x export · Esc quit";

pub fn run<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    updates: &mut watch::Receiver<SessionState>,
    event_rx: &mut UnboundedReceiver<AppEvent>,
    command_tx: UnboundedSender<AppCommand>,
) -> Result<()> {
    let mut state = updates.borrow_and_update().clone();
    app.observe(&state);
    loop {
        if updates.has_changed().unwrap_or(false) {
            state = updates.borrow_and_update().clone();
            app.observe(&state);
        }
        while let Ok(event) = event_rx.try_recv() {
            app.handle_event(event);
        }

        terminal.draw(|frame| draw(frame, app, &state))?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match app.on_key(key.code, &state) {
            KeyOutcome::Quit => break,
            KeyOutcome::Command(command) => {
                if command_tx.send(command).is_err() {
                    warn!("controller is gone; leaving");
                    break;
                }
            }
            KeyOutcome::Redraw | KeyOutcome::Ignored => {}
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, app: &AppState, state: &SessionState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(8), Constraint::Length(1)])
        .split(frame.size());

    let header = Paragraph::new(app::status_summary(state))
        .block(Block::default().title("Studio").borders(Borders::ALL));
    frame.render_widget(header, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[1]);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(columns[0]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(3),
        ])
        .split(columns[1]);

    draw_models(frame, app, state, left[0]);
    draw_history(frame, app, state, left[1]);
    draw_input(frame, app, Focus::Content, &app.content, right[0]);
    draw_input(frame, app, Focus::Style, &app.style, right[1]);
    let upload_title = match &state.uploaded_file {
        Some(file) => format!("Upload (loaded: {}, {} bytes)", file.name, file.size),
        None => "Upload".to_string(),
    };
    let upload = Paragraph::new(app.upload_path.as_str())
        .block(block(upload_title, app.focus == Focus::Upload));
    frame.render_widget(upload, right[2]);

    let status_text = if app.status_lines.is_empty() {
        "Ready.".to_string()
    } else {
        app.status_lines.join("\n")
    };
    let status = Paragraph::new(status_text)
        .wrap(Wrap { trim: true })
        .block(Block::default().title("Status").borders(Borders::ALL));
    frame.render_widget(status, right[3]);

    let help = Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn draw_models(frame: &mut Frame, app: &AppState, state: &SessionState, area: Rect) {
    let items: Vec<ListItem> = state
        .models
        .iter()
        .enumerate()
        .map(|(index, model)| {
            let marker = if model.loaded {
                "●"
            } else if state.pending_model.as_deref() == Some(model.id.as_str()) {
                "…"
            } else {
                " "
            };
            let mut style = Style::default();
            if app.focus == Focus::Models && index == app.model_cursor {
                style = style.add_modifier(Modifier::REVERSED);
            }
            ListItem::new(Line::from(vec![
                Span::raw(format!("{marker} ")),
                Span::styled(model.name.clone(), style),
            ]))
        })
        .collect();
    let list = if items.is_empty() {
        List::new(vec![ListItem::new("No models (F5 to refresh)")])
    } else {
        List::new(items)
    };
    frame.render_widget(list.block(block("Models".into(), app.focus == Focus::Models)), area);
}

fn draw_history(frame: &mut Frame, app: &AppState, state: &SessionState, area: Rect) {
    let items: Vec<ListItem> = state
        .history
        .newest_first()
        .map(|track| {
            let current = state.current_track.as_deref() == Some(track.id.as_str());
            let playing = app.now_playing.as_deref() == Some(track.name.as_str());
            let highlighted = app.track_cursor.as_deref() == Some(track.id.as_str());
            let mut style = Style::default();
            if current {
                style = style.fg(Color::Cyan);
            }
            if app.focus == Focus::History && highlighted {
                style = style.add_modifier(Modifier::REVERSED);
            }
            let length = track
                .duration_seconds
                .map(|seconds| format!(" {seconds:.0}s"))
                .unwrap_or_default();
            let prefix = if playing { "▶ " } else { "  " };
            ListItem::new(Line::from(vec![
                Span::raw(prefix),
                Span::styled(format!("{}{length}", track.name), style),
                Span::styled(format!("  {}", track.model), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    let list = if state.history.is_empty() {
        List::new(vec![ListItem::new("No tracks yet.")])
    } else {
        List::new(items)
    };
    let title = format!("History ({})", state.history.len());
    frame.render_widget(list.block(block(title, app.focus == Focus::History)), area);
}

fn draw_input(frame: &mut Frame, app: &AppState, focus: Focus, text: &str, area: Rect) {
    let input = Paragraph::new(text).block(block(focus.label().to_string(), app.focus == focus));
    frame.render_widget(input, area);
}

fn block(title: String, focused: bool) -> Block<'static> {
    let block = Block::default().title(title).borders(Borders::ALL);
    if focused {
        block.border_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    } else {
        block
    }
}
