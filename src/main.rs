//! stacktui - Terminal console for CloudStack-style management servers
//!
//! Main entry point: parses the command line, sets up the terminal and
//! routes key presses to the application state.

mod actions;
mod api;
mod app;
mod cli;
mod format;
mod jobs;
mod panel;
mod resources;
#[cfg(test)]
mod test_support;
mod ui;
mod validation;

use anyhow::Result;
use api::{CloudClient, ReqwestTransport};
use app::{App, InputMode, StatusModalType};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, error, info};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging defaults to off; anything written to stderr corrupts the screen
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("off")).init();

    let config = cli::Cli::parse().into_config()?;
    let transport = ReqwestTransport::new(config.request_timeout)?;
    let client = Arc::new(CloudClient::new(
        config.endpoint.clone(),
        Arc::new(transport),
    ));

    info!("Starting stacktui against {}", config.endpoint);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, client);
    app.initialize().await;
    let res = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!("Error: {:?}", err);
        println!("{:?}", err)
    }

    info!("stacktui terminated");
    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.poll_job_events();
        app.maybe_auto_refresh().await;

        terminal.draw(|frame| ui::draw(frame, app))?;

        if crossterm::event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                debug!("Key pressed: {:?} in mode: {:?}", key, app.input_mode);

                if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
                {
                    app.should_quit = true;
                }

                match &app.input_mode {
                    InputMode::Normal => {
                        if app.message.is_some() {
                            app.clear_message();
                        }
                        handle_normal_mode(app, key).await
                    }
                    InputMode::ActionMenu | InputMode::BulkMenu => {
                        handle_action_menu(app, key).await
                    }
                    InputMode::StatusModal(_) => app.close_modal(),
                    InputMode::Confirmation { .. } => handle_confirmation(app, key).await,
                    InputMode::Form { .. } => handle_form(app, key).await,
                    InputMode::Search(_) => handle_search(app, key).await,
                }
            }
        }

        if app.should_quit {
            info!("Application quit requested");
            return Ok(());
        }
    }
}

async fn handle_normal_mode(app: &mut App, key: event::KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => {
            app.should_quit = true;
        }
        KeyCode::Char('?') | KeyCode::Char('h') => {
            app.show_help();
        }
        KeyCode::Char('j') | KeyCode::Down => app.next(),
        KeyCode::Char('k') | KeyCode::Up => app.previous(),
        KeyCode::Tab => app.next_section().await,
        KeyCode::BackTab => app.previous_section().await,
        KeyCode::Char(c @ '1'..='6') => {
            let index = c as usize - '1' as usize;
            if let Some(kind) = resources::ResourceKind::ALL.get(index) {
                app.navigate(*kind).await;
            }
        }
        KeyCode::Char(']') => app.next_page().await,
        KeyCode::Char('[') => app.previous_page().await,
        KeyCode::Char('/') => app.start_search(),
        KeyCode::Enter => app.show_action_menu(),
        KeyCode::Char(' ') => app.toggle_mark(),
        KeyCode::Char('b') | KeyCode::Char('B') => app.show_bulk_menu(),
        KeyCode::Char('n') | KeyCode::Char('N') => app.trigger_create().await,
        KeyCode::Char('r') | KeyCode::Char('R') => {
            app.message = Some(format!("Refreshing {}...", app.section.title()));
            app.refresh().await;
        }
        KeyCode::Char('o') | KeyCode::Char('O') => {
            app.show_operation_sidebar = !app.show_operation_sidebar;
        }
        KeyCode::Char('L') => app.logout().await,
        KeyCode::Esc => app.panels.dismiss_banner(),
        _ => {}
    }
}

async fn handle_action_menu(app: &mut App, key: event::KeyEvent) {
    let item_count = match app.input_mode {
        InputMode::BulkMenu => app.bulk_actions().len(),
        _ => app.current_actions().len(),
    };

    match key.code {
        KeyCode::Down | KeyCode::Char('j') => app.menu_next(item_count),
        KeyCode::Up | KeyCode::Char('k') => app.menu_previous(item_count),
        KeyCode::Enter => app.run_menu_selection().await,
        KeyCode::Esc | KeyCode::Char('q') => {
            app.input_mode = InputMode::Normal;
        }
        _ => {}
    }
}

async fn handle_confirmation(app: &mut App, key: event::KeyEvent) {
    match key.code {
        KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => app.confirm().await,
        KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => app.cancel_dialog(),
        _ => {}
    }
}

async fn handle_form(app: &mut App, key: event::KeyEvent) {
    let is_login = matches!(
        app.input_mode,
        InputMode::Form {
            purpose: app::FormPurpose::Login,
            ..
        }
    );

    match key.code {
        KeyCode::Enter => app.submit_form().await,
        KeyCode::Esc if is_login => {
            // Nothing works without a session
            app.show_status_modal(StatusModalType::Info {
                message: "Log in to continue, or press Ctrl+C to quit.".to_string(),
            });
        }
        KeyCode::Esc => app.cancel_dialog(),
        KeyCode::Tab | KeyCode::Down => app.form_next_field(),
        KeyCode::BackTab | KeyCode::Up => app.form_previous_field(),
        KeyCode::Right => app.form_cycle_choice(true).await,
        KeyCode::Left => app.form_cycle_choice(false).await,
        KeyCode::Backspace => app.form_backspace(),
        KeyCode::Char(c) => app.form_input(c),
        _ => {}
    }
}

async fn handle_search(app: &mut App, key: event::KeyEvent) {
    let InputMode::Search(keyword) = &mut app.input_mode else {
        return;
    };

    match key.code {
        KeyCode::Enter => {
            let keyword = std::mem::take(keyword);
            app.apply_search(keyword).await;
        }
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Backspace => {
            keyword.pop();
        }
        KeyCode::Char(c) => keyword.push(c),
        _ => {}
    }
}
