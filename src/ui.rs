//! Terminal UI rendering
//!
//! Draws the section tabs, the resource list with its detail pane, and
//! whichever modal the current input mode calls for.

use crate::app::{App, FormPurpose, InputMode, OperationStatus, PendingAction, StatusModalType};
use crate::resources::{ResourceKind, Tone};
use crate::validation::Form;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};

const SPINNER: [&str; 4] = ["⠋", "⠙", "⠹", "⠸"];

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(0)
        .constraints([
            Constraint::Length(3), // Title & tabs
            Constraint::Min(10),   // List and detail
            Constraint::Length(1), // Status line
            Constraint::Length(2), // Command hints
        ])
        .split(frame.area());

    draw_title_and_tabs(frame, chunks[0], app);

    let body = if app.show_operation_sidebar {
        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(60), Constraint::Length(34)])
            .split(chunks[1]);
        draw_operation_sidebar(frame, main_chunks[1], app);
        main_chunks[0]
    } else {
        chunks[1]
    };

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(body);
    draw_resource_list(frame, panes[0], app);
    draw_detail(frame, panes[1], app);

    draw_status_line(frame, chunks[2], app);
    draw_command_hints(frame, chunks[3], app);

    match &app.input_mode {
        InputMode::ActionMenu => {
            let labels: Vec<&str> = app.current_actions().iter().map(|d| d.label).collect();
            draw_action_menu(frame, " Actions ", &labels, app.menu_selected);
        }
        InputMode::BulkMenu => {
            let labels: Vec<&str> = app.bulk_actions().iter().map(|d| d.label).collect();
            let title = format!(" Bulk Actions ({} marked) ", app.panels.marked_count());
            draw_action_menu(frame, &title, &labels, app.menu_selected);
        }
        InputMode::StatusModal(modal_type) => draw_status_modal(frame, modal_type),
        InputMode::Confirmation { message, pending } => {
            draw_confirmation_modal(frame, message, pending)
        }
        InputMode::Form { form, purpose } => draw_form(frame, form, purpose),
        InputMode::Search(keyword) => draw_search(frame, keyword),
        InputMode::Normal => {}
    }
}

fn draw_title_and_tabs(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![Span::styled(
        " STACKTUI ",
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    )];

    for kind in ResourceKind::ALL {
        let style = if kind == app.section {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::raw("│"));
        spans.push(Span::styled(format!(" {} ", kind.title()), style));
    }

    let account = app.account.as_deref().unwrap_or("not logged in");
    spans.push(Span::raw("│ "));
    spans.push(Span::styled(account.to_string(), Style::default().fg(Color::Yellow)));
    if app.running_job_count() > 0 {
        spans.push(Span::raw(format!(" │ ⚡ {} running", app.running_job_count())));
    }

    let title = Paragraph::new(Line::from(spans))
        .style(Style::default().fg(Color::White).bg(Color::DarkGray))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .border_type(BorderType::Rounded),
        )
        .alignment(Alignment::Center);

    frame.render_widget(title, area);
}

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Healthy => Color::Green,
        Tone::Stopped => Color::Red,
        Tone::Transitional => Color::Yellow,
        Tone::Failed => Color::LightRed,
        Tone::Neutral => Color::Gray,
    }
}

fn spinner_frame(app: &App) -> &'static str {
    let tick = app
        .running_jobs()
        .first()
        .map(|job| job.elapsed().as_millis() / 250)
        .unwrap_or(0);
    SPINNER[(tick % SPINNER.len() as u128) as usize]
}

fn list_title(app: &App) -> String {
    let mut title = format!(" {} · page {} ", app.section.title(), app.page_info.page);
    if let Some(keyword) = &app.page_request.keyword {
        title.push_str(&format!("· \"{}\" ", keyword));
    }
    title
}

fn draw_resource_list(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .border_type(BorderType::Rounded)
        .title(list_title(app));

    if app.panels.is_empty() {
        let hint = if app.is_logged_in() {
            format!("No {} found. Press n to create one.", app.section.title())
        } else {
            "Not logged in. Press L to log in.".to_string()
        };
        let empty_msg = Paragraph::new(hint)
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(empty_msg, area);
        return;
    }

    let spinner = spinner_frame(app);
    let items: Vec<ListItem> = app
        .panels
        .rows()
        .iter()
        .enumerate()
        .map(|(i, binding)| {
            let row = app.section.project_row(&binding.entity);
            let mark = if app.panels.is_marked(&binding.entity_id) {
                "◆ "
            } else {
                "  "
            };

            let status = match &binding.in_progress {
                Some(text) => Span::styled(
                    format!("{} {:<12} ", spinner, text),
                    Style::default().fg(Color::Yellow),
                ),
                None if binding.has_error() => Span::styled(
                    format!("✗ {:<12} ", row.state),
                    Style::default().fg(Color::LightRed),
                ),
                None => Span::styled(
                    format!("  {:<12} ", row.state),
                    Style::default().fg(tone_color(row.tone)),
                ),
            };

            let content = Line::from(vec![
                Span::styled(mark, Style::default().fg(Color::Magenta)),
                Span::raw(format!("{:<26} ", row.name)),
                status,
                Span::styled(row.secondary, Style::default().fg(Color::DarkGray)),
            ]);

            if i == app.panels.cursor() {
                ListItem::new(content).style(
                    Style::default()
                        .bg(Color::DarkGray)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                ListItem::new(content)
            }
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(list, area);
}

fn draw_detail(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .border_type(BorderType::Rounded)
        .title(" Details ");

    let Some(binding) = app.panels.current() else {
        frame.render_widget(block, area);
        return;
    };
    let detail = app.section.project_detail(&binding.entity);

    let mut content = vec![Line::from(vec![
        Span::styled(
            detail.title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(detail.state, Style::default().fg(Color::Cyan)),
    ])];

    if let Some(banner) = app.panels.banner() {
        let color = if banner.is_error {
            Color::LightRed
        } else {
            Color::Green
        };
        content.push(Line::from(""));
        content.push(Line::from(Span::styled(
            banner.message.clone(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )));
    }
    if let Some(text) = &binding.in_progress {
        content.push(Line::from(""));
        content.push(Line::from(Span::styled(
            format!("{} {}…", spinner_frame(app), text),
            Style::default().fg(Color::Yellow),
        )));
    }

    content.push(Line::from(""));
    for (label, value) in detail.fields.iter().filter(|(_, v)| !v.is_empty()) {
        content.push(Line::from(vec![
            Span::styled(format!("{:<20}", label), Style::default().fg(Color::Cyan)),
            Span::raw(value.clone()),
        ]));
    }

    if !binding.is_busy() && !detail.actions.is_empty() {
        content.push(Line::from(""));
        content.push(Line::from(Span::styled(
            "Actions",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
        for key in detail.actions {
            if let Some(descriptor) = app.section.descriptor(key) {
                content.push(Line::from(format!("  • {}", descriptor.label)));
            }
        }
    }

    let paragraph = Paragraph::new(content)
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn draw_status_line(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    if let Some(message) = &app.message {
        spans.push(Span::styled(
            format!(" {}", message),
            Style::default().fg(Color::Yellow),
        ));
    }
    if app.panels.marked_count() > 0 {
        spans.push(Span::styled(
            format!("  {} marked", app.panels.marked_count()),
            Style::default().fg(Color::Magenta),
        ));
    }
    let mut paging = Vec::new();
    if app.page_info.has_prev {
        paging.push("[ prev");
    }
    if app.page_info.has_next {
        paging.push("] next");
    }
    if !paging.is_empty() {
        spans.push(Span::styled(
            format!("  {}", paging.join("  ")),
            Style::default().fg(Color::DarkGray),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn hint(key: &str, label: &str, color: Color) -> [Span<'static>; 2] {
    [
        Span::styled(format!("[{}] ", key), Style::default().fg(color)),
        Span::raw(format!("{}  ", label)),
    ]
}

fn draw_command_hints(frame: &mut Frame, area: Rect, app: &App) {
    let pairs: Vec<(&str, &str, Color)> = match &app.input_mode {
        InputMode::Normal => vec![
            ("Enter", "Actions", Color::Green),
            ("Space", "Mark", Color::Yellow),
            ("b", "Bulk", Color::Yellow),
            ("n", "New", Color::Yellow),
            ("Tab", "Section", Color::Yellow),
            ("/", "Search", Color::Yellow),
            ("r", "Refresh", Color::Yellow),
            ("?", "Help", Color::Cyan),
            ("q", "Quit", Color::Red),
        ],
        InputMode::ActionMenu | InputMode::BulkMenu => vec![
            ("↑/↓", "Navigate", Color::Yellow),
            ("Enter", "Select", Color::Green),
            ("Esc", "Back", Color::Red),
        ],
        InputMode::Confirmation { .. } => vec![
            ("Enter/Y", "Confirm", Color::Green),
            ("Esc/N", "Cancel", Color::Red),
        ],
        InputMode::Form { .. } => vec![
            ("Tab", "Next field", Color::Yellow),
            ("←/→", "Choose", Color::Yellow),
            ("Enter", "Submit", Color::Green),
            ("Esc", "Cancel", Color::Red),
        ],
        InputMode::Search(_) => vec![
            ("Enter", "Search", Color::Green),
            ("Esc", "Cancel", Color::Red),
        ],
        InputMode::StatusModal(_) => vec![("Any Key", "Close", Color::Yellow)],
    };

    let spans: Vec<Span> = pairs
        .into_iter()
        .flat_map(|(key, label, color)| hint(key, label, color))
        .collect();

    let hints_widget = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(hints_widget, area);
}

fn draw_operation_sidebar(frame: &mut Frame, area: Rect, app: &App) {
    let mut content = Vec::new();

    let jobs = app.running_jobs();
    if !jobs.is_empty() {
        content.push(Line::from(Span::styled(
            "Running Jobs",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
        for job in jobs {
            content.push(Line::from(format!(
                "⚡ {} ({}s)",
                job.label,
                job.elapsed().as_secs()
            )));
        }
        content.push(Line::from(""));
    }

    if app.user_operations.is_empty() {
        content.push(Line::from("No operations yet"));
    }
    for op in app.user_operations.iter().rev() {
        let icon = match &op.status {
            OperationStatus::Running => "🚀",
            OperationStatus::Success => "✅",
            OperationStatus::Failed(_) => "❌",
            OperationStatus::Cancelled => "🚫",
        };
        content.push(Line::from(format!(
            "{} {} · {} ({}s)",
            icon,
            op.description,
            op.target,
            App::operation_duration(op).as_secs()
        )));
        if let OperationStatus::Failed(err) = &op.status {
            if !err.is_empty() {
                content.push(Line::from(Span::styled(
                    format!("   {}", err),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
    }

    let sidebar = Paragraph::new(content)
        .block(
            Block::default()
                .borders(Borders::LEFT)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(" Operations "),
        )
        .wrap(Wrap { trim: true });

    frame.render_widget(sidebar, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100 - height_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn draw_action_menu(frame: &mut Frame, title: &str, labels: &[&str], selected: usize) {
    let area = centered_rect(50, 40, frame.area());
    frame.render_widget(Clear, area);

    let mut content = vec![Line::from("")];
    for (idx, label) in labels.iter().enumerate() {
        if idx == selected {
            content.push(Line::from(vec![
                Span::styled(
                    " ▶ ",
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    label.to_string(),
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::BOLD),
                ),
            ]));
        } else {
            content.push(Line::from(vec![
                Span::raw("   "),
                Span::styled(label.to_string(), Style::default().fg(Color::White)),
            ]));
        }
    }

    content.push(Line::from(""));
    content.push(Line::from(vec![
        Span::styled(" Use ", Style::default().fg(Color::DarkGray)),
        Span::styled("↑/↓ or j/k", Style::default().fg(Color::Cyan)),
        Span::styled(" to navigate, ", Style::default().fg(Color::DarkGray)),
        Span::styled("Enter", Style::default().fg(Color::Cyan)),
        Span::styled(" to run", Style::default().fg(Color::DarkGray)),
    ]));

    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .border_type(BorderType::Rounded);

    let paragraph = Paragraph::new(content)
        .block(block)
        .wrap(Wrap { trim: true });

    frame.render_widget(paragraph, area);
}

fn draw_status_modal(frame: &mut Frame, modal_type: &StatusModalType) {
    let area = centered_rect(70, 50, frame.area());
    frame.render_widget(Clear, area);

    match modal_type {
        StatusModalType::Info { message } => draw_info_modal(frame, area, message),
        StatusModalType::Error {
            title,
            details,
            suggestions,
        } => draw_error_modal(frame, area, title, details, suggestions),
        StatusModalType::SessionExpired => draw_error_modal(
            frame,
            area,
            "Session Expired",
            "Your session has expired or was rejected by the management server.",
            &["Press any key to log in again".to_string()],
        ),
    }
}

fn draw_info_modal(frame: &mut Frame, area: Rect, message: &str) {
    let block = Block::default()
        .title(" Information ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue))
        .border_type(BorderType::Rounded);

    let mut lines: Vec<Line> = vec![Line::from("")];
    for line in message.lines() {
        lines.push(Line::from(line));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(vec![Span::styled(
        "Press any key to continue",
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    )]));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: false });

    frame.render_widget(paragraph, area);
}

fn draw_error_modal(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    details: &str,
    suggestions: &[String],
) {
    let block = Block::default()
        .title(format!(" ❌ {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .border_type(BorderType::Rounded);

    let mut content = vec![Line::from("")];
    for line in details.lines() {
        content.push(Line::from(vec![Span::styled(
            line,
            Style::default().fg(Color::White),
        )]));
    }

    if !suggestions.is_empty() {
        content.push(Line::from(""));
        content.push(Line::from(vec![Span::styled(
            "Suggestions:",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )]));
        for suggestion in suggestions {
            content.push(Line::from(vec![
                Span::styled("• ", Style::default().fg(Color::Yellow)),
                Span::raw(suggestion.as_str()),
            ]));
        }
    }

    content.push(Line::from(""));
    content.push(Line::from(vec![Span::styled(
        "Press any key to continue",
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    )]));

    let paragraph = Paragraph::new(content)
        .block(block)
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true });

    frame.render_widget(paragraph, area);
}

fn draw_confirmation_modal(frame: &mut Frame, message: &str, pending: &PendingAction) {
    let area = centered_rect(60, 30, frame.area());
    frame.render_widget(Clear, area);

    let title = match pending {
        PendingAction::Single(request) => format!(" {} ", request.descriptor.label),
        PendingAction::Bulk(descriptor) => format!(" ⚠️  {} ", descriptor.label),
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .border_type(BorderType::Rounded);

    let mut content = vec![Line::from("")];
    for line in message.lines() {
        content.push(Line::from(line));
    }
    content.push(Line::from(""));
    content.push(Line::from(vec![
        Span::styled("Press ", Style::default().fg(Color::White)),
        Span::styled(
            "Enter/Y",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(" to confirm or ", Style::default().fg(Color::White)),
        Span::styled(
            "Esc/N",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::styled(" to cancel", Style::default().fg(Color::White)),
    ]));

    let paragraph = Paragraph::new(content)
        .block(block)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    frame.render_widget(paragraph, area);
}

fn draw_form(frame: &mut Frame, form: &Form, purpose: &FormPurpose) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);

    let color = match purpose {
        FormPurpose::Login => Color::Blue,
        FormPurpose::Action { .. } => Color::Cyan,
        FormPurpose::Create(_) => Color::Green,
    };
    let block = Block::default()
        .title(format!(" {} ", form.title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .border_type(BorderType::Rounded);

    let mut content = vec![Line::from("")];
    for (idx, field) in form.fields().iter().enumerate() {
        let focused = idx == form.focus();
        let label_style = if focused {
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Cyan)
        };

        let value = if field.spec.is_choice() {
            if field.choices.is_empty() {
                "(none available)".to_string()
            } else {
                format!("◀ {} ▶", field.display())
            }
        } else if focused {
            format!("{}_", field.display())
        } else {
            field.display()
        };

        content.push(Line::from(vec![
            Span::styled(if focused { " ▶ " } else { "   " }, label_style),
            Span::styled(format!("{:<20}", field.spec.label), label_style),
            Span::raw(value),
        ]));
        if let Some(error) = &field.error {
            content.push(Line::from(Span::styled(
                format!("   {:<20}{}", "", error),
                Style::default().fg(Color::LightRed),
            )));
        }
    }

    let paragraph = Paragraph::new(content)
        .style(Style::default().fg(Color::White))
        .block(block)
        .wrap(Wrap { trim: false });

    frame.render_widget(paragraph, area);
}

fn draw_search(frame: &mut Frame, keyword: &str) {
    let area = centered_rect(50, 20, frame.area());
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Search ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .border_type(BorderType::Rounded);

    let content = vec![
        Line::from(""),
        Line::from(format!("Keyword: {}_", keyword)),
        Line::from(""),
        Line::from(vec![Span::styled(
            "Leave empty to list everything",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )]),
    ];

    let paragraph = Paragraph::new(content)
        .block(block)
        .wrap(Wrap { trim: true });

    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Config;
    use crate::test_support::{test_client, FakeTransport};
    use ratatui::{backend::TestBackend, Terminal};
    use serde_json::json;

    fn rendered(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[tokio::test]
    async fn test_draws_rows_and_detail() {
        let transport = FakeTransport::new();
        transport.reply(
            "listVirtualMachines",
            200,
            json!({"listvirtualmachinesresponse": {"virtualmachine": [
                {"id": "1", "name": "web-01", "state": "Running", "zonename": "zone-a"}
            ]}}),
        );
        let mut app = App::new(Config::default(), test_client(transport));
        app.initialize().await;

        let mut terminal = Terminal::new(TestBackend::new(140, 30)).unwrap();
        terminal.draw(|f| draw(f, &app)).unwrap();
        let screen = rendered(&terminal);

        assert!(screen.contains("web-01"));
        assert!(screen.contains("Stop Instance"));
    }

    #[tokio::test]
    async fn test_draws_session_expired_modal() {
        let transport = FakeTransport::new();
        let mut app = App::new(Config::default(), test_client(transport));
        app.show_status_modal(StatusModalType::SessionExpired);

        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| draw(f, &app)).unwrap();

        assert!(rendered(&terminal).contains("Session Expired"));
    }
}
