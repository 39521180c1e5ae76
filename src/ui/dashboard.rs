use ratatui::{
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Padding, Paragraph, Row, Table},
    Frame,
};

use crate::app::App;
use crate::core::VolumeState;
use crate::utils::format_size;

// Design tokens for consistent styling
const COLOR_PRIMARY: Color = Color::Rgb(99, 179, 237);    // Soft blue
const COLOR_SUCCESS: Color = Color::Rgb(104, 211, 145);   // Soft green
const COLOR_WARNING: Color = Color::Rgb(246, 173, 85);    // Soft orange
const COLOR_DANGER: Color = Color::Rgb(252, 129, 129);    // Soft red
const COLOR_MUTED: Color = Color::Rgb(113, 128, 150);     // Gray
const COLOR_BORDER: Color = Color::Rgb(74, 85, 104);      // Dark gray

/// Draw the main dashboard with the configured volumes
pub fn draw_dashboard(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Outer margin for breathing room
    let inner_area = area.inner(Margin::new(2, 1));

    let chunks = Layout::vertical([
        Constraint::Length(5),  // Header
        Constraint::Min(8),     // Volume table
        Constraint::Length(3),  // Help bar
    ])
    .split(inner_area);

    draw_header(frame, chunks[0], app);
    draw_volume_table(frame, chunks[1], app);
    draw_help_bar(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    // Privilege badge
    let (badge_text, badge_style) = if app.privileged {
        (
            " ● ROOT ",
            Style::default()
                .fg(Color::Black)
                .bg(COLOR_SUCCESS)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        (
            " ○ USER ",
            Style::default()
                .fg(Color::Black)
                .bg(COLOR_WARNING)
                .add_modifier(Modifier::BOLD),
        )
    };

    let title_line = Line::from(vec![
        Span::styled(
            "volwipe",
            Style::default()
                .fg(COLOR_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(badge_text, badge_style),
    ]);

    let subtitle = Line::from(vec![Span::styled(
        format!("Erasing {}", app.target),
        Style::default().fg(COLOR_MUTED),
    )]);

    let header = Paragraph::new(vec![Line::default(), title_line, Line::default(), subtitle])
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .padding(Padding::horizontal(2)),
        );

    frame.render_widget(header, area);
}

fn state_color(state: VolumeState) -> Color {
    match state {
        VolumeState::Mounted | VolumeState::MountedReadOnly => COLOR_SUCCESS,
        VolumeState::Unmounted | VolumeState::NoFilesystem | VolumeState::Unmountable => {
            COLOR_WARNING
        }
        VolumeState::Checking => COLOR_PRIMARY,
        VolumeState::BadRemoval
        | VolumeState::Removed
        | VolumeState::Shared
        | VolumeState::Unknown => COLOR_DANGER,
    }
}

fn draw_volume_table(frame: &mut Frame, area: Rect, app: &App) {
    // Header row
    let header_cells = ["PATH", "DEVICE", "SIZE", "STATE"].iter().map(|h| {
        Cell::from(format!(" {} ", h)).style(
            Style::default()
                .fg(COLOR_MUTED)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .volumes
        .iter()
        .map(|volume| {
            let color = state_color(volume.state);
            let style = if volume.path == app.target {
                Style::default()
                    .fg(Color::Black)
                    .bg(color)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(color)
            };

            let status_icon = if volume.state.is_mounted() { "●" } else { "○" };

            Row::new(vec![
                Cell::from(format!(" {} ", volume.path)),
                Cell::from(format!(" {} ", volume.device)),
                Cell::from(format!(" {} ", format_size(volume.size_bytes))),
                Cell::from(format!(" {} {} ", status_icon, volume.state)),
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Percentage(35),
        Constraint::Percentage(30),
        Constraint::Length(12),
        Constraint::Min(14),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .title(" Volumes ")
                .title_style(Style::default().fg(Color::White).bold())
                .padding(Padding::horizontal(1)),
        )
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn draw_help_bar(frame: &mut Frame, area: Rect, app: &App) {
    let bindings = if app.is_finished() {
        vec![("q", "Quit")]
    } else if app.cancellable {
        vec![("Esc", "Cancel")]
    } else {
        vec![("…", "Please wait")]
    };

    let mut spans = Vec::new();
    for (i, (key, action)) in bindings.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled("  │  ", Style::default().fg(COLOR_BORDER)));
        }
        spans.push(Span::styled(
            format!(" {} ", key),
            Style::default()
                .fg(Color::White)
                .bg(COLOR_BORDER)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(" {}", action),
            Style::default().fg(COLOR_MUTED),
        ));
    }

    let help = Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER)),
        );

    frame.render_widget(help, area);
}
