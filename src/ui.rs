use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::app::{App, ChatRole, InputMode};
use crate::ollama::ServerStatus;
use crate::segment::{self, Segment, ThinkSpan};

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut current_text = String::new();

    while let Some((_, c)) = chars.next() {
        if c == '*' {
            // Check for ** (bold)
            if chars.peek().map(|(_, c)| *c) == Some('*') {
                // Consume the second *
                chars.next();

                // Push any accumulated plain text
                if !current_text.is_empty() {
                    spans.push(Span::raw(std::mem::take(&mut current_text)));
                }

                // Find closing **
                let mut bold_text = String::new();
                let mut found_close = false;

                while let Some((_, c)) = chars.next() {
                    if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
                        chars.next(); // consume second *
                        found_close = true;
                        break;
                    }
                    bold_text.push(c);
                }

                if found_close && !bold_text.is_empty() {
                    spans.push(Span::styled(
                        bold_text,
                        Style::default().add_modifier(Modifier::BOLD),
                    ));
                } else {
                    // No closing **, treat as literal
                    current_text.push_str("**");
                    current_text.push_str(&bold_text);
                }
            } else {
                // Single * - could be italic, but for now treat as literal
                current_text.push(c);
            }
        } else {
            current_text.push(c);
        }
    }

    // Push any remaining text
    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let banner_height = match app.status {
        ServerStatus::Running => 0,
        ServerStatus::NotRunning | ServerStatus::NoModels => 4,
    };

    // Main layout: header, chat, banner, input, footer
    let [header_area, chat_area, banner_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(banner_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    if banner_height > 0 {
        render_status_banner(app, frame, banner_area);
    }
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let (status_label, status_color) = match app.status {
        ServerStatus::Running => ("online", Color::Green),
        ServerStatus::NotRunning => ("offline", Color::Red),
        ServerStatus::NoModels => ("no models", Color::Yellow),
    };

    let title = Line::from(vec![
        Span::styled(" Ollama Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(format!("[{status_label}]"), Style::default().fg(status_color)),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let title = match &app.selected_model {
        Some(model) => format!(" Ollama: {} ", model),
        None => " Ollama ".to_string(),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);

    if app.messages.is_empty() {
        let welcome = Paragraph::new(welcome_lines(app))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        frame.render_widget(welcome, area);
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    for msg in &app.messages {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
                lines.push(Line::default());
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                lines.extend(assistant_lines(&msg.content, app.animation_frame));
                lines.push(Line::default());
            }
        }
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

/// Render one assistant message through the segmenter: fenced code becomes a
/// shaded block labeled with its language, `<think>` spans become dimmed
/// annotations, and the pending sentinel becomes the animated indicator.
fn assistant_lines(content: &str, animation_frame: u8) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    for part in segment::segment(content) {
        match part {
            Segment::Code { language, content } => {
                let fence_style = Style::default().fg(Color::DarkGray);
                let code_style = Style::default().fg(Color::White).bg(Color::Rgb(40, 40, 40));

                lines.push(Line::styled(format!("```{language}"), fence_style));
                for code_line in content.lines() {
                    lines.push(Line::styled(code_line.to_string(), code_style));
                }
                lines.push(Line::styled("```".to_string(), fence_style));
            }
            Segment::Text(text) => {
                for span in segment::split_think(&text) {
                    match span {
                        ThinkSpan::Plain(plain) => {
                            for line in plain.lines() {
                                lines.push(parse_markdown_line(line));
                            }
                        }
                        ThinkSpan::Think(body) => {
                            let style = Style::default()
                                .fg(Color::DarkGray)
                                .add_modifier(Modifier::ITALIC);
                            for line in body.lines() {
                                lines.push(Line::styled(format!("│ {}", line), style));
                            }
                        }
                        ThinkSpan::Pending => {
                            // Animated ellipsis: cycles through ".", "..", "..."
                            let dots = ".".repeat((animation_frame as usize) + 1);
                            lines.push(Line::styled(
                                format!("thinking{dots}"),
                                Style::default()
                                    .fg(Color::DarkGray)
                                    .add_modifier(Modifier::ITALIC),
                            ));
                        }
                    }
                }
            }
        }
    }

    lines
}

fn welcome_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::default(),
        Line::from(Span::styled(
            "Welcome to Ollama Chat",
            Style::default().fg(Color::Cyan).bold(),
        )),
        Line::default(),
        Line::from("Chat with a model running on your own machine."),
        Line::default(),
        Line::from(Span::styled(
            "Write blog posts  ·  Get advice  ·  Generate code",
            Style::default().fg(Color::DarkGray),
        )),
        Line::default(),
    ];

    let hint = match app.status {
        ServerStatus::Running => match &app.selected_model {
            Some(model) => format!("Ready with {}. Type a message and press Enter.", model),
            None => "Ready. Type a message and press Enter.".to_string(),
        },
        ServerStatus::NotRunning => "Waiting for the Ollama server...".to_string(),
        ServerStatus::NoModels => "The server is up but has no models yet.".to_string(),
    };
    lines.push(Line::from(Span::styled(
        hint,
        Style::default().fg(Color::DarkGray),
    )));

    lines
}

fn render_status_banner(app: &App, frame: &mut Frame, area: Rect) {
    let (color, headline, command) = match app.status {
        ServerStatus::NotRunning => (
            Color::Red,
            "Ollama is not running!",
            "Start it by running: ollama serve",
        ),
        ServerStatus::NoModels => (
            Color::Yellow,
            "No models installed!",
            "Install one by running: ollama pull mistral",
        ),
        ServerStatus::Running => return,
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let banner = Paragraph::new(vec![
        Line::from(Span::styled(
            headline,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(command),
    ])
    .block(block);

    frame.render_widget(banner, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let (title, border_color) = if app.is_generating() {
        (" Generating... (Esc to stop) ", Color::Red)
    } else if app.input_mode == InputMode::Editing {
        (" Message (Enter to send) ", Color::Yellow)
    } else {
        (" Message (i to type) ", Color::DarkGray)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    // Get the visible slice of the input
    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if app.input_mode == InputMode::Editing && !app.show_model_picker {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = if app.show_model_picker {
        vec![
            Span::styled(" j/k ", key_style),
            Span::styled(" nav ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" select ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" close ", label_style),
        ]
    } else {
        match app.input_mode {
            InputMode::Editing => vec![
                Span::styled(" Enter ", key_style),
                Span::styled(" send ", label_style),
                Span::styled(" Esc ", key_style),
                Span::styled(
                    if app.is_generating() { " stop " } else { " browse " },
                    label_style,
                ),
                Span::styled(" Ctrl+C ", key_style),
                Span::styled(" quit ", label_style),
            ],
            InputMode::Normal => vec![
                Span::styled(" i ", key_style),
                Span::styled(" type ", label_style),
                Span::styled(" j/k ", key_style),
                Span::styled(" scroll ", label_style),
                Span::styled(" M ", key_style),
                Span::styled(" models ", label_style),
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ],
        }
    };

    let footer = Paragraph::new(Line::from(hints));
    frame.render_widget(footer, area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 40.min(area.width.saturating_sub(4));
    let popup_height = (app.available_models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if Some(model) == app.selected_model.as_ref() {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect()
    }

    #[test]
    fn code_segments_are_fenced_and_labeled() {
        let lines = assistant_lines("see\n```rust\nlet x = 1;\n```", 0);
        assert_eq!(
            rendered(&lines),
            vec!["see", "```rust", "let x = 1;", "```"]
        );
    }

    #[test]
    fn pending_sentinel_renders_animated_indicator() {
        let lines = assistant_lines(&segment::pending_placeholder(), 2);
        assert_eq!(rendered(&lines), vec!["thinking..."]);

        let lines = assistant_lines(&segment::pending_placeholder(), 0);
        assert_eq!(rendered(&lines), vec!["thinking."]);
    }

    #[test]
    fn think_body_renders_verbatim_as_annotation() {
        let lines = assistant_lines("<think>weighing options</think>done", 0);
        assert_eq!(rendered(&lines), vec!["│ weighing options", "done"]);
    }

    #[test]
    fn bold_markdown_becomes_a_styled_span() {
        let line = parse_markdown_line("a **bold** word");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content.as_ref(), "bold");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }
}
