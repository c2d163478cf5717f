use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};
use crate::app::{App, ChatRole, InputMode, OnboardField, Screen};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    if app.screen == Screen::Error {
        render_error_screen(frame, area);
        return;
    }

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Onboarding => render_onboarding_screen(app, frame, body_area),
        Screen::Chatting => render_chat_screen(app, frame, body_area),
        Screen::Error => unreachable!(),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let user = app
        .profile
        .as_ref()
        .map(|p| format!(" {} ({})", p.name, p.pronouns))
        .unwrap_or_default();

    let title = Line::from(vec![
        Span::styled(" ANA ", Style::default().fg(Color::Magenta).bold()),
        Span::styled(user, Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.screen {
        Screen::Onboarding => " WELCOME ",
        Screen::Chatting => " CHAT ",
        Screen::Error => " ERROR ",
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match (app.screen, app.input_mode) {
        (Screen::Onboarding, _) => vec![
            Span::styled(" Tab ", key_style),
            Span::styled(" field ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" continue ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" quit ", label_style),
        ],
        (Screen::Chatting, InputMode::Editing) => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
        (Screen::Chatting, InputMode::Normal) => vec![
            Span::styled(" i ", key_style),
            Span::styled(" type ", label_style),
            Span::styled(" j/k ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" G ", key_style),
            Span::styled(" latest ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ],
        _ => vec![],
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_onboarding_screen(app: &App, frame: &mut Frame, area: Rect) {
    // Centered card
    let card_width = 46.min(area.width.saturating_sub(4));
    let card_height = 13.min(area.height.saturating_sub(2));
    let card_x = area.x + (area.width.saturating_sub(card_width)) / 2;
    let card_y = area.y + (area.height.saturating_sub(card_height)) / 2;
    let card_area = Rect::new(card_x, card_y, card_width, card_height);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    let inner = block.inner(card_area);
    frame.render_widget(block, card_area);

    // Too small to lay the form out; the terminal needs resizing anyway.
    if inner.height < 10 || inner.width < 12 {
        return;
    }

    let title = Paragraph::new(Line::from(Span::styled(
        "A N A",
        Style::default().fg(Color::Magenta).bold(),
    )))
    .centered();
    frame.render_widget(title, Rect::new(inner.x, inner.y, inner.width, 1));

    let subtitle = Paragraph::new("Digital connection")
        .style(Style::default().fg(Color::DarkGray))
        .centered();
    frame.render_widget(subtitle, Rect::new(inner.x, inner.y + 1, inner.width, 1));

    let name_area = Rect::new(inner.x, inner.y + 3, inner.width, 3);
    let pronouns_area = Rect::new(inner.x, inner.y + 6, inner.width, 3);

    render_form_field(
        frame,
        name_area,
        " Nom ",
        &app.name_input,
        app.name_cursor,
        app.onboard_field == OnboardField::Name,
    );
    render_form_field(
        frame,
        pronouns_area,
        " Pronoms ",
        &app.pronouns_input,
        app.pronouns_cursor,
        app.onboard_field == OnboardField::Pronouns,
    );

    let hint_area = Rect::new(inner.x, inner.y + 9, inner.width, 1);
    if app.onboard_rejected {
        let warning = Paragraph::new("Both fields are required.")
            .style(Style::default().fg(Color::Red))
            .centered();
        frame.render_widget(warning, hint_area);
    } else {
        let hint = Paragraph::new("Enter to meet Ana")
            .style(Style::default().fg(Color::DarkGray))
            .centered();
        frame.render_widget(hint, hint_area);
    }
}

fn render_form_field(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    value: &str,
    cursor: usize,
    focused: bool,
) {
    let border_color = if focused { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor >= inner_width {
        cursor - inner_width + 1
    } else {
        0
    };
    let visible_text: String = value.chars().skip(scroll_offset).take(inner_width).collect();

    let field = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(field, area);

    if focused {
        let cursor_x = (cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    // Chat log on top, composer at the bottom
    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let chat_text = if app.messages.is_empty() {
        Text::from(vec![
            Line::default(),
            Line::from(Span::styled(
                "Start the conversation",
                Style::default().fg(Color::DarkGray),
            ))
            .centered(),
        ])
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in &app.messages {
            match msg.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                }
                ChatRole::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "Ana:",
                        Style::default()
                            .fg(Color::Magenta)
                            .add_modifier(Modifier::BOLD),
                    )));
                }
            }
            for line in msg.text.lines() {
                lines.push(Line::from(line.to_string()));
            }
            if msg.streaming {
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    dots,
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::ITALIC),
                )));
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let total_lines = chat_text.lines.len() as u16;

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, chat_area);

    if total_lines > app.chat_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("^"))
            .end_symbol(Some("v"));

        let mut scrollbar_state =
            ScrollbarState::new(total_lines as usize).position(app.chat_scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            chat_area.inner(ratatui::layout::Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }

    // Composer - highlighted while editing, dimmed while a reply streams
    let input_border_color = if app.is_processing {
        Color::DarkGray
    } else if app.input_mode == InputMode::Editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let input_title = if app.is_processing {
        " Ana is typing... "
    } else {
        " Message "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(input_title);

    // Horizontal scroll keeps the cursor visible in a single-line field
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.chat_cursor;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .chat_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, input_area);

    if app.input_mode == InputMode::Editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}

fn render_error_screen(frame: &mut Frame, area: Rect) {
    let lines = vec![
        Line::default(),
        Line::from(Span::styled(
            "SYSTEM FAILURE.",
            Style::default().fg(Color::Red).bold(),
        )),
        Line::default(),
        Line::from(Span::styled(
            "The session could not be established.",
            Style::default().fg(Color::Gray),
        )),
        Line::from(Span::styled(
            "Check GEMINI_API_KEY and see the log file for details.",
            Style::default().fg(Color::DarkGray),
        )),
        Line::default(),
        Line::from(Span::styled(
            "Press q to quit.",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let notice_height = lines.len() as u16;
    let y = area.y + (area.height.saturating_sub(notice_height)) / 2;
    let notice_area = Rect::new(area.x, y, area.width, notice_height.min(area.height));

    let notice = Paragraph::new(lines).centered();
    frame.render_widget(notice, notice_area);
}
