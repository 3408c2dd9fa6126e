#![cfg(target_os = "linux")]

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use multirec_engine::hw::traits::CaptureDriver;
use multirec_engine::session::Session;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style, Stylize};
use ratatui::widgets::{Gauge, Paragraph};
use ratatui::{DefaultTerminal, Frame};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(10);

/// Meter floor in dB; anything quieter draws as an empty bar.
const DB_FLOOR: f64 = -18.0;

/// Key loop: redraw the meters every tick, `r` starts a recording, `q`
/// arms the stop confirmation and `y` confirms it. Everything else is
/// ignored.
pub fn run<D: CaptureDriver>(
    mut terminal: DefaultTerminal,
    session: &Session<D>,
    out_dir: &str,
) -> std::io::Result<()> {
    let mut recording = false;
    let mut confirm_stop = false;

    loop {
        terminal.draw(|frame| draw(frame, session, out_dir, recording, confirm_stop))?;

        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('r') => {
                session.request_start();
                recording = true;
            }
            KeyCode::Char('q') => confirm_stop = true,
            KeyCode::Char('y') if confirm_stop => {
                session.request_stop();
                return Ok(());
            }
            _ => {}
        }
    }
}

fn draw<D: CaptureDriver>(
    frame: &mut Frame,
    session: &Session<D>,
    out_dir: &str,
    recording: bool,
    confirm_stop: bool,
) {
    let [title_row, meter_area, footer_row] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    frame.render_widget(
        Paragraph::new(format!("multirec — ./{out_dir}")).bold(),
        title_row,
    );

    let mut rows: Vec<Constraint> = Vec::new();
    for _ in &session.devices {
        rows.push(Constraint::Length(1));
        rows.push(Constraint::Length(1));
    }
    let meter_rows = Layout::vertical(rows).split(meter_area);
    for (dev_idx, device) in session.devices.iter().enumerate() {
        let peaks = device.peaks();
        for (ch, label) in ["L", "R"].iter().enumerate() {
            let row = meter_rows[dev_idx * 2 + ch];
            draw_meter(frame, row, &format!("{} {label}", device.name), peaks[ch]);
        }
    }

    let footer = if confirm_stop {
        Paragraph::new("really stop? (y)").bold().fg(Color::Yellow)
    } else if recording {
        Paragraph::new("● REC — [q] stop").bold().fg(Color::Red)
    } else {
        Paragraph::new("[r] record  [q] quit")
    };
    frame.render_widget(footer, footer_row);
}

fn draw_meter(frame: &mut Frame, row: Rect, label: &str, peak: u16) {
    let [name_col, gauge_col] =
        Layout::horizontal([Constraint::Length(12), Constraint::Fill(1)]).areas(row);
    frame.render_widget(Paragraph::new(label.to_string()), name_col);

    let db = meter_db(peak);
    let ratio = ((db - DB_FLOOR) / -DB_FLOOR).clamp(0.0, 1.0);
    let color = if db > -2.0 { Color::Red } else { Color::Green };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(color))
        .label(format!("{db:5.1} dB"))
        .ratio(ratio);
    frame.render_widget(gauge, gauge_col);
}

fn meter_db(peak: u16) -> f64 {
    if peak == 0 {
        return DB_FLOOR;
    }
    (10.0 * (f64::from(peak) / 32768.0).log10()).max(DB_FLOOR)
}
