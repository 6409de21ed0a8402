use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing_subscriber::EnvFilter;

use tactus::{MidirPort, PlaybackUpdate, PlayerConfig, Session, Transport, available_ports};

const SEEK_STEP: f64 = 5.0;
const SPEED_STEP: f64 = 0.1;
const VELOCITY_STEP: u8 = 5;
const SETTINGS_FILE: &str = "settings.ron";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        let _ = disable_raw_mode();
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(file) = args.next().map(PathBuf::from) else {
        print_usage()?;
        return Ok(());
    };
    let port_index: usize = match args.next() {
        Some(s) => s.parse()?,
        None => 0,
    };

    let mut session = Session::new();
    let settings = std::path::Path::new(SETTINGS_FILE);
    if settings.exists() {
        session.apply_config(PlayerConfig::load(settings)?);
    }
    session.load_file(&file)?;
    session.set_port(Box::new(MidirPort::connect(port_index)?));
    session.play()?;

    println!(
        "playing {} ({})  [space] pause  [s] stop  [p] play  [<-/->] seek  [+/-] speed  [up/down] velocity  [e] errors  [q] quit",
        file.display(),
        format_time(session.duration()),
    );

    enable_raw_mode()?;
    let result = control_loop(&mut session);
    disable_raw_mode()?;
    println!();

    session.stop();
    session.close_port();
    result
}

fn control_loop(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        for update in session.updates().try_iter() {
            match update {
                PlaybackUpdate::Finished => {
                    print!("\r\nplayback finished\r\n");
                }
                PlaybackUpdate::DispatchFailed { message } => {
                    print!("\r\nplayback aborted: {message}\r\n");
                }
            }
        }

        draw_status(session)?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Char(' ') => match session.state() {
                Transport::Playing => session.pause(),
                Transport::Paused => session.resume(),
                Transport::Stopped => session.play()?,
            },
            KeyCode::Char('p') => session.play()?,
            KeyCode::Char('s') => session.stop(),
            KeyCode::Left => session.seek(session.position() - SEEK_STEP)?,
            KeyCode::Right => session.seek(session.position() + SEEK_STEP)?,
            KeyCode::Char('+') | KeyCode::Char('=') => {
                session.set_speed(session.config().speed + SPEED_STEP);
            }
            KeyCode::Char('-') => {
                session.set_speed(session.config().speed - SPEED_STEP);
            }
            KeyCode::Up => {
                let v = session.config().output_velocity;
                session.set_velocity(v.saturating_add(VELOCITY_STEP));
            }
            KeyCode::Down => {
                let v = session.config().output_velocity;
                session.set_velocity(v.saturating_sub(VELOCITY_STEP));
            }
            KeyCode::Char('e') => {
                let enabled = !session.config().error_mode_enabled;
                session.set_error_mode(enabled);
            }
            _ => {}
        }
    }
}

fn draw_status(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let state = match session.state() {
        Transport::Stopped => "stopped",
        Transport::Playing => "playing",
        Transport::Paused => "paused ",
    };
    let config = session.config();
    let errors = if config.error_mode_enabled { "on " } else { "off" };
    print!(
        "\r{} / {}  [{}]  speed {:.1}x  errors {}   ",
        format_time(session.position()),
        format_time(session.duration()),
        state,
        config.speed,
        errors,
    );
    std::io::stdout().flush()?;
    Ok(())
}

fn print_usage() -> Result<(), Box<dyn std::error::Error>> {
    println!("usage: tactus <file.mid> [port-index]");
    println!("\navailable midi output ports:");
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("  (none)");
    }
    for (i, name) in ports.iter().enumerate() {
        println!("  {i}: {name}");
    }
    Ok(())
}

fn format_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
