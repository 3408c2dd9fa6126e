mod ui;

use tracing_subscriber::{
    fmt::{Layer as FmtLayer, writer::MakeWriterExt},
    prelude::*,
};

fn main() {
    let Some(out_dir) = std::env::args().nth(1) else {
        eprintln!("usage: multirec <output-dir>");
        std::process::exit(2);
    };

    // The meters own the terminal, so logs go to a file. Keep the guard
    // alive or the writer thread stops flushing.
    let _log_guard = init_logging();

    run(&out_dir);
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let file = std::fs::File::create("multirec.log").ok()?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let max_level = if std::env::args().any(|arg| arg == "--debug") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            FmtLayer::new()
                .with_ansi(false)
                .with_writer(writer.with_max_level(max_level)),
        )
        .init();
    Some(guard)
}

#[cfg(target_os = "linux")]
fn run(out_dir: &str) {
    let session = match multirec_engine::init(out_dir) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    tracing::info!("recording into ./{out_dir}");

    // A dying soundcard exits through the engine; make sure the terminal
    // comes back first.
    multirec_engine::set_fatal_hook(ratatui::restore);

    let orchestrator = session.spawn_orchestrator();
    let terminal = ratatui::init();
    let result = ui::run(terminal, &session, out_dir);
    ratatui::restore();

    // Idempotent if the UI already requested it; makes sure the
    // orchestrator winds down even when the UI loop errored out.
    session.request_stop();
    let _ = orchestrator.join();

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

#[cfg(not(target_os = "linux"))]
fn run(_out_dir: &str) {
    eprintln!("multirec captures through ALSA and only runs on Linux");
    std::process::exit(1);
}
