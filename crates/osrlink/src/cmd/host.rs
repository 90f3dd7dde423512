use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use osrlink_session::{DegradeReason, Session, SessionConfig, SessionEvent};

use crate::cmd::{parse_duration, HostArgs};
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, print_summary, OutputFormat, SessionSummary};

pub fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    let tick_interval = parse_duration(&args.tick_interval)?;
    let mut config = SessionConfig::new(&args.executable)
        .with_args(args.args)
        .with_layout(args.max_frame_size)
        .with_handshake_timeout(parse_duration(&args.handshake_timeout)?)
        .with_shutdown_grace(parse_duration(&args.grace)?)
        .with_inherited_output(args.inherit_output);
    if let Some(dir) = args.socket_dir {
        config = config.with_socket_dir(dir);
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut session =
        Session::launch(config).map_err(|err| session_error("session start failed", err))?;

    if let Some(url) = &args.url {
        session
            .create_surface(url, args.width, args.height)
            .map_err(|err| session_error("create surface failed", err))?;
    }

    let mut frames = 0usize;
    let mut messages = 0usize;
    let mut ticks = 0u64;
    let mut degraded: Option<DegradeReason> = None;

    while running.load(Ordering::SeqCst) && degraded.is_none() {
        for event in session.tick() {
            match &event {
                SessionEvent::Frame(_) => frames += 1,
                SessionEvent::Degraded(reason) => degraded = Some(reason.clone()),
                _ => messages += 1,
            }
            print_event(&event, format);
        }

        ticks += 1;
        if args.ticks.is_some_and(|limit| ticks >= limit)
            || args.frames.is_some_and(|limit| frames >= limit)
        {
            break;
        }
        if degraded.is_none() {
            std::thread::sleep(tick_interval);
        }
    }

    tracing::info!(ticks, frames, "stopping session");
    session.close();

    print_summary(
        &SessionSummary {
            event: "summary",
            pid: session.pid(),
            state: session.state().to_string(),
            frames,
            messages,
            exit_code: session.exit_code(),
            last_error: session.last_error().map(str::to_string),
        },
        format,
    );

    match degraded {
        Some(reason) => Err(session_error("session degraded", reason.into())),
        None => Ok(SUCCESS),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
