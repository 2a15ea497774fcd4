mod animation;
mod backend;
mod canvas;
mod config;
mod drawing;
mod gather;
mod input_handler;
mod layers;
mod pointer;
mod render;
mod state;
mod switcher;
mod view;

use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use smithay::{
    backend::winit::WinitEvent,
    reexports::{
        calloop::{
            generic::Generic,
            signals::{Signal, Signals},
            timer::{TimeoutAction, Timer},
            EventLoop, Interest, Mode, PostAction,
        },
        wayland_server::Display,
        winit::platform::pump_events::PumpStatus,
    },
    wayland::socket::ListeningSocketSource,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use backend::BackendData;
use config::Config;
use state::{CalloopData, ClientState, InfinideskState};

/// An infinite-canvas Wayland compositor: windows live on an unbounded
/// 2D plane you pan, zoom and draw on.
#[derive(Debug, Parser)]
#[command(name = "infinidesk", version)]
struct Cli {
    /// Command to run once the Wayland socket is ready (repeatable).
    #[arg(short = 's', long = "startup")]
    startup: Vec<String>,
    /// Verbose logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load().unwrap_or_else(|err| {
        warn!("falling back to default configuration: {err}");
        Config::default()
    });

    // One event loop owns all mutable state; every callback below runs
    // to completion before the next, so the handlers never race.
    let mut event_loop: EventLoop<CalloopData> =
        EventLoop::try_new().context("initializing the event loop")?;
    let display: Display<InfinideskState> = Display::new().context("creating the display")?;
    let dh = display.handle();

    let (backend_data, mut winit_loop) = BackendData::init(&dh, config.scale as f64)?;
    let state = InfinideskState::init(event_loop.handle(), dh.clone(), backend_data, config)?;

    // The socket clients connect to; its name lands in the environment
    // so children of the compositor find us.
    let socket_source =
        ListeningSocketSource::new_auto().context("binding the wayland socket")?;
    let socket_name = socket_source.socket_name().to_os_string();
    std::env::set_var("WAYLAND_DISPLAY", &socket_name);
    info!(socket = ?socket_name, "listening for clients");
    event_loop
        .handle()
        .insert_source(socket_source, |stream, _, data| {
            if let Err(err) = data
                .display_handle
                .insert_client(stream, Arc::new(ClientState::default()))
            {
                warn!("error adding wayland client: {err}");
            }
        })
        .context("inserting the socket source")?;

    // Dispatch client requests whenever the display fd is readable.
    event_loop
        .handle()
        .insert_source(
            Generic::new(display, Interest::READ, Mode::Level),
            |_, display, data| {
                // Safety: the display is never dropped from inside its
                // own callback.
                unsafe {
                    display.get_mut().dispatch_clients(&mut data.state).unwrap();
                }
                Ok(PostAction::Continue)
            },
        )
        .context("inserting the display source")?;

    // SIGINT/SIGTERM end the loop like the Exit action does.
    let signals =
        Signals::new(&[Signal::SIGINT, Signal::SIGTERM]).context("masking unix signals")?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, data| {
            info!(signal = ?event.signal(), "terminating");
            data.state.running.store(false, Ordering::SeqCst);
        })
        .context("inserting the signal source")?;

    // Pump the winit window and redraw at a fixed cadence; frames are
    // skipped while nothing changed and nothing animates.
    event_loop
        .handle()
        .insert_source(Timer::immediate(), move |_, _, data| {
            let status = winit_loop.dispatch_new_events(|event| match event {
                WinitEvent::Resized { size, .. } => {
                    data.state.backend_data.resize(size);
                    data.state.arrange_layers();
                }
                WinitEvent::Input(event) => input_handler::handle_input(&mut data.state, event),
                WinitEvent::Redraw => data.state.needs_redraw = true,
                WinitEvent::CloseRequested => {
                    data.state.running.store(false, Ordering::SeqCst)
                }
                WinitEvent::Focus(_) => {}
            });
            if let PumpStatus::Exit(_) = status {
                data.state.running.store(false, Ordering::SeqCst);
                return TimeoutAction::Drop;
            }
            if data.state.needs_redraw {
                if let Err(err) = render::render_frame(&mut data.state) {
                    error!("render error: {err:#}");
                }
            }
            TimeoutAction::ToDuration(Duration::from_millis(16))
        })
        .map_err(|err| anyhow::anyhow!("inserting the frame timer: {err}"))?;

    // The socket exists, children can connect now.
    for command in state.config.startup.iter().chain(cli.startup.iter()) {
        input_handler::spawn_command(command);
    }

    let mut data = CalloopData {
        state,
        display_handle: dh,
    };
    while data.state.running.load(Ordering::SeqCst) {
        let result = event_loop.dispatch(Some(Duration::from_millis(16)), &mut data);
        if let Err(err) = result {
            error!("event loop error: {err}");
            data.state.running.store(false, Ordering::SeqCst);
        } else if let Err(err) = data.display_handle.flush_clients() {
            warn!("failed to flush clients: {err}");
        }
    }

    // Dropping the loop releases the remaining clients, then the
    // display itself.
    info!("bye");
    Ok(())
}
