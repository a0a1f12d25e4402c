// In src/main.rs

// Declare modules
pub mod channel;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod host;
pub mod keys;
pub mod lifecycle;
pub mod protocol;

use crate::{
    config::Config,
    control::WindowDelegate,
    host::{ControlContext, UiTask},
    lifecycle::ChildProcessLauncher,
    protocol::{InputEvent, WidgetType, WindowHandle},
};

use anyhow::{bail, Context};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::time::Duration;

/// How long the control process waits for the first output size.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a spawned device may take to connect to its socket.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

const DEMO_WINDOW: WindowHandle = WindowHandle(1);

/// Delegate of the demo window: logs what it receives and shuts the
/// application down when the window is asked to close.
struct DemoWindow {
    tasks: Sender<UiTask>,
}

impl WindowDelegate for DemoWindow {
    fn on_input(&mut self, event: &InputEvent) {
        debug!("Demo window input: {:?}", event);
    }

    fn on_activation_changed(&mut self, active: bool) {
        info!("Demo window active: {}", active);
    }

    fn on_bounds_changed(&mut self, width: u32, height: u32) {
        info!("Demo window resized to {}x{}", width, height);
    }

    fn on_close_requested(&mut self) {
        info!("Demo window close requested");
        if self.tasks.send(UiTask::CloseWindow(DEMO_WINDOW)).is_err()
            || self.tasks.send(UiTask::Shutdown).is_err()
        {
            warn!("UI loop already gone, close request ignored");
        }
    }
}

/// Main entry point for `window-bridge`.
///
/// `window-bridge` runs the control process, which spawns itself again as
/// `window-bridge device --socket PATH` for the device side.
fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = Config::load_from_env().context("Failed to load configuration")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("device") => {
            let socket = match (args.get(1).map(String::as_str), args.get(2)) {
                (Some("--socket"), Some(path)) => PathBuf::from(path),
                _ => bail!("Usage: window-bridge device --socket PATH"),
            };
            device::runner::run(&socket, &config)
        }
        Some(other) => bail!("Unknown command '{}'", other),
        None => run_control(&config),
    }
}

fn run_control(config: &Config) -> anyhow::Result<()> {
    info!("Starting window-bridge control process...");

    let program = match &config.lifecycle.device_program {
        Some(program) => program.clone(),
        None => std::env::current_exe().context("Failed to resolve current executable")?,
    };
    let socket_dir = config.device.resolved_socket_dir();
    info!(
        "Device program: {}, socket dir: {}",
        program.display(),
        socket_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    let launcher = ChildProcessLauncher::new(program, socket_dir, ACCEPT_TIMEOUT, tx.clone());
    let mut context = ControlContext::new(launcher, config);
    context.start().context("Failed to start the device process")?;

    let (width, height) = context
        .wait_for_output_size(&rx, STARTUP_TIMEOUT)
        .context("Device never reported an output size")?;
    info!("Output size {}x{}", width, height);

    let windows = context.windows_mut();
    windows
        .create_window(
            DEMO_WINDOW,
            None,
            0,
            0,
            WidgetType::Toplevel,
            Box::new(DemoWindow { tasks: tx.clone() }),
        )
        .context("Failed to create the demo window")?;
    windows.set_title(DEMO_WINDOW, "window-bridge")?;
    windows.set_bounds(DEMO_WINDOW, width / 2, height / 2)?;
    windows.show(DEMO_WINDOW)?;
    windows.activate(DEMO_WINDOW)?;

    // The launcher and the demo delegate keep their own senders.
    drop(tx);
    let result = context.run(&rx);
    context.shutdown();
    info!("window-bridge control process exiting");
    result
}
