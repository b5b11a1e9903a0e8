use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

use ledctl::{AppConfig, AppError, GpioBackend, LedController, TokioLauncher, spawn_worker};

#[cfg(feature = "hardware-gpio")]
use ledctl::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use ledctl::MockGpioBackend;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LEDCTL_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = match AppConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config {config_path}: {e}");
            return exit_code(&e);
        }
    };

    #[cfg(feature = "hardware-gpio")]
    let backend = match LibgpiodBackend::new(&config.chip) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("Failed to init libgpiod backend on {}: {e}", config.chip);
            return exit_code(&e);
        }
    };
    #[cfg(not(feature = "hardware-gpio"))]
    let backend = {
        info!("hardware-gpio disabled, using simulated lines");
        Arc::new(MockGpioBackend::default())
    };

    run(config, backend).await
}

async fn run<B: GpioBackend + 'static>(config: AppConfig, backend: Arc<B>) -> ExitCode {
    let (notifier, worker) =
        spawn_worker(config.notify_queue_capacity, Arc::new(TokioLauncher));

    let mut controllers = Vec::with_capacity(config.controllers.len());
    let mut last_error = None;
    for ctl_config in config.controllers {
        let mut controller = LedController::new(ctl_config, backend.clone());
        if controller.config().has_notifications() {
            controller = controller.with_notifier(notifier.clone());
        }
        match controller.start() {
            Ok(()) => controllers.push(controller),
            Err(e) => {
                error!(
                    "{}: failed to start (code {}): {e}",
                    controller.name(),
                    e.code()
                );
                last_error = Some(e);
            }
        }
    }
    drop(notifier);

    if controllers.is_empty() {
        return last_error.as_ref().map(exit_code).unwrap_or(ExitCode::FAILURE);
    }

    info!("{} controller(s) running", controllers.len());
    wait_for_shutdown().await;

    while let Some(mut controller) = controllers.pop() {
        controller.stop();
    }
    // the worker exits once the last dispatcher drops its queue handle
    if let Err(e) = worker.await {
        warn!("notification worker ended abnormally: {e}");
    }
    ExitCode::SUCCESS
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
    }
}

fn exit_code(e: &AppError) -> ExitCode {
    match u8::try_from(e.code().unsigned_abs()) {
        Ok(0) | Err(_) => ExitCode::FAILURE,
        Ok(code) => ExitCode::from(code),
    }
}
