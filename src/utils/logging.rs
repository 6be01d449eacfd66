use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use std::env;
use std::fs;
use std::io;

/// Initialize logging with console and file output
pub fn init_logging() {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let enable_backtrace = env::var("RUST_BACKTRACE").unwrap_or_else(|_| "0".to_string()) == "1";

    // Session-based log file, cleaned on startup
    if let Err(e) = fs::remove_file("gridlink.log") {
        if e.kind() != io::ErrorKind::NotFound {
            eprintln!("Warning: Failed to remove existing gridlink.log: {}", e);
        }
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&log_level);
        if let Ok(directive) = "gridlink=debug".parse() {
            filter = filter.add_directive(directive);
        }
        filter
    });

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(true);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    match fs::File::create("gridlink.log") {
        Ok(log_file) => {
            subscriber
                .with(
                    fmt::layer()
                        .with_writer(log_file)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(false), // No ANSI codes in file
                )
                .init();
        }
        Err(e) => {
            subscriber.init();
            tracing::warn!("Could not create gridlink.log, console logging only: {}", e);
        }
    }

    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("Panic occurred: {}", panic_info);

        if let Some(location) = panic_info.location() {
            tracing::error!(
                "Panic location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }

        if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            tracing::error!("Panic payload: {}", s);
        }

        if enable_backtrace {
            tracing::error!("Backtrace:\n{:?}", std::backtrace::Backtrace::capture());
        }
    }));

    tracing::info!("Logging initialized with level: {}", log_level);
}

/// Log basic environment information for bug reports
pub fn log_system_info() {
    tracing::info!("=== System Information ===");
    tracing::info!("OS: {}", std::env::consts::OS);
    tracing::info!("Architecture: {}", std::env::consts::ARCH);
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("==========================");
}
