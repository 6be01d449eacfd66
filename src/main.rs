//! Minimal driver: log in with env-provided credentials, idle on the
//! event stream, log out on ctrl-c.

use gridlink::networking::auth::LoginParams;
use gridlink::networking::manager::{NetworkEvent, NetworkManager};
use gridlink::networking::LoginClient;
use gridlink::config::NetworkSettings;
use gridlink::utils::logging;
use std::env;
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    logging::log_system_info();

    let (first, last, password) = match (
        env::var("GRIDLINK_FIRST_NAME"),
        env::var("GRIDLINK_LAST_NAME"),
        env::var("GRIDLINK_PASSWORD"),
    ) {
        (Ok(first), Ok(last), Ok(password)) => (first, last, password),
        _ => {
            eprintln!(
                "Set GRIDLINK_FIRST_NAME, GRIDLINK_LAST_NAME and GRIDLINK_PASSWORD to log in"
            );
            std::process::exit(2);
        }
    };

    let settings = Arc::new(NetworkSettings::load()?);
    let manager = NetworkManager::new(settings.clone());
    let login = LoginClient::new(settings);

    let mut status = login.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow();
            info!(status = ?current, "login progress");
        }
    });

    let params = LoginParams::new(&first, &last, &password);
    let response = login.login(&manager, &params).await?;
    if let Some(message) = &response.message {
        info!(message, "message of the day");
    }

    let mut events = manager.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("logging out");
                manager.logout().await?;
                break;
            }
            event = events.recv() => match event {
                Ok(NetworkEvent::Disconnected { reason, message }) => {
                    info!(?reason, message, "session ended");
                    break;
                }
                Ok(event) => debug!(?event, "network event"),
                Err(_) => break,
            }
        }
    }

    Ok(())
}
