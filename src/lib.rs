pub mod api;
pub mod config;
pub mod logging;

use api::ApiService;
use config::AppConfig;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wamux_sqlite::SqliteStore;
use wamux_whatsapp::{
    AccountDriver, AccountStore, ConfigAccountStore, WaEvent, WaResult, WaStore, WhatsApp,
    WhatsAppError,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Wire the account store and record store selected by `config`.
pub async fn build_whatsapp(config: &AppConfig) -> WaResult<WhatsApp> {
    config.whatsapp.validate()?;

    let sqlite = match &config.database_url {
        Some(url) => {
            let store = SqliteStore::connect_url(url).await?;
            store.migrate().await?;
            Some(Arc::new(store))
        }
        None => None,
    };

    let accounts: Arc<dyn AccountStore> = match config.whatsapp.account_driver {
        AccountDriver::Config => {
            Arc::new(ConfigAccountStore::new(config.whatsapp.accounts.clone()))
        }
        AccountDriver::Database => match &sqlite {
            Some(store) => store.clone() as Arc<dyn AccountStore>,
            None => {
                return Err(WhatsAppError::config(
                    "account_driver 'database' requires database_url",
                ))
            }
        },
    };

    // Without a database nothing is persisted: records would only pile up.
    let store = sqlite.map(|store| store as Arc<dyn WaStore>);
    if store.is_none() {
        info!("No database configured; records are not persisted");
    }

    Ok(WhatsApp::new(config.whatsapp.clone(), accounts, store))
}

/// Log every webhook notification until the channel closes.
pub fn spawn_event_logger(mut events: broadcast::Receiver<WaEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WaEvent::MessageReceived {
                    from,
                    preview,
                    account,
                    ..
                }) => info!("[{account}] message from {from}: {preview}"),
                Ok(WaEvent::MessageDelivered {
                    message_id,
                    account,
                    ..
                }) => info!("[{account}] delivered {message_id}"),
                Ok(WaEvent::MessageRead {
                    message_id,
                    account,
                    ..
                }) => info!("[{account}] read {message_id}"),
                Ok(event) => debug!("event {}", event.name()),
                Err(RecvError::Lagged(n)) => warn!("event logger skipped {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();

    let config = AppConfig::load()?;
    let whatsapp = build_whatsapp(&config).await?;
    info!(
        "wamux ready [default_account={}, driver={:?}]",
        whatsapp.account_name(),
        config.whatsapp.account_driver
    );

    let (events, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    spawn_event_logger(rx);

    let api = Arc::new(ApiService::new(whatsapp, Arc::new(events)));
    api.start_server(&config.bind).await
}
