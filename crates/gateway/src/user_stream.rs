use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use common::{ExchangeClient, Result};

/// Keeps a user-data-stream listen key alive by re-issuing the keepalive
/// ping on a fixed cadence, well inside the venue's 60-minute expiry
/// (spec.md §4.1: "at least once every 30 minutes").
pub struct ListenKeyKeeper {
    client: Arc<dyn ExchangeClient>,
    keepalive_interval: Duration,
}

impl ListenKeyKeeper {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self {
            client,
            keepalive_interval: Duration::from_secs(30 * 60),
        }
    }

    /// Obtain a listen key and keep it alive forever, re-issuing a new one
    /// if the venue invalidates it. Call inside `tokio::spawn`.
    pub async fn run(self) {
        loop {
            let listen_key = match self.client.start_user_stream().await {
                Ok(key) => key,
                Err(e) => {
                    error!(error = %e, "failed to start user data stream, retrying in 10s");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    continue;
                }
            };
            info!("user data stream listen key issued");

            loop {
                tokio::time::sleep(self.keepalive_interval).await;
                if let Err(e) = self.client.keepalive_user_stream(&listen_key).await {
                    warn!(error = %e, "listen key keepalive failed, re-issuing");
                    break;
                }
            }
        }
    }
}

pub async fn close(client: &dyn ExchangeClient, listen_key: &str) -> Result<()> {
    client.close_user_stream(listen_key).await
}
