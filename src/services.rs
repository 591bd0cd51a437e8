use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::settings::Settings;

pub mod referrals;
pub mod telegram;

#[derive(Debug, thiserror::Error)]
enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(pool: PgPool, settings: Settings) -> Result<(), anyhow::Error> {
    let (referral_tx, mut referral_rx) = mpsc::channel(512);

    log::info!("Starting referral service.");
    let mut referral_service = referrals::ReferralService::new();
    let referral_pool = pool.clone();
    tokio::spawn(async move {
        referral_service
            .run(
                referrals::ReferralRequestHandler::new(referral_pool),
                &mut referral_rx,
            )
            .await;
    });

    log::info!("Starting Telegram long-poll loop.");
    let bot = telegram::TelegramService::new(settings.telegram, referral_tx);
    bot.run().await
}
