use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::referrals::ReferralRequest;
use crate::models::referrals::AttributionOutcome;
use crate::models::telegram::IncomingMessage;
use crate::repositories::telegram::TelegramApi;
use crate::settings::Telegram;

const GENERIC_ERROR_REPLY: &str = "Something went wrong, please try again later.";
const NO_USERNAME_REPLY: &str =
    "You do not have a Telegram username! Please create one in the Telegram settings.";
const SELF_REFERRAL_REPLY: &str = "You can not use your own referral link!";
const NO_CODE_REPLY: &str = "You do not have a referral code! Please create one using /create";

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Command layer for the bot: polls Telegram, parses `/start`, `/create` and
/// `/check`, and forwards the work to the referral service.
pub struct TelegramService {
    api: TelegramApi,
    channel_link: String,
    poll_timeout_secs: u64,
    referral_channel: mpsc::Sender<ReferralRequest>,
}

/// Extracts the referral code argument from a `/start <code>` command.
fn extract_referral_code(text: &str) -> Option<&str> {
    let mut parts = text.split_whitespace();
    parts.next()?;
    parts.next()
}

impl TelegramService {
    pub fn new(settings: Telegram, referral_channel: mpsc::Sender<ReferralRequest>) -> Self {
        TelegramService {
            api: TelegramApi::new(settings.token),
            channel_link: settings.channel_link,
            poll_timeout_secs: settings.poll_timeout_secs,
            referral_channel,
        }
    }

    pub async fn run(self) -> Result<(), anyhow::Error> {
        let mut offset = 0i64;

        loop {
            let updates = match self.api.get_updates(offset, self.poll_timeout_secs).await {
                Ok(updates) => updates,
                Err(e) => {
                    log::error!("Polling Telegram failed: {}", e);
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let Some(message) = update.message.and_then(|m| m.into_incoming()) else {
                    continue;
                };

                if let Some(reply) = self.handle_message(&message).await {
                    if let Err(e) = self
                        .api
                        .send_reply(message.chat_id, message.message_id, &reply)
                        .await
                    {
                        log::error!("Failed to reply in chat {}: {}", message.chat_id, e);
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: &IncomingMessage) -> Option<String> {
        match message.text.split_whitespace().next() {
            Some("/start") => Some(self.handle_start(message).await),
            Some("/create") => Some(self.handle_create(message).await),
            Some("/check") => Some(self.handle_check(message).await),
            _ => None,
        }
    }

    fn join_line(&self) -> String {
        format!(
            "Please join the Telegram group by clicking this link: {}",
            self.channel_link
        )
    }

    async fn handle_start(&self, message: &IncomingMessage) -> String {
        let code = extract_referral_code(&message.text).map(|c| c.to_string());

        let (tx, rx) = oneshot::channel();
        let sent = self
            .referral_channel
            .send(ReferralRequest::Process {
                code,
                referred_id: message.sender_id,
                referred_username: message.username.clone(),
                response: tx,
            })
            .await;
        if sent.is_err() {
            return GENERIC_ERROR_REPLY.to_string();
        }

        match rx.await {
            Ok(Ok(AttributionOutcome::Attributed { referrer })) => format!(
                "Hello, you have been referred by: {}\n{}",
                referrer,
                self.join_line()
            ),
            Ok(Ok(AttributionOutcome::AlreadyAttributed)) => format!(
                "Hello, you have already been referred by someone else!\n{}",
                self.join_line()
            ),
            Ok(Ok(AttributionOutcome::SelfReferral)) => SELF_REFERRAL_REPLY.to_string(),
            Ok(Ok(AttributionOutcome::InvalidCode)) => {
                format!("Your referral code is invalid.\n{}", self.join_line())
            }
            Ok(Ok(AttributionOutcome::NoCodeProvided)) => {
                format!("You did not input a referral code!\n{}", self.join_line())
            }
            Ok(Err(service_error)) => {
                log::error!("Processing referral failed: {}", service_error);
                GENERIC_ERROR_REPLY.to_string()
            }
            Err(_) => GENERIC_ERROR_REPLY.to_string(),
        }
    }

    async fn handle_create(&self, message: &IncomingMessage) -> String {
        let Some(username) = message.username.clone() else {
            return NO_USERNAME_REPLY.to_string();
        };

        // Probe first so the reply can say whether the link already existed;
        // issuing is idempotent either way.
        match self.lookup_code(username.clone()).await {
            Ok(Some(code)) => format!(
                "You have already created a referral link! Your referral link is:\n{}?start={}",
                self.channel_link, code
            ),
            Ok(None) => {
                let (tx, rx) = oneshot::channel();
                let sent = self
                    .referral_channel
                    .send(ReferralRequest::IssueCode {
                        username,
                        response: tx,
                    })
                    .await;
                if sent.is_err() {
                    return GENERIC_ERROR_REPLY.to_string();
                }

                match rx.await {
                    Ok(Ok(code)) => format!(
                        "Your referral link is:\n{}?start={}",
                        self.channel_link, code
                    ),
                    Ok(Err(service_error)) => {
                        log::error!("Issuing referral code failed: {}", service_error);
                        GENERIC_ERROR_REPLY.to_string()
                    }
                    Err(_) => GENERIC_ERROR_REPLY.to_string(),
                }
            }
            Err(reply) => reply,
        }
    }

    async fn handle_check(&self, message: &IncomingMessage) -> String {
        let Some(username) = message.username.clone() else {
            return NO_CODE_REPLY.to_string();
        };

        // Absent account and zero referrals both count as 0 at the ledger, so
        // existence is probed separately to keep the original prompt.
        match self.lookup_code(username.clone()).await {
            Ok(None) => NO_CODE_REPLY.to_string(),
            Ok(Some(_)) => {
                let (tx, rx) = oneshot::channel();
                let sent = self
                    .referral_channel
                    .send(ReferralRequest::GetCount {
                        username,
                        response: tx,
                    })
                    .await;
                if sent.is_err() {
                    return GENERIC_ERROR_REPLY.to_string();
                }

                match rx.await {
                    Ok(Ok(count)) => format!("Referral amount: {}", count),
                    Ok(Err(service_error)) => {
                        log::error!("Checking referral count failed: {}", service_error);
                        GENERIC_ERROR_REPLY.to_string()
                    }
                    Err(_) => GENERIC_ERROR_REPLY.to_string(),
                }
            }
            Err(reply) => reply,
        }
    }

    /// Looks up the user's existing code, mapping failures to the reply that
    /// should be sent instead.
    async fn lookup_code(&self, username: String) -> Result<Option<String>, String> {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .referral_channel
            .send(ReferralRequest::LookupCode {
                username,
                response: tx,
            })
            .await;
        if sent.is_err() {
            return Err(GENERIC_ERROR_REPLY.to_string());
        }

        match rx.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(service_error)) => {
                log::error!("Looking up referral code failed: {}", service_error);
                Err(GENERIC_ERROR_REPLY.to_string())
            }
            Err(_) => Err(GENERIC_ERROR_REPLY.to_string()),
        }
    }
}
