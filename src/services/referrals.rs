use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::referrals::AttributionOutcome;
use crate::referrals::{AttributionProcessor, ReferralError, ReferralLedger};
use crate::repositories::referrals::{PgReferralRepository, ReferralStore};

pub enum ReferralRequest {
    IssueCode {
        username: String,
        response: oneshot::Sender<Result<String, ServiceError>>,
    },
    LookupCode {
        username: String,
        response: oneshot::Sender<Result<Option<String>, ServiceError>>,
    },
    GetCount {
        username: String,
        response: oneshot::Sender<Result<i32, ServiceError>>,
    },
    Process {
        code: Option<String>,
        referred_id: i64,
        referred_username: Option<String>,
        response: oneshot::Sender<Result<AttributionOutcome, ServiceError>>,
    },
}

impl From<ReferralError> for ServiceError {
    fn from(e: ReferralError) -> Self {
        match e {
            ReferralError::InvalidUsername => ServiceError::InvalidRequest(e.to_string()),
            ReferralError::CodeRetriesExhausted(_) => ServiceError::Internal(e.to_string()),
            ReferralError::Store(store) => ServiceError::Database(store.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    ledger: ReferralLedger,
    processor: AttributionProcessor,
}

impl ReferralRequestHandler {
    pub fn new(sql_conn: PgPool) -> Self {
        let store: Arc<dyn ReferralStore> = Arc::new(PgReferralRepository::new(sql_conn));

        ReferralRequestHandler {
            ledger: ReferralLedger::new(store.clone()),
            processor: AttributionProcessor::new(store),
        }
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::IssueCode { username, response } => {
                let result = self.ledger.issue_or_get_code(&username).await;
                let _ = response.send(result.map_err(Into::into));
            }
            ReferralRequest::LookupCode { username, response } => {
                let result = self.ledger.lookup_code_by_username(&username).await;
                let _ = response.send(result.map_err(Into::into));
            }
            ReferralRequest::GetCount { username, response } => {
                let result = self.ledger.get_count(&username).await;
                let _ = response.send(result.map_err(Into::into));
            }
            ReferralRequest::Process {
                code,
                referred_id,
                referred_username,
                response,
            } => {
                let result = self
                    .processor
                    .process(code.as_deref(), referred_id, referred_username.as_deref())
                    .await;
                let _ = response.send(result.map_err(Into::into));
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
