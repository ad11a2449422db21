use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::config::Config;
use crate::currency::CurrencyNormalizer;
use crate::error::{ApiError, ApiErrorWithMeta, E_BAD_REQUEST};
use crate::ledger::{CommissionLedger, CommissionStore, amount_from_f64};
use crate::memory::{
    MemoryAffiliateDirectory, MemoryCommissionStore, MemoryMembershipSource, MemoryNotificationLog,
};
use crate::notifications::{ExpiryScheduler, MembershipSource, NotificationLog, Notifier, SweepResult};
use crate::postgres::PgStore;
use crate::process_payment;
use crate::ranking::{AffiliateRankingEntry, Leaderboard};
use crate::referral::{AffiliateDirectory, ReferralResolver};
use crate::responses::{ApiOk, RequestMeta, meta_middleware, paginate};
use crate::status::CommissionAction;
use crate::types::{AffiliateIdentity, Commission, CommissionSource, PaymentEvent};

const MAX_PAGE_SIZE: u32 = 100;

/// The storage backends the service runs on.
#[derive(Clone)]
pub struct Stores {
    pub commissions: Arc<dyn CommissionStore>,
    pub affiliates: Arc<dyn AffiliateDirectory>,
    pub memberships: Arc<dyn MembershipSource>,
    pub notification_log: Arc<dyn NotificationLog>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            commissions: store.clone(),
            affiliates: store.clone(),
            memberships: store.clone(),
            notification_log: store,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            commissions: Arc::new(MemoryCommissionStore::default()),
            affiliates: Arc::new(MemoryAffiliateDirectory::default()),
            memberships: Arc::new(MemoryMembershipSource::default()),
            notification_log: Arc::new(MemoryNotificationLog::default()),
        }
    }
}

/// The application state.
#[derive(Clone)]
pub struct AppState {
    pub ledger: CommissionLedger,
    pub resolver: ReferralResolver,
    pub leaderboard: Leaderboard,
    pub scheduler: ExpiryScheduler,
    /// The default leaderboard page size.
    pub page_size: u32,
}

impl AppState {
    pub fn new(
        config: &Config,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let normalizer = Arc::new(CurrencyNormalizer::new(
            config.rate_table().context("invalid currency rate table")?,
        ));
        let policy = config
            .commission_policy()
            .context("invalid default commission rate")?;

        Ok(Self {
            ledger: CommissionLedger::new(stores.commissions.clone(), normalizer, policy),
            resolver: ReferralResolver::new(stores.affiliates.clone()),
            leaderboard: Leaderboard::new(stores.commissions, stores.affiliates),
            scheduler: ExpiryScheduler::new(
                stores.memberships,
                stores.notification_log,
                notifier,
                config.renewal_url.clone(),
            ),
            page_size: config.leaderboard_page_size,
        })
    }
}

/// The completed-payment event.
#[derive(Deserialize)]
pub struct PaymentCompletedRequest {
    /// The gateway's ID of the payment.
    pub payment_id: String,
    /// The gross amount of the payment.
    pub amount: f64,
    /// The three-letter currency code of the payment.
    pub currency: String,
    /// The referral code from the payment metadata.
    pub referral_code: Option<String>,
    /// What reported the payment. Defaults to `webhook`.
    #[serde(default)]
    pub source: CommissionSource,
}

/// The response after handling a completed payment.
#[derive(Serialize)]
pub struct PaymentCompletedResponse {
    /// The commission for the payment, if it was referred.
    pub commission: Option<Commission>,
    /// Whether no new commission was written.
    pub skipped: bool,
}

/// The request to act on a commission.
#[derive(Deserialize)]
pub struct CommissionActionRequest {
    /// One of `approve`, `reject` or `mark_paid`.
    pub action: String,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/payments/completed", post(payment_completed_handler))
        .route("/referrals/{code}", get(get_referral_handler))
        .route("/commissions/{id}", get(get_commission_handler))
        .route("/commissions/{id}/actions", post(commission_action_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/sweeps/membership-expiry", post(expiry_sweep_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

async fn payment_completed_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<PaymentCompletedRequest>,
) -> Result<ApiOk<PaymentCompletedResponse>, ApiErrorWithMeta> {
    if req.payment_id.trim().is_empty() {
        return Err(ApiError::BadRequest("payment_id must not be empty".into())
            .with_meta(meta)
            .with_code(E_BAD_REQUEST));
    }
    if !is_currency_code(req.currency.trim()) {
        return Err(
            ApiError::BadRequest(format!("currency `{}` is not a 3-letter code", req.currency))
                .with_meta(meta)
                .with_code(E_BAD_REQUEST),
        );
    }
    let amount = amount_from_f64(req.amount).map_err(|e| e.into_api(meta.clone()))?;

    let payment = PaymentEvent {
        payment_id: req.payment_id,
        amount,
        currency: req.currency.trim().to_ascii_uppercase(),
        referral_code: req.referral_code,
        occurred_at: Utc::now(),
    };

    let outcome = process_payment(&st.resolver, &st.ledger, &payment, req.source)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(match outcome {
        None => ApiOk::ok(
            "payment has no referral code",
            PaymentCompletedResponse {
                commission: None,
                skipped: true,
            },
            meta,
        ),
        Some(res) if res.skipped => ApiOk::ok(
            "commission already recorded",
            PaymentCompletedResponse {
                commission: Some(res.commission),
                skipped: true,
            },
            meta,
        ),
        Some(res) => ApiOk::created(
            "commission recorded",
            PaymentCompletedResponse {
                commission: Some(res.commission),
                skipped: false,
            },
            meta,
        ),
    })
}

async fn get_referral_handler(
    State(st): State<AppState>,
    Path(code): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<AffiliateIdentity>, ApiErrorWithMeta> {
    let affiliate = st
        .resolver
        .resolve(&code)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("referral resolved", affiliate, meta))
}

async fn get_commission_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Commission>, ApiErrorWithMeta> {
    let commission = st.ledger.get(id).await.map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("commission fetched", commission, meta))
}

async fn commission_action_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CommissionActionRequest>,
) -> Result<ApiOk<Commission>, ApiErrorWithMeta> {
    let action = req
        .action
        .parse::<CommissionAction>()
        .map_err(|e| e.into_api(meta.clone()))?;

    let commission = st
        .ledger
        .apply_action(id, action, Utc::now())
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        format!("commission {}", commission.status),
        commission,
        meta,
    ))
}

async fn leaderboard_handler(
    State(st): State<AppState>,
    Query(q): Query<LeaderboardQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<AffiliateRankingEntry>>, ApiErrorWithMeta> {
    let entries = st
        .leaderboard
        .compute()
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    let (page, pagination) = paginate(
        entries,
        q.page.unwrap_or(1),
        q.per_page.unwrap_or(st.page_size).min(MAX_PAGE_SIZE),
    );

    Ok(ApiOk::ok("leaderboard computed", page, meta).with_pagination(pagination))
}

async fn expiry_sweep_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiOk<SweepResult> {
    let result = st.scheduler.sweep(Utc::now()).await;
    ApiOk::ok("membership expiry sweep finished", result, meta)
}
