/// Application state and router construction.
///
/// [`AppState`] is built once at startup and cloned into every handler.
/// Wiring follows the degradation-first rule: when Redis is unreachable at
/// startup (or goes away later) the service still runs: limiters fall
/// back to memory, caches and the idempotency layer bypass, the lockout
/// and invite lock no-op with degradation events.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use taskhive_shared::auth::blacklist::JwtBlacklist;
use taskhive_shared::auth::lockout::Lockout;
use taskhive_shared::cache::{StatsCache, TaskListCache};
use taskhive_shared::email::{BreakerConfig, BreakerSender, HttpSender, InviteSender};
use taskhive_shared::idempotency::IdempotencyStore;
use taskhive_shared::kv::Kv;
use taskhive_shared::lock::DistLock;
use taskhive_shared::metrics::Metrics;
use taskhive_shared::ratelimit::{Limiter, MemoryLimiter, RedisLimiter};
use taskhive_shared::Error;

use crate::config::Config;
use crate::error::ApiError;
use crate::middleware::{idempotency_layer, require_auth, user_rate_limit};
use crate::routes;
use crate::services::{AuthService, StatsService, TaskService, TeamService};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,

    pub auth: Arc<AuthService>,
    pub teams: Arc<TeamService>,
    pub tasks: Arc<TaskService>,
    pub stats: Arc<StatsService>,

    pub login_limiter: Arc<dyn Limiter>,
    pub refresh_limiter: Arc<dyn Limiter>,
    pub user_limiter: Arc<dyn Limiter>,
    pub ratelimit_window: Duration,

    pub lockout: Arc<Lockout>,
    pub task_cache: Arc<TaskListCache>,

    pub idempotency_enabled: bool,
    pub idem_store: Arc<IdempotencyStore>,
    pub idem_locker: Arc<DistLock>,
    pub idem_lock_ttl: Duration,
    pub idem_response_ttl: Duration,
}

impl AppState {
    /// Wires every component from config.
    ///
    /// `kv` is `None` when Redis was unreachable at startup; everything
    /// KV-backed then runs in its degraded mode. `mailer` overrides the
    /// breaker-wrapped HTTP sender (tests inject failing fakes here).
    /// `shutdown` stops the in-memory limiter cleanup tasks.
    pub fn build(
        config: Config,
        db: PgPool,
        kv: Option<Arc<dyn Kv>>,
        mailer: Option<Arc<dyn InviteSender>>,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let metrics = Arc::new(Metrics::new());
        let window = config.ratelimit.window();

        let login_fallback = MemoryLimiter::new(config.auth.login_per_min, window);
        let refresh_fallback = MemoryLimiter::new(config.auth.refresh_per_min, window);
        let user_fallback = MemoryLimiter::new(config.ratelimit.user_per_min, window);
        for limiter in [&login_fallback, &refresh_fallback, &user_fallback] {
            MemoryLimiter::spawn_cleanup(limiter, shutdown.clone());
        }

        let (login_limiter, refresh_limiter, user_limiter): (
            Arc<dyn Limiter>,
            Arc<dyn Limiter>,
            Arc<dyn Limiter>,
        ) = if !config.ratelimit.enabled {
            let off = MemoryLimiter::new(0, window);
            (
                off.clone() as Arc<dyn Limiter>,
                off.clone() as Arc<dyn Limiter>,
                off as Arc<dyn Limiter>,
            )
        } else if let Some(kv) = kv.as_ref() {
            (
                Arc::new(RedisLimiter::new(
                    Arc::clone(kv),
                    config.auth.login_per_min,
                    window,
                    login_fallback,
                    Arc::clone(&metrics),
                )),
                Arc::new(RedisLimiter::new(
                    Arc::clone(kv),
                    config.auth.refresh_per_min,
                    window,
                    refresh_fallback,
                    Arc::clone(&metrics),
                )),
                Arc::new(RedisLimiter::new(
                    Arc::clone(kv),
                    config.ratelimit.user_per_min,
                    window,
                    user_fallback,
                    Arc::clone(&metrics),
                )),
            )
        } else {
            (
                login_fallback as Arc<dyn Limiter>,
                refresh_fallback as Arc<dyn Limiter>,
                user_fallback as Arc<dyn Limiter>,
            )
        };

        let lockout = Arc::new(Lockout::new(
            kv.clone(),
            config.auth.lockout.max_attempts,
            Duration::from_secs(config.auth.lockout.lock_ttl),
            config.auth.lockout.key_max_len,
            Arc::clone(&metrics),
        ));

        let blacklist = JwtBlacklist::new(kv.clone());
        let auth = Arc::new(AuthService::new(
            db.clone(),
            &config.jwt,
            &config.auth,
            blacklist,
            Arc::clone(&metrics),
        )?);

        let mailer: Arc<dyn InviteSender> = match mailer {
            Some(mailer) => mailer,
            None => Arc::new(BreakerSender::new(
                HttpSender::new(
                    &config.email.base_url,
                    Duration::from_secs(config.email.timeout),
                ),
                BreakerConfig {
                    max_requests: config.circuit_breaker.max_requests,
                    interval: Duration::from_secs(config.circuit_breaker.interval),
                    timeout: Duration::from_secs(config.circuit_breaker.timeout),
                    failure_threshold: config.circuit_breaker.failure_threshold,
                },
                Arc::clone(&metrics),
            )),
        };

        let invite_locker = Arc::new(DistLock::new(kv.clone(), Arc::clone(&metrics)));
        let teams = Arc::new(TeamService::new(
            db.clone(),
            Some(mailer),
            invite_locker,
            Duration::from_secs(15),
            Arc::clone(&metrics),
        ));

        let tasks = Arc::new(TaskService::new(db.clone()));

        let stats_cache = StatsCache::new(
            kv.clone(),
            Duration::from_secs(config.cache.task_ttl),
            config.cache.enabled,
            Arc::clone(&metrics),
        );
        let stats = Arc::new(StatsService::new(
            db.clone(),
            stats_cache,
            &config.admin.user_ids,
        ));

        let task_cache = Arc::new(TaskListCache::new(
            kv.clone(),
            Duration::from_secs(config.cache.task_ttl),
            config.cache.enabled,
            Arc::clone(&metrics),
        ));

        let idem_store = Arc::new(IdempotencyStore::new(kv.clone()));
        let idem_locker = Arc::new(DistLock::new(kv, Arc::clone(&metrics)));

        Ok(Self {
            db,
            metrics,
            auth,
            teams,
            tasks,
            stats,
            login_limiter,
            refresh_limiter,
            user_limiter,
            ratelimit_window: window,
            lockout,
            task_cache,
            idempotency_enabled: config.idempotency.enabled,
            idem_store,
            idem_locker,
            idem_lock_ttl: Duration::from_secs(config.idempotency.lock_ttl),
            idem_response_ttl: Duration::from_secs(config.idempotency.response_ttl),
            config: Arc::new(config),
        })
    }
}

/// Builds the router.
///
/// ```text
/// /health                          public
/// /api/v1/{register,login,refresh} public (per-IP / per-user limits inside)
/// /api/v1/...                      auth → user rate limit → idempotency
/// ```
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    let protected = Router::new()
        .route(
            "/teams",
            post(routes::teams::create).get(routes::teams::list),
        )
        .route("/teams/:id/invite", post(routes::teams::invite))
        .route(
            "/tasks",
            post(routes::tasks::create).get(routes::tasks::list),
        )
        .route(
            "/tasks/:id",
            get(routes::tasks::get_one)
                .put(routes::tasks::update)
                .delete(routes::tasks::remove),
        )
        .route("/tasks/:id/history", get(routes::tasks::history))
        .route(
            "/tasks/:id/comments",
            post(routes::comments::create).get(routes::comments::list),
        )
        .route(
            "/comments/:id",
            patch(routes::comments::update).delete(routes::comments::remove),
        )
        .route("/stats/teams/done", get(routes::stats::team_done))
        .route("/stats/teams/top-creators", get(routes::stats::top_creators))
        .route("/admin/integrity/tasks", get(routes::stats::integrity))
        // Innermost to outermost: idempotency runs inside the rate limit,
        // which runs inside authentication.
        .layer(from_fn_with_state(state.clone(), idempotency_layer))
        .layer(from_fn_with_state(state.clone(), user_rate_limit))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api/v1", public.merge(protected))
        .layer(from_fn_with_state(state.clone(), request_deadline))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Per-request deadline. Dropping the handler future aborts whatever
/// store/KV call is in flight; a partial write can only exist inside a
/// transaction, which the drop rolls back. The client sees an internal
/// error rather than a hung request.
async fn request_deadline(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let deadline = state.config.http.request_timeout();
    let uri = req.uri().clone();
    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(%uri, "request deadline exceeded");
            ApiError::Internal.into_response()
        }
    }
}
