//! API routes

pub mod admin;
pub mod auth;
pub mod gated;
pub mod health;
pub mod subscription;
pub mod users;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use listwise_billing::{Feature, Marketplace, UsageType};

use crate::{
    access::{guarded, Gate},
    auth::{require_admin, require_auth},
    state::AppState,
};

/// Build every route over `state`
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/subscription/plans", get(subscription::list_plans))
        // Signature checked in the handler
        .route("/webhooks/billing", post(webhooks::billing_webhook));

    // Account routes (auth required, any subscription state)
    let account_routes = Router::new()
        .route("/subscription/update-plan", post(subscription::update_plan))
        .route("/subscription/cancel", post(subscription::cancel))
        .route("/subscription/billing-portal", post(subscription::billing_portal))
        .route("/user/profile", get(users::profile))
        .route("/user/usage", get(users::usage));

    // Plan-gated routes; every admitted call also counts as an API call
    let listings = Gate::Quota(UsageType::Listings);
    let api_call = Gate::Quota(UsageType::ApiCalls);
    let mut gated_routes = Router::new()
        .merge(guarded(
            &state,
            Router::new().route("/listings", post(gated::create_listing)),
            &[listings, api_call],
        ))
        .merge(guarded(
            &state,
            Router::new().route("/listings/bulk", post(gated::create_listings_bulk)),
            &[Gate::Feature(Feature::BulkUploadEnabled), listings, api_call],
        ))
        .merge(guarded(
            &state,
            Router::new().route("/analysis", post(gated::request_analysis)),
            &[Gate::Quota(UsageType::AiAnalysis), api_call],
        ))
        .merge(guarded(
            &state,
            Router::new().route("/analytics/advanced", get(gated::advanced_analytics)),
            &[Gate::Feature(Feature::AdvancedAnalyticsEnabled), api_call],
        ));
    for marketplace in Marketplace::ALL {
        let path = format!("/marketplaces/{}/listings", marketplace.as_str());
        gated_routes = gated_routes.merge(guarded(
            &state,
            Router::new().route(&path, post(gated::create_marketplace_listing)),
            &[Gate::Marketplace(marketplace), listings, api_call],
        ));
    }

    // Admin routes (admin claim required, not plan tier)
    let admin_routes = Router::new()
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:user_id", get(admin::get_user))
        .route(
            "/admin/users/:user_id/subscription",
            put(admin::update_user_subscription),
        )
        .route("/admin/users/:user_id/status", put(admin::update_user_status))
        .route("/admin/subscriptions", get(admin::list_subscriptions))
        .route("/admin/subscription-stats", get(admin::subscription_stats))
        .route("/admin/usage-analytics", get(admin::usage_analytics))
        .route("/admin/feature-usage-report", get(admin::feature_usage_report))
        .route("/admin/system-health", get(admin::system_health))
        .route_layer(middleware::from_fn(require_admin));

    // Apply auth middleware to protected routes
    let protected_routes = Router::new()
        .merge(account_routes)
        .merge(gated_routes)
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(health_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}
