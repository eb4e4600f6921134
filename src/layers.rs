//! HTTP hardening layers
//!
//! [`SecureRouter::with_security`] wraps the API router with the layers
//! every route shares.

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::audit::audit_middleware;
use crate::config::HttpConfig;

/// Extension trait applying the shared layer stack to a router.
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .with_security(&HttpConfig::default());
/// ```
pub trait SecureRouter {
    /// Apply every layer enabled in `config`, outermost first:
    /// 1. TraceLayer
    /// 2. Audit middleware
    /// 3. CORS
    /// 4. Security headers
    /// 5. Per-IP rate limiting
    /// 6. Request body limit
    /// 7. Timeout
    fn with_security(self, config: &HttpConfig) -> Self;
}

impl<S> SecureRouter for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_security(self, config: &HttpConfig) -> Self {
        let mut router = self;

        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ));

        router = router.layer(RequestBodyLimitLayer::new(config.max_request_size));

        if config.rate_limit_enabled {
            let governor = GovernorConfigBuilder::default()
                .per_second(config.rate_limit_per_second)
                .burst_size(config.rate_limit_burst)
                .finish();
            match governor {
                Some(governor) => router = router.layer(GovernorLayer::new(governor)),
                None => warn!(
                    per_second = config.rate_limit_per_second,
                    burst = config.rate_limit_burst,
                    "Rate limiter disabled: per-second rate and burst must be non-zero"
                ),
            }
        }

        if config.security_headers_enabled {
            router = router
                .layer(SetResponseHeaderLayer::overriding(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
                ))
                // Tokens and profiles must never sit in a shared cache
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_XSS_PROTECTION,
                    HeaderValue::from_static("0"),
                ));
        }

        router = router.layer(cors_layer(config));

        router = router.layer(middleware::from_fn(audit_middleware));

        if config.tracing_enabled {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }
}

fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    if config.cors_is_restrictive() {
        base
    } else if config.cors_is_permissive() {
        base.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();
        base.allow_origin(origins).allow_credentials(true)
    }
}
