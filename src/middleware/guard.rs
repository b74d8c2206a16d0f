//! Guard chain middleware
//!
//! Adapts an axum request to a [`RequestDescriptor`], runs the guard chain
//! for the route's [`RoutePolicy`], and either forwards the request with a
//! [`GuardContext`] in its extensions or renders the rejection.
//!
//! Handlers declare their policy with [`guarded`], which places an
//! `Extension` layer carrying the policy outside the guard:
//!
//! ```ignore
//! Router::new().route(
//!     "/api/v1/tenants/{tenant_id}",
//!     guarded(get(show), &state, RoutePolicy::tenant_scoped("tenants.show")),
//! )
//! ```

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, Query, Request, State},
    http::{
        header::{ACCEPT, AUTHORIZATION, LOCATION, RETRY_AFTER, USER_AGENT},
        request::Parts,
        Extensions, HeaderMap, HeaderValue, StatusCode,
    },
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
    Extension, Json,
};
use axum_extra::extract::CookieJar;

use crate::models::{token_prefix, TenantId};
use crate::services::guard::{
    GuardContext, GuardOutcome, RateLimitStatus, Rejection, RejectionKind, RequestDescriptor,
    RoutePolicy,
};
use crate::services::identity::Credential;
use crate::services::session::{looks_like_session, SessionManager};
use crate::utils::ErrorResponse;
use crate::AppState;

/// Header carrying a magic-link token
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Run the guard chain under `policy` in front of every handler in `handlers`
pub fn guarded(
    handlers: MethodRouter<AppState>,
    state: &AppState,
    policy: RoutePolicy,
) -> MethodRouter<AppState> {
    handlers
        .route_layer(from_fn_with_state(state.clone(), guard_middleware))
        .route_layer(Extension(policy))
}

pub async fn guard_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let policy = parts
        .extensions
        .get::<RoutePolicy>()
        .cloned()
        .unwrap_or_else(|| RoutePolicy::new("unclassified"));

    let path_params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &state)
        .await
        .map(|Path(params)| params)
        .unwrap_or_default();
    let query_params = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();

    let descriptor = describe(&parts, &policy, &path_params, &query_params, &state.sessions);
    let wants_html = prefers_html(&parts.headers);

    match state.guard.evaluate(&descriptor, &policy).await {
        GuardOutcome::Proceed(context) => {
            let rate_limit = context.rate_limit;
            parts.extensions.insert(*context);

            let mut response = next.run(Request::from_parts(parts, body)).await;
            insert_rate_limit_headers(response.headers_mut(), Some(rate_limit));
            response
        }
        GuardOutcome::Rejected(rejection) => {
            rejection_response(&state, &rejection, &descriptor.path, wants_html)
        }
    }
}

/// Report the caller's anonymous API allowance on routes outside the chain.
///
/// Nothing is counted here; the headers show the same bucket a guarded
/// request from this address would draw from.
pub async fn public_rate_limit_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let status = state
        .guard
        .anonymous_allowance(remote_addr(request.extensions()))
        .await;

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), Some(status));
    response
}

/// Build the request descriptor from the parts the guard cares about
fn describe(
    parts: &Parts,
    policy: &RoutePolicy,
    path_params: &HashMap<String, String>,
    query_params: &HashMap<String, String>,
    sessions: &SessionManager,
) -> RequestDescriptor {
    let remote_addr = remote_addr(&parts.extensions);

    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    RequestDescriptor::new(
        parts.method.as_str(),
        redacted_path(parts.uri.path(), path_params),
        policy.name,
        remote_addr,
    )
        .with_user_agent(user_agent)
        .with_credential(extract_credential(&parts.headers, path_params, query_params, sessions))
        .with_target_tenant(target_tenant(path_params, query_params))
}

/// Request path with a magic-link token segment cut down to its prefix, so
/// raw tokens never reach logs or the audit trail
fn redacted_path(path: &str, path_params: &HashMap<String, String>) -> String {
    match path_params.get("token").filter(|t| !t.is_empty()) {
        Some(token) => path.replace(token.as_str(), &format!("{}***", token_prefix(token))),
        None => path.to_string(),
    }
}

/// Find the request's credential.
///
/// A session (cookie, or a JWT bearer value) takes precedence over a
/// magic-link token. Tokens are read from the `token` path parameter, the
/// `token` query parameter, the `X-Access-Token` header, or a non-JWT
/// bearer value, in that order.
pub fn extract_credential(
    headers: &HeaderMap,
    path_params: &HashMap<String, String>,
    query_params: &HashMap<String, String>,
    sessions: &SessionManager,
) -> Credential {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(sessions.cookie_name()) {
        return sessions.credential(cookie.value());
    }

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token);

    if let Some(value) = bearer.filter(|v| looks_like_session(v)) {
        return sessions.credential(value);
    }

    path_params
        .get("token")
        .or_else(|| query_params.get("token"))
        .map(String::as_str)
        .or_else(|| headers.get(ACCESS_TOKEN_HEADER).and_then(|v| v.to_str().ok()))
        .or(bearer)
        .map(|token| Credential::Token(token.trim().to_string()))
        .unwrap_or(Credential::None)
}

fn target_tenant(
    path_params: &HashMap<String, String>,
    query_params: &HashMap<String, String>,
) -> Option<TenantId> {
    path_params
        .get("tenant_id")
        .or_else(|| query_params.get("tenant_id"))
        .and_then(|v| v.parse().ok())
}

/// Peer address recorded by the server, unspecified when unknown
pub fn remote_addr(extensions: &Extensions) -> IpAddr {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Extractor for the peer address of unguarded routes
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub IpAddr);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddr(remote_addr(&parts.extensions)))
    }
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

fn prefers_html(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, status: Option<RateLimitStatus>) {
    if let Some(status) = status {
        headers.insert("x-ratelimit-limit", HeaderValue::from(status.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(status.remaining));
    }
}

/// Render a rejection.
///
/// Browser requests are redirected to the login or access-denied page with a
/// flash message for 401 and 403; everything else gets the JSON error body.
fn rejection_response(
    state: &AppState,
    rejection: &Rejection,
    path: &str,
    wants_html: bool,
) -> Response {
    let redirect_to = match rejection.kind {
        RejectionKind::Unauthenticated if wants_html => Some(format!(
            "{}?flash={}&next={}",
            state.config.server.login_path,
            urlencoding::encode(&rejection.message),
            urlencoding::encode(path)
        )),
        RejectionKind::Forbidden if wants_html => Some(format!(
            "{}?flash={}",
            state.config.server.access_denied_path,
            urlencoding::encode(&rejection.message)
        )),
        _ => None,
    };

    let mut response = match redirect_to {
        Some(location) => match HeaderValue::from_str(&location) {
            Ok(location) => (StatusCode::SEE_OTHER, [(LOCATION, location)]).into_response(),
            Err(_) => json_rejection(rejection),
        },
        None => json_rejection(rejection),
    };

    let headers = response.headers_mut();
    insert_rate_limit_headers(headers, rejection.rate_limit);
    if let Some(retry_after) = rejection.retry_after_secs {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
    if let Some(resets_at) = rejection.resets_at {
        headers.insert("x-ratelimit-reset", HeaderValue::from(resets_at.timestamp()));
    }
    response
}

fn json_rejection(rejection: &Rejection) -> Response {
    let mut body = ErrorResponse::new(rejection.category(), rejection.message.clone())
        .with_code(rejection.reason);
    if let Some(retry_after) = rejection.retry_after_secs {
        body = body.with_retry_after(retry_after);
    }
    (rejection.status(), Json(body)).into_response()
}

/// Extractor for the guard context of a request that passed the chain
impl<S> FromRequestParts<S> for GuardContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<GuardContext>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(
                    ErrorResponse::new("unauthenticated", "Authentication required")
                        .with_code("no_credentials"),
                ),
            )
        })
    }
}
