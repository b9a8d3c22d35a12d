//! Control-plane request handlers
//!
//! Every branch of the login state machine terminates the request with
//! its own response; there is no retry within a single request. Branch
//! outcomes (bad input, unknown env, unauthorized) are values mapped to
//! 4xx responses, while collaborator faults escape as [`ApiError`].

use super::models::{ErrorBody, LoginParams, TunnelProfileEntry};
use super::{ApiError, ControlState};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use passage_session::Session;
use tracing::{debug, info};

/// Liveness probe. Constant body, no lookups, not traced.
pub(super) async fn healthz() -> &'static str {
    "OK"
}

pub(super) async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorBody::new("Not Found"))).into_response()
}

/// `GET /profiles/{profile_id}/tunnels`: authenticated tunnel discovery.
pub(super) async fn profile_tunnels(
    State(state): State<ControlState>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if profile_id.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("profileId must be non-empty")),
        )
            .into_response());
    }

    let tunnels = state.registry.get_by_thumbprint(&profile_id).await;
    // Absence is not an error, and no authenticator is built for it
    if tunnels.is_empty() {
        return Ok(Json(Vec::<TunnelProfileEntry>::new()).into_response());
    }

    // Tunnels sharing a thumbprint share a key, so any representative works
    let authenticator = state.auth_factory.build(&tunnels[0])?;
    let verdict = authenticator.authenticate(&headers).await?;
    if !verdict.authenticated {
        return Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    }

    let entries: Vec<TunnelProfileEntry> = tunnels.into_iter().map(Into::into).collect();
    Ok(Json(entries).into_response())
}

/// `GET /login?env=&returnPath=`: the login handshake.
pub(super) async fn login(
    State(state): State<ControlState>,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Path-relative only; anything else would make this an open redirect
    if !params.return_path.starts_with('/') {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("returnPath must be a relative path")),
        )
            .into_response());
    }

    let Some(tunnel) = state.registry.get_by_env_id(&params.env).await else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("unknown envId")),
        )
            .into_response());
    };

    let mut session = state
        .sessions
        .open(&headers, &tunnel.public_key_thumbprint)
        .await?;

    if session.user().is_some() {
        debug!("Session already authenticated for env {}", params.env);
    } else {
        let authenticator = state.auth_factory.build(&tunnel)?;
        let verdict = authenticator.authenticate(&headers).await?;

        if !verdict.authenticated {
            return match &state.idp_url {
                Some(idp) => idp_handoff(&state, idp, &params),
                None => Ok((
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorBody::new("Unauthorized")),
                )
                    .into_response()),
            };
        }

        if let Some(claims) = verdict.claims {
            session.set(claims);
        }
        // Durable before the redirect is issued
        session.save().await?;
        info!("Authenticated login for env {}", params.env);
    }

    let target = format!(
        "{}://{}.{}{}",
        state.external_scheme, params.env, state.base_host, params.return_path
    );
    let mut resp = found(&target)?;
    apply_session_cookie(&mut resp, session.as_ref())?;
    Ok(resp)
}

/// Hand the browser to the secondary identity provider, carrying the
/// gateway's own `auth.<base>` login URL as the return target.
fn idp_handoff(state: &ControlState, idp: &str, params: &LoginParams) -> Result<Response, ApiError> {
    let gateway_login = format!(
        "{}://auth.{}/login?env={}&returnPath={}",
        state.external_scheme,
        state.base_host,
        urlencoding::encode(&params.env),
        urlencoding::encode(&params.return_path)
    );
    let target = format!(
        "{}/login?redirect={}",
        idp.trim_end_matches('/'),
        urlencoding::encode(&gateway_login)
    );
    debug!("Redirecting unauthenticated login for env {} to identity provider", params.env);

    let mut resp = found(&target)?;
    // The handoff response may be read by a cross-origin script
    resp.headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, header_value(idp)?);
    Ok(resp)
}

fn found(location: &str) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(format!("failed to build redirect: {}", e)))
}

fn apply_session_cookie(resp: &mut Response, session: &dyn Session) -> Result<(), ApiError> {
    if let Some(cookie) = session.issue_cookie() {
        resp.headers_mut()
            .append(header::SET_COOKIE, header_value(&cookie)?);
    }
    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Internal(format!("invalid header value: {}", e)))
}
