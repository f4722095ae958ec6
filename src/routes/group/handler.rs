use axum::{
    Extension,
    extract::{
        Json, Query, State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::AppState;
use crate::database::GroupStore;
use crate::error::AppError;
use crate::realtime::{GroupSource, Subscription};
use crate::utils::{Claims, success_to_api_response};

use super::model::{
    GroupDetail, GroupIdRequest, IdQuery, KeepAliveResponse, LeaveResponse, MatchRequest,
    MatchResponse,
};

#[axum::debug_handler]
pub async fn match_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let location = req.normalize()?;
    let outcome = state
        .matchmaker
        .find_or_create(&claims.sub, &location)
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        success_to_api_response(MatchResponse::new(outcome, location)),
    ))
}

#[axum::debug_handler]
pub async fn leave_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.ledger.leave(&req.group_id, &claims.sub).await?;
    Ok(success_to_api_response(LeaveResponse {
        group: receipt.group.into(),
        cancelled: receipt.cancelled,
    }))
}

#[axum::debug_handler]
pub async fn keep_alive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let last_active_time = state.ledger.heartbeat(&req.group_id, &claims.sub).await?;
    Ok(success_to_api_response(KeepAliveResponse { last_active_time }))
}

#[axum::debug_handler]
pub async fn find_by_id(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .groups
        .fetch_group(&query.group_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("group {}", query.group_id)))?;
    Ok(success_to_api_response(GroupDetail::from(snapshot)))
}

/// 推送群组变更事件，只有群组成员可以订阅
pub async fn group_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<IdQuery>,
) -> Result<Response, AppError> {
    let is_member = state
        .ledger
        .store()
        .list_members(&query.group_id)
        .await?
        .iter()
        .any(|m| m.user_id == claims.sub);
    if !is_member {
        return Err(AppError::Unauthorized(format!(
            "not a member of group {}",
            query.group_id
        )));
    }

    let subscription = state.bus.subscribe(&query.group_id);
    Ok(ws.on_upgrade(move |socket| stream_events(socket, subscription, claims.sub)))
}

#[instrument(skip(socket, subscription), fields(group_id = %subscription.group_id()))]
async fn stream_events(socket: WebSocket, mut subscription: Subscription, user_id: String) {
    info!(user_id = %user_id, "Event stream opened");
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&*event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize change event: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(Utf8Bytes::from(json))).await.is_err() {
                    debug!("Client went away");
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    }

    subscription.cancel();
    info!(user_id = %user_id, "Event stream closed");
}
