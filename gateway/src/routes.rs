use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use base64::engine::general_purpose;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tollgate_node::bootstrap::BootstrapPhase;
use tollgate_node::bootstrap::NodeStatus;
use tollgate_node::packet::Packet;
use tollgate_node::packet::PacketOutcome;
use tollgate_node::packet::RejectCode;
use tollgate_node::PacketHandler;

pub struct AppState {
    pub handler: Arc<PacketHandler>,
    pub status: Arc<NodeStatus>,
    pub node_id: String,
    pub pubkey: String,
    pub ilp_address: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/handle-packet", post(handle_packet))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlePacketBody {
    amount: String,
    destination: String,
    /// Base64-encoded compact wire event.
    data: String,
    #[serde(default)]
    source_account: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptMetadata {
    event_id: String,
    stored_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptBody {
    accept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fulfillment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<AcceptMetadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectMetadata {
    required: String,
    received: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectBody {
    accept: bool,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<RejectMetadata>,
}

pub async fn handle_packet(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HandlePacketBody>,
) -> impl IntoResponse {
    let data = match general_purpose::STANDARD.decode(&body.data) {
        Ok(data) => data,
        Err(e) => {
            return reject_response(
                RejectCode::BadRequest,
                format!("packet data is not valid base64: {e}"),
                None,
            );
        }
    };

    let outcome = state
        .handler
        .handle(Packet {
            amount: body.amount,
            destination: body.destination,
            data,
            source_account: body.source_account,
        })
        .await;

    match outcome {
        PacketOutcome::Accept {
            fulfillment,
            data,
            event_id,
        } => {
            let body = AcceptBody {
                accept: true,
                fulfillment: fulfillment.map(|f| general_purpose::STANDARD.encode(f)),
                data: data.map(|d| general_purpose::STANDARD.encode(d)),
                metadata: event_id.map(|event_id| AcceptMetadata {
                    event_id,
                    stored_at: OffsetDateTime::now_utc().unix_timestamp(),
                }),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        PacketOutcome::Reject(reject) => {
            let metadata = match (reject.required, reject.received) {
                (Some(required), Some(received)) => Some(RejectMetadata { required, received }),
                _ => None,
            };
            reject_response(reject.code, reject.message, metadata)
        }
    }
}

fn reject_response(
    code: RejectCode,
    message: String,
    metadata: Option<RejectMetadata>,
) -> axum::response::Response {
    let status = match code {
        RejectCode::BadRequest | RejectCode::InsufficientAmount => StatusCode::BAD_REQUEST,
        RejectCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = RejectBody {
        accept: false,
        code: code.as_str().to_string(),
        message,
        metadata,
    };

    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    node_id: String,
    pubkey: String,
    ilp_address: String,
    timestamp: i64,
    bootstrap_phase: BootstrapPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_count: Option<u64>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let phase = state.status.phase();
    let ready = phase == BootstrapPhase::Ready;

    Json(HealthBody {
        status: "healthy",
        node_id: state.node_id.clone(),
        pubkey: state.pubkey.clone(),
        ilp_address: state.ilp_address.clone(),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        bootstrap_phase: phase,
        peer_count: ready.then(|| state.status.peer_count()),
        channel_count: ready.then(|| state.status.channel_count()),
    })
}
