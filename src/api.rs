//! HTTP endpoints next to the WebSocket: teacher handles, poll history and
//! a plain snapshot of the session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::protocol::SessionSnapshot;
use crate::state::history::PollRecord;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherLoginResponse {
    pub username: String,
}

/// Poll history as served to the teacher's history page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub question: String,
    pub options: Vec<HistoryOption>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOption {
    pub text: String,
    pub vote_count: u32,
}

impl From<PollRecord> for HistoryEntry {
    fn from(record: PollRecord) -> Self {
        Self {
            id: record.id,
            question: record.question,
            options: record
                .options
                .into_iter()
                .map(|o| HistoryOption {
                    text: o.text,
                    vote_count: o.votes,
                })
                .collect(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub data: Vec<HistoryEntry>,
}

/// Issue a fresh teacher handle.
///
/// POST /teacher-login
///
/// The handle is only a name; the teacher role comes from how the
/// WebSocket is opened.
pub async fn teacher_login() -> Json<TeacherLoginResponse> {
    let name = petname::petname(2, "-")
        .unwrap_or_else(|| ulid::Ulid::new().to_string().to_lowercase());
    let username = format!("teacher-{}", name);
    tracing::info!("Issued teacher handle {}", username);
    Json(TeacherLoginResponse { username })
}

/// Closed polls of one teacher, oldest first.
///
/// GET /polls/{owner}
pub async fn list_polls(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Response {
    match state.history_for(&owner).await {
        Ok(records) => Json(HistoryResponse {
            data: records.into_iter().map(HistoryEntry::from).collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to read poll history for {}: {}", owner, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not read history: {}", e),
            )
                .into_response()
        }
    }
}

/// Current session state.
///
/// GET /session
pub async fn session_snapshot(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.snapshot().await)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::types::{OptionInput, Role};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_teacher_login_issues_handle() {
        let app = build_router(Arc::new(AppState::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/teacher-login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let login: TeacherLoginResponse = body_json(response).await;
        assert!(login.username.starts_with("teacher-"));
        assert!(login.username.len() > "teacher-".len());
    }

    #[tokio::test]
    async fn test_history_lists_closed_polls() {
        let state = Arc::new(AppState::new());
        let sub = state.connect(Role::Teacher);
        state
            .join("teacher-ada", Role::Teacher, sub.id())
            .await
            .unwrap();
        state
            .create_poll(
                "teacher-ada",
                sub.id(),
                "Favourite colour?",
                vec![
                    OptionInput {
                        text: "Red".to_string(),
                        is_correct: None,
                    },
                    OptionInput {
                        text: "Blue".to_string(),
                        is_correct: None,
                    },
                ],
                30,
            )
            .await
            .unwrap();
        state.close_poll("teacher-ada", sub.id()).await.unwrap();
        state.flush_history().await;

        let app = build_router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/polls/teacher-ada")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let history: serde_json::Value = body_json(response).await;
        let data = history["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["question"], "Favourite colour?");
        assert_eq!(data[0]["options"][1]["text"], "Blue");
        assert_eq!(data[0]["options"][1]["voteCount"], 0);
        assert!(data[0]["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_history_for_unknown_owner_is_empty() {
        let app = build_router(Arc::new(AppState::new()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/polls/nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let history: HistoryResponse = body_json(response).await;
        assert!(history.data.is_empty());
    }

    #[tokio::test]
    async fn test_session_and_health() {
        let app = build_router(Arc::new(AppState::new()));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let snapshot: SessionSnapshot = body_json(response).await;
        assert!(snapshot.poll.is_none());
        assert!(snapshot.participants.is_empty());

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
