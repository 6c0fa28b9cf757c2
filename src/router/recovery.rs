//! Forgotten password recovery.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::{Message, TokenQuery, Valid};

/// Any string is accepted so malformed and unknown emails get the same
/// answer.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ForgotBody {
    #[validate(length(max = 255))]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    pub token: String,
    #[validate(length(max = 255))]
    pub new_password: Option<String>,
    pub confirm_new_password: Option<String>,
}

/// Handler to request a reset link.
pub async fn forgot(
    State(state): State<AppState>,
    Valid(body): Valid<ForgotBody>,
) -> Result<Json<Message>> {
    let outcome = state.accounts.request_password_reset(&body.email).await?;

    Ok(Json(outcome.into()))
}

/// Check a reset link before showing its form.
pub async fn form(
    State(state): State<AppState>,
    query: std::result::Result<Query<TokenQuery>, QueryRejection>,
) -> Result<Json<TokenQuery>> {
    let Query(query) = query?;
    state.accounts.check_reset_token(&query.token).await?;

    Ok(Json(query))
}

/// Handler to replace a password with a reset token.
pub async fn reset(
    State(state): State<AppState>,
    Valid(body): Valid<ResetBody>,
) -> Result<Json<Message>> {
    let outcome = state
        .accounts
        .reset_password(
            &body.token,
            body.new_password.as_deref(),
            body.confirm_new_password.as_deref(),
        )
        .await?;

    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::testing::{body_json, harness, state};
    use crate::{app, make_request};

    const GENERIC: &str =
        "If an account with that email exists, a password reset link has been sent.";

    #[tokio::test]
    async fn test_forgot_password_is_generic() {
        let h = harness();
        h.service.register("Alice", "a@x.com").await.unwrap();
        let app = app(state(&h));

        for email in ["a@x.com", "b@x.com", "not-an-email"] {
            let body = json!({ "email": email }).to_string();
            let response = make_request(
                None,
                app.clone(),
                Method::POST,
                "/forgot-password",
                body,
            )
            .await;

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["message"], GENERIC);
        }
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_password_flow() {
        let h = harness();
        h.service.register("Alice", "a@x.com").await.unwrap();
        h.service.request_password_reset("a@x.com").await.unwrap();
        let token = h.notifier.last_token().unwrap();
        let app = app(state(&h));

        let response = make_request(
            None,
            app.clone(),
            Method::GET,
            &format!("/reset-password?token={token}"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json!({
            "token": token,
            "newPassword": "p1",
            "confirmNewPassword": "p2",
        })
        .to_string();
        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/reset-password",
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "Passwords do not match.");

        let body = json!({
            "token": token,
            "newPassword": "p1",
            "confirmNewPassword": "p1",
        })
        .to_string();
        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/reset-password",
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["message"],
            "Your password has been successfully reset."
        );

        let response = make_request(
            None,
            app,
            Method::GET,
            &format!("/reset-password?token={token}"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "Invalid or expired password reset token."
        );
    }
}
