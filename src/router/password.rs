//! Account activation: choose a first password.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::{Message, TokenQuery, Valid};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    pub token: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Password must contain between 1 and 255 characters."
    ))]
    pub password: String,
}

/// Echo the token of an activation link.
pub async fn form(
    query: std::result::Result<Query<TokenQuery>, QueryRejection>,
) -> Result<Json<TokenQuery>> {
    let Query(query) = query?;
    Ok(Json(query))
}

/// Handler to set the password of a pending account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Message>> {
    let outcome = state
        .accounts
        .set_password(&body.token, &body.password)
        .await?;

    Ok(Json(outcome.into()))
}
