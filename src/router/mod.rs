//! HTTP routes.
pub mod login;
pub mod password;
pub mod recovery;
pub mod register;
pub mod status;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ServerError;
use crate::user::Outcome;

/// JSON body checked with [`validator`] before reaching the handler.
#[derive(Debug, Clone)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Plain message returned on success.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl From<Outcome> for Message {
    fn from(outcome: Outcome) -> Self {
        Self {
            message: outcome.to_string(),
        }
    }
}

/// `?token=` query, echoed back so a front-end can render its form.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}
