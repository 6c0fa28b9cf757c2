//! Login session: sign in, sign out and the protected dashboard.

use axum::extract::{Query, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{Redirect, Response};
use axum::{Extension, Json};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::{AuthError, Principal};
use crate::error::{Result, ServerError};

pub const SESSION_COOKIE: &str = "session";
const BEARER: &str = "Bearer ";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    check_mail: Option<String>,
    logout: Option<String>,
    error: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Body {
    pub email: String,
    pub password: String,
}

/// Message to display above the login form.
pub async fn page(Query(query): Query<PageQuery>) -> Json<Page> {
    let message = if query.error.is_some() {
        Some("Invalid email or password.")
    } else if query.logout.is_some() {
        Some("You have been logged out.")
    } else if query.check_mail.is_some() {
        Some("Check your email to set your password.")
    } else {
        None
    };

    Json(Page {
        message: message.map(str::to_owned),
    })
}

/// Handler to open a session.
///
/// Every credential failure redirects to the same page.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<Body>,
) -> Result<(CookieJar, Redirect)> {
    let principal = match state.verifier.verify(&body.email, &body.password).await
    {
        Ok(principal) => principal,
        Err(AuthError::BadCredentials) => {
            return Ok((jar, Redirect::to("/login?error")));
        },
        Err(err) => return Err(err.into()),
    };

    let token = state.sessions.issue(&principal)?;
    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);

    tracing::info!(user_id = %principal.id, "session opened");

    Ok((jar.add(cookie), Redirect::to("/dashboard")))
}

/// Handler to close a session.
pub async fn logout(jar: CookieJar) -> (CookieJar, Redirect) {
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/login?logout"),
    )
}

/// Middleware resolving the session cookie, or a bearer token, into a
/// [`Principal`].
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = match jar.get(SESSION_COOKIE) {
        Some(cookie) => cookie.value().to_owned(),
        None => req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix(BEARER))
            .map(str::to_owned)
            .ok_or(ServerError::Unauthorized)?,
    };

    let principal = state
        .sessions
        .resolve(&token)
        .map_err(|_| ServerError::Unauthorized)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Identity of the logged-in user.
pub async fn dashboard(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::testing::{body_json, harness, state};
    use crate::{app, make_request};

    use super::*;

    async fn activated() -> crate::testing::Harness {
        let h = harness();
        h.service.register("Alice", "a@x.com").await.unwrap();
        let token = h.notifier.last_token().unwrap();
        h.service.set_password(&token, "secret123").await.unwrap();
        h
    }

    fn session_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| {
                let cookie = Cookie::parse(value.to_owned()).ok()?;
                (cookie.name() == SESSION_COOKIE)
                    .then(|| cookie.value().to_owned())
            })
    }

    #[tokio::test]
    async fn test_login_page_messages() {
        let app = app(state(&harness()));

        for (path, message) in [
            ("/login?checkMail", json!("Check your email to set your password.")),
            ("/login?logout", json!("You have been logged out.")),
            ("/login?error", json!("Invalid email or password.")),
            ("/login", json!(null)),
        ] {
            let response = make_request(
                None,
                app.clone(),
                Method::GET,
                path,
                String::default(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await["message"], message);
        }
    }

    #[tokio::test]
    async fn test_login_success() {
        let h = activated().await;
        let app = app(state(&h));

        let body = json!({ "email": "a@x.com", "password": "secret123" }).to_string();
        let response =
            make_request(None, app.clone(), Method::POST, "/login", body).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/dashboard");
        let session = session_cookie(&response).unwrap();

        let response = make_request(
            Some(&session),
            app,
            Method::GET,
            "/dashboard",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["name"], "Alice");
    }

    #[tokio::test]
    async fn test_login_failure_redirects() {
        let h = activated().await;
        h.service.register("Bob", "b@x.com").await.unwrap();
        let app = app(state(&h));

        for (email, password) in [
            ("a@x.com", "wrong"),
            ("nobody@x.com", "secret123"),
            ("b@x.com", ""),
        ] {
            let body = json!({ "email": email, "password": password }).to_string();
            let response =
                make_request(None, app.clone(), Method::POST, "/login", body)
                    .await;

            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], "/login?error");
            assert!(session_cookie(&response).is_none());
        }
    }

    #[tokio::test]
    async fn test_dashboard_requires_session() {
        let app = app(state(&harness()));

        let response = make_request(
            None,
            app.clone(),
            Method::GET,
            "/dashboard",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            Some("not-a-jwt"),
            app,
            Method::GET,
            "/dashboard",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookie() {
        let app = app(state(&harness()));

        let response = make_request(
            Some("anything"),
            app,
            Method::POST,
            "/logout",
            String::default(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login?logout");
        assert_eq!(session_cookie(&response).as_deref(), Some(""));
    }
}
