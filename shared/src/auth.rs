use std::collections::HashMap;

use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Deserialize;
use sha2::Sha256;

use visuagen_atoms::users::service::{create_user_record, load_user};

pub const ACCESS_TOKEN_COOKIE: &str = "vg_access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "vg_refresh_token";
pub const USERNAME_COOKIE: &str = "vg_username";

/// Refresh tokens (and the username cookie that travels with them)
/// outlive the access token by design: 30 days.
const REFRESH_COOKIE_MAX_AGE: i64 = 30 * 24 * 60 * 60;

const DEFAULT_APP_ORIGIN: &str = "https://visuagen.app";
const DEV_ORIGIN: &str = "http://localhost:3000";

/// Identity of the caller plus any cookies minted during an automatic
/// session refresh, to be appended to the outgoing response.
pub struct AuthContext {
    pub user_id: String,
    pub set_cookies: Vec<String>,
}

#[derive(Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct SignupPayload {
    email: String,
    password: String,
    name: String,
}

#[derive(Debug)]
struct TokenSet {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

pub fn get_cors_origin(request_origin: Option<&str>) -> String {
    let app_origin = std::env::var("APP_URL").unwrap_or_else(|_| DEFAULT_APP_ORIGIN.to_string());
    cors_origin_from(request_origin, &app_origin)
}

fn cors_origin_from(request_origin: Option<&str>, app_origin: &str) -> String {
    match request_origin {
        Some(origin) if origin == app_origin || origin == DEV_ORIGIN => origin.to_string(),
        _ => app_origin.to_string(),
    }
}

pub fn build_cookie(name: &str, value: &str, max_age: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=None; Max-Age={}",
        name, value, max_age
    )
}

pub fn clear_cookie(name: &str) -> String {
    build_cookie(name, "", 0)
}

fn parse_cookies(header: Option<&str>) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    if let Some(header) = header {
        for pair in header.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.to_string(), value.to_string());
            }
        }
    }
    cookies
}

/// Cognito SECRET_HASH: base64(HMAC-SHA256(secret, username + client_id)).
fn secret_hash(username: &str, client_id: &str, client_secret: &str) -> Result<String, String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(client_secret.as_bytes())
        .map_err(|e| format!("invalid client secret: {}", e))?;
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn session_cookies(tokens: &TokenSet, username: &str) -> Vec<String> {
    let mut cookies = vec![build_cookie(
        ACCESS_TOKEN_COOKIE,
        &tokens.access_token,
        tokens.expires_in,
    )];
    if let Some(refresh) = &tokens.refresh_token {
        cookies.push(build_cookie(REFRESH_TOKEN_COOKIE, refresh, REFRESH_COOKIE_MAX_AGE));
    }
    cookies.push(build_cookie(USERNAME_COOKIE, username, REFRESH_COOKIE_MAX_AGE));
    cookies
}

fn unauthorized() -> Response<Body> {
    let mut resp = Response::new(Body::from(
        serde_json::json!({"error": "Unauthorized"}).to_string(),
    ));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        lambda_http::http::header::CONTENT_TYPE,
        lambda_http::http::header::HeaderValue::from_static("application/json"),
    );
    resp
}

/// Resolve the Cognito subject behind an access token. Also returns the
/// Cognito username, which the refresh flow needs for its SECRET_HASH.
async fn validate_access_token(
    cognito: &CognitoClient,
    access_token: &str,
) -> Result<(String, String), String> {
    let result = cognito
        .get_user()
        .access_token(access_token)
        .send()
        .await
        .map_err(|e| format!("get_user error: {}", e))?;

    let username = result.username().to_string();
    let sub = result
        .user_attributes()
        .iter()
        .find(|attr| attr.name() == "sub")
        .and_then(|attr| attr.value())
        .unwrap_or(&username)
        .to_string();

    Ok((sub, username))
}

async fn password_auth(
    cognito: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    email: &str,
    password: &str,
) -> Result<TokenSet, String> {
    let hash = secret_hash(email, client_id, client_secret)?;

    let result = cognito
        .initiate_auth()
        .auth_flow(AuthFlowType::UserPasswordAuth)
        .client_id(client_id)
        .auth_parameters("USERNAME", email)
        .auth_parameters("PASSWORD", password)
        .auth_parameters("SECRET_HASH", hash)
        .send()
        .await
        .map_err(|e| format!("initiate_auth error: {}", e))?;

    let auth = result
        .authentication_result()
        .ok_or_else(|| "no authentication result".to_string())?;

    Ok(TokenSet {
        access_token: auth
            .access_token()
            .ok_or_else(|| "no access token".to_string())?
            .to_string(),
        refresh_token: auth.refresh_token().map(|t| t.to_string()),
        expires_in: auth.expires_in() as i64,
    })
}

async fn refresh_session(
    cognito: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
    username: &str,
) -> Result<TokenSet, String> {
    let hash = secret_hash(username, client_id, client_secret)?;

    let result = cognito
        .initiate_auth()
        .auth_flow(AuthFlowType::RefreshTokenAuth)
        .client_id(client_id)
        .auth_parameters("REFRESH_TOKEN", refresh_token)
        .auth_parameters("SECRET_HASH", hash)
        .send()
        .await
        .map_err(|e| format!("initiate_auth (refresh) error: {}", e))?;

    let auth = result
        .authentication_result()
        .ok_or_else(|| "no authentication result".to_string())?;

    Ok(TokenSet {
        access_token: auth
            .access_token()
            .ok_or_else(|| "no access token".to_string())?
            .to_string(),
        // Cognito does not rotate the refresh token on this flow.
        refresh_token: None,
        expires_in: auth.expires_in() as i64,
    })
}

/// HTTP Handler: POST /login
pub async fn login(
    cognito: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let payload: LoginPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Invalid login payload: {}", e);
            return bad_request("Invalid request body");
        }
    };

    match password_auth(cognito, client_id, client_secret, &payload.email, &payload.password).await {
        Ok(tokens) => {
            let (user_id, username) = match validate_access_token(cognito, &tokens.access_token).await {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::error!("Login token validation failed: {}", e);
                    return Ok(unauthorized());
                }
            };

            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json");
            for cookie in session_cookies(&tokens, &username) {
                builder = builder.header("Set-Cookie", cookie);
            }
            Ok(builder
                .body(
                    serde_json::json!({"message": "Login successful", "userId": user_id})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Login failed: {}", e);
            Ok(unauthorized())
        }
    }
}

/// HTTP Handler: POST /signup
///
/// Creates the Cognito account and the DynamoDB user row it owns.
pub async fn signup(
    cognito: &CognitoClient,
    dynamo: &DynamoClient,
    table_name: &str,
    client_id: &str,
    client_secret: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let payload: SignupPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Invalid signup payload: {}", e);
            return bad_request("Invalid request body");
        }
    };

    if payload.email.is_empty() || !payload.email.contains('@') {
        return bad_request("Please provide a valid email address");
    }

    let hash = match secret_hash(&payload.email, client_id, client_secret) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!("Signup secret hash failed: {}", e);
            return server_error("Failed to create account");
        }
    };

    let email_attr = AttributeType::builder()
        .name("email")
        .value(payload.email.clone())
        .build()
        .map_err(Box::new)?;
    let name_attr = AttributeType::builder()
        .name("name")
        .value(payload.name.clone())
        .build()
        .map_err(Box::new)?;

    let result = cognito
        .sign_up()
        .client_id(client_id)
        .secret_hash(hash)
        .username(&payload.email)
        .password(&payload.password)
        .user_attributes(email_attr)
        .user_attributes(name_attr)
        .send()
        .await;

    match result {
        Ok(output) => {
            let user_id = output.user_sub().to_string();
            if let Err(e) =
                create_user_record(dynamo, table_name, &user_id, &payload.name, &payload.email).await
            {
                tracing::error!("User row creation failed for {}: {}", user_id, e);
                return server_error("Failed to create account");
            }

            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("Content-Type", "application/json")
                .body(
                    serde_json::json!({"message": "Account created", "userId": user_id})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Cognito signup failed: {}", e);
            server_error("Failed to create account")
        }
    }
}

/// HTTP Handler: POST /refresh
///
/// Explicit session refresh from the refresh-token cookie.
pub async fn refresh_token(
    cognito: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    cookie_header: Option<&str>,
) -> Result<Response<Body>, Error> {
    let cookies = parse_cookies(cookie_header);
    let (refresh, username) = match (
        cookies.get(REFRESH_TOKEN_COOKIE),
        cookies.get(USERNAME_COOKIE),
    ) {
        (Some(r), Some(u)) => (r.clone(), u.clone()),
        _ => return Ok(unauthorized()),
    };

    match refresh_session(cognito, client_id, client_secret, &refresh, &username).await {
        Ok(tokens) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json");
            for cookie in session_cookies(&tokens, &username) {
                builder = builder.header("Set-Cookie", cookie);
            }
            Ok(builder
                .body(
                    serde_json::json!({"message": "Session refreshed"})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
        Err(e) => {
            tracing::error!("Session refresh failed: {}", e);
            Ok(unauthorized())
        }
    }
}

/// Authenticate a request from its Cookie header, refreshing the
/// session automatically when the access token has expired. On failure
/// the caller gets a ready-made 401 to return.
pub async fn authenticate_cookie_request(
    cognito: &CognitoClient,
    client_id: &str,
    client_secret: &str,
    cookie_header: Option<&str>,
) -> Result<AuthContext, Response<Body>> {
    let cookies = parse_cookies(cookie_header);

    if let Some(token) = cookies.get(ACCESS_TOKEN_COOKIE) {
        if let Ok((user_id, _)) = validate_access_token(cognito, token).await {
            return Ok(AuthContext {
                user_id,
                set_cookies: vec![],
            });
        }
    }

    let (refresh, username) = match (
        cookies.get(REFRESH_TOKEN_COOKIE),
        cookies.get(USERNAME_COOKIE),
    ) {
        (Some(r), Some(u)) => (r.clone(), u.clone()),
        _ => return Err(unauthorized()),
    };

    let tokens = refresh_session(cognito, client_id, client_secret, &refresh, &username)
        .await
        .map_err(|e| {
            tracing::warn!("Automatic session refresh failed: {}", e);
            unauthorized()
        })?;

    let (user_id, username) = validate_access_token(cognito, &tokens.access_token)
        .await
        .map_err(|e| {
            tracing::warn!("Refreshed token validation failed: {}", e);
            unauthorized()
        })?;

    Ok(AuthContext {
        user_id,
        set_cookies: session_cookies(&tokens, &username),
    })
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

async fn exchange_code_for_tokens(
    http: &reqwest::Client,
    cognito_domain: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenSet, String> {
    let params = [
        ("grant_type", "authorization_code"),
        ("client_id", client_id),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];

    let response = http
        .post(format!("https://{}/oauth2/token", cognito_domain))
        .basic_auth(client_id, Some(client_secret))
        .form(&params)
        .send()
        .await
        .map_err(|e| format!("token endpoint request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("token endpoint returned {}", response.status()));
    }

    let tokens: OAuthTokenResponse = response
        .json()
        .await
        .map_err(|e| format!("token endpoint response malformed: {}", e))?;

    Ok(TokenSet {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
    })
}

fn redirect(location: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// HTTP Handler: GET /auth/callback?code=
///
/// Exchanges the hosted-UI authorization code for a session, makes sure
/// a user row exists for OAuth-provisioned accounts, and redirects to
/// the app. Missing code falls back to a root redirect.
pub async fn oauth_callback(
    http: &reqwest::Client,
    cognito: &CognitoClient,
    dynamo: &DynamoClient,
    table_name: &str,
    cognito_domain: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    app_url: &str,
    code: Option<&str>,
) -> Result<Response<Body>, Error> {
    let code = match code {
        Some(code) if !code.is_empty() => code,
        _ => return redirect(&format!("{}/", app_url)),
    };

    let tokens = match exchange_code_for_tokens(
        http,
        cognito_domain,
        client_id,
        client_secret,
        redirect_uri,
        code,
    )
    .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::error!("Error exchanging code for session: {}", e);
            return redirect(&format!("{}/auth/error", app_url));
        }
    };

    let (user_id, username) = match validate_access_token(cognito, &tokens.access_token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!("OAuth token validation failed: {}", e);
            return redirect(&format!("{}/auth/error", app_url));
        }
    };

    // First OAuth sign-in has no row yet; create one from the Cognito
    // profile so gallery writes can denormalize a display name.
    if load_user(dynamo, table_name, &user_id).await.is_err() {
        let profile = cognito.get_user().access_token(&tokens.access_token).send().await;
        let (name, email) = match &profile {
            Ok(p) => {
                let find = |key: &str| {
                    p.user_attributes()
                        .iter()
                        .find(|attr| attr.name() == key)
                        .and_then(|attr| attr.value())
                        .unwrap_or_default()
                        .to_string()
                };
                (find("name"), find("email"))
            }
            Err(_) => (String::new(), String::new()),
        };
        if let Err(e) = create_user_record(dynamo, table_name, &user_id, &name, &email).await {
            tracing::warn!("Could not provision user row for {}: {}", user_id, e);
        }
    }

    let mut builder = Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", format!("{}/dashboard", app_url));
    for cookie in session_cookies(&tokens, &username) {
        builder = builder.header("Set-Cookie", cookie);
    }
    Ok(builder.body(Body::Empty).map_err(Box::new)?)
}

fn bad_request(message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .body(serde_json::json!({"error": message}).to_string().into())
        .map_err(Box::new)?)
}

fn server_error(message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("Content-Type", "application/json")
        .body(serde_json::json!({"error": message}).to_string().into())
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cookies_splits_pairs() {
        let cookies = parse_cookies(Some("a=1; vg_access_token=tok; b=x=y"));
        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(cookies.get(ACCESS_TOKEN_COOKIE).map(String::as_str), Some("tok"));
        assert_eq!(cookies.get("b").map(String::as_str), Some("x=y"));
        assert!(parse_cookies(None).is_empty());
    }

    #[test]
    fn cookie_format_is_httponly_and_scoped() {
        let cookie = build_cookie(ACCESS_TOKEN_COOKIE, "tok", 3600);
        assert_eq!(
            cookie,
            "vg_access_token=tok; Path=/; HttpOnly; Secure; SameSite=None; Max-Age=3600"
        );
        assert!(clear_cookie(REFRESH_TOKEN_COOKIE).contains("Max-Age=0"));
    }

    #[test]
    fn secret_hash_is_deterministic_per_username() {
        let a = secret_hash("alice@example.com", "client", "secret").unwrap();
        let b = secret_hash("alice@example.com", "client", "secret").unwrap();
        let c = secret_hash("bob@example.com", "client", "secret").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // base64 of a 32-byte MAC
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn cors_origin_reflects_only_known_origins() {
        let app = "https://visuagen.app";
        assert_eq!(cors_origin_from(Some(app), app), app);
        assert_eq!(cors_origin_from(Some(DEV_ORIGIN), app), DEV_ORIGIN);
        assert_eq!(cors_origin_from(Some("https://evil.example"), app), app);
        assert_eq!(cors_origin_from(None, app), app);
    }

    #[test]
    fn session_cookies_include_refresh_only_when_present() {
        let with_refresh = session_cookies(
            &TokenSet {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                expires_in: 3600,
            },
            "alice@example.com",
        );
        assert_eq!(with_refresh.len(), 3);

        let without_refresh = session_cookies(
            &TokenSet {
                access_token: "at".to_string(),
                refresh_token: None,
                expires_in: 3600,
            },
            "alice@example.com",
        );
        assert_eq!(without_refresh.len(), 2);
        assert!(without_refresh.iter().all(|c| !c.starts_with(REFRESH_TOKEN_COOKIE)));
    }
}
