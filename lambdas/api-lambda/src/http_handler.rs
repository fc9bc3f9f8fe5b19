use std::env;
use std::sync::Arc;

use lambda_http::http::header::{HeaderValue, SET_COOKIE, VARY};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use visuagen_atoms::gallery;
use visuagen_atoms::gallery::service::DEFAULT_PAGE_LIMIT;
use visuagen_atoms::users;
use visuagen_shared::{auth, download, pipeline, AppState};

fn with_set_cookies(mut resp: Response<Body>, cookies: &[String]) -> Response<Body> {
    let headers = resp.headers_mut();
    for cookie in cookies {
        if let Ok(v) = HeaderValue::from_str(cookie) {
            headers.append(SET_COOKIE, v);
        }
    }
    resp
}

fn with_cors_headers(mut resp: Response<Body>, request_origin: Option<&str>) -> Response<Body> {
    let cors_origin = auth::get_cors_origin(request_origin);

    let headers = resp.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_str(&cors_origin)
            .unwrap_or_else(|_| HeaderValue::from_static("https://visuagen.app")),
    );
    headers.insert("Access-Control-Allow-Credentials", HeaderValue::from_static("true"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization,Cookie"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));

    resp
}

fn finalize_response(
    resp: Result<Response<Body>, Error>,
    request_origin: Option<&str>,
    cookies: &[String],
) -> Result<Response<Body>, Error> {
    resp.map(|r| with_cors_headers(with_set_cookies(r, cookies), request_origin))
}

fn body_bytes(body: &Body) -> &[u8] {
    match body {
        Body::Text(text) => text.as_bytes(),
        Body::Binary(bytes) => bytes,
        Body::Empty => &[],
    }
}

/// Parse a non-negative pagination parameter, falling back on anything
/// that does not parse.
fn query_usize(event: &Request, name: &str, default: usize) -> usize {
    event
        .query_string_parameters_ref()
        .and_then(|params| params.first(name))
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Main Lambda handler - routes requests to auth, gallery, and
/// generation endpoints.
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    let request_origin = event.headers().get("Origin").and_then(|v| v.to_str().ok());
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == "OPTIONS" {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::Empty)
            .map_err(Box::new)?;
        return Ok(with_cors_headers(resp, request_origin));
    }

    let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "visuagen".to_string());

    // Public gallery page
    if path == "/api/gallery" {
        return match method {
            &Method::GET => {
                let limit = query_usize(&event, "limit", DEFAULT_PAGE_LIMIT);
                let offset = query_usize(&event, "offset", 0);
                finalize_response(
                    gallery::list_gallery_handler(&state.dynamo_client, &table_name, limit, offset)
                        .await,
                    request_origin,
                    &[],
                )
            }
            _ => finalize_response(method_not_allowed(), request_origin, &[]),
        };
    }

    // Public image download
    if let Some(rest) = path.strip_prefix("/api/images/") {
        if let (Some(image_id), &Method::GET) = (rest.strip_suffix("/download"), method) {
            return finalize_response(
                download::download_image_handler(&state.dynamo_client, &table_name, image_id).await,
                request_origin,
                &[],
            );
        }
        return finalize_response(not_found(), request_origin, &[]);
    }

    // Auth endpoints (no session required)
    if path.starts_with("/login") {
        let client_id = env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set");
        let client_secret =
            env::var("COGNITO_CLIENT_SECRET").expect("COGNITO_CLIENT_SECRET must be set");

        return match method {
            &Method::POST => finalize_response(
                auth::login(&state.cognito_client, &client_id, &client_secret, body_bytes(body))
                    .await,
                request_origin,
                &[],
            ),
            _ => finalize_response(method_not_allowed(), request_origin, &[]),
        };
    }

    if path.starts_with("/signup") {
        let client_id = env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set");
        let client_secret =
            env::var("COGNITO_CLIENT_SECRET").expect("COGNITO_CLIENT_SECRET must be set");

        return match method {
            &Method::POST => finalize_response(
                auth::signup(
                    &state.cognito_client,
                    &state.dynamo_client,
                    &table_name,
                    &client_id,
                    &client_secret,
                    body_bytes(body),
                )
                .await,
                request_origin,
                &[],
            ),
            _ => finalize_response(method_not_allowed(), request_origin, &[]),
        };
    }

    if path.starts_with("/refresh") {
        let client_id = env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set");
        let client_secret =
            env::var("COGNITO_CLIENT_SECRET").expect("COGNITO_CLIENT_SECRET must be set");
        let cookie_header = event.headers().get("Cookie").and_then(|v| v.to_str().ok());

        return match method {
            &Method::POST => finalize_response(
                auth::refresh_token(&state.cognito_client, &client_id, &client_secret, cookie_header)
                    .await,
                request_origin,
                &[],
            ),
            _ => finalize_response(method_not_allowed(), request_origin, &[]),
        };
    }

    if path.starts_with("/logout") {
        return match method {
            &Method::POST => {
                let resp = Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "application/json")
                    .header("Set-Cookie", auth::clear_cookie(auth::ACCESS_TOKEN_COOKIE))
                    .header("Set-Cookie", auth::clear_cookie(auth::REFRESH_TOKEN_COOKIE))
                    .header("Set-Cookie", auth::clear_cookie(auth::USERNAME_COOKIE))
                    .body(serde_json::json!({"message": "ok"}).to_string().into())
                    .map_err(Box::new)?;
                finalize_response(Ok(resp), request_origin, &[])
            }
            _ => finalize_response(method_not_allowed(), request_origin, &[]),
        };
    }

    // OAuth callback from the hosted UI
    if path == "/auth/callback" {
        if method != &Method::GET {
            return finalize_response(method_not_allowed(), request_origin, &[]);
        }

        let client_id = env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set");
        let client_secret =
            env::var("COGNITO_CLIENT_SECRET").expect("COGNITO_CLIENT_SECRET must be set");
        let cognito_domain = env::var("COGNITO_DOMAIN").expect("COGNITO_DOMAIN must be set");
        let app_url = env::var("APP_URL").unwrap_or_else(|_| "https://visuagen.app".to_string());
        let redirect_uri = env::var("OAUTH_REDIRECT_URI")
            .unwrap_or_else(|_| format!("{}/auth/callback", app_url));
        let code = event
            .query_string_parameters_ref()
            .and_then(|params| params.first("code"))
            .map(|s| s.to_string());

        return finalize_response(
            auth::oauth_callback(
                &state.http_client,
                &state.cognito_client,
                &state.dynamo_client,
                &table_name,
                &cognito_domain,
                &client_id,
                &client_secret,
                &redirect_uri,
                &app_url,
                code.as_deref(),
            )
            .await,
            request_origin,
            &[],
        );
    }

    // All remaining routes require a session (cookie auth + auto-refresh)
    let client_id = env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set");
    let client_secret = env::var("COGNITO_CLIENT_SECRET").expect("COGNITO_CLIENT_SECRET must be set");
    let cookie_header = event.headers().get("Cookie").and_then(|v| v.to_str().ok());

    let auth_ctx = match auth::authenticate_cookie_request(
        &state.cognito_client,
        &client_id,
        &client_secret,
        cookie_header,
    )
    .await
    {
        Ok(ctx) => ctx,
        Err(resp) => return Ok(with_cors_headers(resp, request_origin)),
    };

    let user_id = auth_ctx.user_id.clone();

    let resp = match (method, path) {
        (&Method::GET, "/users/me") => {
            users::get_user(&state.dynamo_client, &table_name, &user_id).await
        }
        (&Method::POST, "/api/generate-image") => {
            pipeline::generate_image_handler(
                &state.dynamo_client,
                &state.http_client,
                &table_name,
                &user_id,
                body_bytes(body),
            )
            .await
        }
        (&Method::GET, "/api/profile/images") => {
            let limit = query_usize(&event, "limit", DEFAULT_PAGE_LIMIT);
            let offset = query_usize(&event, "offset", 0);
            gallery::list_user_images_handler(
                &state.dynamo_client,
                &table_name,
                &user_id,
                limit,
                offset,
            )
            .await
        }
        _ => {
            tracing::warn!("No route matched - Method: {} Path: {}", method, path);
            not_found()
        }
    };

    finalize_response(resp, request_origin, &auth_ctx.set_cookies)
}

fn not_found() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(serde_json::json!({"error": "Not found"}).to_string().into())
        .map_err(Box::new)?)
}

fn method_not_allowed() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Content-Type", "application/json")
        .body(
            serde_json::json!({"error": "Method not allowed"})
                .to_string()
                .into(),
        )
        .map_err(Box::new)?)
}
