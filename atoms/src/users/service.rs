use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{Body, Error, Response};

use super::model::User;

/// Create the DynamoDB user row after a Cognito signup. Called once per
/// account; PK and SK are both USER#<cognito-sub>.
pub async fn create_user_record(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    user_name: &str,
    user_email: &str,
) -> Result<User, String> {
    let now = chrono::Utc::now().to_rfc3339();
    let pk = format!("USER#{}", user_id);

    client
        .put_item()
        .table_name(table_name)
        .item("PK", AttributeValue::S(pk.clone()))
        .item("SK", AttributeValue::S(pk))
        .item("user_name", AttributeValue::S(user_name.to_string()))
        .item("user_email", AttributeValue::S(user_email.to_string()))
        .item("user_created_at", AttributeValue::S(now.clone()))
        .send()
        .await
        .map_err(|e| format!("DynamoDB put_item error: {}", e))?;

    Ok(User {
        user_id: user_id.to_string(),
        user_name: user_name.to_string(),
        user_email: user_email.to_string(),
        user_created_at: now,
        user_last_login: None,
    })
}

/// Fetch a user row. Falls back to the mailbox part of the email when
/// the stored name is blank, so gallery rows always carry a display name.
pub async fn load_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<User, String> {
    let pk = format!("USER#{}", user_id);

    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk.clone()))
        .key("SK", AttributeValue::S(pk))
        .send()
        .await
        .map_err(|e| format!("DynamoDB get_item error: {}", e))?;

    let item = result.item().ok_or_else(|| "User not found".to_string())?;

    let mut user_name = item
        .get("user_name")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();
    let user_email = item
        .get("user_email")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();
    if user_name.trim().is_empty() {
        user_name = user_email.split('@').next().unwrap_or("User").to_string();
    }

    Ok(User {
        user_id: user_id.to_string(),
        user_name,
        user_email,
        user_created_at: item
            .get("user_created_at")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default(),
        user_last_login: item
            .get("user_last_login")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string()),
    })
}

/// HTTP Handler: GET /users/me
pub async fn get_user(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
) -> Result<Response<Body>, Error> {
    match load_user(client, table_name, user_id).await {
        Ok(user) => {
            // Update last_login on every get
            let now = chrono::Utc::now().to_rfc3339();
            let pk = format!("USER#{}", user_id);
            let _ = client
                .update_item()
                .table_name(table_name)
                .key("PK", AttributeValue::S(pk.clone()))
                .key("SK", AttributeValue::S(pk))
                .update_expression("SET user_last_login = :login")
                .expression_attribute_values(":login", AttributeValue::S(now.clone()))
                .send()
                .await;

            let user = User {
                user_last_login: Some(now),
                ..user
            };

            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(serde_json::to_string(&user)?.into())
                .map_err(Box::new)?)
        }
        Err(e) if e == "User not found" => Ok(Response::builder()
            .status(404)
            .header("content-type", "application/json")
            .body(serde_json::json!({"error": e}).to_string().into())
            .map_err(Box::new)?),
        Err(e) => {
            tracing::error!("Failed to load user {}: {}", user_id, e);
            Ok(Response::builder()
                .status(500)
                .header("content-type", "application/json")
                .body(
                    serde_json::json!({"error": "Failed to load user"})
                        .to_string()
                        .into(),
                )
                .map_err(Box::new)?)
        }
    }
}
