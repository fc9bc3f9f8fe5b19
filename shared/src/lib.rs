pub mod auth;
pub mod datauri;
pub mod download;
pub mod imagegen;
pub mod pipeline;
pub mod removal;
pub mod types;

use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;

/// Clients constructed once at cold start and shared across invocations.
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub cognito_client: CognitoClient,
    pub http_client: reqwest::Client,
}
