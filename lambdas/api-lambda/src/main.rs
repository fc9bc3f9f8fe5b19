use std::sync::Arc;

use lambda_http::{run, service_fn, tracing, Error};
use visuagen_shared::AppState;

mod http_handler;
use http_handler::function_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let state = Arc::new(AppState {
        dynamo_client: aws_sdk_dynamodb::Client::new(&config),
        cognito_client: aws_sdk_cognitoidentityprovider::Client::new(&config),
        http_client: reqwest::Client::new(),
    });

    run(service_fn(move |event| {
        let state = state.clone();
        async move { function_handler(event, state).await }
    }))
    .await
}
