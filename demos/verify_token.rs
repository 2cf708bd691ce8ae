//! Authenticates one `Authorization` header value against a live user pool.
//!
//! ```text
//! IDENTITY_PROVIDER_POOL_ID=eu-west-1_AbCdEf123 IDENTITY_PROVIDER_REGION=eu-west-1 \
//!     cargo run --example verify_token -- "Bearer eyJ..."
//! ```

use nila_gate::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "nila_gate=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let authorization = std::env::args().nth(1);

    let config = Config::from_env()?;
    info!(issuer = %config.issuer(), "Starting gateway");
    let gateway = Gateway::new(config)?;

    if let Err(e) = gateway.warm_up().await {
        error!("Could not prefetch the key set: {}", e);
    }

    match gateway.authenticate(authorization.as_deref()).await {
        Ok(identity) => {
            println!("Authenticated subject: {}", identity.subject);
            println!("{}", serde_json::to_string_pretty(&identity.claims)?);
        }
        Err(rejection) => {
            println!("{} ({})", rejection.public_message(), rejection.kind());
        }
    }
    Ok(())
}
