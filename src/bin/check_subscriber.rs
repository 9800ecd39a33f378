use anyhow::{Context, Result};
use prefcenter::config::Config;
use prefcenter::gateway::{Gateway, HttpGateway};
use prefcenter::types::SubscriberId;
use std::env;
use std::str::FromStr;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin check-subscriber <subscriber_id> [topic]");
        eprintln!(
            "Example: GATEWAY_API_URL=https://api.example.com GATEWAY_API_KEY=... cargo run --bin check-subscriber user:42 product-updates"
        );
        std::process::exit(1);
    }

    let subscriber_id = SubscriberId::from_str(&args[1]).context("Invalid subscriber id")?;

    let config = Config::from_env().context("Missing gateway configuration")?;
    let gateway = HttpGateway::new(config.gateway_api_url, config.gateway_api_key);

    if !gateway.subscriber_exists(&subscriber_id).await? {
        println!("Subscriber {} not found", subscriber_id);
        return Ok(());
    }
    println!("Subscriber {} exists", subscriber_id);

    if let Some(topic) = args.get(2) {
        let subscriptions = gateway.fetch_subscriptions(topic, &subscriber_id).await?;
        if subscriptions.is_empty() {
            println!("No active subscriptions for topic {}", topic);
        } else {
            println!("Active subscriptions for topic {}:", topic);
            for subscription in subscriptions {
                println!(
                    "  id={} identifier={}",
                    subscription.id,
                    subscription.identifier.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
