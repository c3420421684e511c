//! Log in and list the environment's nodes with the async `AnvilClient`.
//!
//! Run:
//! `ANVIL_ADDRESS=<host> ANVIL_USERNAME=admin ANVIL_PASSWORD=<pw> cargo run --example async_list_nodes`

use anvil_client::AnvilClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = std::env::var("ANVIL_ADDRESS").unwrap_or_else(|_| {
        eprintln!("Set ANVIL_ADDRESS before running this example.");
        std::process::exit(2);
    });
    let username = std::env::var("ANVIL_USERNAME")?;
    let password = std::env::var("ANVIL_PASSWORD")?;

    // Appliances usually ship a self-signed certificate.
    let mut client = AnvilClient::from_address(&address)?.accepting_invalid_certs()?;
    client.login_verified(&username, &password).await?;

    for node in client.list_nodes().await? {
        println!(
            "{:<24} {:<8} {}",
            node.name,
            node.product_node_type.as_deref().unwrap_or("-"),
            node.sw_version
                .as_ref()
                .map_or("unknown version", |v| v.version.as_str())
        );
    }
    Ok(())
}
