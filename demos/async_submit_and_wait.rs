//! Create a share and wait for the background task the server spawns.
//!
//! Run:
//! `ANVIL_ADDRESS=<host> ANVIL_USERNAME=admin ANVIL_PASSWORD=<pw> cargo run --example async_submit_and_wait`

use std::time::Duration;

use anvil_client::{AnvilClient, PollPolicy, Submission};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = std::env::var("ANVIL_ADDRESS")?;
    let username = std::env::var("ANVIL_USERNAME")?;
    let password = std::env::var("ANVIL_PASSWORD")?;

    let mut client = AnvilClient::from_address(&address)?.accepting_invalid_certs()?;
    client.login(&username, &password).await?;

    let body = json!({
        "name": "demo-share",
        "path": "/demo-share",
    });

    let submission = client
        .submit_operation("createShare", &[], &[], Some(body))
        .await?;

    match submission {
        Submission::Done(value) => {
            println!("created synchronously: {value}");
        }
        Submission::Accepted(handle) => {
            println!("accepted as task {}", handle.task_id());
            let policy = PollPolicy::default().with_max_total_wait(Duration::from_secs(120));
            let report = client.wait_for_task(&handle, &policy).await?;
            println!("finished as {:?}: {:?}", report.state, report.result);
        }
    }
    Ok(())
}
