//! List the endpoint catalog without touching the network.
//!
//! Run:
//! `cargo run --example blocking_list_operations`

use anvil_client::BlockingAnvilClient;

fn main() {
    let operations = BlockingAnvilClient::operations();
    println!("Loaded {} operations", operations.len());

    for operation in operations {
        println!(
            "- {:<6} {:<50} ({})",
            operation.method, operation.path_template, operation.operation_id
        );
    }
}
