//! Minimal kempub client: connect, subscribe, publish, print one message.
//!
//! Usage:
//!   cargo run --example simple_client -- <command_addr> <user> <private_key.pem>

use kempub_client::{Client, ClientOptions};
use kempub_protocol::Properties;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: simple_client <command_addr> <user> <private_key.pem>");
        std::process::exit(1);
    }
    let private_key_pem = std::fs::read_to_string(&args[3])?;

    let mut client = Client::connect(ClientOptions::new(&args[1], &args[2], &private_key_pem)).await?;
    println!("connected as {}", client.client_id());

    let subscription = client.subscribe("demo/#").await?;
    println!("subscribed with id {subscription}");

    client
        .publish("demo/hello", b"hello from simple_client", Properties::default())
        .await?;

    if let Some(msg) = client.recv().await {
        println!(
            "received on '{}': {}",
            msg.topic,
            String::from_utf8_lossy(&msg.payload)
        );
    }

    client.disconnect().await?;
    Ok(())
}
