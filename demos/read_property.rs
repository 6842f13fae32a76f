//! Reads a property of a Thing registered in the directory
//!
//! Usage: `read_property <thing id> <property>`, with the directory configured through
//! `THING_DIRECTORY_HOST` and `THING_DIRECTORY_KEY`.

use std::{env, process, sync::Arc};

use tracing_subscriber::EnvFilter;
use wot_client::{
    flatten::{nest, Node},
    repository::InMemoryRepository,
    ClientConfig, ClientContext, ThingClient,
};

fn print(node: &Node, depth: usize) {
    match node {
        Node::Leaf(item) => println!("{:indent$}{item}", "", indent = depth * 2),
        Node::Branch(children) => {
            for child in children {
                print(child, depth + 1);
            }
        }
    }
}

#[tokio::main]
async fn main() -> wot_client::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let (Some(thing_id), Some(property)) = (args.next(), args.next()) else {
        eprintln!("usage: read_property <thing id> <property>");
        process::exit(2);
    };

    let config = ClientConfig::from_env()?;
    let context = ClientContext::new(&config, Arc::new(InMemoryRepository::new()))?;
    let thing = ThingClient::connect(&thing_id, &context).await?;

    let tokens = thing.read_property(&property).await?;
    match nest(&tokens) {
        Some(nodes) => nodes.iter().for_each(|node| print(node, 0)),
        None => tokens.iter().for_each(|token| println!("{token}")),
    }

    Ok(())
}
