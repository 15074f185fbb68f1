use mongodb::{options::ClientOptions, Client, Database};
use std::env;

pub async fn connect() -> Database {
    let mongo_url = env::var("MONGO_URL").expect("MONGO_URL must be set");

    let client_options = ClientOptions::parse(&mongo_url)
        .await
        .expect("Failed to parse MongoDB connection string");

    let client = Client::with_options(client_options).expect("Failed to initialize MongoDB client");

    client.database("shop")
}
