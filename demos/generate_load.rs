// Copyright 2025 Aktuell Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Writes a steady trickle of inserts, updates, and deletes into a
//! collection so a running Aktuell server has something to fan out.
//!
//! To run this demo:
//! ```bash
//! # Make sure MongoDB is running on localhost:27017
//! cargo run --bin generate-load
//! ```

use bson::doc;
use mongodb::Client;
use std::time::Duration;

const MONGODB_URI: &str = "mongodb://localhost:27017";
const DATABASE: &str = "aktuell";
const COLLECTION: &str = "orders";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let client = Client::with_uri_str(MONGODB_URI).await?;
    let collection = client
        .database(DATABASE)
        .collection::<bson::Document>(COLLECTION);

    println!("Writing to {DATABASE}.{COLLECTION} every second, Ctrl-C to stop\n");

    let mut round: u64 = 0;
    loop {
        round += 1;
        let order_id = format!("order-{round}");

        collection
            .insert_one(doc! {
                "_id": &order_id,
                "round": round as i64,
                "status": "created",
            })
            .await?;
        println!("inserted {order_id}");

        collection
            .update_one(
                doc! { "_id": &order_id },
                doc! { "$set": { "status": "shipped" } },
            )
            .await?;
        println!("updated  {order_id}");

        // Keep the collection from growing without bound.
        if round > 10 {
            let stale = format!("order-{}", round - 10);
            collection.delete_one(doc! { "_id": &stale }).await?;
            println!("deleted  {stale}");
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
