// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A minimal echo bot: logs in, then answers every chat message with
//! its own body.
//!
//! Usage: `cargo run --example echo_bot -- <jid> <password>`

use std::env::args;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use minitag::Tag;
use tokio_jabber::stanza::Message;
use tokio_jabber::{Client, MessageHandler};

/// Collects incoming messages; the main loop drains and answers them.
#[derive(Default)]
struct Inbox {
    pending: Mutex<Vec<(String, String)>>,
}

impl MessageHandler for Inbox {
    fn handle_message(&self, message: &Message) {
        let (Some(from), Some(body)) = (message.from(), message.body()) else {
            return;
        };
        if body.is_empty() {
            return;
        }
        self.pending
            .lock()
            .unwrap()
            .push((from.to_string(), body));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = args().collect();
    if args.len() != 3 {
        println!("Usage: {} <jid> <password>", args[0]);
        std::process::exit(1);
    }
    let jid = args[1].parse()?;
    let password = &args[2];

    let mut client = Client::new(jid, password.as_str());
    let inbox = Arc::new(Inbox::default());
    client.handlers().register_message_handler(inbox.clone());

    client.connect().await?;
    loop {
        client.recv(Some(Duration::from_secs(1))).await?;
        let pending: Vec<_> = inbox.pending.lock().unwrap().drain(..).collect();
        for (to, body) in pending {
            println!("{}: {}", to, body);
            let reply = Tag::new("message")
                .attribute("to", to)
                .attribute("type", "chat")
                .child(Tag::with_text("body", body));
            client.send(&reply).await;
        }
    }
}
