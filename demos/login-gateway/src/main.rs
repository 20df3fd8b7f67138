//! Toy authentication gateway built on Keystone.
//!
//! Accepts a login packet once the handshake is done, checks it against a
//! fixed account table, and answers with a success or failure packet.
//!
//! ```text
//! cargo run -p login-gateway -- [config.json]
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use keystone::prelude::*;
use keystone::session::generate_handshake_key;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

const LOGIN: u8 = 0x6F;
const LOGIN_SUCCESS: u8 = 0x96;
const LOGIN_FAILED: u8 = 0x07;

fn login() -> Result<PacketSchema, KeystoneError> {
    Ok(PacketSchema::builder("login", LOGIN, Direction::Incoming)
        .sequenced()
        .field("username", FieldKind::string(31))
        .field("password", FieldKind::string(17))
        .field(
            "keys",
            FieldKind::nested([
                ("k0", FieldKind::u32()),
                ("k1", FieldKind::u32()),
                ("k2", FieldKind::u32()),
                ("k3", FieldKind::u32()),
            ]),
        )
        .build()?)
}

fn login_success() -> Result<PacketSchema, KeystoneError> {
    Ok(PacketSchema::builder("login_success", LOGIN_SUCCESS, Direction::Outgoing)
        .field("session_key", FieldKind::u32())
        .field("result", FieldKind::u8())
        .build()?)
}

fn login_failed() -> Result<PacketSchema, KeystoneError> {
    Ok(PacketSchema::builder("login_failed", LOGIN_FAILED, Direction::Outgoing)
        .field("reason", FieldKind::string(9))
        .build()?)
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

struct Account {
    id: AccountId,
    password: &'static str,
}

fn accounts() -> HashMap<&'static str, Account> {
    HashMap::from([
        ("alice", Account { id: AccountId(1), password: "wonderland" }),
        ("bob", Account { id: AccountId(2), password: "builder" }),
    ])
}

enum Verdict {
    Accepted(AccountId),
    Rejected(&'static str),
}

fn check(accounts: &HashMap<&'static str, Account>, username: &str, password: &str) -> Verdict {
    match accounts.get(username) {
        None => Verdict::Rejected("NOACCT"),
        Some(account) if account.password != password => Verdict::Rejected("WRONGPWD"),
        Some(account) => Verdict::Accepted(account.id),
    }
}

fn dispatcher() -> Dispatcher {
    let accounts = Arc::new(accounts());
    Dispatcher::new().on(LOGIN, move |packet, ctx| {
        let username = packet.str(0).unwrap_or_default();
        let password = packet.str(1).unwrap_or_default();

        match check(&accounts, username, password) {
            Verdict::Accepted(account) => {
                ctx.bind_account(account)?;
                let key = generate_handshake_key(&mut rand::rng());
                tracing::info!(%account, username, "login accepted");
                ctx.send(Packet::new(LOGIN_SUCCESS, vec![key.into(), 0u8.into()]))
            }
            Verdict::Rejected(reason) => {
                tracing::info!(username, reason, "login rejected");
                ctx.send(Packet::new(LOGIN_FAILED, vec![reason.into()]))
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig {
            bind_addr: "0.0.0.0:11002".into(),
            ..ServerConfig::default()
        },
    };

    let server = KeystoneServer::builder()
        .config(ServerConfig {
            role: ServerRole::Auth,
            ..config
        })
        .packet(login()?)
        .packet(login_success()?)
        .packet(login_failed()?)
        .dispatcher(dispatcher())
        .build()
        .await?;

    tracing::info!(addr = %server.local_addr()?, "login gateway ready");
    server.run().await?;
    Ok(())
}
