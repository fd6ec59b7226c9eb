use std::sync::Arc;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::ledger::{VoteLedger, DEFAULT_CAST_ATTEMPTS};
use crate::model::mongodb::MongoLedgerStore;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Secret key used to sign and verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    #[cfg(test)]
    pub fn example() -> Self {
        Self {
            jwt_secret: "example jwt secret".to_string(),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Where ledger state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// A MongoDB replica set, required for transactions.
    #[default]
    Mongodb,
    /// Process memory; everything is lost on shutdown.
    Memory,
}

/// Configuration for the ledger and its storage.
#[derive(Deserialize)]
struct LedgerConfig {
    #[serde(default)]
    ledger_backend: LedgerBackend,
    // secrets
    db_uri: Option<String>,
    #[serde(default = "default_database")]
    database: String,
    #[serde(default = "default_cast_attempts")]
    cast_attempts: u32,
}

fn default_database() -> String {
    "votechain".to_string()
}

fn default_cast_attempts() -> u32 {
    DEFAULT_CAST_ATTEMPTS
}

/// A fairing that loads the ledger config, connects to the configured
/// backend, performs any setup necessary, and places a [`VoteLedger`] into
/// managed state.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<LedgerConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load ledger config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let ledger = match config.ledger_backend {
            LedgerBackend::Memory => {
                warn!("Using the in-memory ledger, votes will not survive a restart");
                VoteLedger::in_memory()
            }
            LedgerBackend::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set for the mongodb ledger backend");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                let client = match MongoClient::with_uri_str(db_uri).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                let db = client.database(&config.database);

                // Ensure the required indexes and the chain head exist.
                let store = match MongoLedgerStore::connect(client, &db).await {
                    Ok(store) => store,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                info!("...database connection online!");
                VoteLedger::new(Arc::new(store))
            }
        };
        let ledger = ledger.with_cast_attempts(config.cast_attempts);
        info!(
            "Ledger ready ({:?} backend, {} cast attempts)",
            config.ledger_backend,
            ledger.cast_attempts()
        );

        // Manage the state.
        rocket = rocket.manage(ledger);
        Ok(rocket)
    }
}
