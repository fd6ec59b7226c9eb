#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;

pub use config::Config;

use config::{ConfigFairing, LedgerFairing};
use logging::LoggerFairing;

/// Assemble the server from `Rocket.toml` and `ROCKET_*` environment
/// variables. Storage is connected when the instance is ignited.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(LedgerFairing)
}

/// A test server over the given ledger, with fixed auth settings.
#[cfg(test)]
pub(crate) fn rocket_for_ledger(ledger: ledger::VoteLedger) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("jwt_secret", "test jwt secret"))
        .merge(("log_level", "off"));
    rocket::custom(figment)
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .manage(ledger)
}
