#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod client;
pub mod crawler;
pub mod enricher;
pub mod filters;
pub mod pager;
pub mod progress;
pub mod runner;
pub mod scorer;
pub mod site;
pub mod state;
pub mod store;
pub mod types;
pub mod utils;
